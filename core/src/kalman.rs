//! Kalman-style estimators (KF/EKF)
//!
//! Both filters share the predict-correct recursion and the lifecycle of [crate::estimator]:
//! the first productive tick seeds the state and sets $P = P_0$; every later tick consumes one
//! input and one measurement.
//!
//! - [KalmanFilter] uses a model linearized once at a nominal operating point
//!   ([crate::linearize::LinearizedModel]).
//! - [ExtendedKalmanFilter] re-evaluates the process Jacobian at the previous estimate and the
//!   measurement Jacobian at the predicted state every tick, and propagates the nonlinear models.
//!
//! The covariance correction is computed in Joseph form and symmetrized, so $P$ stays symmetric
//! positive semi-definite. A tick whose innovation covariance is singular, or whose predicted state
//! sits on the landmark, fails with [EstimationError::NumericalInstability] and leaves the filter
//! unchanged.

use crate::buffer::Buffers;
use crate::dynamics::ProcessModel;
use crate::error::{EstimationError, Result};
use crate::estimator::{
    Estimator, EstimatorKind, EstimatorState, Phase, check_dt, check_initial_state,
    input_for_tick, seed_state,
};
use crate::linalg::{joseph_update, kalman_gain, symmetrize};
use crate::linearize::LinearizedModel;
use crate::measurements::MeasurementModel;
use crate::{Measurement, StateVector, wrap_to_pi};

use std::fmt::{self, Debug, Display};
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};

/// Noise matrices, seeding and measurement alignment shared by both filters.
struct FilterCore {
    measurement: Arc<dyn MeasurementModel>,
    process_noise: DMatrix<f64>,
    measurement_noise: DMatrix<f64>,
    initial_covariance: DMatrix<f64>,
    initial_state: Option<StateVector>,
    measurement_offset: usize,
    inner: EstimatorState,
}
impl FilterCore {
    #[allow(clippy::too_many_arguments)]
    fn new(
        process: &dyn ProcessModel,
        measurement: Arc<dyn MeasurementModel>,
        dt: f64,
        process_noise: DMatrix<f64>,
        measurement_noise: DMatrix<f64>,
        initial_covariance: DMatrix<f64>,
        initial_state: Option<StateVector>,
        measurement_offset: usize,
    ) -> Result<Self> {
        check_dt(dt)?;
        check_initial_state(initial_state.as_ref(), process)?;
        let n = process.state_dimension();
        let m = measurement.dimension();
        if measurement.state_dimension() != n {
            return Err(EstimationError::Configuration(format!(
                "measurement model reads {} states, the process model has {n}",
                measurement.state_dimension()
            )));
        }
        for (name, matrix, size) in [
            ("process noise", &process_noise, n),
            ("measurement noise", &measurement_noise, m),
            ("initial covariance", &initial_covariance, n),
        ] {
            if matrix.shape() != (size, size) {
                return Err(EstimationError::Configuration(format!(
                    "{name} is {}x{}, expected {size}x{size}",
                    matrix.nrows(),
                    matrix.ncols()
                )));
            }
        }
        if measurement_offset > 1 {
            return Err(EstimationError::Configuration(format!(
                "measurement_offset must be 0 or 1, got {measurement_offset}"
            )));
        }
        Ok(FilterCore {
            measurement,
            process_noise,
            measurement_noise,
            initial_covariance,
            initial_state,
            measurement_offset,
            inner: EstimatorState::new(),
        })
    }
    /// Seed x and P on the first productive tick
    fn seed(
        &mut self,
        buffers: &Buffers,
        process: &dyn ProcessModel,
    ) -> Result<Option<StateVector>> {
        let Some(seed) = seed_state(self.initial_state.as_ref(), buffers, process)? else {
            return Ok(None);
        };
        self.inner.covariance = Some(self.initial_covariance.clone());
        Ok(Some(self.inner.push(seed)))
    }
    /// Measurement fused by tick `k ≥ 1`
    fn measurement_for_tick<'a>(
        &self,
        buffers: &'a Buffers,
        tick: usize,
    ) -> Result<Option<&'a Measurement>> {
        let Some(measurement) = buffers.measurements.get(tick - 1 + self.measurement_offset)
        else {
            return Ok(None);
        };
        if measurement.values.len() != self.measurement.dimension() {
            return Err(EstimationError::Precondition(format!(
                "measurement at t={} has {} values, the measurement model expects {}",
                measurement.timestamp,
                measurement.values.len(),
                self.measurement.dimension()
            )));
        }
        Ok(Some(measurement))
    }
    /// Current estimate and covariance; only valid once seeded
    fn current(&self) -> Option<(&StateVector, &DMatrix<f64>)> {
        Some((self.inner.last()?, self.inner.covariance.as_ref()?))
    }
    /// Correction step shared by both filters.
    ///
    /// `expected` is the predicted observation and `c` the measurement matrix. Angular innovation
    /// components are wrapped to $(-\pi, \pi]$.
    fn correct(
        &self,
        predicted_state: &DVector<f64>,
        predicted_covariance: &DMatrix<f64>,
        expected: &DVector<f64>,
        c: &DMatrix<f64>,
        observed: &DVector<f64>,
    ) -> Result<(DVector<f64>, DMatrix<f64>)> {
        let mut innovation = observed - expected;
        for &i in self.measurement.angular_components() {
            innovation[i] = wrap_to_pi(innovation[i]);
        }
        let (gain, _) = kalman_gain(predicted_covariance, c, &self.measurement_noise)?;
        let state = predicted_state + &gain * innovation;
        let covariance = joseph_update(predicted_covariance, &gain, c, &self.measurement_noise);
        if state.iter().chain(covariance.iter()).any(|v| !v.is_finite()) {
            return Err(EstimationError::NumericalInstability(
                "correction produced non-finite values".to_string(),
            ));
        }
        Ok((state, covariance))
    }
    fn commit(&mut self, state: DVector<f64>, covariance: DMatrix<f64>) -> StateVector {
        self.inner.covariance = Some(covariance);
        self.inner.push(state)
    }
}

/// Kalman filter over a model linearized once at a nominal state and input.
///
/// $$
/// \begin{aligned}
/// x^- &= A x + B u + d, \quad P^- = A P A^T + Q \\\\
/// K &= P^- C^T (C P^- C^T + R)^{-1} \\\\
/// x &= x^- + K (y - (C x^- + e)), \quad P = (I - K C) P^-
/// \end{aligned}
/// $$
pub struct KalmanFilter {
    process: Arc<dyn ProcessModel>,
    model: LinearizedModel,
    core: FilterCore,
}
impl Debug for KalmanFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KF")
            .field("model", &self.model)
            .field("measurement", &self.core.measurement)
            .field("process_noise", &self.core.process_noise)
            .field("measurement_noise", &self.core.measurement_noise)
            .field("state", &self.core.inner)
            .finish()
    }
}
impl Display for KalmanFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KalmanFilter")
            .field("tick_index", &self.core.inner.tick_index)
            .field("mean_state", &self.core.inner.last())
            .field("covariance", &self.core.inner.covariance)
            .finish()
    }
}
impl KalmanFilter {
    /// Create a Kalman filter linearized at `(nominal_state, nominal_input)`.
    ///
    /// # Arguments
    ///
    /// * `process`, `measurement` - the model pair to linearize
    /// * `nominal_state`, `nominal_input` - the operating point
    /// * `dt` - tick period in seconds
    /// * `process_noise`, `measurement_noise`, `initial_covariance` - Q, R and P₀
    /// * `initial_state` - seed; the first ground-truth sample is used when `None`
    /// * `measurement_offset` - tick `k` fuses measurement `k - 1 + measurement_offset`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        process: Arc<dyn ProcessModel>,
        measurement: Arc<dyn MeasurementModel>,
        nominal_state: &DVector<f64>,
        nominal_input: &DVector<f64>,
        dt: f64,
        process_noise: DMatrix<f64>,
        measurement_noise: DMatrix<f64>,
        initial_covariance: DMatrix<f64>,
        initial_state: Option<StateVector>,
        measurement_offset: usize,
    ) -> Result<Self> {
        let core = FilterCore::new(
            process.as_ref(),
            measurement,
            dt,
            process_noise,
            measurement_noise,
            initial_covariance,
            initial_state,
            measurement_offset,
        )?;
        let model = LinearizedModel::at(
            process.as_ref(),
            core.measurement.as_ref(),
            nominal_state,
            nominal_input,
            dt,
        )?;
        Ok(KalmanFilter {
            process,
            model,
            core,
        })
    }
    pub fn linearized_model(&self) -> &LinearizedModel {
        &self.model
    }
}
impl Estimator for KalmanFilter {
    fn name(&self) -> &str {
        EstimatorKind::KalmanFilter.as_str()
    }
    fn tick(&mut self, buffers: &Buffers) -> Result<Option<StateVector>> {
        if self.core.inner.phase == Phase::Uninitialized {
            return self.core.seed(buffers, self.process.as_ref());
        }
        let Some((state, covariance)) = self.core.current() else {
            return Ok(None);
        };
        let k = self.core.inner.tick_index;
        let Some(input) = input_for_tick(buffers, k, self.process.as_ref())? else {
            return Ok(None);
        };
        let Some(observation) = self.core.measurement_for_tick(buffers, k)? else {
            return Ok(None);
        };
        let a = &self.model.a;
        let predicted_state = self.model.predict(state, &input.values);
        let predicted_covariance =
            symmetrize(&(a * covariance * a.transpose() + &self.core.process_noise));
        let expected = self.model.expected_measurement(&predicted_state);
        let (next_state, next_covariance) = self.core.correct(
            &predicted_state,
            &predicted_covariance,
            &expected,
            &self.model.c,
            &observation.values,
        )?;
        log::trace!("kf tick {k}: x = {:?}", next_state.as_slice());
        Ok(Some(self.core.commit(next_state, next_covariance)))
    }
    fn history(&self) -> &[StateVector] {
        self.core.inner.history()
    }
    fn covariance(&self) -> Option<&DMatrix<f64>> {
        self.core.inner.covariance.as_ref()
    }
    fn phase(&self) -> Phase {
        self.core.inner.phase
    }
}

/// Extended Kalman filter over the nonlinear process and measurement models.
///
/// $$
/// \begin{aligned}
/// x^- &= g(x, u), \quad A = \partial g / \partial x |_{x, u}, \quad P^- = A P A^T + Q \\\\
/// C &= \partial h / \partial x |_{x^-}, \quad K = P^- C^T (C P^- C^T + R)^{-1} \\\\
/// x &= x^- + K (y - h(x^-)), \quad P = (I - K C) P^-
/// \end{aligned}
/// $$
pub struct ExtendedKalmanFilter {
    process: Arc<dyn ProcessModel>,
    dt: f64,
    core: FilterCore,
}
impl Debug for ExtendedKalmanFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EKF")
            .field("process", &self.process)
            .field("measurement", &self.core.measurement)
            .field("dt", &self.dt)
            .field("process_noise", &self.core.process_noise)
            .field("measurement_noise", &self.core.measurement_noise)
            .field("state", &self.core.inner)
            .finish()
    }
}
impl Display for ExtendedKalmanFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendedKalmanFilter")
            .field("tick_index", &self.core.inner.tick_index)
            .field("mean_state", &self.core.inner.last())
            .field("covariance", &self.core.inner.covariance)
            .finish()
    }
}
impl ExtendedKalmanFilter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        process: Arc<dyn ProcessModel>,
        measurement: Arc<dyn MeasurementModel>,
        dt: f64,
        process_noise: DMatrix<f64>,
        measurement_noise: DMatrix<f64>,
        initial_covariance: DMatrix<f64>,
        initial_state: Option<StateVector>,
        measurement_offset: usize,
    ) -> Result<Self> {
        let core = FilterCore::new(
            process.as_ref(),
            measurement,
            dt,
            process_noise,
            measurement_noise,
            initial_covariance,
            initial_state,
            measurement_offset,
        )?;
        Ok(ExtendedKalmanFilter { process, dt, core })
    }
}
impl Estimator for ExtendedKalmanFilter {
    fn name(&self) -> &str {
        EstimatorKind::ExtendedKalmanFilter.as_str()
    }
    fn tick(&mut self, buffers: &Buffers) -> Result<Option<StateVector>> {
        if self.core.inner.phase == Phase::Uninitialized {
            return self.core.seed(buffers, self.process.as_ref());
        }
        let Some((state, covariance)) = self.core.current() else {
            return Ok(None);
        };
        let k = self.core.inner.tick_index;
        let Some(input) = input_for_tick(buffers, k, self.process.as_ref())? else {
            return Ok(None);
        };
        let Some(observation) = self.core.measurement_for_tick(buffers, k)? else {
            return Ok(None);
        };
        // Jacobian at the previous estimate, before propagation
        let a = self.process.state_jacobian(state, &input.values, self.dt);
        let predicted_state = self.process.propagate(state, &input.values, self.dt);
        let predicted_covariance =
            symmetrize(&(&a * covariance * a.transpose() + &self.core.process_noise));
        let c = self.core.measurement.jacobian(&predicted_state)?;
        let expected = self.core.measurement.expected_measurement(&predicted_state);
        let (next_state, next_covariance) = self.core.correct(
            &predicted_state,
            &predicted_covariance,
            &expected,
            &c,
            &observation.values,
        )?;
        log::trace!("ekf tick {k}: x = {:?}", next_state.as_slice());
        Ok(Some(self.core.commit(next_state, next_covariance)))
    }
    fn history(&self) -> &[StateVector] {
        self.core.inner.history()
    }
    fn covariance(&self) -> Option<&DMatrix<f64>> {
        self.core.inner.covariance.as_ref()
    }
    fn phase(&self) -> Phase {
        self.core.inner.phase
    }
}
