//! The estimator interface and the two model-free/open-loop variants
//!
//! Every estimator is driven by the scheduler through [Estimator::tick]. A tick reads the shared
//! [Buffers] (never mutating them), and either appends exactly one new estimate to the estimator's
//! history or reports that the data it needs has not arrived yet (`Ok(None)`). A tick that fails
//! with an error leaves the estimator exactly as it was.
//!
//! Index alignment is the same for every variant: estimate `0` is the seed, estimate `k ≥ 1` is
//! produced from input `k - 1`, so estimate histories line up with ground-truth histories index for
//! index.
//!
//! The Kalman filter variants live in [crate::kalman]; [build_estimator] selects any of the four
//! from a [RunConfig].

use crate::buffer::Buffers;
use crate::config::RunConfig;
use crate::dynamics::ProcessModel;
use crate::error::{EstimationError, Result};
use crate::kalman::{ExtendedKalmanFilter, KalmanFilter};
use crate::{InputVector, StateVector};

use std::fmt::{self, Debug, Display};
use std::str::FromStr;
use std::sync::Arc;

use nalgebra::DMatrix;

/// Lifecycle of an estimator
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// No state has been seeded yet
    Uninitialized,
    /// Seeded; every further productive tick appends one estimate
    Steady,
}

/// State owned by exactly one estimator for the lifetime of a run.
#[derive(Clone, Debug)]
pub struct EstimatorState {
    pub phase: Phase,
    /// Number of productive ticks so far
    pub tick_index: usize,
    /// Current covariance; filters only
    pub covariance: Option<DMatrix<f64>>,
    history: Vec<StateVector>,
}
impl Default for EstimatorState {
    fn default() -> Self {
        EstimatorState {
            phase: Phase::Uninitialized,
            tick_index: 0,
            covariance: None,
            history: Vec::new(),
        }
    }
}
impl EstimatorState {
    pub fn new() -> Self {
        Self::default()
    }
    /// Last fused state, if seeded
    pub fn last(&self) -> Option<&StateVector> {
        self.history.last()
    }
    pub fn history(&self) -> &[StateVector] {
        &self.history
    }
    /// Record a new estimate and move to [Phase::Steady]
    pub fn push(&mut self, state: StateVector) -> StateVector {
        self.history.push(state.clone());
        self.tick_index += 1;
        self.phase = Phase::Steady;
        state
    }
}

/// Common interface of all estimator variants.
pub trait Estimator: Debug + Send {
    /// Short, stable name of the variant
    fn name(&self) -> &str;
    /// Advance by one scheduler period.
    ///
    /// Returns the newly appended estimate, `Ok(None)` when the buffered data is insufficient, or
    /// an error when the update is numerically impossible (the estimator is left unchanged).
    fn tick(&mut self, buffers: &Buffers) -> Result<Option<StateVector>>;
    /// All estimates produced so far, oldest first
    fn history(&self) -> &[StateVector];
    /// Current state, `None` before the first productive tick
    fn state(&self) -> Option<&StateVector> {
        self.history().last()
    }
    /// Current covariance for the filters, `None` otherwise
    fn covariance(&self) -> Option<&DMatrix<f64>> {
        None
    }
    fn phase(&self) -> Phase {
        if self.history().is_empty() {
            Phase::Uninitialized
        } else {
            Phase::Steady
        }
    }
}

/// The four estimator variants
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EstimatorKind {
    OracleObserver,
    DeadReckoning,
    KalmanFilter,
    ExtendedKalmanFilter,
}
impl EstimatorKind {
    pub const ALL: [EstimatorKind; 4] = [
        EstimatorKind::OracleObserver,
        EstimatorKind::DeadReckoning,
        EstimatorKind::KalmanFilter,
        EstimatorKind::ExtendedKalmanFilter,
    ];
    pub fn as_str(&self) -> &'static str {
        match self {
            EstimatorKind::OracleObserver => "oracle_observer",
            EstimatorKind::DeadReckoning => "dead_reckoning",
            EstimatorKind::KalmanFilter => "kalman_filter",
            EstimatorKind::ExtendedKalmanFilter => "extended_kalman_filter",
        }
    }
    /// Whether the variant fuses measurements and carries a covariance
    pub fn is_filter(&self) -> bool {
        matches!(
            self,
            EstimatorKind::KalmanFilter | EstimatorKind::ExtendedKalmanFilter
        )
    }
}
impl Display for EstimatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
impl FromStr for EstimatorKind {
    type Err = EstimationError;
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "oracle_observer" | "oracle" => Ok(EstimatorKind::OracleObserver),
            "dead_reckoning" | "dr" => Ok(EstimatorKind::DeadReckoning),
            "kalman_filter" | "kf" => Ok(EstimatorKind::KalmanFilter),
            "extended_kalman_filter" | "ekf" => Ok(EstimatorKind::ExtendedKalmanFilter),
            other => Err(EstimationError::Configuration(format!(
                "unknown estimator '{other}', expected one of oracle_observer, dead_reckoning, \
                 kalman_filter, extended_kalman_filter"
            ))),
        }
    }
}

/// Seed for a model-based estimator: the configured initial state, else the first ground-truth
/// sample, else nothing yet.
///
/// A truth seed whose dimension does not match the process model is a
/// [EstimationError::Precondition] error and seeds nothing.
pub(crate) fn seed_state(
    initial_state: Option<&StateVector>,
    buffers: &Buffers,
    process: &dyn ProcessModel,
) -> Result<Option<StateVector>> {
    if let Some(state) = initial_state {
        return Ok(Some(state.clone()));
    }
    let Some(sample) = buffers.truth.first() else {
        return Ok(None);
    };
    if sample.state.len() != process.state_dimension() {
        return Err(EstimationError::Precondition(format!(
            "ground-truth seed has {} elements, the process model expects {}",
            sample.state.len(),
            process.state_dimension()
        )));
    }
    Ok(Some(sample.state.clone()))
}

/// Input consumed by tick `k ≥ 1`, checked against the process model
pub(crate) fn input_for_tick<'a>(
    buffers: &'a Buffers,
    tick: usize,
    process: &dyn ProcessModel,
) -> Result<Option<&'a InputVector>> {
    let Some(input) = buffers.inputs.get(tick - 1) else {
        return Ok(None);
    };
    if input.values.len() != process.input_dimension() {
        return Err(EstimationError::Precondition(format!(
            "input {} has {} values, the process model expects {}",
            tick - 1,
            input.values.len(),
            process.input_dimension()
        )));
    }
    Ok(Some(input))
}

/// Returns the ground-truth state for the current tick. Useful as a performance ceiling and for
/// checking the rest of the pipeline.
#[derive(Debug, Default)]
pub struct OracleObserver {
    inner: EstimatorState,
}
impl OracleObserver {
    pub fn new() -> Self {
        Self::default()
    }
}
impl Estimator for OracleObserver {
    fn name(&self) -> &str {
        EstimatorKind::OracleObserver.as_str()
    }
    fn tick(&mut self, buffers: &Buffers) -> Result<Option<StateVector>> {
        let k = self.inner.tick_index;
        match buffers.truth.get(k) {
            Some(sample) => Ok(Some(self.inner.push(sample.state.clone()))),
            None => Ok(None),
        }
    }
    fn history(&self) -> &[StateVector] {
        self.inner.history()
    }
}

/// Open-loop integration of the process model, $x_k = g(x_{k-1}, u_{k-1})$.
///
/// Measurements are never consulted, so the error grows without bound under model mismatch or
/// input noise.
pub struct DeadReckoning {
    process: Arc<dyn ProcessModel>,
    dt: f64,
    initial_state: Option<StateVector>,
    inner: EstimatorState,
}
impl Debug for DeadReckoning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadReckoning")
            .field("process", &self.process)
            .field("dt", &self.dt)
            .field("tick_index", &self.inner.tick_index)
            .finish()
    }
}
impl DeadReckoning {
    pub fn new(
        process: Arc<dyn ProcessModel>,
        dt: f64,
        initial_state: Option<StateVector>,
    ) -> Result<Self> {
        check_dt(dt)?;
        check_initial_state(initial_state.as_ref(), process.as_ref())?;
        Ok(DeadReckoning {
            process,
            dt,
            initial_state,
            inner: EstimatorState::new(),
        })
    }
}
impl Estimator for DeadReckoning {
    fn name(&self) -> &str {
        EstimatorKind::DeadReckoning.as_str()
    }
    fn tick(&mut self, buffers: &Buffers) -> Result<Option<StateVector>> {
        if self.inner.phase == Phase::Uninitialized {
            let seed = seed_state(self.initial_state.as_ref(), buffers, self.process.as_ref())?;
            return Ok(seed.map(|seed| self.inner.push(seed)));
        }
        let Some(previous) = self.inner.last() else {
            return Ok(None);
        };
        let Some(input) = input_for_tick(buffers, self.inner.tick_index, self.process.as_ref())?
        else {
            return Ok(None);
        };
        let next = self.process.propagate(previous, &input.values, self.dt);
        Ok(Some(self.inner.push(next)))
    }
    fn history(&self) -> &[StateVector] {
        self.inner.history()
    }
}

pub(crate) fn check_dt(dt: f64) -> Result<()> {
    if !dt.is_finite() || dt <= 0.0 {
        return Err(EstimationError::Configuration(format!(
            "dt must be a positive number of seconds, got {dt}"
        )));
    }
    Ok(())
}

pub(crate) fn check_initial_state(
    initial_state: Option<&StateVector>,
    process: &dyn ProcessModel,
) -> Result<()> {
    if let Some(state) = initial_state
        && state.len() != process.state_dimension()
    {
        return Err(EstimationError::Configuration(format!(
            "initial state has {} elements, the process model expects {}",
            state.len(),
            process.state_dimension()
        )));
    }
    Ok(())
}

/// Build the estimator selected by `config` for a tick period of `dt` seconds.
///
/// Fails fast with [EstimationError::Configuration] on an unknown estimator name or on values that
/// do not fit the selected models.
pub fn build_estimator(config: &RunConfig, dt: f64) -> Result<Box<dyn Estimator>> {
    config.validate()?;
    let kind = config.estimator_kind()?;
    let process = config.process_model();
    let initial_state = config.initial_state()?;
    let estimator: Box<dyn Estimator> = match kind {
        EstimatorKind::OracleObserver => Box::new(OracleObserver::new()),
        EstimatorKind::DeadReckoning => {
            Box::new(DeadReckoning::new(process, dt, initial_state)?)
        }
        EstimatorKind::KalmanFilter | EstimatorKind::ExtendedKalmanFilter => {
            let measurement = config.measurement_model();
            let n = config.vehicle.state_dimension();
            let q = config.filter.process_noise_matrix(n)?;
            let r = config
                .filter
                .measurement_noise_matrix(config.measurement.dimension())?;
            let p0 = config.filter.initial_covariance_matrix(n)?;
            let offset = config.filter.measurement_offset;
            if kind == EstimatorKind::KalmanFilter {
                Box::new(KalmanFilter::new(
                    process,
                    measurement,
                    &config.nominal_state()?,
                    &config.nominal_input()?,
                    dt,
                    q,
                    r,
                    p0,
                    initial_state,
                    offset,
                )?)
            } else {
                Box::new(ExtendedKalmanFilter::new(
                    process,
                    measurement,
                    dt,
                    q,
                    r,
                    p0,
                    initial_state,
                    offset,
                )?)
            }
        }
    };
    log::debug!(
        "built {} for a {} with dt = {dt}",
        estimator.name(),
        config.vehicle.name()
    );
    Ok(estimator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MeasurementConfig, VehicleConfig};
    use crate::dynamics::{DifferentialDrive, QuadrotorDynamics};
    use crate::{InputVector, TruthSample};
    use assert_approx_eq::assert_approx_eq;
    use nalgebra::DVector;

    fn hover_buffers(ticks: usize) -> Buffers {
        let model = QuadrotorDynamics::default();
        let mut buffers = Buffers::new();
        for i in 0..ticks {
            let t = i as f64 * 0.1;
            buffers
                .inputs
                .append(InputVector::new(t, vec![model.hover_thrust(), 0.0]))
                .unwrap();
            buffers
                .truth
                .append(TruthSample::new(t, vec![0.0; 6]))
                .unwrap();
        }
        buffers
    }

    #[test]
    fn estimator_kind_names() {
        for kind in EstimatorKind::ALL {
            assert_eq!(kind.as_str().parse::<EstimatorKind>().unwrap(), kind);
        }
        assert_eq!("EKF".parse::<EstimatorKind>().unwrap(), EstimatorKind::ExtendedKalmanFilter);
        assert_eq!(
            "dead-reckoning".parse::<EstimatorKind>().unwrap(),
            EstimatorKind::DeadReckoning
        );
        assert!(matches!(
            "ukf".parse::<EstimatorKind>(),
            Err(EstimationError::Configuration(_))
        ));
        assert!(EstimatorKind::KalmanFilter.is_filter());
        assert!(!EstimatorKind::OracleObserver.is_filter());
    }
    #[test]
    fn oracle_returns_truth() {
        let mut buffers = Buffers::new();
        let mut oracle = OracleObserver::new();
        assert_eq!(oracle.phase(), Phase::Uninitialized);
        assert!(oracle.tick(&buffers).unwrap().is_none());
        buffers
            .truth
            .append(TruthSample::new(0.0, vec![1.0, 2.0]))
            .unwrap();
        buffers
            .truth
            .append(TruthSample::new(0.1, vec![3.0, 4.0]))
            .unwrap();
        assert_eq!(oracle.tick(&buffers).unwrap().unwrap().as_slice(), &[1.0, 2.0]);
        assert_eq!(oracle.tick(&buffers).unwrap().unwrap().as_slice(), &[3.0, 4.0]);
        assert!(oracle.tick(&buffers).unwrap().is_none());
        assert_eq!(oracle.history().len(), 2);
        assert_eq!(oracle.phase(), Phase::Steady);
        assert!(oracle.covariance().is_none());
    }
    #[test]
    fn dead_reckoning_hover_keeps_vertical_velocity() {
        let buffers = hover_buffers(3);
        let mut dr = DeadReckoning::new(
            Arc::new(QuadrotorDynamics::default()),
            0.1,
            Some(DVector::zeros(6)),
        )
        .unwrap();
        for _ in 0..3 {
            dr.tick(&buffers).unwrap().unwrap();
        }
        let state = dr.state().unwrap();
        assert_approx_eq!(state[QuadrotorDynamics::VZ], 0.0, 1e-9);
        assert_approx_eq!(state[QuadrotorDynamics::Z], 0.0, 1e-9);
        assert_eq!(dr.history().len(), 3);
    }
    #[test]
    fn dead_reckoning_waits_for_input() {
        let mut buffers = Buffers::new();
        let mut dr = DeadReckoning::new(Arc::new(DifferentialDrive::default()), 0.1, None).unwrap();
        // no truth and no initial state: cannot seed
        assert!(dr.tick(&buffers).unwrap().is_none());
        assert_eq!(dr.phase(), Phase::Uninitialized);
        buffers
            .truth
            .append(TruthSample::new(0.0, vec![0.0; 6]))
            .unwrap();
        assert!(dr.tick(&buffers).unwrap().is_some());
        // seeded but no input yet
        assert!(dr.tick(&buffers).unwrap().is_none());
        assert_eq!(dr.history().len(), 1);
        buffers
            .inputs
            .append(InputVector::new(0.0, vec![1.0, 1.0]))
            .unwrap();
        let next = dr.tick(&buffers).unwrap().unwrap();
        assert_approx_eq!(next[DifferentialDrive::TIME], 0.1, 1e-12);
    }
    #[test]
    fn dead_reckoning_rejects_wrong_input_dimension() {
        let mut buffers = Buffers::new();
        buffers
            .inputs
            .append(InputVector::new(0.0, vec![1.0]))
            .unwrap();
        let mut dr = DeadReckoning::new(
            Arc::new(DifferentialDrive::default()),
            0.1,
            Some(DVector::zeros(6)),
        )
        .unwrap();
        dr.tick(&buffers).unwrap();
        assert!(matches!(
            dr.tick(&buffers),
            Err(EstimationError::Precondition(_))
        ));
        assert_eq!(dr.history().len(), 1);
    }
    #[test]
    fn dead_reckoning_rejects_truth_seed_of_wrong_dimension() {
        let mut buffers = Buffers::new();
        buffers
            .truth
            .append(TruthSample::new(0.0, vec![0.0; 3]))
            .unwrap();
        buffers
            .inputs
            .append(InputVector::new(0.0, vec![9.0, 0.0]))
            .unwrap();
        let mut dr =
            DeadReckoning::new(Arc::new(QuadrotorDynamics::default()), 0.1, None).unwrap();
        for _ in 0..2 {
            assert!(matches!(
                dr.tick(&buffers),
                Err(EstimationError::Precondition(_))
            ));
        }
        assert!(dr.history().is_empty());
        assert_eq!(dr.phase(), Phase::Uninitialized);
    }
    #[test]
    fn dead_reckoning_setup_errors() {
        let process: Arc<dyn ProcessModel> = Arc::new(QuadrotorDynamics::default());
        assert!(DeadReckoning::new(process.clone(), 0.0, None).is_err());
        assert!(DeadReckoning::new(process, 0.1, Some(DVector::zeros(3))).is_err());
    }
    #[test]
    fn build_all_variants() {
        for kind in EstimatorKind::ALL {
            let config = RunConfig::new(
                VehicleConfig::Quadrotor(QuadrotorDynamics::default()),
                MeasurementConfig::default(),
                kind,
            );
            let estimator = build_estimator(&config, 0.1).unwrap();
            assert_eq!(estimator.name(), kind.as_str());
            assert_eq!(estimator.phase(), Phase::Uninitialized);
        }
    }
    #[test]
    fn build_fails_fast() {
        let mut config = RunConfig::default();
        config.estimator = "complementary_filter".to_string();
        assert!(matches!(
            build_estimator(&config, 0.1),
            Err(EstimationError::Configuration(_))
        ));
        let mut config = RunConfig::default();
        config.filter.initial_covariance = Some(vec![1.0; 5]);
        assert!(matches!(
            build_estimator(&config, 0.1),
            Err(EstimationError::Configuration(_))
        ));
        assert!(build_estimator(&RunConfig::default(), -1.0).is_err());
    }
}
