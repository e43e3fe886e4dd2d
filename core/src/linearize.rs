//! Fixed-point linearization of the process and measurement models
//!
//! The linear Kalman filter does not re-evaluate Jacobians as it runs. Instead both models are
//! linearized once, at a configured nominal state $x_0$ and nominal input $u_0$, into the affine
//! pair
//!
//! ```text
//! x' ≈ A x + B u + d,    d = g(x₀, u₀) − A x₀ − B u₀
//! y  ≈ C x + e,          e = h(x₀) − C x₀
//! ```
//!
//! where `A = ∂g/∂x`, `B = ∂g/∂u` and `C = ∂h/∂x` are the analytic Jacobians evaluated at the
//! nominal point. For models that are already linear the drift `d` and offset `e` vanish and the
//! approximation is exact.
//!
//! # Usage Example
//!
//! ```rust
//! use roboest::dynamics::DifferentialDrive;
//! use roboest::measurements::PositionReadout;
//! use roboest::linearize::LinearizedModel;
//! use nalgebra::DVector;
//!
//! let process = DifferentialDrive::default();
//! let measurement = PositionReadout::for_differential_drive();
//! let mut nominal = DVector::zeros(6);
//! nominal[1] = std::f64::consts::FRAC_PI_4;
//! let input = DVector::zeros(2);
//! let model = LinearizedModel::at(&process, &measurement, &nominal, &input, 0.1).unwrap();
//! assert_eq!(model.c.nrows(), 2);
//! assert!(model.offset.iter().all(|e| e.abs() < 1e-12));
//! ```

use crate::dynamics::ProcessModel;
use crate::error::{EstimationError, Result};
use crate::measurements::MeasurementModel;

use nalgebra::{DMatrix, DVector};

/// Affine approximation of a process/measurement model pair around one operating point.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearizedModel {
    /// State transition matrix ∂g/∂x at the nominal point
    pub a: DMatrix<f64>,
    /// Input matrix ∂g/∂u at the nominal point
    pub b: DMatrix<f64>,
    /// Constant term of the transition
    pub drift: DVector<f64>,
    /// Measurement matrix ∂h/∂x at the nominal state
    pub c: DMatrix<f64>,
    /// Constant term of the measurement
    pub offset: DVector<f64>,
}
impl LinearizedModel {
    /// Linearize both models at `(nominal_state, nominal_input)` for a step of `dt` seconds.
    ///
    /// Dimension mismatches and a nominal state at which the measurement Jacobian does not exist
    /// are configuration errors.
    pub fn at(
        process: &dyn ProcessModel,
        measurement: &dyn MeasurementModel,
        nominal_state: &DVector<f64>,
        nominal_input: &DVector<f64>,
        dt: f64,
    ) -> Result<Self> {
        let n = process.state_dimension();
        if nominal_state.len() != n {
            return Err(EstimationError::Configuration(format!(
                "nominal state has {} elements, the process model expects {}",
                nominal_state.len(),
                n
            )));
        }
        if nominal_input.len() != process.input_dimension() {
            return Err(EstimationError::Configuration(format!(
                "nominal input has {} elements, the process model expects {}",
                nominal_input.len(),
                process.input_dimension()
            )));
        }
        if measurement.state_dimension() != n {
            return Err(EstimationError::Configuration(format!(
                "measurement model reads {} states, the process model has {}",
                measurement.state_dimension(),
                n
            )));
        }
        let a = process.state_jacobian(nominal_state, nominal_input, dt);
        let b = process.input_jacobian(nominal_state, nominal_input, dt);
        let drift = process.propagate(nominal_state, nominal_input, dt)
            - &a * nominal_state
            - &b * nominal_input;
        let c = measurement.jacobian(nominal_state).map_err(|e| {
            EstimationError::Configuration(format!(
                "cannot linearize the measurement model at the nominal state: {e}"
            ))
        })?;
        let offset = measurement.expected_measurement(nominal_state) - &c * nominal_state;
        Ok(LinearizedModel {
            a,
            b,
            drift,
            c,
            offset,
        })
    }
    /// Affine prediction $A x + B u + d$
    pub fn predict(&self, state: &DVector<f64>, input: &DVector<f64>) -> DVector<f64> {
        &self.a * state + &self.b * input + &self.drift
    }
    /// Affine expected measurement $C x + e$
    pub fn expected_measurement(&self, state: &DVector<f64>) -> DVector<f64> {
        &self.c * state + &self.offset
    }
}
