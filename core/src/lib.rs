//! Planar vehicle state estimation toolbox
//!
//! This crate estimates the time-varying state of a moving vehicle from noisy control inputs and
//! intermittent landmark-relative measurements. Two vehicles are modelled: a planar quadrotor
//! (thrust and torque actuated, moving in the x-z plane) and a differential-drive robot (two
//! independently driven wheels moving in the x-y plane). The estimation engine is built from a
//! small set of interchangeable pieces:
//!
//! - a process model $g(x, u)$ and its Jacobian (see [dynamics]),
//! - a measurement model $h(x)$ and its Jacobian (see [measurements]),
//! - four estimators sharing one [estimator::Estimator] interface: an oracle observer, dead
//!   reckoning, a Kalman filter linearized once at a nominal point, and an extended Kalman filter,
//! - append-only timeseries buffers and an update scheduler that drives estimator ticks either from
//!   a recorded batch or from live producer streams.
//!
//! This crate is primarily built off of [`nalgebra`](https://crates.io/crates/nalgebra) for the
//! linear algebra, [`crossbeam`](https://crates.io/crates/crossbeam) for the online producer queues
//! and timer, and [`rand`](https://crates.io/crates/rand) /
//! [`rand_distr`](https://crates.io/crates/rand_distr) for noise injection in simulated runs.
//! Plotting, dataset files and message transports are left to the caller.
//!
//! ## Crate overview
//!
//! - [buffer]: Append-only, timestamp-ordered stores of inputs, measurements and ground truth.
//! - [config]: Serializable run configuration (vehicle constants, model and estimator selection,
//!   noise matrices).
//! - [diagnostics]: Per-tick latency sampling and batch accuracy scoring.
//! - [dynamics]: Process models for the quadrotor and the differential-drive robot.
//! - [error]: The crate error type.
//! - [estimator]: The estimator interface, the oracle observer and dead reckoning.
//! - [kalman]: The linear and extended Kalman filters.
//! - [linalg]: Innovation solves with singularity detection and covariance hygiene.
//! - [linearize]: Fixed-point linearization of the process and measurement models.
//! - [measurements]: Landmark range/bearing and direct position measurement models.
//! - [scheduler]: Batch and online tick scheduling.
//! - [sim]: Synthetic run generation with optional noise injection.
//! - [stream]: Bounded producer queues feeding the online scheduler.
//!
//! ## State definitions
//!
//! The quadrotor state vector is
//!
//! $$
//! x = [p_x, p_z, \phi, v_x, v_z, \omega]
//! $$
//!
//! with the control input $u = [T, \tau]$ (collective thrust and torque). The differential-drive
//! state vector carries a leading timestamp field
//!
//! $$
//! x = [t, \phi, p_x, p_y, \theta_l, \theta_r]
//! $$
//!
//! with the control input $u = [\dot\theta_l, \dot\theta_r]$ (left and right wheel angular speeds).
//! Both models integrate with explicit forward Euler over a fixed step $dt$.
//!
//! ## Estimation recursion
//!
//! The Kalman-style estimators use the canonical predict-correct recursion:
//!
//! $$
//! \begin{aligned}
//! x^- &= g(x, u), \quad P^- = A P A^T + Q \\\\
//! K &= P^- C^T (C P^- C^T + R)^{-1} \\\\
//! x &= x^- + K (y - h(x^-)), \quad P = (I - K C) P^-
//! \end{aligned}
//! $$
//!
//! where $A = \partial g / \partial x$ and $C = \partial h / \partial x$ are either fixed at a
//! nominal point (Kalman filter) or re-evaluated every tick (extended Kalman filter).
pub mod buffer;
pub mod config;
pub mod diagnostics;
pub mod dynamics;
pub mod error;
pub mod estimator;
pub mod kalman;
pub mod linalg;
pub mod linearize;
pub mod measurements;
pub mod scheduler;
pub mod sim;
pub mod stream;

use nalgebra::{DVector, Vector3};
use serde::{Deserialize, Serialize};

use std::fmt::{self, Display};

pub use error::{EstimationError, Result};

/// Ordered tuple of scalars describing the vehicle's pose and kinematic rates.
///
/// The dimension is fixed per vehicle type (see [dynamics::ProcessModel::state_dimension]).
/// Estimates are never mutated once appended to a history; every tick produces a fresh vector.
pub type StateVector = DVector<f64>;

/// Anything stored in a [buffer::TimeseriesBuffer] carries a timestamp in seconds.
pub trait Timestamped {
    fn timestamp(&self) -> f64;
}

/// Control command sample
#[derive(Clone, Debug, PartialEq)]
pub struct InputVector {
    /// Time of the command in seconds
    pub timestamp: f64,
    /// Vehicle-specific actuation values (thrust and torque, or wheel angular speeds)
    pub values: DVector<f64>,
}
impl InputVector {
    pub fn new(timestamp: f64, values: Vec<f64>) -> Self {
        InputVector {
            timestamp,
            values: DVector::from_vec(values),
        }
    }
}
impl Timestamped for InputVector {
    fn timestamp(&self) -> f64 {
        self.timestamp
    }
}
impl Display for InputVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InputVector {{ t: {:.4}, u: {:.4?} }}", self.timestamp, self.values.as_slice())
    }
}

/// Timestamped observation whose meaning depends on the active measurement model
#[derive(Clone, Debug, PartialEq)]
pub struct Measurement {
    /// Time of the observation in seconds
    pub timestamp: f64,
    /// Observation values, e.g. `[range, bearing]` or `[p1, p2]`
    pub values: DVector<f64>,
}
impl Measurement {
    pub fn new(timestamp: f64, values: Vec<f64>) -> Self {
        Measurement {
            timestamp,
            values: DVector::from_vec(values),
        }
    }
}
impl Timestamped for Measurement {
    fn timestamp(&self) -> f64 {
        self.timestamp
    }
}
impl Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Measurement {{ t: {:.4}, y: {:.4?} }}", self.timestamp, self.values.as_slice())
    }
}

/// Ground-truth state sample, used only for evaluation and by the oracle observer
#[derive(Clone, Debug, PartialEq)]
pub struct TruthSample {
    pub timestamp: f64,
    pub state: StateVector,
}
impl TruthSample {
    pub fn new(timestamp: f64, state: Vec<f64>) -> Self {
        TruthSample {
            timestamp,
            state: DVector::from_vec(state),
        }
    }
}
impl Timestamped for TruthSample {
    fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

/// A fixed, known landmark coordinate, constant for the lifetime of a run.
///
/// Planar landmarks are stored with a zero third component. In configuration files a landmark is
/// written as a two or three element array.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}
impl Landmark {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Landmark { x, y, z }
    }
    /// A landmark in the plane of motion (zero out-of-plane component)
    pub fn planar(x: f64, y: f64) -> Self {
        Landmark { x, y, z: 0.0 }
    }
    pub fn coordinates(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }
}
impl TryFrom<Vec<f64>> for Landmark {
    type Error = String;
    fn try_from(vec: Vec<f64>) -> std::result::Result<Self, Self::Error> {
        match vec.as_slice() {
            [x, y] => Ok(Landmark::planar(*x, *y)),
            [x, y, z] => Ok(Landmark::new(*x, *y, *z)),
            _ => Err(format!(
                "a landmark needs 2 or 3 coordinates, got {}",
                vec.len()
            )),
        }
    }
}
impl From<Landmark> for Vec<f64> {
    fn from(landmark: Landmark) -> Self {
        vec![landmark.x, landmark.y, landmark.z]
    }
}
impl Display for Landmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Landmark({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Wrap an angle to the range $-\pi$ to $\pi$ radians
///
/// # Example
/// ```rust
/// use roboest::wrap_to_pi;
/// use std::f64::consts::PI;
/// let wrapped_angle = wrap_to_pi(3.0 * PI / 2.0);
/// assert!((wrapped_angle + PI / 2.0).abs() < 1e-12);
/// ```
pub fn wrap_to_pi<T>(angle: T) -> T
where
    T: PartialOrd + Copy + std::ops::SubAssign + std::ops::AddAssign + From<f64>,
{
    let mut wrapped: T = angle;
    while wrapped > T::from(std::f64::consts::PI) {
        wrapped -= T::from(2.0 * std::f64::consts::PI);
    }
    while wrapped < T::from(-std::f64::consts::PI) {
        wrapped += T::from(2.0 * std::f64::consts::PI);
    }
    wrapped
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_wrap_to_pi() {
        assert_eq!(
            super::wrap_to_pi(3.0 * std::f64::consts::PI),
            std::f64::consts::PI
        );
        assert_eq!(
            super::wrap_to_pi(-3.0 * std::f64::consts::PI),
            -std::f64::consts::PI
        );
        assert_eq!(super::wrap_to_pi(0.0), 0.0);
        assert_approx_eq!(
            super::wrap_to_pi(1.5 * std::f64::consts::PI),
            -0.5 * std::f64::consts::PI
        );
    }
    #[test]
    fn landmark_from_vec() {
        let planar = Landmark::try_from(vec![0.5, 0.5]).unwrap();
        assert_eq!(planar, Landmark::new(0.5, 0.5, 0.0));
        let spatial = Landmark::try_from(vec![0.0, 5.0, 5.0]).unwrap();
        assert_eq!(spatial.coordinates(), Vector3::new(0.0, 5.0, 5.0));
        assert!(Landmark::try_from(vec![1.0]).is_err());
    }
    #[test]
    fn landmark_serde_as_array() {
        let landmark: Landmark = serde_json::from_str("[0.0, 5.0, 5.0]").unwrap();
        assert_eq!(landmark, Landmark::new(0.0, 5.0, 5.0));
        let text = serde_json::to_string(&Landmark::planar(1.0, 2.0)).unwrap();
        assert_eq!(text, "[1.0,2.0,0.0]");
    }
    #[test]
    fn input_vector_display() {
        let u = InputVector::new(0.1, vec![9.0, 0.0]);
        let s = format!("{}", u);
        assert!(s.contains("InputVector"));
        assert!(s.contains("0.1000"));
    }
    #[test]
    fn timestamped_samples() {
        assert_eq!(Measurement::new(2.5, vec![1.0, 0.0]).timestamp(), 2.5);
        assert_eq!(TruthSample::new(1.0, vec![0.0; 6]).state.len(), 6);
    }
}
