//! Measurement models for landmark-relative sensing.
//!
//! A measurement model maps a (predicted) state into observation space, $y = h(x)$, and provides
//! the Jacobian $C = \partial h / \partial x$ used by the Kalman filters. Two sensing modes are
//! modelled:
//!
//! - [LandmarkRangeBearing]: Euclidean distance from the vehicle to a fixed landmark plus the raw
//!   bearing state. Nonlinear; the Jacobian is singular when the vehicle sits on the landmark.
//! - [PositionReadout]: direct read-out of the two planar position states under a fixed-bearing
//!   simplification. Linear; the Jacobian is a constant selector matrix.

use crate::error::{EstimationError, Result};
use crate::Landmark;
use crate::dynamics::{DifferentialDrive, QuadrotorDynamics};

use std::fmt::Debug;

use nalgebra::{DMatrix, DVector, Vector3};

/// Ranges below this are treated as coinciding with the landmark
pub const DEFAULT_SINGULARITY_TOLERANCE: f64 = 1e-9;

/// Generic measurement model trait
pub trait MeasurementModel: Debug + Send + Sync {
    /// Dimension of the observation vector
    fn dimension(&self) -> usize;
    /// Dimension of the state vector this model reads
    fn state_dimension(&self) -> usize;
    /// Expected observation $h(x)$ for the given state
    fn expected_measurement(&self, state: &DVector<f64>) -> DVector<f64>;
    /// Jacobian $\partial h / \partial x$ evaluated at the given state
    fn jacobian(&self, state: &DVector<f64>) -> Result<DMatrix<f64>>;
    /// Indices of observation components that are angles
    fn angular_components(&self) -> &[usize] {
        &[]
    }
}

/// Range to a fixed landmark plus the vehicle bearing: $h(x) = [\lVert p - l \rVert, \phi]$.
///
/// The vehicle's two planar position states are lifted into 3-D through `position_axes` (the
/// out-of-plane coordinate is zero), so a quadrotor flying in the x-z plane and a ground robot
/// driving in the x-y plane share one implementation.
#[derive(Clone, Debug, PartialEq)]
pub struct LandmarkRangeBearing {
    pub landmark: Landmark,
    state_dimension: usize,
    /// State indices of the two planar position components
    position_indices: [usize; 2],
    /// 3-D axes (0 = x, 1 = y, 2 = z) that the position components map onto
    position_axes: [usize; 2],
    /// State index of the bearing
    bearing_index: usize,
}
impl LandmarkRangeBearing {
    pub fn new(
        landmark: Landmark,
        state_dimension: usize,
        position_indices: [usize; 2],
        position_axes: [usize; 2],
        bearing_index: usize,
    ) -> Self {
        LandmarkRangeBearing {
            landmark,
            state_dimension,
            position_indices,
            position_axes,
            bearing_index,
        }
    }
    /// Quadrotor in the x-z plane; the landmark's y coordinate is its out-of-plane offset.
    pub fn for_quadrotor(landmark: Landmark) -> Self {
        Self::new(
            landmark,
            QuadrotorDynamics::STATE_DIMENSION,
            [QuadrotorDynamics::X, QuadrotorDynamics::Z],
            [0, 2],
            QuadrotorDynamics::PHI,
        )
    }
    /// Ground robot in the x-y plane.
    pub fn for_differential_drive(landmark: Landmark) -> Self {
        Self::new(
            landmark,
            DifferentialDrive::STATE_DIMENSION,
            [DifferentialDrive::X, DifferentialDrive::Y],
            [0, 1],
            DifferentialDrive::PHI,
        )
    }
    fn lifted_position(&self, state: &DVector<f64>) -> Vector3<f64> {
        let mut position = Vector3::zeros();
        for (index, axis) in self.position_indices.iter().zip(self.position_axes.iter()) {
            position[*axis] = state[*index];
        }
        position
    }
    /// Distance from the vehicle to the landmark
    pub fn range(&self, state: &DVector<f64>) -> f64 {
        (self.lifted_position(state) - self.landmark.coordinates()).norm()
    }
}
impl MeasurementModel for LandmarkRangeBearing {
    fn dimension(&self) -> usize {
        2
    }
    fn state_dimension(&self) -> usize {
        self.state_dimension
    }
    fn expected_measurement(&self, state: &DVector<f64>) -> DVector<f64> {
        DVector::from_vec(vec![self.range(state), state[self.bearing_index]])
    }
    fn jacobian(&self, state: &DVector<f64>) -> Result<DMatrix<f64>> {
        let offset = self.lifted_position(state) - self.landmark.coordinates();
        let distance = offset.norm();
        if !distance.is_finite() || distance < DEFAULT_SINGULARITY_TOLERANCE {
            return Err(EstimationError::NumericalInstability(format!(
                "range Jacobian is singular: predicted position coincides with {} (range {:e})",
                self.landmark, distance
            )));
        }
        let mut c = DMatrix::<f64>::zeros(2, self.state_dimension);
        for (index, axis) in self.position_indices.iter().zip(self.position_axes.iter()) {
            c[(0, *index)] = offset[*axis] / distance;
        }
        c[(1, self.bearing_index)] = 1.0;
        Ok(c)
    }
    fn angular_components(&self) -> &[usize] {
        &[1]
    }
}

/// Direct position read-out, $h(x) = [p_1, p_2]$
#[derive(Clone, Debug, PartialEq)]
pub struct PositionReadout {
    state_dimension: usize,
    position_indices: [usize; 2],
}
impl PositionReadout {
    pub fn new(state_dimension: usize, position_indices: [usize; 2]) -> Self {
        PositionReadout {
            state_dimension,
            position_indices,
        }
    }
    pub fn for_quadrotor() -> Self {
        Self::new(
            QuadrotorDynamics::STATE_DIMENSION,
            [QuadrotorDynamics::X, QuadrotorDynamics::Z],
        )
    }
    pub fn for_differential_drive() -> Self {
        Self::new(
            DifferentialDrive::STATE_DIMENSION,
            [DifferentialDrive::X, DifferentialDrive::Y],
        )
    }
}
impl MeasurementModel for PositionReadout {
    fn dimension(&self) -> usize {
        2
    }
    fn state_dimension(&self) -> usize {
        self.state_dimension
    }
    fn expected_measurement(&self, state: &DVector<f64>) -> DVector<f64> {
        DVector::from_vec(vec![
            state[self.position_indices[0]],
            state[self.position_indices[1]],
        ])
    }
    fn jacobian(&self, _state: &DVector<f64>) -> Result<DMatrix<f64>> {
        let mut c = DMatrix::<f64>::zeros(2, self.state_dimension);
        c[(0, self.position_indices[0])] = 1.0;
        c[(1, self.position_indices[1])] = 1.0;
        Ok(c)
    }
}
