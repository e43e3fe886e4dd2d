//! Process models (state transition functions) and their analytic Jacobians
//!
//! A process model predicts the next state from the current state and a control input,
//! $x_{k+1} = g(x_k, u_k)$, using explicit forward Euler integration over the fixed step $dt$:
//!
//! $$
//! g(x, u) = x + f(x, u) \, dt
//! $$
//!
//! Alongside $g$ every model provides the Jacobians $\partial g / \partial x$ and
//! $\partial g / \partial u$. They are derived analytically (not by finite differences) and are
//! evaluated at the *previous* estimate by the filters.
//!
//! All vehicle constants (mass, inertia, gravity, track width, wheel radius) are fields of the
//! model and come from the run configuration.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use std::fmt::Debug;

/// State transition model shared by dead reckoning and the Kalman filters.
pub trait ProcessModel: Debug + Send + Sync {
    /// Dimension of the state vector this model propagates
    fn state_dimension(&self) -> usize;
    /// Dimension of the control input vector
    fn input_dimension(&self) -> usize;
    /// Nonlinear state transition $g(x, u)$ over one step
    fn propagate(&self, state: &DVector<f64>, input: &DVector<f64>, dt: f64) -> DVector<f64>;
    /// Jacobian of $g$ with respect to the state, evaluated at `(state, input)`
    fn state_jacobian(&self, state: &DVector<f64>, input: &DVector<f64>, dt: f64)
    -> DMatrix<f64>;
    /// Jacobian of $g$ with respect to the control input, evaluated at `(state, input)`
    fn input_jacobian(&self, state: &DVector<f64>, input: &DVector<f64>, dt: f64)
    -> DMatrix<f64>;
    /// Indices of the bearing-like states that live on the circle
    fn angular_states(&self) -> &[usize] {
        &[]
    }
}

/// Planar quadrotor translational and rotational dynamics.
///
/// State `[x, z, phi, vx, vz, omega]`, input `[thrust, torque]`. Thrust acts along the body axis,
/// tilted by the bearing `phi`; torque drives the angular rate; gravity is a constant bias on the
/// vertical acceleration:
///
/// $$
/// \dot v_x = -\frac{\sin\phi}{m} T, \quad
/// \dot v_z = \frac{\cos\phi}{m} T - g, \quad
/// \dot\omega = \frac{\tau}{J}
/// $$
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadrotorDynamics {
    /// Vehicle mass (kg)
    pub mass: f64,
    /// Moment of inertia about the out-of-plane axis (kg m^2)
    pub inertia: f64,
    /// Gravitational acceleration (m/s^2)
    pub gravity: f64,
}
impl Default for QuadrotorDynamics {
    fn default() -> Self {
        QuadrotorDynamics {
            mass: 0.92,
            inertia: 0.0023,
            gravity: 9.81,
        }
    }
}
impl QuadrotorDynamics {
    pub const STATE_DIMENSION: usize = 6;
    pub const INPUT_DIMENSION: usize = 2;
    /// Index of the horizontal position state
    pub const X: usize = 0;
    /// Index of the vertical position state
    pub const Z: usize = 1;
    /// Index of the bearing state
    pub const PHI: usize = 2;
    pub const VX: usize = 3;
    pub const VZ: usize = 4;
    pub const OMEGA: usize = 5;

    pub fn new(mass: f64, inertia: f64, gravity: f64) -> Self {
        QuadrotorDynamics {
            mass,
            inertia,
            gravity,
        }
    }
    /// Thrust that exactly cancels gravity when level
    pub fn hover_thrust(&self) -> f64 {
        self.mass * self.gravity
    }
}
impl ProcessModel for QuadrotorDynamics {
    fn state_dimension(&self) -> usize {
        Self::STATE_DIMENSION
    }
    fn input_dimension(&self) -> usize {
        Self::INPUT_DIMENSION
    }
    fn propagate(&self, state: &DVector<f64>, input: &DVector<f64>, dt: f64) -> DVector<f64> {
        let phi = state[Self::PHI];
        let thrust = input[0];
        let torque = input[1];
        let rate = DVector::from_vec(vec![
            state[Self::VX],
            state[Self::VZ],
            state[Self::OMEGA],
            -phi.sin() / self.mass * thrust,
            phi.cos() / self.mass * thrust - self.gravity,
            torque / self.inertia,
        ]);
        state + rate * dt
    }
    fn state_jacobian(
        &self,
        state: &DVector<f64>,
        input: &DVector<f64>,
        dt: f64,
    ) -> DMatrix<f64> {
        let phi = state[Self::PHI];
        let thrust = input[0];
        let mut a = DMatrix::<f64>::identity(6, 6);
        a[(Self::X, Self::VX)] = dt;
        a[(Self::Z, Self::VZ)] = dt;
        a[(Self::PHI, Self::OMEGA)] = dt;
        a[(Self::VX, Self::PHI)] = -phi.cos() * thrust * dt / self.mass;
        a[(Self::VZ, Self::PHI)] = -phi.sin() * thrust * dt / self.mass;
        a
    }
    fn input_jacobian(
        &self,
        state: &DVector<f64>,
        _input: &DVector<f64>,
        dt: f64,
    ) -> DMatrix<f64> {
        let phi = state[Self::PHI];
        let mut b = DMatrix::<f64>::zeros(6, 2);
        b[(Self::VX, 0)] = -phi.sin() * dt / self.mass;
        b[(Self::VZ, 0)] = phi.cos() * dt / self.mass;
        b[(Self::OMEGA, 1)] = dt / self.inertia;
        b
    }
    fn angular_states(&self) -> &[usize] {
        &[Self::PHI]
    }
}

/// Differential-drive (unicycle) wheel odometry.
///
/// State `[t, phi, x, y, theta_l, theta_r]` with a leading timestamp field, input `[omega_l,
/// omega_r]` (wheel angular speeds in rad/s). The bearing rate and planar velocity follow from the
/// half-track width $d$ and wheel radius $r$:
///
/// $$
/// \dot\phi = \frac{r}{2d}(\omega_r - \omega_l), \quad
/// \dot x = \frac{r}{2}\cos\phi\,(\omega_l + \omega_r), \quad
/// \dot y = \frac{r}{2}\sin\phi\,(\omega_l + \omega_r)
/// $$
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DifferentialDrive {
    /// Half of the track width (m)
    pub half_track: f64,
    /// Wheel radius (m)
    pub wheel_radius: f64,
}
impl Default for DifferentialDrive {
    fn default() -> Self {
        DifferentialDrive {
            half_track: 0.08,
            wheel_radius: 0.033,
        }
    }
}
impl DifferentialDrive {
    pub const STATE_DIMENSION: usize = 6;
    pub const INPUT_DIMENSION: usize = 2;
    pub const TIME: usize = 0;
    pub const PHI: usize = 1;
    pub const X: usize = 2;
    pub const Y: usize = 3;
    pub const THETA_L: usize = 4;
    pub const THETA_R: usize = 5;

    pub fn new(half_track: f64, wheel_radius: f64) -> Self {
        DifferentialDrive {
            half_track,
            wheel_radius,
        }
    }
}
impl ProcessModel for DifferentialDrive {
    fn state_dimension(&self) -> usize {
        Self::STATE_DIMENSION
    }
    fn input_dimension(&self) -> usize {
        Self::INPUT_DIMENSION
    }
    fn propagate(&self, state: &DVector<f64>, input: &DVector<f64>, dt: f64) -> DVector<f64> {
        let phi = state[Self::PHI];
        let (left, right) = (input[0], input[1]);
        let r = self.wheel_radius;
        let rate = DVector::from_vec(vec![
            1.0,
            r / (2.0 * self.half_track) * (right - left),
            r / 2.0 * phi.cos() * (left + right),
            r / 2.0 * phi.sin() * (left + right),
            left,
            right,
        ]);
        state + rate * dt
    }
    fn state_jacobian(
        &self,
        state: &DVector<f64>,
        input: &DVector<f64>,
        dt: f64,
    ) -> DMatrix<f64> {
        let phi = state[Self::PHI];
        let speed_sum = input[0] + input[1];
        let r = self.wheel_radius;
        let mut a = DMatrix::<f64>::identity(6, 6);
        a[(Self::X, Self::PHI)] = -r / 2.0 * phi.sin() * speed_sum * dt;
        a[(Self::Y, Self::PHI)] = r / 2.0 * phi.cos() * speed_sum * dt;
        a
    }
    fn input_jacobian(
        &self,
        state: &DVector<f64>,
        _input: &DVector<f64>,
        dt: f64,
    ) -> DMatrix<f64> {
        let phi = state[Self::PHI];
        let r = self.wheel_radius;
        let turn = r / (2.0 * self.half_track) * dt;
        let mut b = DMatrix::<f64>::zeros(6, 2);
        b[(Self::PHI, 0)] = -turn;
        b[(Self::PHI, 1)] = turn;
        b[(Self::X, 0)] = r / 2.0 * phi.cos() * dt;
        b[(Self::X, 1)] = r / 2.0 * phi.cos() * dt;
        b[(Self::Y, 0)] = r / 2.0 * phi.sin() * dt;
        b[(Self::Y, 1)] = r / 2.0 * phi.sin() * dt;
        b[(Self::THETA_L, 0)] = dt;
        b[(Self::THETA_R, 1)] = dt;
        b
    }
    fn angular_states(&self) -> &[usize] {
        &[Self::PHI]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    /// Central finite difference of `g` with respect to the state, only used to check the analytic
    /// Jacobians.
    fn numeric_state_jacobian(
        model: &dyn ProcessModel,
        x: &DVector<f64>,
        u: &DVector<f64>,
        dt: f64,
    ) -> DMatrix<f64> {
        let n = x.len();
        let h = 1e-6;
        let mut jac = DMatrix::<f64>::zeros(n, n);
        for j in 0..n {
            let mut xp = x.clone();
            let mut xm = x.clone();
            xp[j] += h;
            xm[j] -= h;
            let column = (model.propagate(&xp, u, dt) - model.propagate(&xm, u, dt)) / (2.0 * h);
            jac.set_column(j, &column);
        }
        jac
    }
    fn numeric_input_jacobian(
        model: &dyn ProcessModel,
        x: &DVector<f64>,
        u: &DVector<f64>,
        dt: f64,
    ) -> DMatrix<f64> {
        let m = u.len();
        let h = 1e-6;
        let mut jac = DMatrix::<f64>::zeros(x.len(), m);
        for j in 0..m {
            let mut up = u.clone();
            let mut um = u.clone();
            up[j] += h;
            um[j] -= h;
            let column = (model.propagate(x, &up, dt) - model.propagate(x, &um, dt)) / (2.0 * h);
            jac.set_column(j, &column);
        }
        jac
    }

    #[test]
    fn quadrotor_hover() {
        let model = QuadrotorDynamics::default();
        let state = DVector::zeros(6);
        let input = DVector::from_vec(vec![model.hover_thrust(), 0.0]);
        let next = model.propagate(&state, &input, 0.1);
        for i in 0..6 {
            assert_approx_eq!(next[i], 0.0, 1e-12);
        }
    }
    #[test]
    fn quadrotor_freefall() {
        let model = QuadrotorDynamics::default();
        let state = DVector::zeros(6);
        let input = DVector::zeros(2);
        let next = model.propagate(&state, &input, 0.1);
        assert_approx_eq!(next[QuadrotorDynamics::VZ], -0.981, 1e-12);
        // forward Euler: position uses the previous velocity
        assert_approx_eq!(next[QuadrotorDynamics::Z], 0.0, 1e-12);
        let after = model.propagate(&next, &input, 0.1);
        assert_approx_eq!(after[QuadrotorDynamics::Z], -0.0981, 1e-12);
    }
    #[test]
    fn quadrotor_tilted_thrust() {
        let model = QuadrotorDynamics::new(1.0, 0.01, 9.81);
        let mut state = DVector::zeros(6);
        state[QuadrotorDynamics::PHI] = std::f64::consts::FRAC_PI_2;
        let input = DVector::from_vec(vec![2.0, 0.05]);
        let next = model.propagate(&state, &input, 0.5);
        assert_approx_eq!(next[QuadrotorDynamics::VX], -1.0, 1e-12);
        assert_approx_eq!(next[QuadrotorDynamics::VZ], -9.81 * 0.5, 1e-9);
        assert_approx_eq!(next[QuadrotorDynamics::OMEGA], 2.5, 1e-12);
    }
    #[test]
    fn quadrotor_jacobians_match_finite_differences() {
        let model = QuadrotorDynamics::default();
        let x = DVector::from_vec(vec![0.3, 1.2, 0.4, -0.2, 0.5, 0.1]);
        let u = DVector::from_vec(vec![8.5, 0.01]);
        let analytic = model.state_jacobian(&x, &u, 0.05);
        let numeric = numeric_state_jacobian(&model, &x, &u, 0.05);
        assert!((analytic - numeric).abs().max() < 1e-6);
        let analytic = model.input_jacobian(&x, &u, 0.05);
        let numeric = numeric_input_jacobian(&model, &x, &u, 0.05);
        assert!((analytic - numeric).abs().max() < 1e-6);
    }
    #[test]
    fn differential_drive_straight_line() {
        let model = DifferentialDrive::default();
        let state = DVector::zeros(6);
        let input = DVector::from_vec(vec![10.0, 10.0]);
        let next = model.propagate(&state, &input, 0.1);
        assert_approx_eq!(next[DifferentialDrive::TIME], 0.1, 1e-12);
        assert_approx_eq!(next[DifferentialDrive::PHI], 0.0, 1e-12);
        assert_approx_eq!(next[DifferentialDrive::X], 0.033, 1e-12);
        assert_approx_eq!(next[DifferentialDrive::Y], 0.0, 1e-12);
        assert_approx_eq!(next[DifferentialDrive::THETA_L], 1.0, 1e-12);
        assert_approx_eq!(next[DifferentialDrive::THETA_R], 1.0, 1e-12);
    }
    #[test]
    fn differential_drive_turn_in_place() {
        let model = DifferentialDrive::default();
        let state = DVector::zeros(6);
        let input = DVector::from_vec(vec![-1.0, 1.0]);
        let next = model.propagate(&state, &input, 1.0);
        assert_approx_eq!(next[DifferentialDrive::PHI], 0.033 / 0.08, 1e-12);
        assert_approx_eq!(next[DifferentialDrive::X], 0.0, 1e-12);
        assert_approx_eq!(next[DifferentialDrive::Y], 0.0, 1e-12);
    }
    #[test]
    fn differential_drive_jacobians_match_finite_differences() {
        let model = DifferentialDrive::default();
        let x = DVector::from_vec(vec![2.0, 0.7, 0.1, -0.3, 4.0, 5.0]);
        let u = DVector::from_vec(vec![3.0, 4.5]);
        let analytic = model.state_jacobian(&x, &u, 0.1);
        let numeric = numeric_state_jacobian(&model, &x, &u, 0.1);
        assert!((analytic - numeric).abs().max() < 1e-6);
        let analytic = model.input_jacobian(&x, &u, 0.1);
        let numeric = numeric_input_jacobian(&model, &x, &u, 0.1);
        assert!((analytic - numeric).abs().max() < 1e-6);
    }
}
