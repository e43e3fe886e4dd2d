//! Linear algebra helpers for the Kalman recursions.
//!
//! Public API:
//!     pub fn kalman_gain(predicted_covariance, jacobian, measurement_noise) -> Result<(K, S)>
//!     pub fn joseph_update(predicted_covariance, gain, jacobian, measurement_noise) -> P
//!     pub fn solve_spd(a, b) -> Result<X>
//!
//! Strategy for the innovation solve:
//! 1) Reject non-finite entries
//! 2) Symmetrize S ← 0.5 (S + Sᵀ)
//! 3) Reject S whose reciprocal condition number (eigenvalue ratio) is below [SINGULARITY_RCOND]
//! 4) Cholesky solve; failure means S is not positive definite and is reported, never
//!    regularized away

use crate::error::{EstimationError, Result};

use nalgebra::DMatrix;
use nalgebra::linalg::{Cholesky, SymmetricEigen};

/// Smallest accepted ratio between the smallest and largest eigenvalue magnitude of an innovation
/// covariance.
pub const SINGULARITY_RCOND: f64 = 1e-12;

/// Symmetrize a matrix: P ← 0.5 (P + Pᵀ)
///
/// Simple matrix symmetrization function that reduces round-off errors associated
/// with floating point arithmetic.
#[inline]
pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    0.5 * (m + m.transpose())
}

/// Reciprocal condition number of a symmetric matrix, `min |λ| / max |λ|`.
///
/// Returns 0.0 for the zero matrix.
pub fn reciprocal_condition(m: &DMatrix<f64>) -> f64 {
    let eigenvalues = SymmetricEigen::new(symmetrize(m)).eigenvalues;
    let max = eigenvalues.iter().fold(0.0_f64, |acc, l| acc.max(l.abs()));
    if max == 0.0 {
        return 0.0;
    }
    let min = eigenvalues.iter().fold(f64::INFINITY, |acc, l| acc.min(l.abs()));
    min / max
}

/// Solve A X = B for a symmetric positive definite A.
///
/// Fails with [EstimationError::NumericalInstability] when A holds non-finite values, is singular
/// or near-singular, or is not positive definite.
pub fn solve_spd(a: &DMatrix<f64>, b: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    if !a.is_square() || a.nrows() != b.nrows() {
        return Err(EstimationError::Precondition(format!(
            "solve_spd: A is {}x{} and B is {}x{}",
            a.nrows(),
            a.ncols(),
            b.nrows(),
            b.ncols()
        )));
    }
    if a.iter().any(|v| !v.is_finite()) {
        return Err(EstimationError::NumericalInstability(
            "innovation covariance contains non-finite entries".to_string(),
        ));
    }
    let a_sym = symmetrize(a);
    let rcond = reciprocal_condition(&a_sym);
    if rcond < SINGULARITY_RCOND {
        return Err(EstimationError::NumericalInstability(format!(
            "innovation covariance is singular or near-singular (rcond {rcond:e})"
        )));
    }
    match Cholesky::new(a_sym) {
        Some(ch) => Ok(ch.solve(b)),
        None => Err(EstimationError::NumericalInstability(
            "innovation covariance is not positive definite".to_string(),
        )),
    }
}

/// Kalman gain $K = P^- C^T (C P^- C^T + R)^{-1}$.
///
/// Returns the gain together with the innovation covariance $S = C P^- C^T + R$. The gain is
/// computed as the transpose of $S^{-1} C P^-$ rather than through an explicit inverse.
pub fn kalman_gain(
    predicted_covariance: &DMatrix<f64>,
    measurement_jacobian: &DMatrix<f64>,
    measurement_noise: &DMatrix<f64>,
) -> Result<(DMatrix<f64>, DMatrix<f64>)> {
    let cross_covariance = predicted_covariance * measurement_jacobian.transpose();
    let innovation_covariance =
        measurement_jacobian * &cross_covariance + measurement_noise;
    let kt = solve_spd(&innovation_covariance, &cross_covariance.transpose())?;
    Ok((kt.transpose(), innovation_covariance))
}

/// Covariance correction $P = (I - K C) P^-$ in Joseph form,
/// $P = (I - K C) P^- (I - K C)^T + K R K^T$, followed by symmetrization.
///
/// For the optimal gain both forms are algebraically identical; the Joseph form keeps $P$ symmetric
/// positive semi-definite under round-off.
pub fn joseph_update(
    predicted_covariance: &DMatrix<f64>,
    gain: &DMatrix<f64>,
    measurement_jacobian: &DMatrix<f64>,
    measurement_noise: &DMatrix<f64>,
) -> DMatrix<f64> {
    let n = predicted_covariance.nrows();
    let i_kc = DMatrix::<f64>::identity(n, n) - gain * measurement_jacobian;
    let p = &i_kc * predicted_covariance * i_kc.transpose()
        + gain * measurement_noise * gain.transpose();
    symmetrize(&p)
}

/// Smallest eigenvalue of the symmetric part of `m`
pub fn min_eigenvalue(m: &DMatrix<f64>) -> f64 {
    SymmetricEigen::new(symmetrize(m))
        .eigenvalues
        .iter()
        .fold(f64::INFINITY, |acc, l| acc.min(*l))
}

/// Whether `m` is symmetric and positive semi-definite within `tolerance`
pub fn is_positive_semidefinite(m: &DMatrix<f64>, tolerance: f64) -> bool {
    if !m.is_square() {
        return false;
    }
    let asymmetry = (m - m.transpose()).abs().max();
    asymmetry <= tolerance && min_eigenvalue(m) >= -tolerance
}

/* =============================== Tests ==================================== */

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use nalgebra::DVector;

    fn approx_eq(a: &DMatrix<f64>, b: &DMatrix<f64>, tol: f64) -> bool {
        a.shape() == b.shape() && (a - b).abs().max() <= tol
    }

    #[test]
    fn t_symmetrize() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 0.0, 3.0]);
        let s = symmetrize(&m);
        assert_eq!(s, DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 3.0]));
    }
    #[test]
    fn t_solve_spd() {
        let a = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let b = DMatrix::from_row_slice(2, 1, &[1.0, 2.0]);
        let x = solve_spd(&a, &b).unwrap();
        assert!(approx_eq(&(&a * &x), &b, 1e-12));
    }
    #[test]
    fn t_solve_singular() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let b = DMatrix::identity(2, 2);
        assert!(matches!(
            solve_spd(&a, &b),
            Err(EstimationError::NumericalInstability(_))
        ));
        assert!(matches!(
            solve_spd(&DMatrix::zeros(2, 2), &b),
            Err(EstimationError::NumericalInstability(_))
        ));
    }
    #[test]
    fn t_solve_indefinite() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, -1.0]);
        let b = DMatrix::identity(2, 2);
        assert!(solve_spd(&a, &b).is_err());
    }
    #[test]
    fn t_solve_nan() {
        let a = DMatrix::from_row_slice(2, 2, &[f64::NAN, 0.0, 0.0, 1.0]);
        assert!(solve_spd(&a, &DMatrix::identity(2, 2)).is_err());
    }
    #[test]
    fn t_kalman_gain_scalar() {
        // P = 4, C = 1, R = 1 -> K = 4 / 5
        let p = DMatrix::from_element(1, 1, 4.0);
        let c = DMatrix::from_element(1, 1, 1.0);
        let r = DMatrix::from_element(1, 1, 1.0);
        let (k, s) = kalman_gain(&p, &c, &r).unwrap();
        assert_approx_eq!(k[(0, 0)], 0.8);
        assert_approx_eq!(s[(0, 0)], 5.0);
        let updated = joseph_update(&p, &k, &c, &r);
        // (1 - K)^2 P + K^2 R = (I - K C) P for the optimal gain
        assert_approx_eq!(updated[(0, 0)], 0.8);
    }
    #[test]
    fn t_joseph_matches_simple_form() {
        let p = DMatrix::from_diagonal(&DVector::from_vec(vec![2.0, 1.0, 0.5]));
        let c = DMatrix::from_row_slice(2, 3, &[1.0, 0.0, 0.0, 0.0, 1.0, 1.0]);
        let r = DMatrix::identity(2, 2) * 0.1;
        let (k, _) = kalman_gain(&p, &c, &r).unwrap();
        let joseph = joseph_update(&p, &k, &c, &r);
        let simple = (DMatrix::identity(3, 3) - &k * &c) * &p;
        assert!(approx_eq(&joseph, &simple, 1e-12));
        assert!(is_positive_semidefinite(&joseph, 1e-12));
    }
    #[test]
    fn t_psd_checks() {
        assert!(is_positive_semidefinite(&DMatrix::identity(3, 3), 0.0));
        let indefinite = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        assert!(!is_positive_semidefinite(&indefinite, 1e-9));
        assert_approx_eq!(min_eigenvalue(&indefinite), -1.0, 1e-12);
        let asymmetric = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.0, 1.0]);
        assert!(!is_positive_semidefinite(&asymmetric, 1e-9));
    }
    #[test]
    fn t_reciprocal_condition() {
        let m = DMatrix::from_diagonal(&DVector::from_vec(vec![1e-3, 1.0]));
        assert_approx_eq!(reciprocal_condition(&m), 1e-3, 1e-15);
        assert_eq!(reciprocal_condition(&DMatrix::zeros(2, 2)), 0.0);
    }
}
