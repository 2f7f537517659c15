//! Sparse linear least-squares (Paige–Saunders LSQR) for the link
//! characterization systems `min ‖A·x − b‖₂`. Connectivity matrices are 0/1,
//! so the sparse form only stores the column indices of each row.

use ndarray::Array1;

use crate::linkchar::ConnectivityMatrix;

/// Why the iteration stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LsqrTermination {
    /// The right-hand side is zero; x = 0 is exact.
    ZeroRhs,
    /// Residual or normal-equation tolerance reached.
    Converged,
    /// Iteration limit hit.
    IterationLimit,
}

/// A binary sparse matrix in row-major index form.
#[derive(Debug, Clone)]
pub(crate) struct SparseBinaryMatrix {
    ncols: usize,
    rows: Vec<Vec<usize>>,
}

impl SparseBinaryMatrix {
    pub(crate) fn from_dense(matrix: &ConnectivityMatrix, ncols: usize) -> Self {
        let rows = matrix
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .filter(|&(_, &x)| x != 0)
                    .map(|(i, _)| i)
                    .collect()
            })
            .collect();
        Self { ncols, rows }
    }

    pub(crate) fn nrows(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn ncols(&self) -> usize {
        self.ncols
    }

    fn mul(&self, v: &Array1<f64>) -> Array1<f64> {
        let mut out = Array1::zeros(self.nrows());
        for (r, cols) in self.rows.iter().enumerate() {
            out[r] = cols.iter().map(|&c| v[c]).sum();
        }
        out
    }

    fn mul_transpose(&self, u: &Array1<f64>) -> Array1<f64> {
        let mut out = Array1::zeros(self.ncols);
        for (r, cols) in self.rows.iter().enumerate() {
            for &c in cols {
                out[c] += u[r];
            }
        }
        out
    }
}

fn norm(v: &Array1<f64>) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

const ATOL: f64 = 1e-12;
const BTOL: f64 = 1e-12;

/// Solves `min ‖A·x − b‖₂` and returns the solution with the termination
/// reason. The iteration limit is generous; the systems here are small.
pub(crate) fn lsqr(a: &SparseBinaryMatrix, b: &Array1<f64>) -> (Array1<f64>, LsqrTermination) {
    let mut x = Array1::zeros(a.ncols());

    let mut beta = norm(b);
    if beta == 0.0 {
        return (x, LsqrTermination::ZeroRhs);
    }
    let bnorm = beta;
    let mut u = b / beta;

    let mut v = a.mul_transpose(&u);
    let mut alpha = norm(&v);
    if alpha == 0.0 {
        return (x, LsqrTermination::ZeroRhs);
    }
    v /= alpha;

    let mut w = v.clone();
    let mut phibar = beta;
    let mut rhobar = alpha;

    let max_iter = 4 * (a.ncols() + a.nrows()).max(16);
    for _ in 0..max_iter {
        // Continue the Golub-Kahan bidiagonalization.
        u = a.mul(&v) - alpha * &u;
        beta = norm(&u);
        if beta > 0.0 {
            u /= beta;
        }
        v = a.mul_transpose(&u) - beta * &v;
        alpha = norm(&v);
        if alpha > 0.0 {
            v /= alpha;
        }

        // Apply the next orthogonal transformation.
        let rho = rhobar.hypot(beta);
        let c = rhobar / rho;
        let s = beta / rho;
        let theta = s * alpha;
        rhobar = -c * alpha;
        let phi = c * phibar;
        phibar *= s;

        x = x + (phi / rho) * &w;
        w = &v - (theta / rho) * &w;

        // ‖A'r‖ estimate for the normal-equation test.
        let arnorm = phibar * alpha * c.abs();
        if phibar <= BTOL * bnorm || arnorm <= ATOL {
            return (x, LsqrTermination::Converged);
        }
    }
    (x, LsqrTermination::IterationLimit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rhs_yields_zero_solution() {
        let matrix = vec![vec![1, 0, 1], vec![0, 1, 1]];
        let a = SparseBinaryMatrix::from_dense(&matrix, 3);
        let b = Array1::zeros(2);
        let (x, term) = lsqr(&a, &b);
        assert_eq!(term, LsqrTermination::ZeroRhs);
        assert!(x.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn consistent_full_rank_system_is_recovered() {
        // Three links in series, measured end-to-end, first-two, last-two.
        let matrix = vec![vec![1, 1, 1], vec![1, 1, 0], vec![0, 1, 1]];
        let a = SparseBinaryMatrix::from_dense(&matrix, 3);
        let truth = [0.9f64.ln(), 0.0, 0.8f64.ln()];
        let b = Array1::from(vec![truth[0] + truth[1] + truth[2], truth[0] + truth[1], truth[1] + truth[2]]);
        let (x, _) = lsqr(&a, &b);
        for (got, want) in x.iter().zip(truth.iter()) {
            assert!((got - want).abs() < 1e-9, "{got} vs {want}");
        }
    }

    #[test]
    fn least_squares_of_inconsistent_system_minimizes_residual() {
        // One link measured twice with different values: the solution is the
        // mean.
        let matrix = vec![vec![1], vec![1]];
        let a = SparseBinaryMatrix::from_dense(&matrix, 1);
        let b = Array1::from(vec![1.0, 3.0]);
        let (x, _) = lsqr(&a, &b);
        assert!((x[0] - 2.0).abs() < 1e-9);
    }
}
