use anyhow::Result;
use ndarray::{Array1, Array2};

use crate::error::PipelineError;

/// Pivots at or below this fraction of their diagonal entry mark a rank-deficient matrix.
const PIVOT_TOLERANCE: f64 = 1e-10;

/// Lower-triangular Cholesky factor of a symmetric positive definite matrix.
#[derive(Debug, Clone)]
pub(crate) struct Cholesky {
    l: Array2<f64>,
}

impl Cholesky {
    pub(crate) fn factor(a: &Array2<f64>) -> Result<Self> {
        let n = a.nrows();
        let mut l = Array2::<f64>::zeros((n, n));
        for j in 0..n {
            let pivot = a[[j, j]] - (0..j).map(|k| l[[j, k]] * l[[j, k]]).sum::<f64>();
            if !pivot.is_finite() || pivot <= PIVOT_TOLERANCE * a[[j, j]].abs() {
                return Err(PipelineError::singular(format!("design column {j} is collinear or constant")).into());
            }
            l[[j, j]] = pivot.sqrt();
            for i in j + 1..n {
                let dot = (0..j).map(|k| l[[i, k]] * l[[j, k]]).sum::<f64>();
                l[[i, j]] = (a[[i, j]] - dot) / l[[j, j]];
            }
        }
        Ok(Self { l })
    }

    /// Solve `A x = b`.
    pub(crate) fn solve(&self, b: &Array1<f64>) -> Array1<f64> {
        let n = self.l.nrows();
        let mut y = Array1::<f64>::zeros(n);
        for i in 0..n {
            let dot = (0..i).map(|k| self.l[[i, k]] * y[k]).sum::<f64>();
            y[i] = (b[i] - dot) / self.l[[i, i]];
        }
        let mut x = Array1::<f64>::zeros(n);
        for i in (0..n).rev() {
            let dot = (i + 1..n).map(|k| self.l[[k, i]] * x[k]).sum::<f64>();
            x[i] = (y[i] - dot) / self.l[[i, i]];
        }
        x
    }

    /// Diagonal of `A⁻¹`.
    pub(crate) fn inverse_diagonal(&self) -> Array1<f64> {
        let n = self.l.nrows();
        Array1::from_iter((0..n).map(|j| {
            let mut unit = Array1::<f64>::zeros(n);
            unit[j] = 1.0;
            self.solve(&unit)[j]
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn solves_a_small_system() {
        let a = array![[4.0, 2.0, 0.6], [2.0, 5.0, 1.0], [0.6, 1.0, 3.0]];
        let x = array![1.0, -2.0, 0.5];
        let b = a.dot(&x);

        let solved = Cholesky::factor(&a).unwrap().solve(&b);
        for (got, want) in solved.iter().zip(x.iter()) {
            assert_relative_eq!(got, want, epsilon = 1e-12);
        }
    }

    #[test]
    fn inverse_diagonal_of_a_diagonal_matrix() {
        let a = array![[2.0, 0.0], [0.0, 8.0]];
        let diag = Cholesky::factor(&a).unwrap().inverse_diagonal();
        assert_relative_eq!(diag[0], 0.5);
        assert_relative_eq!(diag[1], 0.125);
    }

    #[test]
    fn rank_deficient_matrix_is_singular() {
        // Second row is twice the first.
        let a = array![[1.0, 2.0], [2.0, 4.0]];
        let err = Cholesky::factor(&a).unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::SingularFit(_))));
    }
}
