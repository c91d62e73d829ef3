// Eigendecomposition of the channel covariance matrix and mode selection.

use ndarray::{Array1, Array2};
use ndarray_linalg::{Eigh, UPLO};
use serde::{Deserialize, Serialize};

use crate::error::{PcaError, Result};

/// Eigenvalues and eigenvectors of the channel covariance matrix, sorted
/// descending by eigenvalue. Column `k` of `eigenvectors` matches
/// `eigenvalues[k]` and has length `n_channels`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EigenDecomposition {
    pub eigenvalues: Array1<f64>,
    pub eigenvectors: Array2<f64>,
}

impl EigenDecomposition {
    /// Indices of eigenmodes whose eigenvalues sit above the machine
    /// precision floor. Near-zero and negative machine-noise eigenvalues
    /// come from degenerate (e.g. empty) channels; their eigenvectors carry
    /// no signal and are excluded from noise-mode selection.
    pub fn valid_modes(&self) -> Vec<usize> {
        self.eigenvalues
            .iter()
            .enumerate()
            .filter(|(_, &v)| v >= f64::EPSILON)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Decompose a symmetric covariance matrix.
///
/// Sorting is descending so mode 0 always carries the most variance.
pub fn decompose(cov: &Array2<f64>) -> Result<EigenDecomposition> {
    if cov.nrows() != cov.ncols() {
        return Err(PcaError::Decomposition(format!(
            "covariance matrix must be square, got {}x{}",
            cov.nrows(),
            cov.ncols()
        )));
    }
    if cov.iter().any(|v| !v.is_finite()) {
        return Err(PcaError::Decomposition(
            "covariance matrix contains non-finite entries".to_owned(),
        ));
    }

    let (vals, vecs) = cov
        .eigh(UPLO::Upper)
        .map_err(|e| PcaError::Decomposition(e.to_string()))?;

    // eigh returns ascending order; reverse values and columns together.
    let n = vals.len();
    let mut eigenvalues = Array1::<f64>::zeros(n);
    let mut eigenvectors = Array2::<f64>::zeros((n, n));
    for k in 0..n {
        let src = n - 1 - k;
        eigenvalues[k] = vals[src];
        eigenvectors.column_mut(k).assign(&vecs.column(src));
    }

    Ok(EigenDecomposition {
        eigenvalues,
        eigenvectors,
    })
}

/// How many eigenmodes to retain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ModeCount {
    /// Keep exactly this many leading modes.
    Explicit(usize),
    /// Keep every channel's mode.
    All,
    /// Derive the count from an eigenvalue cutoff.
    Auto {
        min_eigval: f64,
        method: EigenCutMethod,
    },
}

/// Interpretation of `min_eigval` under `ModeCount::Auto`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EigenCutMethod {
    /// `min_eigval` is the smallest variance a retained eigenvalue may have.
    Value,
    /// `min_eigval` is the proportion of total variance to retain, e.g.
    /// 0.99 for 99%.
    Proportion,
}

/// Resolve a `ModeCount` against the sorted eigenvalue spectrum.
pub fn select_n_eigs(eigenvalues: &Array1<f64>, selection: ModeCount) -> Result<usize> {
    let n_channels = eigenvalues.len();
    match selection {
        ModeCount::Explicit(k) => {
            if k == 0 || k > n_channels {
                Err(PcaError::InvalidArgument(format!(
                    "n_eigs must be between 1 and the number of channels ({}), got {}",
                    n_channels, k
                )))
            } else {
                Ok(k)
            }
        }
        ModeCount::All => Ok(n_channels),
        ModeCount::Auto { min_eigval, method } => {
            if !min_eigval.is_finite() {
                return Err(PcaError::InvalidArgument(
                    "min_eigval must be finite for automatic mode selection".to_owned(),
                ));
            }
            let count = match method {
                EigenCutMethod::Value => {
                    eigenvalues.iter().filter(|&&v| v >= min_eigval).count()
                }
                EigenCutMethod::Proportion => {
                    let total: f64 = eigenvalues.sum();
                    let mut cumulative = 0.0;
                    // Inclusive boundary: a cumulative sum exactly at the
                    // threshold still counts that mode.
                    eigenvalues
                        .iter()
                        .filter(|&&v| {
                            cumulative += v / total;
                            cumulative <= min_eigval
                        })
                        .count()
                }
            };
            if count == 0 {
                return Err(PcaError::InvalidArgument(format!(
                    "eigenvalue cut at {} selects zero modes; lower the threshold",
                    min_eigval
                )));
            }
            Ok(count)
        }
    }
}

/// Total variance of the spectrum. Without mean subtraction, the first
/// eigenvalue is dominated by the channel means and is excluded.
pub fn total_variance(eigenvalues: &Array1<f64>, mean_sub: bool) -> f64 {
    let start = if mean_sub { 0 } else { 1 };
    eigenvalues.iter().skip(start).sum()
}

/// Proportion of total variance carried by the first `n_eigs` modes, with
/// the same starting index as `total_variance`.
pub fn variance_proportion(eigenvalues: &Array1<f64>, n_eigs: usize, mean_sub: bool) -> f64 {
    let start = if mean_sub { 0 } else { 1 };
    let kept: f64 = eigenvalues.iter().take(n_eigs).skip(start).sum();
    kept / total_variance(eigenvalues, mean_sub)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn toy_cov() -> Array2<f64> {
        // Symmetric 3x3 with known spread of eigenvalues.
        array![[4.0, 1.0, 0.0], [1.0, 3.0, 0.5], [0.0, 0.5, 1.0]]
    }

    #[test]
    fn eigenvalues_sorted_descending() {
        let d = decompose(&toy_cov()).unwrap();
        for i in 0..d.eigenvalues.len() - 1 {
            assert!(d.eigenvalues[i] >= d.eigenvalues[i + 1]);
        }
    }

    #[test]
    fn eigenpairs_satisfy_the_eigen_equation() {
        let cov = toy_cov();
        let d = decompose(&cov).unwrap();
        for k in 0..3 {
            let v = d.eigenvectors.column(k);
            let av = cov.dot(&v);
            for i in 0..3 {
                assert_abs_diff_eq!(av[i], d.eigenvalues[k] * v[i], epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn non_finite_matrix_is_a_decomposition_error() {
        let mut cov = toy_cov();
        cov[[0, 1]] = f64::NAN;
        assert!(matches!(
            decompose(&cov).unwrap_err(),
            PcaError::Decomposition(_)
        ));
    }

    #[test]
    fn explicit_counts_validate_against_channel_count() {
        let vals = array![3.0, 2.0, 1.0];
        assert_eq!(select_n_eigs(&vals, ModeCount::Explicit(2)).unwrap(), 2);
        assert_eq!(select_n_eigs(&vals, ModeCount::All).unwrap(), 3);
        assert!(select_n_eigs(&vals, ModeCount::Explicit(0)).is_err());
        assert!(select_n_eigs(&vals, ModeCount::Explicit(4)).is_err());
    }

    #[test]
    fn value_cut_counts_eigenvalues_at_or_above_threshold() {
        let vals = array![3.0, 2.0, 1.0, 0.1];
        let pick = |min_eigval| {
            select_n_eigs(
                &vals,
                ModeCount::Auto {
                    min_eigval,
                    method: EigenCutMethod::Value,
                },
            )
            .unwrap()
        };
        assert_eq!(pick(1.0), 3); // boundary value included
        assert_eq!(pick(1.5), 2);
    }

    #[test]
    fn proportion_cut_includes_exact_boundary() {
        // Cumulative proportions: 0.5, 0.8, 1.0.
        let vals = array![5.0, 3.0, 2.0];
        let pick = |min_eigval| {
            select_n_eigs(
                &vals,
                ModeCount::Auto {
                    min_eigval,
                    method: EigenCutMethod::Proportion,
                },
            )
            .unwrap()
        };
        assert_eq!(pick(0.8), 2); // exactly at the cumulative sum
        assert_eq!(pick(0.79), 1);
        assert_eq!(pick(0.81), 2);
        assert_eq!(pick(1.0), 3);
    }

    #[test]
    fn a_cut_selecting_zero_modes_is_invalid() {
        let vals = array![3.0, 2.0, 1.0, 0.1];
        let value_cut = select_n_eigs(
            &vals,
            ModeCount::Auto {
                min_eigval: 10.0,
                method: EigenCutMethod::Value,
            },
        );
        assert!(matches!(
            value_cut.unwrap_err(),
            PcaError::InvalidArgument(_)
        ));

        // First cumulative fraction is 3.0 / 6.1; anything below it keeps
        // no modes at all.
        let proportion_cut = select_n_eigs(
            &vals,
            ModeCount::Auto {
                min_eigval: 0.1,
                method: EigenCutMethod::Proportion,
            },
        );
        assert!(matches!(
            proportion_cut.unwrap_err(),
            PcaError::InvalidArgument(_)
        ));
    }

    #[test]
    fn mode_counts_are_monotonic_in_the_threshold() {
        let vals = array![6.0, 2.5, 1.0, 0.4, 0.1];
        let mut prev = usize::MAX;
        for min_eigval in [0.0, 0.05, 0.2, 0.5, 1.0, 3.0] {
            let n = select_n_eigs(
                &vals,
                ModeCount::Auto {
                    min_eigval,
                    method: EigenCutMethod::Value,
                },
            )
            .unwrap();
            assert!(n <= prev, "raising a value cut must not add modes");
            prev = n;
        }

        let mut prev = 0usize;
        for min_eigval in [0.6, 0.8, 0.95, 1.0] {
            let n = select_n_eigs(
                &vals,
                ModeCount::Auto {
                    min_eigval,
                    method: EigenCutMethod::Proportion,
                },
            )
            .unwrap();
            assert!(n >= prev, "raising a proportion cut must not drop modes");
            prev = n;
        }
    }

    #[test]
    fn variance_proportion_is_bounded() {
        let vals = array![6.0, 2.5, 1.0, 0.4, 0.1];
        for mean_sub in [true, false] {
            for n in 1..=5 {
                let p = variance_proportion(&vals, n, mean_sub);
                assert!((0.0..=1.0 + 1e-12).contains(&p));
            }
            assert_abs_diff_eq!(variance_proportion(&vals, 5, mean_sub), 1.0);
        }
    }

    #[test]
    fn mean_dominated_first_mode_is_excluded_without_mean_sub() {
        let vals = array![100.0, 4.0, 1.0];
        assert_abs_diff_eq!(total_variance(&vals, false), 5.0);
        assert_abs_diff_eq!(variance_proportion(&vals, 2, false), 0.8);
        assert_abs_diff_eq!(total_variance(&vals, true), 105.0);
    }
}
