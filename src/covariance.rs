// Channel-channel covariance matrix construction.

use std::sync::atomic::{AtomicUsize, Ordering};

use log::debug;
use ndarray::{Array2, ArrayView3, Axis};
use rayon::prelude::*;

/// Optional progress sink for the covariance build, the one long-running
/// step of the pipeline. Called with `(rows_done, rows_total)`; completion
/// order across rows is unspecified.
pub type ProgressFn<'a> = &'a (dyn Fn(usize, usize) + Sync);

/// Build the symmetric `(n_channels, n_channels)` covariance matrix of a
/// cube's spectral channels.
///
/// With `mean_sub`, entry `(i, j)` is the covariance of channels `i` and `j`
/// about their spatial means; otherwise it is the plain mean of the product
/// `channel_i * channel_j`, matching the Heyer & Brunt convention where the
/// first eigenmode absorbs the channel means.
///
/// Channel pairs are independent, so rows are filled in parallel and
/// mirrored into the lower triangle afterwards.
pub fn channel_covariance(
    data: ArrayView3<'_, f64>,
    mean_sub: bool,
    progress: Option<ProgressFn<'_>>,
) -> Array2<f64> {
    let n_chan = data.shape()[0];
    let n_pix = (data.shape()[1] * data.shape()[2]) as f64;

    let channel_means: Vec<f64> = (0..n_chan)
        .map(|i| data.index_axis(Axis(0), i).sum() / n_pix)
        .collect();

    let rows_done = AtomicUsize::new(0);
    let mut cov = Array2::<f64>::zeros((n_chan, n_chan));
    let row_results: Vec<(usize, Vec<f64>)> = (0..n_chan)
        .into_par_iter()
        .map(|i| {
            let chan_i = data.index_axis(Axis(0), i);
            let row: Vec<f64> = (i..n_chan)
                .map(|j| {
                    let chan_j = data.index_axis(Axis(0), j);
                    let mut acc = 0.0;
                    if mean_sub {
                        let (m_i, m_j) = (channel_means[i], channel_means[j]);
                        for (&a, &b) in chan_i.iter().zip(chan_j.iter()) {
                            acc += (a - m_i) * (b - m_j);
                        }
                    } else {
                        for (&a, &b) in chan_i.iter().zip(chan_j.iter()) {
                            acc += a * b;
                        }
                    }
                    acc / n_pix
                })
                .collect();
            if let Some(report) = progress {
                let done = rows_done.fetch_add(1, Ordering::Relaxed) + 1;
                report(done, n_chan);
            }
            (i, row)
        })
        .collect();

    for (i, row) in row_results {
        for (offset, value) in row.into_iter().enumerate() {
            let j = i + offset;
            cov[[i, j]] = value;
            cov[[j, i]] = value;
        }
    }

    debug!(
        "Built {}x{} channel covariance matrix (mean_sub = {})",
        n_chan, n_chan, mean_sub
    );
    cov
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn matrix_is_symmetric() {
        let data = Array3::from_shape_fn((4, 8, 8), |(c, y, x)| {
            (c as f64 + 1.0) * (y as f64 - 3.5) + 0.1 * x as f64
        });
        let cov = channel_covariance(data.view(), true, None);
        for i in 0..4 {
            for j in 0..4 {
                assert_abs_diff_eq!(cov[[i, j]], cov[[j, i]]);
            }
        }
    }

    #[test]
    fn mean_subtracted_constant_channels_have_zero_covariance() {
        let mut data = Array3::<f64>::zeros((3, 6, 6));
        for c in 0..3 {
            data.index_axis_mut(Axis(0), c).fill(c as f64 + 1.0);
        }
        let cov = channel_covariance(data.view(), true, None);
        for v in cov.iter() {
            assert_abs_diff_eq!(*v, 0.0, epsilon = 1e-12);
        }

        // Without mean subtraction the same cube keeps the mean products.
        let raw = channel_covariance(data.view(), false, None);
        assert_abs_diff_eq!(raw[[0, 2]], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(raw[[2, 2]], 9.0, epsilon = 1e-12);
    }

    #[test]
    fn identical_channels_give_rank_one_covariance() {
        let plane = ndarray::Array2::from_shape_fn((8, 8), |(y, x)| {
            ((y as f64 - 4.0).powi(2) + (x as f64 - 4.0).powi(2)).sqrt()
        });
        let mut data = Array3::<f64>::zeros((5, 8, 8));
        for c in 0..5 {
            data.index_axis_mut(Axis(0), c).assign(&plane);
        }
        let cov = channel_covariance(data.view(), true, None);
        // Every entry equals the variance of the shared plane.
        let var = cov[[0, 0]];
        assert!(var > 0.0);
        for v in cov.iter() {
            assert_abs_diff_eq!(*v, var, epsilon = 1e-10);
        }
    }

    #[test]
    fn progress_reports_every_row() {
        let data = Array3::<f64>::ones((6, 4, 4));
        let calls = AtomicUsize::new(0);
        let report = |_done: usize, total: usize| {
            assert_eq!(total, 6);
            calls.fetch_add(1, Ordering::Relaxed);
        };
        channel_covariance(data.view(), false, Some(&report));
        assert_eq!(calls.load(Ordering::Relaxed), 6);
    }
}
