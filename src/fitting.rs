// Size-linewidth power-law fitting in log space.
//
// Two engines share the same likelihood geometry but differ in error
// semantics: the York/ODR fit yields symmetric errors linearized in log
// space, while the MCMC fit yields asymmetric credible intervals and keeps
// its posterior chains for downstream nonlinear propagation.

use log::{debug, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::{PcaError, Result};
use crate::widths::WidthSet;

/// log10 error from a relative error: d(log10 v) = 0.434 dv / v.
pub(crate) const LOG10_ERR: f64 = 0.434;

/// Which regression engine fits the size-linewidth relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FitMethod {
    /// Orthogonal-distance (York) regression with errors in both axes.
    Odr,
    /// Ensemble MCMC sampling of the line posterior.
    Bayes(McmcConfig),
}

/// Sampler settings for `FitMethod::Bayes`. Summary statistics are
/// deterministic for a fixed seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McmcConfig {
    pub n_walkers: usize,
    pub n_steps: usize,
    pub burn_in: usize,
    pub seed: u64,
}

impl Default for McmcConfig {
    fn default() -> Self {
        Self {
            n_walkers: 50,
            n_steps: 600,
            burn_in: 150,
            seed: 77,
        }
    }
}

/// Engine-specific part of a fit result. The Bayesian variant retains the
/// flattened post-burn-in chains: asymmetric credible intervals cannot be
/// rebuilt from summary statistics, and the sonic length needs the raw
/// samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FitOutcome {
    Odr {
        index_err: f64,
        log_intercept_err: f64,
    },
    Bayesian {
        index_samples: Vec<f64>,
        log_intercept_samples: Vec<f64>,
    },
}

/// Fitted size-linewidth power law, in log10 space.
///
/// `index` is the power-law slope; the intercept is stored as its log10 so
/// both engines share one representation, and exponentiated by accessors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerLawFit {
    pub index: f64,
    /// One-sigma (ODR) or [15, 85] percentile (Bayes) bounds on the index.
    pub index_range: [f64; 2],
    pub log_intercept: f64,
    pub log_intercept_range: [f64; 2],
    pub outcome: FitOutcome,
}

impl PowerLawFit {
    /// Model prediction `log10(linewidth)` at `log10(size) = x`.
    pub fn model(&self, x: f64) -> f64 {
        self.index * x + self.log_intercept
    }
}

/// Fit `log10(spectral width)` against `log10(spatial width)`.
///
/// Only modes where both widths and both errors are finite enter the fit;
/// fewer than 2 such modes is fatal, fewer than 5 a soft warning.
pub fn fit_size_linewidth(
    spatial: &WidthSet,
    spectral: &WidthSet,
    method: &FitMethod,
) -> Result<PowerLawFit> {
    let mut x = Vec::new();
    let mut y = Vec::new();
    let mut x_err = Vec::new();
    let mut y_err = Vec::new();
    for i in 0..spatial.len().min(spectral.len()) {
        let (sw, se) = (spatial.values[i], spatial.errors[i]);
        let (vw, ve) = (spectral.values[i], spectral.errors[i]);
        if [sw, se, vw, ve].iter().all(|v| v.is_finite()) && sw > 0.0 && vw > 0.0 {
            x.push(sw.log10());
            y.push(vw.log10());
            x_err.push((LOG10_ERR * se / sw).max(1e-8));
            y_err.push((LOG10_ERR * ve / vw).max(1e-8));
        }
    }

    if x.len() < 2 {
        return Err(PcaError::InsufficientData(format!(
            "only {} valid width pairs; at least 2 are needed to fit",
            x.len()
        )));
    }
    if x.len() < 5 {
        warn!(
            "Only {} points in the size-linewidth fit; the result will be poorly constrained",
            x.len()
        );
    }

    match method {
        FitMethod::Odr => {
            let ((slope, intercept), (slope_err, intercept_err)) =
                york_fit(&x, &y, &x_err, &y_err);
            debug!(
                "ODR fit: index = {:.4} +/- {:.4}, log intercept = {:.4} +/- {:.4}",
                slope, slope_err, intercept, intercept_err
            );
            Ok(PowerLawFit {
                index: slope,
                index_range: [slope - slope_err, slope + slope_err],
                log_intercept: intercept,
                log_intercept_range: [intercept - intercept_err, intercept + intercept_err],
                outcome: FitOutcome::Odr {
                    index_err: slope_err,
                    log_intercept_err: intercept_err,
                },
            })
        }
        FitMethod::Bayes(config) => {
            let (index_samples, log_intercept_samples) =
                sample_line_posterior(&x, &y, &x_err, &y_err, config);
            let index = percentile(&index_samples, 50.0);
            let log_intercept = percentile(&log_intercept_samples, 50.0);
            let index_range = [
                percentile(&index_samples, 15.0),
                percentile(&index_samples, 85.0),
            ];
            let log_intercept_range = [
                percentile(&log_intercept_samples, 15.0),
                percentile(&log_intercept_samples, 85.0),
            ];
            debug!(
                "Bayesian fit: index = {:.4} [{:.4}, {:.4}] from {} samples",
                index,
                index_range[0],
                index_range[1],
                index_samples.len()
            );
            Ok(PowerLawFit {
                index,
                index_range,
                log_intercept,
                log_intercept_range,
                outcome: FitOutcome::Bayesian {
                    index_samples,
                    log_intercept_samples,
                },
            })
        }
    }
}

/// York (2004) iterative line fit with errors in both coordinates, the
/// closed-form equivalent of orthogonal distance regression for a straight
/// line. Returns `((slope, intercept), (slope_err, intercept_err))`.
fn york_fit(x: &[f64], y: &[f64], x_err: &[f64], y_err: &[f64]) -> ((f64, f64), (f64, f64)) {
    let n = x.len();
    let wx: Vec<f64> = x_err.iter().map(|e| 1.0 / (e * e)).collect();
    let wy: Vec<f64> = y_err.iter().map(|e| 1.0 / (e * e)).collect();

    // Ordinary least squares seed.
    let mean = |v: &[f64]| v.iter().sum::<f64>() / n as f64;
    let (mx, my) = (mean(x), mean(y));
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for i in 0..n {
        sxy += (x[i] - mx) * (y[i] - my);
        sxx += (x[i] - mx) * (x[i] - mx);
    }
    let mut slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };

    let mut w = vec![0.0; n];
    let mut beta = vec![0.0; n];
    let mut x_bar = 0.0;
    let mut y_bar = 0.0;
    for _ in 0..100 {
        let mut w_sum = 0.0;
        let mut wx_sum = 0.0;
        let mut wy_sum = 0.0;
        for i in 0..n {
            w[i] = wx[i] * wy[i] / (slope * slope * wy[i] + wx[i]);
            w_sum += w[i];
            wx_sum += w[i] * x[i];
            wy_sum += w[i] * y[i];
        }
        x_bar = wx_sum / w_sum;
        y_bar = wy_sum / w_sum;

        let mut num = 0.0;
        let mut den = 0.0;
        for i in 0..n {
            let u = x[i] - x_bar;
            let v = y[i] - y_bar;
            beta[i] = w[i] * (u / wy[i] + slope * v / wx[i]);
            num += w[i] * beta[i] * v;
            den += w[i] * beta[i] * u;
        }
        let next = num / den;
        let done = (next - slope).abs() < 1e-12;
        slope = next;
        if done {
            break;
        }
    }

    let intercept = y_bar - slope * x_bar;

    // Errors from the adjusted abscissae.
    let mut w_sum = 0.0;
    let mut adj_sum = 0.0;
    for i in 0..n {
        w_sum += w[i];
        adj_sum += w[i] * (x_bar + beta[i]);
    }
    let x_adj_bar = adj_sum / w_sum;
    let mut su = 0.0;
    for i in 0..n {
        let u = x_bar + beta[i] - x_adj_bar;
        su += w[i] * u * u;
    }
    let slope_err = (1.0 / su).sqrt();
    let intercept_err = (1.0 / w_sum + x_adj_bar * x_adj_bar / su).sqrt();

    ((slope, intercept), (slope_err, intercept_err))
}

/// Log posterior of a line under Gaussian x/y errors, folding the x error
/// into an effective variance along y.
fn ln_posterior(m: f64, b: f64, x: &[f64], y: &[f64], x_err: &[f64], y_err: &[f64]) -> f64 {
    let mut ln_p = 0.0;
    for i in 0..x.len() {
        let s_sq = y_err[i] * y_err[i] + m * m * x_err[i] * x_err[i];
        let r = y[i] - m * x[i] - b;
        ln_p -= 0.5 * (r * r / s_sq + s_sq.ln());
    }
    ln_p
}

/// Goodman-Weare stretch-move ensemble sampler over (slope, intercept).
/// Returns the flattened post-burn-in chains.
fn sample_line_posterior(
    x: &[f64],
    y: &[f64],
    x_err: &[f64],
    y_err: &[f64],
    config: &McmcConfig,
) -> (Vec<f64>, Vec<f64>) {
    const STRETCH: f64 = 2.0;
    let n_walkers = config.n_walkers.max(4);
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let jitter = Normal::new(0.0, 1e-2).expect("finite jitter scale");

    // Seed the ensemble around the deterministic York solution.
    let ((m0, b0), _) = york_fit(x, y, x_err, y_err);
    let mut walkers: Vec<(f64, f64)> = (0..n_walkers)
        .map(|_| (m0 + jitter.sample(&mut rng), b0 + jitter.sample(&mut rng)))
        .collect();
    let mut ln_probs: Vec<f64> = walkers
        .iter()
        .map(|&(m, b)| ln_posterior(m, b, x, y, x_err, y_err))
        .collect();

    let kept = config.n_steps.saturating_sub(config.burn_in) * n_walkers;
    let mut index_samples = Vec::with_capacity(kept);
    let mut log_intercept_samples = Vec::with_capacity(kept);

    for step in 0..config.n_steps {
        for k in 0..n_walkers {
            // Pick a companion from the rest of the ensemble.
            let mut other = rng.gen_range(0..n_walkers - 1);
            if other >= k {
                other += 1;
            }
            let (mk, bk) = walkers[k];
            let (mo, bo) = walkers[other];

            let u: f64 = rng.gen();
            let z = ((STRETCH - 1.0) * u + 1.0).powi(2) / STRETCH;
            let proposal = (mo + z * (mk - mo), bo + z * (bk - bo));
            let ln_new = ln_posterior(proposal.0, proposal.1, x, y, x_err, y_err);

            // ndim = 2 for (slope, intercept).
            let ln_accept = z.ln() + ln_new - ln_probs[k];
            if ln_accept >= 0.0 || rng.gen::<f64>().ln() < ln_accept {
                walkers[k] = proposal;
                ln_probs[k] = ln_new;
            }
        }
        if step >= config.burn_in {
            for &(m, b) in &walkers {
                index_samples.push(m);
                log_intercept_samples.push(b);
            }
        }
    }

    (index_samples, log_intercept_samples)
}

/// Linear-interpolation percentile over an unsorted sample set.
pub(crate) fn percentile(samples: &[f64], p: f64) -> f64 {
    let mut sorted: Vec<f64> = samples.iter().cloned().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(f64::total_cmp);
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (rank - lo as f64) * (sorted[hi] - sorted[lo])
    }
}
