// The PCA turbulence pipeline (Heyer & Brunt 2002).
//
// A `TurbulencePca` owns one cube and walks it through the stages:
// covariance + eigendecomposition (`compute`), spatial and spectral width
// estimation, and the size-linewidth power-law fit. Each accessor names the
// stage it needs; asking early is a `NotComputed` error, never a panic.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use log::{info, warn};
use ndarray::{Array1, Array2, Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::acf::{autocorr_image, autocorr_vector};
use crate::covariance::{channel_covariance, ProgressFn};
use crate::cube::{CubeMeta, DataCube, SpatialScale, SpectralScale, Temperature};
use crate::decomposition::{
    decompose, select_n_eigs, total_variance, variance_proportion, EigenCutMethod,
    EigenDecomposition, ModeCount,
};
use crate::error::{PcaError, Result};
use crate::fitting::{fit_size_linewidth, percentile, FitMethod, FitOutcome, PowerLawFit, LOG10_ERR};
use crate::widths::{
    estimate_spatial_widths, estimate_spectral_widths, BeamCorrection, SpatialMethod,
    SpectralMethod, WidthSet,
};

/// Number of trailing valid eigenmodes averaged into the noise ACF.
pub const DEFAULT_NOISE_MODES: i64 = -10;

/// Pipeline progression. Each stage strictly requires the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineStage {
    Built,
    Decomposed,
    WidthsFound,
    Fitted,
}

/// Everything `run` needs in one place. The defaults follow the original
/// Heyer & Brunt choices: no mean subtraction, contour spatial widths,
/// walk-down spectral widths, ODR fitting, beam correction on.
#[derive(Debug, Clone)]
pub struct PcaConfig {
    pub mean_sub: bool,
    pub n_eigs: ModeCount,
    /// Stop after the decomposition; the distance metric needs nothing more.
    pub decomp_only: bool,
    pub spatial_method: SpatialMethod,
    pub spectral_method: SpectralMethod,
    pub fit_method: FitMethod,
    /// Deconvolve the beam from the spatial widths. With no beam in the
    /// metadata and no `beam_fwhm_deg` override this is a configuration
    /// error, raised before any width computation starts.
    pub beam_correct: bool,
    pub beam_fwhm_deg: Option<f64>,
}

impl Default for PcaConfig {
    fn default() -> Self {
        Self {
            mean_sub: false,
            n_eigs: ModeCount::Auto {
                min_eigval: 0.99,
                method: EigenCutMethod::Proportion,
            },
            decomp_only: false,
            spatial_method: SpatialMethod::Contour,
            spectral_method: SpectralMethod::WalkDown,
            fit_method: FitMethod::Odr,
            beam_correct: true,
            beam_fwhm_deg: None,
        }
    }
}

/// Results of the decomposition stage, kept together so a failed `compute`
/// can never leave them half-updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DecompositionState {
    cov_matrix: Array2<f64>,
    eigen: EigenDecomposition,
    n_eigs: usize,
    mean_sub: bool,
    total_variance: f64,
    var_proportion: f64,
}

/// Serializable capture of a pipeline at whatever stage it has reached.
/// Restoring one never recomputes anything; when the raw cube payload was
/// dropped, operations that project eigenimages fail with `NotComputed`
/// until a pipeline with data is built again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcaSnapshot {
    meta: CubeMeta,
    data: Option<Array3<f64>>,
    decomposition: Option<DecompositionState>,
    spatial_widths: Option<WidthSet>,
    spectral_widths: Option<WidthSet>,
    fit: Option<PowerLawFit>,
}

/// PCA decomposition and size-linewidth pipeline for one data cube.
#[derive(Debug, Clone)]
pub struct TurbulencePca {
    meta: CubeMeta,
    data: Option<Array3<f64>>,
    decomposition: Option<DecompositionState>,
    spatial_widths: Option<WidthSet>,
    spectral_widths: Option<WidthSet>,
    fit: Option<PowerLawFit>,
}

impl TurbulencePca {
    pub fn new(cube: DataCube) -> Self {
        let (data, meta) = cube.into_parts();
        Self {
            meta,
            data: Some(data),
            decomposition: None,
            spatial_widths: None,
            spectral_widths: None,
            fit: None,
        }
    }

    pub fn meta(&self) -> &CubeMeta {
        &self.meta
    }

    /// The furthest stage this pipeline has reached.
    pub fn stage(&self) -> PipelineStage {
        if self.fit.is_some() {
            PipelineStage::Fitted
        } else if self.spatial_widths.is_some() && self.spectral_widths.is_some() {
            PipelineStage::WidthsFound
        } else if self.decomposition.is_some() {
            PipelineStage::Decomposed
        } else {
            PipelineStage::Built
        }
    }

    fn data(&self) -> Result<&Array3<f64>> {
        self.data
            .as_ref()
            .ok_or(PcaError::NotComputed("new (cube payload was dropped)"))
    }

    fn decomp(&self) -> Result<&DecompositionState> {
        self.decomposition
            .as_ref()
            .ok_or(PcaError::NotComputed("compute"))
    }

    /// Build the channel covariance matrix, eigendecompose it, and resolve
    /// the retained mode count. Replaces any previous decomposition and
    /// invalidates later stages; on error the prior state is untouched.
    pub fn compute(
        &mut self,
        mean_sub: bool,
        n_eigs: ModeCount,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<()> {
        let data = self.data()?;
        let n_channels = data.shape()[0];
        info!(
            "Computing PCA decomposition: {} channels, mean_sub = {}",
            n_channels, mean_sub
        );

        let cov_matrix = channel_covariance(data.view(), mean_sub, progress);
        let eigen = decompose(&cov_matrix)?;
        let n_kept = select_n_eigs(&eigen.eigenvalues, n_eigs)?;
        let state = DecompositionState {
            total_variance: total_variance(&eigen.eigenvalues, mean_sub),
            var_proportion: variance_proportion(&eigen.eigenvalues, n_kept, mean_sub),
            cov_matrix,
            eigen,
            n_eigs: n_kept,
            mean_sub,
        };
        info!(
            "Retaining {} of {} eigenmodes ({:.1}% of variance)",
            state.n_eigs,
            n_channels,
            100.0 * state.var_proportion
        );

        self.decomposition = Some(state);
        self.spatial_widths = None;
        self.spectral_widths = None;
        self.fit = None;
        Ok(())
    }

    pub fn cov_matrix(&self) -> Result<&Array2<f64>> {
        Ok(&self.decomp()?.cov_matrix)
    }

    /// All eigenvalues, descending.
    pub fn eigenvalues(&self) -> Result<&Array1<f64>> {
        Ok(&self.decomp()?.eigen.eigenvalues)
    }

    /// All eigenvectors, columns matching `eigenvalues`.
    pub fn eigenvectors(&self) -> Result<&Array2<f64>> {
        Ok(&self.decomp()?.eigen.eigenvectors)
    }

    pub fn n_eigs(&self) -> Result<usize> {
        Ok(self.decomp()?.n_eigs)
    }

    pub fn mean_sub(&self) -> Result<bool> {
        Ok(self.decomp()?.mean_sub)
    }

    /// Total variance over the usable eigenvalues (the mean-dominated first
    /// mode is excluded when the covariance was not mean-subtracted).
    pub fn total_variance(&self) -> Result<f64> {
        Ok(self.decomp()?.total_variance)
    }

    /// Proportion of variance carried by the retained modes.
    pub fn var_proportion(&self) -> Result<f64> {
        Ok(self.decomp()?.var_proportion)
    }

    /// Resolve an eigenimage request into mode indices: positive counts
    /// take the leading modes, negative counts the trailing `|n|` *valid*
    /// modes, the noise-dominated end of the spectrum.
    fn mode_indices(&self, n_eigs: i64) -> Result<Vec<usize>> {
        let state = self.decomp()?;
        let n_channels = state.eigen.eigenvalues.len();
        if n_eigs == 0 {
            return Err(PcaError::InvalidArgument(
                "eigenimage count must be non-zero".to_owned(),
            ));
        }
        if n_eigs > 0 {
            let n = n_eigs as usize;
            if n > n_channels {
                return Err(PcaError::InvalidArgument(format!(
                    "requested {} eigenimages but the cube has {} channels",
                    n, n_channels
                )));
            }
            Ok((0..n).collect())
        } else {
            let valid = state.eigen.valid_modes();
            let take = (n_eigs.unsigned_abs() as usize).min(valid.len());
            Ok(valid[valid.len() - take..].to_vec())
        }
    }

    /// Project the cube onto eigenvectors, producing one 2D eigenimage per
    /// requested mode (stacked on axis 0, in request order).
    pub fn eigenimages(&self, n_eigs: i64) -> Result<Array3<f64>> {
        let indices = self.mode_indices(n_eigs)?;
        let state = self.decomp()?;
        let data = self.data()?;
        let (n_chan, ny, nx) = (data.shape()[0], data.shape()[1], data.shape()[2]);
        let n_pix = (ny * nx) as f64;

        let mut images = Array3::<f64>::zeros((indices.len(), ny, nx));
        for (out, &mode) in indices.iter().enumerate() {
            let mut image = images.index_axis_mut(Axis(0), out);
            for channel in 0..n_chan {
                let weight = state.eigen.eigenvectors[[channel, mode]];
                let plane = data.index_axis(Axis(0), channel);
                if state.mean_sub {
                    let mean = plane.sum() / n_pix;
                    image.zip_mut_with(&plane, |acc, &v| *acc += (v - mean) * weight);
                } else {
                    image.zip_mut_with(&plane, |acc, &v| *acc += v * weight);
                }
            }
        }
        Ok(images)
    }

    /// 2D autocorrelation of each requested eigenimage, zero lag centred.
    pub fn autocorr_images(&self, n_eigs: i64) -> Result<Array3<f64>> {
        let images = self.eigenimages(n_eigs)?;
        let (n, ny, nx) = images.dim();
        let mut acors = Array3::<f64>::zeros((n, ny, nx));
        for (idx, image) in images.outer_iter().enumerate() {
            acors
                .index_axis_mut(Axis(0), idx)
                .assign(&autocorr_image(image));
        }
        Ok(acors)
    }

    /// 1D autocorrelation of the first `n_eigs` eigenvectors, one row per
    /// mode with zero lag at index 0.
    pub fn autocorr_spec(&self, n_eigs: usize) -> Result<Array2<f64>> {
        let state = self.decomp()?;
        let n_channels = state.eigen.eigenvalues.len();
        if n_eigs == 0 || n_eigs > n_channels {
            return Err(PcaError::InvalidArgument(format!(
                "autocorrelation spectra count must be between 1 and {}, got {}",
                n_channels, n_eigs
            )));
        }
        let mut acors = Array2::<f64>::zeros((n_eigs, n_channels));
        for k in 0..n_eigs {
            acors
                .row_mut(k)
                .assign(&autocorr_vector(state.eigen.eigenvectors.column(k)));
        }
        Ok(acors)
    }

    /// Baseline noise autocorrelation: the mean ACF of the trailing
    /// `|n_eigs|` valid (noise-dominated) eigenmodes.
    pub fn noise_acf(&self, n_eigs: i64) -> Result<Array2<f64>> {
        let acors = self.autocorr_images(n_eigs)?;
        let n_modes = acors.shape()[0] as f64;
        Ok(acors.sum_axis(Axis(0)) / n_modes)
    }

    /// Estimate spatial widths from the retained eigenimages' ACFs, with
    /// the trailing-mode noise ACF subtracted.
    ///
    /// `beam_correct` requires a beam FWHM from `beam_fwhm_deg` or the
    /// metadata; neither being available is a configuration error raised
    /// before any ACF is computed.
    pub fn find_spatial_widths(
        &mut self,
        method: SpatialMethod,
        beam_correct: bool,
        beam_fwhm_deg: Option<f64>,
    ) -> Result<()> {
        let n_eigs = self.decomp()?.n_eigs;
        let beam = if beam_correct {
            let fwhm_deg = beam_fwhm_deg.or(self.meta.beam_fwhm_deg).ok_or_else(|| {
                PcaError::Configuration(
                    "beam correction requested but no beam FWHM is available; provide \
                     `beam_fwhm_deg` or disable the correction"
                        .to_owned(),
                )
            })?;
            Some(BeamCorrection {
                fwhm_deg,
                spatial_cdelt_deg: self.meta.spatial_cdelt_deg,
            })
        } else {
            None
        };

        let acors = self.autocorr_images(n_eigs as i64)?;
        let noise = self.noise_acf(DEFAULT_NOISE_MODES)?;
        let widths = estimate_spatial_widths(acors.view(), Some(noise.view()), method, beam);
        info!(
            "Spatial widths: {} of {} modes finite",
            widths.values.iter().filter(|v| v.is_finite()).count(),
            n_eigs
        );
        self.spatial_widths = Some(widths);
        Ok(())
    }

    /// Estimate spectral widths from the retained eigenvectors' ACFs.
    pub fn find_spectral_widths(&mut self, method: SpectralMethod) -> Result<()> {
        let n_eigs = self.decomp()?.n_eigs;
        let acors = self.autocorr_spec(n_eigs)?;
        let widths = estimate_spectral_widths(acors.view(), method);
        info!(
            "Spectral widths: {} of {} modes finite",
            widths.values.iter().filter(|v| v.is_finite()).count(),
            n_eigs
        );
        self.spectral_widths = Some(widths);
        Ok(())
    }

    fn spatial(&self) -> Result<&WidthSet> {
        self.spatial_widths
            .as_ref()
            .ok_or(PcaError::NotComputed("find_spatial_widths"))
    }

    fn spectral(&self) -> Result<&WidthSet> {
        self.spectral_widths
            .as_ref()
            .ok_or(PcaError::NotComputed("find_spectral_widths"))
    }

    /// Spatial widths of the retained modes, converted to `unit`.
    pub fn spatial_width(&self, unit: SpatialScale) -> Result<Array1<f64>> {
        self.convert_spatial(&self.spatial()?.values, unit)
    }

    pub fn spatial_width_error(&self, unit: SpatialScale) -> Result<Array1<f64>> {
        self.convert_spatial(&self.spatial()?.errors, unit)
    }

    /// Spectral widths of the retained modes, converted to `unit`.
    pub fn spectral_width(&self, unit: SpectralScale) -> Result<Array1<f64>> {
        Ok(self
            .spectral()?
            .values
            .mapv(|v| self.meta.spectral_from_pixels(v, unit)))
    }

    pub fn spectral_width_error(&self, unit: SpectralScale) -> Result<Array1<f64>> {
        Ok(self
            .spectral()?
            .errors
            .mapv(|v| self.meta.spectral_from_pixels(v, unit)))
    }

    fn convert_spatial(&self, pixels: &Array1<f64>, unit: SpatialScale) -> Result<Array1<f64>> {
        let mut out = Array1::<f64>::zeros(pixels.len());
        for (dst, &v) in out.iter_mut().zip(pixels.iter()) {
            *dst = if v.is_finite() {
                self.meta.spatial_from_pixels(v, unit)?
            } else {
                f64::NAN
            };
        }
        Ok(out)
    }

    /// Fit the size-linewidth relation from the measured widths.
    pub fn fit_plaw(&mut self, method: &FitMethod) -> Result<()> {
        let fit = fit_size_linewidth(self.spatial()?, self.spectral()?, method)?;
        info!(
            "Size-linewidth fit: index = {:.3} [{:.3}, {:.3}]",
            fit.index, fit.index_range[0], fit.index_range[1]
        );
        self.fit = Some(fit);
        Ok(())
    }

    fn fit(&self) -> Result<&PowerLawFit> {
        self.fit.as_ref().ok_or(PcaError::NotComputed("fit_plaw"))
    }

    /// Power-law index of the size-linewidth relation.
    pub fn index(&self) -> Result<f64> {
        Ok(self.fit()?.index)
    }

    /// `[low, high]` bounds on the index: one-sigma for ODR, the [15, 85]
    /// credible interval for the Bayesian fit.
    pub fn index_error_range(&self) -> Result<[f64; 2]> {
        Ok(self.fit()?.index_range)
    }

    /// Index with the Brunt empirical calibration applied.
    pub fn gamma(&self) -> Result<f64> {
        Ok(brunt_index_correct(self.fit()?.index))
    }

    /// Error bounds on gamma; each bound is corrected independently.
    pub fn gamma_error_range(&self) -> Result<[f64; 2]> {
        let range = self.fit()?.index_range;
        Ok([brunt_index_correct(range[0]), brunt_index_correct(range[1])])
    }

    /// Fit intercept taken back out of log space, in `unit`.
    pub fn intercept(&self, unit: SpectralScale) -> Result<f64> {
        Ok(self
            .meta
            .spectral_from_pixels(10f64.powf(self.fit()?.log_intercept), unit))
    }

    pub fn intercept_error_range(&self, unit: SpectralScale) -> Result<[f64; 2]> {
        let range = self.fit()?.log_intercept_range;
        Ok([
            self.meta.spectral_from_pixels(10f64.powf(range[0]), unit),
            self.meta.spectral_from_pixels(10f64.powf(range[1]), unit),
        ])
    }

    /// Fitted model `log10(linewidth)` at `log10(size) = x`, pixel units.
    pub fn model(&self, x: f64) -> Result<f64> {
        Ok(self.fit()?.model(x))
    }

    /// Sonic length: the scale where the turbulent linewidth equals the
    /// thermal sound speed at temperature `t`, for mean molecular weight
    /// `mu`. Returns the value and its `[low, high]` bounds in `unit`.
    ///
    /// Error propagation follows the fit engine. The ODR path propagates
    /// the symmetric index and intercept errors in quadrature through the
    /// log derivative of the power law. The Bayesian path never folds
    /// asymmetric errors into a quadrature sum; the sonic length is
    /// recomputed for every posterior sample and the [15, 85] percentiles
    /// are taken.
    pub fn sonic_length(
        &self,
        t: Temperature,
        mu: f64,
        use_gamma: bool,
        unit: SpatialScale,
    ) -> Result<(f64, [f64; 2])> {
        let fit = self.fit()?;
        // Sound speed in channel units, the intercept's natural scale.
        let c_s = self.meta.velocity_to_pixels(t.sound_speed_m_s(mu)?);

        let (index, index_range) = if use_gamma {
            (self.gamma()?, self.gamma_error_range()?)
        } else {
            (fit.index, fit.index_range)
        };
        let intercept = 10f64.powf(fit.log_intercept);
        let lambda = (c_s / intercept).powf(1.0 / index);

        let lambda_range = match &fit.outcome {
            FitOutcome::Odr { .. } => {
                let index_err = (index - index_range[0]).abs();
                let intercept_low = 10f64.powf(fit.log_intercept_range[0]);
                let intercept_err = LOG10_ERR * (intercept - intercept_low).abs() / intercept;
                let term1 = (c_s / intercept).log10() * (index_err / index);
                let term2 = intercept_err / intercept;
                let lambda_err = (lambda / index) * term1.hypot(term2);
                [lambda - lambda_err, lambda + lambda_err]
            }
            FitOutcome::Bayesian {
                index_samples,
                log_intercept_samples,
            } => {
                let lambdas: Vec<f64> = index_samples
                    .iter()
                    .zip(log_intercept_samples)
                    .map(|(&m, &b)| {
                        let m = if use_gamma { brunt_index_correct(m) } else { m };
                        (c_s / 10f64.powf(b)).powf(1.0 / m)
                    })
                    .filter(|v| v.is_finite())
                    .collect();
                if lambdas.is_empty() {
                    warn!("No finite sonic-length posterior samples; bounds are undefined");
                    [f64::NAN, f64::NAN]
                } else {
                    [percentile(&lambdas, 15.0), percentile(&lambdas, 85.0)]
                }
            }
        };

        Ok((
            self.meta.spatial_from_pixels(lambda, unit)?,
            [
                self.meta.spatial_from_pixels(lambda_range[0], unit)?,
                self.meta.spatial_from_pixels(lambda_range[1], unit)?,
            ],
        ))
    }

    /// Run the full pipeline: decomposition, then (unless `decomp_only`)
    /// width estimation and the size-linewidth fit.
    pub fn run(&mut self, config: &PcaConfig, progress: Option<ProgressFn<'_>>) -> Result<()> {
        // Surface an unresolvable beam before the expensive stages.
        if config.beam_correct
            && !config.decomp_only
            && config.beam_fwhm_deg.or(self.meta.beam_fwhm_deg).is_none()
        {
            return Err(PcaError::Configuration(
                "beam correction requested but no beam FWHM is available; provide \
                 `beam_fwhm_deg` or disable the correction"
                    .to_owned(),
            ));
        }

        self.compute(config.mean_sub, config.n_eigs, progress)?;
        if config.decomp_only {
            return Ok(());
        }
        self.find_spatial_widths(
            config.spatial_method,
            config.beam_correct,
            config.beam_fwhm_deg,
        )?;
        self.find_spectral_widths(config.spectral_method)?;
        self.fit_plaw(&config.fit_method)
    }

    /// Capture the pipeline state for persistence; `keep_data = false`
    /// drops the raw cube payload.
    pub fn snapshot(&self, keep_data: bool) -> PcaSnapshot {
        PcaSnapshot {
            meta: self.meta.clone(),
            data: if keep_data { self.data.clone() } else { None },
            decomposition: self.decomposition.clone(),
            spatial_widths: self.spatial_widths.clone(),
            spectral_widths: self.spectral_widths.clone(),
            fit: self.fit.clone(),
        }
    }

    /// Rebuild a pipeline from a snapshot, resuming at the captured stage.
    pub fn from_snapshot(snapshot: PcaSnapshot) -> TurbulencePca {
        TurbulencePca {
            meta: snapshot.meta,
            data: snapshot.data,
            decomposition: snapshot.decomposition,
            spatial_widths: snapshot.spatial_widths,
            spectral_widths: snapshot.spectral_widths,
            fit: snapshot.fit,
        }
    }

    /// Serialize the pipeline state to a bincode file.
    pub fn save_results<P: AsRef<Path>>(&self, path: P, keep_data: bool) -> Result<()> {
        let file = File::create(path.as_ref())
            .map_err(|e| PcaError::Persistence(format!("creating {:?}: {}", path.as_ref(), e)))?;
        let mut writer = BufWriter::new(file);
        bincode::serde::encode_into_std_write(
            self.snapshot(keep_data),
            &mut writer,
            bincode::config::standard(),
        )
        .map_err(|e| PcaError::Persistence(format!("serializing pipeline state: {}", e)))?;
        Ok(())
    }

    /// Restore a pipeline state saved by `save_results`; no recomputation.
    pub fn load_results<P: AsRef<Path>>(path: P) -> Result<TurbulencePca> {
        let file = File::open(path.as_ref())
            .map_err(|e| PcaError::Persistence(format!("opening {:?}: {}", path.as_ref(), e)))?;
        let mut reader = BufReader::new(file);
        let snapshot: PcaSnapshot =
            bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
                .map_err(|e| {
                    PcaError::Persistence(format!("deserializing pipeline state: {}", e))
                })?;
        Ok(Self::from_snapshot(snapshot))
    }
}

/// Empirical index calibration from Brunt's thesis: a broken linear map
/// from the measured PCA index to the underlying structure-function index.
pub fn brunt_index_correct(value: f64) -> f64 {
    if value < 0.67 {
        (value - 0.32) / 0.59
    } else {
        (value - 0.03) / 1.07
    }
}
