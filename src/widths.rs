// Spatial and spectral width estimation from autocorrelation functions.
//
// All widths follow the Heyer & Brunt normalization: a Gaussian field of
// standard deviation sigma measures as sigma / sqrt(2). In ACF terms the
// characteristic width is half the 1/e radius of the (peak-normalized)
// autocorrelation. Per-mode failures produce NaN entries, which the fit
// stage drops; they never abort the pass.

use log::warn;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayView3};
use ndarray_linalg::Solve;
use serde::{Deserialize, Serialize};

const INV_E: f64 = 0.36787944117144233;

/// Spatial width estimation algorithms for 2D ACFs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpatialMethod {
    /// Ellipse fit to the 1/e contour about the peak (the Heyer & Brunt
    /// method; the default).
    Contour,
    /// 2D Gaussian fit to the ACF core.
    Fit,
    /// 1/e crossing of the azimuthally averaged radial profile.
    Interpolate,
    /// Gaussian fit to circularize the ACF, then radial interpolation.
    XInterpolate,
}

/// Spectral width estimation algorithms for 1D ACFs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpectralMethod {
    /// Step outward from the zero-lag peak until the ACF falls to 1/e
    /// (the Heyer & Brunt method; the default).
    WalkDown,
    /// Gaussian fit to the ACF core.
    Fit,
    /// Quadratic interpolation through the channels bracketing the 1/e
    /// crossing.
    Interpolate,
}

/// Per-mode width measurements with one-sigma errors, in pixel units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WidthSet {
    pub values: Array1<f64>,
    pub errors: Array1<f64>,
}

impl WidthSet {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Beam parameters for the Brunt deconvolution correction.
#[derive(Debug, Clone, Copy)]
pub struct BeamCorrection {
    /// Beam FWHM [deg].
    pub fwhm_deg: f64,
    /// Angular pixel scale [deg / pix].
    pub spatial_cdelt_deg: f64,
}

impl BeamCorrection {
    fn sigma_pixels(&self) -> f64 {
        // FWHM -> sigma, then into pixels.
        (self.fwhm_deg / (8.0 * std::f64::consts::LN_2).sqrt()) / self.spatial_cdelt_deg.abs()
    }

    /// Subtract the beam in quadrature. The beam sigma carries the same
    /// 1/sqrt(2) normalization as the measured widths.
    fn apply(&self, width: f64, error: f64) -> (f64, f64) {
        let beam_term = self.sigma_pixels().powi(2) / 2.0;
        let corrected_sq = width * width - beam_term;
        if corrected_sq <= 0.0 {
            warn!(
                "Measured width {:.3} pix is below the beam scale; dropping mode",
                width
            );
            return (f64::NAN, f64::NAN);
        }
        let corrected = corrected_sq.sqrt();
        (corrected, error * width / corrected)
    }
}

/// Estimate a characteristic spatial width for each 2D ACF in the stack.
///
/// The optional noise ACF is subtracted from every plane before the plane
/// is normalized to its central peak. Beam correction, when requested, is
/// applied to the finished pixel widths.
pub fn estimate_spatial_widths(
    acors: ArrayView3<'_, f64>,
    noise_acf: Option<ArrayView2<'_, f64>>,
    method: SpatialMethod,
    beam: Option<BeamCorrection>,
) -> WidthSet {
    let n_modes = acors.shape()[0];
    let mut values = Array1::<f64>::from_elem(n_modes, f64::NAN);
    let mut errors = Array1::<f64>::from_elem(n_modes, f64::NAN);

    for (idx, plane) in acors.outer_iter().enumerate() {
        let mut z = plane.to_owned();
        if let Some(noise) = noise_acf {
            z -= &noise;
        }
        match normalized_to_peak(z) {
            Some(z) => {
                let (mut w, mut e) = match method {
                    SpatialMethod::Contour => contour_width(&z),
                    SpatialMethod::Fit => gaussian_fit_width(&z),
                    SpatialMethod::Interpolate => radial_interp_width(&z),
                    SpatialMethod::XInterpolate => circularized_interp_width(&z),
                };
                if let (Some(corr), true) = (beam, w.is_finite()) {
                    let (cw, ce) = corr.apply(w, e);
                    w = cw;
                    e = ce;
                }
                values[idx] = w;
                errors[idx] = e;
            }
            None => warn!("Eigenimage ACF {} has a non-positive peak; skipping", idx),
        }
    }

    WidthSet { values, errors }
}

/// Estimate a characteristic spectral width for each 1D ACF (one row per
/// mode, zero lag at index 0).
pub fn estimate_spectral_widths(acors: ArrayView2<'_, f64>, method: SpectralMethod) -> WidthSet {
    let n_modes = acors.shape()[0];
    let mut values = Array1::<f64>::from_elem(n_modes, f64::NAN);
    let mut errors = Array1::<f64>::from_elem(n_modes, f64::NAN);

    for (idx, row) in acors.outer_iter().enumerate() {
        let peak = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if !(peak > 0.0) {
            warn!("Eigenvector ACF {} has a non-positive peak; skipping", idx);
            continue;
        }
        let norm = row.mapv(|v| v / peak);
        let (w, e) = match method {
            SpectralMethod::WalkDown => walk_down_width(norm.view(), false),
            SpectralMethod::Fit => spectral_fit_width(norm.view()),
            SpectralMethod::Interpolate => walk_down_width(norm.view(), true),
        };
        values[idx] = w;
        errors[idx] = e;
    }

    WidthSet { values, errors }
}

fn normalized_to_peak(mut z: Array2<f64>) -> Option<Array2<f64>> {
    let (ny, nx) = z.dim();
    let peak = z[[ny / 2, nx / 2]];
    if !(peak > 0.0) {
        return None;
    }
    z.mapv_inplace(|v| v / peak);
    Some(z)
}

/// Bilinear sample at fractional pixel coordinates; None outside the array.
fn sample(z: &Array2<f64>, y: f64, x: f64) -> Option<f64> {
    let (ny, nx) = z.dim();
    if y < 0.0 || x < 0.0 || y > (ny - 1) as f64 || x > (nx - 1) as f64 {
        return None;
    }
    let (y0, x0) = (y.floor() as usize, x.floor() as usize);
    let (y1, x1) = ((y0 + 1).min(ny - 1), (x0 + 1).min(nx - 1));
    let (fy, fx) = (y - y0 as f64, x - x0 as f64);
    let top = z[[y0, x0]] * (1.0 - fx) + z[[y0, x1]] * fx;
    let bottom = z[[y1, x0]] * (1.0 - fx) + z[[y1, x1]] * fx;
    Some(top * (1.0 - fy) + bottom * fy)
}

/// Walk outward from the peak along `theta` until the ACF drops below 1/e;
/// linearly interpolate the crossing radius.
fn radial_crossing(z: &Array2<f64>, theta: f64) -> Option<f64> {
    let (ny, nx) = z.dim();
    let (cy, cx) = ((ny / 2) as f64, (nx / 2) as f64);
    let (dy, dx) = (theta.sin(), theta.cos());
    let step = 0.25;
    let mut prev_r = 0.0;
    let mut prev_v = 1.0;
    let mut r = step;
    loop {
        let v = sample(z, cy + r * dy, cx + r * dx)?;
        if v < INV_E {
            let frac = (prev_v - INV_E) / (prev_v - v);
            return Some(prev_r + frac * step);
        }
        prev_r = r;
        prev_v = v;
        r += step;
    }
}

/// Ellipse fit to the 1/e contour. Crossing radii are sampled over position
/// angle and fitted in the conic radial form `1/r^2 = a0 + a1 cos(2t) +
/// a2 sin(2t)`; the width is half the geometric mean of the semi-axes.
fn contour_width(z: &Array2<f64>) -> (f64, f64) {
    const N_ANGLES: usize = 72;
    let mut samples: Vec<(f64, f64)> = Vec::with_capacity(N_ANGLES);
    for k in 0..N_ANGLES {
        let theta = 2.0 * std::f64::consts::PI * k as f64 / N_ANGLES as f64;
        if let Some(r) = radial_crossing(z, theta) {
            if r > 0.0 {
                samples.push((theta, r));
            }
        }
    }
    if samples.len() < 8 {
        return (f64::NAN, f64::NAN);
    }

    // Normal equations for the three conic coefficients.
    let mut ata = Array2::<f64>::zeros((3, 3));
    let mut atb = Array1::<f64>::zeros(3);
    for &(theta, r) in &samples {
        let row = [1.0, (2.0 * theta).cos(), (2.0 * theta).sin()];
        let u = 1.0 / (r * r);
        for i in 0..3 {
            for j in 0..3 {
                ata[[i, j]] += row[i] * row[j];
            }
            atb[i] += row[i] * u;
        }
    }
    let coeffs = match ata.solve(&atb) {
        Ok(c) => c,
        Err(_) => return (f64::NAN, f64::NAN),
    };
    let amp = coeffs[1].hypot(coeffs[2]);
    let (u_major, u_minor) = (coeffs[0] - amp, coeffs[0] + amp);
    if u_major <= 0.0 {
        // Open contour: the 1/e level never closes into an ellipse.
        return (f64::NAN, f64::NAN);
    }
    let semi_major = 1.0 / u_major.sqrt();
    let semi_minor = 1.0 / u_minor.sqrt();
    let width = (semi_major * semi_minor).sqrt() / 2.0;

    // Scatter of the measured radii about the fitted ellipse.
    let mut ss = 0.0;
    for &(theta, r) in &samples {
        let u = coeffs[0] + coeffs[1] * (2.0 * theta).cos() + coeffs[2] * (2.0 * theta).sin();
        if u > 0.0 {
            let r_fit = 1.0 / u.sqrt();
            ss += (r - r_fit).powi(2);
        }
    }
    let rms = (ss / samples.len() as f64).sqrt();
    (width, rms / (samples.len() as f64).sqrt() / 2.0)
}

/// 2x2 symmetric inverse-covariance form of a Gaussian fitted to the ACF
/// core by weighted log-quadratic least squares.
struct GaussianQuadFit {
    m11: f64,
    m12: f64,
    m22: f64,
    /// Weighted rms of the log residuals.
    wrms: f64,
    n_pts: usize,
}

impl GaussianQuadFit {
    /// Eigenvalues of the inverse-covariance form, both positive for a
    /// closed (elliptical) fit.
    fn principal_curvatures(&self) -> (f64, f64) {
        let trace = self.m11 + self.m22;
        let det = self.m11 * self.m22 - self.m12 * self.m12;
        let disc = (trace * trace / 4.0 - det).max(0.0).sqrt();
        (trace / 2.0 + disc, trace / 2.0 - disc)
    }

    /// Geometric-mean sigma of the fitted Gaussian.
    fn sigma_gm(&self) -> f64 {
        let (l1, l2) = self.principal_curvatures();
        (1.0 / (l1 * l2).sqrt()).sqrt()
    }

    /// Radius of the circle holding the same Gaussian level as the offset
    /// `(dy, dx)`: elliptical level sets map onto circles of the
    /// geometric-mean sigma.
    fn circularized_radius(&self, dy: f64, dx: f64) -> f64 {
        let s = self.m11 * dx * dx + 2.0 * self.m12 * dx * dy + self.m22 * dy * dy;
        self.sigma_gm() * s.max(0.0).sqrt()
    }
}

fn fit_gaussian_quadratic(z: &Array2<f64>) -> Option<GaussianQuadFit> {
    let (ny, nx) = z.dim();
    let (cy, cx) = ((ny / 2) as f64, (nx / 2) as f64);
    let r_max = (ny.min(nx) / 2) as f64 - 1.0;

    let mut ata = Array2::<f64>::zeros((6, 6));
    let mut atb = Array1::<f64>::zeros(6);
    let mut n_pts = 0usize;
    let mut wsum = 0.0;
    for ((y, x), &v) in z.indexed_iter() {
        let (dy, dx) = (y as f64 - cy, x as f64 - cx);
        if v <= 0.05 || dy.hypot(dx) > r_max {
            continue;
        }
        let row = [1.0, dx, dy, dx * dx, dx * dy, dy * dy];
        let target = v.ln();
        let w = v; // value-weighting approximates a fit in linear space
        for i in 0..6 {
            for j in 0..6 {
                ata[[i, j]] += w * row[i] * row[j];
            }
            atb[i] += w * row[i] * target;
        }
        n_pts += 1;
        wsum += w;
    }
    if n_pts < 12 {
        return None;
    }
    let c = ata.solve(&atb).ok()?;

    // ln z = c0 + ... - (d^T M d) / 2 with M the inverse covariance.
    let fit = GaussianQuadFit {
        m11: -2.0 * c[3],
        m12: -c[4],
        m22: -2.0 * c[5],
        wrms: 0.0,
        n_pts,
    };
    let (l1, l2) = fit.principal_curvatures();
    if l1 <= 0.0 || l2 <= 0.0 {
        return None;
    }

    // Weighted rms of the log residuals for the error estimate.
    let mut ss = 0.0;
    for ((y, x), &v) in z.indexed_iter() {
        let (dy, dx) = (y as f64 - cy, x as f64 - cx);
        if v <= 0.05 || dy.hypot(dx) > r_max {
            continue;
        }
        let model = c[0]
            + c[1] * dx
            + c[2] * dy
            + c[3] * dx * dx
            + c[4] * dx * dy
            + c[5] * dy * dy;
        ss += v * (v.ln() - model).powi(2);
    }
    Some(GaussianQuadFit {
        wrms: (ss / wsum).sqrt(),
        ..fit
    })
}

fn gaussian_fit_width(z: &Array2<f64>) -> (f64, f64) {
    match fit_gaussian_quadratic(z) {
        Some(fit) => {
            let width = fit.sigma_gm() / std::f64::consts::SQRT_2;
            (width, width * fit.wrms / (fit.n_pts as f64).sqrt())
        }
        None => (f64::NAN, f64::NAN),
    }
}

/// Azimuthally averaged radial profile in unit-pixel bins.
fn radial_profile(z: &Array2<f64>, radius_of: impl Fn(f64, f64) -> f64) -> Vec<f64> {
    let (ny, nx) = z.dim();
    let (cy, cx) = ((ny / 2) as f64, (nx / 2) as f64);
    let n_bins = ny.min(nx) / 2;
    let mut sums = vec![0.0; n_bins];
    let mut counts = vec![0usize; n_bins];
    for ((y, x), &v) in z.indexed_iter() {
        let r = radius_of(y as f64 - cy, x as f64 - cx);
        let bin = r.floor() as usize;
        if bin < n_bins {
            sums[bin] += v;
            counts[bin] += 1;
        }
    }
    sums.iter()
        .zip(&counts)
        .map(|(&s, &c)| if c > 0 { s / c as f64 } else { f64::NAN })
        .collect()
}

fn profile_crossing(profile: &[f64]) -> Option<f64> {
    for b in 1..profile.len() {
        let (p0, p1) = (profile[b - 1], profile[b]);
        if !p0.is_finite() || !p1.is_finite() {
            return None;
        }
        if p1 < INV_E {
            // Bin centres sit at b - 0.5 and b + 0.5.
            let frac = (p0 - INV_E) / (p0 - p1);
            return Some((b as f64 - 0.5) + frac);
        }
    }
    None
}

fn radial_interp_width(z: &Array2<f64>) -> (f64, f64) {
    let profile = radial_profile(z, |dy, dx| dy.hypot(dx));
    match profile_crossing(&profile) {
        Some(r_e) => (r_e / 2.0, 0.25),
        None => (f64::NAN, f64::NAN),
    }
}

/// Circularize an elliptical ACF with a Gaussian fit, then interpolate the
/// 1/e crossing of the circularized radial profile.
fn circularized_interp_width(z: &Array2<f64>) -> (f64, f64) {
    let fit = match fit_gaussian_quadratic(z) {
        Some(fit) => fit,
        None => return (f64::NAN, f64::NAN),
    };
    let profile = radial_profile(z, |dy, dx| fit.circularized_radius(dy, dx));
    match profile_crossing(&profile) {
        Some(r_e) => (r_e / 2.0, 0.25),
        None => (f64::NAN, f64::NAN),
    }
}

/// Walk outward from the zero-lag peak until the ACF falls to 1/e.
///
/// `refine` switches from linear interpolation of the crossing channel to a
/// local quadratic through the bracketing channels.
fn walk_down_width(acf: ArrayView1<'_, f64>, refine: bool) -> (f64, f64) {
    let half = acf.len() / 2;
    for j in 1..=half {
        if acf[j] < INV_E {
            let (p0, p1) = (acf[j - 1], acf[j]);
            let linear = (j as f64 - 1.0) + (p0 - INV_E) / (p0 - p1);
            if !refine || j + 1 > half {
                // Crossing resolved to within one channel.
                return (linear / 2.0, 0.5);
            }
            // Quadratic through (j-1, j, j+1) in the local offset t, solved
            // for the 1/e level; the crossing root lies in [-1, 0].
            let p2 = acf[j + 1];
            let a = (p2 - 2.0 * p1 + p0) / 2.0;
            let b = (p2 - p0) / 2.0;
            let c = p1 - INV_E;
            let mut crossing = linear;
            if a.abs() > 1e-12 {
                let disc = b * b - 4.0 * a * c;
                if disc >= 0.0 {
                    let sq = disc.sqrt();
                    for root in [(-b + sq) / (2.0 * a), (-b - sq) / (2.0 * a)] {
                        if (-1.0..=0.0).contains(&root) {
                            crossing = j as f64 + root;
                            break;
                        }
                    }
                }
            }
            return (crossing / 2.0, 0.25);
        }
    }
    (f64::NAN, f64::NAN)
}

/// Gaussian fit to the 1D ACF core: ln p = c - lag^2 / (2 sigma^2).
fn spectral_fit_width(acf: ArrayView1<'_, f64>) -> (f64, f64) {
    // Core-only fit: tail lags pick up wrap-around and mean-removal
    // artifacts that bias the log-quadratic.
    let half = acf.len() / 2;
    let pts: Vec<(f64, f64)> = (0..=half)
        .take_while(|&j| acf[j] > 0.2)
        .map(|j| (j as f64, acf[j].ln()))
        .collect();
    if pts.len() < 4 {
        return (f64::NAN, f64::NAN);
    }
    // Two-parameter least squares on [1, -lag^2].
    let (mut s_ww, mut s_w, mut s_1, mut s_wy, mut s_y) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for &(lag, ln_p) in &pts {
        let q = -lag * lag;
        s_ww += q * q;
        s_w += q;
        s_1 += 1.0;
        s_wy += q * ln_p;
        s_y += ln_p;
    }
    let det = s_ww * s_1 - s_w * s_w;
    if det.abs() < 1e-12 {
        return (f64::NAN, f64::NAN);
    }
    let inv_two_sigma_sq = (s_wy * s_1 - s_w * s_y) / det;
    if inv_two_sigma_sq <= 0.0 {
        return (f64::NAN, f64::NAN);
    }
    let sigma_acf = (1.0 / (2.0 * inv_two_sigma_sq)).sqrt();
    let c0 = (s_ww * s_y - s_w * s_wy) / det;
    let mut ss = 0.0;
    for &(lag, ln_p) in &pts {
        ss += (ln_p - (c0 - inv_two_sigma_sq * lag * lag)).powi(2);
    }
    let rms = (ss / pts.len() as f64).sqrt();
    let width = sigma_acf / std::f64::consts::SQRT_2;
    (width, width * rms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acf::autocorr_vector;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array2, Array3};
    use rand::Rng;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// A centered 2D Gaussian, used directly as a stand-in ACF.
    fn gaussian_plane(n: usize, sigma: f64) -> Array2<f64> {
        let c = (n / 2) as f64;
        Array2::from_shape_fn((n, n), |(y, x)| {
            let (dy, dx) = (y as f64 - c, x as f64 - c);
            (-(dy * dy + dx * dx) / (2.0 * sigma * sigma)).exp()
        })
    }

    fn as_stack(plane: Array2<f64>) -> Array3<f64> {
        let (ny, nx) = plane.dim();
        plane.into_shape_with_order((1, ny, nx)).unwrap()
    }

    #[test]
    fn contour_recovers_the_heyer_brunt_width() {
        // sigma = 10 pix Gaussian fed straight through as an ACF: the
        // normalization convention demands 10 / sqrt(2).
        let mut plane = gaussian_plane(128, 10.0);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        plane.mapv_inplace(|v| v + 0.001 * rng.gen_range(-1.0..1.0));

        let expected = 10.0 / std::f64::consts::SQRT_2;
        let widths = estimate_spatial_widths(
            as_stack(plane).view(),
            None,
            SpatialMethod::Contour,
            None,
        );
        assert!((widths.values[0] - expected).abs() / expected < 0.02);
        assert!(widths.errors[0] < 0.1);
    }

    #[test]
    fn all_spatial_methods_agree_on_a_noiseless_gaussian() {
        let expected = 10.0 / std::f64::consts::SQRT_2;
        for method in [
            SpatialMethod::Contour,
            SpatialMethod::Fit,
            SpatialMethod::Interpolate,
            SpatialMethod::XInterpolate,
        ] {
            let widths = estimate_spatial_widths(
                as_stack(gaussian_plane(128, 10.0)).view(),
                None,
                method,
                None,
            );
            assert!(
                (widths.values[0] - expected).abs() / expected < 0.02,
                "{:?} gave {}",
                method,
                widths.values[0]
            );
        }
    }

    #[test]
    fn noise_acf_subtraction_removes_a_flat_pedestal() {
        let plane = gaussian_plane(64, 8.0) + 0.2;
        let pedestal = Array2::from_elem((64, 64), 0.2);
        let widths = estimate_spatial_widths(
            as_stack(plane).view(),
            Some(pedestal.view()),
            SpatialMethod::Contour,
            None,
        );
        let expected = 8.0 / std::f64::consts::SQRT_2;
        assert!((widths.values[0] - expected).abs() / expected < 0.02);
    }

    #[test]
    fn beam_correction_shrinks_widths_and_drops_unresolved_modes() {
        let beam = BeamCorrection {
            fwhm_deg: 2.0,
            spatial_cdelt_deg: 0.1,
        };
        let uncorrected = estimate_spatial_widths(
            as_stack(gaussian_plane(128, 10.0)).view(),
            None,
            SpatialMethod::Contour,
            None,
        );
        let corrected = estimate_spatial_widths(
            as_stack(gaussian_plane(128, 10.0)).view(),
            None,
            SpatialMethod::Contour,
            Some(beam),
        );
        assert!(corrected.values[0] < uncorrected.values[0]);
        let sigma_b = beam.sigma_pixels();
        let expect = (uncorrected.values[0].powi(2) - sigma_b * sigma_b / 2.0).sqrt();
        assert_abs_diff_eq!(corrected.values[0], expect, epsilon = 1e-9);

        // A width entirely below the beam scale is unresolved.
        let tiny = estimate_spatial_widths(
            as_stack(gaussian_plane(64, 1.0)).view(),
            None,
            SpatialMethod::Fit,
            Some(BeamCorrection {
                fwhm_deg: 10.0,
                spatial_cdelt_deg: 0.1,
            }),
        );
        assert!(tiny.values[0].is_nan());
    }

    #[test]
    fn spectral_methods_recover_a_gaussian_linewidth() {
        // Real FFT ACF of a sigma = 10 Gaussian profile; every method
        // should land on 10 to within its own channel-level error.
        let n = 256;
        let spectrum = Array1::from_shape_fn(n, |i| {
            let d = i as f64 - 128.0;
            (-(d * d) / 200.0).exp()
        });
        let acf = autocorr_vector(spectrum.view());
        let peak = acf[0];
        let stack = acf
            .mapv(|v| v / peak)
            .into_shape_with_order((1, n))
            .unwrap();

        for method in [
            SpectralMethod::WalkDown,
            SpectralMethod::Fit,
            SpectralMethod::Interpolate,
        ] {
            let widths = estimate_spectral_widths(stack.view(), method);
            let err = widths.errors[0].max(0.5);
            assert!(
                (widths.values[0] - 10.0).abs() <= err,
                "{:?} gave {} +/- {}",
                method,
                widths.values[0],
                widths.errors[0]
            );
        }
    }

    #[test]
    fn walk_down_flags_an_acf_that_never_decays() {
        let flat = Array2::from_elem((1, 32), 1.0);
        let widths = estimate_spectral_widths(flat.view(), SpectralMethod::WalkDown);
        assert!(widths.values[0].is_nan());
    }
}
