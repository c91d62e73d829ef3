// Eigenvalue-spectrum distance between two cubes.

use log::info;

use crate::cube::DataCube;
use crate::decomposition::ModeCount;
use crate::error::{PcaError, Result};
use crate::pca::{PipelineStage, TurbulencePca};

/// Euclidean distance between the normalized eigenvalue spectra of two
/// decomposed pipelines.
///
/// Each spectrum is the retained eigenvalues (skipping the mean-dominated
/// first mode when that pipeline was not mean-subtracted), normalized to
/// unit sum so the comparison is shape-only. The two pipelines are expected
/// to share `n_eigs` and `mean_sub`; mixing settings is the caller's
/// mistake and only the resulting length mismatch is caught here.
pub fn eigenvalue_distance(a: &TurbulencePca, b: &TurbulencePca) -> Result<f64> {
    let spec_a = normalized_spectrum(a)?;
    let spec_b = normalized_spectrum(b)?;
    if spec_a.len() != spec_b.len() {
        return Err(PcaError::InvalidArgument(format!(
            "eigenvalue spectra have different lengths ({} vs {}); \
             decompose both cubes with the same settings",
            spec_a.len(),
            spec_b.len()
        )));
    }
    Ok(spec_a
        .iter()
        .zip(&spec_b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt())
}

fn normalized_spectrum(pca: &TurbulencePca) -> Result<Vec<f64>> {
    let eigvals = pca.eigenvalues()?;
    let start = if pca.mean_sub()? { 0 } else { 1 };
    // Retained modes only, minus the mean-dominated first one when the
    // covariance was not mean-subtracted (same slice as the variance
    // accounting).
    let slice: Vec<f64> = eigvals
        .iter()
        .take(pca.n_eigs()?)
        .skip(start)
        .copied()
        .collect();
    let total: f64 = slice.iter().sum();
    if slice.is_empty() || total <= 0.0 {
        return Err(PcaError::InsufficientData(
            "no positive eigenvalues available for the distance metric".to_owned(),
        ));
    }
    Ok(slice.iter().map(|v| v / total).collect())
}

/// Distance comparison between two cubes, holding both decomposed
/// pipelines so a fiducial can be reused across many comparisons.
#[derive(Debug)]
pub struct PcaDistance {
    pub pca1: TurbulencePca,
    pub pca2: TurbulencePca,
    pub distance: f64,
}

impl PcaDistance {
    /// Decompose both cubes with the same settings and measure their
    /// distance. `n_eigs` must be `Explicit` or `All`: an eigenvalue-cut
    /// count would differ between the cubes and make the metric
    /// ill-defined.
    pub fn new(cube1: DataCube, cube2: DataCube, n_eigs: ModeCount, mean_sub: bool) -> Result<Self> {
        let mut pca1 = TurbulencePca::new(cube1);
        Self::decompose(&mut pca1, n_eigs, mean_sub)?;
        Self::with_fiducial(pca1, cube2, n_eigs, mean_sub)
    }

    /// Compare a new cube against an already-decomposed fiducial. The
    /// fiducial is decomposed here only if it has not been already.
    pub fn with_fiducial(
        fiducial: TurbulencePca,
        cube2: DataCube,
        n_eigs: ModeCount,
        mean_sub: bool,
    ) -> Result<Self> {
        let mut pca1 = fiducial;
        if pca1.stage() < PipelineStage::Decomposed {
            Self::decompose(&mut pca1, n_eigs, mean_sub)?;
        }
        let mut pca2 = TurbulencePca::new(cube2);
        Self::decompose(&mut pca2, n_eigs, mean_sub)?;

        let distance = eigenvalue_distance(&pca1, &pca2)?;
        info!("Eigenvalue distance: {:.4}", distance);
        Ok(Self {
            pca1,
            pca2,
            distance,
        })
    }

    fn decompose(pca: &mut TurbulencePca, n_eigs: ModeCount, mean_sub: bool) -> Result<()> {
        if matches!(n_eigs, ModeCount::Auto { .. }) {
            return Err(PcaError::InvalidArgument(
                "the distance metric needs a fixed mode count; automatic \
                 eigenvalue cuts would differ between the cubes"
                    .to_owned(),
            ));
        }
        pca.compute(mean_sub, n_eigs, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::CubeMeta;
    use crate::decomposition::EigenCutMethod;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array3, Axis};

    /// Channels hold a Gaussian blob whose centroid drifts with channel
    /// index, so the covariance has several significant modes.
    fn gaussian_cube(sigma: f64, amp: f64) -> DataCube {
        let mut data = Array3::<f64>::zeros((8, 16, 16));
        for c in 0..8 {
            let scale = amp * (1.0 + 0.2 * c as f64);
            let (cy, cx) = (8.0 - 0.6 * c as f64, 5.0 + 0.8 * c as f64);
            let mut plane = data.index_axis_mut(Axis(0), c);
            for ((y, x), v) in plane.indexed_iter_mut() {
                let (dy, dx) = (y as f64 - cy, x as f64 - cx);
                *v = scale * (-(dy * dy + dx * dx) / (2.0 * sigma * sigma)).exp();
            }
        }
        DataCube::new(data, CubeMeta::new(0.002, 150.0)).unwrap()
    }

    #[test]
    fn distance_to_itself_is_zero() {
        let d = PcaDistance::new(
            gaussian_cube(3.0, 1.0),
            gaussian_cube(3.0, 1.0),
            ModeCount::Explicit(4),
            true,
        )
        .unwrap();
        assert_abs_diff_eq!(d.distance, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn distance_is_symmetric() {
        let d12 = PcaDistance::new(
            gaussian_cube(2.0, 1.0),
            gaussian_cube(5.0, 2.0),
            ModeCount::Explicit(4),
            true,
        )
        .unwrap();
        let d21 = PcaDistance::new(
            gaussian_cube(5.0, 2.0),
            gaussian_cube(2.0, 1.0),
            ModeCount::Explicit(4),
            true,
        )
        .unwrap();
        assert_abs_diff_eq!(d12.distance, d21.distance, epsilon = 1e-12);
    }

    #[test]
    fn amplitude_rescaling_does_not_change_the_distance() {
        // Normalized spectra are scale-free: a brighter copy of the same
        // cube is at distance zero.
        let d = PcaDistance::new(
            gaussian_cube(3.0, 1.0),
            gaussian_cube(3.0, 10.0),
            ModeCount::Explicit(4),
            true,
        )
        .unwrap();
        assert_abs_diff_eq!(d.distance, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn raw_covariance_compares_retained_modes_minus_the_mean_mode() {
        // Without mean subtraction the spectra cover eigenvalues 1..n_eigs,
        // the retained set minus the mean-dominated first mode.
        let n_eigs = 4;
        let d = PcaDistance::new(
            gaussian_cube(2.0, 1.0),
            gaussian_cube(5.0, 2.0),
            ModeCount::Explicit(n_eigs),
            false,
        )
        .unwrap();

        let spectrum = |pca: &TurbulencePca| -> Vec<f64> {
            let slice: Vec<f64> = pca
                .eigenvalues()
                .unwrap()
                .iter()
                .take(n_eigs)
                .skip(1)
                .copied()
                .collect();
            let total: f64 = slice.iter().sum();
            slice.iter().map(|v| v / total).collect()
        };
        let (a, b) = (spectrum(&d.pca1), spectrum(&d.pca2));
        assert_eq!(a.len(), n_eigs - 1);
        let expected = a
            .iter()
            .zip(&b)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f64>()
            .sqrt();
        assert_abs_diff_eq!(d.distance, expected, epsilon = 1e-12);
    }

    #[test]
    fn automatic_mode_counts_are_rejected() {
        let err = PcaDistance::new(
            gaussian_cube(2.0, 1.0),
            gaussian_cube(5.0, 1.0),
            ModeCount::Auto {
                min_eigval: 0.99,
                method: EigenCutMethod::Proportion,
            },
            true,
        )
        .unwrap_err();
        assert!(matches!(err, PcaError::InvalidArgument(_)));
    }

    #[test]
    fn fiducial_reuse_matches_a_fresh_comparison() {
        let fresh = PcaDistance::new(
            gaussian_cube(2.0, 1.0),
            gaussian_cube(5.0, 1.0),
            ModeCount::Explicit(4),
            true,
        )
        .unwrap();
        let reused = PcaDistance::with_fiducial(
            fresh.pca1.clone(),
            gaussian_cube(5.0, 1.0),
            ModeCount::Explicit(4),
            true,
        )
        .unwrap();
        assert_abs_diff_eq!(fresh.distance, reused.distance, epsilon = 1e-12);
    }
}
