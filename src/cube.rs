// Data cube container, metadata, and unit conversions.

use log::debug;
use ndarray::{Array3, ArrayView3};
use serde::{Deserialize, Serialize};

use crate::error::{PcaError, Result};

/// Boltzmann constant [J / K].
pub(crate) const K_B: f64 = 1.380649e-23;
/// Proton mass [kg].
pub(crate) const M_P: f64 = 1.67262192369e-27;

/// Metadata the pipeline needs from the cube's WCS header.
///
/// This is the consumed interface of the external unit/metadata service:
/// magnitudes are stored in fixed reference units (degrees, m/s, parsecs)
/// and converted on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CubeMeta {
    /// Angular size of one spatial pixel [deg], the `CDELT2` equivalent.
    pub spatial_cdelt_deg: f64,
    /// Width of one spectral channel [m/s]. The spectral axis must be in
    /// velocity units; the sign carries the channel ordering and only the
    /// magnitude enters conversions.
    pub spectral_cdelt_m_s: f64,
    /// Beam FWHM [deg], when known.
    pub beam_fwhm_deg: Option<f64>,
    /// Distance to the object [pc], when known.
    pub distance_pc: Option<f64>,
}

impl CubeMeta {
    pub fn new(spatial_cdelt_deg: f64, spectral_cdelt_m_s: f64) -> Self {
        Self {
            spatial_cdelt_deg,
            spectral_cdelt_m_s,
            beam_fwhm_deg: None,
            distance_pc: None,
        }
    }

    pub fn with_beam(mut self, beam_fwhm_deg: f64) -> Self {
        self.beam_fwhm_deg = Some(beam_fwhm_deg);
        self
    }

    pub fn with_distance(mut self, distance_pc: f64) -> Self {
        self.distance_pc = Some(distance_pc);
        self
    }

    fn validate(&self) -> Result<()> {
        if !self.spatial_cdelt_deg.is_finite() || self.spatial_cdelt_deg == 0.0 {
            return Err(PcaError::Unit(format!(
                "spatial pixel scale must be finite and non-zero, got {}",
                self.spatial_cdelt_deg
            )));
        }
        if !self.spectral_cdelt_m_s.is_finite() || self.spectral_cdelt_m_s == 0.0 {
            return Err(PcaError::Unit(format!(
                "spectral channel width must be a finite non-zero velocity, got {}",
                self.spectral_cdelt_m_s
            )));
        }
        Ok(())
    }

    /// Convert a spatial length in pixels to `unit`.
    pub fn spatial_from_pixels(&self, pixels: f64, unit: SpatialScale) -> Result<f64> {
        let deg = pixels * self.spatial_cdelt_deg.abs();
        match unit {
            SpatialScale::Pixel => Ok(pixels),
            SpatialScale::Degree => Ok(deg),
            SpatialScale::Parsec => {
                let distance = self.distance_pc.ok_or_else(|| {
                    PcaError::Unit(
                        "physical spatial units require a distance in the metadata".to_owned(),
                    )
                })?;
                // Small-angle projection at the object's distance.
                Ok(deg.to_radians() * distance)
            }
        }
    }

    /// Convert a spectral width in channels to `unit`.
    pub fn spectral_from_pixels(&self, pixels: f64, unit: SpectralScale) -> f64 {
        match unit {
            SpectralScale::Pixel => pixels,
            SpectralScale::MetersPerSecond => pixels * self.spectral_cdelt_m_s.abs(),
        }
    }

    /// Convert a velocity [m/s] into channel widths.
    pub fn velocity_to_pixels(&self, velocity_m_s: f64) -> f64 {
        velocity_m_s / self.spectral_cdelt_m_s.abs()
    }
}

/// Output unit for spatial widths and the sonic length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialScale {
    Pixel,
    Degree,
    Parsec,
}

/// Output unit for spectral widths and the fit intercept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectralScale {
    Pixel,
    MetersPerSecond,
}

/// A gas temperature in a unit convertible to Kelvin.
#[derive(Debug, Clone, Copy)]
pub enum Temperature {
    Kelvin(f64),
    Celsius(f64),
}

impl Temperature {
    pub fn to_kelvin(self) -> Result<f64> {
        let kelvin = match self {
            Temperature::Kelvin(t) => t,
            Temperature::Celsius(t) => t + 273.15,
        };
        if !kelvin.is_finite() || kelvin < 0.0 {
            return Err(PcaError::Unit(format!(
                "temperature must convert to a non-negative Kelvin value, got {} K",
                kelvin
            )));
        }
        Ok(kelvin)
    }

    /// Isothermal sound speed [m/s] for mean molecular weight `mu`.
    pub fn sound_speed_m_s(self, mu: f64) -> Result<f64> {
        let t_k = self.to_kelvin()?;
        if !mu.is_finite() || mu <= 0.0 {
            return Err(PcaError::Unit(format!(
                "mean molecular weight must be positive, got {}",
                mu
            )));
        }
        Ok((K_B * t_k / (mu * M_P)).sqrt())
    }
}

/// A spectral-line data cube: channels on axis 0, two spatial axes after.
///
/// Construction replaces non-finite samples with `f64::EPSILON`. Empty
/// channels full of exact zeros make the covariance matrix degenerate and
/// leave the eigenvectors with significant imaginary components, so the
/// patch value is a tiny epsilon rather than zero. The input array is
/// consumed; caller-owned data is never patched in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataCube {
    data: Array3<f64>,
    meta: CubeMeta,
}

impl DataCube {
    pub fn new(data: Array3<f64>, meta: CubeMeta) -> Result<Self> {
        meta.validate()?;
        if data.is_empty() {
            return Err(PcaError::InvalidArgument(
                "data cube has zero samples".to_owned(),
            ));
        }
        let (data, n_patched) = patch_non_finite(data);
        if n_patched > 0 {
            debug!(
                "Replaced {} non-finite cube samples with machine epsilon",
                n_patched
            );
        }
        Ok(Self { data, meta })
    }

    /// Number of spectral channels.
    pub fn n_channels(&self) -> usize {
        self.data.shape()[0]
    }

    /// Spatial shape `(ny, nx)`.
    pub fn spatial_shape(&self) -> (usize, usize) {
        (self.data.shape()[1], self.data.shape()[2])
    }

    pub fn data(&self) -> ArrayView3<'_, f64> {
        self.data.view()
    }

    pub fn meta(&self) -> &CubeMeta {
        &self.meta
    }

    pub(crate) fn into_parts(self) -> (Array3<f64>, CubeMeta) {
        (self.data, self.meta)
    }
}

/// Replace non-finite samples with `f64::EPSILON`, returning the cleaned
/// array and the number of samples patched.
fn patch_non_finite(mut data: Array3<f64>) -> (Array3<f64>, usize) {
    let mut n_patched = 0usize;
    data.mapv_inplace(|v| {
        if v.is_finite() {
            v
        } else {
            n_patched += 1;
            f64::EPSILON
        }
    });
    (data, n_patched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;

    fn meta() -> CubeMeta {
        CubeMeta::new(0.001, 200.0)
    }

    #[test]
    fn non_finite_samples_become_epsilon() {
        let mut data = Array3::<f64>::ones((2, 3, 3));
        data[[0, 1, 1]] = f64::NAN;
        data[[1, 2, 0]] = f64::INFINITY;

        let cube = DataCube::new(data, meta()).unwrap();
        assert_abs_diff_eq!(cube.data()[[0, 1, 1]], f64::EPSILON);
        assert_abs_diff_eq!(cube.data()[[1, 2, 0]], f64::EPSILON);
        assert_abs_diff_eq!(cube.data()[[0, 0, 0]], 1.0);
    }

    #[test]
    fn zero_channel_width_is_a_unit_error() {
        let data = Array3::<f64>::ones((2, 2, 2));
        let err = DataCube::new(data, CubeMeta::new(0.001, 0.0)).unwrap_err();
        assert!(matches!(err, PcaError::Unit(_)));
    }

    #[test]
    fn physical_scale_requires_distance() {
        let err = meta().spatial_from_pixels(3.0, SpatialScale::Parsec).unwrap_err();
        assert!(matches!(err, PcaError::Unit(_)));

        let with_dist = meta().with_distance(250.0);
        let pc = with_dist.spatial_from_pixels(1.0, SpatialScale::Parsec).unwrap();
        assert_abs_diff_eq!(pc, 0.001f64.to_radians() * 250.0, epsilon = 1e-12);
    }

    #[test]
    fn temperature_conversions() {
        assert_abs_diff_eq!(
            Temperature::Celsius(-263.15).to_kelvin().unwrap(),
            10.0,
            epsilon = 1e-9
        );
        assert!(Temperature::Kelvin(-1.0).to_kelvin().is_err());

        // 10 K, mu = 1.36: the standard cold-ISM sound speed, ~246 m/s.
        let c_s = Temperature::Kelvin(10.0).sound_speed_m_s(1.36).unwrap();
        assert_abs_diff_eq!(c_s, 246.6, epsilon = 0.5);
    }
}
