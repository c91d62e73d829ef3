// PCA turbulence diagnostics for spectral-line data cubes.

#![doc = include_str!("../README.md")]

pub mod acf;
pub mod covariance;
pub mod cube;
pub mod decomposition;
pub mod distance;
pub mod error;
pub mod fitting;
pub mod pca;
pub mod widths;

pub use covariance::{channel_covariance, ProgressFn};
pub use cube::{CubeMeta, DataCube, SpatialScale, SpectralScale, Temperature};
pub use decomposition::{EigenCutMethod, EigenDecomposition, ModeCount};
pub use distance::{eigenvalue_distance, PcaDistance};
pub use error::{PcaError, Result};
pub use fitting::{FitMethod, FitOutcome, McmcConfig, PowerLawFit};
pub use pca::{brunt_index_correct, PcaConfig, PcaSnapshot, PipelineStage, TurbulencePca};
pub use widths::{SpatialMethod, SpectralMethod, WidthSet};
