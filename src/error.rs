// Error taxonomy for the PCA pipeline.

use std::error::Error;
use std::fmt;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PcaError>;

/// Errors raised by the PCA pipeline.
///
/// Every fatal condition aborts only the operation that raised it; pipeline
/// stages that were already computed stay valid and reachable.
#[derive(Debug)]
pub enum PcaError {
    /// Caller-fixable argument problem (mode count, method selection, shapes).
    InvalidArgument(String),
    /// Numerical failure in the eigendecomposition.
    Decomposition(String),
    /// Fewer than 2 usable width pairs for the size-linewidth fit.
    InsufficientData(String),
    /// Beam correction requested without a resolvable beam FWHM.
    Configuration(String),
    /// Unit conversion is impossible with the available metadata.
    Unit(String),
    /// An accessor was called before the stage that produces its value ran.
    NotComputed(&'static str),
    /// Saving or loading a results snapshot failed.
    Persistence(String),
}

impl fmt::Display for PcaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PcaError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            PcaError::Decomposition(msg) => write!(f, "eigendecomposition failed: {}", msg),
            PcaError::InsufficientData(msg) => write!(f, "insufficient data: {}", msg),
            PcaError::Configuration(msg) => write!(f, "configuration error: {}", msg),
            PcaError::Unit(msg) => write!(f, "unit error: {}", msg),
            PcaError::NotComputed(stage) => {
                write!(f, "precursor not computed: run `{}` first", stage)
            }
            PcaError::Persistence(msg) => write!(f, "persistence error: {}", msg),
        }
    }
}

impl Error for PcaError {}
