//! Errors raised by hg-core's geometry and tile-key checks.

use thiserror::Error;

pub type HgResult<T> = Result<T, HgError>;

/// Rejected input to a core constructor or geometry helper.
///
/// Higher layers wrap this (`GraphError::Core`, `ConfigError::Invalid`), so
/// messages name the offending field rather than the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HgError {
    /// A coordinate, width or size was NaN or infinite.
    #[error("{what} must be finite, got {value}")]
    NonFinite { what: &'static str, value: f64 },

    /// A tile key, capacity or configuration value outside its allowed range.
    #[error("invalid argument: {what}")]
    InvalidArg { what: &'static str },
}
