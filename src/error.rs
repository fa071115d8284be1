//! Errors raised while building or running a reconstruction problem

use thiserror::Error;

/// Errors that can occur while assembling operators and functions,
/// or while running one of the solvers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Two geometries that must agree do not.
    #[error("shape mismatch in {context}: expected {expected}, found {found}")]
    ShapeMismatch {
        context: &'static str,
        expected: String,
        found: String,
    },

    /// A value lies outside the domain of a function and the function
    /// has no extended-real value to fall back on.
    #[error("domain error: {0}")]
    Domain(String),

    /// Invalid step sizes, iteration budgets or block shapes.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The requested map is not defined for this object,
    /// e.g. the gradient of a non-smooth function.
    #[error("{0} is not supported here")]
    Unsupported(&'static str),
}

impl Error {
    pub(crate) fn shape(
        context: &'static str,
        expected: impl std::fmt::Display,
        found: impl std::fmt::Display,
    ) -> Self {
        Error::ShapeMismatch {
            context,
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
