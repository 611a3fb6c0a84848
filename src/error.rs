//! Error taxonomy for discretization setup, assembly and the message layer.
//!
//! Public operations return [`eyre::Result`]; the variants below are what ends up inside the
//! report and can be recovered with `report.downcast_ref::<DiscretizationError>()`.
//! All of them are fatal for the whole run: a failure on one rank would otherwise leave
//! the collective protocol out of step.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DiscretizationError {
    /// A configuration key is missing, has the wrong type or a malformed value.
    #[error("configuration error for key `{key}`: {message}")]
    Config { key: String, message: String },

    /// The Jacobian of an element is singular or inverted.
    #[error("degenerate element {element}: Jacobian determinant is {determinant:e}")]
    DegenerateElement { element: usize, determinant: f64 },

    /// A mesh description could not be parsed.
    #[error("failed to parse {}:{line}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// Ownership ranges do not cover the global index set exactly once.
    #[error("inconsistent partition: {0}")]
    PartitionInconsistency(String),

    /// A peer disappeared or sent an unexpected message.
    #[error("communication failure: {0}")]
    Communication(String),

    /// An operation was invoked in a state that does not permit it.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl DiscretizationError {
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn parse(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }
}
