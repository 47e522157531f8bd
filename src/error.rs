//! Error handling module for sqlbatch
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Fatal errors (bad configuration, missing resources, invocation mistakes) are
//! represented here; per-job failures never surface as errors and are only
//! recorded in the job's log directory.

use std::path::PathBuf;

use thiserror::Error;

use crate::pool::PoolError;

/// Main error type for sqlbatch
#[derive(Error, Debug)]
pub enum RunnerError {
    /// IO errors (reading templates, settings, directory traversal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file errors (parsing, invalid values)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required resource file is absent
    #[error("{} does not exist", .0.display())]
    MissingResource(PathBuf),

    /// No mode selected, or more than one
    #[error("Invocation error: {0}")]
    Invocation(String),

    /// Script template or directory layout errors
    #[error("Script error: {0}")]
    Script(String),

    /// Worker pool lifecycle errors
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),
}

/// Result type alias for sqlbatch operations
pub type Result<T> = std::result::Result<T, RunnerError>;

// Convenient error constructors
impl RunnerError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invocation error
    pub fn invocation(msg: impl Into<String>) -> Self {
        Self::Invocation(msg.into())
    }

    /// Create a script error
    pub fn script(msg: impl Into<String>) -> Self {
        Self::Script(msg.into())
    }

    /// Create a missing resource error
    pub fn missing(path: impl Into<PathBuf>) -> Self {
        Self::MissingResource(path.into())
    }

    /// Process exit code the driver reports for this error.
    pub fn exit_code(&self) -> i32 {
        1
    }
}
