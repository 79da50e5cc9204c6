//! Error types for the CosmoFlow launcher
//!
//! Every failure is immediate and fatal to the single process; nothing in
//! this crate retries.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for launcher operations
#[derive(Error, Debug)]
pub enum LaunchError {
    /// I/O error during file operations
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Synthetic data cannot be generated at this width
    #[error("Unsupported width {width} for synthetic data: {reason}")]
    InvalidSyntheticWidth { width: u32, reason: &'static str },

    /// Process topology that cannot be laid out on the node
    #[error("Invalid process topology: {0}")]
    InvalidTopology(String),

    /// Layer configuration the exporter does not understand
    #[error("Unsupported layer '{layer}': {message}")]
    UnsupportedLayer { layer: String, message: String },

    /// A layer input has no registered shape
    #[error("No input shape registered for '{0}'")]
    MissingInputShape(String),

    /// Exported attribute differs from the reference node
    #[error("Attribute '{name}' mismatch: exported {exported}, reference {reference}")]
    AttributeMismatch {
        name: String,
        exported: String,
        reference: String,
    },

    /// Attribute present on one node but not the other
    #[error("Attribute '{name}' missing from {side} node")]
    MissingAttribute { name: String, side: &'static str },

    /// Scheduler submission or script execution failed
    #[error("Scheduler error ({command}): {message}")]
    Scheduler { command: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<LaunchError>,
    },
}

impl LaunchError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Create an unsupported-layer error
    pub fn unsupported_layer(layer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnsupportedLayer {
            layer: layer.into(),
            message: message.into(),
        }
    }

    /// Create a scheduler error
    pub fn scheduler(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Scheduler {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for launcher operations
pub type Result<T> = std::result::Result<T, LaunchError>;

impl From<serde_json::Error> for LaunchError {
    fn from(err: serde_json::Error) -> Self {
        LaunchError::Serialization(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| LaunchError::io(path, e))
    }
}
