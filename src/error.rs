//! Error types for model construction, likelihood evaluation and sampling.

use thiserror::Error;

/// Errors raised by the inference core.
///
/// Configuration and data-quality problems are recoverable in the sense that
/// a caller may retry with different settings (for example relaxing the
/// constant-site check). Numerical failures and invariant violations mean the
/// model state can no longer be trusted and the run must stop.
#[derive(Error, Debug)]
pub enum ModelError {
    /// Bad combination of settings, detected before any sampling starts.
    #[error("configuration error: {0}")]
    Config(String),

    /// Character data that cannot be analysed under the current flags.
    #[error("data error: {0}")]
    DataQuality(String),

    /// Catastrophic cancellation, non-finite likelihood and similar.
    #[error("numerical error: {0}")]
    Numerical(String),

    /// Internal bookkeeping was violated; indicates a bug.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// I/O failure on settings, data or log files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed input text.
    #[error("parse error: {0}")]
    Parse(String),
}

impl ModelError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        Self::DataQuality(msg.into())
    }

    pub fn numerical(msg: impl Into<String>) -> Self {
        Self::Numerical(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Whether a caller could reasonably retry with different settings.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Config(_) | Self::DataQuality(_) | Self::Parse(_))
    }
}

impl From<serde_yaml::Error> for ModelError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
