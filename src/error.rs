//! Error types for the MPX audio pipeline.

use std::io;

use thiserror::Error;

/// Errors surfaced by session setup, frame assembly, and teardown.
///
/// Open-time failures (`Config`, `Decode`, `Resample`) leave no usable
/// session behind. A read failure during frame assembly is fatal to that
/// call; the caller decides whether to keep the pipeline alive.
#[derive(Debug, Error)]
pub enum Error {
    /// Unsupported source layout or invalid session parameters.
    #[error("configuration error: {0}")]
    Config(String),

    /// Source open or read failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Container probe or packet decode failure from the format layer.
    #[error("decode error: {0}")]
    Decode(String),

    /// Resampler construction or processing failure.
    #[error("resampler error: {0}")]
    Resample(String),
}

impl From<symphonia::core::errors::Error> for Error {
    fn from(e: symphonia::core::errors::Error) -> Self {
        match e {
            symphonia::core::errors::Error::IoError(io) => Error::Io(io),
            other => Error::Decode(other.to_string()),
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;
