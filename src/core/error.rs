//! Error types for the scene/streaming subsystem

use thiserror::Error;

/// Main error type for the subsystem
#[derive(Debug, Error)]
pub enum Error {
    #[error("resize failed for resource '{name}': {reason}")]
    Resize { name: String, reason: String },

    #[error("streaming error: {0}")]
    Streaming(String),

    #[error("scene error: {0}")]
    Scene(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
