//! Editor-side errors.

use thiserror::Error;

use tas_core::ValidationError;

#[derive(Debug, Error)]
pub enum EditorError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("script file is not valid: {0}")]
    Script(#[from] serde_json::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A request was made before an agent connected.
    #[error("no agent connected")]
    NotConnected,

    /// The agent went away while a request was outstanding.
    #[error("agent disconnected")]
    Disconnected,

    #[error("unknown memory region {0}")]
    UnknownRegion(u16),
}
