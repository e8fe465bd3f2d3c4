//! Domain-specific error types for the TAS remote control engine.
//!
//! All fallible operations return `Result<T, Error>`. The top-level
//! [`Error`] groups four families so callers can apply the propagation
//! policy per family:
//!
//! - [`TransportError`] ends the session.
//! - [`ProtocolError`] drops one frame (escalates on repetition).
//! - [`ProcessError`] becomes an error-flagged `Done`.
//! - [`ValidationError`] is rejected at the API boundary.

use thiserror::Error;

/// The canonical error type for the TAS engine.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Session or configuration parameters were rejected.
    #[error("configuration error: {0}")]
    Config(String),
}

// ── TransportError ───────────────────────────────────────────────

/// Failures of the network link. Any of these terminates the session.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer closed the connection (a read returned 0 bytes).
    #[error("peer closed the connection")]
    PeerClosed,

    /// The underlying socket reported a fatal error.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    /// The connect attempt failed.
    #[error("connect to {address} failed: {reason}")]
    ConnectFailed { address: String, reason: String },

    /// `start()` was called before an address was configured.
    #[error("transport started without a configured address")]
    NotConfigured,

    /// Too many malformed frames in a row; the stream is out of sync.
    #[error("stream desynchronized after {0} consecutive malformed frames")]
    Desync(u32),

    /// The keep-running flag was cleared; not a failure.
    #[error("transport shut down")]
    Shutdown,

    /// A link phase change that the state machine does not allow.
    #[error("invalid link transition: {0}")]
    InvalidTransition(&'static str),
}

// ── ProtocolError ────────────────────────────────────────────────

/// A single frame could not be interpreted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The kind byte does not map to any known message.
    #[error("unknown message kind {0:#04x}")]
    UnknownMessageKind(u8),

    /// The payload does not have the shape expected for its kind.
    #[error("malformed {kind} payload: {reason}")]
    MalformedPayload { kind: &'static str, reason: String },

    /// A frame declared `length = 0`, so it has no kind byte.
    #[error("empty frame (length 0)")]
    EmptyFrame,

    /// The encoded payload does not fit in a u16-length frame.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

// ── ProcessError ─────────────────────────────────────────────────

/// Failures of the attached target process.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// The process was not found or debug access was denied.
    #[error("attach to process {pid} failed: {reason}")]
    AttachFailed { pid: u64, reason: String },

    /// Memory or control access while no process is attached.
    #[error("no process attached")]
    DetachedAccess,

    /// The operation is not valid in the current debug phase.
    #[error("invalid debug state: {operation} requires {expected}, current phase is {actual}")]
    InvalidState {
        operation: &'static str,
        expected: &'static str,
        actual: &'static str,
    },

    /// Advancing the target by one frame failed.
    #[error("frame step failed: {0}")]
    StepFailed(String),

    /// A memory region could not be read completely.
    #[error("partial read at {address:#x}: {read} of {expected} bytes")]
    PartialRead {
        address: u64,
        read: usize,
        expected: usize,
    },

    /// A native call failed.
    #[error("os error: {0}")]
    Os(String),

    /// The backend does not provide this capability.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}

// ── ValidationError ──────────────────────────────────────────────

/// Input rejected before it reaches invariant-protected state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("player index {index} out of range (players: {count})")]
    InvalidPlayer { index: u8, count: u8 },

    #[error("stick value {value} outside [{min}, {max}]")]
    AxisOutOfRange { value: i32, min: i32, max: i32 },

    #[error("invalid memory region: {0}")]
    InvalidRegion(String),

    #[error("invalid input mapping: {0}")]
    InvalidMapping(String),

    #[error("frame {frame} does not exist (frames: {count})")]
    FrameOutOfRange { frame: u32, count: u32 },
}

// ── Convenient From implementations ──────────────────────────────

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Transport(TransportError::Io(e))
    }
}

impl Error {
    /// Returns `true` if this error must terminate the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = ProtocolError::PayloadTooLarge {
            size: 70000,
            max: 65534,
        };
        assert!(e.to_string().contains("70000"));
        assert!(e.to_string().contains("65534"));

        let e = ProtocolError::UnknownMessageKind(0xfe);
        assert!(e.to_string().contains("0xfe"));
    }

    #[test]
    fn from_io_is_fatal_transport() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Transport(TransportError::Io(_))));
        assert!(e.is_fatal());
    }

    #[test]
    fn process_errors_are_not_fatal() {
        let e: Error = ProcessError::DetachedAccess.into();
        assert!(!e.is_fatal());
        let e: Error = ValidationError::InvalidPlayer { index: 9, count: 1 }.into();
        assert!(!e.is_fatal());
    }
}
