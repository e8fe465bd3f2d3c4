//! # tas-core
//!
//! Frame-synchronized remote control of a running game process.
//!
//! This crate contains:
//! - **Messages**: `Message`, `MessageKind` and the per-kind payloads
//! - **Codec**: length-prefixed framing (`WireCodec`) for blocking and tokio I/O
//! - **Queues**: `QueueRouter`, per-kind FIFO lanes between transport and engine
//! - **Link**: `LinkGate`, the connection lifecycle shared by both threads
//! - **Transport**: `NetworkWorker`, the blocking socket thread
//! - **Controller**: `ControllerState`, `ControllerModel`, input mappings
//! - **Debug**: `ProcessDebugController` over a `DebugBackend`
//! - **Capture**: memory region and framebuffer chunking
//! - **Engine**: `FrameSyncEngine`, the control-thread loop
//! - **Error**: `Error`, a typed `thiserror` hierarchy

pub mod capture;
pub mod codec;
pub mod controller;
pub mod debug;
pub mod engine;
pub mod error;
pub mod link;
pub mod message;
pub mod queue;
pub mod session;
pub mod transport;

// ── Re-exports ───────────────────────────────────────────────────

pub use capture::{ElementType, FramebufferSource, MemoryRegionDescriptor};
pub use codec::{MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE, WireCodec};
pub use controller::{
    Button, Buttons, ControllerModel, ControllerState, InputSink, Stick, StickPosition,
};
pub use debug::sim::SimulatedTarget;
pub use debug::{DebugBackend, DebugPhase, ProcessDebugController};
pub use engine::{EngineExit, FrameSyncEngine, GameIdentity, Iteration};
pub use error::{Error, ProcessError, ProtocolError, TransportError, ValidationError};
pub use link::{LinkGate, LinkPhase};
pub use message::{DoneFlag, Message, MessageKind, StartFlag};
pub use queue::{QueueEntry, QueueRouter};
pub use session::{SessionConfig, SessionState};
pub use transport::{NetworkHandle, NetworkWorker, TransportConfig};
