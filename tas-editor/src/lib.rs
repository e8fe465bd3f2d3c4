//! # tas-editor — editor backend
//!
//! Runs on the editing machine. Accepts the agent's connection, drives
//! the game frame by frame from an [`script::InputScript`], and persists
//! the memory regions the agent captures after every frame.

pub mod config;
pub mod error;
pub mod joystick;
pub mod script;
pub mod server;
pub mod streamer;

pub use error::EditorError;
pub use joystick::{JoystickEvent, RecordedInput};
pub use script::InputScript;
pub use server::{EditorEvent, EditorServer};
pub use streamer::MemoryRegionStreamer;
