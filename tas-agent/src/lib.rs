//! # tas-agent — frame-advance agent
//!
//! Runs next to the game. Attaches a debug backend to the game process,
//! connects to the editor, and serves frame-advance requests: every
//! `RunFrame` injects one controller state, steps the paused game by
//! exactly one frame, captures the configured memory regions and answers
//! with a single `Done`.
//!
//! ## Backends
//!
//! - **simulated**: an in-process fake game, available everywhere.
//! - **windows**: Win32 thread suspension and process memory access.

pub mod config;
pub mod service;
