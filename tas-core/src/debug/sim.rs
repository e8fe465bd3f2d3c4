//! In-process simulated game, usable on every platform.
//!
//! `SimulatedTarget` is a cheap handle (`Clone` shares the state), so a
//! test can keep one copy for inspection while the engine owns others as
//! its debug backend, input sink and framebuffer source.
//!
//! Each stepped frame writes the frame counter (u32, little-endian) at the
//! start of simulated memory, so region captures change frame to frame.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::capture::FramebufferSource;
use crate::controller::{ControllerState, InputSink};
use crate::debug::DebugBackend;
use crate::error::ProcessError;

/// Base address of simulated memory.
pub const SIM_MEMORY_BASE: u64 = 0x0800_0000;

/// Size of simulated memory.
pub const SIM_MEMORY_SIZE: usize = 0x1_0000;

/// Program id reported by the simulator.
pub const SIM_PROGRAM_ID: u64 = 0x0100_0000_0000_10AD;

/// One controller state delivered to the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Injection {
    /// Target frame at the time of injection.
    pub frame: u64,
    pub player: u8,
    pub state: ControllerState,
}

#[derive(Debug)]
struct SimState {
    attached: Option<u64>,
    suspended: bool,
    frame: u64,
    memory: Vec<u8>,
    injected: Vec<Injection>,
    controller_count: u8,
    program_id: u64,

    fail_attach: bool,
    fail_suspend: bool,
    fail_frames: u32,
    short_reads: u32,
    fail_framebuffer: bool,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            attached: None,
            suspended: false,
            frame: 0,
            memory: vec![0; SIM_MEMORY_SIZE],
            injected: Vec::new(),
            controller_count: 0,
            program_id: SIM_PROGRAM_ID,
            fail_attach: false,
            fail_suspend: false,
            fail_frames: 0,
            short_reads: 0,
            fail_framebuffer: false,
        }
    }
}

impl SimState {
    fn attached(&self) -> Result<(), ProcessError> {
        match self.attached {
            Some(_) => Ok(()),
            None => Err(ProcessError::DetachedAccess),
        }
    }

    fn range(&self, address: u64, len: usize) -> Result<std::ops::Range<usize>, ProcessError> {
        let start = address
            .checked_sub(SIM_MEMORY_BASE)
            .map(|o| o as usize)
            .filter(|o| o.saturating_add(len) <= self.memory.len())
            .ok_or_else(|| ProcessError::Os(format!("access violation at {address:#x}")))?;
        Ok(start..start + len)
    }
}

/// A fake game process driven entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct SimulatedTarget {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory_base(&self) -> u64 {
        SIM_MEMORY_BASE
    }

    /// Write directly into simulated memory, bypassing the debug API.
    pub fn poke(&self, address: u64, bytes: &[u8]) {
        let mut state = self.state.lock();
        if let Ok(range) = state.range(address, bytes.len()) {
            state.memory[range].copy_from_slice(bytes);
        }
    }

    pub fn frame(&self) -> u64 {
        self.state.lock().frame
    }

    pub fn is_suspended(&self) -> bool {
        self.state.lock().suspended
    }

    pub fn attached_pid(&self) -> Option<u64> {
        self.state.lock().attached
    }

    pub fn injected(&self) -> Vec<Injection> {
        self.state.lock().injected.clone()
    }

    pub fn controller_count(&self) -> u8 {
        self.state.lock().controller_count
    }

    // ── Failure injection ────────────────────────────────────────

    pub fn fail_attach(&self, fail: bool) {
        self.state.lock().fail_attach = fail;
    }

    pub fn fail_suspend(&self, fail: bool) {
        self.state.lock().fail_suspend = fail;
    }

    /// The next frame wait reports an error.
    pub fn fail_next_frame(&self) {
        self.state.lock().fail_frames += 1;
    }

    /// The next `count` reads return only half the requested bytes.
    pub fn short_reads(&self, count: u32) {
        self.state.lock().short_reads = count;
    }

    pub fn fail_framebuffer(&self, fail: bool) {
        self.state.lock().fail_framebuffer = fail;
    }

    /// The target process exits: every later debug call fails.
    pub fn kill(&self) {
        let mut state = self.state.lock();
        state.attached = None;
        state.suspended = false;
    }
}

impl DebugBackend for SimulatedTarget {
    fn attach(&mut self, pid: u64) -> Result<(), ProcessError> {
        let mut state = self.state.lock();
        if state.fail_attach {
            return Err(ProcessError::AttachFailed {
                pid,
                reason: "no such process".into(),
            });
        }
        state.attached = Some(pid);
        state.suspended = false;
        Ok(())
    }

    fn detach(&mut self) -> Result<(), ProcessError> {
        let mut state = self.state.lock();
        state.attached = None;
        state.suspended = false;
        Ok(())
    }

    fn suspend(&mut self) -> Result<(), ProcessError> {
        let mut state = self.state.lock();
        state.attached()?;
        if state.fail_suspend {
            return Err(ProcessError::Os("suspend failed".into()));
        }
        state.suspended = true;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), ProcessError> {
        let mut state = self.state.lock();
        state.attached()?;
        state.suspended = false;
        Ok(())
    }

    fn wait_frame(&mut self) -> Result<(), ProcessError> {
        let mut state = self.state.lock();
        state.attached()?;
        if state.suspended {
            return Err(ProcessError::StepFailed("target is suspended".into()));
        }
        if state.fail_frames > 0 {
            state.fail_frames -= 1;
            return Err(ProcessError::Os("frame signal lost".into()));
        }
        state.frame += 1;
        let counter = (state.frame as u32).to_le_bytes();
        state.memory[..4].copy_from_slice(&counter);
        Ok(())
    }

    fn read(&mut self, address: u64, buf: &mut [u8]) -> Result<usize, ProcessError> {
        let mut state = self.state.lock();
        state.attached()?;
        let len = if state.short_reads > 0 {
            state.short_reads -= 1;
            buf.len() / 2
        } else {
            buf.len()
        };
        let range = state.range(address, len)?;
        buf[..len].copy_from_slice(&state.memory[range]);
        Ok(len)
    }

    fn write(&mut self, address: u64, bytes: &[u8]) -> Result<usize, ProcessError> {
        let mut state = self.state.lock();
        state.attached()?;
        let range = state.range(address, bytes.len())?;
        state.memory[range].copy_from_slice(bytes);
        Ok(bytes.len())
    }

    fn program_id(&self) -> u64 {
        self.state.lock().program_id
    }
}

impl InputSink for SimulatedTarget {
    fn inject(&mut self, player: u8, state: &ControllerState) -> Result<(), ProcessError> {
        let mut sim = self.state.lock();
        sim.attached()?;
        if player >= sim.controller_count.max(1) {
            return Err(ProcessError::Os(format!(
                "no virtual controller for player {player}"
            )));
        }
        let frame = sim.frame;
        sim.injected.push(Injection {
            frame,
            player,
            state: *state,
        });
        Ok(())
    }

    fn set_controller_count(&mut self, count: u8) -> Result<(), ProcessError> {
        self.state.lock().controller_count = count;
        Ok(())
    }
}

impl FramebufferSource for SimulatedTarget {
    /// A minimal JPEG-shaped blob (SOI, frame counter, EOI).
    fn capture_jpeg(&mut self) -> Result<Vec<u8>, ProcessError> {
        let state = self.state.lock();
        state.attached()?;
        if state.fail_framebuffer {
            return Err(ProcessError::Os("framebuffer unavailable".into()));
        }
        let mut jpeg = vec![0xFF, 0xD8];
        jpeg.extend_from_slice(&state.frame.to_be_bytes());
        jpeg.extend_from_slice(&[0xFF, 0xD9]);
        Ok(jpeg)
    }
}
