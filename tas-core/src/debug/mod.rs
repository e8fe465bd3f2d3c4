//! Process debug controller: attach, pause, single-frame stepping and
//! memory access on the game process.
//!
//! The platform primitives live behind [`DebugBackend`]; the controller
//! owns the phase machine and enforces which operation is legal when.
//!
//! ```text
//!  Detached ──attach──► Running ──pause──► Paused ──step──► Stepping
//!     ▲                   ▲  │               ▲  │              │
//!     │                   │  └────resume─────┘  │              │
//!     │                   └─────────────────────┘              │
//!     │                            Paused ◄──────── done ──────┘
//!     └────────────────── detach (from any phase) ─────────────┘
//! ```
//!
//! There is no step timeout: a target that never signals its next frame
//! blocks the caller.

pub mod sim;
#[cfg(target_os = "windows")]
pub mod windows;

use std::fmt;

use tracing::{debug, info, warn};

use crate::error::ProcessError;

// ── DebugBackend ─────────────────────────────────────────────────

/// Native debug primitives for one target process.
pub trait DebugBackend: Send {
    /// Open the process for debugging. The target keeps running.
    fn attach(&mut self, pid: u64) -> Result<(), ProcessError>;

    /// Release every native resource. Must leave the target running.
    fn detach(&mut self) -> Result<(), ProcessError>;

    fn suspend(&mut self) -> Result<(), ProcessError>;

    fn resume(&mut self) -> Result<(), ProcessError>;

    /// Block until the target signals that it presented a new frame.
    fn wait_frame(&mut self) -> Result<(), ProcessError>;

    /// Read target memory into `buf`; may return fewer bytes.
    fn read(&mut self, address: u64, buf: &mut [u8]) -> Result<usize, ProcessError>;

    /// Write `bytes` to target memory; may write fewer bytes.
    fn write(&mut self, address: u64, bytes: &[u8]) -> Result<usize, ProcessError>;

    /// Title identifier of the running program, `0` if unknown.
    fn program_id(&self) -> u64;
}

impl<T: DebugBackend + ?Sized> DebugBackend for Box<T> {
    fn attach(&mut self, pid: u64) -> Result<(), ProcessError> {
        (**self).attach(pid)
    }

    fn detach(&mut self) -> Result<(), ProcessError> {
        (**self).detach()
    }

    fn suspend(&mut self) -> Result<(), ProcessError> {
        (**self).suspend()
    }

    fn resume(&mut self) -> Result<(), ProcessError> {
        (**self).resume()
    }

    fn wait_frame(&mut self) -> Result<(), ProcessError> {
        (**self).wait_frame()
    }

    fn read(&mut self, address: u64, buf: &mut [u8]) -> Result<usize, ProcessError> {
        (**self).read(address, buf)
    }

    fn write(&mut self, address: u64, bytes: &[u8]) -> Result<usize, ProcessError> {
        (**self).write(address, bytes)
    }

    fn program_id(&self) -> u64 {
        (**self).program_id()
    }
}

// ── DebugPhase ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugPhase {
    #[default]
    Detached,
    Running,
    Paused,
    /// Resumed for exactly one frame; reverts to `Paused` when done.
    Stepping,
}

impl DebugPhase {
    pub fn name(self) -> &'static str {
        match self {
            Self::Detached => "Detached",
            Self::Running => "Running",
            Self::Paused => "Paused",
            Self::Stepping => "Stepping",
        }
    }
}

impl fmt::Display for DebugPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Snapshot of the controller's observable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessDebugState {
    pub phase: DebugPhase,
    pub step_count: u64,
}

impl ProcessDebugState {
    pub fn attached(&self) -> bool {
        self.phase != DebugPhase::Detached
    }

    pub fn paused(&self) -> bool {
        self.phase == DebugPhase::Paused
    }
}

// ── ProcessDebugController ───────────────────────────────────────

/// Default number of extra attempts for a short memory read.
pub const DEFAULT_READ_RETRIES: u32 = 3;

pub struct ProcessDebugController<B> {
    backend: B,
    phase: DebugPhase,
    step_count: u64,
    pid: Option<u64>,
    read_retries: u32,
}

impl<B: DebugBackend> ProcessDebugController<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            phase: DebugPhase::Detached,
            step_count: 0,
            pid: None,
            read_retries: DEFAULT_READ_RETRIES,
        }
    }

    pub fn with_read_retries(mut self, retries: u32) -> Self {
        self.read_retries = retries;
        self
    }

    pub fn state(&self) -> ProcessDebugState {
        ProcessDebugState {
            phase: self.phase,
            step_count: self.step_count,
        }
    }

    pub fn phase(&self) -> DebugPhase {
        self.phase
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    pub fn is_attached(&self) -> bool {
        self.state().attached()
    }

    pub fn is_paused(&self) -> bool {
        self.state().paused()
    }

    pub fn process_id(&self) -> Option<u64> {
        self.pid
    }

    pub fn program_id(&self) -> u64 {
        self.backend.program_id()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    fn invalid(&self, operation: &'static str, expected: &'static str) -> ProcessError {
        ProcessError::InvalidState {
            operation,
            expected,
            actual: self.phase.name(),
        }
    }

    /// Attach to `pid`. Detaches first if already attached.
    pub fn attach(&mut self, pid: u64) -> Result<(), ProcessError> {
        if self.is_attached() {
            self.detach();
        }
        self.backend.attach(pid).map_err(|e| match e {
            ProcessError::AttachFailed { .. } => e,
            other => ProcessError::AttachFailed {
                pid,
                reason: other.to_string(),
            },
        })?;
        self.pid = Some(pid);
        self.phase = DebugPhase::Running;
        info!(pid, "attached to target process");
        Ok(())
    }

    /// Release the target. Always legal; the target is left running.
    pub fn detach(&mut self) {
        if self.phase == DebugPhase::Detached {
            return;
        }
        if self.phase == DebugPhase::Paused {
            if let Err(e) = self.backend.resume() {
                warn!(error = %e, "resume before detach failed");
            }
        }
        if let Err(e) = self.backend.detach() {
            warn!(error = %e, "detach reported an error");
        }
        info!(pid = self.pid, "detached from target process");
        self.phase = DebugPhase::Detached;
        self.pid = None;
    }

    /// Suspend the target. A no-op when already paused.
    pub fn pause(&mut self) -> Result<(), ProcessError> {
        match self.phase {
            DebugPhase::Paused => Ok(()),
            DebugPhase::Running => {
                self.backend.suspend()?;
                self.phase = DebugPhase::Paused;
                debug!("target paused");
                Ok(())
            }
            DebugPhase::Detached => Err(ProcessError::DetachedAccess),
            DebugPhase::Stepping => Err(self.invalid("pause", "Running")),
        }
    }

    /// Let the target run freely. A no-op when already running.
    pub fn resume(&mut self) -> Result<(), ProcessError> {
        match self.phase {
            DebugPhase::Running => Ok(()),
            DebugPhase::Paused => {
                self.backend.resume()?;
                self.phase = DebugPhase::Running;
                debug!("target resumed");
                Ok(())
            }
            DebugPhase::Detached => Err(ProcessError::DetachedAccess),
            DebugPhase::Stepping => Err(self.invalid("resume", "Paused")),
        }
    }

    /// Advance the paused target by exactly one frame.
    ///
    /// Returns the new step count. On failure the controller is `Paused`
    /// if the target could be suspended again and `Detached` otherwise.
    pub fn step_one_frame(&mut self) -> Result<u64, ProcessError> {
        match self.phase {
            DebugPhase::Paused => {}
            DebugPhase::Detached => return Err(ProcessError::DetachedAccess),
            _ => return Err(self.invalid("step_one_frame", "Paused")),
        }

        self.phase = DebugPhase::Stepping;
        if let Err(e) = self.backend.resume() {
            self.phase = DebugPhase::Paused;
            return Err(ProcessError::StepFailed(e.to_string()));
        }

        let waited = self.backend.wait_frame();
        let suspended = self.backend.suspend();

        match (waited, suspended) {
            (Ok(()), Ok(())) => {
                self.phase = DebugPhase::Paused;
                self.step_count += 1;
                debug!(step = self.step_count, "stepped one frame");
                Ok(self.step_count)
            }
            (Err(e), Ok(())) => {
                self.phase = DebugPhase::Paused;
                Err(ProcessError::StepFailed(e.to_string()))
            }
            (_, Err(e)) => {
                warn!(error = %e, "target could not be suspended after a step; detaching");
                if let Err(e) = self.backend.detach() {
                    warn!(error = %e, "detach reported an error");
                }
                self.phase = DebugPhase::Detached;
                self.pid = None;
                Err(ProcessError::StepFailed(e.to_string()))
            }
        }
    }

    /// Read exactly `len` bytes at `address`.
    ///
    /// Short reads are retried up to the configured retry count; only
    /// byte-exact data is ever returned.
    pub fn read_memory(&mut self, address: u64, len: usize) -> Result<Vec<u8>, ProcessError> {
        if !self.is_attached() {
            return Err(ProcessError::DetachedAccess);
        }

        let mut buf = vec![0u8; len];
        let mut filled = 0;
        let mut retries = 0;
        while filled < len {
            let n = self.backend.read(address + filled as u64, &mut buf[filled..])?;
            filled += n;
            if filled < len {
                retries += 1;
                if retries > self.read_retries {
                    return Err(ProcessError::PartialRead {
                        address,
                        read: filled,
                        expected: len,
                    });
                }
            }
        }
        Ok(buf)
    }

    pub fn write_memory(&mut self, address: u64, bytes: &[u8]) -> Result<(), ProcessError> {
        if !self.is_attached() {
            return Err(ProcessError::DetachedAccess);
        }

        let mut written = 0;
        while written < bytes.len() {
            let n = self
                .backend
                .write(address + written as u64, &bytes[written..])?;
            if n == 0 {
                return Err(ProcessError::Os(format!(
                    "write stalled at {:#x} after {written} of {} bytes",
                    address + written as u64,
                    bytes.len()
                )));
            }
            written += n;
        }
        Ok(())
    }
}
