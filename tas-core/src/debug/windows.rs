//! Win32 debug backend.
//!
//! Suspends and resumes every thread of the target through a Toolhelp
//! snapshot, reads and writes memory with `Read/WriteProcessMemory`, and
//! waits for the frame signal on a named event the game side sets once
//! per presented frame (`Local\tas-frame-<pid>`).

use std::ffi::c_void;

use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
use windows::Win32::System::Diagnostics::Debug::{ReadProcessMemory, WriteProcessMemory};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, TH32CS_SNAPTHREAD, THREADENTRY32, Thread32First, Thread32Next,
};
use windows::Win32::System::Threading::{
    INFINITE, OpenEventW, OpenProcess, OpenThread, PROCESS_QUERY_INFORMATION, PROCESS_VM_OPERATION,
    PROCESS_VM_READ, PROCESS_VM_WRITE, ResumeThread, SYNCHRONIZATION_SYNCHRONIZE, SuspendThread,
    THREAD_SUSPEND_RESUME, WaitForSingleObject,
};
use windows::core::HSTRING;

use crate::controller::{ControllerState, InputSink};
use crate::debug::DebugBackend;
use crate::error::ProcessError;

fn os(context: &str, e: windows::core::Error) -> ProcessError {
    ProcessError::Os(format!("{context}: {e}"))
}

/// Handles held while attached.
struct Attached {
    pid: u32,
    process: HANDLE,
    frame_event: HANDLE,
}

pub struct WindowsDebugBackend {
    attached: Option<Attached>,
    program_id: u64,
}

// SAFETY: the raw handles are owned by this value and only used through
// `&mut self`.
unsafe impl Send for WindowsDebugBackend {}

impl WindowsDebugBackend {
    pub fn new() -> Self {
        Self {
            attached: None,
            program_id: 0,
        }
    }

    /// Program id to report in `GameInfo`; Windows has no title id.
    pub fn with_program_id(mut self, program_id: u64) -> Self {
        self.program_id = program_id;
        self
    }

    fn attached(&self) -> Result<&Attached, ProcessError> {
        self.attached.as_ref().ok_or(ProcessError::DetachedAccess)
    }

    /// Apply `op` to every thread owned by the target.
    fn for_each_thread(&self, op: unsafe fn(HANDLE) -> u32) -> Result<(), ProcessError> {
        let pid = self.attached()?.pid;
        unsafe {
            let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD, 0)
                .map_err(|e| os("CreateToolhelp32Snapshot", e))?;

            let mut entry = THREADENTRY32 {
                dwSize: std::mem::size_of::<THREADENTRY32>() as u32,
                ..Default::default()
            };
            let mut result = Ok(());
            let mut more = Thread32First(snapshot, &mut entry).is_ok();
            while more {
                if entry.th32OwnerProcessID == pid {
                    match OpenThread(THREAD_SUSPEND_RESUME, false, entry.th32ThreadID) {
                        Ok(thread) => {
                            if op(thread) == u32::MAX {
                                result = Err(ProcessError::Os(format!(
                                    "thread {} refused suspend/resume",
                                    entry.th32ThreadID
                                )));
                            }
                            let _ = CloseHandle(thread);
                        }
                        Err(e) => result = Err(os("OpenThread", e)),
                    }
                }
                more = Thread32Next(snapshot, &mut entry).is_ok();
            }
            let _ = CloseHandle(snapshot);
            result
        }
    }
}

impl Default for WindowsDebugBackend {
    fn default() -> Self {
        Self::new()
    }
}

unsafe fn suspend_thread(thread: HANDLE) -> u32 {
    unsafe { SuspendThread(thread) }
}

unsafe fn resume_thread(thread: HANDLE) -> u32 {
    unsafe { ResumeThread(thread) }
}

impl DebugBackend for WindowsDebugBackend {
    fn attach(&mut self, pid: u64) -> Result<(), ProcessError> {
        let failed = |reason: String| ProcessError::AttachFailed { pid, reason };
        let pid32 = u32::try_from(pid).map_err(|_| failed("pid out of range".into()))?;

        let process = unsafe {
            OpenProcess(
                PROCESS_VM_READ | PROCESS_VM_WRITE | PROCESS_VM_OPERATION | PROCESS_QUERY_INFORMATION,
                false,
                pid32,
            )
        }
        .map_err(|e| failed(e.to_string()))?;

        let name = HSTRING::from(format!("Local\\tas-frame-{pid32}"));
        let frame_event = match unsafe { OpenEventW(SYNCHRONIZATION_SYNCHRONIZE, false, &name) } {
            Ok(event) => event,
            Err(e) => {
                unsafe {
                    let _ = CloseHandle(process);
                }
                return Err(failed(format!("frame signal {name} unavailable: {e}")));
            }
        };

        self.attached = Some(Attached {
            pid: pid32,
            process,
            frame_event,
        });
        Ok(())
    }

    fn detach(&mut self) -> Result<(), ProcessError> {
        if let Some(attached) = self.attached.take() {
            unsafe {
                let _ = CloseHandle(attached.frame_event);
                CloseHandle(attached.process).map_err(|e| os("CloseHandle", e))?;
            }
        }
        Ok(())
    }

    fn suspend(&mut self) -> Result<(), ProcessError> {
        self.for_each_thread(suspend_thread)
    }

    fn resume(&mut self) -> Result<(), ProcessError> {
        self.for_each_thread(resume_thread)
    }

    fn wait_frame(&mut self) -> Result<(), ProcessError> {
        let event = self.attached()?.frame_event;
        let result = unsafe { WaitForSingleObject(event, INFINITE) };
        if result == WAIT_OBJECT_0 {
            Ok(())
        } else {
            Err(ProcessError::StepFailed(format!(
                "frame wait returned {:#x}",
                result.0
            )))
        }
    }

    fn read(&mut self, address: u64, buf: &mut [u8]) -> Result<usize, ProcessError> {
        let process = self.attached()?.process;
        let mut read = 0usize;
        let result = unsafe {
            ReadProcessMemory(
                process,
                address as *const c_void,
                buf.as_mut_ptr() as *mut c_void,
                buf.len(),
                Some(&mut read as *mut usize),
            )
        };
        // A partial copy fails with ERROR_PARTIAL_COPY but still reports
        // the bytes transferred.
        match result {
            Ok(()) => Ok(read),
            Err(_) if read > 0 => Ok(read),
            Err(e) => Err(os("ReadProcessMemory", e)),
        }
    }

    fn write(&mut self, address: u64, bytes: &[u8]) -> Result<usize, ProcessError> {
        let process = self.attached()?.process;
        let mut written = 0usize;
        let result = unsafe {
            WriteProcessMemory(
                process,
                address as *const c_void,
                bytes.as_ptr() as *const c_void,
                bytes.len(),
                Some(&mut written as *mut usize),
            )
        };
        match result {
            Ok(()) => Ok(written),
            Err(_) if written > 0 => Ok(written),
            Err(e) => Err(os("WriteProcessMemory", e)),
        }
    }

    fn program_id(&self) -> u64 {
        self.program_id
    }
}

impl Drop for WindowsDebugBackend {
    fn drop(&mut self) {
        let _ = self.detach();
    }
}

// ── Input ────────────────────────────────────────────────────────

/// Bytes of one player's slot in the shared input block.
pub const INPUT_SLOT_SIZE: u64 = 12;

/// Writes controller states into an input block inside the target.
///
/// Slot layout (little-endian): buttons `u32`, left x/y `i16`, right x/y
/// `i16`. Player `n` lives at `base + n * INPUT_SLOT_SIZE`; the first byte
/// before the block holds the active controller count.
pub struct WindowsInputSink {
    process: HANDLE,
    base: u64,
}

// SAFETY: see `WindowsDebugBackend`.
unsafe impl Send for WindowsInputSink {}

impl WindowsInputSink {
    pub fn open(pid: u64, base: u64) -> Result<Self, ProcessError> {
        if base == 0 {
            return Err(ProcessError::Unsupported("input block address not configured"));
        }
        let pid32 = u32::try_from(pid).map_err(|_| ProcessError::AttachFailed {
            pid,
            reason: "pid out of range".into(),
        })?;
        let process = unsafe {
            OpenProcess(PROCESS_VM_WRITE | PROCESS_VM_OPERATION, false, pid32)
        }
        .map_err(|e| os("OpenProcess", e))?;
        Ok(Self { process, base })
    }

    fn poke(&mut self, address: u64, bytes: &[u8]) -> Result<(), ProcessError> {
        let mut written = 0usize;
        unsafe {
            WriteProcessMemory(
                self.process,
                address as *const c_void,
                bytes.as_ptr() as *const c_void,
                bytes.len(),
                Some(&mut written as *mut usize),
            )
        }
        .map_err(|e| os("WriteProcessMemory", e))?;
        if written != bytes.len() {
            return Err(ProcessError::Os(format!(
                "short write of {written}/{} bytes at {address:#x}",
                bytes.len()
            )));
        }
        Ok(())
    }
}

impl InputSink for WindowsInputSink {
    fn inject(&mut self, player: u8, state: &ControllerState) -> Result<(), ProcessError> {
        let mut slot = Vec::with_capacity(INPUT_SLOT_SIZE as usize);
        slot.extend_from_slice(&state.buttons.bits().to_le_bytes());
        for value in [state.left.x, state.left.y, state.right.x, state.right.y] {
            slot.extend_from_slice(&value.to_le_bytes());
        }
        self.poke(self.base + u64::from(player) * INPUT_SLOT_SIZE, &slot)
    }

    fn set_controller_count(&mut self, count: u8) -> Result<(), ProcessError> {
        self.poke(self.base - 1, &[count])
    }
}

impl Drop for WindowsInputSink {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.process);
        }
    }
}
