//! Link gate: the connection phase shared by the transport thread and the
//! control thread.
//!
//! `LinkPhase` models the lifecycle of the one TCP link with validated
//! transitions that return `Result` instead of panicking. `LinkGate`
//! wraps it in a mutex + condition variable so the control side can block
//! until the link is up (the one-time connect rendezvous) and learn,
//! exactly once, that it went down.

use std::fmt;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::TransportError;

// ── LinkPhase ────────────────────────────────────────────────────

/// The current phase of the agent's link to the editor.
///
/// ```text
///  Disconnected ──► Connecting ──► Connected
///       ▲                │              │
///       │                ▼              ▼
///       └─────────── Disconnecting ◄────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LinkPhase {
    #[default]
    Disconnected,

    /// TCP connect issued, not yet established.
    Connecting,

    Connected,

    /// Shutdown requested or the peer went away; the thread is exiting.
    Disconnecting,
}

impl fmt::Display for LinkPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

impl LinkPhase {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Disconnected`.
    pub fn begin_connect(&mut self) -> Result<(), TransportError> {
        match self {
            Self::Disconnected => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(TransportError::InvalidTransition(
                "cannot connect: not in Disconnected state",
            )),
        }
    }

    /// Valid from: `Connecting`.
    pub fn complete_connect(&mut self) -> Result<(), TransportError> {
        match self {
            Self::Connecting => {
                *self = Self::Connected;
                Ok(())
            }
            _ => Err(TransportError::InvalidTransition(
                "cannot complete connect: not in Connecting state",
            )),
        }
    }

    /// Valid from: `Connecting`, `Connected`.
    pub fn begin_disconnect(&mut self) -> Result<(), TransportError> {
        match self {
            Self::Connecting | Self::Connected => {
                *self = Self::Disconnecting;
                Ok(())
            }
            _ => Err(TransportError::InvalidTransition(
                "cannot disconnect: not in Connecting or Connected state",
            )),
        }
    }

    /// Valid from: `Disconnecting`, `Connecting` (connect failure).
    pub fn finish_disconnect(&mut self) -> Result<(), TransportError> {
        match self {
            Self::Disconnecting | Self::Connecting => {
                *self = Self::Disconnected;
                Ok(())
            }
            _ => Err(TransportError::InvalidTransition(
                "cannot finish disconnect: not in a disconnectable state",
            )),
        }
    }

    /// Reset to `Disconnected` from any phase (I/O failure mid-stream).
    pub fn force_disconnect(&mut self) {
        *self = Self::Disconnected;
    }
}

// ── LinkGate ─────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct GateState {
    phase: LinkPhase,
    /// Latched once the link has gone down after a connect attempt.
    down: bool,
    reported: bool,
    reason: Option<String>,
}

/// Connection phase plus the condition variable waiters block on.
#[derive(Debug, Default)]
pub struct LinkGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl LinkGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> LinkPhase {
        self.state.lock().phase.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().phase.is_connected()
    }

    /// `true` once the link went down (or never came up). Stays set.
    pub fn is_link_down(&self) -> bool {
        self.state.lock().down
    }

    /// Why the link went down, if it did.
    pub fn down_reason(&self) -> Option<String> {
        self.state.lock().reason.clone()
    }

    pub fn begin_connect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.phase.begin_connect()?;
        self.changed.notify_all();
        Ok(())
    }

    /// Signal every waiter that the link is up.
    pub fn mark_connected(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.phase.complete_connect()?;
        debug!("link connected");
        self.changed.notify_all();
        Ok(())
    }

    /// Enter `Disconnecting` (no-op if the link never got that far).
    pub fn begin_disconnect(&self) {
        let mut state = self.state.lock();
        if state.phase.begin_disconnect().is_ok() {
            self.changed.notify_all();
        }
    }

    /// Mark the link down and wake every waiter.
    pub fn mark_disconnected(&self, reason: impl Into<String>) {
        let mut state = self.state.lock();
        if state.phase.finish_disconnect().is_err() {
            state.phase.force_disconnect();
        }
        if !state.down {
            state.down = true;
            state.reason = Some(reason.into());
        }
        self.changed.notify_all();
    }

    /// Block until the link is connected or down.
    ///
    /// Returns `ConnectFailed` if the link went down first and
    /// `ConnectFailed` with a timeout reason if `timeout` elapsed.
    pub fn wait_connected(&self, timeout: Option<Duration>) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let pending = |s: &mut GateState| !s.phase.is_connected() && !s.down;

        match timeout {
            Some(timeout) => {
                let result = self.changed.wait_while_for(&mut state, pending, timeout);
                if result.timed_out() && pending(&mut *state) {
                    return Err(TransportError::ConnectFailed {
                        address: String::new(),
                        reason: "timed out waiting for the link".into(),
                    });
                }
            }
            None => self.changed.wait_while(&mut state, pending),
        }

        if state.phase.is_connected() {
            Ok(())
        } else {
            Err(TransportError::ConnectFailed {
                address: String::new(),
                reason: state
                    .reason
                    .clone()
                    .unwrap_or_else(|| "link went down".into()),
            })
        }
    }

    /// Returns `true` exactly once after the link went down.
    pub fn take_disconnect_report(&self) -> bool {
        let mut state = self.state.lock();
        if state.down && !state.reported {
            state.reported = true;
            warn!(
                reason = state.reason.as_deref().unwrap_or("unknown"),
                "link disconnected"
            );
            true
        } else {
            false
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn happy_path_lifecycle() {
        let mut phase = LinkPhase::Disconnected;

        phase.begin_connect().unwrap();
        assert_eq!(phase, LinkPhase::Connecting);

        phase.complete_connect().unwrap();
        assert!(phase.is_connected());

        phase.begin_disconnect().unwrap();
        assert_eq!(phase, LinkPhase::Disconnecting);

        phase.finish_disconnect().unwrap();
        assert_eq!(phase, LinkPhase::Disconnected);
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let mut phase = LinkPhase::Connected;
        assert!(phase.begin_connect().is_err());
        assert!(phase.finish_disconnect().is_err());

        let mut phase = LinkPhase::Disconnected;
        assert!(phase.complete_connect().is_err());
        assert!(phase.begin_disconnect().is_err());
    }

    #[test]
    fn connect_failure_goes_straight_to_disconnected() {
        let mut phase = LinkPhase::Connecting;
        phase.finish_disconnect().unwrap();
        assert_eq!(phase, LinkPhase::Disconnected);
    }

    #[test]
    fn display_format() {
        assert_eq!(LinkPhase::Disconnected.to_string(), "Disconnected");
        assert_eq!(LinkPhase::Connecting.to_string(), "Connecting");
        assert_eq!(LinkPhase::Disconnecting.to_string(), "Disconnecting");
    }

    #[test]
    fn waiter_wakes_on_connect() {
        let gate = Arc::new(LinkGate::new());
        let remote = Arc::clone(&gate);
        let t = thread::spawn(move || {
            remote.begin_connect().unwrap();
            remote.mark_connected().unwrap();
        });
        gate.wait_connected(Some(Duration::from_secs(5))).unwrap();
        assert!(gate.is_connected());
        t.join().unwrap();
    }

    #[test]
    fn waiter_wakes_on_failure() {
        let gate = Arc::new(LinkGate::new());
        let remote = Arc::clone(&gate);
        let t = thread::spawn(move || {
            remote.begin_connect().unwrap();
            remote.mark_disconnected("refused");
        });
        let err = gate.wait_connected(None).unwrap_err();
        assert!(err.to_string().contains("refused"));
        t.join().unwrap();
    }

    #[test]
    fn wait_times_out() {
        let gate = LinkGate::new();
        assert!(gate.wait_connected(Some(Duration::from_millis(20))).is_err());
        assert!(!gate.is_link_down());
    }

    #[test]
    fn disconnect_is_reported_once() {
        let gate = LinkGate::new();
        assert!(!gate.take_disconnect_report());
        gate.begin_connect().unwrap();
        gate.mark_connected().unwrap();
        gate.begin_disconnect();
        gate.mark_disconnected("peer closed");
        gate.mark_disconnected("second failure");

        assert!(gate.is_link_down());
        assert_eq!(gate.down_reason().as_deref(), Some("peer closed"));
        assert!(gate.take_disconnect_report());
        assert!(!gate.take_disconnect_report());
        assert_eq!(gate.phase(), LinkPhase::Disconnected);
    }
}
