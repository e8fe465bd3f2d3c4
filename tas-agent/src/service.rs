//! Agent service core logic.
//!
//! One editor session at a time: attach the target, connect to the
//! editor, run the frame sync engine until the link drops, detach, and
//! reconnect after a delay. The whole loop is blocking; `main` runs it on
//! a dedicated thread.
//!
//! ```text
//!  open target ─► attach ─► connect ─► engine.run ─► release ─► join transport
//!       ▲                                                          │
//!       └──────────────── reconnect_delay ◄── Disconnected ◄───────┘
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use tas_core::debug::sim::SimulatedTarget;
use tas_core::{
    DebugBackend, EngineExit, Error, FramebufferSource, FrameSyncEngine, GameIdentity,
    InputSink, NetworkWorker, ProcessDebugController, ProcessError, QueueRouter,
    TransportError,
};

use crate::config::{AgentConfig, BackendKind};

/// Backend, input sink and optional framebuffer for one session.
struct TargetParts {
    backend: Box<dyn DebugBackend>,
    input: Box<dyn InputSink>,
    framebuffer: Option<Box<dyn FramebufferSource>>,
}

// ── AgentService ─────────────────────────────────────────────────

pub struct AgentService {
    config: AgentConfig,
    running: Arc<AtomicBool>,
    once: bool,
    /// Shared by every session so the simulated game keeps its state
    /// across reconnects.
    simulated: SimulatedTarget,
}

impl AgentService {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            once: false,
            simulated: SimulatedTarget::new(),
        }
    }

    /// Stop after the first session instead of reconnecting.
    pub fn with_once(mut self, once: bool) -> Self {
        self.once = once;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Obtain a handle that can be used to stop the service from another
    /// thread.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Serve editor sessions until stopped.
    ///
    /// Link failures are retried; target and configuration failures are
    /// returned.
    pub fn run(&self) -> Result<(), Error> {
        if let Err(e) = self.config.session_config().validate() {
            self.stop();
            return Err(e.into());
        }
        self.running.store(true, Ordering::SeqCst);

        while self.is_running() {
            match self.run_session() {
                Ok(EngineExit::Stopped) => break,
                Ok(EngineExit::Disconnected) => info!("editor session ended"),
                Err(Error::Transport(e)) => warn!(error = %e, "editor link failed"),
                Err(e) => {
                    self.stop();
                    return Err(e);
                }
            }
            if self.once {
                break;
            }
            self.wait_reconnect();
        }

        self.stop();
        info!("agent stopped");
        Ok(())
    }

    /// One attach-connect-serve cycle.
    pub fn run_session(&self) -> Result<EngineExit, Error> {
        let parts = self.open_target()?;
        let mut debug = ProcessDebugController::new(parts.backend)
            .with_read_retries(self.config.target.read_retries);
        debug.attach(self.config.target.process_id)?;

        let router = Arc::new(QueueRouter::new());
        let network = NetworkWorker::new(self.config.transport_config())
            .configure(self.config.network.editor_address.as_str())
            .start(Arc::clone(&router))?;

        if let Err(e) = network.wait_connected(None) {
            debug.detach();
            let _ = network.join();
            return Err(e.into());
        }

        let mut engine = FrameSyncEngine::new(
            self.config.session_config(),
            debug,
            parts.input,
            router,
            network.gate(),
        )?
        .with_identity(GameIdentity {
            game_name: self.config.target.game_name.clone(),
            user_nickname: self.config.target.user_nickname.clone(),
        })
        .with_poll_interval(self.config.poll_interval());
        if let Some(framebuffer) = parts.framebuffer {
            engine = engine.with_framebuffer(framebuffer);
        }

        let exit = engine.run(&self.running);
        engine.release();

        network.cancel();
        match network.join() {
            Ok(()) | Err(TransportError::PeerClosed) => {}
            Err(e) => warn!(error = %e, "transport ended with an error"),
        }
        Ok(exit)
    }

    // ── Internal ─────────────────────────────────────────────────

    fn open_target(&self) -> Result<TargetParts, Error> {
        match self.config.target.backend {
            BackendKind::Simulated => Ok(TargetParts {
                backend: Box::new(self.simulated.clone()),
                input: Box::new(self.simulated.clone()),
                framebuffer: Some(Box::new(self.simulated.clone())),
            }),
            BackendKind::Windows => self.open_windows_target(),
        }
    }

    #[cfg(target_os = "windows")]
    fn open_windows_target(&self) -> Result<TargetParts, Error> {
        use tas_core::debug::windows::{WindowsDebugBackend, WindowsInputSink};

        let target = &self.config.target;
        Ok(TargetParts {
            backend: Box::new(WindowsDebugBackend::new()),
            input: Box::new(WindowsInputSink::open(
                target.process_id,
                target.input_address,
            )?),
            framebuffer: None,
        })
    }

    #[cfg(not(target_os = "windows"))]
    fn open_windows_target(&self) -> Result<TargetParts, Error> {
        Err(ProcessError::Unsupported("the windows backend on this platform").into())
    }

    /// Sleep for the reconnect delay, waking early on stop.
    fn wait_reconnect(&self) {
        let deadline = Instant::now() + self.config.reconnect_delay();
        while self.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
