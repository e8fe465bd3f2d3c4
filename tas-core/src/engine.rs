//! Frame sync engine: the control-thread loop.
//!
//! Each iteration drains what the transport thread queued, applies it to
//! the session and the target, and queues the replies. The engine never
//! touches the socket and never blocks on an empty queue.
//!
//! ```text
//!  link down? ──► drain session updates + Start/IsPaused/RunFrame by arrival
//!                                                  │
//!   RunFrame: seq = next ─► apply pad ─► inject ─► pause ─► step ─►
//!             capture regions (+ framebuffer) ─► MemoryRegion* FrameBuffer* Done
//! ```
//!
//! Every accepted `RunFrame` gets exactly one `Done`, whose sequence
//! numbers are gap-free starting at 0. Anything that goes wrong while
//! serving it flips `success` to `false` instead of dropping the frame.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::capture::{
    FramebufferSource, MemoryRegionDescriptor, capture_regions, framebuffer_messages,
    region_messages,
};
use crate::controller::{ControllerModel, InputSink};
use crate::debug::{DebugBackend, ProcessDebugController};
use crate::error::{Error, ProcessError, ValidationError};
use crate::link::LinkGate;
use crate::message::{
    Done, DoneFlag, GameInfo, IsPaused, Message, MessageKind, ModifyFrame, RunFrame,
    SetControllerNumber, Start, StartFlag,
};
use crate::queue::QueueRouter;
use crate::session::{MAX_PLAYERS, SessionConfig, SessionState};

/// Every kind the engine consumes. Drained under one lock so a session
/// update queued before a request is always applied before it.
const ENGINE_KINDS: [MessageKind; 7] = [
    MessageKind::SetProjectName,
    MessageKind::SetCurrentFrame,
    MessageKind::ModifyFrame,
    MessageKind::SetControllerNumber,
    MessageKind::Start,
    MessageKind::IsPaused,
    MessageKind::RunFrame,
];

/// Outcome of one control-loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iteration {
    /// Keep looping; `worked` is false when nothing was queued.
    Continue { worked: bool },
    /// The link is down and everything queued before it was handled.
    Disconnected,
}

/// Why [`FrameSyncEngine::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineExit {
    Disconnected,
    Stopped,
}

/// Names reported in `GameInfo`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameIdentity {
    pub game_name: String,
    pub user_nickname: String,
}

pub struct FrameSyncEngine<B> {
    router: Arc<QueueRouter>,
    gate: Arc<LinkGate>,
    debug: ProcessDebugController<B>,
    input: Box<dyn InputSink>,
    framebuffer: Option<Box<dyn FramebufferSource>>,
    controllers: ControllerModel,
    session: SessionState,
    regions: Vec<MemoryRegionDescriptor>,
    regions_frozen: bool,
    identity: GameIdentity,
    poll_interval: Duration,
    next_sequence: u64,
    next_framebuffer_sequence: u64,
}

impl<B: DebugBackend> FrameSyncEngine<B> {
    /// Build an engine from the session parameters, consuming them.
    pub fn new(
        config: SessionConfig,
        debug: ProcessDebugController<B>,
        mut input: Box<dyn InputSink>,
        router: Arc<QueueRouter>,
        gate: Arc<LinkGate>,
    ) -> Result<Self, Error> {
        config.validate()?;
        input.set_controller_count(config.player_count)?;

        let controllers =
            ControllerModel::new(config.player_count).with_circle_lock(config.circle_lock);
        let session = SessionState::new(&config);

        Ok(Self {
            router,
            gate,
            debug,
            input,
            framebuffer: None,
            controllers,
            session,
            regions: config.regions,
            regions_frozen: false,
            identity: GameIdentity::default(),
            poll_interval: Duration::from_millis(1),
            next_sequence: 0,
            next_framebuffer_sequence: 0,
        })
    }

    pub fn with_framebuffer(mut self, source: Box<dyn FramebufferSource>) -> Self {
        self.framebuffer = Some(source);
        self
    }

    pub fn with_identity(mut self, identity: GameIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Sleep between idle iterations of [`run`](Self::run).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn controllers(&self) -> &ControllerModel {
        &self.controllers
    }

    pub fn debug(&self) -> &ProcessDebugController<B> {
        &self.debug
    }

    pub fn debug_mut(&mut self) -> &mut ProcessDebugController<B> {
        &mut self.debug
    }

    pub fn regions(&self) -> &[MemoryRegionDescriptor] {
        &self.regions
    }

    /// Sequence number the next accepted `RunFrame` will get.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Add a capture region. Fails once the first capture happened.
    pub fn add_region(&mut self, region: MemoryRegionDescriptor) -> Result<(), Error> {
        if self.regions_frozen {
            return Err(Error::Config(
                "memory regions are frozen after the first capture".into(),
            ));
        }
        region.validate()?;
        if self.regions.iter().any(|r| r.id == region.id) {
            return Err(ValidationError::InvalidRegion(format!(
                "duplicate region id {}",
                region.id
            ))
            .into());
        }
        self.regions.push(region);
        Ok(())
    }

    /// Detach from the target, leaving it running.
    pub fn release(&mut self) {
        self.debug.detach();
    }

    // ── Loop ─────────────────────────────────────────────────────

    /// Iterate until the link goes down or `running` is cleared.
    pub fn run(&mut self, running: &AtomicBool) -> EngineExit {
        info!(regions = self.regions.len(), "frame sync engine running");
        loop {
            if !running.load(Ordering::SeqCst) {
                return EngineExit::Stopped;
            }
            match self.run_iteration() {
                Iteration::Disconnected => return EngineExit::Disconnected,
                Iteration::Continue { worked: false } => thread::sleep(self.poll_interval),
                Iteration::Continue { worked: true } => {}
            }
        }
    }

    /// One pass over the incoming queues.
    pub fn run_iteration(&mut self) -> Iteration {
        // Sampled first: everything queued before the link dropped is
        // still served this pass.
        let link_down = self.gate.is_link_down();

        let entries = self.router.drain_incoming_merged(&ENGINE_KINDS);
        let worked = !entries.is_empty();

        for entry in entries {
            trace!(arrival = entry.arrival, kind = %entry.message.kind(), "serving");
            match entry.message {
                Message::SetProjectName(update) => self.session.set_project_name(update),
                Message::SetCurrentFrame(update) => self.session.set_current_frame(update),
                Message::ModifyFrame(update) => self.modify_frame(update),
                Message::SetControllerNumber(update) => self.set_controller_number(update),
                Message::Start(start) => self.handle_start(start),
                Message::IsPaused(request) => self.handle_is_paused(request),
                Message::RunFrame(request) => self.handle_run_frame(request),
                other => warn!(kind = %other.kind(), "unexpected incoming kind"),
            }
        }

        if link_down {
            self.gate.take_disconnect_report();
            Iteration::Disconnected
        } else {
            Iteration::Continue { worked }
        }
    }

    // ── Session updates ──────────────────────────────────────────

    fn set_controller_number(&mut self, update: SetControllerNumber) {
        let count = update.count;
        if count == 0 || count > MAX_PLAYERS {
            let e = ValidationError::InvalidPlayer {
                index: count,
                count: MAX_PLAYERS,
            };
            warn!(count, error = %e, "rejecting controller count");
            return;
        }
        if let Err(e) = self.input.set_controller_count(count) {
            warn!(count, error = %e, "could not change controller count");
            return;
        }
        self.session.set_controller_number(update);
        self.controllers.set_player_count(count);
    }

    fn modify_frame(&mut self, update: ModifyFrame) {
        let count = self.controllers.player_count();
        let checked = if update.player >= count {
            Err(ValidationError::InvalidPlayer {
                index: update.player,
                count,
            })
        } else {
            update.controller.validate()
        };
        match checked {
            Ok(()) => self.session.modify_frame(update),
            Err(e) => warn!(frame = update.frame, error = %e, "rejecting frame edit"),
        }
    }

    // ── Requests ─────────────────────────────────────────────────

    fn handle_start(&mut self, start: Start) {
        match start.flag {
            StartFlag::GetGameInfo => {
                let info = GameInfo {
                    process_id: self.debug.process_id().unwrap_or(0),
                    program_id: self.debug.program_id(),
                    game_name: self.identity.game_name.clone(),
                    user_nickname: self.identity.user_nickname.clone(),
                };
                debug!(pid = info.process_id, "sending game info");
                self.router.push_outgoing(Message::GameInfo(info));
            }
            StartFlag::GetFramebuffer => {
                let sequence = self.next_framebuffer_sequence;
                self.next_framebuffer_sequence += 1;

                let success = match self.capture_framebuffer() {
                    Ok(jpeg) => {
                        self.push_all(framebuffer_messages(&jpeg));
                        true
                    }
                    Err(e) => {
                        warn!(error = %e, "framebuffer capture failed");
                        false
                    }
                };
                self.router.push_outgoing(Message::Done(Done {
                    flag: DoneFlag::FramebufferDone,
                    sequence,
                    frame: self.session.current_frame,
                    success,
                }));
            }
        }
    }

    fn handle_is_paused(&mut self, request: IsPaused) {
        let result = if request.paused {
            self.debug.pause()
        } else {
            self.debug.resume()
        };
        if let Err(e) = result {
            warn!(requested = request.paused, error = %e, "pause request failed");
        }
        self.router.push_outgoing(Message::IsPaused(IsPaused {
            paused: self.debug.is_paused(),
        }));
    }

    fn handle_run_frame(&mut self, request: RunFrame) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let success = match self.serve_run_frame(&request) {
            Ok(()) => true,
            Err(e) => {
                warn!(sequence, frame = request.frame, error = %e, "frame failed");
                false
            }
        };
        debug!(sequence, frame = request.frame, success, "frame done");
        self.router.push_outgoing(Message::Done(Done {
            flag: DoneFlag::RunFrameDone,
            sequence,
            frame: request.frame,
            success,
        }));
    }

    fn serve_run_frame(&mut self, request: &RunFrame) -> Result<(), Error> {
        let stored = self.controllers.apply(request.player, request.controller)?;
        self.input.inject(request.player, &stored)?;
        // Other players take whatever the editor recorded for this frame.
        for player in 0..self.controllers.player_count() {
            if player == request.player {
                continue;
            }
            if let Some(edit) = self.session.edit(request.frame, player) {
                let stored = self.controllers.apply(edit.player, edit.controller)?;
                self.input.inject(edit.player, &stored)?;
            }
        }
        self.debug.pause()?;
        self.debug.step_one_frame()?;
        self.session.current_frame = request.frame;

        let captures = capture_regions(&mut self.debug, &self.regions)?;
        self.regions_frozen = true;
        let jpeg = if request.include_framebuffer {
            Some(self.capture_framebuffer()?)
        } else {
            None
        };

        for (id, bytes) in captures {
            self.push_all(region_messages(id, request.frame, &bytes));
        }
        if let Some(jpeg) = jpeg {
            self.push_all(framebuffer_messages(&jpeg));
        }
        Ok(())
    }

    fn capture_framebuffer(&mut self) -> Result<Vec<u8>, ProcessError> {
        match self.framebuffer.as_mut() {
            Some(source) => source.capture_jpeg(),
            None => Err(ProcessError::Unsupported("framebuffer capture")),
        }
    }

    fn push_all(&self, messages: Vec<Message>) {
        for message in messages {
            self.router.push_outgoing(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ElementType;
    use crate::controller::{Button, ControllerState, StickPosition};
    use crate::debug::sim::{SIM_MEMORY_BASE, SimulatedTarget};
    use crate::message::SetCurrentFrame;

    struct Harness {
        engine: FrameSyncEngine<SimulatedTarget>,
        target: SimulatedTarget,
        router: Arc<QueueRouter>,
        gate: Arc<LinkGate>,
    }

    fn harness(config: SessionConfig) -> Harness {
        let target = SimulatedTarget::new();
        let mut debug = ProcessDebugController::new(target.clone());
        debug.attach(42).unwrap();

        let router = Arc::new(QueueRouter::new());
        let gate = Arc::new(LinkGate::new());
        gate.begin_connect().unwrap();
        gate.mark_connected().unwrap();

        let engine = FrameSyncEngine::new(
            config,
            debug,
            Box::new(target.clone()),
            Arc::clone(&router),
            Arc::clone(&gate),
        )
        .unwrap()
        .with_framebuffer(Box::new(target.clone()))
        .with_identity(GameIdentity {
            game_name: "Demo".into(),
            user_nickname: "runner".into(),
        });

        Harness {
            engine,
            target,
            router,
            gate,
        }
    }

    fn one_region() -> SessionConfig {
        SessionConfig {
            regions: vec![MemoryRegionDescriptor::new(
                5,
                SIM_MEMORY_BASE,
                16,
                ElementType::U32,
            )],
            ..Default::default()
        }
    }

    fn dones(router: &QueueRouter) -> Vec<Done> {
        router
            .drain_outgoing(MessageKind::Done)
            .into_iter()
            .filter_map(|e| match e.message {
                Message::Done(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn run_frame_steps_captures_and_completes() {
        let mut h = harness(one_region());
        let pad = ControllerState::with_buttons(Button::A.flag());
        h.router.push_incoming(Message::run_frame(0, 10, pad));

        assert_eq!(h.engine.run_iteration(), Iteration::Continue { worked: true });

        let out = h.router.drain_outgoing_all();
        let kinds: Vec<_> = out.iter().map(|e| e.message.kind()).collect();
        assert_eq!(kinds, vec![MessageKind::MemoryRegion, MessageKind::Done]);

        let Message::MemoryRegion(region) = &out[0].message else {
            panic!("expected region");
        };
        assert_eq!(region.region_id, 5);
        assert_eq!(region.frame, 10);
        assert_eq!(&region.bytes[..4], &1u32.to_le_bytes());

        assert_eq!(
            out[1].message,
            Message::Done(Done {
                flag: DoneFlag::RunFrameDone,
                sequence: 0,
                frame: 10,
                success: true,
            })
        );
        assert_eq!(h.target.frame(), 1);
        assert_eq!(h.target.injected()[0].state, pad);
        assert!(h.engine.debug().is_paused());
        assert_eq!(h.engine.session().current_frame, 10);
    }

    #[test]
    fn sequences_are_gap_free_across_failures() {
        let mut h = harness(SessionConfig::default());
        h.router.push_incoming(Message::run_frame(0, 1, ControllerState::neutral()));
        h.router.push_incoming(Message::run_frame(7, 2, ControllerState::neutral()));
        h.router.push_incoming(Message::run_frame(0, 3, ControllerState::neutral()));
        h.engine.run_iteration();

        let done = dones(&h.router);
        let seqs: Vec<_> = done.iter().map(|d| d.sequence).collect();
        let ok: Vec<_> = done.iter().map(|d| d.success).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(ok, vec![true, false, true]);
        assert_eq!(h.target.frame(), 2);
    }

    #[test]
    fn out_of_range_stick_is_rejected_before_the_model() {
        let mut h = harness(SessionConfig::default());
        let bad = ControllerState {
            left: StickPosition { x: 31000, y: 0 },
            ..ControllerState::neutral()
        };
        h.router.push_incoming(Message::run_frame(0, 1, bad));
        h.engine.run_iteration();

        assert!(!dones(&h.router)[0].success);
        assert_eq!(h.engine.controllers().get(0), Some(&ControllerState::neutral()));
        assert_eq!(h.target.frame(), 0);
    }

    #[test]
    fn detached_target_reports_failure() {
        let mut h = harness(SessionConfig::default());
        h.engine.debug_mut().detach();
        h.router.push_incoming(Message::run_frame(0, 1, ControllerState::neutral()));
        h.engine.run_iteration();
        let done = dones(&h.router);
        assert_eq!(done.len(), 1);
        assert!(!done[0].success);
    }

    #[test]
    fn capture_failure_reports_failure() {
        let mut h = harness(one_region());
        h.target.short_reads(100);
        h.router.push_incoming(Message::run_frame(0, 1, ControllerState::neutral()));
        h.engine.run_iteration();

        let out = h.router.drain_outgoing_all();
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0].message, Message::Done(d) if !d.success));
    }

    #[test]
    fn framebuffer_follows_regions_and_precedes_done() {
        let mut h = harness(one_region());
        h.router.push_incoming(Message::RunFrame(RunFrame {
            controller: ControllerState::neutral(),
            player: 0,
            frame: 4,
            savestate_hook: 0,
            branch: 0,
            include_framebuffer: true,
        }));
        h.engine.run_iteration();

        let kinds: Vec<_> = h
            .router
            .drain_outgoing_all()
            .into_iter()
            .map(|e| e.message.kind())
            .collect();
        assert_eq!(
            kinds,
            vec![MessageKind::MemoryRegion, MessageKind::FrameBuffer, MessageKind::Done]
        );
    }

    #[test]
    fn session_updates_apply_in_order() {
        let mut h = harness(SessionConfig::default());
        h.router.push_incoming(Message::project_name("first"));
        h.router.push_incoming(Message::SetCurrentFrame(SetCurrentFrame { frame: 3 }));
        h.router.push_incoming(Message::project_name("demo"));
        h.router.push_incoming(Message::SetControllerNumber(SetControllerNumber { count: 2 }));
        h.router.push_incoming(Message::ModifyFrame(ModifyFrame {
            frame: 3,
            player: 1,
            controller: ControllerState::with_buttons(Button::X.flag()),
        }));
        h.router.push_incoming(Message::ModifyFrame(ModifyFrame {
            frame: 3,
            player: 5,
            controller: ControllerState::neutral(),
        }));

        assert_eq!(h.engine.run_iteration(), Iteration::Continue { worked: true });
        let session = h.engine.session();
        assert_eq!(session.project_name, "demo");
        assert_eq!(session.current_frame, 3);
        assert_eq!(session.controller_count, 2);
        assert_eq!(session.modified_frames(), 1);
        assert_eq!(h.engine.controllers().player_count(), 2);
        assert_eq!(h.target.controller_count(), 2);
    }

    #[test]
    fn recorded_edits_drive_other_players() {
        let mut h = harness(SessionConfig {
            player_count: 2,
            ..Default::default()
        });
        let second = ControllerState::with_buttons(Button::Y.flag());
        h.router.push_incoming(Message::ModifyFrame(ModifyFrame {
            frame: 6,
            player: 1,
            controller: second,
        }));
        h.router.push_incoming(Message::run_frame(0, 6, ControllerState::neutral()));
        h.engine.run_iteration();

        let injected = h.target.injected();
        assert_eq!(injected.len(), 2);
        assert_eq!((injected[1].player, injected[1].state), (1, second));
        assert_eq!(h.engine.controllers().get(1), Some(&second));
        assert!(dones(&h.router)[0].success);
    }

    #[test]
    fn game_info_reports_identity() {
        let mut h = harness(SessionConfig::default());
        h.router.push_incoming(Message::Start(Start {
            flag: StartFlag::GetGameInfo,
        }));
        h.engine.run_iteration();

        let out = h.router.drain_outgoing(MessageKind::GameInfo);
        let Message::GameInfo(info) = &out[0].message else {
            panic!("expected game info");
        };
        assert_eq!(info.process_id, 42);
        assert_eq!(info.game_name, "Demo");
        assert_eq!(info.user_nickname, "runner");
        assert_ne!(info.program_id, 0);
    }

    #[test]
    fn framebuffer_request_ends_with_framebuffer_done() {
        let mut h = harness(SessionConfig::default());
        h.router.push_incoming(Message::Start(Start {
            flag: StartFlag::GetFramebuffer,
        }));
        h.engine.run_iteration();

        let out = h.router.drain_outgoing_all();
        assert_eq!(out[0].message.kind(), MessageKind::FrameBuffer);
        assert!(matches!(
            &out.last().unwrap().message,
            Message::Done(d) if d.flag == DoneFlag::FramebufferDone && d.success
        ));
        assert_eq!(h.engine.next_sequence(), 0);
    }

    #[test]
    fn pause_requests_report_actual_state() {
        let mut h = harness(SessionConfig::default());
        h.router.push_incoming(Message::IsPaused(IsPaused { paused: true }));
        h.router.push_incoming(Message::IsPaused(IsPaused { paused: false }));
        h.engine.run_iteration();

        let reports: Vec<_> = h
            .router
            .drain_outgoing(MessageKind::IsPaused)
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(
            reports,
            vec![
                Message::IsPaused(IsPaused { paused: true }),
                Message::IsPaused(IsPaused { paused: false }),
            ]
        );
        assert!(!h.target.is_suspended());
    }

    #[test]
    fn queued_frame_is_served_before_disconnect() {
        let mut h = harness(SessionConfig::default());
        h.router.push_incoming(Message::project_name("demo"));
        h.router.push_incoming(Message::run_frame(0, 1, ControllerState::neutral()));
        h.gate.mark_disconnected("peer closed");

        assert_eq!(h.engine.run_iteration(), Iteration::Disconnected);
        assert_eq!(h.engine.run_iteration(), Iteration::Disconnected);

        let done = dones(&h.router);
        assert_eq!(done.len(), 1);
        assert!(done[0].success);
        assert_eq!(h.engine.session().project_name, "demo");
    }

    #[test]
    fn regions_freeze_after_first_capture() {
        let mut h = harness(SessionConfig::default());
        h.engine
            .add_region(MemoryRegionDescriptor::new(1, SIM_MEMORY_BASE, 4, ElementType::U8))
            .unwrap();
        h.router.push_incoming(Message::run_frame(0, 1, ControllerState::neutral()));
        h.engine.run_iteration();

        let late = MemoryRegionDescriptor::new(2, SIM_MEMORY_BASE, 4, ElementType::U8);
        assert!(matches!(h.engine.add_region(late), Err(Error::Config(_))));
    }

    #[test]
    fn release_leaves_target_running() {
        let mut h = harness(SessionConfig::default());
        h.router.push_incoming(Message::run_frame(0, 1, ControllerState::neutral()));
        h.engine.run_iteration();
        assert!(h.target.is_suspended());

        h.engine.release();
        assert!(!h.target.is_suspended());
        assert_eq!(h.target.attached_pid(), None);
    }

    #[test]
    fn edits_pushed_while_running_reach_their_frame() {
        const FRAMES: u32 = 2000;
        let Harness {
            mut engine,
            target,
            router,
            ..
        } = harness(SessionConfig {
            player_count: 2,
            ..Default::default()
        });
        let second = ControllerState::with_buttons(Button::X.flag());

        let running = Arc::new(AtomicBool::new(true));
        let engine_thread = {
            let running = Arc::clone(&running);
            thread::spawn(move || engine.run(&running))
        };
        let producer = {
            let router = Arc::clone(&router);
            thread::spawn(move || {
                for frame in 0..FRAMES {
                    router.push_incoming(Message::ModifyFrame(ModifyFrame {
                        frame,
                        player: 1,
                        controller: second,
                    }));
                    router.push_incoming(Message::run_frame(0, frame, ControllerState::neutral()));
                }
            })
        };
        producer.join().unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(30);
        let mut completed = Vec::new();
        while completed.len() < FRAMES as usize && std::time::Instant::now() < deadline {
            completed.extend(dones(&router));
            thread::sleep(Duration::from_millis(1));
        }
        running.store(false, Ordering::SeqCst);
        assert_eq!(engine_thread.join().unwrap(), EngineExit::Stopped);

        assert_eq!(completed.len(), FRAMES as usize);
        assert!(completed.iter().all(|d| d.success));
        let second_player = target
            .injected()
            .into_iter()
            .filter(|i| i.player == 1 && i.state == second)
            .count();
        assert_eq!(second_player, FRAMES as usize);
    }

    #[test]
    fn controller_count_outside_limits_is_ignored() {
        let mut h = harness(SessionConfig::default());
        h.router.push_incoming(Message::SetControllerNumber(SetControllerNumber { count: 0 }));
        h.router.push_incoming(Message::SetControllerNumber(SetControllerNumber {
            count: MAX_PLAYERS + 1,
        }));
        h.router.push_incoming(Message::SetControllerNumber(SetControllerNumber { count: 200 }));
        h.router.push_incoming(Message::run_frame(150, 1, ControllerState::neutral()));
        h.engine.run_iteration();

        assert_eq!(h.engine.controllers().player_count(), 1);
        assert_eq!(h.engine.session().controller_count, 1);
        assert_eq!(h.target.controller_count(), 1);
        assert!(h.target.injected().is_empty());
        let done = dones(&h.router);
        assert_eq!(done.len(), 1);
        assert!(!done[0].success);
    }

    #[test]
    fn run_returns_when_stopped() {
        let mut h = harness(SessionConfig::default());
        let running = AtomicBool::new(false);
        assert_eq!(h.engine.run(&running), EngineExit::Stopped);
    }
}
