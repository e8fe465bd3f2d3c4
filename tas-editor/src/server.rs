//! Async listener the agent connects to.
//!
//! After `accept`, the socket is split into a writer task fed by an mpsc
//! channel and a reader task that turns agent messages into
//! [`EditorEvent`]s. `RunFrameDone` is additionally routed to the pending
//! [`EditorServer::request_frame_advance`] call.

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use tas_core::message::{
    Done, GameInfo, IsPaused, MemoryRegion, ModifyFrame, SetControllerNumber, SetCurrentFrame,
    Start,
};
use tas_core::{ControllerState, DoneFlag, Message, StartFlag, WireCodec};

use crate::error::EditorError;
use crate::script::InputScript;

/// Capacity of the outgoing message channel.
const OUTGOING_CAPACITY: usize = 100;

/// Something the agent reported.
#[derive(Debug, Clone, PartialEq)]
pub enum EditorEvent {
    FrameCompleted(Done),
    CapturedRegion(MemoryRegion),
    /// A complete JPEG, reassembled from `FrameBuffer` chunks.
    Framebuffer(Vec<u8>),
    GameInfo(GameInfo),
    Paused(bool),
    Disconnected,
}

struct AgentLink {
    peer: SocketAddr,
    tx: mpsc::Sender<Message>,
    done_rx: mpsc::UnboundedReceiver<Done>,
}

pub struct EditorServer {
    listener: TcpListener,
    link: Option<AgentLink>,
}

impl EditorServer {
    pub async fn bind(address: impl ToSocketAddrs) -> Result<Self, EditorError> {
        let listener = TcpListener::bind(address).await?;
        info!(address = %listener.local_addr()?, "editor listening");
        Ok(Self {
            listener,
            link: None,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, EditorError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.link.as_ref().map(|link| link.peer)
    }

    /// Wait for an agent. Replaces any previous connection.
    pub async fn accept(&mut self) -> Result<mpsc::UnboundedReceiver<EditorEvent>, EditorError> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        info!(%peer, "agent connected");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let tx = spawn_link(stream, events_tx, done_tx);
        self.link = Some(AgentLink { peer, tx, done_rx });
        Ok(events_rx)
    }

    /// Drop the agent link. The agent sees the stream end and its
    /// session finishes.
    pub fn disconnect(&mut self) {
        if let Some(link) = self.link.take() {
            info!(peer = %link.peer, "closing agent link");
        }
    }

    fn link(&mut self) -> Result<&mut AgentLink, EditorError> {
        self.link.as_mut().ok_or(EditorError::NotConnected)
    }

    pub async fn send(&mut self, message: Message) -> Result<(), EditorError> {
        self.link()?
            .tx
            .send(message)
            .await
            .map_err(|_| EditorError::Disconnected)
    }

    // ── Requests ─────────────────────────────────────────────────

    /// Record `controller` for `player` at `frame` on the agent.
    pub async fn submit_controller_frame(
        &mut self,
        frame: u32,
        player: u8,
        controller: ControllerState,
    ) -> Result<(), EditorError> {
        controller.validate()?;
        self.send(Message::ModifyFrame(ModifyFrame {
            frame,
            player,
            controller,
        }))
        .await
    }

    /// Advance the game by the script's current frame and wait for it.
    ///
    /// Other players' states go out as `ModifyFrame` first; player 0
    /// drives the `RunFrame`.
    pub async fn request_frame_advance(
        &mut self,
        script: &InputScript,
        include_framebuffer: bool,
    ) -> Result<Done, EditorError> {
        let frame = script.current_frame();
        for edit in script.edits_for_frame(frame, 0)? {
            self.send(edit).await?;
        }
        let run = script.run_frame(0, include_framebuffer)?;
        self.send(Message::RunFrame(run)).await?;

        let done = self
            .link()?
            .done_rx
            .recv()
            .await
            .ok_or(EditorError::Disconnected)?;
        if done.frame != frame {
            warn!(expected = frame, got = done.frame, "completion for another frame");
        }
        Ok(done)
    }

    /// Mark a savestate hook at the script's current frame and move the
    /// agent's cursor there.
    pub async fn request_savestate_hook(
        &mut self,
        script: &mut InputScript,
    ) -> Result<u16, EditorError> {
        let hook = script.create_savestate_hook();
        self.send(Message::SetCurrentFrame(SetCurrentFrame {
            frame: script.current_frame(),
        }))
        .await?;
        debug!(hook, frame = script.current_frame(), "savestate hook");
        Ok(hook)
    }

    pub async fn set_project_name(&mut self, name: &str) -> Result<(), EditorError> {
        self.send(Message::project_name(name)).await
    }

    pub async fn set_controller_number(&mut self, count: u8) -> Result<(), EditorError> {
        self.send(Message::SetControllerNumber(SetControllerNumber { count }))
            .await
    }

    /// Ask for `GameInfo`; the answer arrives as an event.
    pub async fn request_game_info(&mut self) -> Result<(), EditorError> {
        self.send(Message::Start(Start {
            flag: StartFlag::GetGameInfo,
        }))
        .await
    }

    /// Ask for a framebuffer; the image arrives as an event.
    pub async fn request_framebuffer(&mut self) -> Result<(), EditorError> {
        self.send(Message::Start(Start {
            flag: StartFlag::GetFramebuffer,
        }))
        .await
    }

    pub async fn set_paused(&mut self, paused: bool) -> Result<(), EditorError> {
        self.send(Message::IsPaused(IsPaused { paused })).await
    }
}

// ── Link tasks ───────────────────────────────────────────────────

fn spawn_link(
    stream: TcpStream,
    events: mpsc::UnboundedSender<EditorEvent>,
    done: mpsc::UnboundedSender<Done>,
) -> mpsc::Sender<Message> {
    let (mut net_writer, mut net_reader) = Framed::new(stream, WireCodec::new()).split();
    let (tx, mut rx) = mpsc::channel::<Message>(OUTGOING_CAPACITY);

    // Writer task: editor -> agent
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = net_writer.send(message).await {
                warn!(error = %e, "agent write failed");
                break;
            }
        }
        // Half-close so the agent sees end of stream.
        let _ = net_writer.close().await;
    });

    // Reader task: agent -> editor
    tokio::spawn(async move {
        let mut framebuffer = Vec::new();
        while let Some(item) = net_reader.next().await {
            match item {
                Ok(Ok(message)) => dispatch(message, &mut framebuffer, &events, &done),
                Ok(Err(e)) => warn!(error = %e, "dropping malformed frame from agent"),
                Err(e) => {
                    warn!(error = %e, "agent read failed");
                    break;
                }
            }
        }
        info!("agent disconnected");
        let _ = events.send(EditorEvent::Disconnected);
    });

    tx
}

fn dispatch(
    message: Message,
    framebuffer: &mut Vec<u8>,
    events: &mpsc::UnboundedSender<EditorEvent>,
    done: &mpsc::UnboundedSender<Done>,
) {
    // A closed event channel only means nobody is listening.
    let event = match message {
        Message::FrameBuffer(chunk) => {
            framebuffer.extend_from_slice(&chunk.chunk);
            return;
        }
        Message::Done(d) => {
            if !framebuffer.is_empty() {
                let image = std::mem::take(framebuffer);
                if d.success {
                    let _ = events.send(EditorEvent::Framebuffer(image));
                }
            }
            if d.flag == DoneFlag::FramebufferDone {
                return;
            }
            let _ = done.send(d.clone());
            EditorEvent::FrameCompleted(d)
        }
        Message::MemoryRegion(region) => EditorEvent::CapturedRegion(region),
        Message::GameInfo(info) => EditorEvent::GameInfo(info),
        Message::IsPaused(state) => EditorEvent::Paused(state.paused),
        other => {
            warn!(kind = %other.kind(), "unexpected message from agent");
            return;
        }
    };
    let _ = events.send(event);
}
