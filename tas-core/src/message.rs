//! Protocol message kinds and payloads.
//!
//! [`Message`] is a closed sum type with one variant per kind; the kind
//! byte on the wire is [`MessageKind`]. Unknown bytes map to
//! [`ProtocolError::UnknownMessageKind`], never to a panic.
//!
//! ```text
//! Editor ──[SetProjectName, SetCurrentFrame, ModifyFrame]──► Agent
//! Editor ──[RunFrame]───────────────────────────────────────► Agent
//! Agent  ──[MemoryRegion*, FrameBuffer*, Done]──────────────► Editor
//! Editor ──[Start(GetGameInfo)]─────────────────────────────► Agent
//! Agent  ──[GameInfo]───────────────────────────────────────► Editor
//! Editor ──[IsPaused(request)]──────────────────────────────► Agent
//! Agent  ──[IsPaused(actual)]───────────────────────────────► Editor
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::controller::ControllerState;
use crate::error::ProtocolError;

// ── MessageKind ──────────────────────────────────────────────────

/// The kind byte that follows the frame length.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    RunFrame = 0,
    FrameBuffer = 1,
    GameInfo = 2,
    Start = 3,
    Done = 4,
    SetProjectName = 5,
    SetCurrentFrame = 6,
    ModifyFrame = 7,
    IsPaused = 8,
    SetControllerNumber = 9,
    MemoryRegion = 10,
}

/// Number of message kinds; kind bytes are `0..KIND_COUNT`.
pub const KIND_COUNT: usize = 11;

impl MessageKind {
    pub const ALL: [MessageKind; KIND_COUNT] = [
        MessageKind::RunFrame,
        MessageKind::FrameBuffer,
        MessageKind::GameInfo,
        MessageKind::Start,
        MessageKind::Done,
        MessageKind::SetProjectName,
        MessageKind::SetCurrentFrame,
        MessageKind::ModifyFrame,
        MessageKind::IsPaused,
        MessageKind::SetControllerNumber,
        MessageKind::MemoryRegion,
    ];

    /// Kinds the frame sync engine reads from its incoming queues.
    pub fn is_consumed_by_engine(self) -> bool {
        matches!(
            self,
            MessageKind::RunFrame
                | MessageKind::Start
                | MessageKind::SetProjectName
                | MessageKind::SetCurrentFrame
                | MessageKind::ModifyFrame
                | MessageKind::IsPaused
                | MessageKind::SetControllerNumber
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageKind::RunFrame => "RunFrame",
            MessageKind::FrameBuffer => "FrameBuffer",
            MessageKind::GameInfo => "GameInfo",
            MessageKind::Start => "Start",
            MessageKind::Done => "Done",
            MessageKind::SetProjectName => "SetProjectName",
            MessageKind::SetCurrentFrame => "SetCurrentFrame",
            MessageKind::ModifyFrame => "ModifyFrame",
            MessageKind::IsPaused => "IsPaused",
            MessageKind::SetControllerNumber => "SetControllerNumber",
            MessageKind::MemoryRegion => "MemoryRegion",
        }
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        MessageKind::ALL
            .get(value as usize)
            .copied()
            .ok_or(ProtocolError::UnknownMessageKind(value))
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Flags ────────────────────────────────────────────────────────

/// What a `Start` message asks the agent to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StartFlag {
    GetFramebuffer,
    GetGameInfo,
}

/// Which operation a `Done` message completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DoneFlag {
    RunFrameDone,
    FramebufferDone,
}

// ── Payloads ─────────────────────────────────────────────────────

/// Advance the paused game by exactly one frame with this input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFrame {
    pub controller: ControllerState,
    pub player: u8,
    /// Script frame number this input belongs to.
    pub frame: u32,
    pub savestate_hook: u16,
    pub branch: u32,
    /// Send the framebuffer after the step.
    pub include_framebuffer: bool,
}

/// One part of the game's JPEG framebuffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameBuffer {
    pub chunk: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameInfo {
    pub process_id: u64,
    pub program_id: u64,
    pub game_name: String,
    pub user_nickname: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Start {
    pub flag: StartFlag,
}

/// Completion signal; exactly one per accepted `RunFrame`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Done {
    pub flag: DoneFlag,
    /// Gap-free sequence number of the completed request.
    pub sequence: u64,
    pub frame: u32,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetProjectName {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetCurrentFrame {
    pub frame: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifyFrame {
    pub frame: u32,
    pub player: u8,
    pub controller: ControllerState,
}

/// Editor -> agent: requested pause state. Agent -> editor: actual state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsPaused {
    pub paused: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetControllerNumber {
    pub count: u8,
}

/// A slice of a captured memory region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRegion {
    pub region_id: u16,
    pub frame: u32,
    /// Byte offset of `bytes` within the region.
    pub offset: u64,
    pub bytes: Vec<u8>,
}

// ── Message ──────────────────────────────────────────────────────

/// Every message understood by the protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    RunFrame(RunFrame),
    FrameBuffer(FrameBuffer),
    GameInfo(GameInfo),
    Start(Start),
    Done(Done),
    SetProjectName(SetProjectName),
    SetCurrentFrame(SetCurrentFrame),
    ModifyFrame(ModifyFrame),
    IsPaused(IsPaused),
    SetControllerNumber(SetControllerNumber),
    MemoryRegion(MemoryRegion),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::RunFrame(_) => MessageKind::RunFrame,
            Message::FrameBuffer(_) => MessageKind::FrameBuffer,
            Message::GameInfo(_) => MessageKind::GameInfo,
            Message::Start(_) => MessageKind::Start,
            Message::Done(_) => MessageKind::Done,
            Message::SetProjectName(_) => MessageKind::SetProjectName,
            Message::SetCurrentFrame(_) => MessageKind::SetCurrentFrame,
            Message::ModifyFrame(_) => MessageKind::ModifyFrame,
            Message::IsPaused(_) => MessageKind::IsPaused,
            Message::SetControllerNumber(_) => MessageKind::SetControllerNumber,
            Message::MemoryRegion(_) => MessageKind::MemoryRegion,
        }
    }

    pub fn run_frame(player: u8, frame: u32, controller: ControllerState) -> Self {
        Message::RunFrame(RunFrame {
            controller,
            player,
            frame,
            savestate_hook: 0,
            branch: 0,
            include_framebuffer: false,
        })
    }

    pub fn done(sequence: u64, frame: u32, success: bool) -> Self {
        Message::Done(Done {
            flag: DoneFlag::RunFrameDone,
            sequence,
            frame,
            success,
        })
    }

    pub fn project_name(name: impl Into<String>) -> Self {
        Message::SetProjectName(SetProjectName { name: name.into() })
    }
}

macro_rules! impl_from_payload {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Message {
                fn from(payload: $variant) -> Self {
                    Message::$variant(payload)
                }
            }
        )*
    };
}

impl_from_payload!(
    RunFrame,
    FrameBuffer,
    GameInfo,
    Start,
    Done,
    SetProjectName,
    SetCurrentFrame,
    ModifyFrame,
    IsPaused,
    SetControllerNumber,
    MemoryRegion,
);
