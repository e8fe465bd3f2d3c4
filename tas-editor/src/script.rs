//! The authored input script.
//!
//! A script holds one controller state per player per frame, a cursor
//! (the current frame), and savestate hooks. A hook marks a frame the
//! run can be restarted from; each hook carries named branches so
//! alternative routes can be explored from the same savestate.
//!
//! Scripts are saved as JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};

use tas_core::controller::{Button, ControllerState, InputMapping, InputTarget, Stick};
use tas_core::message::{Message, ModifyFrame, RunFrame};
use tas_core::session::MAX_PLAYERS;
use tas_core::ValidationError;

use crate::error::EditorError;
use crate::joystick::JoystickEvent;

/// Name of the branch every new hook starts with.
pub const MAIN_BRANCH: &str = "main";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavestateHook {
    pub frame: u32,
    pub branches: Vec<String>,
    pub selected_branch: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputScript {
    pub name: String,
    pub circle_lock: bool,
    /// `players[p][f]`: state of player `p` at frame `f`. Every player has
    /// the same number of frames.
    players: Vec<Vec<ControllerState>>,
    current_frame: u32,
    hooks: Vec<SavestateHook>,
}

impl InputScript {
    /// A script with one neutral frame per player.
    pub fn new(player_count: u8) -> Result<Self, ValidationError> {
        if player_count == 0 || player_count > MAX_PLAYERS {
            return Err(ValidationError::InvalidPlayer {
                index: player_count,
                count: MAX_PLAYERS,
            });
        }
        Ok(Self {
            name: String::new(),
            circle_lock: false,
            players: vec![vec![ControllerState::neutral()]; player_count as usize],
            current_frame: 0,
            hooks: Vec::new(),
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn player_count(&self) -> u8 {
        self.players.len() as u8
    }

    pub fn frame_count(&self) -> u32 {
        self.players.first().map_or(0, |frames| frames.len() as u32)
    }

    pub fn current_frame(&self) -> u32 {
        self.current_frame
    }

    /// Append a neutral frame for every player; returns its index.
    pub fn add_frame(&mut self) -> u32 {
        for frames in &mut self.players {
            frames.push(ControllerState::neutral());
        }
        self.frame_count() - 1
    }

    /// Move the cursor. Only existing frames can be selected.
    pub fn set_current_frame(&mut self, frame: u32) -> Result<(), ValidationError> {
        if frame >= self.frame_count() {
            return Err(ValidationError::FrameOutOfRange {
                frame,
                count: self.frame_count(),
            });
        }
        self.current_frame = frame;
        Ok(())
    }

    fn check_player(&self, player: u8) -> Result<usize, ValidationError> {
        if player >= self.player_count() {
            return Err(ValidationError::InvalidPlayer {
                index: player,
                count: self.player_count(),
            });
        }
        Ok(player as usize)
    }

    pub fn state(&self, frame: u32, player: u8) -> Result<&ControllerState, ValidationError> {
        let p = self.check_player(player)?;
        self.players[p]
            .get(frame as usize)
            .ok_or(ValidationError::FrameOutOfRange {
                frame,
                count: self.frame_count(),
            })
    }

    pub fn current_state(&self, player: u8) -> Result<&ControllerState, ValidationError> {
        self.state(self.current_frame, player)
    }

    pub fn current_state_mut(
        &mut self,
        player: u8,
    ) -> Result<&mut ControllerState, ValidationError> {
        let p = self.check_player(player)?;
        let frame = self.current_frame as usize;
        Ok(&mut self.players[p][frame])
    }

    pub fn set_button(
        &mut self,
        player: u8,
        button: Button,
        pressed: bool,
    ) -> Result<(), ValidationError> {
        self.current_state_mut(player)?.set_button(button, pressed);
        Ok(())
    }

    pub fn toggle_button(&mut self, player: u8, button: Button) -> Result<(), ValidationError> {
        self.current_state_mut(player)?.toggle_button(button);
        Ok(())
    }

    /// Set a stick on the current frame, honoring the script's circle lock.
    pub fn set_stick(
        &mut self,
        player: u8,
        stick: Stick,
        x: i32,
        y: i32,
    ) -> Result<(), ValidationError> {
        let circle_lock = self.circle_lock;
        self.current_state_mut(player)?
            .set_stick(stick, x, y, circle_lock);
        Ok(())
    }

    /// Apply one physical joystick input to the current frame through
    /// `mapping`. Returns `false` when the input is not mapped.
    pub fn apply_joystick(
        &mut self,
        player: u8,
        mapping: &InputMapping,
        event: &JoystickEvent,
    ) -> Result<bool, ValidationError> {
        let circle_lock = self.circle_lock;
        let state = self.current_state_mut(player)?;
        let applied = match *event {
            JoystickEvent::Button { index } => mapping.press_button(index, state).is_some(),
            JoystickEvent::Hat { index } => match mapping.hat(index) {
                Some(InputTarget::Button(button)) => {
                    state.toggle_button(button);
                    true
                }
                _ => false,
            },
            JoystickEvent::Axis {
                index,
                raw,
                min,
                max,
            } => mapping.apply_axis(index, raw, min, max, state, circle_lock),
        };
        Ok(applied)
    }

    // ── Savestate hooks ──────────────────────────────────────────

    /// Mark a hook at the current frame and return its index.
    ///
    /// A second call on the same frame returns the existing hook.
    pub fn create_savestate_hook(&mut self) -> u16 {
        if let Some(index) = self.hooks.iter().position(|h| h.frame == self.current_frame) {
            return index as u16;
        }
        self.hooks.push(SavestateHook {
            frame: self.current_frame,
            branches: vec![MAIN_BRANCH.to_string()],
            selected_branch: 0,
        });
        self.hooks.sort_by_key(|h| h.frame);
        self.hooks
            .iter()
            .position(|h| h.frame == self.current_frame)
            .unwrap_or_default() as u16
    }

    pub fn hooks(&self) -> &[SavestateHook] {
        &self.hooks
    }

    /// The hook governing `frame`: the last one at or before it.
    pub fn active_hook(&self, frame: u32) -> Option<u16> {
        self.hooks
            .iter()
            .rposition(|h| h.frame <= frame)
            .map(|i| i as u16)
    }

    fn hook_mut(&mut self, hook: u16) -> Result<&mut SavestateHook, ValidationError> {
        let count = self.hooks.len() as u32;
        self.hooks
            .get_mut(hook as usize)
            .ok_or(ValidationError::FrameOutOfRange {
                frame: u32::from(hook),
                count,
            })
    }

    /// Add a named branch to `hook`; returns the branch index.
    pub fn add_branch(&mut self, hook: u16, name: impl Into<String>) -> Result<u32, ValidationError> {
        let hook = self.hook_mut(hook)?;
        hook.branches.push(name.into());
        Ok(hook.branches.len() as u32 - 1)
    }

    pub fn select_branch(&mut self, hook: u16, branch: u32) -> Result<(), ValidationError> {
        let hook = self.hook_mut(hook)?;
        if branch as usize >= hook.branches.len() {
            return Err(ValidationError::FrameOutOfRange {
                frame: branch,
                count: hook.branches.len() as u32,
            });
        }
        hook.selected_branch = branch;
        Ok(())
    }

    // ── Messages ─────────────────────────────────────────────────

    /// `RunFrame` for `player` at the current frame.
    pub fn run_frame(&self, player: u8, include_framebuffer: bool) -> Result<RunFrame, ValidationError> {
        let controller = *self.current_state(player)?;
        let (savestate_hook, branch) = match self.active_hook(self.current_frame) {
            Some(index) => (index, self.hooks[index as usize].selected_branch),
            None => (0, 0),
        };
        Ok(RunFrame {
            controller,
            player,
            frame: self.current_frame,
            savestate_hook,
            branch,
            include_framebuffer,
        })
    }

    /// `ModifyFrame` messages for every player except `skip` at `frame`.
    pub fn edits_for_frame(&self, frame: u32, skip: u8) -> Result<Vec<Message>, ValidationError> {
        let mut edits = Vec::new();
        for player in 0..self.player_count() {
            if player == skip {
                continue;
            }
            edits.push(Message::ModifyFrame(ModifyFrame {
                frame,
                player,
                controller: *self.state(frame, player)?,
            }));
        }
        Ok(edits)
    }

    // ── Persistence ──────────────────────────────────────────────

    pub fn save(&self, path: &Path) -> Result<(), EditorError> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Load a script, checking the invariants the file cannot express.
    pub fn load(path: &Path) -> Result<Self, EditorError> {
        let text = std::fs::read_to_string(path)?;
        let script: Self = serde_json::from_str(&text)?;
        script.validate()?;
        Ok(script)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let count = self.players.len();
        if count == 0 || count > MAX_PLAYERS as usize {
            return Err(ValidationError::InvalidPlayer {
                index: count as u8,
                count: MAX_PLAYERS,
            });
        }
        let frames = self.frame_count();
        if frames == 0 || self.players.iter().any(|f| f.len() as u32 != frames) {
            return Err(ValidationError::FrameOutOfRange {
                frame: 0,
                count: frames,
            });
        }
        if self.current_frame >= frames {
            return Err(ValidationError::FrameOutOfRange {
                frame: self.current_frame,
                count: frames,
            });
        }
        for state in self.players.iter().flatten() {
            state.validate()?;
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
