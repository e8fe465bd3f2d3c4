//! Session parameters and the editor-driven session state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capture::MemoryRegionDescriptor;
use crate::controller::ControllerState;
use crate::error::ValidationError;
use crate::message::{ModifyFrame, SetControllerNumber, SetCurrentFrame, SetProjectName};

/// Most players a session may declare.
pub const MAX_PLAYERS: u8 = 8;

/// Parameters fixed at session start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub project_name: String,
    pub player_count: u8,
    pub circle_lock: bool,
    pub regions: Vec<MemoryRegionDescriptor>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            project_name: String::new(),
            player_count: 1,
            circle_lock: false,
            regions: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// Check player count, every region, and that region ids are unique.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.player_count == 0 || self.player_count > MAX_PLAYERS {
            return Err(ValidationError::InvalidPlayer {
                index: self.player_count,
                count: MAX_PLAYERS,
            });
        }
        for (i, region) in self.regions.iter().enumerate() {
            region.validate()?;
            if self.regions[..i].iter().any(|r| r.id == region.id) {
                return Err(ValidationError::InvalidRegion(format!(
                    "duplicate region id {}",
                    region.id
                )));
            }
        }
        Ok(())
    }
}

/// A controller state the editor recorded for a script frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameEdit {
    pub player: u8,
    pub controller: ControllerState,
}

/// State the editor pushes to the agent between frame requests.
///
/// Later updates of the same field overwrite earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub project_name: String,
    pub current_frame: u32,
    pub controller_count: u8,
    modified: BTreeMap<(u32, u8), ControllerState>,
}

impl SessionState {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            project_name: config.project_name.clone(),
            current_frame: 0,
            controller_count: config.player_count,
            modified: BTreeMap::new(),
        }
    }

    pub fn set_project_name(&mut self, update: SetProjectName) {
        debug!(name = %update.name, "project name set");
        self.project_name = update.name;
    }

    pub fn set_current_frame(&mut self, update: SetCurrentFrame) {
        self.current_frame = update.frame;
    }

    pub fn modify_frame(&mut self, update: ModifyFrame) {
        self.modified
            .insert((update.frame, update.player), update.controller);
    }

    pub fn set_controller_number(&mut self, update: SetControllerNumber) {
        self.controller_count = update.count;
    }

    /// Recorded edit for `player` at `frame`, if any.
    pub fn edit(&self, frame: u32, player: u8) -> Option<FrameEdit> {
        self.modified
            .get(&(frame, player))
            .map(|controller| FrameEdit {
                player,
                controller: *controller,
            })
    }

    pub fn modified_frames(&self) -> usize {
        self.modified.len()
    }
}
