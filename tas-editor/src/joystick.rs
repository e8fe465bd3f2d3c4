//! Recorded joystick input, applied to a script through an
//! [`InputMapping`].
//!
//! A recording is a JSON array of `{frame, player, event}` entries, in the
//! order they were captured.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use tas_core::controller::InputMapping;

use crate::error::EditorError;
use crate::script::InputScript;

/// One raw input from a physical joystick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JoystickEvent {
    /// Button `index` pressed (0-based).
    Button { index: u32 },
    /// Hat direction pressed: 0 up, 1 right, 2 down, 3 left.
    Hat { index: u8 },
    /// Axis `index` moved to `raw` within `[min, max]`.
    Axis { index: u32, raw: i32, min: i32, max: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedInput {
    pub frame: u32,
    pub player: u8,
    pub event: JoystickEvent,
}

pub fn load_recording(path: &Path) -> Result<Vec<RecordedInput>, EditorError> {
    let text = std::fs::read_to_string(path)?;
    let inputs: Vec<RecordedInput> = serde_json::from_str(&text)?;
    info!(inputs = inputs.len(), path = %path.display(), "joystick recording loaded");
    Ok(inputs)
}

/// Write `inputs` into `script`, extending it to the last recorded frame.
///
/// Returns how many inputs were mapped. The cursor is left where it was.
pub fn replay(
    script: &mut InputScript,
    mapping: &InputMapping,
    inputs: &[RecordedInput],
) -> Result<usize, EditorError> {
    let cursor = script.current_frame();
    let mut applied = 0;

    for input in inputs {
        while script.frame_count() <= input.frame {
            script.add_frame();
        }
        script.set_current_frame(input.frame)?;
        if script.apply_joystick(input.player, mapping, &input.event)? {
            applied += 1;
        } else {
            debug!(frame = input.frame, event = ?input.event, "unmapped joystick input");
        }
    }

    script.set_current_frame(cursor)?;
    Ok(applied)
}
