//! Physical joystick -> controller mapping registry.
//!
//! A mapping string lists `target:source` pairs separated by commas:
//!
//! ```text
//! A:b1,B:b2,DUP:h0.1,DRIGHT:h0.2,DDOWN:h0.4,DLEFT:h0.8,LSX:a0+,LSY:a1-
//! ```
//!
//! - `bN`   joystick button N (1-based)
//! - `hX.D` hat X pressed in direction D (1 up, 2 right, 4 down, 8 left)
//! - `aN±`  axis N, `+` keeps the sign, `-` flips it
//!
//! Targets are button script names (`A`, `ZL`, `DUP`, ...) or the
//! extended stick axes `LSX`, `LSY`, `RSX`, `RSY`.
//!
//! The registry is owned by the session and passed by reference; there
//! is no global table.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::controller::{AXIS_MAX, BUTTONS_SIZE, Button, ControllerState, Stick};
use crate::error::ValidationError;

/// A virtual stick axis in the extended input range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StickAxis {
    LeftX,
    LeftY,
    RightX,
    RightY,
}

impl StickAxis {
    const ALL: [StickAxis; 4] = [
        StickAxis::LeftX,
        StickAxis::LeftY,
        StickAxis::RightX,
        StickAxis::RightY,
    ];

    pub fn script_name(self) -> &'static str {
        match self {
            StickAxis::LeftX => "LSX",
            StickAxis::LeftY => "LSY",
            StickAxis::RightX => "RSX",
            StickAxis::RightY => "RSY",
        }
    }

    /// Index in the combined button namespace (after the physical buttons).
    pub fn extended_index(self) -> u8 {
        BUTTONS_SIZE + self as u8
    }

    fn stick(self) -> Stick {
        match self {
            StickAxis::LeftX | StickAxis::LeftY => Stick::Left,
            StickAxis::RightX | StickAxis::RightY => Stick::Right,
        }
    }
}

/// What a physical input drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputTarget {
    Button(Button),
    Axis(StickAxis),
}

impl InputTarget {
    pub fn from_script_name(name: &str) -> Option<Self> {
        if let Some(button) = Button::from_script_name(name) {
            return Some(InputTarget::Button(button));
        }
        StickAxis::ALL
            .into_iter()
            .find(|a| a.script_name() == name)
            .map(InputTarget::Axis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AxisBinding {
    target: InputTarget,
    keep_sign: bool,
}

/// Parsed joystick mapping for one physical controller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputMapping {
    buttons: HashMap<u32, InputTarget>,
    hats: HashMap<u8, InputTarget>,
    axes: HashMap<u32, AxisBinding>,
}

impl InputMapping {
    pub fn parse(text: &str) -> Result<Self, ValidationError> {
        let mut mapping = Self::default();

        for part in text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (target, source) = part
                .split_once(':')
                .ok_or_else(|| invalid(part, "expected target:source"))?;
            let target = InputTarget::from_script_name(target.trim())
                .ok_or_else(|| invalid(part, "unknown target"))?;
            let source = source.trim();

            match source.as_bytes().first() {
                Some(b'b') => {
                    let n: u32 = source[1..]
                        .parse()
                        .map_err(|_| invalid(part, "bad button number"))?;
                    if n == 0 {
                        return Err(invalid(part, "buttons are numbered from 1"));
                    }
                    mapping.buttons.insert(n - 1, target);
                }
                Some(b'h') => {
                    let direction = source
                        .split_once('.')
                        .map(|(_, d)| d)
                        .ok_or_else(|| invalid(part, "hat needs a direction"))?;
                    let index = match direction {
                        "1" => 0,
                        "2" => 1,
                        "4" => 2,
                        "8" => 3,
                        _ => return Err(invalid(part, "hat direction must be 1, 2, 4 or 8")),
                    };
                    mapping.hats.insert(index, target);
                }
                Some(b'a') => {
                    let body = &source[1..];
                    let (number, keep_sign) = match body.strip_suffix('+') {
                        Some(n) => (n, true),
                        None => match body.strip_suffix('-') {
                            Some(n) => (n, false),
                            None => (body, true),
                        },
                    };
                    let n: u32 = number
                        .parse()
                        .map_err(|_| invalid(part, "bad axis number"))?;
                    mapping.axes.insert(n, AxisBinding { target, keep_sign });
                }
                _ => return Err(invalid(part, "source must start with b, h or a")),
            }
        }

        Ok(mapping)
    }

    /// Target of 0-based joystick button `index`.
    pub fn button(&self, index: u32) -> Option<InputTarget> {
        self.buttons.get(&index).copied()
    }

    /// Target of hat direction `index` (0 up, 1 right, 2 down, 3 left).
    pub fn hat(&self, index: u8) -> Option<InputTarget> {
        self.hats.get(&index).copied()
    }

    /// Target of axis `index` and whether its sign is kept.
    pub fn axis(&self, index: u32) -> Option<(InputTarget, bool)> {
        self.axes.get(&index).map(|b| (b.target, b.keep_sign))
    }

    /// Toggle the button mapped to joystick button `index`.
    ///
    /// Returns the toggled button, if the input maps to one.
    pub fn press_button(&self, index: u32, state: &mut ControllerState) -> Option<Button> {
        match self.button(index)? {
            InputTarget::Button(button) => {
                state.toggle_button(button);
                Some(button)
            }
            InputTarget::Axis(_) => None,
        }
    }

    /// Move the stick component mapped to axis `index`.
    ///
    /// `raw` is normalized from `[raw_min, raw_max]` into the controller
    /// axis range around the raw midpoint. Returns `false` when the axis
    /// is unmapped or mapped to a button.
    pub fn apply_axis(
        &self,
        index: u32,
        raw: i32,
        raw_min: i32,
        raw_max: i32,
        state: &mut ControllerState,
        circle_lock: bool,
    ) -> bool {
        let Some(binding) = self.axes.get(&index) else {
            return false;
        };
        let InputTarget::Axis(axis) = binding.target else {
            return false;
        };

        let middle = ((raw_min as f32 + raw_max as f32) / 2.0).floor() as i32;
        let half_range = (raw_max - middle).max(1);
        let mut value = ((raw - middle) as f32 / half_range as f32 * AXIS_MAX as f32) as i32;
        if !binding.keep_sign {
            value = -value;
        }

        let stick = axis.stick();
        let current = state.stick(stick);
        let (x, y) = match axis {
            StickAxis::LeftX | StickAxis::RightX => (value, current.y as i32),
            StickAxis::LeftY | StickAxis::RightY => (current.x as i32, value),
        };
        state.set_stick(stick, x, y, circle_lock);
        true
    }
}

fn invalid(part: &str, reason: &str) -> ValidationError {
    ValidationError::InvalidMapping(format!("{part}: {reason}"))
}
