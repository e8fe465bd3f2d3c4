//! Controller state model: one frame of buttons + two analog sticks,
//! and the per-player registry the engine injects from.
//!
//! Stick values live in `[AXIS_MIN, AXIS_MAX]`. Every setter clamps;
//! [`ControllerModel::apply`] validates instead, so out-of-range input
//! from the wire is rejected rather than silently altered.

pub mod mapping;

use serde::{Deserialize, Serialize};

use crate::error::{ProcessError, ValidationError};

pub use mapping::{InputMapping, InputTarget, StickAxis};

/// Lowest stick value a recorded frame may contain.
pub const AXIS_MIN: i32 = -30000;
/// Highest stick value a recorded frame may contain.
pub const AXIS_MAX: i32 = 30000;

/// Number of physical buttons; the extended range starts here.
pub const BUTTONS_SIZE: u8 = 18;

// ── Buttons ──────────────────────────────────────────────────────

bitflags::bitflags! {
    /// Pressed buttons for one frame.
    ///
    /// Bits `0..18` are physical buttons. Bits `24..28` are the
    /// extended range (virtual stick axes used as mapping targets);
    /// they never appear in a recorded frame.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Buttons: u32 {
        const A       = 1 << 0;
        const B       = 1 << 1;
        const X       = 1 << 2;
        const Y       = 1 << 3;
        const LS      = 1 << 4;
        const RS      = 1 << 5;
        const L       = 1 << 6;
        const R       = 1 << 7;
        const ZL      = 1 << 8;
        const ZR      = 1 << 9;
        const PLUS    = 1 << 10;
        const MINUS   = 1 << 11;
        const DLEFT   = 1 << 12;
        const DUP     = 1 << 13;
        const DRIGHT  = 1 << 14;
        const DDOWN   = 1 << 15;
        const HOME    = 1 << 16;
        const CAPTURE = 1 << 17;

        const PHYSICAL = (1 << 18) - 1;
        const EXTENDED = 0x0F00_0000;
    }
}

/// A single physical button, in bit order.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Button {
    A = 0,
    B,
    X,
    Y,
    LeftStick,
    RightStick,
    L,
    R,
    ZL,
    ZR,
    Plus,
    Minus,
    DLeft,
    DUp,
    DRight,
    DDown,
    Home,
    Capture,
}

impl Button {
    pub const ALL: [Button; BUTTONS_SIZE as usize] = [
        Button::A,
        Button::B,
        Button::X,
        Button::Y,
        Button::LeftStick,
        Button::RightStick,
        Button::L,
        Button::R,
        Button::ZL,
        Button::ZR,
        Button::Plus,
        Button::Minus,
        Button::DLeft,
        Button::DUp,
        Button::DRight,
        Button::DDown,
        Button::Home,
        Button::Capture,
    ];

    /// The bit this button occupies in [`Buttons`].
    pub fn flag(self) -> Buttons {
        Buttons::from_bits_retain(1 << self as u8)
    }

    /// Name used in scripts and mapping strings.
    pub fn script_name(self) -> &'static str {
        match self {
            Button::A => "A",
            Button::B => "B",
            Button::X => "X",
            Button::Y => "Y",
            Button::LeftStick => "LS",
            Button::RightStick => "RS",
            Button::L => "L",
            Button::R => "R",
            Button::ZL => "ZL",
            Button::ZR => "ZR",
            Button::Plus => "PLUS",
            Button::Minus => "MINUS",
            Button::DLeft => "DLEFT",
            Button::DUp => "DUP",
            Button::DRight => "DRIGHT",
            Button::DDown => "DDOWN",
            Button::Home => "HOME",
            Button::Capture => "CAPT",
        }
    }

    pub fn from_script_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.script_name() == name)
    }
}

impl std::fmt::Display for Button {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.script_name())
    }
}

// ── Sticks ───────────────────────────────────────────────────────

/// Which analog stick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stick {
    Left,
    Right,
}

/// Position of one analog stick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StickPosition {
    pub x: i16,
    pub y: i16,
}

impl StickPosition {
    pub const CENTER: StickPosition = StickPosition { x: 0, y: 0 };

    /// Build a position, clamping both components into the axis range.
    pub fn clamped(x: i32, y: i32) -> Self {
        Self {
            x: clamp_to_axis_range(x),
            y: clamp_to_axis_range(y),
        }
    }

    /// Returns `true` if both components lie in `[AXIS_MIN, AXIS_MAX]`.
    pub fn in_range(&self) -> bool {
        axis_in_range(self.x as i32) && axis_in_range(self.y as i32)
    }

    /// Rescale onto the circle of radius `AXIS_MAX` if the vector
    /// lies outside it. Components are truncated toward zero, which is
    /// what recorded input files contain.
    pub fn circle_locked(self) -> Self {
        let (x, y) = correct_for_circle_lock(self.x as i32, self.y as i32);
        Self {
            x: x as i16,
            y: y as i16,
        }
    }
}

/// Clamp a raw stick value into `[AXIS_MIN, AXIS_MAX]`.
pub fn clamp_to_axis_range(value: i32) -> i16 {
    value.clamp(AXIS_MIN, AXIS_MAX) as i16
}

fn axis_in_range(value: i32) -> bool {
    (AXIS_MIN..=AXIS_MAX).contains(&value)
}

/// Circle-lock correction: `scaled = AXIS_MAX * component / sqrt(x² + y²)`
/// when `x² + y² > AXIS_MAX²`, otherwise unchanged.
pub fn correct_for_circle_lock(x: i32, y: i32) -> (i32, i32) {
    let radius_squared = (x as i64) * (x as i64) + (y as i64) * (y as i64);
    let max = AXIS_MAX as i64;
    if radius_squared <= max * max {
        return (x, y);
    }
    let radius = (radius_squared as f64).sqrt();
    let scale = |c: i32| (AXIS_MAX as f64 * (c as f64 / radius)) as i32;
    (scale(x), scale(y))
}

// ── ControllerState ──────────────────────────────────────────────

/// One frame of controller input. A sequence of these is a TAS script.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControllerState {
    pub buttons: Buttons,
    pub left: StickPosition,
    pub right: StickPosition,
}

impl ControllerState {
    /// Neutral state: nothing pressed, sticks centered.
    pub fn neutral() -> Self {
        Self::default()
    }

    pub fn with_buttons(buttons: Buttons) -> Self {
        Self {
            buttons,
            ..Self::default()
        }
    }

    pub fn is_pressed(&self, button: Button) -> bool {
        self.buttons.contains(button.flag())
    }

    pub fn set_button(&mut self, button: Button, pressed: bool) {
        self.buttons.set(button.flag(), pressed);
    }

    pub fn toggle_button(&mut self, button: Button) {
        self.buttons.toggle(button.flag());
    }

    pub fn stick(&self, stick: Stick) -> StickPosition {
        match stick {
            Stick::Left => self.left,
            Stick::Right => self.right,
        }
    }

    /// Set a stick, clamping each component and then applying the
    /// circle-lock correction if `circle_lock` is set.
    pub fn set_stick(&mut self, stick: Stick, x: i32, y: i32, circle_lock: bool) {
        let mut pos = StickPosition::clamped(x, y);
        if circle_lock {
            pos = pos.circle_locked();
        }
        match stick {
            Stick::Left => self.left = pos,
            Stick::Right => self.right = pos,
        }
    }

    /// Check the invariants a recorded frame must satisfy.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for value in [self.left.x, self.left.y, self.right.x, self.right.y] {
            if !axis_in_range(value as i32) {
                return Err(ValidationError::AxisOutOfRange {
                    value: value as i32,
                    min: AXIS_MIN,
                    max: AXIS_MAX,
                });
            }
        }
        Ok(())
    }
}

// ── ControllerModel ──────────────────────────────────────────────

/// Authoritative controller state for the current frame, per player.
#[derive(Debug, Clone)]
pub struct ControllerModel {
    players: Vec<ControllerState>,
    circle_lock: bool,
}

impl ControllerModel {
    pub fn new(player_count: u8) -> Self {
        Self {
            players: vec![ControllerState::neutral(); player_count as usize],
            circle_lock: false,
        }
    }

    /// Enable the circle-lock correction on every write.
    pub fn with_circle_lock(mut self, enabled: bool) -> Self {
        self.circle_lock = enabled;
        self
    }

    pub fn circle_lock(&self) -> bool {
        self.circle_lock
    }

    pub fn player_count(&self) -> u8 {
        self.players.len() as u8
    }

    /// Resize the registry; added players start neutral.
    pub fn set_player_count(&mut self, count: u8) {
        self.players
            .resize(count as usize, ControllerState::neutral());
    }

    /// Overwrite the state of `player` for the current frame.
    ///
    /// Returns the state actually stored (after circle-lock correction).
    pub fn apply(
        &mut self,
        player: u8,
        state: ControllerState,
    ) -> Result<ControllerState, ValidationError> {
        let count = self.player_count();
        let slot = self
            .players
            .get_mut(player as usize)
            .ok_or(ValidationError::InvalidPlayer {
                index: player,
                count,
            })?;
        state.validate()?;

        let mut stored = state;
        stored.buttons &= Buttons::PHYSICAL;
        if self.circle_lock {
            stored.left = stored.left.circle_locked();
            stored.right = stored.right.circle_locked();
        }
        *slot = stored;
        Ok(stored)
    }

    pub fn get(&self, player: u8) -> Option<&ControllerState> {
        self.players.get(player as usize)
    }

    /// Reset every player to neutral.
    pub fn clear(&mut self) {
        self.players.fill(ControllerState::neutral());
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &ControllerState)> {
        self.players.iter().enumerate().map(|(i, s)| (i as u8, s))
    }
}

// ── InputSink ────────────────────────────────────────────────────

/// Delivers controller state to the target (a virtual HID device on
/// real hardware, a recorder in the simulator).
pub trait InputSink: Send {
    fn inject(&mut self, player: u8, state: &ControllerState) -> Result<(), ProcessError>;

    /// Number of virtual controllers to expose. Zero removes them all.
    fn set_controller_count(&mut self, count: u8) -> Result<(), ProcessError> {
        let _ = count;
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_flags_follow_declaration_order() {
        for (i, button) in Button::ALL.iter().enumerate() {
            assert_eq!(button.flag().bits(), 1 << i);
        }
        assert_eq!(Buttons::PHYSICAL.bits().count_ones(), BUTTONS_SIZE as u32);
        assert!(!Buttons::PHYSICAL.intersects(Buttons::EXTENDED));
    }

    #[test]
    fn script_names_roundtrip() {
        for button in Button::ALL {
            assert_eq!(Button::from_script_name(button.script_name()), Some(button));
        }
        assert_eq!(Button::from_script_name("LSX"), None);
    }

    #[test]
    fn set_stick_clamps() {
        let mut state = ControllerState::neutral();
        state.set_stick(Stick::Left, 40000, -40000, false);
        assert_eq!(state.left, StickPosition { x: 30000, y: -30000 });
    }

    #[test]
    fn circle_lock_rescales_onto_circle() {
        let cases = [(30000, 30000), (-30000, 12000), (25000, -29000), (1, 30000)];
        for (x, y) in cases {
            assert!(x * x + y * y > AXIS_MAX * AXIS_MAX);
            let (cx, cy) = correct_for_circle_lock(x, y);
            let r = ((cx as f64).powi(2) + (cy as f64).powi(2)).sqrt();
            assert!((r - AXIS_MAX as f64).abs() <= 2.0, "radius {r} for ({x}, {y})");

            let before = (y as f64).atan2(x as f64);
            let after = (cy as f64).atan2(cx as f64);
            assert!((before - after).abs() < 1e-3, "angle drift for ({x}, {y})");
        }
    }

    #[test]
    fn circle_lock_truncates_like_recorded_files() {
        // 30000 * (30000 / 42426.406...) = 21213.203... -> 21213
        assert_eq!(correct_for_circle_lock(30000, 30000), (21213, 21213));
        assert_eq!(correct_for_circle_lock(-30000, -30000), (-21213, -21213));
    }

    #[test]
    fn circle_lock_leaves_inner_values() {
        assert_eq!(correct_for_circle_lock(20000, 20000), (20000, 20000));
        assert_eq!(correct_for_circle_lock(30000, 0), (30000, 0));
        assert_eq!(correct_for_circle_lock(0, 0), (0, 0));
    }

    #[test]
    fn apply_rejects_invalid_player() {
        let mut model = ControllerModel::new(2);
        let err = model.apply(2, ControllerState::neutral()).unwrap_err();
        assert_eq!(err, ValidationError::InvalidPlayer { index: 2, count: 2 });
    }

    #[test]
    fn apply_rejects_out_of_range_stick() {
        let mut model = ControllerModel::new(1);
        let mut state = ControllerState::neutral();
        state.right.y = i16::MAX;
        assert!(matches!(
            model.apply(0, state),
            Err(ValidationError::AxisOutOfRange { value: 32767, .. })
        ));
        assert_eq!(model.get(0), Some(&ControllerState::neutral()));
    }

    #[test]
    fn apply_with_circle_lock_corrects() {
        let mut model = ControllerModel::new(1).with_circle_lock(true);
        let mut state = ControllerState::with_buttons(Buttons::A);
        state.left = StickPosition { x: 30000, y: 30000 };
        let stored = model.apply(0, state).unwrap();
        assert_eq!(stored.left, StickPosition { x: 21213, y: 21213 });
        assert_eq!(model.get(0).unwrap().buttons, Buttons::A);
    }

    #[test]
    fn apply_strips_extended_bits() {
        let mut model = ControllerModel::new(1);
        let state = ControllerState::with_buttons(Buttons::B | Buttons::EXTENDED);
        let stored = model.apply(0, state).unwrap();
        assert_eq!(stored.buttons, Buttons::B);
    }

    #[test]
    fn resize_and_clear() {
        let mut model = ControllerModel::new(1);
        model
            .apply(0, ControllerState::with_buttons(Buttons::ZR))
            .unwrap();
        model.set_player_count(3);
        assert_eq!(model.player_count(), 3);
        assert_eq!(model.get(2), Some(&ControllerState::neutral()));
        model.clear();
        assert!(model.iter().all(|(_, s)| *s == ControllerState::neutral()));
    }
}
