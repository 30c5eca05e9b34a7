use std::collections::HashSet;

use glam::Vec2;

/// Keys the viewer reacts to, independent of the windowing backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyCode {
    Named(NamedKey),
    /// Letters are stored upper case.
    Character(char),
}

impl KeyCode {
    pub fn character(ch: char) -> Self {
        Self::Character(ch.to_ascii_uppercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedKey {
    Up,
    Down,
    Left,
    Right,
    Escape,
}

/// Identifier for a mouse button (left button is zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MouseButton(u8);

impl MouseButton {
    pub const LEFT: Self = Self(0);
    pub const RIGHT: Self = Self(1);
    pub const MIDDLE: Self = Self(2);

    pub fn new(index: u8) -> Self {
        Self(index)
    }

    pub fn index(self) -> u8 {
        self.0
    }
}

/// What a pointer drag currently does to the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragMode {
    Rotate,
    Pan,
}

/// Pressed buttons and the last pointer position.
#[derive(Debug, Default, Clone)]
pub struct PointerState {
    buttons: HashSet<MouseButton>,
    last_position: Vec2,
}

impl PointerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&mut self, button: MouseButton, position: Vec2) {
        self.buttons.insert(button);
        self.last_position = position;
    }

    pub fn release(&mut self, button: MouseButton) {
        self.buttons.remove(&button);
    }

    pub fn is_down(&self, button: MouseButton) -> bool {
        self.buttons.contains(&button)
    }

    /// Stores `position` and returns the one it replaces.
    pub fn move_to(&mut self, position: Vec2) -> Vec2 {
        std::mem::replace(&mut self.last_position, position)
    }

    pub fn last_position(&self) -> Vec2 {
        self.last_position
    }

    /// Left drags rotate, middle drags pan; left wins when both are held.
    pub fn drag_mode(&self) -> Option<DragMode> {
        if self.is_down(MouseButton::LEFT) {
            Some(DragMode::Rotate)
        } else if self.is_down(MouseButton::MIDDLE) {
            Some(DragMode::Pan)
        } else {
            None
        }
    }
}
