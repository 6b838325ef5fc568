//! Input events and the interaction session shared by action handlers.

use glam::Vec2;

/// The single exclusive interaction a handler may own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InteractionState {
    #[default]
    None,
    Rotate,
    Clipping,
    Pan,
    HitTest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerButton {
    Left,
    Middle,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub pointer_id: u64,
    /// Pixel position, origin top-left.
    pub position: Vec2,
    /// Button that changed; `None` for moves.
    pub button: Option<PointerButton>,
    pub modifiers: Modifiers,
}

impl PointerEvent {
    pub fn new(position: Vec2, button: Option<PointerButton>) -> Self {
        Self {
            pointer_id: 0,
            position,
            button,
            modifiers: Modifiers::default(),
        }
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelEvent {
    pub position: Vec2,
    /// Positive values zoom in.
    pub delta: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    ArrowLeft,
    ArrowRight,
    ArrowUp,
    ArrowDown,
    Escape,
    Home,
    Char(char),
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: Key,
    pub modifiers: Modifiers,
}

impl KeyEvent {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            modifiers: Modifiers::default(),
        }
    }
}

/// Input delivered to [`ActionPipeline::dispatch`](crate::actions::ActionPipeline::dispatch).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    PointerDown(PointerEvent),
    PointerUp(PointerEvent),
    PointerMove(PointerEvent),
    Wheel(WheelEvent),
    KeyDown(KeyEvent),
    KeyUp(KeyEvent),
    /// Pointer capture lost or interaction aborted by the host.
    Cancel,
}

/// Interaction bookkeeping owned by the dispatch pipeline and lent to each
/// handler for the duration of one callback.
#[derive(Debug, Clone, Default)]
pub struct InteractionSession {
    state: InteractionState,
    captured_pointer: Option<u64>,
    down_position: Option<Vec2>,
    down_button: Option<PointerButton>,
    last_position: Option<Vec2>,
    drag_distance: f32,
}

impl InteractionSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> InteractionState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == InteractionState::None
    }

    /// Claims `state` if no interaction is active. Returns false, leaving the
    /// session untouched, when another state is already owned.
    pub fn begin(&mut self, state: InteractionState, pointer: Option<u64>) -> bool {
        if self.state != InteractionState::None || state == InteractionState::None {
            return false;
        }
        self.state = state;
        self.captured_pointer = pointer;
        true
    }

    /// Releases `state` and the captured pointer. Returns false if `state`
    /// was not the active one.
    pub fn end(&mut self, state: InteractionState) -> bool {
        if self.state != state {
            return false;
        }
        self.state = InteractionState::None;
        self.captured_pointer = None;
        true
    }

    /// Drops any active interaction and all pointer tracking.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn captured_pointer(&self) -> Option<u64> {
        self.captured_pointer
    }

    /// True if `pointer` may continue the active interaction.
    pub fn owns_pointer(&self, pointer: u64) -> bool {
        self.captured_pointer.is_none_or(|p| p == pointer)
    }

    pub fn down_position(&self) -> Option<Vec2> {
        self.down_position
    }

    pub fn down_button(&self) -> Option<PointerButton> {
        self.down_button
    }

    pub fn is_button_down(&self, button: PointerButton) -> bool {
        self.down_button == Some(button)
    }

    /// Movement since the previously dispatched pointer event.
    pub fn delta(&self, position: Vec2) -> Vec2 {
        self.last_position.map_or(Vec2::ZERO, |last| position - last)
    }

    /// Total pointer travel since the last press.
    pub fn drag_distance(&self) -> f32 {
        self.drag_distance
    }

    /// True if a press at the recorded down position and a release at
    /// `position` form a click rather than a drag.
    pub fn is_click(&self, position: Vec2, tolerance: f32) -> bool {
        match self.down_position {
            Some(down) => {
                down.distance(position) <= tolerance && self.drag_distance <= tolerance * 2.0
            }
            None => false,
        }
    }

    pub(crate) fn record_down(&mut self, event: &PointerEvent) {
        self.down_position = Some(event.position);
        self.down_button = event.button;
        self.last_position = Some(event.position);
        self.drag_distance = 0.0;
    }

    pub(crate) fn record_move(&mut self, event: &PointerEvent) {
        if self.down_position.is_some() {
            self.drag_distance += self.delta(event.position).length();
        }
        self.last_position = Some(event.position);
    }

    pub(crate) fn record_up(&mut self, event: &PointerEvent) {
        self.down_position = None;
        self.down_button = None;
        self.last_position = Some(event.position);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_is_exclusive() {
        let mut session = InteractionSession::new();
        assert!(session.begin(InteractionState::Rotate, Some(1)));
        assert!(!session.begin(InteractionState::Clipping, Some(2)));
        assert_eq!(session.state(), InteractionState::Rotate);
        assert!(!session.end(InteractionState::Clipping));
        assert!(session.end(InteractionState::Rotate));
        assert!(session.is_idle());
        assert_eq!(session.captured_pointer(), None);
    }

    #[test]
    fn test_click_detection() {
        let mut session = InteractionSession::new();
        let down = PointerEvent::new(Vec2::new(10.0, 10.0), Some(PointerButton::Left));
        session.record_down(&down);
        session.record_move(&PointerEvent::new(Vec2::new(11.0, 10.0), None));
        assert!(session.is_click(Vec2::new(11.0, 10.0), 3.0));
        session.record_move(&PointerEvent::new(Vec2::new(40.0, 10.0), None));
        assert!(!session.is_click(Vec2::new(11.0, 10.0), 3.0));
    }

    #[test]
    fn test_owns_pointer() {
        let mut session = InteractionSession::new();
        assert!(session.owns_pointer(7));
        session.begin(InteractionState::Pan, Some(3));
        assert!(session.owns_pointer(3));
        assert!(!session.owns_pointer(7));
    }
}
