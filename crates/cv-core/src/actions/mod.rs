//! Priority-ordered action handlers.
//!
//! Every input event is offered to the enabled handlers in ascending
//! priority order and dispatch stops at the first handler that consumes it.
//! Handlers share one [`InteractionSession`]; a handler may only leave
//! [`InteractionState::None`] through [`InteractionSession::begin`], so two
//! exclusive interactions can never overlap.

mod clipping;
mod face_pick;
mod pan_zoom;
mod position_pick;
mod rotation;
mod sensor_pick;
mod value_pick;

pub use clipping::ClippingActionHandler;
pub use face_pick::{FacePickHandler, FacePicked};
pub use pan_zoom::PanZoomHandler;
pub use position_pick::{PositionPickHandler, PositionPicked};
pub use rotation::RotationHandler;
pub use sensor_pick::{Sensor, SensorPickHandler, SensorPicked, SensorSet};
pub use value_pick::{ValuePickHandler, ValuePicked};

use glam::{Mat4, Vec2, Vec3};

use crate::camera::Camera;
use crate::clip::ClipDirection;
use crate::config::InteractionConfig;
use crate::interaction::{
    InputEvent, InteractionSession, InteractionState, Key, KeyEvent, PointerButton, PointerEvent,
    WheelEvent,
};
use crate::pick::{PickError, PickHit, PickMode};
use crate::raycast::HitTestResult;
use crate::transform::TransformPipeline;

/// Built-in handler priorities. Lower values see events first.
pub mod priorities {
    pub const CLIPPING: i32 = 5;
    pub const ROTATION: i32 = 10;
    pub const PAN_ZOOM: i32 = 15;
    pub const SENSOR_PICK: i32 = 18;
    pub const POSITION_PICK: i32 = 20;
    pub const FACE_PICK: i32 = 21;
    pub const VALUE_PICK: i32 = 22;
}

/// What a handler may read and change on the viewer. Mutations go through
/// these methods so the viewer keeps its invariants.
pub trait ViewerControl {
    /// Viewport size in pixels.
    fn viewport(&self) -> Vec2;
    fn camera(&self) -> &Camera;
    fn interaction_config(&self) -> &InteractionConfig;
    fn transform(&self) -> &TransformPipeline;

    fn rotate_by_drag(&mut self, delta: Vec2);
    fn apply_rotation_delta(&mut self, axis: Vec3, angle: f32);
    fn reset_view(&mut self);
    fn set_after_project(&mut self, matrix: Mat4);

    /// Projects a world point to pixels.
    fn screen_position(&self, world: Vec3) -> Vec2;
    /// CPU triangle hit test.
    fn hit_test(&self, screen: Vec2) -> Option<HitTestResult>;
    /// Off-screen encode-and-read-back pick.
    fn pick(&mut self, screen: Vec2, mode: PickMode) -> Result<Option<PickHit>, PickError>;
    /// Clip face of the handle proxy under the pointer.
    fn pick_clip_face(&mut self, screen: Vec2) -> Option<ClipDirection>;
    fn clip_position(&self, direction: ClipDirection) -> Option<f32>;
    fn update_clip(&mut self, direction: ClipDirection, value: f32) -> bool;
    fn request_redraw(&mut self);
}

/// Borrowed state handed to one handler callback.
pub struct ActionContext<'a> {
    pub session: &'a mut InteractionSession,
    pub control: &'a mut dyn ViewerControl,
}

/// An independently enabled unit reacting to input. Every callback returns
/// whether the event was consumed; the defaults consume nothing.
pub trait ActionHandler {
    fn name(&self) -> &str;

    fn priority(&self) -> i32;

    fn is_enabled(&self) -> bool;

    fn set_enabled(&mut self, enabled: bool);

    fn left_down(&mut self, _ctx: &mut ActionContext, _event: &PointerEvent) -> bool {
        false
    }

    fn left_up(&mut self, _ctx: &mut ActionContext, _event: &PointerEvent) -> bool {
        false
    }

    fn middle_down(&mut self, _ctx: &mut ActionContext, _event: &PointerEvent) -> bool {
        false
    }

    fn middle_up(&mut self, _ctx: &mut ActionContext, _event: &PointerEvent) -> bool {
        false
    }

    fn right_down(&mut self, _ctx: &mut ActionContext, _event: &PointerEvent) -> bool {
        false
    }

    fn right_up(&mut self, _ctx: &mut ActionContext, _event: &PointerEvent) -> bool {
        false
    }

    fn pointer_move(&mut self, _ctx: &mut ActionContext, _event: &PointerEvent) -> bool {
        false
    }

    fn wheel(&mut self, _ctx: &mut ActionContext, _event: &WheelEvent) -> bool {
        false
    }

    fn key_down(&mut self, _ctx: &mut ActionContext, _event: &KeyEvent) -> bool {
        false
    }

    fn key_up(&mut self, _ctx: &mut ActionContext, _event: &KeyEvent) -> bool {
        false
    }

    /// The active interaction was aborted; drop any drag state.
    fn cancel(&mut self, _ctx: &mut ActionContext) {}
}

/// Ordered list of action handlers.
#[derive(Default)]
pub struct ActionPipeline {
    handlers: Vec<Box<dyn ActionHandler>>,
}

impl ActionPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler, replacing any handler with the same name. Handlers of
    /// equal priority keep insertion order.
    pub fn add(&mut self, handler: Box<dyn ActionHandler>) {
        self.remove(handler.name());
        tracing::debug!(name = handler.name(), priority = handler.priority(), "action handler added");
        self.handlers.push(handler);
        self.handlers.sort_by_key(|h| h.priority());
    }

    pub fn remove(&mut self, name: &str) -> Option<Box<dyn ActionHandler>> {
        let index = self.handlers.iter().position(|h| h.name() == name)?;
        Some(self.handlers.remove(index))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.iter().any(|h| h.name() == name)
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.handlers.iter_mut().find(|h| h.name() == name) {
            Some(handler) => {
                handler.set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    pub fn is_enabled(&self, name: &str) -> Option<bool> {
        self.handlers
            .iter()
            .find(|h| h.name() == name)
            .map(|h| h.is_enabled())
    }

    /// Handler names in dispatch order.
    pub fn names(&self) -> Vec<String> {
        self.handlers.iter().map(|h| h.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Offers `event` to enabled handlers in priority order. Returns true if
    /// a handler consumed it.
    pub fn dispatch(
        &mut self,
        event: &InputEvent,
        session: &mut InteractionSession,
        control: &mut dyn ViewerControl,
    ) -> bool {
        match event {
            InputEvent::Cancel => {
                self.cancel(session, control);
                return true;
            }
            InputEvent::KeyDown(key) if key.key == Key::Escape && !session.is_idle() => {
                self.cancel(session, control);
                return true;
            }
            InputEvent::PointerDown(pointer) => session.record_down(pointer),
            _ => {}
        }

        let mut ctx = ActionContext {
            session,
            control,
        };
        let consumed = self
            .handlers
            .iter_mut()
            .filter(|h| h.is_enabled())
            .any(|handler| offer(handler.as_mut(), &mut ctx, event));

        match event {
            InputEvent::PointerMove(pointer) => ctx.session.record_move(pointer),
            InputEvent::PointerUp(pointer) => ctx.session.record_up(pointer),
            _ => {}
        }
        consumed
    }

    /// Calls every handler's cancel and returns the session to idle.
    pub fn cancel(&mut self, session: &mut InteractionSession, control: &mut dyn ViewerControl) {
        let mut ctx = ActionContext {
            session,
            control,
        };
        for handler in &mut self.handlers {
            handler.cancel(&mut ctx);
        }
        if ctx.session.state() != InteractionState::None {
            tracing::debug!(state = ?ctx.session.state(), "interaction cancelled");
        }
        ctx.session.reset();
    }
}

fn offer(handler: &mut dyn ActionHandler, ctx: &mut ActionContext, event: &InputEvent) -> bool {
    match event {
        InputEvent::PointerDown(p) => match p.button {
            Some(PointerButton::Left) => handler.left_down(ctx, p),
            Some(PointerButton::Middle) => handler.middle_down(ctx, p),
            Some(PointerButton::Right) => handler.right_down(ctx, p),
            None => false,
        },
        InputEvent::PointerUp(p) => match p.button {
            Some(PointerButton::Left) => handler.left_up(ctx, p),
            Some(PointerButton::Middle) => handler.middle_up(ctx, p),
            Some(PointerButton::Right) => handler.right_up(ctx, p),
            None => false,
        },
        InputEvent::PointerMove(p) => handler.pointer_move(ctx, p),
        InputEvent::Wheel(w) => handler.wheel(ctx, w),
        InputEvent::KeyDown(k) => handler.key_down(ctx, k),
        InputEvent::KeyUp(k) => handler.key_up(ctx, k),
        InputEvent::Cancel => false,
    }
}


#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::test_support::*;
    use super::*;

    struct Recorder {
        name: String,
        priority: i32,
        enabled: bool,
        consume: bool,
        log: Rc<RefCell<Vec<i32>>>,
    }

    impl ActionHandler for Recorder {
        fn name(&self) -> &str {
            &self.name
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        fn is_enabled(&self) -> bool {
            self.enabled
        }
        fn set_enabled(&mut self, enabled: bool) {
            self.enabled = enabled;
        }
        fn left_down(&mut self, _ctx: &mut ActionContext, _event: &PointerEvent) -> bool {
            self.log.borrow_mut().push(self.priority);
            self.consume
        }
    }

    fn recorder(priority: i32, consume: bool, log: &Rc<RefCell<Vec<i32>>>) -> Box<Recorder> {
        Box::new(Recorder {
            name: format!("r{priority}"),
            priority,
            enabled: true,
            consume,
            log: Rc::clone(log),
        })
    }

    #[test]
    fn test_dispatch_in_priority_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pipeline = ActionPipeline::new();
        pipeline.add(recorder(3, false, &log));
        pipeline.add(recorder(1, false, &log));
        pipeline.add(recorder(2, false, &log));
        assert_eq!(pipeline.names(), vec!["r1", "r2", "r3"]);

        let mut session = InteractionSession::new();
        let mut control = MockControl::new();
        assert!(!pipeline.dispatch(&down(1.0, 1.0), &mut session, &mut control));
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn test_dispatch_stops_at_first_consumer() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pipeline = ActionPipeline::new();
        pipeline.add(recorder(3, false, &log));
        pipeline.add(recorder(1, false, &log));
        pipeline.add(recorder(2, true, &log));

        let mut session = InteractionSession::new();
        let mut control = MockControl::new();
        assert!(pipeline.dispatch(&down(1.0, 1.0), &mut session, &mut control));
        assert_eq!(*log.borrow(), vec![1, 2]);
    }

    #[test]
    fn test_disabled_handlers_are_skipped() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pipeline = ActionPipeline::new();
        pipeline.add(recorder(1, true, &log));
        pipeline.add(recorder(2, true, &log));
        assert!(pipeline.set_enabled("r1", false));
        assert!(!pipeline.set_enabled("missing", false));

        let mut session = InteractionSession::new();
        let mut control = MockControl::new();
        pipeline.dispatch(&down(1.0, 1.0), &mut session, &mut control);
        assert_eq!(*log.borrow(), vec![2]);
    }

    #[test]
    fn test_cancel_restores_idle() {
        let mut pipeline = ActionPipeline::new();
        let mut session = InteractionSession::new();
        let mut control = MockControl::new();
        session.begin(InteractionState::Rotate, Some(0));
        assert!(pipeline.dispatch(&InputEvent::Cancel, &mut session, &mut control));
        assert!(session.is_idle());

        session.begin(InteractionState::Pan, Some(0));
        let escape = InputEvent::KeyDown(KeyEvent::new(Key::Escape));
        assert!(pipeline.dispatch(&escape, &mut session, &mut control));
        assert!(session.is_idle());
    }

    #[test]
    fn test_add_replaces_same_name() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pipeline = ActionPipeline::new();
        pipeline.add(recorder(1, false, &log));
        pipeline.add(recorder(1, true, &log));
        assert_eq!(pipeline.len(), 1);
        assert!(pipeline.remove("r1").is_some());
        assert!(pipeline.is_empty());
    }
}
