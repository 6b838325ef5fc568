use glam::Vec3;

use super::{ActionContext, ActionHandler, priorities};
use crate::interaction::{InteractionState, Key, KeyEvent, PointerButton, PointerEvent};

/// Free rotation by left drag and arrow keys.
pub struct RotationHandler {
    enabled: bool,
}

impl RotationHandler {
    pub const NAME: &'static str = "rotation";

    pub fn new() -> Self {
        Self { enabled: true }
    }
}

impl Default for RotationHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionHandler for RotationHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        priorities::ROTATION
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn pointer_move(&mut self, ctx: &mut ActionContext, event: &PointerEvent) -> bool {
        let delta = ctx.session.delta(event.position);
        match ctx.session.state() {
            InteractionState::Rotate => {
                if !ctx.session.owns_pointer(event.pointer_id) {
                    return false;
                }
                ctx.control.rotate_by_drag(delta);
                ctx.control.request_redraw();
                true
            }
            InteractionState::None => {
                if !ctx.session.is_button_down(PointerButton::Left) || event.modifiers.shift {
                    return false;
                }
                let tolerance = ctx.control.interaction_config().click_tolerance;
                let Some(down) = ctx.session.down_position() else {
                    return false;
                };
                if down.distance(event.position) <= tolerance {
                    return false;
                }
                if !ctx.session.begin(InteractionState::Rotate, Some(event.pointer_id)) {
                    return false;
                }
                // Include the travel that happened below the tolerance.
                ctx.control.rotate_by_drag(event.position - down);
                ctx.control.request_redraw();
                true
            }
            _ => false,
        }
    }

    fn left_up(&mut self, ctx: &mut ActionContext, event: &PointerEvent) -> bool {
        if ctx.session.state() != InteractionState::Rotate
            || !ctx.session.owns_pointer(event.pointer_id)
        {
            return false;
        }
        ctx.session.end(InteractionState::Rotate)
    }

    fn key_down(&mut self, ctx: &mut ActionContext, event: &KeyEvent) -> bool {
        if !ctx.session.is_idle() {
            return false;
        }
        let step = ctx
            .control
            .interaction_config()
            .key_rotation_step_degrees
            .to_radians();
        let (axis, angle) = match event.key {
            Key::ArrowLeft => (Vec3::Y, -step),
            Key::ArrowRight => (Vec3::Y, step),
            Key::ArrowUp => (Vec3::X, -step),
            Key::ArrowDown => (Vec3::X, step),
            Key::Home => {
                ctx.control.reset_view();
                ctx.control.request_redraw();
                return true;
            }
            _ => return false,
        };
        ctx.control.apply_rotation_delta(axis, angle);
        ctx.control.request_redraw();
        true
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use glam::{Mat4, Vec2};

    use super::super::test_support::*;
    use super::*;
    use crate::actions::ActionPipeline;
    use crate::interaction::{InputEvent, InteractionSession, Modifiers};

    fn pipeline() -> ActionPipeline {
        let mut pipeline = ActionPipeline::new();
        pipeline.add(Box::new(RotationHandler::new()));
        pipeline
    }

    #[test]
    fn test_drag_rotates_and_releases() {
        let mut pipeline = pipeline();
        let mut session = InteractionSession::new();
        let mut control = MockControl::new();

        assert!(!pipeline.dispatch(&down(100.0, 100.0), &mut session, &mut control));
        assert!(!pipeline.dispatch(&moved(101.0, 100.0), &mut session, &mut control));
        assert!(session.is_idle());
        assert!(pipeline.dispatch(&moved(130.0, 100.0), &mut session, &mut control));
        assert_eq!(session.state(), InteractionState::Rotate);
        assert!(pipeline.dispatch(&moved(140.0, 100.0), &mut session, &mut control));
        assert_ne!(control.transform.rotation(), Mat4::IDENTITY);
        assert!(pipeline.dispatch(&up(140.0, 100.0), &mut session, &mut control));
        assert!(session.is_idle());
    }

    #[test]
    fn test_rotation_blocked_by_other_state() {
        let mut pipeline = pipeline();
        let mut session = InteractionSession::new();
        let mut control = MockControl::new();
        pipeline.dispatch(&down(100.0, 100.0), &mut session, &mut control);
        session.begin(InteractionState::Clipping, Some(0));
        assert!(!pipeline.dispatch(&moved(160.0, 100.0), &mut session, &mut control));
        assert_eq!(control.transform.rotation(), Mat4::IDENTITY);
    }

    #[test]
    fn test_shift_drag_is_ignored() {
        let mut pipeline = pipeline();
        let mut session = InteractionSession::new();
        let mut control = MockControl::new();
        pipeline.dispatch(&down(100.0, 100.0), &mut session, &mut control);
        let shift = Modifiers {
            shift: true,
            ..Modifiers::default()
        };
        let event = InputEvent::PointerMove(
            PointerEvent::new(Vec2::new(160.0, 100.0), None).with_modifiers(shift),
        );
        assert!(!pipeline.dispatch(&event, &mut session, &mut control));
        assert!(session.is_idle());
    }

    #[test]
    fn test_arrow_keys_and_home() {
        let mut pipeline = pipeline();
        let mut session = InteractionSession::new();
        let mut control = MockControl::new();
        let right = InputEvent::KeyDown(KeyEvent::new(Key::ArrowRight));
        assert!(pipeline.dispatch(&right, &mut session, &mut control));
        let moved_x = control.transform.rotation().transform_vector3(Vec3::X);
        assert_relative_eq!(moved_x.z, -(5.0f32.to_radians().sin()), epsilon = 1e-5);

        let home = InputEvent::KeyDown(KeyEvent::new(Key::Home));
        assert!(pipeline.dispatch(&home, &mut session, &mut control));
        assert_eq!(control.transform.rotation(), Mat4::IDENTITY);
    }
}
