use glam::Vec2;

use super::{ActionContext, ActionHandler, ViewerControl, priorities};
use crate::clip::ClipDirection;
use crate::clipping::Clipping;
use crate::interaction::{InteractionState, PointerEvent};

const NORMAL_STEP: f32 = 0.1;

#[derive(Debug, Clone, Copy)]
struct ClipDrag {
    direction: ClipDirection,
    start_screen: Vec2,
    start_value: f32,
}

/// Drags clip planes by grabbing faces of the clip-handle proxy.
pub struct ClippingActionHandler {
    clipping: Clipping,
    enabled: bool,
    drag: Option<ClipDrag>,
}

impl ClippingActionHandler {
    pub const NAME: &'static str = "clipping";

    pub fn new(clipping: Clipping) -> Self {
        Self {
            clipping,
            enabled: true,
            drag: None,
        }
    }

    pub fn dragged_direction(&self) -> Option<ClipDirection> {
        self.drag.map(|d| d.direction)
    }

    /// Object-space offset along the face normal for a screen drag of
    /// `delta` pixels, accounting for perspective foreshortening.
    fn drag_offset(&self, control: &dyn ViewerControl, direction: ClipDirection, delta: Vec2) -> f32 {
        let Some(center) = self.clipping.face_center_world(direction) else {
            return 0.0;
        };
        let transform = control.transform();
        let normal = transform.rotation().transform_vector3(direction.outward());
        let s1 = control.screen_position(center);
        let s2 = control.screen_position(center + normal * NORMAL_STEP);
        let projected = s2 - s1;
        let pixels = projected.length();

        let world = if pixels.is_finite() && pixels > 1e-3 {
            delta.dot(projected / pixels) * NORMAL_STEP / pixels
        } else {
            // Normal points at the eye: fall back to vertical drag in
            // world units at the face's depth.
            let camera = control.camera();
            let depth = (camera.eye() - center).length();
            let (zoom, _) = crate::transform::decompose_after_project(&transform.after_project());
            -delta.y * camera.world_units_per_pixel(depth, control.viewport().y, zoom)
        };
        world / transform.adapt_scale()
    }
}

impl ActionHandler for ClippingActionHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        priorities::CLIPPING
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.drag = None;
        }
    }

    fn left_down(&mut self, ctx: &mut ActionContext, event: &PointerEvent) -> bool {
        if !ctx.session.is_idle() || !self.clipping.is_enabled() {
            return false;
        }
        let Some(direction) = ctx.control.pick_clip_face(event.position) else {
            return false;
        };
        let Some(start_value) = ctx.control.clip_position(direction) else {
            return false;
        };
        if !ctx.session.begin(InteractionState::Clipping, Some(event.pointer_id)) {
            return false;
        }
        tracing::debug!(%direction, start_value, "clip drag started");
        self.drag = Some(ClipDrag {
            direction,
            start_screen: event.position,
            start_value,
        });
        true
    }

    fn pointer_move(&mut self, ctx: &mut ActionContext, event: &PointerEvent) -> bool {
        if ctx.session.state() != InteractionState::Clipping
            || !ctx.session.owns_pointer(event.pointer_id)
        {
            return false;
        }
        let Some(drag) = self.drag else {
            return false;
        };
        let offset = self.drag_offset(&*ctx.control, drag.direction, event.position - drag.start_screen);
        if ctx.control.update_clip(drag.direction, drag.start_value + offset) {
            ctx.control.request_redraw();
        }
        true
    }

    fn left_up(&mut self, ctx: &mut ActionContext, event: &PointerEvent) -> bool {
        if ctx.session.state() != InteractionState::Clipping
            || !ctx.session.owns_pointer(event.pointer_id)
        {
            return false;
        }
        ctx.session.end(InteractionState::Clipping);
        if let Some(drag) = self.drag.take() {
            tracing::debug!(
                direction = %drag.direction,
                position = ?ctx.control.clip_position(drag.direction),
                "clip drag finished"
            );
        }
        true
    }

    fn cancel(&mut self, _ctx: &mut ActionContext) {
        self.drag = None;
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::actions::ActionPipeline;
    use crate::interaction::InteractionSession;

    #[test]
    fn test_miss_falls_through() {
        let clipping = Clipping::new();
        clipping.set_enabled(true);
        let mut pipeline = ActionPipeline::new();
        pipeline.add(Box::new(ClippingActionHandler::new(clipping)));
        let mut session = InteractionSession::new();
        let mut control = MockControl::new();
        assert!(!pipeline.dispatch(&down(200.0, 200.0), &mut session, &mut control));
        assert!(session.is_idle());
    }

    #[test]
    fn test_disabled_clipping_ignores_faces() {
        let clipping = Clipping::new();
        let mut pipeline = ActionPipeline::new();
        pipeline.add(Box::new(ClippingActionHandler::new(clipping)));
        let mut session = InteractionSession::new();
        let mut control = MockControl::new();
        control.clip_face = Some(ClipDirection::XPositive);
        assert!(!pipeline.dispatch(&down(200.0, 200.0), &mut session, &mut control));
    }

    #[test]
    fn test_grab_claims_clipping_state_until_release() {
        let clipping = Clipping::new();
        clipping.set_enabled(true);
        let mut pipeline = ActionPipeline::new();
        pipeline.add(Box::new(ClippingActionHandler::new(clipping)));
        let mut session = InteractionSession::new();
        let mut control = MockControl::new();
        control.clip_face = Some(ClipDirection::YPositive);

        assert!(pipeline.dispatch(&down(200.0, 200.0), &mut session, &mut control));
        assert_eq!(session.state(), InteractionState::Clipping);
        assert!(pipeline.dispatch(&moved(200.0, 220.0), &mut session, &mut control));
        assert!(pipeline.dispatch(&up(200.0, 220.0), &mut session, &mut control));
        assert!(session.is_idle());
        assert_eq!(session.captured_pointer(), None);
    }
}
