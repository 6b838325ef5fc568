use glam::Vec2;

use super::{ActionContext, ActionHandler, priorities};
use crate::camera::screen_to_ndc;
use crate::interaction::{InteractionState, PointerEvent, WheelEvent};
use crate::transform::{after_project_matrix, decompose_after_project};

/// Screen-space zoom and pan through the after-project matrix.
pub struct PanZoomHandler {
    enabled: bool,
}

impl PanZoomHandler {
    pub const NAME: &'static str = "pan-zoom";

    pub fn new() -> Self {
        Self { enabled: true }
    }

    fn begin_pan(ctx: &mut ActionContext, event: &PointerEvent) -> bool {
        ctx.session.begin(InteractionState::Pan, Some(event.pointer_id))
    }

    fn end_pan(ctx: &mut ActionContext, event: &PointerEvent) -> bool {
        if ctx.session.state() != InteractionState::Pan || !ctx.session.owns_pointer(event.pointer_id) {
            return false;
        }
        ctx.session.end(InteractionState::Pan)
    }
}

impl Default for PanZoomHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionHandler for PanZoomHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        priorities::PAN_ZOOM
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Zooms about the cursor so the point under it stays fixed.
    fn wheel(&mut self, ctx: &mut ActionContext, event: &WheelEvent) -> bool {
        if !ctx.session.is_idle() || event.delta == 0.0 || !event.delta.is_finite() {
            return false;
        }
        let config = ctx.control.interaction_config();
        let factor = config.zoom_step.powf(event.delta.signum());
        let (min_zoom, max_zoom) = (config.min_zoom, config.max_zoom);

        let (zoom, pan) = decompose_after_project(&ctx.control.transform().after_project());
        let new_zoom = (zoom * factor).clamp(min_zoom, max_zoom);
        if new_zoom == zoom {
            return true;
        }
        let cursor = screen_to_ndc(event.position, ctx.control.viewport());
        let anchor = (cursor - pan) / zoom;
        let new_pan = cursor - anchor * new_zoom;
        ctx.control.set_after_project(after_project_matrix(new_zoom, new_pan));
        ctx.control.request_redraw();
        true
    }

    fn right_down(&mut self, ctx: &mut ActionContext, event: &PointerEvent) -> bool {
        Self::begin_pan(ctx, event)
    }

    fn middle_down(&mut self, ctx: &mut ActionContext, event: &PointerEvent) -> bool {
        Self::begin_pan(ctx, event)
    }

    fn pointer_move(&mut self, ctx: &mut ActionContext, event: &PointerEvent) -> bool {
        if ctx.session.state() != InteractionState::Pan || !ctx.session.owns_pointer(event.pointer_id) {
            return false;
        }
        let delta = ctx.session.delta(event.position);
        let viewport = ctx.control.viewport().max(Vec2::ONE);
        let (zoom, pan) = decompose_after_project(&ctx.control.transform().after_project());
        let shift = Vec2::new(2.0 * delta.x / viewport.x, -2.0 * delta.y / viewport.y);
        ctx.control.set_after_project(after_project_matrix(zoom, pan + shift));
        ctx.control.request_redraw();
        true
    }

    fn right_up(&mut self, ctx: &mut ActionContext, event: &PointerEvent) -> bool {
        Self::end_pan(ctx, event)
    }

    fn middle_up(&mut self, ctx: &mut ActionContext, event: &PointerEvent) -> bool {
        Self::end_pan(ctx, event)
    }
}
