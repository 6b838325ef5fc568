use std::rc::Rc;

use glam::{Vec2, Vec3};

use super::{ActionContext, ActionHandler, priorities};
use crate::events::EventBus;
use crate::interaction::{InteractionState, PointerButton, PointerEvent};
use crate::pick::{PickHit, PickMode};

/// Interpolated scalar under the pointer.
#[derive(Debug, Clone, PartialEq)]
pub struct ValuePicked {
    pub position: Vec3,
    pub value: f32,
    pub screen: Vec2,
    /// True while a shift-drag sample is active.
    pub sampling: bool,
}

/// Value pick on shift-click; shift-drag samples continuously.
pub struct ValuePickHandler {
    enabled: bool,
    events: Rc<EventBus<ValuePicked>>,
}

impl ValuePickHandler {
    pub const NAME: &'static str = "value-pick";

    pub fn new() -> Self {
        Self {
            enabled: true,
            events: Rc::new(EventBus::new()),
        }
    }

    pub fn events(&self) -> Rc<EventBus<ValuePicked>> {
        Rc::clone(&self.events)
    }

    fn sample(&self, ctx: &mut ActionContext, screen: Vec2, sampling: bool) -> bool {
        match ctx.control.pick(screen, PickMode::Value) {
            Ok(Some(PickHit::Value { position, value })) => {
                tracing::trace!(value, ?position, "value picked");
                self.events.trigger(&ValuePicked {
                    position,
                    value,
                    screen,
                    sampling,
                });
                true
            }
            Ok(_) => false,
            Err(e) => {
                tracing::warn!("value pick failed: {e}");
                false
            }
        }
    }
}

impl Default for ValuePickHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionHandler for ValuePickHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        priorities::VALUE_PICK
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn pointer_move(&mut self, ctx: &mut ActionContext, event: &PointerEvent) -> bool {
        match ctx.session.state() {
            InteractionState::HitTest => {
                if !ctx.session.owns_pointer(event.pointer_id) {
                    return false;
                }
                self.sample(ctx, event.position, true);
                true
            }
            InteractionState::None => {
                if !event.modifiers.shift || !ctx.session.is_button_down(PointerButton::Left) {
                    return false;
                }
                let tolerance = ctx.control.interaction_config().click_tolerance;
                let Some(down) = ctx.session.down_position() else {
                    return false;
                };
                if down.distance(event.position) <= tolerance
                    || !ctx.session.begin(InteractionState::HitTest, Some(event.pointer_id))
                {
                    return false;
                }
                self.sample(ctx, event.position, true);
                true
            }
            _ => false,
        }
    }

    fn left_up(&mut self, ctx: &mut ActionContext, event: &PointerEvent) -> bool {
        if ctx.session.state() == InteractionState::HitTest {
            if !ctx.session.owns_pointer(event.pointer_id) {
                return false;
            }
            return ctx.session.end(InteractionState::HitTest);
        }
        let tolerance = ctx.control.interaction_config().click_tolerance;
        if !ctx.session.is_idle()
            || !event.modifiers.shift
            || !ctx.session.is_button_down(PointerButton::Left)
            || !ctx.session.is_click(event.position, tolerance)
        {
            return false;
        }
        self.sample(ctx, event.position, false)
    }
}
