use std::rc::Rc;

use glam::{Vec2, Vec3};

use super::{ActionContext, ActionHandler, priorities};
use crate::events::EventBus;
use crate::interaction::{PointerButton, PointerEvent};
use crate::pick::{PickHit, PickMode, PickPart};

/// An object and the local surface position under a click.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionPicked {
    pub object: String,
    pub part: PickPart,
    pub position: Vec3,
    pub screen: Vec2,
}

/// Identity pick on left click.
pub struct PositionPickHandler {
    enabled: bool,
    events: Rc<EventBus<PositionPicked>>,
}

impl PositionPickHandler {
    pub const NAME: &'static str = "position-pick";

    pub fn new() -> Self {
        Self {
            enabled: true,
            events: Rc::new(EventBus::new()),
        }
    }

    pub fn events(&self) -> Rc<EventBus<PositionPicked>> {
        Rc::clone(&self.events)
    }
}

impl Default for PositionPickHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionHandler for PositionPickHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        priorities::POSITION_PICK
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn left_up(&mut self, ctx: &mut ActionContext, event: &PointerEvent) -> bool {
        let tolerance = ctx.control.interaction_config().click_tolerance;
        if !ctx.session.is_idle()
            || event.modifiers.shift
            || !ctx.session.is_button_down(PointerButton::Left)
            || !ctx.session.is_click(event.position, tolerance)
        {
            return false;
        }
        match ctx.control.pick(event.position, PickMode::Identity) {
            Ok(Some(PickHit::Identity {
                object,
                part,
                position,
            })) => {
                tracing::debug!(%object, ?position, "position picked");
                self.events.trigger(&PositionPicked {
                    object,
                    part,
                    position,
                    screen: event.position,
                });
                true
            }
            Ok(_) => false,
            Err(e) => {
                tracing::warn!("position pick failed: {e}");
                false
            }
        }
    }
}
