use std::rc::Rc;

use glam::Vec2;

use super::{ActionContext, ActionHandler, priorities};
use crate::events::EventBus;
use crate::interaction::{PointerButton, PointerEvent};
use crate::raycast::HitTestResult;

#[derive(Debug, Clone, PartialEq)]
pub struct FacePicked {
    pub hit: HitTestResult,
    pub screen: Vec2,
}

/// Triangle selection by CPU ray cast. Disabled until switched on.
pub struct FacePickHandler {
    enabled: bool,
    events: Rc<EventBus<FacePicked>>,
}

impl FacePickHandler {
    pub const NAME: &'static str = "face-pick";

    pub fn new() -> Self {
        Self {
            enabled: false,
            events: Rc::new(EventBus::new()),
        }
    }

    pub fn events(&self) -> Rc<EventBus<FacePicked>> {
        Rc::clone(&self.events)
    }
}

impl Default for FacePickHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionHandler for FacePickHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        priorities::FACE_PICK
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
            || !ctx.session.is_button_down(PointerButton::Left)
            || !ctx.session.is_click(event.position, tolerance)
        {
            return false;
        }
        let Some(hit) = ctx.control.hit_test(event.position) else {
            return false;
        };
        tracing::debug!(object = %hit.name, face = hit.face_index, "face picked");
        self.events.trigger(&FacePicked {
            hit,
            screen: event.position,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use glam::Vec3;

    use super::super::test_support::*;
    use super::*;
    use crate::actions::ActionPipeline;
    use crate::interaction::InteractionSession;

    #[test]
    fn test_disabled_by_default() {
        assert!(!FacePickHandler::new().is_enabled());
    }

    #[test]
    fn test_click_reports_face() {
        let mut handler = FacePickHandler::new();
        handler.set_enabled(true);
        let count = Rc::new(Cell::new(0));
        let seen = Rc::clone(&count);
        handler.events().add(move |e: &FacePicked| {
            assert_eq!(e.hit.face_index, 3);
            seen.set(seen.get() + 1);
        });

        let mut pipeline = ActionPipeline::new();
        pipeline.add(Box::new(handler));
        let mut session = InteractionSession::new();
        let mut control = MockControl::new();
        control.hit = Some(HitTestResult {
            name: "part".to_string(),
            drawable: "part".to_string(),
            face_index: 3,
            local_position: Vec3::ZERO,
            distance: 2.0,
        });
        pipeline.dispatch(&down(10.0, 10.0), &mut session, &mut control);
        assert!(pipeline.dispatch(&up(10.0, 10.0), &mut session, &mut control));
        assert_eq!(count.get(), 1);
    }
}
