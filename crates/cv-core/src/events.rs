//! Synchronous publish/subscribe channels.
//!
//! [`EventBus::trigger`] calls handlers in registration order against a
//! snapshot of the handler list: handlers added or removed while a trigger
//! is in flight only affect later triggers. Delivery is single-threaded and
//! immediate; nothing is queued.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use glam::Mat4;

use crate::bounds::BoundingBox;
use crate::geometry::Geometry;
use crate::scene::{DrawableKey, DrawableKind, SceneNode};
use crate::transform::TransformSnapshot;

/// Token returned by [`EventBus::add`], used to remove the handler again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler<T> = Rc<dyn Fn(&T)>;

/// Typed single-threaded event channel.
pub struct EventBus<T> {
    handlers: RefCell<Vec<(HandlerId, Handler<T>)>>,
    next_id: Cell<u64>,
}

impl<T> EventBus<T> {
    pub fn new() -> Self {
        Self {
            handlers: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
        }
    }

    pub fn add(&self, handler: impl Fn(&T) + 'static) -> HandlerId {
        let id = HandlerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.handlers.borrow_mut().push((id, Rc::new(handler)));
        id
    }

    /// Removes a handler. Returns false if it was not registered.
    pub fn remove(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.borrow_mut();
        let before = handlers.len();
        handlers.retain(|(h, _)| *h != id);
        handlers.len() != before
    }

    pub fn trigger(&self, payload: &T) {
        let snapshot: Vec<Handler<T>> = self
            .handlers
            .borrow()
            .iter()
            .map(|(_, h)| Rc::clone(h))
            .collect();
        for handler in snapshot {
            handler(payload);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.handlers.borrow_mut().clear();
    }
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// One drawable of an object, as seen by feature modules.
#[derive(Debug, Clone)]
pub struct ObjectPart {
    pub key: DrawableKey,
    pub kind: DrawableKind,
    pub geometry: Arc<Geometry>,
    /// Transform from drawable space to model space.
    pub local: Mat4,
    pub color: [f32; 4],
}

/// Payload of mesh-added and mesh-removing notifications.
#[derive(Debug, Clone)]
pub struct MeshEvent {
    pub name: String,
    pub visible: bool,
    pub parts: Vec<ObjectPart>,
}

impl MeshEvent {
    /// Describes a top-level object node.
    pub fn from_node(node: &SceneNode) -> Self {
        let mut parts = Vec::new();
        node.visit_drawables(&node.name, Mat4::IDENTITY, true, &mut |visit| {
            parts.push(ObjectPart {
                key: visit.key,
                kind: visit.drawable.kind,
                geometry: Arc::clone(&visit.drawable.geometry),
                local: visit.world,
                color: visit
                    .drawable
                    .primary_material()
                    .map(|m| m.params.color)
                    .unwrap_or([0.8, 0.8, 0.8, 1.0]),
            });
        });
        Self {
            name: node.name.clone(),
            visible: node.visible,
            parts,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisibilityEvent {
    pub name: String,
    pub visible: bool,
}

/// Channels an engine publishes to its optional feature modules.
#[derive(Default)]
pub struct EngineEvents {
    /// Fired after the object is attached and bounds/transforms are updated.
    pub mesh_added: EventBus<MeshEvent>,
    /// Fired before the object is detached and released.
    pub mesh_removing: EventBus<MeshEvent>,
    pub visibility_changed: EventBus<VisibilityEvent>,
    pub domain_range_changed: EventBus<Option<BoundingBox>>,
    pub transform_changed: EventBus<TransformSnapshot>,
}

impl EngineEvents {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_in_registration_order() {
        let bus = EventBus::<u32>::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let log = Rc::clone(&log);
            bus.add(move |v| log.borrow_mut().push(format!("{tag}{v}")));
        }
        bus.trigger(&7);
        assert_eq!(*log.borrow(), vec!["a7", "b7", "c7"]);
    }

    #[test]
    fn test_remove_handler() {
        let bus = EventBus::<()>::new();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let id = bus.add(move |_| h.set(h.get() + 1));
        assert!(bus.remove(id));
        assert!(!bus.remove(id));
        bus.trigger(&());
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn test_snapshot_semantics_during_trigger() {
        let bus = Rc::new(EventBus::<()>::new());
        let hits = Rc::new(Cell::new(0));

        // First handler registers a new handler and removes the second one.
        let second_id = Rc::new(Cell::new(None));
        {
            let bus_ref = Rc::downgrade(&bus);
            let hits = Rc::clone(&hits);
            let second_id = Rc::clone(&second_id);
            bus.add(move |_| {
                let Some(bus) = bus_ref.upgrade() else { return };
                let hits = Rc::clone(&hits);
                bus.add(move |_| hits.set(hits.get() + 100));
                if let Some(id) = second_id.get() {
                    bus.remove(id);
                }
            });
        }
        {
            let hits = Rc::clone(&hits);
            second_id.set(Some(bus.add(move |_| hits.set(hits.get() + 1))));
        }

        bus.trigger(&());
        // The removed handler still ran, the added one did not.
        assert_eq!(hits.get(), 1);
        assert_eq!(bus.len(), 2);
    }
}
