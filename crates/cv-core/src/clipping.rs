//! Clipping manager: clip box state, per-object cap bookkeeping and the
//! engine binding lifecycle.
//!
//! [`Clipping`] is a cheap handle; clones share one state. It reaches the
//! engine only through [`ClipHost`] and keeps itself current through the
//! engine's event buses.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use glam::{Mat4, Vec3};
use thiserror::Error;
use uuid::Uuid;

use crate::actions::{ActionHandler, ClippingActionHandler};
use crate::bounds::BoundingBox;
use crate::clip::{ClipBox, ClipDirection};
use crate::events::{EngineEvents, HandlerId, MeshEvent, ObjectPart, VisibilityEvent};
use crate::material::{Material, ShaderProgram, Side, StencilOp, StencilTest};
use crate::plane::Plane;
use crate::scene::{DrawableKind, SceneNode};
use crate::transform::TransformSnapshot;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClipError {
    #[error("engine has no model group; initialize it before binding clipping")]
    NoModelGroup,
}

/// Engine-facing capability the clipping manager binds to.
pub trait ClipHost {
    fn host_id(&self) -> Uuid;
    /// Event buses of the model group, `None` before initialization.
    fn clip_events(&self) -> Option<Rc<EngineEvents>>;
    fn domain_range(&self) -> Option<BoundingBox>;
    fn model_matrix(&self) -> Mat4;
    /// Objects already in the scene.
    fn objects(&self) -> Vec<MeshEvent>;
    fn add_action_handler(&mut self, handler: Box<dyn ActionHandler>);
    fn remove_action_handler(&mut self, name: &str) -> bool;
    fn attach_clipping(&mut self, clipping: Option<Clipping>);
}

/// Stencil and cap drawing plan for one object and one plane.
#[derive(Debug, Clone)]
pub struct CapPass {
    pub object: String,
    pub direction: ClipDirection,
    /// World-space plane the stencil passes are clipped against.
    pub plane: Plane,
    /// World-space planes of the other five directions.
    pub other_planes: Vec<Plane>,
    pub parts: Vec<ObjectPart>,
    /// Cap quad corners in object space.
    pub quad: [Vec3; 4],
    pub model: Mat4,
    pub color: [f32; 4],
    pub render_order: f32,
}

impl CapPass {
    /// Stencil-only material for one face side: back faces increment and
    /// front faces decrement, both clipped by this pass' plane alone.
    pub fn stencil_material(&self, side: Side) -> Material {
        let (program, op) = match side {
            Side::Front => (ShaderProgram::StencilFront, StencilOp::DecrementWrap),
            _ => (ShaderProgram::StencilBack, StencilOp::IncrementWrap),
        };
        let mut material = Material::new(program)
            .with_side(side)
            .with_render_order(self.render_order);
        material.params.depth_test = false;
        material.params.depth_write = false;
        material.params.color_write = false;
        material.params.stencil = Some(StencilTest::count(op));
        material.params.clip_planes = vec![self.plane];
        material
    }

    /// Cap material: drawn where the stencil is non-zero, clipped by the
    /// other five planes.
    pub fn cap_material(&self) -> Material {
        let mut material = Material::new(ShaderProgram::Cap)
            .with_color(self.color)
            .with_side(Side::Double)
            .with_render_order(self.render_order + 0.1);
        material.params.stencil = Some(StencilTest::non_zero());
        material.params.clip_planes = self.other_planes.clone();
        material
    }

    /// Cap quad corners in world space.
    pub fn world_quad(&self) -> [Vec3; 4] {
        self.quad.map(|p| self.model.transform_point3(p))
    }
}

#[derive(Debug, Clone)]
struct CapObject {
    name: String,
    visible: bool,
    parts: Vec<ObjectPart>,
}

impl CapObject {
    fn from_event(event: &MeshEvent) -> Option<Self> {
        let parts: Vec<ObjectPart> = event
            .parts
            .iter()
            .filter(|p| p.kind == DrawableKind::Mesh)
            .cloned()
            .collect();
        if parts.is_empty() {
            return None;
        }
        Some(Self {
            name: event.name.clone(),
            visible: event.visible,
            parts,
        })
    }
}

#[derive(Default)]
struct Subscriptions {
    mesh_added: Option<HandlerId>,
    mesh_removing: Option<HandlerId>,
    visibility_changed: Option<HandlerId>,
    domain_range_changed: Option<HandlerId>,
    transform_changed: Option<HandlerId>,
}

struct ClipShared {
    host: Option<Uuid>,
    events: Option<Rc<EngineEvents>>,
    subscriptions: Subscriptions,
    clip_box: ClipBox,
    model: Mat4,
    enabled: bool,
    caps_enabled: bool,
    cap_margin: f32,
    objects: Vec<CapObject>,
}

/// Shared handle to the clipping state.
#[derive(Clone)]
pub struct Clipping {
    shared: Rc<RefCell<ClipShared>>,
}

impl Clipping {
    pub fn new() -> Self {
        Self {
            shared: Rc::new(RefCell::new(ClipShared {
                host: None,
                events: None,
                subscriptions: Subscriptions::default(),
                clip_box: ClipBox::new(),
                model: Mat4::IDENTITY,
                enabled: false,
                caps_enabled: true,
                cap_margin: 0.05,
                objects: Vec::new(),
            })),
        }
    }

    /// Cap quads extend past the domain by this share of its largest side.
    pub fn with_cap_margin(self, margin: f32) -> Self {
        self.shared.borrow_mut().cap_margin = margin.max(0.0);
        self
    }

    /// Binds to a host. Binding the host already bound is a no-op; binding
    /// a different host first unbinds from the previous one.
    pub fn bind(&self, host: &mut dyn ClipHost) -> Result<(), ClipError> {
        let id = host.host_id();
        if self.bound_to() == Some(id) {
            return Ok(());
        }
        let events = host.clip_events().ok_or(ClipError::NoModelGroup)?;
        if self.is_bound() {
            self.release();
        }

        {
            let mut shared = self.shared.borrow_mut();
            shared.host = Some(id);
            shared.clip_box.set_domain(host.domain_range());
            shared.model = host.model_matrix();
            shared.objects = host.objects().iter().filter_map(CapObject::from_event).collect();
            shared.subscriptions = self.subscribe(&events);
            shared.events = Some(events);
        }

        host.add_action_handler(Box::new(ClippingActionHandler::new(self.clone())));
        host.attach_clipping(Some(self.clone()));
        tracing::debug!(host = %id, "clipping bound");
        Ok(())
    }

    /// Unbinds from `host`. Returns false if not bound to it.
    pub fn unbind(&self, host: &mut dyn ClipHost) -> bool {
        if self.bound_to() != Some(host.host_id()) {
            return false;
        }
        self.release();
        host.remove_action_handler(ClippingActionHandler::NAME);
        host.attach_clipping(None);
        true
    }

    /// Drops subscriptions and every per-object cap record.
    fn release(&self) {
        let mut shared = self.shared.borrow_mut();
        if let Some(events) = shared.events.take() {
            let subs = std::mem::take(&mut shared.subscriptions);
            if let Some(id) = subs.mesh_added {
                events.mesh_added.remove(id);
            }
            if let Some(id) = subs.mesh_removing {
                events.mesh_removing.remove(id);
            }
            if let Some(id) = subs.visibility_changed {
                events.visibility_changed.remove(id);
            }
            if let Some(id) = subs.domain_range_changed {
                events.domain_range_changed.remove(id);
            }
            if let Some(id) = subs.transform_changed {
                events.transform_changed.remove(id);
            }
        }
        let previous = shared.host.take();
        shared.objects.clear();
        tracing::debug!(host = ?previous, "clipping unbound");
    }

    fn subscribe(&self, events: &EngineEvents) -> Subscriptions {
        let weak = Rc::downgrade(&self.shared);
        Subscriptions {
            mesh_added: Some(events.mesh_added.add(forward::<MeshEvent>(&weak, |s, event| {
                s.objects.retain(|o| o.name != event.name);
                s.objects.extend(CapObject::from_event(event));
            }))),
            mesh_removing: Some(events.mesh_removing.add(forward::<MeshEvent>(
                &weak,
                |s, event| s.objects.retain(|o| o.name != event.name),
            ))),
            visibility_changed: Some(events.visibility_changed.add(forward::<VisibilityEvent>(
                &weak,
                |s, event| {
                    if let Some(object) = s.objects.iter_mut().find(|o| o.name == event.name) {
                        object.visible = event.visible;
                    }
                },
            ))),
            domain_range_changed: Some(events.domain_range_changed.add(forward::<Option<BoundingBox>>(
                &weak,
                |s, range| s.clip_box.set_domain(*range),
            ))),
            transform_changed: Some(events.transform_changed.add(forward::<TransformSnapshot>(
                &weak,
                |s, snapshot| s.model = snapshot.model,
            ))),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.shared.borrow().host.is_some()
    }

    pub fn bound_to(&self) -> Option<Uuid> {
        self.shared.borrow().host
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.borrow().enabled
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.shared.borrow_mut().enabled = enabled;
    }

    pub fn caps_enabled(&self) -> bool {
        self.shared.borrow().caps_enabled
    }

    pub fn set_caps_enabled(&self, enabled: bool) {
        self.shared.borrow_mut().caps_enabled = enabled;
    }

    /// Moves one plane; see [`ClipBox::update`].
    pub fn update(&self, direction: ClipDirection, value: f32) -> bool {
        let changed = self.shared.borrow_mut().clip_box.update(direction, value);
        if changed {
            tracing::trace!(%direction, value, "clip plane moved");
        }
        changed
    }

    pub fn reset(&self) {
        self.shared.borrow_mut().clip_box.reset();
    }

    pub fn position(&self, direction: ClipDirection) -> f32 {
        self.shared.borrow().clip_box.position(direction)
    }

    pub fn range(&self, direction: ClipDirection) -> (f32, f32) {
        self.shared.borrow().clip_box.range(direction)
    }

    pub fn clip_box(&self) -> ClipBox {
        self.shared.borrow().clip_box.clone()
    }

    pub fn model_matrix(&self) -> Mat4 {
        self.shared.borrow().model
    }

    /// Names of objects with cap geometry.
    pub fn capped_objects(&self) -> Vec<String> {
        self.shared
            .borrow()
            .objects
            .iter()
            .map(|o| o.name.clone())
            .collect()
    }

    /// World-space planes of all six directions, regardless of the enabled
    /// flag. `None` without a domain.
    pub fn world_planes(&self) -> Option<[Plane; 6]> {
        let shared = self.shared.borrow();
        shared.clip_box.domain()?;
        Some(shared.clip_box.world_planes(&shared.model))
    }

    /// Planes materials should clip against: all six when enabled, none
    /// otherwise.
    pub fn active_planes(&self) -> Vec<Plane> {
        if !self.is_enabled() {
            return Vec::new();
        }
        self.world_planes().map(|p| p.to_vec()).unwrap_or_default()
    }

    /// Per object and cutting plane, the stencil and cap plan. Render order
    /// is staggered per object and plane.
    pub fn cap_passes(&self) -> Vec<CapPass> {
        let shared = self.shared.borrow();
        if !shared.enabled || !shared.caps_enabled || shared.clip_box.domain().is_none() {
            return Vec::new();
        }
        let world = shared.clip_box.world_planes(&shared.model);
        let mut passes = Vec::new();
        for (index, object) in shared.objects.iter().enumerate() {
            if !object.visible {
                continue;
            }
            for direction in ClipDirection::ALL {
                if !shared.clip_box.is_cutting(direction) {
                    continue;
                }
                let Some(quad) = shared.clip_box.cap_quad(direction, shared.cap_margin) else {
                    continue;
                };
                let other_planes = ClipDirection::ALL
                    .iter()
                    .filter(|d| **d != direction)
                    .map(|d| world[d.index()])
                    .collect();
                passes.push(CapPass {
                    object: object.name.clone(),
                    direction,
                    plane: world[direction.index()],
                    other_planes,
                    parts: object.parts.clone(),
                    quad,
                    model: shared.model,
                    color: object.parts[0].color,
                    render_order: 1.0 + (index * 6 + direction.index()) as f32,
                });
            }
        }
        passes
    }

    /// Clip-handle proxy volume, positioned in object space.
    pub fn handle_proxy(&self) -> Option<SceneNode> {
        self.shared.borrow().clip_box.handle_proxy()
    }

    /// World-space center of a direction's current face.
    pub fn face_center_world(&self, direction: ClipDirection) -> Option<Vec3> {
        let shared = self.shared.borrow();
        shared.clip_box.domain()?;
        Some(
            shared
                .model
                .transform_point3(shared.clip_box.face_center(direction)),
        )
    }
}

/// Wraps a state update into an event handler that holds the clipping
/// state weakly.
fn forward<T: 'static>(
    weak: &Weak<RefCell<ClipShared>>,
    update: fn(&mut ClipShared, &T),
) -> impl Fn(&T) + 'static {
    let weak = weak.clone();
    move |payload| {
        if let Some(shared) = weak.upgrade() {
            update(&mut shared.borrow_mut(), payload);
        }
    }
}

impl Default for Clipping {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Clipping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared.borrow();
        f.debug_struct("Clipping")
            .field("host", &shared.host)
            .field("enabled", &shared.enabled)
            .field("positions", &shared.clip_box.positions())
            .field("objects", &shared.objects.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use crate::material::Material;
    use crate::scene::Drawable;

    struct MockHost {
        id: Uuid,
        events: Option<Rc<EngineEvents>>,
        handlers: Vec<String>,
        attached: bool,
    }

    impl MockHost {
        fn new(initialized: bool) -> Self {
            Self {
                id: Uuid::new_v4(),
                events: initialized.then(|| Rc::new(EngineEvents::new())),
                handlers: Vec::new(),
                attached: false,
            }
        }
    }

    impl ClipHost for MockHost {
        fn host_id(&self) -> Uuid {
            self.id
        }
        fn clip_events(&self) -> Option<Rc<EngineEvents>> {
            self.events.clone()
        }
        fn domain_range(&self) -> Option<BoundingBox> {
            Some(BoundingBox::new(Vec3::splat(-1.0), Vec3::ONE))
        }
        fn model_matrix(&self) -> Mat4 {
            Mat4::IDENTITY
        }
        fn objects(&self) -> Vec<MeshEvent> {
            Vec::new()
        }
        fn add_action_handler(&mut self, handler: Box<dyn ActionHandler>) {
            self.handlers.push(handler.name().to_string());
        }
        fn remove_action_handler(&mut self, name: &str) -> bool {
            let before = self.handlers.len();
            self.handlers.retain(|h| h != name);
            before != self.handlers.len()
        }
        fn attach_clipping(&mut self, clipping: Option<Clipping>) {
            self.attached = clipping.is_some();
        }
    }

    fn cube_event(name: &str) -> MeshEvent {
        let node = SceneNode::from(Drawable::mesh(
            name,
            Geometry::new(vec![[-1.0, -1.0, -1.0], [1.0, 1.0, 1.0], [1.0, -1.0, 1.0]]),
            Material::lit([0.2, 0.4, 0.6, 1.0]),
        ));
        MeshEvent::from_node(&node)
    }

    #[test]
    fn test_bind_requires_model_group() {
        let clipping = Clipping::new();
        let mut host = MockHost::new(false);
        assert_eq!(clipping.bind(&mut host), Err(ClipError::NoModelGroup));
        assert!(!clipping.is_bound());
    }

    #[test]
    fn test_bind_twice_is_noop() {
        let clipping = Clipping::new();
        let mut host = MockHost::new(true);
        clipping.bind(&mut host).unwrap();
        clipping.bind(&mut host).unwrap();
        assert_eq!(host.handlers, vec![ClippingActionHandler::NAME.to_string()]);
        let events = host.events.clone().unwrap();
        assert_eq!(events.mesh_added.len(), 1);
        assert!(host.attached);
    }

    #[test]
    fn test_follows_engine_events() {
        let clipping = Clipping::new();
        let mut host = MockHost::new(true);
        clipping.bind(&mut host).unwrap();
        let events = host.events.clone().unwrap();

        events.mesh_added.trigger(&cube_event("m1"));
        assert_eq!(clipping.capped_objects(), vec!["m1".to_string()]);

        let model = Mat4::from_scale(Vec3::splat(0.5));
        events.transform_changed.trigger(&TransformSnapshot {
            model,
            rotation: Mat4::IDENTITY,
            adapt: model,
            after_project: Mat4::IDENTITY,
        });
        assert_eq!(clipping.model_matrix(), model);

        clipping.set_enabled(true);
        clipping.update(ClipDirection::XPositive, 0.0);
        let passes = clipping.cap_passes();
        assert_eq!(passes.len(), 1);
        assert_eq!(passes[0].direction, ClipDirection::XPositive);
        assert_eq!(passes[0].other_planes.len(), 5);
        assert_eq!(passes[0].color, [0.2, 0.4, 0.6, 1.0]);

        events.visibility_changed.trigger(&VisibilityEvent {
            name: "m1".into(),
            visible: false,
        });
        assert!(clipping.cap_passes().is_empty());

        events.mesh_removing.trigger(&cube_event("m1"));
        assert!(clipping.capped_objects().is_empty());
    }

    #[test]
    fn test_unbind_disposes_everything() {
        let clipping = Clipping::new();
        let mut host = MockHost::new(true);
        clipping.bind(&mut host).unwrap();
        let events = host.events.clone().unwrap();
        events.mesh_added.trigger(&cube_event("m1"));

        assert!(clipping.unbind(&mut host));
        assert!(!clipping.unbind(&mut host));
        assert!(host.handlers.is_empty());
        assert!(!host.attached);
        assert!(events.mesh_added.is_empty());
        assert!(events.transform_changed.is_empty());
        assert!(clipping.capped_objects().is_empty());

        // Rebinding subscribes cleanly again
        clipping.bind(&mut host).unwrap();
        assert_eq!(events.mesh_added.len(), 1);
    }

    #[test]
    fn test_binding_new_host_releases_old() {
        let clipping = Clipping::new();
        let mut first = MockHost::new(true);
        let mut second = MockHost::new(true);
        clipping.bind(&mut first).unwrap();
        clipping.bind(&mut second).unwrap();
        assert_eq!(clipping.bound_to(), Some(second.id));
        assert!(first.events.as_ref().unwrap().mesh_added.is_empty());
        assert_eq!(second.events.as_ref().unwrap().mesh_added.len(), 1);
    }

    #[test]
    fn test_stencil_materials() {
        let pass = CapPass {
            object: "m1".into(),
            direction: ClipDirection::ZPositive,
            plane: Plane::new(Vec3::NEG_Z, 0.0),
            other_planes: vec![Plane::new(Vec3::X, 1.0); 5],
            parts: cube_event("m1").parts,
            quad: [Vec3::ZERO; 4],
            model: Mat4::IDENTITY,
            color: [1.0; 4],
            render_order: 4.0,
        };
        let back = pass.stencil_material(Side::Back);
        assert_eq!(back.program, ShaderProgram::StencilBack);
        assert_eq!(back.params.stencil.unwrap().op, StencilOp::IncrementWrap);
        assert!(!back.params.color_write && !back.params.depth_test);
        let front = pass.stencil_material(Side::Front);
        assert_eq!(front.params.stencil.unwrap().op, StencilOp::DecrementWrap);
        let cap = pass.cap_material();
        assert_eq!(cap.params.clip_planes.len(), 5);
        assert!(cap.params.render_order > back.params.render_order);
    }
}
