//! Headless engine behavior: scene mutation, events, picking and clipping
//! without a GPU device.

use std::cell::RefCell;
use std::rc::Rc;

use approx::assert_relative_eq;
use cv_core::actions::ClippingActionHandler;
use cv_core::{
    ActionContext, ActionHandler, BoundingBox, ClipDirection, Clipping, Drawable, Geometry, InputEvent,
    InteractionState, Material, PickHit, PickMode, PickPart, PointerButton, PointerEvent, ValueRamp,
};
use cv_renderer::{Engine, EngineError, RendererConfig, Surface};
use glam::{Mat4, Vec2, Vec3};

const WIDTH: u32 = 200;
const HEIGHT: u32 = 100;

fn center() -> Vec2 {
    Vec2::new(WIDTH as f32 / 2.0, HEIGHT as f32 / 2.0)
}

fn cube_geometry() -> Geometry {
    let positions = vec![
        [-1.0, -1.0, -1.0],
        [1.0, -1.0, -1.0],
        [1.0, 1.0, -1.0],
        [-1.0, 1.0, -1.0],
        [-1.0, -1.0, 1.0],
        [1.0, -1.0, 1.0],
        [1.0, 1.0, 1.0],
        [-1.0, 1.0, 1.0],
    ];
    let indices = vec![
        0, 2, 1, 0, 3, 2, // -Z
        4, 5, 6, 4, 6, 7, // +Z
        0, 1, 5, 0, 5, 4, // -Y
        3, 7, 6, 3, 6, 2, // +Y
        0, 4, 7, 0, 7, 3, // -X
        1, 2, 6, 1, 6, 5, // +X
    ];
    Geometry::new(positions).with_indices(indices)
}

fn cube(name: &str) -> Drawable {
    Drawable::mesh(name, cube_geometry(), Material::lit([0.8, 0.8, 0.8, 1.0]))
}

fn engine() -> Engine {
    let mut engine = Engine::new(RendererConfig::default());
    engine.init(Surface::Headless, WIDTH, HEIGHT).unwrap();
    engine
}

fn left(kind: fn(PointerEvent) -> InputEvent, position: Vec2) -> InputEvent {
    kind(PointerEvent::new(position, Some(PointerButton::Left)))
}

fn moved(position: Vec2) -> InputEvent {
    InputEvent::PointerMove(PointerEvent::new(position, None))
}

#[test]
fn test_not_initialized_errors() {
    let mut engine = Engine::new(RendererConfig::default());
    assert_eq!(engine.add_mesh(cube("m1")), Err(EngineError::NotInitialized));
    assert_eq!(engine.pick(center(), PickMode::Identity), Err(EngineError::NotInitialized));
    assert!(engine.mesh_names().is_empty());
}

#[test]
fn test_duplicate_name_leaves_scene_untouched() {
    let mut engine = engine();
    engine.add_mesh(cube("m1")).unwrap();
    let bounds_before = engine.object("m1").unwrap().bounds();

    let replacement = Drawable::mesh(
        "m1",
        Geometry::new(vec![[0.0, 0.0, 0.0], [5.0, 0.0, 0.0], [0.0, 5.0, 0.0]]),
        Material::lit([1.0, 0.0, 0.0, 1.0]),
    );
    assert!(matches!(engine.add_mesh(replacement), Err(EngineError::Scene(_))));
    assert_eq!(engine.mesh_count(), 1);
    assert_eq!(engine.object("m1").unwrap().bounds(), bounds_before);
    assert_eq!(
        engine.domain_range(),
        Some(BoundingBox::new(Vec3::splat(-1.0), Vec3::splat(1.0)))
    );
}

#[test]
fn test_domain_event_precedes_mesh_added() {
    let mut engine = engine();
    let log = Rc::new(RefCell::new(Vec::new()));
    let events = engine.events();
    let l = Rc::clone(&log);
    events.domain_range_changed.add(move |_| l.borrow_mut().push("domain"));
    let l = Rc::clone(&log);
    events.transform_changed.add(move |_| l.borrow_mut().push("transform"));
    let l = Rc::clone(&log);
    events.mesh_added.add(move |e| l.borrow_mut().push(if e.name == "m1" { "added" } else { "other" }));

    engine.add_mesh(cube("m1")).unwrap();
    assert_eq!(*log.borrow(), vec!["domain", "transform", "added"]);
}

#[test]
fn test_remove_mesh_announces_first() {
    let mut engine = engine();
    engine.add_mesh(cube("m1")).unwrap();
    let seen = Rc::new(RefCell::new(None));
    let s = Rc::clone(&seen);
    engine
        .events()
        .mesh_removing
        .add(move |e| *s.borrow_mut() = Some(e.name.clone()));

    assert_eq!(engine.remove_mesh("m1"), Ok(true));
    assert_eq!(seen.borrow().as_deref(), Some("m1"));
    assert_eq!(engine.mesh_count(), 0);
    assert_eq!(engine.domain_range(), None);
    assert_eq!(engine.remove_mesh("m1"), Ok(false));
}

#[test]
fn test_identity_pick_is_stable() {
    let mut engine = engine();
    engine.add_mesh(cube("m1")).unwrap();
    let first = engine.pick(center(), PickMode::Identity).unwrap();
    let second = engine.pick(center(), PickMode::Identity).unwrap();
    assert_eq!(first, second);

    let hit = first.expect("cube covers the center");
    assert_eq!(hit.object(), Some("m1"));
    assert_relative_eq!(hit.position().z, 1.0, epsilon = 1e-2);

    assert_eq!(engine.pick(Vec2::new(2.0, 2.0), PickMode::Identity).unwrap(), None);
}

#[test]
fn test_value_pick_without_values_never_hits() {
    let mut engine = engine();
    engine.add_mesh(cube("m1")).unwrap();
    for screen in [center(), Vec2::new(90.0, 40.0), Vec2::new(5.0, 5.0)] {
        assert_eq!(engine.pick(screen, PickMode::Value).unwrap(), None);
    }
}

#[test]
fn test_value_pick_reads_interpolated_value() {
    let mut engine = engine();
    let geometry = cube_geometry().with_generic(vec![3.0; 8]);
    engine
        .add_mesh(Drawable::mesh(
            "field",
            geometry,
            Material::value_mapped(ValueRamp::new(0.0, 5.0)),
        ))
        .unwrap();
    match engine.pick(center(), PickMode::Value).unwrap() {
        Some(PickHit::Value { value, .. }) => assert_relative_eq!(value, 3.0, epsilon = 1e-3),
        other => panic!("expected value hit, got {other:?}"),
    }
}

#[test]
fn test_hidden_objects_are_not_picked() {
    let mut engine = engine();
    engine.add_mesh(cube("m1")).unwrap();
    let visibility = Rc::new(RefCell::new(Vec::new()));
    let v = Rc::clone(&visibility);
    engine
        .events()
        .visibility_changed
        .add(move |e| v.borrow_mut().push(e.visible));

    assert_eq!(engine.set_visible(false, "m1"), Ok(true));
    assert_eq!(engine.set_visible(false, "m1"), Ok(true));
    assert_eq!(engine.pick(center(), PickMode::Identity).unwrap(), None);
    assert_eq!(*visibility.borrow(), vec![false]);
    assert_eq!(engine.set_visible(true, "missing"), Ok(false));
}

#[test]
fn test_clipping_bind_and_unbind_are_idempotent() {
    let mut engine = engine();
    engine.add_mesh(cube("m1")).unwrap();
    let clipping = Clipping::new();

    clipping.bind(&mut engine).unwrap();
    clipping.bind(&mut engine).unwrap();
    let handlers = engine.action_handler_names();
    assert_eq!(
        handlers.iter().filter(|n| *n == ClippingActionHandler::NAME).count(),
        1
    );
    assert!(engine.clipping().is_some());
    assert_eq!(clipping.capped_objects(), vec!["m1".to_string()]);

    assert!(clipping.unbind(&mut engine));
    assert!(!clipping.unbind(&mut engine));
    assert!(!engine.action_handler_names().iter().any(|n| n == ClippingActionHandler::NAME));
    assert!(engine.clipping().is_none());
}

#[test]
fn test_clipping_requires_initialized_engine() {
    let mut engine = Engine::new(RendererConfig::default());
    assert!(Clipping::new().bind(&mut engine).is_err());
}

#[test]
fn test_binding_elsewhere_detaches_previous_engine() {
    let mut a = engine();
    let mut b = engine();
    let clipping = Clipping::new();
    clipping.bind(&mut a).unwrap();
    clipping.bind(&mut b).unwrap();
    assert_eq!(clipping.bound_to(), Some(b.id()));

    a.dispatch(InputEvent::Cancel).unwrap();
    assert!(a.clipping().is_none());
    assert!(!a.action_handler_names().iter().any(|n| n == ClippingActionHandler::NAME));
}

#[test]
fn test_update_clip_is_bounded_by_opposite_plane() {
    let mut engine = engine();
    engine.add_mesh(cube("m1")).unwrap();
    let clipping = Clipping::new();
    clipping.bind(&mut engine).unwrap();
    clipping.set_enabled(true);

    assert!(engine.update_clip(ClipDirection::XPositive, -5.0));
    // Clamped to the opposite limit plus a tenth of the extent.
    let x_pos = engine.clip_position(ClipDirection::XPositive).unwrap();
    assert_relative_eq!(x_pos, -0.8, epsilon = 1e-5);
    assert_relative_eq!(engine.clip_position(ClipDirection::XNegative).unwrap(), 1.0);
}

/// Cube clipped at x = 0 and turned so its +X side faces the camera.
fn clipped_cube_facing_x() -> (Engine, Clipping) {
    let mut engine = engine();
    engine.add_mesh(cube("m1")).unwrap();
    let clipping = Clipping::new();
    clipping.bind(&mut engine).unwrap();
    assert!(engine.set_clipping_enabled(true));
    assert!(engine.update_clip(ClipDirection::XPositive, 0.0));
    engine.apply_rotation_delta(Vec3::Y, (-72.0f32).to_radians());
    (engine, clipping)
}

#[test]
fn test_identity_pick_hits_section_cap() {
    let (mut engine, _clipping) = clipped_cube_facing_x();
    match engine.pick(center(), PickMode::Identity).unwrap() {
        Some(PickHit::Identity { object, part, position }) => {
            assert_eq!(object, "m1");
            assert_eq!(part, PickPart::Cap(ClipDirection::XPositive));
            assert_relative_eq!(position.x, 0.0, epsilon = 1e-4);
            assert!(position.y.abs() < 0.1 && position.z.abs() < 0.1);
        }
        other => panic!("expected a cap hit, got {other:?}"),
    }
    // Caps carry no scalar.
    assert_eq!(engine.pick(center(), PickMode::Value).unwrap(), None);
}

#[test]
fn test_pick_without_caps_sees_through_section() {
    let (mut engine, _clipping) = clipped_cube_facing_x();
    assert!(engine.set_caps_enabled(false));
    match engine.pick(center(), PickMode::Identity).unwrap() {
        None => {}
        Some(PickHit::Identity { part, position, .. }) => {
            assert!(!matches!(part, PickPart::Cap(_)));
            assert!(position.x < -0.5, "hit should lie behind the section: {position:?}");
        }
        Some(other) => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_clear_meshes_drops_clip_state() {
    let (mut engine, clipping) = clipped_cube_facing_x();
    engine.clear_meshes().unwrap();
    assert!(clipping.capped_objects().is_empty());
    assert_eq!(engine.clip_position(ClipDirection::XPositive), None);
    assert_eq!(engine.pick(center(), PickMode::Identity).unwrap(), None);

    // Objects added after a clear start from the new domain.
    engine.add_mesh(cube("m2")).unwrap();
    assert_relative_eq!(engine.clip_position(ClipDirection::XPositive).unwrap(), 1.0);
    assert_eq!(clipping.capped_objects(), vec!["m2".to_string()]);
}

/// Moves the clipping manager to another engine from inside a handler
/// callback, then touches the clip state of the engine being dispatched.
struct Rebinder {
    clipping: Clipping,
    other: Rc<RefCell<Engine>>,
    enabled: bool,
}

impl ActionHandler for Rebinder {
    fn name(&self) -> &str {
        "rebinder"
    }

    fn priority(&self) -> i32 {
        0
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn left_down(&mut self, ctx: &mut ActionContext, _event: &PointerEvent) -> bool {
        self.clipping.bind(&mut *self.other.borrow_mut()).unwrap();
        ctx.control.update_clip(ClipDirection::XPositive, 0.0);
        true
    }
}

#[test]
fn test_rebind_during_dispatch_removes_drag_handler() {
    let mut engine = engine();
    engine.add_mesh(cube("m1")).unwrap();
    let other = Rc::new(RefCell::new(self::engine()));
    let clipping = Clipping::new();
    clipping.bind(&mut engine).unwrap();
    engine.add_action_handler(Box::new(Rebinder {
        clipping: clipping.clone(),
        other: Rc::clone(&other),
        enabled: true,
    }));

    assert!(engine.dispatch(left(InputEvent::PointerDown, center())).unwrap());
    assert!(engine.clipping().is_none());
    assert!(!engine.action_handler_names().iter().any(|n| n == ClippingActionHandler::NAME));
    assert!(engine.action_handler_names().iter().any(|n| n == "rebinder"));
    assert!(other.borrow().action_handler_names().iter().any(|n| n == ClippingActionHandler::NAME));
    assert_eq!(clipping.bound_to(), Some(other.borrow().id()));
}

#[test]
fn test_dragging_a_clip_face_moves_its_plane() {
    let mut engine = engine();
    engine.add_mesh(cube("m1")).unwrap();
    let clipping = Clipping::new();
    clipping.bind(&mut engine).unwrap();
    assert!(engine.set_clipping_enabled(true));
    assert_eq!(engine.pick_clip_face(center()), Some(ClipDirection::ZPositive));

    let start = engine.clip_position(ClipDirection::ZPositive).unwrap();
    assert!(engine.dispatch(left(InputEvent::PointerDown, center())).unwrap());
    assert_eq!(engine.interaction_state(), InteractionState::Clipping);
    assert!(engine.dispatch(moved(center() + Vec2::new(0.0, 20.0))).unwrap());
    assert!(engine.dispatch(left(InputEvent::PointerUp, center() + Vec2::new(0.0, 20.0))).unwrap());
    assert_eq!(engine.interaction_state(), InteractionState::None);

    let end = engine.clip_position(ClipDirection::ZPositive).unwrap();
    assert!(end < start, "plane should move inward: {start} -> {end}");
    assert!(engine.transform().rotation().abs_diff_eq(Mat4::IDENTITY, 1e-6));
}

#[test]
fn test_drag_outside_faces_rotates() {
    let mut engine = engine();
    engine.add_mesh(cube("m1")).unwrap();
    let corner = Vec2::new(5.0, 5.0);
    engine.dispatch(left(InputEvent::PointerDown, corner)).unwrap();
    assert!(engine.dispatch(moved(corner + Vec2::new(10.0, 0.0))).unwrap());
    assert_eq!(engine.interaction_state(), InteractionState::Rotate);
    assert!(!engine.transform().rotation().abs_diff_eq(Mat4::IDENTITY, 1e-3));

    engine.dispatch(moved(corner)).unwrap();
    assert!(engine.dispatch(left(InputEvent::PointerUp, corner)).unwrap());
    assert_eq!(engine.interaction_state(), InteractionState::None);
    assert!(engine.transform().rotation().abs_diff_eq(Mat4::IDENTITY, 1e-5));
}

#[test]
fn test_dispose_unbinds_clipping() {
    let mut engine = engine();
    engine.add_mesh(cube("m1")).unwrap();
    let clipping = Clipping::new();
    clipping.bind(&mut engine).unwrap();
    engine.dispose();
    assert!(!clipping.is_bound());
    assert!(!engine.is_initialized());
}
