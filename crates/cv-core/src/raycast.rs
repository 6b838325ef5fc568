//! CPU ray casting: the convenience hit test and a pick target that
//! reproduces the GPU pick pass without a device.

use glam::{Mat4, UVec2, Vec2, Vec3};

use crate::events::ObjectPart;
use crate::geometry::Geometry;
use crate::material::Side;
use crate::pick::{PICK_CLEAR, PickCap, PickError, PickItem, PickMode, PickScene, PickTarget, PickView};
use crate::plane::{Plane, clipped_by_any};
use crate::scene::{DrawableKind, SceneChild, SceneNode};

/// Result of [`hit_test`].
#[derive(Debug, Clone, PartialEq)]
pub struct HitTestResult {
    /// Top-level object name.
    pub name: String,
    /// Name of the drawable that was hit.
    pub drawable: String,
    pub face_index: usize,
    /// Hit position in the drawable's own coordinates.
    pub local_position: Vec3,
    pub distance: f32,
}

/// A ray/triangle hit with barycentric coordinates of vertices 1 and 2.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TriangleHit {
    t: f32,
    u: f32,
    v: f32,
    front_facing: bool,
}

/// Nearest visible triangle under a screen position.
///
/// Only meshes are considered. Each drawable's primary material decides
/// which sides are hit and which clip planes apply, so clipped-away faces
/// cannot be selected.
pub fn hit_test(root: &SceneNode, model: Mat4, view: &PickView, screen: Vec2) -> Option<HitTestResult> {
    let (origin, dir) = view.ray(screen);
    let mut closest: Option<HitTestResult> = None;
    for child in &root.children {
        let SceneChild::Node(object) = child else {
            continue;
        };
        object.visit_drawables(&object.name, model, root.visible, &mut |visit| {
            if !visit.visible || visit.drawable.kind != DrawableKind::Mesh {
                return;
            }
            let (side, planes) = match visit.drawable.primary_material() {
                Some(m) => (m.params.side, m.params.clip_planes.as_slice()),
                None => (Side::Front, &[][..]),
            };
            let geometry = &visit.drawable.geometry;
            let world_bounds = geometry.bounds().transform(&visit.world);
            if ray_aabb_intersection(origin, dir, world_bounds.min, world_bounds.max).is_none() {
                return;
            }
            for (face_index, tri) in geometry.triangles().enumerate() {
                let Some(hit) = intersect(geometry, &visit.world, tri, origin, dir, side) else {
                    continue;
                };
                let point = origin + dir * hit.t;
                if clipped_by_any(planes, point) {
                    continue;
                }
                if closest.as_ref().is_some_and(|c| c.distance <= hit.t) {
                    continue;
                }
                closest = Some(HitTestResult {
                    name: visit.key.object.clone(),
                    drawable: visit.drawable.name.clone(),
                    face_index,
                    local_position: interpolate_position(geometry, tri, hit.u, hit.v),
                    distance: hit.t,
                });
            }
        });
    }
    closest
}

/// Pick target that rasterizes the pick scene for a single pixel on the
/// CPU. It follows the GPU pass: clip planes discard, stencil caps count
/// back and front faces along the whole ray, and the nearest depth wins.
/// Depth ties go to the later draw, as with a `LessEqual` depth test.
#[derive(Debug, Default)]
pub struct RayCastPickTarget {
    reads: usize,
}

impl RayCastPickTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pixels read so far.
    pub fn reads(&self) -> usize {
        self.reads
    }
}

impl PickTarget for RayCastPickTarget {
    fn read_pixel(
        &mut self,
        scene: &PickScene,
        view: &PickView,
        pixel: UVec2,
    ) -> Result<[f32; 4], PickError> {
        if view.is_empty() {
            return Err(PickError::ViewportEmpty);
        }
        self.reads += 1;
        let center = pixel.as_vec2() + Vec2::splat(0.5);
        let (origin, dir) = view.ray(center);

        let mut order: Vec<&PickItem> = scene.items().iter().collect();
        order.sort_by(|a, b| a.material.params.render_order.total_cmp(&b.material.params.render_order));

        let mut best: Option<(f32, [f32; 4])> = None;
        let mut consider = |depth: f32, color: [f32; 4]| {
            if !(0.0..=1.0).contains(&depth) {
                return;
            }
            if best.is_none_or(|(d, _)| depth <= d) {
                best = Some((depth, color));
            }
        };

        for item in order {
            match item.kind {
                DrawableKind::Mesh => {
                    if let Some((depth, color)) = shade_mesh(item, scene.mode(), view, origin, dir) {
                        consider(depth, color);
                    }
                }
                DrawableKind::Points => {
                    if let Some((depth, color)) = shade_points(item, scene.mode(), view, center) {
                        consider(depth, color);
                    }
                }
            }
        }
        for cap in scene.caps() {
            if let Some((depth, color)) = shade_cap(cap, view, origin, dir) {
                consider(depth, color);
            }
        }

        Ok(best.map_or([PICK_CLEAR; 4], |(_, color)| color))
    }
}

fn encode(mode: PickMode, id: u32, local: Vec3, value: f32) -> [f32; 4] {
    match mode {
        PickMode::Identity => [id as f32, local.x, local.y, local.z],
        PickMode::Value => [local.x, local.y, local.z, value],
    }
}

fn shade_mesh(
    item: &PickItem,
    mode: PickMode,
    view: &PickView,
    origin: Vec3,
    dir: Vec3,
) -> Option<(f32, [f32; 4])> {
    let geometry = &item.geometry;
    let bounds = geometry.bounds().transform(&item.world);
    ray_aabb_intersection(origin, dir, bounds.min, bounds.max)?;

    let params = &item.material.params;
    let mut best: Option<(f32, [f32; 4])> = None;
    for tri in geometry.triangles() {
        let Some(hit) = intersect(geometry, &item.world, tri, origin, dir, params.side) else {
            continue;
        };
        let point = origin + dir * hit.t;
        if clipped_by_any(&params.clip_planes, point) {
            continue;
        }
        let Some((_, depth)) = view.project(point) else {
            continue;
        };
        if best.is_some_and(|(d, _)| d < depth) {
            continue;
        }
        let local = interpolate_position(geometry, tri, hit.u, hit.v);
        let value = interpolate_generic(geometry, tri, hit.u, hit.v).unwrap_or(0.0);
        best = Some((depth, encode(mode, item.id, local, value)));
    }
    best
}

fn shade_points(
    item: &PickItem,
    mode: PickMode,
    view: &PickView,
    center: Vec2,
) -> Option<(f32, [f32; 4])> {
    let half = view.point_size.max(1.0) * 0.5;
    let params = &item.material.params;
    let geometry = &item.geometry;
    let mut best: Option<(f32, [f32; 4])> = None;
    for index in 0..geometry.vertex_count() as u32 {
        let local = geometry.position(index);
        let world = item.world.transform_point3(local);
        if clipped_by_any(&params.clip_planes, world) {
            continue;
        }
        let Some((screen, depth)) = view.project(world) else {
            continue;
        };
        let offset = (screen - center).abs();
        if offset.x > half || offset.y > half {
            continue;
        }
        if best.is_some_and(|(d, _)| d < depth) {
            continue;
        }
        let value = geometry.generic_value(index).unwrap_or(0.0);
        best = Some((depth, encode(mode, item.id, local, value)));
    }
    best
}

fn shade_cap(cap: &PickCap, view: &PickView, origin: Vec3, dir: Vec3) -> Option<(f32, [f32; 4])> {
    let pass = &cap.pass;
    if stencil_count(pass.plane, &pass.parts, &pass.model, origin, dir, view) == 0 {
        return None;
    }

    let t = pass.plane.intersect_ray(origin, dir)?;
    if t < 0.0 {
        return None;
    }
    let point = origin + dir * t;
    if clipped_by_any(&pass.other_planes, point) {
        return None;
    }
    let object = pass.model.inverse().transform_point3(point);
    let axis = pass.direction.axis();
    let (min, max) = pass
        .quad
        .iter()
        .fold((Vec3::splat(f32::INFINITY), Vec3::splat(f32::NEG_INFINITY)), |(lo, hi), p| {
            (lo.min(*p), hi.max(*p))
        });
    for a in (0..3).filter(|a| *a != axis) {
        if object[a] < min[a] - 1e-5 || object[a] > max[a] + 1e-5 {
            return None;
        }
    }
    let (_, depth) = view.project(point)?;
    Some((depth, [cap.id as f32, object.x, object.y, object.z]))
}

/// Stencil value a cap sees: back faces increment and front faces
/// decrement for every fragment along the ray the plane keeps. Wraps like
/// an 8-bit stencil.
fn stencil_count(
    plane: Plane,
    parts: &[ObjectPart],
    model: &Mat4,
    origin: Vec3,
    dir: Vec3,
    view: &PickView,
) -> u8 {
    let mut count: u8 = 0;
    for part in parts {
        let world = *model * part.local;
        let geometry = &part.geometry;
        for tri in geometry.triangles() {
            let Some(hit) = intersect(geometry, &world, tri, origin, dir, Side::Double) else {
                continue;
            };
            let point = origin + dir * hit.t;
            if plane.clips(point) {
                continue;
            }
            match view.project(point) {
                Some((_, depth)) if (0.0..=1.0).contains(&depth) => {}
                _ => continue,
            }
            count = if hit.front_facing {
                count.wrapping_sub(1)
            } else {
                count.wrapping_add(1)
            };
        }
    }
    count
}

fn intersect(
    geometry: &Geometry,
    world: &Mat4,
    [a, b, c]: [u32; 3],
    origin: Vec3,
    dir: Vec3,
    side: Side,
) -> Option<TriangleHit> {
    let v0 = world.transform_point3(geometry.position(a));
    let v1 = world.transform_point3(geometry.position(b));
    let v2 = world.transform_point3(geometry.position(c));
    let hit = ray_triangle_intersection(origin, dir, v0, v1, v2)?;
    let visible = match side {
        Side::Front => hit.front_facing,
        Side::Back => !hit.front_facing,
        Side::Double => true,
    };
    visible.then_some(hit)
}

fn interpolate_position(geometry: &Geometry, [a, b, c]: [u32; 3], u: f32, v: f32) -> Vec3 {
    geometry.position(a) * (1.0 - u - v) + geometry.position(b) * u + geometry.position(c) * v
}

fn interpolate_generic(geometry: &Geometry, [a, b, c]: [u32; 3], u: f32, v: f32) -> Option<f32> {
    Some(
        geometry.generic_value(a)? * (1.0 - u - v)
            + geometry.generic_value(b)? * u
            + geometry.generic_value(c)? * v,
    )
}

/// Ray-AABB intersection test.
/// Returns the distance to intersection if hit, None otherwise
fn ray_aabb_intersection(ray_origin: Vec3, ray_dir: Vec3, bbox_min: Vec3, bbox_max: Vec3) -> Option<f32> {
    let inv_dir = ray_dir.recip();

    let t1 = (bbox_min - ray_origin) * inv_dir;
    let t2 = (bbox_max - ray_origin) * inv_dir;

    let tmin = t1.min(t2).max_element();
    let tmax = t1.max(t2).min_element();

    // 0 * inf when the origin sits on a slab boundary of a parallel ray
    if tmin.is_nan() || tmax.is_nan() {
        return Some(0.0);
    }
    if tmax < 0.0 || tmin > tmax + 1e-5 {
        return None;
    }

    Some(if tmin < 0.0 { tmax } else { tmin })
}

/// Two-sided ray-triangle intersection using the Möller–Trumbore algorithm.
fn ray_triangle_intersection(
    ray_origin: Vec3,
    ray_dir: Vec3,
    v0: Vec3,
    v1: Vec3,
    v2: Vec3,
) -> Option<TriangleHit> {
    const EPSILON: f32 = 1e-7;

    let edge1 = v1 - v0;
    let edge2 = v2 - v0;
    let h = ray_dir.cross(edge2);
    let a = edge1.dot(h);

    if a.abs() < EPSILON {
        return None; // Ray is parallel to triangle
    }

    let f = 1.0 / a;
    let s = ray_origin - v0;
    let u = f * s.dot(h);

    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(edge1);
    let v = f * ray_dir.dot(q);

    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = f * edge2.dot(q);

    if t > EPSILON {
        Some(TriangleHit {
            t,
            u,
            v,
            front_facing: edge1.cross(edge2).dot(ray_dir) < 0.0,
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;
    use crate::material::Material;
    use crate::pick::{PickHit, pick};
    use crate::scene::Drawable;

    fn quad_at(z: f32) -> Geometry {
        Geometry::new(vec![
            [-1.0, -1.0, z],
            [1.0, -1.0, z],
            [1.0, 1.0, z],
            [-1.0, 1.0, z],
        ])
        .with_indices(vec![0, 1, 2, 0, 2, 3])
    }

    fn view() -> PickView {
        PickView::new(&Camera::new(1.0), &Mat4::IDENTITY, Vec2::new(200.0, 200.0), 4.0)
    }

    #[test]
    fn test_triangle_facing() {
        let hit = ray_triangle_intersection(
            Vec3::new(0.2, 0.2, 5.0),
            Vec3::NEG_Z,
            Vec3::ZERO,
            Vec3::X,
            Vec3::Y,
        )
        .unwrap();
        assert!(hit.front_facing);
        assert!((hit.t - 5.0).abs() < 1e-5);
        let back = ray_triangle_intersection(Vec3::new(0.2, 0.2, 5.0), Vec3::NEG_Z, Vec3::ZERO, Vec3::Y, Vec3::X)
            .unwrap();
        assert!(!back.front_facing);
    }

    #[test]
    fn test_nearest_surface_wins() {
        let mut root = SceneNode::new("model");
        root.add_node(Drawable::mesh("far", quad_at(-0.5), Material::lit([1.0; 4])).into())
            .unwrap();
        root.add_node(Drawable::mesh("near", quad_at(0.5), Material::lit([1.0; 4])).into())
            .unwrap();
        let scene = PickScene::build(&root, Mat4::IDENTITY, PickMode::Identity, &[]);
        let mut target = RayCastPickTarget::new();
        let hit = pick(&mut target, &scene, &view(), Vec2::new(100.0, 100.0))
            .unwrap()
            .unwrap();
        assert_eq!(hit.object(), Some("near"));
        assert!((hit.position().z - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_equal_depth_goes_to_later_draw() {
        let mut root = SceneNode::new("model");
        root.add_node(Drawable::mesh("first", quad_at(0.0), Material::lit([1.0; 4])).into())
            .unwrap();
        root.add_node(Drawable::mesh("second", quad_at(0.0), Material::lit([1.0; 4])).into())
            .unwrap();
        let scene = PickScene::build(&root, Mat4::IDENTITY, PickMode::Identity, &[]);
        let hit = pick(&mut RayCastPickTarget::new(), &scene, &view(), Vec2::new(100.0, 100.0))
            .unwrap()
            .unwrap();
        assert_eq!(hit.object(), Some("second"));
    }

    #[test]
    fn test_clip_plane_reveals_surface_behind() {
        let mut root = SceneNode::new("model");
        root.add_node(Drawable::mesh("far", quad_at(-0.5), Material::lit([1.0; 4])).into())
            .unwrap();
        let mut clipped = Material::lit([1.0; 4]);
        // Keeps z <= 0
        clipped.params.clip_planes = vec![Plane::new(Vec3::NEG_Z, 0.0)];
        root.add_node(Drawable::mesh("near", quad_at(0.5), clipped).into())
            .unwrap();
        let scene = PickScene::build(&root, Mat4::IDENTITY, PickMode::Identity, &[]);
        let hit = pick(&mut RayCastPickTarget::new(), &scene, &view(), Vec2::new(100.0, 100.0))
            .unwrap()
            .unwrap();
        assert_eq!(hit.object(), Some("far"));
    }

    #[test]
    fn test_value_interpolation() {
        let mut root = SceneNode::new("model");
        root.add_node(
            Drawable::mesh(
                "field",
                quad_at(0.0).with_generic(vec![0.0, 10.0, 10.0, 0.0]),
                Material::lit([1.0; 4]),
            )
            .into(),
        )
        .unwrap();
        let scene = PickScene::build(&root, Mat4::IDENTITY, PickMode::Value, &[]);
        let hit = pick(&mut RayCastPickTarget::new(), &scene, &view(), Vec2::new(100.0, 100.0))
            .unwrap()
            .unwrap();
        let PickHit::Value { position, value } = hit else {
            panic!("expected a value hit");
        };
        // Value grows linearly with x from 0 at x = -1 to 10 at x = 1
        assert!((value - (position.x + 1.0) * 5.0).abs() < 1e-3);
    }

    #[test]
    fn test_background_is_no_hit() {
        let mut root = SceneNode::new("model");
        root.add_node(Drawable::mesh("small", quad_at(0.0), Material::lit([1.0; 4])).into())
            .unwrap();
        let scene = PickScene::build(&root, Mat4::IDENTITY, PickMode::Identity, &[]);
        let mut target = RayCastPickTarget::new();
        assert_eq!(pick(&mut target, &scene, &view(), Vec2::new(2.0, 2.0)).unwrap(), None);
        assert_eq!(target.reads(), 1);
    }

    #[test]
    fn test_hit_test_reports_face() {
        let mut root = SceneNode::new("model");
        root.add_node(Drawable::mesh("m1", quad_at(0.0), Material::lit([1.0; 4])).into())
            .unwrap();
        let view = view();
        // Upper-left on screen is the second triangle (0, 2, 3)
        let hit = hit_test(&root, Mat4::IDENTITY, &view, Vec2::new(90.0, 80.0)).unwrap();
        assert_eq!(hit.name, "m1");
        assert_eq!(hit.face_index, 1);
        assert!(hit.local_position.x < 0.0 && hit.local_position.y > 0.0);
        assert!(hit_test(&root, Mat4::IDENTITY, &view, Vec2::new(1.0, 1.0)).is_none());
    }
}
