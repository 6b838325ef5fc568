//! Picking model: derived pick scenes, the pixel codec and the target seam.
//!
//! A pick renders a derived scene into a four-channel float target and reads
//! back one pixel. Identity mode writes `(id, x, y, z)` and value mode writes
//! `(x, y, z, value)`, with local-space positions. Both modes clear every
//! channel to [`PICK_CLEAR`]; a first channel below [`PICK_NO_HIT`] means
//! nothing was hit.

use std::collections::HashMap;
use std::sync::Arc;

use glam::{Mat4, UVec2, Vec2, Vec3};
use thiserror::Error;

use crate::camera::{Camera, ndc_to_screen, screen_to_ndc};
use crate::clip::ClipDirection;
use crate::clipping::CapPass;
use crate::geometry::Geometry;
use crate::material::{Material, ShaderProgram};
use crate::scene::{DrawableKey, DrawableKind, SceneChild, SceneNode};

/// Clear value of every channel of the pick target.
pub const PICK_CLEAR: f32 = -1.0e30;

/// First-channel threshold below which a pixel is background.
pub const PICK_NO_HIT: f32 = -1.0e10;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PickError {
    #[error("pick read-back failed: {0}")]
    Readback(String),
    #[error("viewport has zero area")]
    ViewportEmpty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PickMode {
    /// Object identity and local position.
    Identity,
    /// Local position and interpolated scalar value.
    Value,
}

impl PickMode {
    pub fn program(self) -> ShaderProgram {
        match self {
            PickMode::Identity => ShaderProgram::PickIdentity,
            PickMode::Value => ShaderProgram::PickValue,
        }
    }
}

/// What an identity id refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PickPart {
    Drawable(DrawableKey),
    Cap(ClipDirection),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickEntry {
    pub object: String,
    pub part: PickPart,
}

/// A drawable in a pick scene.
#[derive(Debug, Clone)]
pub struct PickItem {
    pub id: u32,
    pub key: DrawableKey,
    pub name: String,
    pub kind: DrawableKind,
    pub geometry: Arc<Geometry>,
    /// Drawable space to world space.
    pub world: Mat4,
    pub material: Material,
}

/// A stencil cap in an identity pick scene.
#[derive(Debug, Clone)]
pub struct PickCap {
    pub id: u32,
    pub pass: CapPass,
}

/// Ephemeral scene rendered by a pick target.
#[derive(Debug, Clone)]
pub struct PickScene {
    mode: PickMode,
    items: Vec<PickItem>,
    caps: Vec<PickCap>,
    table: HashMap<u32, PickEntry>,
}

/// Decoded pick pixel.
#[derive(Debug, Clone, PartialEq)]
pub enum PickHit {
    Identity {
        object: String,
        part: PickPart,
        position: Vec3,
    },
    Value {
        position: Vec3,
        value: f32,
    },
}

impl PickHit {
    pub fn position(&self) -> Vec3 {
        match self {
            PickHit::Identity { position, .. } | PickHit::Value { position, .. } => *position,
        }
    }

    pub fn object(&self) -> Option<&str> {
        match self {
            PickHit::Identity { object, .. } => Some(object),
            PickHit::Value { .. } => None,
        }
    }

    pub fn value(&self) -> Option<f32> {
        match self {
            PickHit::Value { value, .. } => Some(*value),
            PickHit::Identity { .. } => None,
        }
    }
}

impl PickScene {
    /// Builds a pick scene from the top-level object nodes of `root`.
    ///
    /// Ids are assigned in pre-order over every drawable starting at 1, so a
    /// drawable keeps its id whether or not it is visible. Hidden drawables
    /// are left out. In value mode drawables without a generic attribute and
    /// all caps are skipped.
    pub fn build(root: &SceneNode, model: Mat4, mode: PickMode, caps: &[CapPass]) -> Self {
        let mut scene = Self {
            mode,
            items: Vec::new(),
            caps: Vec::new(),
            table: HashMap::new(),
        };
        let mut next_id = 1u32;
        for child in &root.children {
            let SceneChild::Node(object) = child else {
                continue;
            };
            object.visit_drawables(&object.name, model, root.visible, &mut |visit| {
                let id = next_id;
                next_id += 1;
                if !visit.visible {
                    return;
                }
                if mode == PickMode::Value && !visit.drawable.geometry.has_generic() {
                    return;
                }
                let Some(source) = visit.drawable.primary_material() else {
                    return;
                };
                scene.table.insert(
                    id,
                    PickEntry {
                        object: visit.key.object.clone(),
                        part: PickPart::Drawable(visit.key.clone()),
                    },
                );
                scene.items.push(PickItem {
                    id,
                    key: visit.key,
                    name: visit.drawable.name.clone(),
                    kind: visit.drawable.kind,
                    geometry: Arc::clone(&visit.drawable.geometry),
                    world: visit.world,
                    material: source.derive(mode.program()),
                });
            });
        }
        if mode == PickMode::Identity {
            for pass in caps {
                let id = next_id;
                next_id += 1;
                scene.table.insert(
                    id,
                    PickEntry {
                        object: pass.object.clone(),
                        part: PickPart::Cap(pass.direction),
                    },
                );
                scene.caps.push(PickCap {
                    id,
                    pass: pass.clone(),
                });
            }
        }
        tracing::trace!(
            ?mode,
            items = scene.items.len(),
            caps = scene.caps.len(),
            "pick scene built"
        );
        scene
    }

    pub fn mode(&self) -> PickMode {
        self.mode
    }

    pub fn items(&self) -> &[PickItem] {
        &self.items
    }

    pub fn caps(&self) -> &[PickCap] {
        &self.caps
    }

    pub fn entry(&self, id: u32) -> Option<&PickEntry> {
        self.table.get(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.caps.is_empty()
    }

    /// Decodes a read-back pixel.
    pub fn decode(&self, pixel: [f32; 4]) -> Option<PickHit> {
        if pixel[0].is_nan() || pixel[0] < PICK_NO_HIT {
            return None;
        }
        match self.mode {
            PickMode::Identity => {
                let id = pixel[0].round();
                if id < 1.0 {
                    return None;
                }
                let entry = self.table.get(&(id as u32))?;
                Some(PickHit::Identity {
                    object: entry.object.clone(),
                    part: entry.part.clone(),
                    position: Vec3::new(pixel[1], pixel[2], pixel[3]),
                })
            }
            PickMode::Value => Some(PickHit::Value {
                position: Vec3::new(pixel[0], pixel[1], pixel[2]),
                value: pixel[3],
            }),
        }
    }
}

/// Projection state of a pick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PickView {
    /// World to clip space, after-project included.
    pub clip: Mat4,
    pub viewport: Vec2,
    /// Side length of point sprites in pixels.
    pub point_size: f32,
}

impl PickView {
    pub fn new(camera: &Camera, after_project: &Mat4, viewport: Vec2, point_size: f32) -> Self {
        Self {
            clip: camera.clip_matrix(after_project),
            viewport,
            point_size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.viewport.x < 1.0 || self.viewport.y < 1.0
    }

    /// Pixel containing `screen`, if inside the viewport.
    pub fn pixel_at(&self, screen: Vec2) -> Option<UVec2> {
        if !screen.is_finite()
            || screen.x < 0.0
            || screen.y < 0.0
            || screen.x >= self.viewport.x
            || screen.y >= self.viewport.y
        {
            return None;
        }
        Some(screen.floor().as_uvec2())
    }

    /// Screen position and normalized depth of a world point.
    pub fn project(&self, world: Vec3) -> Option<(Vec2, f32)> {
        let clip = self.clip * world.extend(1.0);
        if clip.w <= f32::EPSILON {
            return None;
        }
        let ndc = clip.truncate() / clip.w;
        Some((ndc_to_screen(ndc.truncate(), self.viewport), ndc.z))
    }

    /// Ray through a screen position: origin on the near plane and
    /// normalized direction.
    pub fn ray(&self, screen: Vec2) -> (Vec3, Vec3) {
        let inverse = self.clip.inverse();
        let ndc = screen_to_ndc(screen, self.viewport);
        let near = inverse.project_point3(ndc.extend(0.0));
        let far = inverse.project_point3(ndc.extend(1.0));
        (near, (far - near).normalize_or_zero())
    }
}

/// Renders a pick scene and reads back one pixel.
pub trait PickTarget {
    /// Returns the four channels at `pixel`, [`PICK_CLEAR`] where nothing
    /// was drawn. Must leave visible render state untouched.
    fn read_pixel(
        &mut self,
        scene: &PickScene,
        view: &PickView,
        pixel: UVec2,
    ) -> Result<[f32; 4], PickError>;
}

/// Runs one pick. A cursor outside the viewport or over background is
/// `Ok(None)`.
pub fn pick(
    target: &mut dyn PickTarget,
    scene: &PickScene,
    view: &PickView,
    screen: Vec2,
) -> Result<Option<PickHit>, PickError> {
    if view.is_empty() {
        return Err(PickError::ViewportEmpty);
    }
    let Some(pixel) = view.pixel_at(screen) else {
        return Ok(None);
    };
    if scene.is_empty() {
        return Ok(None);
    }
    let data = target.read_pixel(scene, view, pixel)?;
    Ok(scene.decode(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::Material;
    use crate::plane::Plane;
    use crate::scene::Drawable;

    fn tri_geometry() -> Geometry {
        Geometry::new(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]])
    }

    fn root() -> SceneNode {
        let mut root = SceneNode::new("model");
        let mut clipped = Material::lit([1.0; 4]).with_render_order(3.0);
        clipped.params.clip_planes = vec![Plane::new(Vec3::X, 0.0)];
        root.add_node(
            SceneNode::new("a")
                .with_drawable(Drawable::mesh("a0", tri_geometry(), clipped))
                .with_drawable(Drawable::mesh(
                    "a1",
                    tri_geometry().with_generic(vec![1.0, 2.0, 3.0]),
                    Material::lit([1.0; 4]),
                )),
        )
        .unwrap();
        let mut hidden = SceneNode::from(Drawable::mesh("b", tri_geometry(), Material::lit([1.0; 4])));
        hidden.visible = false;
        root.add_node(hidden).unwrap();
        root.add_node(Drawable::mesh("c", tri_geometry(), Material::lit([1.0; 4])).into())
            .unwrap();
        root
    }

    #[test]
    fn test_identity_ids_are_preorder() {
        let scene = PickScene::build(&root(), Mat4::IDENTITY, PickMode::Identity, &[]);
        let ids: Vec<(u32, String)> = scene.items().iter().map(|i| (i.id, i.name.clone())).collect();
        assert_eq!(
            ids,
            vec![(1, "a0".to_string()), (2, "a1".to_string()), (4, "c".to_string())]
        );
        assert_eq!(scene.entry(4).unwrap().object, "c");
        assert!(scene.entry(3).is_none());
    }

    #[test]
    fn test_derived_material_keeps_clip_state() {
        let scene = PickScene::build(&root(), Mat4::IDENTITY, PickMode::Identity, &[]);
        let item = &scene.items()[0];
        assert_eq!(item.material.program, ShaderProgram::PickIdentity);
        assert_eq!(item.material.params.clip_planes.len(), 1);
        assert_eq!(item.material.params.render_order, 3.0);
    }

    #[test]
    fn test_value_mode_skips_plain_geometry() {
        let scene = PickScene::build(&root(), Mat4::IDENTITY, PickMode::Value, &[]);
        let names: Vec<&str> = scene.items().iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["a1"]);
    }

    #[test]
    fn test_decode_sentinels() {
        let scene = PickScene::build(&root(), Mat4::IDENTITY, PickMode::Identity, &[]);
        assert_eq!(scene.decode([PICK_CLEAR; 4]), None);
        assert_eq!(scene.decode([0.0, 1.0, 2.0, 3.0]), None);
        assert_eq!(scene.decode([99.0, 1.0, 2.0, 3.0]), None);
        assert_eq!(scene.decode([f32::NAN, 0.0, 0.0, 0.0]), None);
        let hit = scene.decode([4.0, 0.5, 0.25, 0.0]).unwrap();
        assert_eq!(hit.object(), Some("c"));
        assert_eq!(hit.position(), Vec3::new(0.5, 0.25, 0.0));

        let values = PickScene::build(&root(), Mat4::IDENTITY, PickMode::Value, &[]);
        let hit = values.decode([-2.0, 0.0, 1.0, 7.5]).unwrap();
        assert_eq!(hit.value(), Some(7.5));
        assert_eq!(values.decode([PICK_CLEAR; 4]), None);
    }

    #[test]
    fn test_pixel_outside_viewport() {
        let view = PickView::new(&Camera::new(1.0), &Mat4::IDENTITY, Vec2::new(100.0, 50.0), 4.0);
        assert_eq!(view.pixel_at(Vec2::new(99.5, 49.9)), Some(UVec2::new(99, 49)));
        assert_eq!(view.pixel_at(Vec2::new(100.0, 10.0)), None);
        assert_eq!(view.pixel_at(Vec2::new(-0.1, 10.0)), None);
    }
}
