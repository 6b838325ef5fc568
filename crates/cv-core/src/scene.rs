//! Scene graph: named transform nodes holding drawables.
//!
//! Names are the only lookup key. Top-level object names are unique within
//! the model group; drawables below an object are addressed by their
//! pre-order leaf index ([`DrawableKey`]).

use std::fmt;
use std::sync::Arc;

use glam::Mat4;
use thiserror::Error;

use crate::bounds::BoundingBox;
use crate::geometry::{Geometry, GeometryError};
use crate::material::Material;

/// Scene mutation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SceneError {
    #[error("an object named '{0}' already exists")]
    DuplicateName(String),
    #[error("object name must not be empty")]
    EmptyName,
    #[error("invalid geometry for '{name}': {source}")]
    Geometry {
        name: String,
        #[source]
        source: GeometryError,
    },
}

/// How a drawable's geometry is rasterized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawableKind {
    Mesh,
    Points,
}

/// A mesh or point cloud with its materials.
#[derive(Debug, Clone)]
pub struct Drawable {
    pub name: String,
    pub kind: DrawableKind,
    pub geometry: Arc<Geometry>,
    /// Drawn in order; the first one is the primary material used by pickers.
    pub materials: Vec<Material>,
}

impl Drawable {
    pub fn mesh(name: impl Into<String>, geometry: Geometry, material: Material) -> Self {
        Self {
            name: name.into(),
            kind: DrawableKind::Mesh,
            geometry: Arc::new(geometry),
            materials: vec![material],
        }
    }

    pub fn points(name: impl Into<String>, geometry: Geometry, material: Material) -> Self {
        Self {
            name: name.into(),
            kind: DrawableKind::Points,
            geometry: Arc::new(geometry),
            materials: vec![material],
        }
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.materials.push(material);
        self
    }

    pub fn primary_material(&self) -> Option<&Material> {
        self.materials.first()
    }
}

/// Child of a scene node.
#[derive(Debug, Clone)]
pub enum SceneChild {
    Node(SceneNode),
    Drawable(Drawable),
}

/// Hierarchical transform container.
#[derive(Debug, Clone)]
pub struct SceneNode {
    pub name: String,
    pub transform: Mat4,
    pub visible: bool,
    pub children: Vec<SceneChild>,
}

/// Addresses one drawable: owning top-level object plus pre-order leaf index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DrawableKey {
    pub object: String,
    pub leaf: usize,
}

impl fmt::Display for DrawableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.object, self.leaf)
    }
}

/// One drawable reached during traversal.
pub struct DrawableVisit<'a> {
    pub key: DrawableKey,
    pub drawable: &'a Drawable,
    /// Transform from drawable space to the traversal root's parent space.
    pub world: Mat4,
    /// False if the drawable or any ancestor is hidden.
    pub visible: bool,
}

impl SceneNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transform: Mat4::IDENTITY,
            visible: true,
            children: Vec::new(),
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_node(mut self, node: SceneNode) -> Self {
        self.children.push(SceneChild::Node(node));
        self
    }

    pub fn with_drawable(mut self, drawable: Drawable) -> Self {
        self.children.push(SceneChild::Drawable(drawable));
        self
    }

    /// Checks geometry of every drawable below this node.
    pub fn validate(&self) -> Result<(), SceneError> {
        for child in &self.children {
            match child {
                SceneChild::Node(node) => node.validate()?,
                SceneChild::Drawable(d) => {
                    d.geometry.validate().map_err(|source| SceneError::Geometry {
                        name: d.name.clone(),
                        source,
                    })?
                }
            }
        }
        Ok(())
    }

    pub fn child_node(&self, name: &str) -> Option<&SceneNode> {
        self.children.iter().find_map(|c| match c {
            SceneChild::Node(n) if n.name == name => Some(n),
            _ => None,
        })
    }

    pub fn child_node_mut(&mut self, name: &str) -> Option<&mut SceneNode> {
        self.children.iter_mut().find_map(|c| match c {
            SceneChild::Node(n) if n.name == name => Some(n),
            _ => None,
        })
    }

    /// Appends a child node, rejecting a sibling name collision.
    pub fn add_node(&mut self, node: SceneNode) -> Result<(), SceneError> {
        if node.name.is_empty() {
            return Err(SceneError::EmptyName);
        }
        if self.child_node(&node.name).is_some() {
            return Err(SceneError::DuplicateName(node.name));
        }
        self.children.push(SceneChild::Node(node));
        Ok(())
    }

    pub fn remove_node(&mut self, name: &str) -> Option<SceneNode> {
        let index = self
            .children
            .iter()
            .position(|c| matches!(c, SceneChild::Node(n) if n.name == name))?;
        match self.children.remove(index) {
            SceneChild::Node(node) => Some(node),
            SceneChild::Drawable(_) => None,
        }
    }

    /// Names of direct child nodes in insertion order.
    pub fn child_names(&self) -> Vec<String> {
        self.children
            .iter()
            .filter_map(|c| match c {
                SceneChild::Node(n) => Some(n.name.clone()),
                SceneChild::Drawable(_) => None,
            })
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.children
            .iter()
            .filter(|c| matches!(c, SceneChild::Node(_)))
            .count()
    }

    /// Visits drawables in pre-order. `object` names the top-level object
    /// that owns them; `parent` is the transform above this node.
    pub fn visit_drawables<'a>(
        &'a self,
        object: &str,
        parent: Mat4,
        parent_visible: bool,
        f: &mut dyn FnMut(DrawableVisit<'a>),
    ) {
        let mut leaf = 0;
        self.visit_inner(object, parent, parent_visible, &mut leaf, f);
    }

    fn visit_inner<'a>(
        &'a self,
        object: &str,
        parent: Mat4,
        parent_visible: bool,
        leaf: &mut usize,
        f: &mut dyn FnMut(DrawableVisit<'a>),
    ) {
        let world = parent * self.transform;
        let visible = parent_visible && self.visible;
        for child in &self.children {
            match child {
                SceneChild::Node(node) => node.visit_inner(object, world, visible, leaf, f),
                SceneChild::Drawable(drawable) => {
                    f(DrawableVisit {
                        key: DrawableKey {
                            object: object.to_string(),
                            leaf: *leaf,
                        },
                        drawable,
                        world,
                        visible,
                    });
                    *leaf += 1;
                }
            }
        }
    }

    /// Applies `f` to every material below this node.
    pub fn for_each_material_mut(&mut self, f: &mut dyn FnMut(&mut Material)) {
        for child in &mut self.children {
            match child {
                SceneChild::Node(node) => node.for_each_material_mut(f),
                SceneChild::Drawable(d) => d.materials.iter_mut().for_each(&mut *f),
            }
        }
    }

    /// Bounds of all drawables below this node, hidden ones included,
    /// expressed in the space above this node.
    pub fn bounds(&self) -> BoundingBox {
        let mut result = BoundingBox::empty();
        self.visit_drawables(&self.name, Mat4::IDENTITY, true, &mut |visit| {
            result = result.union(&visit.drawable.geometry.bounds().transform(&visit.world));
        });
        result
    }
}

impl From<Drawable> for SceneNode {
    fn from(drawable: Drawable) -> Self {
        SceneNode::new(drawable.name.clone()).with_drawable(drawable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn tri(name: &str) -> Drawable {
        Drawable::mesh(
            name,
            Geometry::new(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]),
            Material::lit([1.0; 4]),
        )
    }

    #[test]
    fn test_duplicate_sibling_rejected() {
        let mut root = SceneNode::new("model");
        root.add_node(tri("m1").into()).unwrap();
        let err = root.add_node(tri("m1").into()).unwrap_err();
        assert_eq!(err, SceneError::DuplicateName("m1".into()));
        assert_eq!(root.node_count(), 1);
    }

    #[test]
    fn test_preorder_leaf_keys_and_visibility() {
        let mut hidden = SceneNode::new("inner").with_drawable(tri("b"));
        hidden.visible = false;
        let object = SceneNode::new("obj")
            .with_drawable(tri("a"))
            .with_node(hidden)
            .with_drawable(tri("c"));

        let mut seen = Vec::new();
        object.visit_drawables("obj", Mat4::IDENTITY, true, &mut |v| {
            seen.push((v.key.leaf, v.drawable.name.clone(), v.visible));
        });
        assert_eq!(
            seen,
            vec![
                (0, "a".to_string(), true),
                (1, "b".to_string(), false),
                (2, "c".to_string(), true)
            ]
        );
    }

    #[test]
    fn test_bounds_include_child_transforms() {
        let object = SceneNode::new("obj").with_node(
            SceneNode::new("moved")
                .with_transform(Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0)))
                .with_drawable(tri("t")),
        );
        let b = object.bounds();
        assert_eq!(b.min, Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(b.max, Vec3::new(6.0, 1.0, 0.0));
    }
}
