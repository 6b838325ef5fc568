//! Immutable geometry buffers shared by drawables, pickers and cap renderers.

use glam::Vec3;
use thiserror::Error;

use crate::bounds::BoundingBox;

/// Geometry validation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("geometry has no positions")]
    Empty,
    #[error("index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange { index: u32, vertex_count: usize },
    #[error("index count {0} is not a multiple of 3")]
    PartialTriangle(usize),
    #[error("{attribute} attribute has {actual} entries, expected {expected}")]
    AttributeLength {
        attribute: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Vertex data for a mesh or point cloud.
///
/// `position` is required. `normal` is computed on demand when absent and
/// `generic` carries one scalar per vertex for value-mapped data.
#[derive(Debug, Clone, Default)]
pub struct Geometry {
    pub positions: Vec<[f32; 3]>,
    pub normals: Option<Vec<[f32; 3]>>,
    pub indices: Option<Vec<u32>>,
    pub generic: Option<Vec<f32>>,
}

impl Geometry {
    pub fn new(positions: Vec<[f32; 3]>) -> Self {
        Self {
            positions,
            ..Default::default()
        }
    }

    pub fn with_indices(mut self, indices: Vec<u32>) -> Self {
        self.indices = Some(indices);
        self
    }

    pub fn with_normals(mut self, normals: Vec<[f32; 3]>) -> Self {
        self.normals = Some(normals);
        self
    }

    pub fn with_generic(mut self, values: Vec<f32>) -> Self {
        self.generic = Some(values);
        self
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn has_generic(&self) -> bool {
        self.generic.is_some()
    }

    pub fn position(&self, index: u32) -> Vec3 {
        Vec3::from(self.positions[index as usize])
    }

    /// Scalar value at a vertex, if the generic attribute is present.
    pub fn generic_value(&self, index: u32) -> Option<f32> {
        self.generic.as_ref().map(|g| g[index as usize])
    }

    /// Checks attribute lengths and index ranges.
    pub fn validate(&self) -> Result<(), GeometryError> {
        let count = self.positions.len();
        if count == 0 {
            return Err(GeometryError::Empty);
        }
        if let Some(normals) = &self.normals
            && normals.len() != count
        {
            return Err(GeometryError::AttributeLength {
                attribute: "normal",
                expected: count,
                actual: normals.len(),
            });
        }
        if let Some(generic) = &self.generic
            && generic.len() != count
        {
            return Err(GeometryError::AttributeLength {
                attribute: "generic",
                expected: count,
                actual: generic.len(),
            });
        }
        if let Some(indices) = &self.indices {
            if indices.len() % 3 != 0 {
                return Err(GeometryError::PartialTriangle(indices.len()));
            }
            if let Some(&index) = indices.iter().find(|&&i| i as usize >= count) {
                return Err(GeometryError::IndexOutOfRange {
                    index,
                    vertex_count: count,
                });
            }
        }
        Ok(())
    }

    /// Returns the triangle vertex indices, using sequential triples for
    /// non-indexed geometry.
    pub fn triangles(&self) -> Box<dyn Iterator<Item = [u32; 3]> + '_> {
        match &self.indices {
            Some(indices) => Box::new(indices.chunks_exact(3).map(|c| [c[0], c[1], c[2]])),
            None => {
                let n = (self.positions.len() / 3) as u32;
                Box::new((0..n).map(|t| [t * 3, t * 3 + 1, t * 3 + 2]))
            }
        }
    }

    pub fn triangle_count(&self) -> usize {
        match &self.indices {
            Some(indices) => indices.len() / 3,
            None => self.positions.len() / 3,
        }
    }

    pub fn bounds(&self) -> BoundingBox {
        BoundingBox::from_points(self.positions.iter().map(|p| Vec3::from(*p)))
    }

    /// Range of the generic attribute, if present and non-empty.
    pub fn generic_range(&self) -> Option<(f32, f32)> {
        let values = self.generic.as_ref()?;
        values
            .iter()
            .filter(|v| v.is_finite())
            .fold(None, |acc, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// Fills in smooth vertex normals when the loader did not supply any.
    pub fn ensure_normals(&mut self) {
        if self.normals.is_none() {
            self.normals = Some(self.compute_normals());
        }
    }

    /// Area-weighted smooth vertex normals.
    pub fn compute_normals(&self) -> Vec<[f32; 3]> {
        let mut accum = vec![Vec3::ZERO; self.positions.len()];
        for [a, b, c] in self.triangles() {
            let (p0, p1, p2) = (self.position(a), self.position(b), self.position(c));
            // Cross product length is twice the triangle area
            let n = (p1 - p0).cross(p2 - p0);
            accum[a as usize] += n;
            accum[b as usize] += n;
            accum[c as usize] += n;
        }
        accum
            .into_iter()
            .map(|n| n.try_normalize().unwrap_or(Vec3::Z).to_array())
            .collect()
    }

    pub fn normal(&self, index: u32) -> Option<Vec3> {
        self.normals
            .as_ref()
            .map(|normals| Vec3::from(normals[index as usize]))
    }
}
