//! Axis-aligned bounding boxes.

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl BoundingBox {
    /// Creates a bounding box from its corners.
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Creates an inverted box that acts as the identity for [`union`](Self::union).
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    /// Builds the tightest box around a set of points.
    pub fn from_points<I: IntoIterator<Item = Vec3>>(points: I) -> Self {
        points.into_iter().fold(Self::empty(), |mut acc, p| {
            acc.min = acc.min.min(p);
            acc.max = acc.max.max(p);
            acc
        })
    }

    /// Returns true if the box contains no points.
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        if self.is_empty() {
            Vec3::ZERO
        } else {
            self.max - self.min
        }
    }

    /// Length of the longest side.
    pub fn max_dimension(&self) -> f32 {
        self.size().max_element()
    }

    /// Returns the smallest box enclosing both boxes.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Grows the box by `amount` on every side.
    pub fn expand(&self, amount: f32) -> BoundingBox {
        BoundingBox {
            min: self.min - Vec3::splat(amount),
            max: self.max + Vec3::splat(amount),
        }
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Transforms all eight corners and returns their bounding box.
    pub fn transform(&self, matrix: &Mat4) -> BoundingBox {
        if self.is_empty() {
            return *self;
        }
        BoundingBox::from_points(self.corners().map(|c| matrix.transform_point3(c)))
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_with_empty() {
        let b = BoundingBox::new(Vec3::splat(-1.0), Vec3::ONE);
        assert_eq!(BoundingBox::empty().union(&b), b);
        assert!(BoundingBox::empty().is_empty());
        assert_eq!(BoundingBox::empty().size(), Vec3::ZERO);
    }

    #[test]
    fn test_transform_rotated_box() {
        let b = BoundingBox::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        let rotated = b.transform(&Mat4::from_rotation_z(std::f32::consts::FRAC_PI_2));
        assert!((rotated.size() - Vec3::new(1.0, 2.0, 1.0)).length() < 1e-5);
        assert_eq!(b.max_dimension(), 2.0);
    }
}
