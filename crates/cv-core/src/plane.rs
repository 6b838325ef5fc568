//! Half-space planes used for clipping.

use glam::{Mat3, Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Plane `normal · p + constant = 0`.
///
/// Points with a negative signed distance are clipped away.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub normal: Vec3,
    pub constant: f32,
}

impl Plane {
    pub fn new(normal: Vec3, constant: f32) -> Self {
        Self { normal, constant }
    }

    /// Plane through `point` with the given normal.
    pub fn from_normal_and_point(normal: Vec3, point: Vec3) -> Self {
        let normal = normal.normalize_or_zero();
        Self {
            normal,
            constant: -normal.dot(point),
        }
    }

    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.constant
    }

    /// Returns true if `point` lies on the discarded side.
    pub fn clips(&self, point: Vec3) -> bool {
        self.distance_to_point(point) < 0.0
    }

    /// Point on the plane closest to the origin.
    pub fn coplanar_point(&self) -> Vec3 {
        self.normal * -self.constant
    }

    /// Re-expresses the plane in the space `matrix` maps into.
    pub fn transformed(&self, matrix: &Mat4) -> Plane {
        let normal_matrix = Mat3::from_mat4(*matrix).inverse().transpose();
        let point = matrix.transform_point3(self.coplanar_point());
        Plane::from_normal_and_point(normal_matrix * self.normal, point)
    }

    /// Packs the plane as `(nx, ny, nz, constant)` for shader uniforms.
    pub fn to_vec4(&self) -> Vec4 {
        self.normal.extend(self.constant)
    }

    /// Ray parameter where `origin + t * dir` meets the plane.
    pub fn intersect_ray(&self, origin: Vec3, dir: Vec3) -> Option<f32> {
        let denom = self.normal.dot(dir);
        if denom.abs() < 1e-8 {
            return None;
        }
        Some(-(self.normal.dot(origin) + self.constant) / denom)
    }
}

/// Returns true if any plane in the set clips `point`.
pub fn clipped_by_any(planes: &[Plane], point: Vec3) -> bool {
    planes.iter().any(|p| p.clips(point))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transformed_plane_keeps_points_on_plane() {
        let plane = Plane::new(Vec3::new(-1.0, 0.0, 0.0), 0.5);
        let m = Mat4::from_scale_rotation_translation(
            Vec3::splat(2.0),
            glam::Quat::from_rotation_y(0.7),
            Vec3::new(1.0, -2.0, 0.5),
        );
        let world = plane.transformed(&m);
        let p = Vec3::new(0.5, 3.0, -1.0);
        assert!(plane.distance_to_point(p).abs() < 1e-6);
        assert!(world.distance_to_point(m.transform_point3(p)).abs() < 1e-5);

        // The kept side stays kept
        let inside = Vec3::new(0.0, 0.0, 0.0);
        assert!(!plane.clips(inside));
        assert!(!world.clips(m.transform_point3(inside)));
    }

    #[test]
    fn test_intersect_ray() {
        let plane = Plane::from_normal_and_point(Vec3::Z, Vec3::new(0.0, 0.0, 2.0));
        let t = plane.intersect_ray(Vec3::ZERO, Vec3::Z).unwrap();
        assert!((t - 2.0).abs() < 1e-6);
        assert!(plane.intersect_ray(Vec3::ZERO, Vec3::X).is_none());
    }
}
