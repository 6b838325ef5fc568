//! Transform pipeline: fits the model into the view volume and tracks the
//! user rotation and the screen-space overlay transform.
//!
//! The composite model matrix is always `rotation · adapt`. The adapt
//! matrix only changes in [`TransformPipeline::set_bounds`].

use glam::{Mat4, Quat, Vec2, Vec3};

use crate::bounds::BoundingBox;

/// Matrices shared by every component that draws or picks the model.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformPipeline {
    adapt: Mat4,
    max_dimension: f32,
    rotation: Mat4,
    after_project: Mat4,
    model: Mat4,
    adapt_range: Option<BoundingBox>,
    bounds: Option<BoundingBox>,
}

/// Snapshot published with transform-changed notifications.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformSnapshot {
    pub model: Mat4,
    pub rotation: Mat4,
    pub adapt: Mat4,
    pub after_project: Mat4,
}

/// Computes the matrix that centers `bounds` at the origin and scales its
/// longest side to length 2, together with that longest side.
pub fn adapt_matrix(bounds: &BoundingBox) -> (Mat4, f32) {
    if bounds.is_empty() {
        return (Mat4::IDENTITY, 0.0);
    }
    let max_dimension = bounds.max_dimension();
    let scale = if max_dimension > f32::EPSILON {
        2.0 / max_dimension
    } else {
        1.0
    };
    let matrix = Mat4::from_scale(Vec3::splat(scale)) * Mat4::from_translation(-bounds.center());
    (matrix, max_dimension)
}

impl TransformPipeline {
    pub fn new() -> Self {
        Self {
            adapt: Mat4::IDENTITY,
            max_dimension: 0.0,
            rotation: Mat4::IDENTITY,
            after_project: Mat4::IDENTITY,
            model: Mat4::IDENTITY,
            adapt_range: None,
            bounds: None,
        }
    }

    /// Recomputes the adapt matrix for a new domain range. A configured
    /// adapt range takes precedence over `bounds`.
    pub fn set_bounds(&mut self, bounds: Option<BoundingBox>) {
        self.bounds = bounds;
        self.refit();
    }

    /// Sets or clears the fixed box used instead of the domain range.
    pub fn set_adapt_range(&mut self, range: Option<BoundingBox>) {
        self.adapt_range = range;
        self.refit();
    }

    fn refit(&mut self) {
        let (adapt, max_dimension) = match self.adapt_range.or(self.bounds) {
            Some(b) => adapt_matrix(&b),
            None => (Mat4::IDENTITY, 0.0),
        };
        self.adapt = adapt;
        self.max_dimension = max_dimension;
        tracing::debug!(max_dimension, "adapt matrix updated");
        self.recompose();
    }

    /// The box currently driving the adapt matrix.
    pub fn fitted_range(&self) -> Option<BoundingBox> {
        self.adapt_range.or(self.bounds)
    }

    /// Left-multiplies the rotation by `angle` radians about `axis`.
    pub fn apply_rotation_delta(&mut self, axis: Vec3, angle: f32) {
        let Some(axis) = axis.try_normalize() else {
            return;
        };
        self.rotation = Mat4::from_quat(Quat::from_axis_angle(axis, angle)) * self.rotation;
        self.recompose();
    }

    /// Rotates about the screen axis perpendicular to a pointer drag.
    /// `delta` is in pixels with y pointing down.
    pub fn rotate_by_drag(&mut self, delta: Vec2, radians_per_pixel: f32) {
        let angle = delta.length() * radians_per_pixel;
        if angle == 0.0 {
            return;
        }
        self.apply_rotation_delta(Vec3::new(delta.y, delta.x, 0.0), angle);
    }

    pub fn set_rotation(&mut self, rotation: Mat4) {
        self.rotation = rotation;
        self.recompose();
    }

    pub fn set_after_project(&mut self, matrix: Mat4) {
        self.after_project = matrix;
    }

    /// Restores identity rotation and after-project matrices.
    pub fn reset_view(&mut self) {
        self.rotation = Mat4::IDENTITY;
        self.after_project = Mat4::IDENTITY;
        self.recompose();
    }

    fn recompose(&mut self) {
        self.model = self.rotation * self.adapt;
    }

    pub fn adapt(&self) -> Mat4 {
        self.adapt
    }

    pub fn max_dimension(&self) -> f32 {
        self.max_dimension
    }

    /// Uniform scale applied by the adapt matrix.
    pub fn adapt_scale(&self) -> f32 {
        if self.max_dimension > f32::EPSILON {
            2.0 / self.max_dimension
        } else {
            1.0
        }
    }

    pub fn rotation(&self) -> Mat4 {
        self.rotation
    }

    pub fn after_project(&self) -> Mat4 {
        self.after_project
    }

    /// Composite model matrix, `rotation · adapt`.
    pub fn model_matrix(&self) -> Mat4 {
        self.model
    }

    pub fn snapshot(&self) -> TransformSnapshot {
        TransformSnapshot {
            model: self.model,
            rotation: self.rotation,
            adapt: self.adapt,
            after_project: self.after_project,
        }
    }
}

impl Default for TransformPipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// 2D pan/zoom applied in clip space after projection.
///
/// The translation is in normalized device units; it is scaled by `w` when
/// applied to clip coordinates, which keeps it a pure screen shift.
pub fn after_project_matrix(zoom: f32, pan: Vec2) -> Mat4 {
    Mat4::from_cols_array(&[
        zoom, 0.0, 0.0, 0.0, //
        0.0, zoom, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        pan.x, pan.y, 0.0, 1.0,
    ])
}

/// Extracts `(zoom, pan)` from a matrix built by [`after_project_matrix`].
pub fn decompose_after_project(matrix: &Mat4) -> (f32, Vec2) {
    (matrix.x_axis.x, Vec2::new(matrix.w_axis.x, matrix.w_axis.y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_adapt_maps_center_and_longest_side() {
        let b = BoundingBox::new(Vec3::new(2.0, -1.0, 10.0), Vec3::new(10.0, 3.0, 12.0));
        let (m, max_dim) = adapt_matrix(&b);
        assert_relative_eq!(max_dim, 8.0);
        let c = m.transform_point3(b.center());
        assert!(c.length() < 1e-5);
        let fitted = b.transform(&m);
        assert_relative_eq!(fitted.size().max_element(), 2.0, epsilon = 1e-5);
        assert_relative_eq!(fitted.min.x, -1.0, epsilon = 1e-5);
        assert_relative_eq!(fitted.max.x, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_unit_box_is_identity() {
        let mut pipeline = TransformPipeline::new();
        pipeline.set_bounds(Some(BoundingBox::new(Vec3::splat(-1.0), Vec3::ONE)));
        assert_eq!(pipeline.max_dimension(), 2.0);
        assert_relative_eq!(pipeline.adapt_scale(), 1.0);
        assert!(pipeline.adapt().abs_diff_eq(Mat4::IDENTITY, 1e-6));
        assert_eq!(pipeline.adapt().w_axis.truncate(), Vec3::ZERO);
    }

    #[test]
    fn test_adapt_range_override() {
        let mut pipeline = TransformPipeline::new();
        pipeline.set_bounds(Some(BoundingBox::new(Vec3::ZERO, Vec3::splat(100.0))));
        pipeline.set_adapt_range(Some(BoundingBox::new(Vec3::splat(-1.0), Vec3::ONE)));
        assert_eq!(pipeline.max_dimension(), 2.0);
        pipeline.set_adapt_range(None);
        assert_eq!(pipeline.max_dimension(), 100.0);
    }

    #[test]
    fn test_drag_rotation_round_trip() {
        let mut pipeline = TransformPipeline::new();
        pipeline.set_rotation(Mat4::from_rotation_x(0.3));
        let before = pipeline.rotation();
        pipeline.rotate_by_drag(Vec2::new(10.0, 0.0), 0.01);
        assert!(!pipeline.rotation().abs_diff_eq(before, 1e-4));
        pipeline.rotate_by_drag(Vec2::new(-10.0, 0.0), 0.01);
        assert!(pipeline.rotation().abs_diff_eq(before, 1e-5));
    }

    #[test]
    fn test_model_is_rotation_times_adapt() {
        let mut pipeline = TransformPipeline::new();
        pipeline.set_bounds(Some(BoundingBox::new(Vec3::ZERO, Vec3::new(4.0, 2.0, 2.0))));
        pipeline.apply_rotation_delta(Vec3::Y, 0.5);
        let expected = pipeline.rotation() * pipeline.adapt();
        assert!(pipeline.model_matrix().abs_diff_eq(expected, 1e-6));
    }

    #[test]
    fn test_after_project_decompose() {
        let m = after_project_matrix(2.0, Vec2::new(0.1, -0.3));
        let (zoom, pan) = decompose_after_project(&m);
        assert_relative_eq!(zoom, 2.0);
        assert_relative_eq!(pan.x, 0.1);
        assert_relative_eq!(pan.y, -0.3);
    }
}
