//! Perspective camera looking at the origin along -Z.
//!
//! Screen coordinates are in pixels with the origin at the top-left corner
//! and y pointing down. Clip-space depth follows the wgpu `[0, 1]` range.

use glam::{Mat4, Vec2, Vec3};

use crate::config::CameraConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    fov_y: f32,
    distance: f32,
    near: f32,
    far: f32,
    aspect: f32,
}

impl Camera {
    pub fn new(aspect: f32) -> Self {
        Self::from_config(&CameraConfig::default(), aspect)
    }

    pub fn from_config(config: &CameraConfig, aspect: f32) -> Self {
        Self {
            fov_y: config.fov_degrees.to_radians(),
            distance: config.distance,
            near: config.near_plane,
            far: config.far_plane,
            aspect: sanitize_aspect(aspect),
        }
    }

    pub fn apply_config(&mut self, config: &CameraConfig) {
        self.fov_y = config.fov_degrees.to_radians();
        self.distance = config.distance;
        self.near = config.near_plane;
        self.far = config.far_plane;
    }

    pub fn update_aspect(&mut self, aspect: f32) {
        self.aspect = sanitize_aspect(aspect);
    }

    pub fn set_distance(&mut self, distance: f32) {
        self.distance = distance.max(self.near * 2.0);
    }

    pub fn fov_y(&self) -> f32 {
        self.fov_y
    }

    pub fn distance(&self) -> f32 {
        self.distance
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn eye(&self) -> Vec3 {
        Vec3::new(0.0, 0.0, self.distance)
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye(), Vec3::ZERO, Vec3::Y)
    }

    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection() * self.view()
    }

    /// Full world-to-clip matrix including the after-project overlay transform.
    pub fn clip_matrix(&self, after_project: &Mat4) -> Mat4 {
        *after_project * self.view_projection()
    }

    /// Projects a world point to pixel coordinates.
    pub fn screen_position_of(&self, world: Vec3, after_project: &Mat4, viewport: Vec2) -> Vec2 {
        let clip = self.clip_matrix(after_project) * world.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        ndc_to_screen(ndc.truncate(), viewport)
    }

    /// Normalized device depth of a world point.
    pub fn depth_of(&self, world: Vec3, after_project: &Mat4) -> f32 {
        let clip = self.clip_matrix(after_project) * world.extend(1.0);
        clip.z / clip.w
    }

    /// Unprojects a pixel at normalized device depth `ndc_depth`.
    pub fn world_position_of_screen_point(
        &self,
        screen: Vec2,
        ndc_depth: f32,
        after_project: &Mat4,
        viewport: Vec2,
    ) -> Vec3 {
        let ndc = screen_to_ndc(screen, viewport);
        self.clip_matrix(after_project)
            .inverse()
            .project_point3(ndc.extend(ndc_depth))
    }

    /// Ray through a pixel, returned as `(origin, normalized direction)`.
    pub fn screen_to_ray(&self, screen: Vec2, after_project: &Mat4, viewport: Vec2) -> (Vec3, Vec3) {
        let near = self.world_position_of_screen_point(screen, 0.0, after_project, viewport);
        let far = self.world_position_of_screen_point(screen, 1.0, after_project, viewport);
        (near, (far - near).normalize_or_zero())
    }

    /// World-space length covered by one pixel at `depth` units in front of
    /// the eye, for a given after-project zoom.
    pub fn world_units_per_pixel(&self, depth: f32, viewport_height: f32, zoom: f32) -> f32 {
        let visible_height = 2.0 * depth * (self.fov_y * 0.5).tan();
        visible_height / (viewport_height.max(1.0) * zoom.max(f32::EPSILON))
    }
}

fn sanitize_aspect(aspect: f32) -> f32 {
    if aspect.is_finite() && aspect > 0.0 {
        aspect
    } else {
        1.0
    }
}

pub fn ndc_to_screen(ndc: Vec2, viewport: Vec2) -> Vec2 {
    Vec2::new((ndc.x + 1.0) * 0.5 * viewport.x, (1.0 - ndc.y) * 0.5 * viewport.y)
}

pub fn screen_to_ndc(screen: Vec2, viewport: Vec2) -> Vec2 {
    Vec2::new(
        screen.x / viewport.x.max(1.0) * 2.0 - 1.0,
        1.0 - screen.y / viewport.y.max(1.0) * 2.0,
    )
}
