//! GPU uniform layouts shared by the scene and pick passes.

use bytemuck::{Pod, Zeroable};
use cv_core::{MAX_CLIP_PLANES, Material};
use glam::{Mat4, Vec2, Vec3};

/// Per-view data: clip matrix (projection · view · after-project), eye and
/// viewport size.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraUniform {
    pub clip: [[f32; 4]; 4],
    pub eye: [f32; 4],
    /// Width, height, point size in pixels, unused.
    pub viewport: [f32; 4],
}

impl CameraUniform {
    pub fn new(clip: Mat4, eye: Vec3, viewport: Vec2, point_size: f32) -> Self {
        Self {
            clip: clip.to_cols_array_2d(),
            eye: eye.extend(1.0).to_array(),
            viewport: [viewport.x, viewport.y, point_size, 0.0],
        }
    }
}

impl Default for CameraUniform {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Vec3::Z, Vec2::ONE, 1.0)
    }
}

/// Per-draw data addressed by dynamic offset.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DrawUniform {
    pub world: [[f32; 4]; 4],
    pub normal: [[f32; 4]; 4],
    pub color: [f32; 4],
    pub ramp_low: [f32; 4],
    pub ramp_high: [f32; 4],
    /// Ramp min, ramp max, pick id, clip plane count.
    pub params: [f32; 4],
    pub planes: [[f32; 4]; MAX_CLIP_PLANES],
}

/// Dynamic uniform offsets must be multiples of 256.
pub const DRAW_UNIFORM_STRIDE: u64 = 512;

const _: () = assert!(std::mem::size_of::<DrawUniform>() as u64 <= DRAW_UNIFORM_STRIDE);

impl DrawUniform {
    pub fn new(world: Mat4, material: &Material, pick_id: u32) -> Self {
        let params = &material.params;
        let mut planes = [[0.0; 4]; MAX_CLIP_PLANES];
        let count = params.clip_planes.len().min(MAX_CLIP_PLANES);
        for (slot, plane) in planes.iter_mut().zip(&params.clip_planes) {
            *slot = plane.to_vec4().to_array();
        }
        let (ramp_min, ramp_max, low, high) = match params.ramp {
            Some(ramp) => (ramp.min, ramp.max, ramp.low_color, ramp.high_color),
            None => (0.0, 1.0, params.color, params.color),
        };
        Self {
            world: world.to_cols_array_2d(),
            normal: world.inverse().transpose().to_cols_array_2d(),
            color: params.color,
            ramp_low: low,
            ramp_high: high,
            params: [ramp_min, ramp_max, pick_id as f32, count as f32],
            planes,
        }
    }
}
