//! Material descriptors.
//!
//! A material is one shader-parameter record ([`MaterialParams`]) paired with
//! a named shader program ([`ShaderProgram`]). Renderers select pipelines
//! from the program and read everything else from the parameters.

use glam::Mat4;
use serde::{Deserialize, Serialize};

use crate::plane::Plane;

/// Maximum number of clip planes a material can carry.
pub const MAX_CLIP_PLANES: usize = 8;

/// Named shader programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderProgram {
    /// Diffuse-lit surface.
    Lit,
    /// Flat color.
    Unlit,
    /// Surface colored from the generic scalar attribute.
    ValueMapped,
    /// Point cloud.
    Points,
    /// Writes `(object id, local x, local y, local z)`.
    PickIdentity,
    /// Writes `(local x, local y, local z, scalar value)`.
    PickValue,
    /// Stencil-only pass over back faces (increment).
    StencilBack,
    /// Stencil-only pass over front faces (decrement).
    StencilFront,
    /// Cross-section cap quad drawn where the stencil is non-zero.
    Cap,
    /// Pixel-space overlay lines.
    Overlay,
}

impl ShaderProgram {
    /// Programs that project through the camera and honor the after-project matrix.
    pub fn uses_after_project(&self) -> bool {
        !matches!(self, ShaderProgram::Overlay)
    }

    pub fn is_pick(&self) -> bool {
        matches!(self, ShaderProgram::PickIdentity | ShaderProgram::PickValue)
    }
}

/// Which faces are rasterized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Side {
    #[default]
    Front,
    Back,
    Double,
}

/// Stencil comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StencilCompare {
    Always,
    Equal,
    NotEqual,
}

/// Stencil update on a passing fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StencilOp {
    Keep,
    Zero,
    Replace,
    IncrementWrap,
    DecrementWrap,
}

/// Stencil state of a material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StencilTest {
    pub compare: StencilCompare,
    pub reference: u32,
    pub op: StencilOp,
}

impl StencilTest {
    /// Counts every fragment into the stencil buffer.
    pub fn count(op: StencilOp) -> Self {
        Self {
            compare: StencilCompare::Always,
            reference: 0,
            op,
        }
    }

    /// Passes where the stencil differs from zero and resets it.
    pub fn non_zero() -> Self {
        Self {
            compare: StencilCompare::NotEqual,
            reference: 0,
            op: StencilOp::Replace,
        }
    }
}

/// Two-color ramp used by [`ShaderProgram::ValueMapped`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRamp {
    pub min: f32,
    pub max: f32,
    pub low_color: [f32; 4],
    pub high_color: [f32; 4],
}

impl ValueRamp {
    pub fn new(min: f32, max: f32) -> Self {
        Self {
            min,
            max,
            low_color: [0.1, 0.2, 0.9, 1.0],
            high_color: [0.9, 0.15, 0.1, 1.0],
        }
    }

    /// Normalized position of `value` in the ramp.
    pub fn normalize(&self, value: f32) -> f32 {
        let span = self.max - self.min;
        if span.abs() <= f32::EPSILON {
            0.0
        } else {
            ((value - self.min) / span).clamp(0.0, 1.0)
        }
    }
}

/// The single shader-parameter record shared by every program.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialParams {
    pub color: [f32; 4],
    pub side: Side,
    pub depth_test: bool,
    pub depth_write: bool,
    pub color_write: bool,
    pub stencil: Option<StencilTest>,
    pub clip_planes: Vec<Plane>,
    pub render_order: f32,
    pub ramp: Option<ValueRamp>,
    pub after_project: Mat4,
}

impl Default for MaterialParams {
    fn default() -> Self {
        Self {
            color: [0.8, 0.8, 0.8, 1.0],
            side: Side::Front,
            depth_test: true,
            depth_write: true,
            color_write: true,
            stencil: None,
            clip_planes: Vec::new(),
            render_order: 0.0,
            ramp: None,
            after_project: Mat4::IDENTITY,
        }
    }
}

/// Capability of parameter records that follow the screen-space overlay
/// (after-project) transform.
pub trait HasScreenOverlayTransform {
    fn after_project(&self) -> Mat4;
    fn set_after_project(&mut self, matrix: Mat4);
}

impl HasScreenOverlayTransform for MaterialParams {
    fn after_project(&self) -> Mat4 {
        self.after_project
    }

    fn set_after_project(&mut self, matrix: Mat4) {
        self.after_project = matrix;
    }
}

/// A shader program with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub program: ShaderProgram,
    pub params: MaterialParams,
}

impl Material {
    pub fn new(program: ShaderProgram) -> Self {
        Self {
            program,
            params: MaterialParams::default(),
        }
    }

    pub fn lit(color: [f32; 4]) -> Self {
        Self::new(ShaderProgram::Lit).with_color(color)
    }

    pub fn points(color: [f32; 4]) -> Self {
        Self::new(ShaderProgram::Points).with_color(color)
    }

    pub fn value_mapped(ramp: ValueRamp) -> Self {
        let mut material = Self::new(ShaderProgram::ValueMapped);
        material.params.ramp = Some(ramp);
        material
    }

    pub fn with_color(mut self, color: [f32; 4]) -> Self {
        self.params.color = color;
        self
    }

    pub fn with_side(mut self, side: Side) -> Self {
        self.params.side = side;
        self
    }

    pub fn with_render_order(mut self, order: f32) -> Self {
        self.params.render_order = order;
        self
    }

    /// Queries the after-project capability; `None` for pixel-space programs.
    pub fn screen_overlay(&self) -> Option<&dyn HasScreenOverlayTransform> {
        if self.program.uses_after_project() {
            Some(&self.params)
        } else {
            None
        }
    }

    pub fn screen_overlay_mut(&mut self) -> Option<&mut dyn HasScreenOverlayTransform> {
        if self.program.uses_after_project() {
            Some(&mut self.params)
        } else {
            None
        }
    }

    /// Derives a material for `program` that keeps the clip planes, stencil
    /// state, face side, render order and after-project matrix of `self`.
    pub fn derive(&self, program: ShaderProgram) -> Material {
        Material {
            program,
            params: MaterialParams {
                color: self.params.color,
                side: self.params.side,
                depth_test: self.params.depth_test,
                depth_write: self.params.depth_write,
                color_write: self.params.color_write,
                stencil: self.params.stencil,
                clip_planes: self.params.clip_planes.clone(),
                render_order: self.params.render_order,
                ramp: None,
                after_project: self.params.after_project,
            },
        }
    }
}
