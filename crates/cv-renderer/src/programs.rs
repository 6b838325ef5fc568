//! Maps material descriptors onto cached render pipelines.
//!
//! A pipeline is fully described by a [`PipelineKey`]: shader program,
//! primitive shape, face culling, depth and stencil state, and the target
//! kind. Everything else a material carries (color, ramp, clip planes) goes
//! through the per-draw uniform.

use std::collections::HashMap;

use cv_core::{Material, ShaderProgram, Side, StencilCompare, StencilOp};

use crate::context::{PICK_FORMAT, RenderContext};
use crate::pipeline::PipelineConfig;
use crate::vertex::MeshVertex;

/// Primitive layout of a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// Triangle list from a mesh vertex buffer.
    Mesh,
    /// Screen-space quads instanced from a point vertex buffer.
    Points,
    /// Full-screen triangle without vertex buffers.
    FullScreen,
}

/// Color target a pipeline renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Color,
    Pick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub program: ShaderProgram,
    pub shape: Shape,
    pub side: Side,
    pub depth_test: bool,
    pub depth_write: bool,
    pub color_write: bool,
    /// Reference values are set per draw, so only compare and op matter.
    pub stencil: Option<(StencilCompare, StencilOp)>,
    pub target: TargetKind,
}

impl PipelineKey {
    pub fn new(material: &Material, shape: Shape, target: TargetKind) -> Self {
        let params = &material.params;
        Self {
            program: material.program,
            shape,
            side: params.side,
            depth_test: params.depth_test,
            depth_write: params.depth_write,
            color_write: params.color_write,
            stencil: params.stencil.map(|s| (s.compare, s.op)),
            target,
        }
    }

    /// Full-screen pass that zeroes the stencil and touches nothing else.
    pub fn stencil_clear(target: TargetKind) -> Self {
        Self {
            program: ShaderProgram::StencilFront,
            shape: Shape::FullScreen,
            side: Side::Double,
            depth_test: false,
            depth_write: false,
            color_write: false,
            stencil: Some((StencilCompare::Always, StencilOp::Zero)),
            target,
        }
    }

    fn label(&self) -> String {
        format!("{:?}/{:?}/{:?}", self.program, self.shape, self.target)
    }
}

pub(crate) fn vertex_entry(shape: Shape) -> &'static str {
    match shape {
        Shape::Mesh => "vs_mesh",
        Shape::Points => "vs_points",
        Shape::FullScreen => "vs_fullscreen",
    }
}

pub(crate) fn fragment_entry(program: ShaderProgram, shape: Shape) -> &'static str {
    if shape == Shape::FullScreen {
        return "fs_clear_stencil";
    }
    match (program, shape) {
        (ShaderProgram::Lit, Shape::Points) | (ShaderProgram::Points, _) => "fs_points",
        (ShaderProgram::ValueMapped, Shape::Points) => "fs_value_flat",
        (ShaderProgram::Lit, _) => "fs_lit",
        (ShaderProgram::Unlit, _) | (ShaderProgram::Overlay, _) => "fs_unlit",
        (ShaderProgram::ValueMapped, _) => "fs_value",
        (ShaderProgram::PickIdentity, _) => "fs_pick_identity",
        (ShaderProgram::PickValue, _) => "fs_pick_value",
        (ShaderProgram::StencilBack, _) | (ShaderProgram::StencilFront, _) => "fs_stencil",
        (ShaderProgram::Cap, _) => "fs_cap",
    }
}

/// Faces removed for a material side.
pub(crate) fn cull_mode(side: Side) -> Option<wgpu::Face> {
    match side {
        Side::Front => Some(wgpu::Face::Back),
        Side::Back => Some(wgpu::Face::Front),
        Side::Double => None,
    }
}

pub(crate) fn stencil_state(stencil: Option<(StencilCompare, StencilOp)>) -> wgpu::StencilState {
    let Some((compare, op)) = stencil else {
        return wgpu::StencilState::default();
    };
    let compare = match compare {
        StencilCompare::Always => wgpu::CompareFunction::Always,
        StencilCompare::Equal => wgpu::CompareFunction::Equal,
        StencilCompare::NotEqual => wgpu::CompareFunction::NotEqual,
    };
    let op = match op {
        StencilOp::Keep => wgpu::StencilOperation::Keep,
        StencilOp::Zero => wgpu::StencilOperation::Zero,
        StencilOp::Replace => wgpu::StencilOperation::Replace,
        StencilOp::IncrementWrap => wgpu::StencilOperation::IncrementWrap,
        StencilOp::DecrementWrap => wgpu::StencilOperation::DecrementWrap,
    };
    let face = wgpu::StencilFaceState {
        compare,
        fail_op: wgpu::StencilOperation::Keep,
        depth_fail_op: wgpu::StencilOperation::Keep,
        pass_op: op,
    };
    wgpu::StencilState {
        front: face,
        back: face,
        read_mask: 0xff,
        write_mask: 0xff,
    }
}

/// Shader module plus every pipeline built from it so far.
pub struct ProgramCache {
    module: wgpu::ShaderModule,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
}

impl ProgramCache {
    pub fn new(ctx: &RenderContext) -> Self {
        Self {
            module: ctx.create_shader(include_str!("shaders/scene.wgsl"), "Scene Shader"),
            pipelines: HashMap::new(),
        }
    }

    /// Builds the pipeline for `key` on first use.
    pub fn prepare(&mut self, ctx: &RenderContext, key: PipelineKey) {
        if self.pipelines.contains_key(&key) {
            return;
        }
        let pipeline = self.build(ctx, key);
        self.pipelines.insert(key, pipeline);
    }

    pub fn get(&self, key: &PipelineKey) -> Option<&wgpu::RenderPipeline> {
        self.pipelines.get(key)
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    fn build(&self, ctx: &RenderContext, key: PipelineKey) -> wgpu::RenderPipeline {
        let (format, blend) = match key.target {
            TargetKind::Color => (ctx.color_format(), Some(wgpu::BlendState::ALPHA_BLENDING)),
            // Float targets are not blendable.
            TargetKind::Pick => (PICK_FORMAT, None),
        };
        let (vertex_layouts, topology) = match key.shape {
            Shape::Mesh => (vec![MeshVertex::layout()], wgpu::PrimitiveTopology::TriangleList),
            Shape::Points => (
                vec![MeshVertex::instance_layout()],
                wgpu::PrimitiveTopology::TriangleStrip,
            ),
            Shape::FullScreen => (Vec::new(), wgpu::PrimitiveTopology::TriangleList),
        };
        let cull = match key.shape {
            Shape::Mesh => cull_mode(key.side),
            _ => None,
        };
        let depth_compare = if key.depth_test {
            wgpu::CompareFunction::LessEqual
        } else {
            wgpu::CompareFunction::Always
        };
        let write_mask = if key.color_write {
            wgpu::ColorWrites::ALL
        } else {
            wgpu::ColorWrites::empty()
        };
        let layouts = [ctx.camera_bind_group_layout(), ctx.draw_bind_group_layout()];
        let label = key.label();

        PipelineConfig::new(&label, &self.module, format, Some(ctx.depth_format()), &layouts)
            .with_entry_points(vertex_entry(key.shape), fragment_entry(key.program, key.shape))
            .with_vertex_layouts(vertex_layouts)
            .with_topology(topology)
            .with_cull_mode(cull)
            .with_depth(key.depth_write, depth_compare)
            .with_stencil(stencil_state(key.stencil))
            .with_write_mask(write_mask)
            .with_blend(blend)
            .build(ctx.device())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cv_core::StencilTest;

    #[test]
    fn test_pick_programs_select_pick_fragments() {
        assert_eq!(fragment_entry(ShaderProgram::PickIdentity, Shape::Mesh), "fs_pick_identity");
        assert_eq!(fragment_entry(ShaderProgram::PickValue, Shape::Points), "fs_pick_value");
        assert_eq!(fragment_entry(ShaderProgram::Lit, Shape::Points), "fs_points");
        assert_eq!(fragment_entry(ShaderProgram::Cap, Shape::FullScreen), "fs_clear_stencil");
    }

    #[test]
    fn test_sides_map_to_culling() {
        assert_eq!(cull_mode(Side::Front), Some(wgpu::Face::Back));
        assert_eq!(cull_mode(Side::Back), Some(wgpu::Face::Front));
        assert_eq!(cull_mode(Side::Double), None);
    }

    #[test]
    fn test_key_ignores_stencil_reference() {
        let mut a = Material::new(ShaderProgram::Cap);
        a.params.stencil = Some(StencilTest::non_zero());
        let mut b = a.clone();
        if let Some(s) = b.params.stencil.as_mut() {
            s.reference = 3;
        }
        assert_eq!(
            PipelineKey::new(&a, Shape::Mesh, TargetKind::Color),
            PipelineKey::new(&b, Shape::Mesh, TargetKind::Color)
        );
    }

    #[test]
    fn test_stencil_counting_state() {
        let state = stencil_state(Some((StencilCompare::Always, StencilOp::IncrementWrap)));
        assert_eq!(state.front.pass_op, wgpu::StencilOperation::IncrementWrap);
        assert_eq!(state.back.compare, wgpu::CompareFunction::Always);
        assert_eq!(state.write_mask, 0xff);
    }
}
