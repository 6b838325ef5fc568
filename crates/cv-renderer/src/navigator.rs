//! Navigator inset: an axis triad in the lower-left corner that turns with
//! the model.

use std::cell::Cell;
use std::rc::Rc;

use bytemuck::{Pod, Zeroable};
use cv_core::{EngineEvents, HandlerId};
use glam::{Mat4, Vec3};
use wgpu::util::DeviceExt;

use crate::context::{RenderContext, create_uniform_bind_group};
use crate::pipeline::PipelineConfig;
use crate::traits::{FrameInfo, RenderHandler};
use crate::vertex::PositionColorVertex;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct NavigatorUniform {
    view_proj: [[f32; 4]; 4],
}

struct NavigatorGpu {
    pipeline: wgpu::RenderPipeline,
    vertex_buffer: wgpu::Buffer,
    vertex_count: u32,
    uniform_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

/// Generate axis vertices (X=red, Y=green, Z=blue) with small arrow heads.
fn axis_vertices() -> Vec<PositionColorVertex> {
    let axes = [
        (Vec3::X, Vec3::Y, [0.9, 0.2, 0.2]),
        (Vec3::Y, Vec3::X, [0.2, 0.8, 0.2]),
        (Vec3::Z, Vec3::Y, [0.25, 0.4, 0.95]),
    ];
    let mut vertices = Vec::with_capacity(axes.len() * 6);
    for (axis, side, color) in axes {
        let tip = axis;
        let back = axis * 0.8;
        for (a, b) in [(Vec3::ZERO, tip), (tip, back + side * 0.1), (tip, back - side * 0.1)] {
            vertices.push(PositionColorVertex {
                position: a.to_array(),
                color,
            });
            vertices.push(PositionColorVertex {
                position: b.to_array(),
                color,
            });
        }
    }
    vertices
}

/// Projection of the inset: the model rotation seen from +Z, orthographic.
pub fn navigator_view_proj(rotation: Mat4) -> Mat4 {
    let projection = Mat4::orthographic_rh(-1.3, 1.3, -1.3, 1.3, -2.0, 2.0);
    projection * rotation
}

/// Render handler drawing the axis triad.
///
/// The rotation is tracked through the engine's transform-changed event, so
/// the inset never reads engine state directly.
pub struct NavigatorInset {
    enabled: bool,
    size: u32,
    rotation: Rc<Cell<Mat4>>,
    subscription: Option<HandlerId>,
    gpu: Option<NavigatorGpu>,
}

impl NavigatorInset {
    pub const NAME: &'static str = "navigator";

    pub fn new(size: u32) -> Self {
        Self {
            enabled: true,
            size: size.max(16),
            rotation: Rc::new(Cell::new(Mat4::IDENTITY)),
            subscription: None,
            gpu: None,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn set_size(&mut self, size: u32) {
        self.size = size.max(16);
    }

    /// Rotation last received from the engine.
    pub fn rotation(&self) -> Mat4 {
        self.rotation.get()
    }

    /// Inset rectangle `(x, y, side)` in pixels for a frame, clamped to the
    /// frame.
    pub fn viewport_rect(&self, width: u32, height: u32) -> (f32, f32, f32) {
        let side = self.size.min(width).min(height) as f32;
        let margin = 8.0_f32.min((width as f32 - side).max(0.0));
        (margin, height as f32 - side - margin.min((height as f32 - side).max(0.0)), side)
    }
}

impl RenderHandler for NavigatorInset {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        100
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn on_init(&mut self, ctx: &RenderContext) {
        let device = ctx.device();
        let module = ctx.create_shader(include_str!("shaders/navigator.wgsl"), "Navigator Shader");
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Navigator Bind Group Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Navigator Uniform Buffer"),
            contents: bytemuck::cast_slice(&[NavigatorUniform {
                view_proj: navigator_view_proj(self.rotation.get()).to_cols_array_2d(),
            }]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let bind_group = create_uniform_bind_group(device, &layout, &uniform_buffer, None, "Navigator");

        let layouts = [&layout];
        let pipeline = PipelineConfig::new(
            "Navigator",
            &module,
            ctx.color_format(),
            Some(ctx.depth_format()),
            &layouts,
        )
        .with_vertex_layouts(vec![PositionColorVertex::layout()])
        .with_topology(wgpu::PrimitiveTopology::LineList)
        .with_depth(false, wgpu::CompareFunction::Always)
        .build(device);

        let vertices = axis_vertices();
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Navigator Vertex Buffer"),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });

        self.gpu = Some(NavigatorGpu {
            pipeline,
            vertex_buffer,
            vertex_count: vertices.len() as u32,
            uniform_buffer,
            bind_group,
        });
    }

    fn on_attach(&mut self, events: &Rc<EngineEvents>) {
        let rotation = Rc::clone(&self.rotation);
        self.subscription = Some(
            events
                .transform_changed
                .add(move |snapshot| rotation.set(snapshot.rotation)),
        );
    }

    fn on_detach(&mut self, events: &EngineEvents) {
        if let Some(id) = self.subscription.take() {
            events.transform_changed.remove(id);
        }
    }

    fn prepare(&mut self, ctx: &RenderContext, _frame: &FrameInfo<'_>) {
        let Some(gpu) = &self.gpu else {
            return;
        };
        let uniform = NavigatorUniform {
            view_proj: navigator_view_proj(self.rotation.get()).to_cols_array_2d(),
        };
        ctx.queue()
            .write_buffer(&gpu.uniform_buffer, 0, bytemuck::cast_slice(&[uniform]));
    }

    fn render(&self, pass: &mut wgpu::RenderPass<'_>, frame: &FrameInfo<'_>) {
        let Some(gpu) = &self.gpu else {
            return;
        };
        let (x, y, side) = self.viewport_rect(frame.width, frame.height);
        if side < 1.0 {
            return;
        }
        pass.set_viewport(x, y, side, side, 0.0, 1.0);
        pass.set_pipeline(&gpu.pipeline);
        pass.set_bind_group(0, &gpu.bind_group, &[]);
        pass.set_vertex_buffer(0, gpu.vertex_buffer.slice(..));
        pass.draw(0..gpu.vertex_count, 0..1);
        pass.set_viewport(0.0, 0.0, frame.width as f32, frame.height as f32, 0.0, 1.0);
    }

    fn on_destroy(&mut self) {
        if let Some(gpu) = self.gpu.take() {
            gpu.vertex_buffer.destroy();
            gpu.uniform_buffer.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cv_core::TransformSnapshot;

    #[test]
    fn test_follows_transform_changed() {
        let events = Rc::new(EngineEvents::new());
        let mut inset = NavigatorInset::new(96);
        inset.on_attach(&events);
        let rotation = Mat4::from_rotation_y(0.5);
        events.transform_changed.trigger(&TransformSnapshot {
            model: rotation,
            rotation,
            adapt: Mat4::IDENTITY,
            after_project: Mat4::IDENTITY,
        });
        assert_eq!(inset.rotation(), rotation);

        inset.on_detach(&events);
        assert!(events.transform_changed.is_empty());
    }

    #[test]
    fn test_viewport_sits_in_lower_left() {
        let inset = NavigatorInset::new(96);
        assert_eq!(inset.viewport_rect(800, 600), (8.0, 496.0, 96.0));
        let (_, _, side) = inset.viewport_rect(50, 40);
        assert_eq!(side, 40.0);
    }

    #[test]
    fn test_triad_vertices() {
        let vertices = axis_vertices();
        assert_eq!(vertices.len(), 18);
        assert_eq!(vertices[1].position, [1.0, 0.0, 0.0]);
    }
}
