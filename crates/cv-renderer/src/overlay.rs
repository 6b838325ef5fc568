//! Pixel-space overlay drawn over the scene.
//!
//! Overlay drawers describe shapes in screen pixels through an
//! [`OverlayContext`], which projects model and world points the same way
//! the scene and the pickers do. The [`OverlayRenderer`] tessellates the
//! shapes into triangles and draws them with depth testing off.

use cv_core::Camera;
use cv_core::actions::SensorSet;
use glam::{Mat4, Vec2, Vec3};
use wgpu::util::DeviceExt;

use crate::context::RenderContext;
use crate::pipeline::PipelineConfig;
use crate::vertex::OverlayVertex;

#[derive(Debug, Clone, PartialEq)]
pub enum OverlayShape {
    Line {
        from: Vec2,
        to: Vec2,
        width: f32,
        color: [f32; 4],
    },
    /// Filled disc.
    Marker {
        center: Vec2,
        radius: f32,
        color: [f32; 4],
    },
    Rect {
        min: Vec2,
        max: Vec2,
        color: [f32; 4],
    },
}

/// Projection state for one overlay frame.
#[derive(Debug, Clone, Copy)]
pub struct OverlayContext<'a> {
    pub viewport: Vec2,
    pub camera: &'a Camera,
    pub after_project: Mat4,
    pub model: Mat4,
}

impl OverlayContext<'_> {
    /// Pixel position of a world point; `None` behind the eye or outside
    /// the depth range.
    pub fn project(&self, world: Vec3) -> Option<Vec2> {
        let clip = self.camera.clip_matrix(&self.after_project) * world.extend(1.0);
        if clip.w <= f32::EPSILON {
            return None;
        }
        let depth = clip.z / clip.w;
        if !(0.0..=1.0).contains(&depth) {
            return None;
        }
        Some(self.camera.screen_position_of(world, &self.after_project, self.viewport))
    }

    /// Pixel position of a point in model coordinates.
    pub fn project_model(&self, point: Vec3) -> Option<Vec2> {
        self.project(self.model.transform_point3(point))
    }
}

/// Produces overlay shapes each frame.
pub trait OverlayDrawer {
    fn name(&self) -> &str;

    fn is_enabled(&self) -> bool;

    fn set_enabled(&mut self, enabled: bool);

    fn draw(&self, ctx: &OverlayContext<'_>, out: &mut Vec<OverlayShape>);
}

/// Draws every registered sensor as a marker with a dark rim.
pub struct SensorMarkers {
    sensors: SensorSet,
    radius: f32,
    enabled: bool,
}

impl SensorMarkers {
    pub const NAME: &'static str = "sensor-markers";

    pub fn new(sensors: SensorSet) -> Self {
        Self {
            sensors,
            radius: 5.0,
            enabled: true,
        }
    }

    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = radius.max(1.0);
        self
    }

    pub fn sensors(&self) -> &SensorSet {
        &self.sensors
    }
}

impl OverlayDrawer for SensorMarkers {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn draw(&self, ctx: &OverlayContext<'_>, out: &mut Vec<OverlayShape>) {
        for sensor in self.sensors.snapshot() {
            let Some(center) = ctx.project_model(sensor.position) else {
                continue;
            };
            out.push(OverlayShape::Marker {
                center,
                radius: self.radius + 1.5,
                color: [0.05, 0.05, 0.05, 0.9],
            });
            out.push(OverlayShape::Marker {
                center,
                radius: self.radius,
                color: sensor.color,
            });
        }
    }
}

const MARKER_SEGMENTS: usize = 16;

fn push_quad(out: &mut Vec<OverlayVertex>, corners: [Vec2; 4], color: [f32; 4]) {
    for i in [0, 1, 2, 0, 2, 3] {
        out.push(OverlayVertex {
            position: corners[i].to_array(),
            color,
        });
    }
}

/// Converts shapes into a triangle list in pixel coordinates.
pub fn tessellate(shapes: &[OverlayShape]) -> Vec<OverlayVertex> {
    let mut out = Vec::new();
    for shape in shapes {
        match *shape {
            OverlayShape::Line {
                from,
                to,
                width,
                color,
            } => {
                let Some(dir) = (to - from).try_normalize() else {
                    continue;
                };
                let side = dir.perp() * (width.max(1.0) * 0.5);
                push_quad(&mut out, [from - side, to - side, to + side, from + side], color);
            }
            OverlayShape::Marker {
                center,
                radius,
                color,
            } => {
                let step = std::f32::consts::TAU / MARKER_SEGMENTS as f32;
                for i in 0..MARKER_SEGMENTS {
                    let a = Vec2::from_angle(step * i as f32) * radius;
                    let b = Vec2::from_angle(step * (i + 1) as f32) * radius;
                    for p in [center, center + a, center + b] {
                        out.push(OverlayVertex {
                            position: p.to_array(),
                            color,
                        });
                    }
                }
            }
            OverlayShape::Rect { min, max, color } => {
                push_quad(
                    &mut out,
                    [min, Vec2::new(max.x, min.y), max, Vec2::new(min.x, max.y)],
                    color,
                );
            }
        }
    }
    out
}

/// GPU side of the overlay.
pub struct OverlayRenderer {
    pipeline: wgpu::RenderPipeline,
    vertex_buffer: Option<wgpu::Buffer>,
    vertex_capacity: usize,
    vertex_count: u32,
}

impl OverlayRenderer {
    pub fn new(ctx: &RenderContext) -> Self {
        let module = ctx.create_shader(include_str!("shaders/overlay.wgsl"), "Overlay Shader");
        let layouts = [ctx.camera_bind_group_layout()];
        let pipeline = PipelineConfig::new(
            "Overlay",
            &module,
            ctx.color_format(),
            Some(ctx.depth_format()),
            &layouts,
        )
        .with_vertex_layouts(vec![OverlayVertex::layout()])
        .with_depth(false, wgpu::CompareFunction::Always)
        .build(ctx.device());
        Self {
            pipeline,
            vertex_buffer: None,
            vertex_capacity: 0,
            vertex_count: 0,
        }
    }

    pub fn prepare(&mut self, ctx: &RenderContext, shapes: &[OverlayShape]) {
        let vertices = tessellate(shapes);
        self.vertex_count = vertices.len() as u32;
        if vertices.is_empty() {
            return;
        }
        match &self.vertex_buffer {
            Some(buffer) if vertices.len() <= self.vertex_capacity => {
                ctx.queue().write_buffer(buffer, 0, bytemuck::cast_slice(&vertices));
            }
            _ => {
                if let Some(old) = self.vertex_buffer.take() {
                    old.destroy();
                }
                self.vertex_capacity = vertices.len().next_power_of_two();
                let mut contents = vertices;
                contents.resize(
                    self.vertex_capacity,
                    OverlayVertex {
                        position: [0.0; 2],
                        color: [0.0; 4],
                    },
                );
                self.vertex_buffer = Some(ctx.device().create_buffer_init(
                    &wgpu::util::BufferInitDescriptor {
                        label: Some("Overlay Vertex Buffer"),
                        contents: bytemuck::cast_slice(&contents),
                        usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                    },
                ));
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vertex_count == 0
    }

    pub fn render(&self, pass: &mut wgpu::RenderPass<'_>, camera: &wgpu::BindGroup) {
        let Some(buffer) = &self.vertex_buffer else {
            return;
        };
        if self.vertex_count == 0 {
            return;
        }
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, camera, &[]);
        pass.set_vertex_buffer(0, buffer.slice(..));
        pass.draw(0..self.vertex_count, 0..1);
    }
}
