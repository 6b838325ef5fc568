//! GPU pick target.
//!
//! Renders the derived pick scene into a private float target the size of
//! the viewport and copies one pixel back. The visible frame, the shared
//! camera buffer and the main depth-stencil attachment are never touched.

use cv_core::{PICK_CLEAR, PickError, PickScene, PickTarget, PickView};
use glam::{UVec2, Vec3};
use wgpu::util::DeviceExt;

use crate::context::{PICK_FORMAT, RenderContext, create_uniform_bind_group};
use crate::draw::{ScenePainter, pick_commands};
use crate::gpu_resources::{create_color_target, create_depth_stencil_texture, read_texture_region};
use crate::programs::TargetKind;
use crate::uniforms::CameraUniform;

const PICK_PIXEL_BYTES: u32 = 16;

pub struct GpuPickTarget<'a> {
    ctx: &'a RenderContext,
    painter: &'a mut ScenePainter,
}

impl<'a> GpuPickTarget<'a> {
    pub fn new(ctx: &'a RenderContext, painter: &'a mut ScenePainter) -> Self {
        Self { ctx, painter }
    }
}

impl PickTarget for GpuPickTarget<'_> {
    fn read_pixel(
        &mut self,
        scene: &PickScene,
        view: &PickView,
        pixel: UVec2,
    ) -> Result<[f32; 4], PickError> {
        if view.is_empty() {
            return Err(PickError::ViewportEmpty);
        }
        let device = self.ctx.device();
        let width = view.viewport.x as u32;
        let height = view.viewport.y as u32;
        if pixel.x >= width || pixel.y >= height {
            return Ok([PICK_CLEAR; 4]);
        }

        let (color, color_view) = create_color_target(device, PICK_FORMAT, width, height, "Pick Target");
        let (depth, depth_view) = create_depth_stencil_texture(device, width, height);

        let camera = CameraUniform::new(view.clip, Vec3::Z, view.viewport, view.point_size);
        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Pick Camera Buffer"),
            contents: bytemuck::cast_slice(&[camera]),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let camera_bind_group = create_uniform_bind_group(
            device,
            self.ctx.camera_bind_group_layout(),
            &camera_buffer,
            None,
            "Pick Camera",
        );

        let commands = pick_commands(scene);
        let frame = self.painter.prepare(self.ctx, &commands, TargetKind::Pick);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Pick Encoder"),
        });
        {
            let clear = f64::from(PICK_CLEAR);
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Pick Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: clear,
                            g: clear,
                            b: clear,
                            a: clear,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Discard,
                    }),
                    stencil_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(0),
                        store: wgpu::StoreOp::Discard,
                    }),
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            self.painter.paint(&mut pass, &camera_bind_group, &frame);
        }

        let result = read_texture_region(
            device,
            self.ctx.queue(),
            encoder,
            &color,
            (pixel.x, pixel.y),
            (1, 1),
            PICK_PIXEL_BYTES,
        );
        color.destroy();
        depth.destroy();
        camera_buffer.destroy();

        let bytes = result.map_err(|e| {
            tracing::warn!(error = %e, "pick read-back failed");
            PickError::Readback(e)
        })?;
        if bytes.len() < PICK_PIXEL_BYTES as usize {
            return Err(PickError::Readback(format!("short read of {} bytes", bytes.len())));
        }
        let mut data = [PICK_CLEAR; 4];
        for (channel, chunk) in data.iter_mut().zip(bytes.chunks_exact(4)) {
            *channel = bytemuck::pod_read_unaligned(chunk);
        }
        tracing::trace!(x = pixel.x, y = pixel.y, ?data, draws = frame.len(), "pick pixel read");
        Ok(data)
    }
}
