//! Render context that encapsulates GPU resources.
//!
//! The RenderContext hides wgpu setup details from the engine and its render
//! handlers: device and queue, target formats, and the bind group layouts
//! every scene shader shares.

use std::sync::Arc;

use wgpu::util::DeviceExt;

use crate::uniforms::{CameraUniform, DrawUniform};

/// Depth and stencil share one attachment; caps need the stencil.
pub const DEPTH_STENCIL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

/// Float target the pick pass encodes into.
pub const PICK_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;

/// Render context containing GPU resources and state.
pub struct RenderContext {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    color_format: wgpu::TextureFormat,
    camera_bind_group_layout: wgpu::BindGroupLayout,
    camera_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
    draw_bind_group_layout: wgpu::BindGroupLayout,
    width: u32,
    height: u32,
}

impl RenderContext {
    /// Creates a new render context.
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        color_format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) -> Self {
        let camera_bind_group_layout = uniform_layout(&device, "Camera", None);
        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Camera Uniforms"),
            contents: bytemuck::cast_slice(&[CameraUniform::default()]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let camera_bind_group =
            create_uniform_bind_group(&device, &camera_bind_group_layout, &camera_buffer, None, "Camera");

        // Per-draw uniforms live in one buffer addressed by dynamic offset.
        let draw_bind_group_layout = uniform_layout(
            &device,
            "Draw",
            wgpu::BufferSize::new(std::mem::size_of::<DrawUniform>() as u64),
        );

        Self {
            device,
            queue,
            color_format,
            camera_bind_group_layout,
            camera_buffer,
            camera_bind_group,
            draw_bind_group_layout,
            width: width.max(1),
            height: height.max(1),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Format of the color target the engine renders into.
    pub fn color_format(&self) -> wgpu::TextureFormat {
        self.color_format
    }

    pub fn depth_format(&self) -> wgpu::TextureFormat {
        DEPTH_STENCIL_FORMAT
    }

    pub fn camera_bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.camera_bind_group_layout
    }

    pub fn camera_buffer(&self) -> &wgpu::Buffer {
        &self.camera_buffer
    }

    pub fn camera_bind_group(&self) -> &wgpu::BindGroup {
        &self.camera_bind_group
    }

    pub fn draw_bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.draw_bind_group_layout
    }

    /// Size of the visible target in pixels.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Writes the camera uniform. Takes effect at the next submit.
    pub fn update_camera(&self, uniform: &CameraUniform) {
        self.queue
            .write_buffer(&self.camera_buffer, 0, bytemuck::cast_slice(&[*uniform]));
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
    }

    /// Creates a shader module from WGSL source.
    pub fn create_shader(&self, source: &str, label: &str) -> wgpu::ShaderModule {
        self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        })
    }
}

/// Layout with a single uniform buffer at binding 0. A `dynamic_size` makes
/// the binding use dynamic offsets over slots of that size.
fn uniform_layout(
    device: &wgpu::Device,
    label: &str,
    dynamic_size: Option<wgpu::BufferSize>,
) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(&format!("{label} Layout")),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: dynamic_size.is_some(),
                min_binding_size: dynamic_size,
            },
            count: None,
        }],
    })
}

/// Binds a uniform buffer at binding 0, the whole buffer unless `size` is
/// given.
pub fn create_uniform_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    buffer: &wgpu::Buffer,
    size: Option<wgpu::BufferSize>,
    label: &str,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(&format!("{label} Bind Group")),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer,
                offset: 0,
                size,
            }),
        }],
    })
}
