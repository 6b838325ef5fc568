//! Cutview Renderer
//!
//! wgpu engine for the cutview model viewer.
//!
//! # Architecture
//!
//! - [`engine::Engine`] - Owns the scene, transforms, clipping binding and GPU state
//! - [`draw::ScenePainter`] - Turns draw commands into pipelines and draws
//! - [`programs::ProgramCache`] - Pipelines keyed by material program and state
//! - [`picking::GpuPickTarget`] - Off-screen float pick pass with one-pixel read-back
//! - [`traits::RenderHandler`] - Auxiliary passes such as the [`navigator::NavigatorInset`]
//! - [`overlay::OverlayDrawer`] - Pixel-space shapes drawn over the scene
//! - [`resources::MeshManager`] - GPU mesh resource management
//!
//! # Example
//!
//! ```ignore
//! use cv_renderer::{Engine, RendererConfig, Surface};
//!
//! let mut engine = Engine::new(RendererConfig::default());
//! engine.init(Surface::Gpu { device, queue, format }, 800, 600)?;
//! engine.add_mesh(drawable)?;
//! engine.render(&output_view)?;
//! ```

// Core abstractions
pub mod config;
pub mod context;
pub mod error;
pub mod registry;
pub mod resources;
pub mod traits;

pub mod draw;
pub mod engine;
pub mod export;
pub mod gpu_resources;
pub mod navigator;
pub mod overlay;
pub mod picking;
pub mod pipeline;
pub mod programs;
pub mod uniforms;
pub mod vertex;

// Re-exports for convenience
pub use config::RendererConfig;
pub use context::RenderContext;
pub use engine::{Engine, MODEL_GROUP, Surface};
pub use error::{EngineError, EngineResult};
pub use export::ImageFormat;
pub use navigator::NavigatorInset;
pub use overlay::{OverlayContext, OverlayDrawer, OverlayShape, SensorMarkers};
pub use registry::RenderHandlerRegistry;
pub use resources::{GpuMesh, MeshHandle, MeshManager};
pub use traits::{FrameInfo, RenderHandler};
pub use vertex::MeshVertex;
