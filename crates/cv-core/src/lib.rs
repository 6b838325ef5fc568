//! Cutview core
//!
//! Renderer-independent pieces of the viewer:
//! - Scene graph of drawables with materials and clip state
//! - Transform pipeline fitting arbitrary extents into a unit view volume
//! - Clip box, stencil cap planning and the engine binding
//! - Pick scene encoding/decoding and a CPU ray-cast pick target
//! - Priority-ordered action handlers and the interaction state machine

pub mod actions;
pub mod bounds;
pub mod camera;
pub mod clip;
pub mod clipping;
pub mod config;
pub mod events;
pub mod geometry;
pub mod interaction;
pub mod material;
pub mod pick;
pub mod plane;
pub mod raycast;
pub mod scene;
pub mod transform;

pub use actions::{ActionContext, ActionHandler, ActionPipeline, ViewerControl};
pub use bounds::*;
pub use camera::*;
pub use clip::*;
pub use clipping::*;
pub use config::*;
pub use events::*;
pub use geometry::*;
pub use interaction::*;
pub use material::*;
pub use pick::*;
pub use plane::*;
pub use raycast::*;
pub use scene::*;
pub use transform::*;
