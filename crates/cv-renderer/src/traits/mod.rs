//! Core traits for the renderer system.
//!
//! Render handlers are the extension point for auxiliary passes drawn after
//! the main scene.

mod render_handler;

pub use render_handler::*;
