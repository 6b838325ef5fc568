//! GPU resource management.
//!
//! Geometry buffers are uploaded on first use and shared by every draw,
//! pick and stencil pass that references the same geometry.

mod mesh;

pub use mesh::*;
