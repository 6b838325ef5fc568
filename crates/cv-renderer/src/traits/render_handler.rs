//! RenderHandler trait definition.

use std::rc::Rc;

use cv_core::{Camera, EngineEvents, TransformSnapshot};

use crate::context::RenderContext;

/// Per-frame view state handed to render handlers.
#[derive(Debug, Clone, Copy)]
pub struct FrameInfo<'a> {
    pub width: u32,
    pub height: u32,
    pub camera: &'a Camera,
    pub transform: &'a TransformSnapshot,
}

/// An auxiliary pass drawn after the main scene.
///
/// Handlers run in order of their priority (lower values first) inside one
/// render pass that keeps the scene's color and depth. They may narrow the
/// viewport; it is reset when the pass ends.
///
/// # Priority
///
/// - 0-99: decorations drawn into the scene (grids, bounding boxes)
/// - 100+: insets drawn over it (navigator)
pub trait RenderHandler {
    /// Returns the unique name of this handler.
    fn name(&self) -> &str;

    /// Returns the render priority (lower = rendered first).
    fn priority(&self) -> i32;

    fn is_enabled(&self) -> bool;

    fn set_enabled(&mut self, enabled: bool);

    /// Called once the engine has a GPU context, or on registration when it
    /// already has one.
    fn on_init(&mut self, ctx: &RenderContext);

    /// Called when the handler joins an engine, with the engine's event
    /// buses. Subscriptions must be released in [`RenderHandler::on_detach`].
    fn on_attach(&mut self, _events: &Rc<EngineEvents>) {}

    fn on_detach(&mut self, _events: &EngineEvents) {}

    fn on_resize(&mut self, _ctx: &RenderContext, _width: u32, _height: u32) {}

    /// Prepare data for rendering. Called once per frame before the pass.
    fn prepare(&mut self, ctx: &RenderContext, frame: &FrameInfo<'_>);

    /// Record draw commands.
    fn render(&self, pass: &mut wgpu::RenderPass<'_>, frame: &FrameInfo<'_>);

    /// Called when the handler is removed or the engine is disposed.
    fn on_destroy(&mut self) {}
}
