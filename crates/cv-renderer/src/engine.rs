//! The viewer engine.
//!
//! The engine owns the scene graph, the transform pipeline, the interaction
//! session and every GPU resource. Feature modules (clipping, render
//! handlers, overlay drawers, action handlers) hold no engine reference;
//! they see it through [`ClipHost`], [`ViewerControl`] and the event buses
//! of [`Engine::events`].
//!
//! Every state change follows one order: mutate, refit bounds and
//! matrices, publish events, then push clip planes and the after-project
//! matrix into materials.

use std::rc::Rc;
use std::sync::Arc;

use cv_core::actions::{PanZoomHandler, RotationHandler};
use cv_core::{
    ActionHandler, ActionPipeline, BoundingBox, Camera, ClipDirection, ClipHost, Clipping, Drawable,
    DrawableKind, EngineEvents, HitTestResult, InputEvent, InteractionConfig, InteractionSession,
    InteractionState, MeshEvent, PickError, PickHit, PickMode, PickPart, PickScene,
    PickView, RayCastPickTarget, SceneChild, SceneNode, TransformPipeline, ViewerControl,
    VisibilityEvent, pick,
};
use glam::{Mat4, Vec2, Vec3};
use uuid::Uuid;

use crate::config::RendererConfig;
use crate::context::RenderContext;
use crate::draw::{ScenePainter, scene_commands};
use crate::error::{EngineError, EngineResult};
use crate::export::{ImageFormat, encode_rgba, to_rgba8};
use crate::gpu_resources::{create_color_target, create_depth_stencil_texture, read_texture_region};
use crate::navigator::NavigatorInset;
use crate::overlay::{OverlayContext, OverlayDrawer, OverlayRenderer, OverlayShape};
use crate::picking::GpuPickTarget;
use crate::programs::TargetKind;
use crate::registry::RenderHandlerRegistry;
use crate::traits::{FrameInfo, RenderHandler};
use crate::uniforms::CameraUniform;

/// Name of the group node holding every loaded object.
pub const MODEL_GROUP: &str = "model";

/// What the engine renders into.
pub enum Surface {
    /// A wgpu device; frames are rendered into caller-provided views of
    /// `format`.
    Gpu {
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        format: wgpu::TextureFormat,
    },
    /// No device. Rendering is skipped and picks run on the CPU.
    Headless,
}

/// Handler list change requested while the handlers are out of the engine
/// for a dispatch; applied once they are back.
enum ActionEdit {
    Add(Box<dyn ActionHandler>),
    Remove(String),
}

struct GpuState {
    ctx: RenderContext,
    painter: ScenePainter,
    overlay: OverlayRenderer,
    depth: wgpu::Texture,
    depth_view: wgpu::TextureView,
}

impl GpuState {
    fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, format: wgpu::TextureFormat, width: u32, height: u32) -> Self {
        let ctx = RenderContext::new(device, queue, format, width, height);
        let painter = ScenePainter::new(&ctx);
        let overlay = OverlayRenderer::new(&ctx);
        let (depth, depth_view) = create_depth_stencil_texture(ctx.device(), width, height);
        Self {
            ctx,
            painter,
            overlay,
            depth,
            depth_view,
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.ctx.resize(width, height);
        self.depth.destroy();
        let (depth, depth_view) = create_depth_stencil_texture(self.ctx.device(), width, height);
        self.depth = depth;
        self.depth_view = depth_view;
    }

    fn destroy(mut self) {
        self.painter.meshes_mut().clear();
        self.depth.destroy();
    }
}

/// Per-frame view parameters; the visible frame and exports differ only in
/// these.
struct FrameView<'a> {
    width: u32,
    height: u32,
    camera: &'a Camera,
    background: [f32; 4],
}

pub struct Engine {
    id: Uuid,
    config: RendererConfig,
    camera: Camera,
    transform: TransformPipeline,
    width: u32,
    height: u32,
    model_group: Option<SceneNode>,
    events: Rc<EngineEvents>,
    actions: ActionPipeline,
    session: InteractionSession,
    dispatching: bool,
    deferred_actions: Vec<ActionEdit>,
    clipping: Option<Clipping>,
    render_handlers: RenderHandlerRegistry,
    overlays: Vec<Box<dyn OverlayDrawer>>,
    gpu: Option<GpuState>,
    cpu_picker: RayCastPickTarget,
    needs_redraw: bool,
}

impl Engine {
    /// Creates an uninitialized engine with the rotation and pan-zoom
    /// handlers installed.
    pub fn new(config: RendererConfig) -> Self {
        let mut actions = ActionPipeline::new();
        actions.add(Box::new(RotationHandler::new()));
        actions.add(Box::new(PanZoomHandler::new()));
        Self {
            id: Uuid::new_v4(),
            camera: Camera::from_config(&config.camera, 1.0),
            config,
            transform: TransformPipeline::new(),
            width: 1,
            height: 1,
            model_group: None,
            events: Rc::new(EngineEvents::new()),
            actions,
            session: InteractionSession::new(),
            dispatching: false,
            deferred_actions: Vec::new(),
            clipping: None,
            render_handlers: RenderHandlerRegistry::new(),
            overlays: Vec::new(),
            gpu: None,
            cpu_picker: RayCastPickTarget::new(),
            needs_redraw: true,
        }
    }

    // ----- lifecycle -----

    pub fn init(&mut self, surface: Surface, width: u32, height: u32) -> EngineResult<()> {
        if self.model_group.is_some() {
            return Err(EngineError::AlreadyInitialized);
        }
        self.width = width.max(1);
        self.height = height.max(1);
        self.camera.update_aspect(self.width as f32 / self.height as f32);
        self.model_group = Some(SceneNode::new(MODEL_GROUP));

        let headless = matches!(surface, Surface::Headless);
        if let Surface::Gpu {
            device,
            queue,
            format,
        } = surface
        {
            let gpu = GpuState::new(device, queue, format, self.width, self.height);
            self.render_handlers.init_all(&gpu.ctx);
            self.gpu = Some(gpu);
        }
        if self.config.show_navigator && !self.render_handlers.contains(NavigatorInset::NAME) {
            self.add_render_handler(Box::new(NavigatorInset::new(self.config.navigator_size)));
        }
        self.needs_redraw = true;
        tracing::info!(id = %self.id, width = self.width, height = self.height, headless, "engine initialized");
        Ok(())
    }

    pub fn resize(&mut self, width: u32, height: u32) -> EngineResult<()> {
        self.require_init()?;
        let (width, height) = (width.max(1), height.max(1));
        if (width, height) == (self.width, self.height) {
            return Ok(());
        }
        self.width = width;
        self.height = height;
        self.camera.update_aspect(width as f32 / height as f32);
        if let Some(gpu) = &mut self.gpu {
            gpu.resize(width, height);
            self.render_handlers.resize_all(&gpu.ctx, width, height);
        }
        self.needs_redraw = true;
        tracing::debug!(width, height, "engine resized");
        Ok(())
    }

    /// Releases the scene, feature bindings and GPU resources. The engine
    /// can be initialized again afterwards.
    pub fn dispose(&mut self) {
        if self.model_group.is_none() {
            return;
        }
        self.cancel_interaction();
        if let Some(clipping) = self.clipping.clone() {
            clipping.unbind(self);
        }
        let names = self.mesh_names();
        for name in names {
            self.detach_object(&name);
        }
        for mut handler in self.render_handlers.destroy_all() {
            handler.on_detach(&self.events);
        }
        if let Some(gpu) = self.gpu.take() {
            gpu.destroy();
        }
        self.model_group = None;
        self.transform = TransformPipeline::new();
        tracing::info!(id = %self.id, "engine disposed");
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_initialized(&self) -> bool {
        self.model_group.is_some()
    }

    pub fn is_headless(&self) -> bool {
        self.gpu.is_none()
    }

    /// Event buses feature modules subscribe to.
    pub fn events(&self) -> Rc<EngineEvents> {
        Rc::clone(&self.events)
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Applies new settings. Camera settings take effect immediately.
    pub fn set_config(&mut self, config: RendererConfig) {
        self.camera.apply_config(&config.camera);
        if let Some(navigator) = self.render_handlers.get_mut(NavigatorInset::NAME) {
            navigator.set_enabled(config.show_navigator);
        }
        self.config = config;
        self.needs_redraw = true;
    }

    fn require_init(&self) -> EngineResult<()> {
        if self.model_group.is_some() {
            Ok(())
        } else {
            Err(EngineError::NotInitialized)
        }
    }

    fn group_mut(&mut self) -> EngineResult<&mut SceneNode> {
        self.model_group.as_mut().ok_or(EngineError::NotInitialized)
    }

    // ----- meshes -----

    /// Adds a single drawable as a top-level object named after it. Fails
    /// without touching the scene if the name is taken.
    pub fn add_mesh(&mut self, drawable: Drawable) -> EngineResult<()> {
        self.add_object(SceneNode::from(drawable))
    }

    /// Adds a multi-drawable object. Missing mesh normals are computed.
    pub fn add_object(&mut self, mut node: SceneNode) -> EngineResult<()> {
        self.require_init()?;
        node.validate()?;
        let group = self.group_mut()?;
        if group.child_node(&node.name).is_some() {
            return Err(cv_core::SceneError::DuplicateName(node.name).into());
        }
        ensure_normals(&mut node);
        let name = node.name.clone();
        group.add_node(node)?;

        self.refit_bounds();
        self.sync_materials();
        if let Some(node) = self.object(&name) {
            let event = MeshEvent::from_node(node);
            tracing::debug!(name = %name, parts = event.parts.len(), "mesh added");
            self.events.mesh_added.trigger(&event);
        }
        self.needs_redraw = true;
        Ok(())
    }

    /// Removes an object and releases its GPU buffers. Returns false if no
    /// object has that name.
    pub fn remove_mesh(&mut self, name: &str) -> EngineResult<bool> {
        self.require_init()?;
        if !self.detach_object(name) {
            return Ok(false);
        }
        self.refit_bounds();
        self.sync_materials();
        self.needs_redraw = true;
        Ok(true)
    }

    fn detach_object(&mut self, name: &str) -> bool {
        let Some(group) = self.model_group.as_mut() else {
            return false;
        };
        let Some(node) = group.child_node(name) else {
            return false;
        };
        let event = MeshEvent::from_node(node);
        self.events.mesh_removing.trigger(&event);
        drop(event);
        if let Some(group) = self.model_group.as_mut() {
            group.remove_node(name);
        }
        if let Some(gpu) = &mut self.gpu {
            let released = gpu.painter.meshes_mut().release_unused();
            tracing::debug!(name, released, "mesh removed");
        } else {
            tracing::debug!(name, "mesh removed");
        }
        true
    }

    pub fn clear_meshes(&mut self) -> EngineResult<()> {
        self.require_init()?;
        for name in self.mesh_names() {
            self.detach_object(&name);
        }
        self.refit_bounds();
        self.sync_materials();
        self.needs_redraw = true;
        Ok(())
    }

    /// Shows or hides an object. Returns false if no object has that name.
    pub fn set_visible(&mut self, visible: bool, name: &str) -> EngineResult<bool> {
        let group = self.group_mut()?;
        let Some(node) = group.child_node_mut(name) else {
            return Ok(false);
        };
        if node.visible != visible {
            node.visible = visible;
            self.events.visibility_changed.trigger(&VisibilityEvent {
                name: name.to_string(),
                visible,
            });
            self.needs_redraw = true;
        }
        Ok(true)
    }

    pub fn mesh_names(&self) -> Vec<String> {
        self.model_group
            .as_ref()
            .map(|g| g.child_names())
            .unwrap_or_default()
    }

    pub fn mesh_count(&self) -> usize {
        self.model_group.as_ref().map_or(0, |g| g.node_count())
    }

    pub fn object(&self, name: &str) -> Option<&SceneNode> {
        self.model_group.as_ref()?.child_node(name)
    }

    pub fn model_group(&self) -> Option<&SceneNode> {
        self.model_group.as_ref()
    }

    // ----- view -----

    /// Sets or clears a fixed box used for fitting and clipping instead of
    /// the bounds of the loaded objects.
    pub fn set_adapt_range(&mut self, range: Option<BoundingBox>) {
        let before = self.transform.fitted_range();
        self.transform.set_adapt_range(range);
        self.publish_fit(before);
    }

    /// Box currently driving the adapt matrix and the clip domain.
    pub fn domain_range(&self) -> Option<BoundingBox> {
        self.transform.fitted_range()
    }

    pub fn model_matrix(&self) -> Mat4 {
        self.transform.model_matrix()
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn transform(&self) -> &TransformPipeline {
        &self.transform
    }

    pub fn viewport(&self) -> Vec2 {
        Vec2::new(self.width as f32, self.height as f32)
    }

    pub fn set_after_project(&mut self, matrix: Mat4) {
        self.transform.set_after_project(matrix);
        self.publish_transform();
    }

    pub fn reset_view(&mut self) {
        self.transform.reset_view();
        self.publish_transform();
    }

    pub fn rotate_by_drag(&mut self, delta: Vec2) {
        self.transform
            .rotate_by_drag(delta, self.config.interaction.rotation_speed);
        self.publish_transform();
    }

    pub fn apply_rotation_delta(&mut self, axis: Vec3, angle: f32) {
        self.transform.apply_rotation_delta(axis, angle);
        self.publish_transform();
    }

    /// Recomputes bounds from the loaded objects and republishes.
    fn refit_bounds(&mut self) {
        let before = self.transform.fitted_range();
        let bounds = self
            .model_group
            .as_ref()
            .map(SceneNode::bounds)
            .filter(|b| !b.is_empty());
        self.transform.set_bounds(bounds);
        self.publish_fit(before);
    }

    fn publish_fit(&mut self, before: Option<BoundingBox>) {
        let after = self.transform.fitted_range();
        if after != before {
            self.events.domain_range_changed.trigger(&after);
        }
        self.publish_transform();
    }

    fn publish_transform(&mut self) {
        self.events.transform_changed.trigger(&self.transform.snapshot());
        self.sync_materials();
        self.needs_redraw = true;
    }

    /// Pushes active clip planes and the after-project matrix into every
    /// material of the scene.
    fn sync_materials(&mut self) {
        let planes = self
            .clipping
            .as_ref()
            .map(|c| c.active_planes())
            .unwrap_or_default();
        let after_project = self.transform.after_project();
        if let Some(group) = self.model_group.as_mut() {
            group.for_each_material_mut(&mut |material| {
                material.params.clip_planes.clone_from(&planes);
                if let Some(overlay) = material.screen_overlay_mut() {
                    overlay.set_after_project(after_project);
                }
            });
        }
    }

    // ----- input -----

    /// Routes one input event through the action handlers. Returns true if
    /// a handler consumed it.
    pub fn dispatch(&mut self, event: InputEvent) -> EngineResult<bool> {
        self.require_init()?;
        self.prune_clipping();
        Ok(self.with_actions(|actions, session, engine| actions.dispatch(&event, session, engine)))
    }

    /// Aborts the active interaction, for example on pointer capture loss.
    pub fn cancel_interaction(&mut self) {
        self.with_actions(|actions, session, engine| actions.cancel(session, engine));
    }

    /// Runs `f` with the handlers and session moved out of the engine, so
    /// handlers can drive the engine through [`ViewerControl`]. Handler
    /// additions and removals made meanwhile are applied afterwards.
    fn with_actions<R>(
        &mut self,
        f: impl FnOnce(&mut ActionPipeline, &mut InteractionSession, &mut Self) -> R,
    ) -> R {
        let mut actions = std::mem::take(&mut self.actions);
        let mut session = std::mem::take(&mut self.session);
        self.dispatching = true;
        let result = f(&mut actions, &mut session, self);
        self.dispatching = false;
        self.actions = actions;
        self.session = session;
        for edit in std::mem::take(&mut self.deferred_actions) {
            match edit {
                ActionEdit::Add(handler) => self.actions.add(handler),
                ActionEdit::Remove(name) => {
                    self.actions.remove(&name);
                }
            }
        }
        result
    }

    pub fn captured_pointer(&self) -> Option<u64> {
        self.session.captured_pointer()
    }

    pub fn interaction_state(&self) -> InteractionState {
        self.session.state()
    }

    // ----- handlers -----

    /// Adds an action handler, replacing one with the same name.
    pub fn add_action_handler(&mut self, handler: Box<dyn ActionHandler>) {
        if self.dispatching {
            self.deferred_actions.push(ActionEdit::Add(handler));
        } else {
            self.actions.add(handler);
        }
    }

    /// Removes an action handler. During a dispatch the removal is queued
    /// and reported as done.
    pub fn remove_action_handler(&mut self, name: &str) -> bool {
        if self.dispatching {
            self.deferred_actions.push(ActionEdit::Remove(name.to_string()));
            return true;
        }
        self.actions.remove(name).is_some()
    }

    pub fn set_action_handler_enabled(&mut self, name: &str, enabled: bool) -> bool {
        self.actions.set_enabled(name, enabled)
    }

    pub fn is_action_handler_enabled(&self, name: &str) -> Option<bool> {
        self.actions.is_enabled(name)
    }

    /// Action handler names in dispatch order.
    pub fn action_handler_names(&self) -> Vec<String> {
        self.actions.names()
    }

    /// Adds a render handler, replacing one with the same name.
    pub fn add_render_handler(&mut self, mut handler: Box<dyn RenderHandler>) {
        handler.on_attach(&self.events);
        if let Some(gpu) = &self.gpu {
            handler.on_init(&gpu.ctx);
        }
        if let Some(mut previous) = self.render_handlers.register(handler) {
            previous.on_detach(&self.events);
            previous.on_destroy();
        }
        self.needs_redraw = true;
    }

    pub fn remove_render_handler(&mut self, name: &str) -> bool {
        let Some(mut handler) = self.render_handlers.unregister(name) else {
            return false;
        };
        handler.on_detach(&self.events);
        handler.on_destroy();
        self.needs_redraw = true;
        true
    }

    pub fn set_render_handler_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.render_handlers.get_mut(name) {
            Some(handler) => {
                handler.set_enabled(enabled);
                self.needs_redraw = true;
                true
            }
            None => false,
        }
    }

    pub fn has_render_handler(&self, name: &str) -> bool {
        self.render_handlers.contains(name)
    }

    /// Adds an overlay drawer, replacing one with the same name.
    pub fn add_overlay_drawer(&mut self, drawer: Box<dyn OverlayDrawer>) {
        self.overlays.retain(|d| d.name() != drawer.name());
        self.overlays.push(drawer);
        self.needs_redraw = true;
    }

    pub fn remove_overlay_drawer(&mut self, name: &str) -> bool {
        let before = self.overlays.len();
        self.overlays.retain(|d| d.name() != name);
        self.needs_redraw = true;
        self.overlays.len() != before
    }

    /// Shapes the enabled overlay drawers produce for the current view.
    pub fn overlay_shapes(&self) -> Vec<OverlayShape> {
        collect_overlay(&self.overlays, &self.camera, &self.transform, self.viewport())
    }

    // ----- clipping -----

    /// The clipping manager bound to this engine.
    pub fn clipping(&self) -> Option<&Clipping> {
        self.clipping.as_ref()
    }

    /// Drops a clipping manager that has since been bound to another
    /// engine, along with its drag handler.
    fn prune_clipping(&mut self) {
        if self
            .clipping
            .as_ref()
            .is_some_and(|c| c.bound_to() != Some(self.id))
        {
            self.clipping = None;
            self.remove_action_handler(cv_core::actions::ClippingActionHandler::NAME);
            self.sync_materials();
        }
    }

    pub fn set_clipping_enabled(&mut self, enabled: bool) -> bool {
        let Some(clipping) = &self.clipping else {
            return false;
        };
        clipping.set_enabled(enabled);
        self.sync_materials();
        self.needs_redraw = true;
        true
    }

    pub fn set_caps_enabled(&mut self, enabled: bool) -> bool {
        let Some(clipping) = &self.clipping else {
            return false;
        };
        clipping.set_caps_enabled(enabled);
        self.needs_redraw = true;
        true
    }

    /// Moves one clip plane. Returns false without a bound clipping
    /// manager or domain.
    pub fn update_clip(&mut self, direction: ClipDirection, value: f32) -> bool {
        self.prune_clipping();
        let changed = self
            .clipping
            .as_ref()
            .is_some_and(|c| c.update(direction, value));
        if changed {
            self.sync_materials();
            self.needs_redraw = true;
        }
        changed
    }

    pub fn clip_position(&self, direction: ClipDirection) -> Option<f32> {
        let clipping = self.clipping.as_ref()?;
        clipping.clip_box().domain()?;
        Some(clipping.position(direction))
    }

    /// Moves every plane back to the domain faces.
    pub fn reset_clip(&mut self) {
        if let Some(clipping) = &self.clipping {
            clipping.reset();
            self.sync_materials();
            self.needs_redraw = true;
        }
    }

    // ----- picking -----

    fn pick_view(&self) -> PickView {
        PickView::new(
            &self.camera,
            &self.transform.after_project(),
            self.viewport(),
            self.config.point_size,
        )
    }

    /// Runs a pick scene through the GPU target, or the CPU one when
    /// headless.
    fn run_pick(&mut self, scene: &PickScene, screen: Vec2) -> Result<Option<PickHit>, PickError> {
        let view = self.pick_view();
        match &mut self.gpu {
            Some(gpu) => {
                let mut target = GpuPickTarget::new(&gpu.ctx, &mut gpu.painter);
                pick(&mut target, scene, &view, screen)
            }
            None => pick(&mut self.cpu_picker, scene, &view, screen),
        }
    }

    fn pick_scene(&mut self, screen: Vec2, mode: PickMode) -> Result<Option<PickHit>, PickError> {
        self.prune_clipping();
        let Some(group) = &self.model_group else {
            return Ok(None);
        };
        let caps = match (&self.clipping, mode) {
            (Some(clipping), PickMode::Identity) => clipping.cap_passes(),
            _ => Vec::new(),
        };
        let scene = PickScene::build(group, self.transform.model_matrix(), mode, &caps);
        let hit = self.run_pick(&scene, screen)?;
        tracing::trace!(?mode, x = screen.x, y = screen.y, ?hit, "pick");
        Ok(hit)
    }

    /// Off-screen pick at a screen position. `None` over background.
    pub fn pick(&mut self, screen: Vec2, mode: PickMode) -> EngineResult<Option<PickHit>> {
        self.require_init()?;
        Ok(self.pick_scene(screen, mode)?)
    }

    /// Clip face of the handle proxy under the pointer.
    pub fn pick_clip_face(&mut self, screen: Vec2) -> Option<ClipDirection> {
        self.prune_clipping();
        let clipping = self.clipping.as_ref()?;
        if !clipping.is_enabled() {
            return None;
        }
        let proxy = clipping.handle_proxy()?;
        let model = clipping.model_matrix();
        let mut root = SceneNode::new("clip-handle-root");
        root.add_node(proxy).ok()?;
        let scene = PickScene::build(&root, model, PickMode::Identity, &[]);
        let hit = match self.run_pick(&scene, screen) {
            Ok(hit) => hit?,
            Err(e) => {
                tracing::warn!(error = %e, "clip face pick failed");
                return None;
            }
        };
        let PickHit::Identity {
            part: PickPart::Drawable(key),
            ..
        } = hit
        else {
            return None;
        };
        let item = scene.items().iter().find(|i| i.key == key)?;
        ClipDirection::from_handle_name(&item.name)
    }

    /// CPU ray-cast of mesh triangles, independent of the pick pass.
    pub fn hit_test(&self, screen: Vec2) -> Option<HitTestResult> {
        let group = self.model_group.as_ref()?;
        cv_core::hit_test(group, self.transform.model_matrix(), &self.pick_view(), screen)
    }

    /// Pixel position of a world point.
    pub fn calculate_screen_position(&self, world: Vec3) -> Vec2 {
        self.camera
            .screen_position_of(world, &self.transform.after_project(), self.viewport())
    }

    // ----- rendering -----

    pub fn needs_redraw(&self) -> bool {
        self.needs_redraw
    }

    pub fn request_redraw(&mut self) {
        self.needs_redraw = true;
    }

    /// Renders a frame into `target`, which must be a view of the surface
    /// format sized like the engine. Headless engines skip rendering.
    pub fn render(&mut self, target: &wgpu::TextureView) -> EngineResult<()> {
        self.require_init()?;
        self.prune_clipping();
        self.sync_materials();
        if self.gpu.is_none() {
            self.needs_redraw = false;
            return Ok(());
        }
        let camera = self.camera.clone();
        let view = FrameView {
            width: self.width,
            height: self.height,
            camera: &camera,
            background: self.config.background,
        };
        let encoder = self.encode_frame(target, None, &view)?;
        if let Some(gpu) = &self.gpu {
            gpu.ctx.queue().submit(std::iter::once(encoder.finish()));
        }
        self.needs_redraw = false;
        Ok(())
    }

    /// Renders the current view off-screen at `width` x `height` and
    /// encodes it.
    pub fn export_image(&mut self, width: u32, height: u32, format: ImageFormat) -> EngineResult<Vec<u8>> {
        self.require_init()?;
        self.prune_clipping();
        self.sync_materials();
        let Some(gpu) = &self.gpu else {
            return Err(EngineError::NoGpu);
        };
        let (width, height) = (width.max(1), height.max(1));
        let color_format = gpu.ctx.color_format();
        if color_format.block_copy_size(None) != Some(4) {
            return Err(EngineError::Export(format!("unsupported surface format {color_format:?}")));
        }
        let (color, color_view) = create_color_target(gpu.ctx.device(), color_format, width, height, "Export Target");
        let (depth, depth_view) = create_depth_stencil_texture(gpu.ctx.device(), width, height);

        let mut camera = self.camera.clone();
        camera.update_aspect(width as f32 / height as f32);
        let view = FrameView {
            width,
            height,
            camera: &camera,
            background: self.config.background,
        };
        let encoder = self.encode_frame(&color_view, Some(&depth_view), &view)?;

        let gpu = self.gpu.as_ref().ok_or(EngineError::NoGpu)?;
        let pixels = read_texture_region(
            gpu.ctx.device(),
            gpu.ctx.queue(),
            encoder,
            &color,
            (0, 0),
            (width, height),
            4,
        );
        color.destroy();
        depth.destroy();
        let pixels = pixels.map_err(EngineError::Export)?;
        // The camera buffer holds the export view until the next frame.
        self.needs_redraw = true;
        tracing::info!(width, height, ?format, "image exported");
        encode_rgba(width, height, to_rgba8(color_format, pixels), format)
    }

    /// Records scene, render handler and overlay passes for one frame into
    /// a new encoder. The main depth-stencil attachment is used unless
    /// `depth` is given.
    fn encode_frame(
        &mut self,
        target: &wgpu::TextureView,
        depth: Option<&wgpu::TextureView>,
        view: &FrameView<'_>,
    ) -> EngineResult<wgpu::CommandEncoder> {
        let Self {
            gpu,
            model_group,
            transform,
            clipping,
            render_handlers,
            overlays,
            config,
            ..
        } = self;
        let gpu = gpu.as_mut().ok_or(EngineError::NoGpu)?;
        let group = model_group.as_ref().ok_or(EngineError::NotInitialized)?;
        let viewport = Vec2::new(view.width as f32, view.height as f32);
        let after_project = transform.after_project();

        gpu.ctx.update_camera(&CameraUniform::new(
            view.camera.clip_matrix(&after_project),
            view.camera.eye(),
            viewport,
            config.point_size,
        ));
        let caps = clipping.as_ref().map(|c| c.cap_passes()).unwrap_or_default();
        let commands = scene_commands(group, transform.model_matrix(), &caps);
        let frame = gpu.painter.prepare(&gpu.ctx, &commands, TargetKind::Color);

        let snapshot = transform.snapshot();
        let info = FrameInfo {
            width: view.width,
            height: view.height,
            camera: view.camera,
            transform: &snapshot,
        };
        render_handlers.prepare_all(&gpu.ctx, &info);
        let shapes = collect_overlay(overlays, view.camera, transform, viewport);
        gpu.overlay.prepare(&gpu.ctx, &shapes);

        let depth_view = depth.unwrap_or(&gpu.depth_view);
        let mut encoder = gpu
            .ctx
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });
        {
            let [r, g, b, a] = view.background.map(f64::from);
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Scene Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(0),
                        store: wgpu::StoreOp::Store,
                    }),
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            gpu.painter.paint(&mut pass, gpu.ctx.camera_bind_group(), &frame);
        }
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Auxiliary Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Discard,
                    }),
                    stencil_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Discard,
                    }),
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_handlers.render_all(&mut pass, &info);
            gpu.overlay.render(&mut pass, gpu.ctx.camera_bind_group());
        }
        tracing::trace!(draws = frame.len(), caps = caps.len(), overlay = shapes.len(), "frame encoded");
        Ok(encoder)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn collect_overlay(
    overlays: &[Box<dyn OverlayDrawer>],
    camera: &Camera,
    transform: &TransformPipeline,
    viewport: Vec2,
) -> Vec<OverlayShape> {
    let ctx = OverlayContext {
        viewport,
        camera,
        after_project: transform.after_project(),
        model: transform.model_matrix(),
    };
    let mut shapes = Vec::new();
    for drawer in overlays.iter().filter(|d| d.is_enabled()) {
        drawer.draw(&ctx, &mut shapes);
    }
    shapes
}

/// Computes smooth normals for mesh geometry loaded without them.
fn ensure_normals(node: &mut SceneNode) {
    for child in &mut node.children {
        match child {
            SceneChild::Node(n) => ensure_normals(n),
            SceneChild::Drawable(d) => {
                if d.kind == DrawableKind::Mesh && d.geometry.normals.is_none() {
                    Arc::make_mut(&mut d.geometry).ensure_normals();
                }
            }
        }
    }
}

impl ClipHost for Engine {
    fn host_id(&self) -> Uuid {
        self.id
    }

    fn clip_events(&self) -> Option<Rc<EngineEvents>> {
        self.model_group.as_ref().map(|_| Rc::clone(&self.events))
    }

    fn domain_range(&self) -> Option<BoundingBox> {
        Engine::domain_range(self)
    }

    fn model_matrix(&self) -> Mat4 {
        Engine::model_matrix(self)
    }

    fn objects(&self) -> Vec<MeshEvent> {
        self.model_group
            .as_ref()
            .map(|group| {
                group
                    .children
                    .iter()
                    .filter_map(|c| match c {
                        SceneChild::Node(n) => Some(MeshEvent::from_node(n)),
                        SceneChild::Drawable(_) => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn add_action_handler(&mut self, handler: Box<dyn ActionHandler>) {
        Engine::add_action_handler(self, handler);
    }

    fn remove_action_handler(&mut self, name: &str) -> bool {
        Engine::remove_action_handler(self, name)
    }

    fn attach_clipping(&mut self, clipping: Option<Clipping>) {
        self.clipping = clipping;
        self.sync_materials();
        self.needs_redraw = true;
    }
}

impl ViewerControl for Engine {
    fn viewport(&self) -> Vec2 {
        Engine::viewport(self)
    }

    fn camera(&self) -> &Camera {
        &self.camera
    }

    fn interaction_config(&self) -> &InteractionConfig {
        &self.config.interaction
    }

    fn transform(&self) -> &TransformPipeline {
        &self.transform
    }

    fn rotate_by_drag(&mut self, delta: Vec2) {
        Engine::rotate_by_drag(self, delta);
    }

    fn apply_rotation_delta(&mut self, axis: Vec3, angle: f32) {
        Engine::apply_rotation_delta(self, axis, angle);
    }

    fn reset_view(&mut self) {
        Engine::reset_view(self);
    }

    fn set_after_project(&mut self, matrix: Mat4) {
        Engine::set_after_project(self, matrix);
    }

    fn screen_position(&self, world: Vec3) -> Vec2 {
        self.calculate_screen_position(world)
    }

    fn hit_test(&self, screen: Vec2) -> Option<HitTestResult> {
        Engine::hit_test(self, screen)
    }

    fn pick(&mut self, screen: Vec2, mode: PickMode) -> Result<Option<PickHit>, PickError> {
        self.pick_scene(screen, mode)
    }

    fn pick_clip_face(&mut self, screen: Vec2) -> Option<ClipDirection> {
        Engine::pick_clip_face(self, screen)
    }

    fn clip_position(&self, direction: ClipDirection) -> Option<f32> {
        Engine::clip_position(self, direction)
    }

    fn update_clip(&mut self, direction: ClipDirection, value: f32) -> bool {
        Engine::update_clip(self, direction, value)
    }

    fn request_redraw(&mut self) {
        self.needs_redraw = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cv_core::{Geometry, Material};

    fn tri(name: &str) -> Drawable {
        Drawable::mesh(
            name,
            Geometry::new(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]),
            Material::lit([1.0; 4]),
        )
    }

    fn engine() -> Engine {
        let mut engine = Engine::new(RendererConfig::default());
        engine.init(Surface::Headless, 200, 100).unwrap();
        engine
    }

    #[test]
    fn test_use_before_init_is_an_error() {
        let mut engine = Engine::new(RendererConfig::default());
        assert_eq!(engine.add_mesh(tri("m1")), Err(EngineError::NotInitialized));
        assert_eq!(engine.remove_mesh("m1"), Err(EngineError::NotInitialized));
        assert!(engine.dispatch(InputEvent::Cancel).is_err());
    }

    #[test]
    fn test_double_init_fails() {
        let mut engine = engine();
        assert_eq!(
            engine.init(Surface::Headless, 10, 10),
            Err(EngineError::AlreadyInitialized)
        );
    }

    #[test]
    fn test_normals_are_filled_in() {
        let mut engine = engine();
        engine.add_mesh(tri("m1")).unwrap();
        let node = engine.object("m1").unwrap();
        let SceneChild::Drawable(d) = &node.children[0] else {
            panic!("expected drawable");
        };
        assert!(d.geometry.normals.is_some());
    }

    #[test]
    fn test_navigator_follows_config() {
        let engine = engine();
        assert!(engine.has_render_handler(NavigatorInset::NAME));
        let mut config = RendererConfig::default();
        config.show_navigator = false;
        let mut engine = Engine::new(config);
        engine.init(Surface::Headless, 10, 10).unwrap();
        assert!(!engine.has_render_handler(NavigatorInset::NAME));
    }

    #[test]
    fn test_headless_render_and_export() {
        let mut engine = engine();
        assert_eq!(engine.export_image(8, 8, ImageFormat::Png), Err(EngineError::NoGpu));
        assert!(engine.needs_redraw());
    }

    #[test]
    fn test_dispose_clears_scene() {
        let mut engine = engine();
        engine.add_mesh(tri("m1")).unwrap();
        engine.dispose();
        assert!(!engine.is_initialized());
        assert!(engine.mesh_names().is_empty());
        engine.init(Surface::Headless, 10, 10).unwrap();
        assert_eq!(engine.mesh_count(), 0);
    }
}
