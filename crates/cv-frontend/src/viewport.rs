//! Viewport rendering state and input routing

use std::sync::Arc;

use cv_core::{InputEvent, Key, KeyEvent, Modifiers, PointerButton, PointerEvent, WheelEvent};
use cv_renderer::{Engine, EngineResult, RendererConfig, Surface};
use glam::Vec2;

/// Render texture for viewport
struct RenderTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    egui_texture_id: egui::TextureId,
    width: u32,
    height: u32,
}

struct GpuTarget {
    device: Arc<wgpu::Device>,
    format: wgpu::TextureFormat,
    render_texture: Option<RenderTexture>,
}

/// Engine plus the egui texture it renders into. Without a wgpu render
/// state the engine runs headless and the viewport shows a placeholder.
pub struct ViewportState {
    pub engine: Engine,
    gpu: Option<GpuTarget>,
    hovered: bool,
}

impl ViewportState {
    pub fn new(render_state: Option<&egui_wgpu::RenderState>, config: RendererConfig) -> EngineResult<Self> {
        let mut engine = Engine::new(config);
        let gpu = match render_state {
            Some(rs) => {
                let device = Arc::clone(&rs.device);
                let queue = Arc::clone(&rs.queue);
                engine.init(
                    Surface::Gpu {
                        device: Arc::clone(&device),
                        queue,
                        format: rs.target_format,
                    },
                    800,
                    600,
                )?;
                Some(GpuTarget {
                    device,
                    format: rs.target_format,
                    render_texture: None,
                })
            }
            None => {
                tracing::warn!("No wgpu render state, running headless");
                engine.init(Surface::Headless, 800, 600)?;
                None
            }
        };
        Ok(Self {
            engine,
            gpu,
            hovered: false,
        })
    }

    /// Ensure the render texture matches the requested size
    fn ensure_texture(
        &mut self,
        width: u32,
        height: u32,
        egui_renderer: &mut egui_wgpu::Renderer,
    ) -> Option<egui::TextureId> {
        let gpu = self.gpu.as_mut()?;
        let width = width.max(1);
        let height = height.max(1);

        let needs_recreate = gpu
            .render_texture
            .as_ref()
            .is_none_or(|t| t.width != width || t.height != height);

        if needs_recreate {
            if let Some(old) = gpu.render_texture.take() {
                egui_renderer.free_texture(&old.egui_texture_id);
                old.texture.destroy();
            }

            let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("Viewport Render Texture"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: gpu.format,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            let egui_texture_id =
                egui_renderer.register_native_texture(&gpu.device, &view, wgpu::FilterMode::Linear);

            gpu.render_texture = Some(RenderTexture {
                texture,
                view,
                egui_texture_id,
                width,
                height,
            });
        }
        gpu.render_texture.as_ref().map(|t| t.egui_texture_id)
    }

    /// Lays out the viewport, routes this frame's input and renders the
    /// engine into the texture when needed.
    pub fn show(&mut self, ui: &mut egui::Ui, frame: &eframe::Frame) {
        let (rect, response) = ui.allocate_exact_size(ui.available_size(), egui::Sense::click_and_drag());
        let pixels_per_point = ui.ctx().pixels_per_point();
        let width = (rect.width() * pixels_per_point).round() as u32;
        let height = (rect.height() * pixels_per_point).round() as u32;
        if let Err(e) = self.engine.resize(width, height) {
            tracing::warn!("Viewport resize failed: {}", e);
        }

        self.hovered = response.hovered();
        if response.clicked() || response.drag_started() {
            response.request_focus();
        }
        let (events, hover_pos) = ui.input(|i| (i.events.clone(), i.pointer.hover_pos()));
        for event in &events {
            let routing = InputRouting {
                origin: rect.min,
                pixels_per_point,
                hovered: self.hovered,
                captured: self.engine.captured_pointer().is_some(),
                hover_pos,
            };
            let Some(input) = routing.translate(event) else {
                continue;
            };
            match self.engine.dispatch(input) {
                Ok(true) => ui.ctx().request_repaint(),
                Ok(false) => {}
                Err(e) => tracing::warn!("Input dispatch failed: {}", e),
            }
        }

        let texture_id = frame
            .wgpu_render_state()
            .and_then(|rs| self.ensure_texture(width, height, &mut rs.renderer.write()));

        match texture_id {
            Some(id) => {
                if let Some(view) = self
                    .gpu
                    .as_ref()
                    .and_then(|g| g.render_texture.as_ref())
                    .map(|t| &t.view)
                    && let Err(e) = self.engine.render(view)
                {
                    tracing::warn!("Render failed: {}", e);
                }
                ui.painter().image(
                    id,
                    rect,
                    egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                    egui::Color32::WHITE,
                );
            }
            None => {
                ui.painter().rect_filled(rect, 0.0, egui::Color32::from_gray(30));
                ui.painter().text(
                    rect.center(),
                    egui::Align2::CENTER_CENTER,
                    "No GPU available",
                    egui::FontId::proportional(16.0),
                    egui::Color32::GRAY,
                );
            }
        }
        if self.engine.needs_redraw() {
            ui.ctx().request_repaint();
        }
    }
}

fn modifiers(m: &egui::Modifiers) -> Modifiers {
    Modifiers {
        shift: m.shift,
        ctrl: m.ctrl || m.command,
        alt: m.alt,
    }
}

fn button(b: egui::PointerButton) -> Option<PointerButton> {
    match b {
        egui::PointerButton::Primary => Some(PointerButton::Left),
        egui::PointerButton::Secondary => Some(PointerButton::Right),
        egui::PointerButton::Middle => Some(PointerButton::Middle),
        _ => None,
    }
}

fn key(k: egui::Key) -> Key {
    match k {
        egui::Key::ArrowLeft => Key::ArrowLeft,
        egui::Key::ArrowRight => Key::ArrowRight,
        egui::Key::ArrowUp => Key::ArrowUp,
        egui::Key::ArrowDown => Key::ArrowDown,
        egui::Key::Escape => Key::Escape,
        egui::Key::Home => Key::Home,
        other => {
            let mut chars = other.name().chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Key::Char(c),
                _ => Key::Other,
            }
        }
    }
}

/// Where the viewport sits and who owns the pointer for one frame.
#[derive(Debug, Clone, Copy)]
pub struct InputRouting {
    pub origin: egui::Pos2,
    pub pixels_per_point: f32,
    pub hovered: bool,
    /// The engine holds the pointer for an ongoing drag.
    pub captured: bool,
    pub hover_pos: Option<egui::Pos2>,
}

impl InputRouting {
    fn to_pixels(&self, pos: egui::Pos2) -> Vec2 {
        Vec2::new(pos.x - self.origin.x, pos.y - self.origin.y) * self.pixels_per_point
    }

    /// Converts one egui event into engine input. Presses, wheel and keys
    /// need the pointer over the viewport; moves and releases are also
    /// routed while the engine holds the pointer so drags can leave the
    /// viewport.
    pub fn translate(&self, event: &egui::Event) -> Option<InputEvent> {
        let Self { hovered, captured, .. } = *self;
        match event {
            egui::Event::PointerMoved(pos) if hovered || captured => {
                Some(InputEvent::PointerMove(PointerEvent::new(self.to_pixels(*pos), None)))
            }
            egui::Event::PointerButton {
                pos,
                button: b,
                pressed,
                modifiers: m,
            } => {
                let pointer = PointerEvent::new(self.to_pixels(*pos), Some(button(*b)?))
                    .with_modifiers(modifiers(m));
                if *pressed {
                    hovered.then_some(InputEvent::PointerDown(pointer))
                } else {
                    (hovered || captured).then_some(InputEvent::PointerUp(pointer))
                }
            }
            egui::Event::MouseWheel { unit, delta, .. } if hovered => {
                let notches = match unit {
                    egui::MouseWheelUnit::Line => delta.y,
                    egui::MouseWheelUnit::Page => delta.y * 3.0,
                    egui::MouseWheelUnit::Point => delta.y / 50.0,
                };
                let position = self.hover_pos.map_or(Vec2::ZERO, |p| self.to_pixels(p));
                (notches != 0.0).then_some(InputEvent::Wheel(WheelEvent {
                    position,
                    delta: notches,
                }))
            }
            egui::Event::Key {
                key: k,
                pressed,
                modifiers: m,
                ..
            } if hovered || captured => {
                let event = KeyEvent {
                    key: key(*k),
                    modifiers: modifiers(m),
                };
                Some(if *pressed {
                    InputEvent::KeyDown(event)
                } else {
                    InputEvent::KeyUp(event)
                })
            }
            egui::Event::PointerGone | egui::Event::WindowFocused(false) if captured => {
                Some(InputEvent::Cancel)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routing(hovered: bool, captured: bool) -> InputRouting {
        InputRouting {
            origin: egui::Pos2::ZERO,
            pixels_per_point: 1.0,
            hovered,
            captured,
            hover_pos: None,
        }
    }

    fn press(x: f32, y: f32, pressed: bool) -> egui::Event {
        egui::Event::PointerButton {
            pos: egui::pos2(x, y),
            button: egui::PointerButton::Primary,
            pressed,
            modifiers: egui::Modifiers::default(),
        }
    }

    #[test]
    fn test_positions_are_viewport_pixels() {
        let routing = InputRouting {
            origin: egui::pos2(100.0, 50.0),
            pixels_per_point: 2.0,
            ..routing(true, false)
        };
        match routing.translate(&press(110.0, 60.0, true)) {
            Some(InputEvent::PointerDown(p)) => {
                assert_eq!(p.position, Vec2::new(20.0, 20.0));
                assert_eq!(p.button, Some(PointerButton::Left));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_press_outside_is_ignored() {
        assert!(routing(false, false).translate(&press(0.0, 0.0, true)).is_none());
    }

    #[test]
    fn test_release_outside_reaches_captured_drag() {
        let event = routing(false, true).translate(&press(500.0, 500.0, false));
        assert!(matches!(event, Some(InputEvent::PointerUp(_))));
        let moved = egui::Event::PointerMoved(egui::pos2(600.0, 0.0));
        assert!(routing(false, true).translate(&moved).is_some());
        assert!(routing(false, false).translate(&moved).is_none());
    }

    #[test]
    fn test_pointer_gone_cancels_drag() {
        assert_eq!(
            routing(false, true).translate(&egui::Event::PointerGone),
            Some(InputEvent::Cancel)
        );
        assert!(routing(true, false).translate(&egui::Event::PointerGone).is_none());
    }

    #[test]
    fn test_wheel_zooms_at_cursor() {
        let wheel = egui::Event::MouseWheel {
            unit: egui::MouseWheelUnit::Line,
            delta: egui::vec2(0.0, 2.0),
            modifiers: egui::Modifiers::default(),
        };
        let routing = InputRouting {
            hover_pos: Some(egui::pos2(30.0, 40.0)),
            ..routing(true, false)
        };
        match routing.translate(&wheel) {
            Some(InputEvent::Wheel(w)) => {
                assert_eq!(w.delta, 2.0);
                assert_eq!(w.position, Vec2::new(30.0, 40.0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_keys_map_to_engine_keys() {
        assert_eq!(key(egui::Key::Home), Key::Home);
        assert_eq!(key(egui::Key::Escape), Key::Escape);
        assert_eq!(key(egui::Key::R), Key::Char('R'));
        assert_eq!(key(egui::Key::F5), Key::Other);
    }
}
