//! Main application

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use cv_core::actions::{
    FacePickHandler, PositionPickHandler, Sensor, SensorPickHandler, SensorSet, ValuePickHandler,
};
use cv_core::{Clipping, PickPart};
use cv_renderer::{NavigatorInset, SensorMarkers};
use glam::Vec3;

use crate::config::{SharedConfig, create_shared_config};
use crate::loader;
use crate::panels::{PanelAction, PanelView, side_panel};
use crate::viewport::ViewportState;

/// Last pick result, written by pick handler subscriptions.
#[derive(Debug, Default)]
struct PickLog {
    text: Option<String>,
    position: Option<Vec3>,
}

pub struct CutviewApp {
    config: SharedConfig,
    viewport: Option<ViewportState>,
    clipping: Clipping,
    sensors: SensorSet,
    picks: Rc<RefCell<PickLog>>,
    status: Option<String>,
}

impl CutviewApp {
    pub fn new(cc: &eframe::CreationContext<'_>, paths: Vec<PathBuf>) -> Self {
        let config = create_shared_config();
        let (renderer_config, theme) = {
            let c = config.read();
            (c.config().renderer.clone(), c.config().ui.theme)
        };
        cc.egui_ctx.set_visuals(theme.visuals());

        let clipping = Clipping::new().with_cap_margin(renderer_config.cap_margin);
        let sensors = SensorSet::new();
        let picks = Rc::new(RefCell::new(PickLog::default()));

        let mut status = None;
        let viewport = match ViewportState::new(cc.wgpu_render_state.as_ref(), renderer_config) {
            Ok(mut viewport) => {
                install_handlers(&mut viewport, &sensors, &picks);
                if let Err(e) = clipping.bind(&mut viewport.engine) {
                    tracing::warn!("Failed to bind clipping: {}", e);
                }
                Some(viewport)
            }
            Err(e) => {
                tracing::error!("Failed to create viewport: {}", e);
                status = Some(format!("Viewer unavailable: {e}"));
                None
            }
        };

        let mut app = Self {
            config,
            viewport,
            clipping,
            sensors,
            picks,
            status,
        };
        app.load_files(paths);
        app
    }

    fn load_files(&mut self, paths: Vec<PathBuf>) {
        let Some(viewport) = &mut self.viewport else {
            return;
        };
        let color = self.config.read().config().renderer.default_object_color;
        for path in paths {
            let mut drawable = match loader::load_path(&path, color) {
                Ok(drawable) => drawable,
                Err(e) => {
                    tracing::warn!("Failed to load {:?}: {}", path, e);
                    self.status = Some(format!("{}: {e}", path.display()));
                    continue;
                }
            };
            drawable.name = unique_name(&drawable.name, |n| viewport.engine.object(n).is_some());
            let name = drawable.name.clone();
            match viewport.engine.add_mesh(drawable) {
                Ok(()) => self.status = Some(format!("Loaded {name}")),
                Err(e) => self.status = Some(format!("{name}: {e}")),
            }
        }
    }

    fn apply(&mut self, action: PanelAction) {
        if let PanelAction::OpenFiles = action {
            let files = rfd::FileDialog::new()
                .add_filter("Models", loader::EXTENSIONS)
                .pick_files();
            if let Some(paths) = files {
                self.load_files(paths);
            }
            return;
        }
        if let PanelAction::Export = action {
            self.export();
            return;
        }
        if let PanelAction::SaveConfig = action {
            if let Err(e) = self.config.write().save() {
                self.status = Some(format!("Failed to save settings: {e}"));
            }
            return;
        }
        let Some(viewport) = &mut self.viewport else {
            return;
        };
        let engine = &mut viewport.engine;
        let result = match action {
            PanelAction::SetVisible(name, visible) => engine.set_visible(visible, &name).map(|_| ()),
            PanelAction::Remove(name) => engine.remove_mesh(&name).map(|_| ()),
            PanelAction::ClearAll => engine.clear_meshes(),
            PanelAction::SetClipping(enabled) => {
                engine.set_clipping_enabled(enabled);
                Ok(())
            }
            PanelAction::SetCaps(enabled) => {
                engine.set_caps_enabled(enabled);
                Ok(())
            }
            PanelAction::UpdateClip(direction, value) => {
                engine.update_clip(direction, value);
                Ok(())
            }
            PanelAction::ResetClip => {
                engine.reset_clip();
                Ok(())
            }
            PanelAction::ResetView => {
                engine.reset_view();
                Ok(())
            }
            PanelAction::SetActionHandler(name, enabled) => {
                engine.set_action_handler_enabled(&name, enabled);
                Ok(())
            }
            PanelAction::SetNavigator(show) => {
                let mut config = engine.config().clone();
                config.show_navigator = show;
                if show && !engine.has_render_handler(NavigatorInset::NAME) {
                    engine.add_render_handler(Box::new(NavigatorInset::new(config.navigator_size)));
                }
                self.config.write().config_mut().renderer = config.clone();
                engine.set_config(config);
                Ok(())
            }
            PanelAction::AddSensorAtLastPick => {
                if let Some(position) = self.picks.borrow().position {
                    let name = format!("S{}", self.sensors.len() + 1);
                    self.sensors.insert(Sensor::new(name, position));
                    engine.request_redraw();
                }
                Ok(())
            }
            PanelAction::ClearSensors => {
                self.sensors.clear();
                engine.request_redraw();
                Ok(())
            }
            PanelAction::OpenFiles | PanelAction::Export | PanelAction::SaveConfig => Ok(()),
        };
        if let Err(e) = result {
            tracing::warn!("Action failed: {}", e);
            self.status = Some(e.to_string());
        }
    }

    fn export(&mut self) {
        let Some(viewport) = &mut self.viewport else {
            return;
        };
        let (format, scale) = {
            let c = self.config.read();
            (c.config().ui.export_format, c.config().ui.export_scale.clamp(0.25, 8.0))
        };
        let size = viewport.engine.viewport() * scale;
        let Some(path) = rfd::FileDialog::new()
            .set_file_name(format!("cutview.{}", format.extension()))
            .save_file()
        else {
            return;
        };
        let result = viewport
            .engine
            .export_image(size.x.round() as u32, size.y.round() as u32, format)
            .map_err(|e| e.to_string())
            .and_then(|bytes| std::fs::write(&path, bytes).map_err(|e| e.to_string()));
        self.status = Some(match result {
            Ok(()) => format!("Exported {}", path.display()),
            Err(e) => format!("Export failed: {e}"),
        });
    }

    fn panel_view(&self) -> PanelView {
        let Some(viewport) = &self.viewport else {
            return PanelView::default();
        };
        let picks = self.picks.borrow();
        PanelView {
            last_pick: picks.text.clone(),
            can_add_sensor: picks.position.is_some(),
            sensor_count: self.sensors.len(),
            show_clip_controls: self.config.read().config().ui.show_clip_controls,
            ..PanelView::from_engine(&viewport.engine)
        }
    }
}

/// Pick handlers and the sensor overlay, with subscriptions feeding the pick
/// readout.
fn install_handlers(viewport: &mut ViewportState, sensors: &SensorSet, picks: &Rc<RefCell<PickLog>>) {
    let position = PositionPickHandler::new();
    let log = Rc::clone(picks);
    position.events().add(move |e| {
        let mut log = log.borrow_mut();
        let part = match &e.part {
            PickPart::Drawable(key) => key.to_string(),
            PickPart::Cap(direction) => format!("{} cap {direction}", e.object),
        };
        log.text = Some(format!("{part}\n{}", format_vec(e.position)));
        log.position = Some(e.position);
    });

    let value = ValuePickHandler::new();
    let log = Rc::clone(picks);
    value.events().add(move |e| {
        let mut log = log.borrow_mut();
        let mode = if e.sampling { "sample" } else { "value" };
        log.text = Some(format!("{mode} {:.4}\n{}", e.value, format_vec(e.position)));
        log.position = Some(e.position);
    });

    let face = FacePickHandler::new();
    let log = Rc::clone(picks);
    face.events().add(move |e| {
        log.borrow_mut().text = Some(format!(
            "{} face {}\n{}",
            e.hit.name,
            e.hit.face_index,
            format_vec(e.hit.local_position)
        ));
    });

    let sensor = SensorPickHandler::new(sensors.clone());
    let log = Rc::clone(picks);
    sensor.events().add(move |e| {
        log.borrow_mut().text = Some(format!(
            "sensor {}\n{}",
            e.sensor.name,
            format_vec(e.sensor.position)
        ));
    });

    let engine = &mut viewport.engine;
    engine.add_action_handler(Box::new(sensor));
    engine.add_action_handler(Box::new(position));
    engine.add_action_handler(Box::new(face));
    engine.add_action_handler(Box::new(value));
    engine.add_overlay_drawer(Box::new(SensorMarkers::new(sensors.clone())));
}

fn format_vec(v: Vec3) -> String {
    format!("({:.4}, {:.4}, {:.4})", v.x, v.y, v.z)
}

/// `base`, or `base (n)` with the smallest free `n`.
fn unique_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{base} ({n})"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

impl eframe::App for CutviewApp {
    fn update(&mut self, ctx: &egui::Context, frame: &mut eframe::Frame) {
        let dropped: Vec<PathBuf> = ctx.input(|i| {
            i.raw
                .dropped_files
                .iter()
                .filter_map(|f| f.path.clone())
                .collect()
        });
        if !dropped.is_empty() {
            self.load_files(dropped);
        }

        let view = self.panel_view();
        let actions = egui::SidePanel::right("side_panel")
            .default_width(260.0)
            .show(ctx, |ui| side_panel(ui, &view))
            .inner;

        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.horizontal(|ui| match &self.status {
                Some(status) => {
                    ui.label(status);
                }
                None => {
                    ui.weak("Drag to rotate · right-drag to pan · wheel to zoom · shift-drag to sample values");
                }
            });
        });

        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| {
                if let Some(viewport) = &mut self.viewport {
                    viewport.show(ui, frame);
                }
            });

        for action in actions {
            self.apply(action);
        }
    }
}

impl Drop for CutviewApp {
    fn drop(&mut self) {
        if let Some(viewport) = &mut self.viewport {
            self.clipping.unbind(&mut viewport.engine);
        }
        if let Err(e) = self.config.write().save() {
            tracing::warn!("Failed to save config: {}", e);
        }
    }
}
