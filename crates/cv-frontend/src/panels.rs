//! Side panel
//!
//! The panel only reads a snapshot of viewer state and returns the actions
//! the user requested; the app applies them after the frame's UI is built.

use cv_core::ClipDirection;
use cv_renderer::Engine;

/// Requested change from the side panel.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelAction {
    OpenFiles,
    SetVisible(String, bool),
    Remove(String),
    ClearAll,
    SetClipping(bool),
    SetCaps(bool),
    UpdateClip(ClipDirection, f32),
    ResetClip,
    ResetView,
    SetActionHandler(String, bool),
    SetNavigator(bool),
    AddSensorAtLastPick,
    ClearSensors,
    Export,
    SaveConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRow {
    pub name: String,
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClipRow {
    pub direction: ClipDirection,
    pub position: f32,
    pub range: (f32, f32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClipView {
    pub enabled: bool,
    pub caps: bool,
    pub rows: Vec<ClipRow>,
}

/// Read-only view of the state the panel shows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PanelView {
    pub objects: Vec<ObjectRow>,
    pub clip: Option<ClipView>,
    pub handlers: Vec<(String, bool)>,
    pub navigator: bool,
    pub last_pick: Option<String>,
    pub can_add_sensor: bool,
    pub sensor_count: usize,
    pub can_export: bool,
    pub show_clip_controls: bool,
}

impl PanelView {
    pub fn from_engine(engine: &Engine) -> Self {
        let objects = engine
            .mesh_names()
            .into_iter()
            .map(|name| ObjectRow {
                visible: engine.object(&name).is_some_and(|o| o.visible),
                name,
            })
            .collect();
        let clip = engine.clipping().filter(|_| engine.domain_range().is_some()).map(|c| ClipView {
            enabled: c.is_enabled(),
            caps: c.caps_enabled(),
            rows: ClipDirection::ALL
                .iter()
                .map(|&direction| ClipRow {
                    direction,
                    position: c.position(direction),
                    range: c.range(direction),
                })
                .collect(),
        });
        let handlers = engine
            .action_handler_names()
            .into_iter()
            .filter_map(|name| {
                let enabled = engine.is_action_handler_enabled(&name)?;
                Some((name, enabled))
            })
            .collect();
        Self {
            objects,
            clip,
            handlers,
            navigator: engine.config().show_navigator,
            can_export: !engine.is_headless() && engine.mesh_count() > 0,
            show_clip_controls: true,
            ..Default::default()
        }
    }
}

pub fn side_panel(ui: &mut egui::Ui, view: &PanelView) -> Vec<PanelAction> {
    let mut actions = Vec::new();
    egui::ScrollArea::vertical().show(ui, |ui| {
        objects_section(ui, view, &mut actions);
        ui.separator();
        if view.show_clip_controls {
            clip_section(ui, view, &mut actions);
            ui.separator();
        }
        interaction_section(ui, view, &mut actions);
        ui.separator();
        pick_section(ui, view, &mut actions);
        ui.separator();
        ui.horizontal(|ui| {
            if ui
                .add_enabled(view.can_export, egui::Button::new("Export image…"))
                .clicked()
            {
                actions.push(PanelAction::Export);
            }
            if ui.button("Save settings").clicked() {
                actions.push(PanelAction::SaveConfig);
            }
        });
    });
    actions
}

fn objects_section(ui: &mut egui::Ui, view: &PanelView, actions: &mut Vec<PanelAction>) {
    ui.heading("Objects");
    ui.horizontal(|ui| {
        if ui.button("Open…").clicked() {
            actions.push(PanelAction::OpenFiles);
        }
        if ui
            .add_enabled(!view.objects.is_empty(), egui::Button::new("Clear"))
            .clicked()
        {
            actions.push(PanelAction::ClearAll);
        }
    });

    if view.objects.is_empty() {
        ui.weak("No objects loaded.\nOpen or drop .stl / .xyz files.");
        return;
    }
    for row in &view.objects {
        ui.horizontal(|ui| {
            let mut visible = row.visible;
            if ui.checkbox(&mut visible, "").changed() {
                actions.push(PanelAction::SetVisible(row.name.clone(), visible));
            }
            ui.label(&row.name);
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui.small_button("✕").on_hover_text("Remove").clicked() {
                    actions.push(PanelAction::Remove(row.name.clone()));
                }
            });
        });
    }
}

fn clip_section(ui: &mut egui::Ui, view: &PanelView, actions: &mut Vec<PanelAction>) {
    ui.heading("Clipping");
    let Some(clip) = &view.clip else {
        ui.weak("Load an object to clip it.");
        return;
    };
    let mut enabled = clip.enabled;
    if ui.checkbox(&mut enabled, "Enabled").changed() {
        actions.push(PanelAction::SetClipping(enabled));
    }
    let mut caps = clip.caps;
    if ui
        .add_enabled(clip.enabled, egui::Checkbox::new(&mut caps, "Section caps"))
        .changed()
    {
        actions.push(PanelAction::SetCaps(caps));
    }

    ui.add_enabled_ui(clip.enabled, |ui| {
        egui::Grid::new("clip_grid").num_columns(2).show(ui, |ui| {
            for row in &clip.rows {
                ui.label(row.direction.label());
                let (lo, hi) = row.range;
                let mut value = row.position;
                let slider = egui::Slider::new(&mut value, lo..=hi.max(lo)).fixed_decimals(3);
                if ui.add(slider).changed() {
                    actions.push(PanelAction::UpdateClip(row.direction, value));
                }
                ui.end_row();
            }
        });
        if ui.button("Reset planes").clicked() {
            actions.push(PanelAction::ResetClip);
        }
    });
}

fn interaction_section(ui: &mut egui::Ui, view: &PanelView, actions: &mut Vec<PanelAction>) {
    ui.heading("Interaction");
    for (name, enabled) in &view.handlers {
        let mut value = *enabled;
        if ui.checkbox(&mut value, name.as_str()).changed() {
            actions.push(PanelAction::SetActionHandler(name.clone(), value));
        }
    }
    let mut navigator = view.navigator;
    if ui.checkbox(&mut navigator, "Navigator").changed() {
        actions.push(PanelAction::SetNavigator(navigator));
    }
    if ui.button("Reset view").clicked() {
        actions.push(PanelAction::ResetView);
    }
}

fn pick_section(ui: &mut egui::Ui, view: &PanelView, actions: &mut Vec<PanelAction>) {
    ui.heading("Pick");
    match &view.last_pick {
        Some(text) => {
            ui.monospace(text);
        }
        None => {
            ui.weak("Click the model to pick.");
        }
    }
    ui.horizontal(|ui| {
        if ui
            .add_enabled(view.can_add_sensor, egui::Button::new("Add sensor"))
            .on_hover_text("Place a sensor at the last picked position")
            .clicked()
        {
            actions.push(PanelAction::AddSensorAtLastPick);
        }
        if ui
            .add_enabled(view.sensor_count > 0, egui::Button::new("Clear sensors"))
            .clicked()
        {
            actions.push(PanelAction::ClearSensors);
        }
    });
    if view.sensor_count > 0 {
        ui.weak(format!("{} sensors", view.sensor_count));
    }
}
