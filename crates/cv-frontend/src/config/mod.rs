//! Application configuration module
//!
//! Renderer settings plus UI preferences, persisted between sessions.

mod manager;

pub use manager::{ConfigError, ConfigManager, SharedConfig, create_shared_config};

use cv_renderer::{ImageFormat, RendererConfig};
use serde::{Deserialize, Serialize};

/// UI theme
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum UiTheme {
    #[default]
    Dark,
    Light,
}

impl UiTheme {
    pub fn visuals(self) -> egui::Visuals {
        match self {
            UiTheme::Dark => egui::Visuals::dark(),
            UiTheme::Light => egui::Visuals::light(),
        }
    }
}

/// UI preferences
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UiConfig {
    pub theme: UiTheme,
    /// Show the clipping section of the side panel.
    pub show_clip_controls: bool,
    /// Format used by the export button.
    pub export_format: ImageFormat,
    /// Export size as a multiple of the viewport size.
    pub export_scale: f32,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            theme: UiTheme::Dark,
            show_clip_controls: true,
            export_format: ImageFormat::Png,
            export_scale: 1.0,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    /// Configuration format version
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub renderer: RendererConfig,
    #[serde(default)]
    pub ui: UiConfig,
}

impl AppConfig {
    /// Current configuration version
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            ..Default::default()
        }
    }
}
