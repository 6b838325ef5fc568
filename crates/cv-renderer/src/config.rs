//! Renderer configuration.

use cv_core::{CameraConfig, InteractionConfig};
use serde::{Deserialize, Serialize};

/// Settings applied when an engine is created or reconfigured.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RendererConfig {
    pub camera: CameraConfig,
    pub interaction: InteractionConfig,
    /// Clear color, linear RGBA.
    pub background: [f32; 4],
    /// Color given to loaded objects without one.
    pub default_object_color: [f32; 4],
    /// Screen size of point-cloud points in pixels.
    pub point_size: f32,
    /// Cap quads extend past the domain by this share of its largest side.
    pub cap_margin: f32,
    pub show_navigator: bool,
    /// Side length of the navigator inset in pixels.
    pub navigator_size: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            interaction: InteractionConfig::default(),
            background: [0.12, 0.12, 0.14, 1.0],
            default_object_color: [0.72, 0.74, 0.78, 1.0],
            point_size: 4.0,
            cap_margin: 0.05,
            show_navigator: true,
            navigator_size: 96,
        }
    }
}
