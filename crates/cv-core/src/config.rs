//! Camera and interaction settings.

use serde::{Deserialize, Serialize};

/// Perspective camera settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CameraConfig {
    /// Vertical field of view in degrees.
    pub fov_degrees: f32,
    /// Eye distance from the origin; the fitted model has unit radius.
    pub distance: f32,
    pub near_plane: f32,
    pub far_plane: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_degrees: 45.0,
            distance: 3.5,
            near_plane: 0.1,
            far_plane: 100.0,
        }
    }
}

/// Pointer and keyboard interaction settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionConfig {
    /// Drag rotation speed in radians per pixel.
    pub rotation_speed: f32,
    /// Rotation applied per arrow-key press, in degrees.
    pub key_rotation_step_degrees: f32,
    /// Pointer travel in pixels below which a press/release is a click.
    pub click_tolerance: f32,
    /// Multiplicative zoom per wheel notch.
    pub zoom_step: f32,
    pub min_zoom: f32,
    pub max_zoom: f32,
    /// Screen radius in pixels for selecting sensor points.
    pub sensor_pick_radius: f32,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            rotation_speed: 0.01,
            key_rotation_step_degrees: 5.0,
            click_tolerance: 3.0,
            zoom_step: 1.1,
            min_zoom: 0.1,
            max_zoom: 20.0,
            sensor_pick_radius: 8.0,
        }
    }
}
