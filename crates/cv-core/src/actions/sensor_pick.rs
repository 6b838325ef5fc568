use std::cell::RefCell;
use std::rc::Rc;

use glam::{Vec2, Vec3};

use super::{ActionContext, ActionHandler, priorities};
use crate::events::EventBus;
use crate::interaction::{PointerButton, PointerEvent};

/// A named point of interest in object coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Sensor {
    pub name: String,
    pub position: Vec3,
    pub color: [f32; 4],
}

impl Sensor {
    pub fn new(name: impl Into<String>, position: Vec3) -> Self {
        Self {
            name: name.into(),
            position,
            color: [1.0, 0.55, 0.0, 1.0],
        }
    }
}

/// Sensor list shared between the pick handler and the marker overlay.
#[derive(Debug, Clone, Default)]
pub struct SensorSet {
    sensors: Rc<RefCell<Vec<Sensor>>>,
}

impl SensorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sensor, replacing one with the same name.
    pub fn insert(&self, sensor: Sensor) {
        let mut sensors = self.sensors.borrow_mut();
        match sensors.iter_mut().find(|s| s.name == sensor.name) {
            Some(existing) => *existing = sensor,
            None => sensors.push(sensor),
        }
    }

    pub fn remove(&self, name: &str) -> bool {
        let mut sensors = self.sensors.borrow_mut();
        let before = sensors.len();
        sensors.retain(|s| s.name != name);
        before != sensors.len()
    }

    pub fn clear(&self) {
        self.sensors.borrow_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.sensors.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.borrow().is_empty()
    }

    pub fn snapshot(&self) -> Vec<Sensor> {
        self.sensors.borrow().clone()
    }

    /// Index and pixel distance of the sensor nearest to `screen` within
    /// `radius`, given a projection from object space to pixels.
    pub fn nearest(
        &self,
        screen: Vec2,
        radius: f32,
        project: impl Fn(Vec3) -> Vec2,
    ) -> Option<(usize, f32)> {
        self.sensors
            .borrow()
            .iter()
            .enumerate()
            .map(|(i, s)| (i, project(s.position).distance(screen)))
            .filter(|(_, d)| d.is_finite() && *d <= radius)
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorPicked {
    pub sensor: Sensor,
    pub screen_distance: f32,
}

/// Selects the nearest sensor marker on left click.
pub struct SensorPickHandler {
    enabled: bool,
    sensors: SensorSet,
    events: Rc<EventBus<SensorPicked>>,
}

impl SensorPickHandler {
    pub const NAME: &'static str = "sensor-pick";

    pub fn new(sensors: SensorSet) -> Self {
        Self {
            enabled: true,
            sensors,
            events: Rc::new(EventBus::new()),
        }
    }

    pub fn sensors(&self) -> &SensorSet {
        &self.sensors
    }

    pub fn events(&self) -> Rc<EventBus<SensorPicked>> {
        Rc::clone(&self.events)
    }
}

impl ActionHandler for SensorPickHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        priorities::SENSOR_PICK
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn left_up(&mut self, ctx: &mut ActionContext, event: &PointerEvent) -> bool {
        let config = ctx.control.interaction_config();
        let (tolerance, radius) = (config.click_tolerance, config.sensor_pick_radius);
        if self.sensors.is_empty()
            || !ctx.session.is_idle()
            || !ctx.session.is_button_down(PointerButton::Left)
            || !ctx.session.is_click(event.position, tolerance)
        {
            return false;
        }
        let model = ctx.control.transform().model_matrix();
        let control = &*ctx.control;
        let Some((index, screen_distance)) = self.sensors.nearest(event.position, radius, |p| {
            control.screen_position(model.transform_point3(p))
        }) else {
            return false;
        };
        let Some(sensor) = self.sensors.snapshot().into_iter().nth(index) else {
            return false;
        };
        tracing::debug!(sensor = %sensor.name, screen_distance, "sensor picked");
        self.events.trigger(&SensorPicked {
            sensor,
            screen_distance,
        });
        true
    }
}
