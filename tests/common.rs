//! Test utilities & fixtures.
//! Provides a fast-timing config and a deterministic probe board whose
//! actuations tests can observe.
#![allow(dead_code)] // each test binary uses a different subset

use std::sync::{Arc, Mutex};

use meshgate::config::Config;
use meshgate::sensors::{Actuators, Axis, Rotation, SensorHub};

/// Config with short, test-friendly timings. Registration grace is zero so
/// polling tests are not deferred; the grace test sets its own value.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.gateway.identity = 0xA1;
    config.gateway.poll_interval_ms = 10;
    config.gateway.poll_timeout_ms = 30;
    config.gateway.registration_grace_ms = 0;
    config.endpoint.identity = 0xE1;
    config
}

/// Everything a board was asked to do, in order.
#[derive(Debug, Default)]
pub struct Actions {
    pub colors: Vec<(u8, u8, u8)>,
    pub texts: Vec<String>,
    pub icons: Vec<String>,
    pub brightness: Vec<u8>,
    pub servos: Vec<(u8, u16)>,
    pub digital_writes: Vec<(u8, u8)>,
    pub analog_writes: Vec<(u8, u16)>,
    pub resets: u32,
}

/// Deterministic board: fixed sensor readings, recorded actuations.
pub struct ProbeBoard {
    pub actions: Arc<Mutex<Actions>>,
}

impl ProbeBoard {
    pub fn new() -> (Self, Arc<Mutex<Actions>>) {
        let actions = Arc::new(Mutex::new(Actions::default()));
        (
            Self {
                actions: actions.clone(),
            },
            actions,
        )
    }
}

impl SensorHub for ProbeBoard {
    fn temperature(&mut self) -> f64 {
        21.0
    }
    fn light_level(&mut self) -> f64 {
        90.0
    }
    fn acceleration(&mut self, axis: Axis) -> f64 {
        match axis {
            Axis::X => 0.0,
            Axis::Y => 0.0,
            Axis::Z => -1024.0,
        }
    }
    fn magnetic_force(&mut self, _axis: Axis) -> f64 {
        12.0
    }
    fn rotation(&mut self, _kind: Rotation) -> f64 {
        3.0
    }
    fn compass_heading(&mut self) -> f64 {
        180.0
    }
    fn digital_read(&mut self, _pin: u8) -> f64 {
        1.0
    }
    fn analog_read(&mut self, _pin: u8) -> f64 {
        512.0
    }
}

impl Actuators for ProbeBoard {
    fn digital_write(&mut self, pin: u8, value: u8) {
        self.actions.lock().unwrap().digital_writes.push((pin, value));
    }
    fn analog_write(&mut self, pin: u8, value: u16) {
        self.actions.lock().unwrap().analog_writes.push((pin, value));
    }
    fn display_text(&mut self, text: &str) {
        self.actions.lock().unwrap().texts.push(text.to_string());
    }
    fn display_icon(&mut self, icon: &str) {
        self.actions.lock().unwrap().icons.push(icon.to_string());
    }
    fn set_color(&mut self, r: u8, g: u8, b: u8) {
        self.actions.lock().unwrap().colors.push((r, g, b));
    }
    fn set_brightness(&mut self, level: u8) {
        self.actions.lock().unwrap().brightness.push(level);
    }
    fn servo_write(&mut self, pin: u8, angle: u16) {
        self.actions.lock().unwrap().servos.push((pin, angle));
    }
    fn reset(&mut self) {
        self.actions.lock().unwrap().resets += 1;
    }
}
