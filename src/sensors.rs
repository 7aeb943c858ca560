//! Sensor and actuator collaborators.
//!
//! The gateway core never talks to hardware directly: every physical reading
//! is a labeled scalar pulled through [`SensorHub`], and every physical side
//! effect is a labeled call into [`Actuators`]. Both are infallible by
//! contract; a board that cannot service a call does whatever is safe and
//! returns. [`SimulatedBoard`] is the default implementation and produces
//! plausible jittered readings, which is enough to run the whole pipeline
//! without hardware attached.

use log::{info, warn};
use rand::Rng;

/// Axis selector for acceleration and magnetic-force reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

/// Rotation plane selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Pitch,
    Roll,
}

/// Read-only scalar getters, one per named sensor channel.
pub trait SensorHub {
    fn temperature(&mut self) -> f64;
    fn light_level(&mut self) -> f64;
    fn acceleration(&mut self, axis: Axis) -> f64;
    fn magnetic_force(&mut self, axis: Axis) -> f64;
    fn rotation(&mut self, kind: Rotation) -> f64;
    fn compass_heading(&mut self) -> f64;
    fn digital_read(&mut self, pin: u8) -> f64;
    fn analog_read(&mut self, pin: u8) -> f64;
}

/// Write-only side effects. Values are truncated here, not by the protocol.
pub trait Actuators {
    fn digital_write(&mut self, pin: u8, value: u8);
    fn analog_write(&mut self, pin: u8, value: u16);
    fn display_text(&mut self, text: &str);
    fn display_icon(&mut self, icon: &str);
    fn set_color(&mut self, r: u8, g: u8, b: u8);
    fn set_brightness(&mut self, level: u8);
    fn servo_write(&mut self, pin: u8, angle: u16);
    fn reset(&mut self);
}

/// A full board: sensors plus actuators behind one object.
pub trait Board: SensorHub + Actuators + Send {}
impl<T: SensorHub + Actuators + Send> Board for T {}

/// Read every enabled telemetry category off a board, in emission order.
/// Shared by both roles so gateway-local pulls and endpoint poll replies
/// produce identical field sets.
pub fn read_enabled_channels(
    board: &mut dyn SensorHub,
    cfg: &crate::config::TelemetryConfig,
) -> Vec<(&'static str, f64)> {
    let mut fields = Vec::new();
    if cfg.temperature {
        fields.push(("temp", board.temperature()));
    }
    if cfg.light {
        fields.push(("light", board.light_level()));
    }
    if cfg.accelerometer {
        fields.push(("ax", board.acceleration(Axis::X)));
        fields.push(("ay", board.acceleration(Axis::Y)));
        fields.push(("az", board.acceleration(Axis::Z)));
    }
    if cfg.magnetic_force {
        fields.push(("mx", board.magnetic_force(Axis::X)));
        fields.push(("my", board.magnetic_force(Axis::Y)));
        fields.push(("mz", board.magnetic_force(Axis::Z)));
    }
    if cfg.rotation {
        fields.push(("pitch", board.rotation(Rotation::Pitch)));
        fields.push(("roll", board.rotation(Rotation::Roll)));
    }
    if cfg.compass {
        fields.push(("heading", board.compass_heading()));
    }
    if cfg.digital_read {
        fields.push(("dread", board.digital_read(cfg.digital_pin)));
    }
    if cfg.analog_read {
        fields.push(("aread", board.analog_read(cfg.analog_pin)));
    }
    fields
}

/// Generate a nonzero hardware identity for boards that have none burned in.
pub fn random_identity() -> u32 {
    let mut rng = rand::thread_rng();
    loop {
        let id: u32 = rng.gen();
        if id != 0 {
            return id;
        }
    }
}

/// Software stand-in for a sensor board. Readings drift around fixed
/// baselines; actuations are logged and the last one of each kind is kept so
/// tests can observe them.
pub struct SimulatedBoard {
    temp_base: f64,
    light_base: f64,
    /// Last actuations, most recent wins. Exposed for tests.
    pub last_text: Option<String>,
    pub last_icon: Option<String>,
    pub last_color: Option<(u8, u8, u8)>,
    pub last_brightness: Option<u8>,
    pub last_servo: Option<(u8, u16)>,
    pub last_digital_write: Option<(u8, u8)>,
    pub last_analog_write: Option<(u8, u16)>,
    pub reset_count: u32,
}

impl SimulatedBoard {
    pub fn new() -> Self {
        Self {
            temp_base: 21.0,
            light_base: 128.0,
            last_text: None,
            last_icon: None,
            last_color: None,
            last_brightness: None,
            last_servo: None,
            last_digital_write: None,
            last_analog_write: None,
            reset_count: 0,
        }
    }

    fn jitter(&self, base: f64, spread: f64) -> f64 {
        let mut rng = rand::thread_rng();
        base + rng.gen_range(-spread..=spread)
    }
}

impl Default for SimulatedBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorHub for SimulatedBoard {
    fn temperature(&mut self) -> f64 {
        self.jitter(self.temp_base, 0.5).round()
    }

    fn light_level(&mut self) -> f64 {
        self.jitter(self.light_base, 10.0).clamp(0.0, 255.0).round()
    }

    fn acceleration(&mut self, axis: Axis) -> f64 {
        // Resting orientation: gravity on Z only.
        let base = match axis {
            Axis::X | Axis::Y => 0.0,
            Axis::Z => -1024.0,
        };
        self.jitter(base, 16.0).round()
    }

    fn magnetic_force(&mut self, _axis: Axis) -> f64 {
        self.jitter(0.0, 40.0).round()
    }

    fn rotation(&mut self, _kind: Rotation) -> f64 {
        self.jitter(0.0, 2.0).round()
    }

    fn compass_heading(&mut self) -> f64 {
        let mut rng = rand::thread_rng();
        rng.gen_range(0.0_f64..360.0).floor()
    }

    fn digital_read(&mut self, _pin: u8) -> f64 {
        let mut rng = rand::thread_rng();
        if rng.gen_bool(0.5) {
            1.0
        } else {
            0.0
        }
    }

    fn analog_read(&mut self, _pin: u8) -> f64 {
        let mut rng = rand::thread_rng();
        rng.gen_range(0..1024) as f64
    }
}

impl Actuators for SimulatedBoard {
    fn digital_write(&mut self, pin: u8, value: u8) {
        info!("board: digital_write pin={} value={}", pin, value.min(1));
        self.last_digital_write = Some((pin, value.min(1)));
    }

    fn analog_write(&mut self, pin: u8, value: u16) {
        info!("board: analog_write pin={} value={}", pin, value.min(1023));
        self.last_analog_write = Some((pin, value.min(1023)));
    }

    fn display_text(&mut self, text: &str) {
        info!("board: display_text '{}'", crate::logutil::escape_log(text));
        self.last_text = Some(text.to_string());
    }

    fn display_icon(&mut self, icon: &str) {
        info!("board: display_icon '{}'", crate::logutil::escape_log(icon));
        self.last_icon = Some(icon.to_string());
    }

    fn set_color(&mut self, r: u8, g: u8, b: u8) {
        info!("board: set_color {},{},{}", r, g, b);
        self.last_color = Some((r, g, b));
    }

    fn set_brightness(&mut self, level: u8) {
        info!("board: set_brightness {}", level);
        self.last_brightness = Some(level);
    }

    fn servo_write(&mut self, pin: u8, angle: u16) {
        let angle = angle.min(180);
        info!("board: servo_write pin={} angle={}", pin, angle);
        self.last_servo = Some((pin, angle));
    }

    fn reset(&mut self) {
        // The real board reboots here. The simulation just records the request.
        warn!("board: reset requested");
        self.reset_count += 1;
    }
}
