//! # Configuration Management Module
//!
//! TOML-backed configuration for the gateway and endpoint roles. Every
//! section has working defaults, so an empty file is a valid config and
//! `meshgate init` writes a fully commented starting point. Values are
//! validated on load with errors that say what to fix.
//!
//! ```toml
//! [gateway]
//! name = "meshgate"
//! poll_interval_ms = 100
//! poll_timeout_ms = 400
//!
//! [radio]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//!
//! [telemetry]
//! temperature = true
//! light = true
//! ```
//!
//! Toggles (telemetry categories, stream switches, diagnostics) take effect
//! on the next relevant operation; nothing is cached at startup.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub radio: RadioConfig,
    #[serde(default)]
    pub uplink: UplinkConfig,
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub properties: PropertiesConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub name: String,
    /// Hardware identity of the gateway itself; 0 generates one at startup.
    #[serde(default)]
    pub identity: u32,
    /// Scheduler tick period (ms).
    pub poll_interval_ms: u64,
    /// Deadline for a remote poll reply (ms).
    pub poll_timeout_ms: u64,
    /// Relaxed deadline armed when a device registers (ms).
    pub registration_grace_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            name: "meshgate".to_string(),
            identity: 0,
            poll_interval_ms: 100,
            poll_timeout_ms: 400,
            registration_grace_ms: 1500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioConfig {
    /// Serial device of the radio modem; empty runs without a radio
    /// (loopback mode, used by tests).
    #[serde(default)]
    pub port: String,
    pub baud_rate: u32,
    /// Pause between consecutive transmissions (ms); the air link is
    /// half-duplex.
    pub min_send_gap_ms: u64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115_200,
            min_send_gap_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UplinkConfig {
    /// Serial device of the uplink host link; empty uses stdio.
    #[serde(default)]
    pub port: String,
    pub baud_rate: u32,
    /// Extra gap after each written line (ms).
    #[serde(default)]
    pub line_gap_ms: u64,
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115_200,
            line_gap_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Hardware identity of this endpoint; 0 generates one at startup.
    #[serde(default)]
    pub identity: u32,
    /// Re-announce period while no id has been assigned (ms).
    pub announce_interval_ms: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            identity: 0,
            announce_interval_ms: 3000,
        }
    }
}

/// Per-category telemetry switches plus the whole-stream switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub temperature: bool,
    pub light: bool,
    pub accelerometer: bool,
    pub magnetic_force: bool,
    pub rotation: bool,
    pub compass: bool,
    pub digital_read: bool,
    pub analog_read: bool,
    /// Pin sampled when digital_read is on.
    #[serde(default)]
    pub digital_pin: u8,
    /// Pin sampled when analog_read is on.
    #[serde(default = "default_analog_pin")]
    pub analog_pin: u8,
}

fn default_analog_pin() -> u8 {
    1
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            temperature: true,
            light: true,
            accelerometer: true,
            magnetic_force: false,
            rotation: false,
            compass: false,
            digital_read: false,
            analog_read: false,
            digital_pin: 0,
            analog_pin: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertiesConfig {
    pub enabled: bool,
}

impl Default for PropertiesConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DiagnosticsConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base level: error, warn, info, debug, trace.
    pub level: String,
    /// Optional log file; records also reach the console when it is a TTY.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    /// Load and validate a configuration file.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Cannot read config file {}: {}", path, e))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| anyhow!("Invalid config file {}: {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    /// Write a default configuration file.
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let serialized = toml::to_string_pretty(&config)?;
        fs::write(path, serialized).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.gateway.name.trim().is_empty() {
            return Err(anyhow!(
                "gateway.name must not be empty\n\
                 SOLUTION: set a short station name in [gateway]"
            ));
        }
        if self.gateway.poll_interval_ms == 0 {
            return Err(anyhow!(
                "gateway.poll_interval_ms must be > 0\n\
                 SOLUTION: 100 is a reasonable tick period"
            ));
        }
        if self.gateway.poll_timeout_ms < self.gateway.poll_interval_ms {
            return Err(anyhow!(
                "gateway.poll_timeout_ms ({}) must be >= poll_interval_ms ({}), \
                 otherwise every poll is counted lost before its reply can arrive",
                self.gateway.poll_timeout_ms,
                self.gateway.poll_interval_ms
            ));
        }
        if self.endpoint.announce_interval_ms == 0 {
            return Err(anyhow!(
                "endpoint.announce_interval_ms must be > 0\n\
                 SOLUTION: 3000 is a reasonable announce period"
            ));
        }
        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            other => {
                return Err(anyhow!(
                    "logging.level {:?} is not one of error/warn/info/debug/trace",
                    other
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().expect("defaults must be valid");
    }

    #[test]
    fn empty_toml_is_a_valid_config() {
        let config: Config = toml::from_str("").expect("empty config parses");
        config.validate().expect("empty config validates");
        assert_eq!(config.gateway.poll_timeout_ms, 400);
        assert!(config.telemetry.temperature);
    }

    #[test]
    fn timeout_below_interval_is_rejected() {
        let mut config = Config::default();
        config.gateway.poll_timeout_ms = 10;
        assert!(config.validate().is_err());
    }
}
