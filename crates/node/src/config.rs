//! TOML config file loading, environment overrides and validation for the
//! device process.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

use vase_core::ControllerConfig;

use crate::probe::{ADS1115_MAX, MAX_CHANNEL};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device_id: String,
    pub controller: ControllerConfig,
    pub mqtt: MqttSection,
    pub probe: ProbeSection,
    pub pump: PumpSection,
    pub button: ButtonSection,
    pub sim: SimSection,
    pub web: WebSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttSection {
    pub host: String,
    pub port: u16,
    pub keep_alive_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
#[cfg_attr(not(feature = "hw"), allow(dead_code))]
pub struct ProbeSection {
    /// I2C address of the ADS1115.
    pub i2c_addr: u16,
    /// ADS1115 input (0 = AIN0 … 3 = AIN3).
    pub channel: u8,
    /// BCM pin powering the probe while a sample is taken.
    pub excitation_gpio: u8,
    pub raw_dry: i64,
    pub raw_wet: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PumpSection {
    pub gpio: u8,
    /// Many common relay boards are active-low.  Set false for active-high.
    pub active_low: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
#[cfg_attr(not(feature = "hw"), allow(dead_code))]
pub struct ButtonSection {
    /// No button when unset.
    pub gpio: Option<u8>,
    /// Trigger on the rising edge instead of the falling one.
    pub rising_edge: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
#[cfg_attr(not(feature = "sim"), allow(dead_code))]
pub struct SimSection {
    /// `drying`, `stable`, `flaky` or `wet`.
    pub scenario: String,
    /// Day/night cycle length.  600 for fast iteration, 86400 for real time.
    pub diurnal_period_secs: f64,
    pub ambient_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_id: "vase-1".to_string(),
            controller: ControllerConfig::default(),
            mqtt: MqttSection::default(),
            probe: ProbeSection::default(),
            pump: PumpSection::default(),
            button: ButtonSection::default(),
            sim: SimSection::default(),
            web: WebSection::default(),
        }
    }
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            keep_alive_secs: 30,
        }
    }
}

impl Default for ProbeSection {
    fn default() -> Self {
        Self {
            i2c_addr: 0x48,
            channel: 0,
            excitation_gpio: 23,
            raw_dry: 26000,
            raw_wet: 12000,
        }
    }
}

impl Default for PumpSection {
    fn default() -> Self {
        Self {
            gpio: 17,
            active_low: true,
        }
    }
}

impl Default for SimSection {
    fn default() -> Self {
        Self {
            scenario: "drying".to_string(),
            diurnal_period_secs: 600.0,
            ambient_interval_ms: 5000,
        }
    }
}

impl Default for WebSection {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins on the Raspberry Pi 40-pin header available for general
/// use.  GPIO 0-1 belong to the ID EEPROM; 28+ are not on the header.
const VALID_GPIO_PINS: std::ops::RangeInclusive<u8> = 2..=27;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate every section.  Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_identity(&mut errors);
        self.validate_controller(&mut errors);
        self.validate_hardware(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_identity(&self, errors: &mut Vec<String>) {
        let id = self.device_id.trim();
        if id.is_empty() {
            errors.push("device_id is empty".to_string());
        } else if id.contains(['/', '+', '#']) || id.chars().any(char::is_whitespace) {
            errors.push(format!(
                "device_id '{}' must not contain '/', '+', '#' or whitespace",
                self.device_id
            ));
        }

        if self.mqtt.host.trim().is_empty() {
            errors.push("mqtt.host is empty".to_string());
        }
        if self.mqtt.port == 0 {
            errors.push("mqtt.port must be non-zero".to_string());
        }
        if self.web.port == 0 {
            errors.push("web.port must be non-zero".to_string());
        }
    }

    fn validate_controller(&self, errors: &mut Vec<String>) {
        let c = &self.controller;

        if c.threshold <= 0 {
            errors.push(format!(
                "controller.threshold must be positive, got {}",
                c.threshold
            ));
        }
        if c.activation_budget == 0 {
            errors.push("controller.activation_budget must be positive".to_string());
        }

        for (name, value) in [
            ("sample_period_ms", c.sample_period_ms),
            ("monitor_interval_ms", c.monitor_interval_ms),
            ("watering_duration_ms", c.watering_duration_ms),
        ] {
            if value == 0 {
                errors.push(format!("controller.{name} must be positive"));
            }
        }

        if self.sim.ambient_interval_ms == 0 {
            errors.push("sim.ambient_interval_ms must be positive".to_string());
        }
        if self.sim.diurnal_period_secs <= 0.0 {
            errors.push(format!(
                "sim.diurnal_period_secs must be positive, got {}",
                self.sim.diurnal_period_secs
            ));
        }
    }

    fn validate_hardware(&self, errors: &mut Vec<String>) {
        let p = &self.probe;

        // ── ADC ─────────────────────────────────────────────
        if usize::from(p.channel) > MAX_CHANNEL {
            errors.push(format!(
                "probe.channel {} out of range (0-{MAX_CHANNEL})",
                p.channel
            ));
        }
        for (name, raw) in [("raw_dry", p.raw_dry), ("raw_wet", p.raw_wet)] {
            if !(0..=i64::from(ADS1115_MAX)).contains(&raw) {
                errors.push(format!(
                    "probe.{name} {raw} out of ADS1115 range [0, {ADS1115_MAX}]"
                ));
            }
        }
        if p.raw_dry == p.raw_wet {
            errors.push(format!(
                "probe.raw_dry and probe.raw_wet are both {}: calibration range is zero",
                p.raw_dry
            ));
        }

        // ── GPIO pin whitelist ──────────────────────────────
        let mut pins = vec![
            ("probe.excitation_gpio", p.excitation_gpio),
            ("pump.gpio", self.pump.gpio),
        ];
        if let Some(pin) = self.button.gpio {
            pins.push(("button.gpio", pin));
        }

        let mut seen: HashSet<u8> = HashSet::new();
        for (name, pin) in pins {
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!(
                    "{name} {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
            } else if !seen.insert(pin) {
                errors.push(format!("{name} {pin} is already in use"));
            }
        }
    }

    /// Apply environment overrides.  `lookup` is `std::env::var` in the
    /// binary and a map in tests.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = lookup("DEVICE_ID") {
            self.device_id = id;
        }
        if let Some(host) = lookup("MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            self.mqtt.port = port
                .trim()
                .parse()
                .with_context(|| format!("MQTT_PORT is not a port number: {port:?}"))?;
        }
        if let Some(port) = lookup("WEB_PORT") {
            self.web.port = port
                .trim()
                .parse()
                .with_context(|| format!("WEB_PORT is not a port number: {port:?}"))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read and parse a TOML config file.  A missing file yields the defaults.
pub fn load(path: &str) -> Result<Config> {
    if !Path::new(path).exists() {
        tracing::warn!(path, "config file not found; using defaults");
        return Ok(Config::default());
    }
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))
}

// ===========================================================================
// Tests
// ===========================================================================
