//! Controller tunables.  Everything here is a startup default: runtime
//! changes (threshold writes, budget resets) live in the controller and are
//! lost on restart.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Moisture percentage below which watering is warranted.
pub const DEFAULT_THRESHOLD: i32 = 20;
pub const DEFAULT_SAMPLE_PERIOD_MS: u64 = 1_000;
pub const DEFAULT_MONITOR_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_WATERING_DURATION_MS: u64 = 5_000;
/// Pump activations allowed before the actuator refuses to start.
pub const DEFAULT_ACTIVATION_BUDGET: u32 = 4;
pub const DEFAULT_TELEMETRY_INTERVAL_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub threshold: i32,
    pub sample_period_ms: u64,
    pub monitor_interval_ms: u64,
    pub watering_duration_ms: u64,
    pub activation_budget: u32,
    /// Minimum gap between two moisture telemetry pushes.  Zero disables
    /// rate limiting.
    pub telemetry_interval_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            sample_period_ms: DEFAULT_SAMPLE_PERIOD_MS,
            monitor_interval_ms: DEFAULT_MONITOR_INTERVAL_MS,
            watering_duration_ms: DEFAULT_WATERING_DURATION_MS,
            activation_budget: DEFAULT_ACTIVATION_BUDGET,
            telemetry_interval_ms: DEFAULT_TELEMETRY_INTERVAL_MS,
        }
    }
}

impl ControllerConfig {
    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn watering_duration(&self) -> Duration {
        Duration::from_millis(self.watering_duration_ms)
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry_interval_ms)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_firmware_constants() {
        let cfg = ControllerConfig::default();
        assert_eq!(cfg.threshold, 20);
        assert_eq!(cfg.sample_period(), Duration::from_secs(1));
        assert_eq!(cfg.monitor_interval(), Duration::from_secs(2));
        assert_eq!(cfg.watering_duration(), Duration::from_secs(5));
        assert_eq!(cfg.activation_budget, 4);
        assert_eq!(cfg.telemetry_interval(), Duration::from_secs(5));
    }

    #[test]
    fn empty_table_yields_defaults() {
        let cfg: ControllerConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, ControllerConfig::default());
    }

    #[test]
    fn partial_table_keeps_other_defaults() {
        let cfg: ControllerConfig = toml::from_str(
            r#"
threshold = 35
watering_duration_ms = 8000
"#,
        )
        .unwrap();
        assert_eq!(cfg.threshold, 35);
        assert_eq!(cfg.watering_duration(), Duration::from_secs(8));
        assert_eq!(cfg.sample_period_ms, DEFAULT_SAMPLE_PERIOD_MS);
        assert_eq!(cfg.activation_budget, DEFAULT_ACTIVATION_BUDGET);
    }
}
