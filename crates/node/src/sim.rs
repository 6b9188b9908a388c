//! Stateful soil and ambient simulators for development machines.
//!
//! The soil model mimics a capacitive probe:
//! - Temporal coherence via random walk with mean reversion
//! - Gradual drying drift (evaporation)
//! - Per-reading ADC electronic noise
//! - Occasional spikes (sensor flakiness)
//! - Diurnal (day/night) cycle
//! - Closed-loop watering response (moisture rises while the pump runs)
//!
//! [`SimProbe`] wraps it behind [`SoilProbe`] and converts counts to a
//! moisture percentage like the real ADS1115 probe does.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use vase_core::SoilProbe;

use crate::mqtt::Outbound;
use crate::probe::{moisture_percent, ADS1115_MAX};

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Irwin-Hall approximation of N(0,1): sum of 12 uniform [0,1) minus 6.
fn approx_std_normal() -> f64 {
    (0..12).map(|_| fastrand::f64()).sum::<f64>() - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

fn diurnal_phase(period_s: f64) -> f64 {
    let now_s = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    2.0 * std::f64::consts::PI * now_s / period_s
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Simulation profiles, selected by `sim.scenario` in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scenario {
    /// Starts mid-range and drifts toward dry.  Waters every few minutes.
    Drying,
    /// Hovers near the centre.  Low noise, rare spikes.
    Stable,
    /// High noise and ~10% spikes.  Exercises the debounce cache.
    Flaky,
    /// Starts near the wet end and dries very slowly.  Should never water.
    Wet,
}

impl Scenario {
    pub(crate) fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "flaky" => Self::Flaky,
            "wet" => Self::Wet,
            _ => Self::Drying,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Flaky => write!(f, "flaky"),
            Self::Wet => write!(f, "wet"),
        }
    }
}

// ---------------------------------------------------------------------------
// Soil model
// ---------------------------------------------------------------------------

/// Soil moisture in raw ADC counts, evolving one step per sample.
pub(crate) struct SoilSim {
    /// Current "true" moisture in ADC units.
    base: f64,
    /// Permanent calibration offset of this probe against the true value.
    offset: f64,
    noise_sigma: f64,

    raw_dry: f64,
    raw_wet: f64,

    drift_per_sample: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    center: f64,

    spike_prob: f32,
    spike_sigma: f64,

    diurnal_amplitude: f64,
    diurnal_period_s: f64,

    /// Pump line as seen by the soil.
    pump: Arc<AtomicBool>,
    wet_rate: f64,
}

impl SoilSim {
    /// `raw_dry` / `raw_wet` should match the probe calibration so the
    /// percentages land where the threshold expects them.
    pub(crate) fn new(
        scenario: Scenario,
        raw_dry: f64,
        raw_wet: f64,
        diurnal_period_s: f64,
        pump: Arc<AtomicBool>,
    ) -> Self {
        let range = raw_dry - raw_wet;
        let center = (raw_dry + raw_wet) / 2.0;

        // start_frac: 0.0 = at raw_wet (wettest), 1.0 = at raw_dry (driest)
        let (drift, walk_sigma, mean_rev, noise_sigma, spike_prob, spike_sigma, start_frac) =
            match scenario {
                Scenario::Drying => (40.0, 150.0, 0.005, 80.0, 0.03_f32, 2000.0, 0.6),
                Scenario::Stable => (2.0, 60.0, 0.05, 40.0, 0.005, 1000.0, 0.5),
                Scenario::Flaky => (10.0, 250.0, 0.02, 200.0, 0.10, 3000.0, 0.5),
                Scenario::Wet => (3.0, 80.0, 0.02, 60.0, 0.02, 1500.0, 0.15),
            };

        let start_base = raw_wet + start_frac * range;
        let jitter = gaussian(0.0, range.abs() * 0.03);

        Self {
            base: start_base + jitter,
            offset: gaussian(0.0, range.abs() * 0.02),
            noise_sigma: noise_sigma * (1.0 + 0.2 * approx_std_normal()).max(0.3),
            raw_dry,
            raw_wet,
            drift_per_sample: drift * range.signum(),
            walk_sigma,
            mean_reversion: mean_rev,
            center,
            spike_prob,
            spike_sigma,
            diurnal_amplitude: range.abs() * 0.06,
            diurnal_period_s,
            pump,
            wet_rate: -600.0 * range.signum(),
        }
    }

    /// Advance the model one step and return the instantaneous reading.
    pub(crate) fn sample(&mut self) -> i32 {
        // -- Evolve the base value ----------------------------------------
        let pull = self.mean_reversion * (self.center - self.base);
        let walk = gaussian(0.0, self.walk_sigma);
        let wet = if self.pump.load(Ordering::Relaxed) {
            self.wet_rate
        } else {
            0.0
        };

        let lo = self.raw_wet.min(self.raw_dry) - 500.0;
        let hi = self.raw_wet.max(self.raw_dry) + 500.0;
        self.base = (self.base + self.drift_per_sample + pull + walk + wet).clamp(lo, hi);

        // -- Instantaneous reading ----------------------------------------
        let diurnal = self.diurnal_amplitude * diurnal_phase(self.diurnal_period_s).sin();
        let noise = gaussian(0.0, self.noise_sigma);
        let spike = if fastrand::f32() < self.spike_prob {
            gaussian(0.0, self.spike_sigma)
        } else {
            0.0
        };

        let reading = self.base + self.offset + diurnal + noise + spike;
        reading.round().clamp(0.0, f64::from(ADS1115_MAX)) as i32
    }
}

/// [`SoilSim`] seen through the probe interface.
pub(crate) struct SimProbe {
    soil: SoilSim,
    excited: bool,
    raw_dry: i64,
    raw_wet: i64,
}

impl SimProbe {
    pub(crate) fn new(soil: SoilSim, raw_dry: i64, raw_wet: i64) -> Self {
        Self {
            soil,
            excited: false,
            raw_dry,
            raw_wet,
        }
    }
}

impl SoilProbe for SimProbe {
    fn set_excitation(&mut self, on: bool) {
        self.excited = on;
    }

    fn read_level(&mut self) -> anyhow::Result<i32> {
        anyhow::ensure!(self.excited, "probe read without excitation");
        let raw = self.soil.sample();
        Ok(moisture_percent(raw, self.raw_dry, self.raw_wet))
    }
}

// ---------------------------------------------------------------------------
// Ambient model
// ---------------------------------------------------------------------------

/// Light level (0-255) and air temperature following the same diurnal cycle.
pub(crate) struct AmbientSim {
    diurnal_period_s: f64,
    temp_offset: f64,
}

impl AmbientSim {
    pub(crate) fn new(diurnal_period_s: f64) -> Self {
        Self {
            diurnal_period_s,
            temp_offset: gaussian(0.0, 1.5),
        }
    }

    /// Returns `(light, temperature_c)`.
    pub(crate) fn sample(&mut self) -> (u8, f32) {
        let day = diurnal_phase(self.diurnal_period_s).sin();
        let light = (day.max(0.0) * 230.0 + gaussian(10.0, 4.0)).clamp(0.0, 255.0);
        let temperature = 20.0 + 4.0 * day + self.temp_offset + gaussian(0.0, 0.2);
        (light.round() as u8, temperature as f32)
    }
}

/// Publish simulated ambient readings every `period` until the bridge goes.
pub(crate) async fn run_ambient(
    mut sim: AmbientSim,
    period: Duration,
    outbound: mpsc::UnboundedSender<Outbound>,
) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let (light, temperature_c) = sim.sample();
        if outbound
            .send(Outbound::Ambient {
                light,
                temperature_c,
            })
            .is_err()
        {
            tracing::debug!("bridge gone; ambient simulator stopping");
            return;
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn soil(scenario: Scenario) -> (SoilSim, Arc<AtomicBool>) {
        let pump = Arc::new(AtomicBool::new(false));
        let sim = SoilSim::new(scenario, 26000.0, 12000.0, 600.0, Arc::clone(&pump));
        (sim, pump)
    }

    fn collect_samples(sim: &mut SoilSim, n: usize) -> Vec<i32> {
        (0..n).map(|_| sim.sample()).collect()
    }

    fn mean(samples: &[i32]) -> f64 {
        samples.iter().map(|&v| f64::from(v)).sum::<f64>() / samples.len() as f64
    }

    #[test]
    fn readings_within_adc_range() {
        let (mut sim, _) = soil(Scenario::Flaky);
        for v in collect_samples(&mut sim, 500) {
            assert!((0..=32767).contains(&v), "ADC out of range: {v}");
        }
    }

    #[test]
    fn temporal_coherence() {
        let (mut sim, _) = soil(Scenario::Stable);
        let samples = collect_samples(&mut sim, 100);
        let max_jump = samples
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .max()
            .unwrap();
        // Well under the 14000 range, with room for a rare spike.
        assert!(max_jump < 5000, "max consecutive jump too large: {max_jump}");
    }

    #[test]
    fn running_pump_wets_the_soil() {
        let (mut sim, pump) = soil(Scenario::Drying);
        collect_samples(&mut sim, 20);
        let before = mean(&collect_samples(&mut sim, 20));

        pump.store(true, Ordering::Relaxed);
        collect_samples(&mut sim, 50);
        let after = mean(&collect_samples(&mut sim, 20));

        assert!(
            after < before,
            "watering should decrease readings: before={before:.0} after={after:.0}"
        );
    }

    #[test]
    fn flaky_scenario_has_more_variation() {
        fn variance(scenario: Scenario) -> f64 {
            let (mut sim, _) = soil(scenario);
            let samples = collect_samples(&mut sim, 200);
            let m = mean(&samples);
            samples
                .iter()
                .map(|&v| (f64::from(v) - m).powi(2))
                .sum::<f64>()
                / samples.len() as f64
        }

        let var_stable = variance(Scenario::Stable);
        let var_flaky = variance(Scenario::Flaky);
        assert!(
            var_flaky > var_stable,
            "flaky variance ({var_flaky:.0}) should exceed stable ({var_stable:.0})"
        );
    }

    #[test]
    fn wet_scenario_reads_above_default_threshold() {
        let pump = Arc::new(AtomicBool::new(false));
        let sim = SoilSim::new(Scenario::Wet, 26000.0, 12000.0, 600.0, pump);
        let mut probe = SimProbe::new(sim, 26000, 12000);
        probe.set_excitation(true);
        let levels: Vec<i32> = (0..10).map(|_| probe.read_level().unwrap()).collect();
        let avg = mean(&levels);
        assert!(avg > 50.0, "wet soil should read wet: avg={avg:.0}%");
    }

    #[test]
    fn probe_reports_percentage() {
        let (sim, _) = soil(Scenario::Stable);
        let mut probe = SimProbe::new(sim, 26000, 12000);
        probe.set_excitation(true);
        for _ in 0..100 {
            let level = probe.read_level().unwrap();
            assert!((0..=100).contains(&level), "level out of range: {level}");
        }
    }

    #[test]
    fn probe_read_needs_excitation() {
        let (sim, _) = soil(Scenario::Stable);
        let mut probe = SimProbe::new(sim, 26000, 12000);
        assert!(probe.read_level().is_err());
    }

    #[test]
    fn ambient_values_in_range() {
        let mut ambient = AmbientSim::new(600.0);
        for _ in 0..200 {
            let (_light, temperature) = ambient.sample();
            assert!((5.0..=35.0).contains(&temperature), "temp {temperature}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ambient_publishes_each_period() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_ambient(
            AmbientSim::new(600.0),
            Duration::from_secs(5),
            tx,
        ));

        tokio::time::sleep(Duration::from_millis(10_100)).await;
        let mut count = 0;
        while let Ok(item) = rx.try_recv() {
            assert!(matches!(item, Outbound::Ambient { .. }));
            count += 1;
        }
        // t = 0, 5, 10 s.
        assert_eq!(count, 3);

        drop(rx);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(task.is_finished());
    }

    #[test]
    fn scenario_from_str_lossy() {
        assert_eq!(Scenario::from_str_lossy("drying"), Scenario::Drying);
        assert_eq!(Scenario::from_str_lossy("STABLE"), Scenario::Stable);
        assert_eq!(Scenario::from_str_lossy("Flaky"), Scenario::Flaky);
        assert_eq!(Scenario::from_str_lossy("wet"), Scenario::Wet);
        assert_eq!(Scenario::from_str_lossy("unknown"), Scenario::Drying);
    }

    #[test]
    fn scenario_display_round_trips() {
        for s in [
            Scenario::Drying,
            Scenario::Stable,
            Scenario::Flaky,
            Scenario::Wet,
        ] {
            assert_eq!(Scenario::from_str_lossy(&s.to_string()), s);
        }
    }

    #[test]
    fn approx_std_normal_has_zero_mean() {
        let n = 5000;
        let m = (0..n).map(|_| approx_std_normal()).sum::<f64>() / f64::from(n);
        assert!(m.abs() < 0.15, "mean should be near zero: {m}");
    }
}
