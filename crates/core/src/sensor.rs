//! Moisture sampling engine.
//!
//! A resistive probe corrodes and drifts if current flows through it all the
//! time, so every sample is bracketed: excitation on, read, excitation off.
//! Samples are debounced by the sample period; callers that ask for the level
//! more often get the cached value without touching the probe.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

/// Hardware seam for the soil probe.
pub trait SoilProbe {
    /// Drive the excitation line feeding the sensing element.
    fn set_excitation(&mut self, on: bool);

    /// Read the sense line.  Only called while excitation is on.
    fn read_level(&mut self) -> anyhow::Result<i32>;
}

/// Last accepted moisture sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoistureReading {
    pub level: i32,
    pub taken_at: Instant,
}

pub struct MoistureSampler<P> {
    probe: P,
    period: Duration,
    latest: Option<MoistureReading>,
    /// When the next refresh is allowed.  `None` until the first attempt.
    next_due: Option<Instant>,
}

impl<P: SoilProbe> MoistureSampler<P> {
    pub fn new(mut probe: P, period: Duration) -> Self {
        // Start from a known line state; the probe may come up energised.
        probe.set_excitation(false);
        Self {
            probe,
            period,
            latest: None,
            next_due: None,
        }
    }

    /// Current level, refreshing first when the cached sample is stale.
    /// Before the first successful sample this is 0.
    pub fn level(&mut self) -> i32 {
        self.refresh();
        self.cached_level()
    }

    pub fn cached_level(&self) -> i32 {
        self.latest.map(|r| r.level).unwrap_or(0)
    }

    pub fn latest(&self) -> Option<MoistureReading> {
        self.latest
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Earliest instant at which [`refresh`](Self::refresh) will touch the
    /// probe again.
    pub fn next_due(&self) -> Option<Instant> {
        self.next_due
    }

    pub fn is_sample_needed(&self) -> bool {
        self.next_due.map_or(true, |due| Instant::now() >= due)
    }

    /// Sample if the period has elapsed.  Returns the new reading when one
    /// was taken.
    pub fn refresh(&mut self) -> Option<MoistureReading> {
        if self.is_sample_needed() {
            self.sample()
        } else {
            None
        }
    }

    /// Sample unconditionally.
    pub fn force_refresh(&mut self) -> Option<MoistureReading> {
        self.sample()
    }

    /// Change the sample period.  Takes a fresh sample so the new period is
    /// measured from a known baseline.
    pub fn set_period(&mut self, period: Duration) -> Option<MoistureReading> {
        self.period = period;
        self.sample()
    }

    fn sample(&mut self) -> Option<MoistureReading> {
        self.probe.set_excitation(true);
        let result = self.probe.read_level();
        self.probe.set_excitation(false);

        let now = Instant::now();
        self.next_due = Some(now + self.period);

        match result {
            Ok(level) => {
                let reading = MoistureReading {
                    level,
                    taken_at: now,
                };
                debug!(level, "moisture sampled");
                self.latest = Some(reading);
                Some(reading)
            }
            Err(e) => {
                warn!(
                    previous = self.cached_level(),
                    "moisture probe read failed, keeping previous level: {e:#}"
                );
                None
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
