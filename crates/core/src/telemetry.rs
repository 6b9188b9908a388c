//! Outbound telemetry contract between the controller and whatever exposes
//! it remotely.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::request::WateringCause;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Telemetry {
    /// Latest moisture level.  Rate limited by the controller.
    Moisture { level: i32 },
    /// Pushed on every pump transition.
    Watering {
        on: bool,
        remaining_activations: u32,
    },
    /// A threshold write was accepted.
    ThresholdUpdated { threshold: i32 },
    SessionStarted { cause: WateringCause },
    SessionEnded {
        cause: WateringCause,
        duration_ms: u64,
    },
}

/// Receiver of controller telemetry.  Must not block: the controller calls it
/// from inside its cooperative loops.
pub trait TelemetrySink {
    fn publish(&self, telemetry: Telemetry);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn publish(&self, _: Telemetry) {}
}

impl TelemetrySink for tokio::sync::mpsc::UnboundedSender<Telemetry> {
    fn publish(&self, telemetry: Telemetry) {
        if self.send(telemetry).is_err() {
            tracing::debug!("telemetry receiver gone; dropping");
        }
    }
}

/// Minimum-interval gate for a telemetry stream.
#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    /// Returns `true` and records `now` when enough time has passed since the
    /// last accepted emission.
    pub fn ready(&mut self, now: Instant) -> bool {
        let open = self
            .last
            .map_or(true, |last| now.duration_since(last) >= self.min_interval);
        if open {
            self.last = Some(now);
        }
        open
    }
}

// ===========================================================================
// Tests
// ===========================================================================
