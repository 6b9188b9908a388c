//! Pump actuator with a bounded-use safety counter.
//!
//! The pump runs open loop (there is no flow sensor), so the number of
//! activations is capped.  Once the budget is spent every start request is a
//! no-op until [`WateringActuator::set_activation_count`] refills it.
//!
//! ```text
//! OFF ──start()  [remaining > 0]──▶ ON   (remaining -= 1, line high)
//!  ▲                                 │
//!  └────────────stop()───────────────┘   (line low)
//! ```
//!
//! Every other call is a silent no-op.

use serde::Serialize;
use tracing::{info, warn};

/// Hardware seam for the pump output.
pub trait PumpLine {
    /// Energise (`true`) or release (`false`) the pump.
    fn drive(&mut self, on: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PumpState {
    Off,
    On,
}

pub struct WateringActuator<L: PumpLine> {
    line: L,
    state: PumpState,
    remaining: u32,
    /// Budget restored by a negative reset.
    budget: u32,
}

impl<L: PumpLine> WateringActuator<L> {
    /// Fail-safe: the line is driven low before anything else happens.
    pub fn new(mut line: L, budget: u32) -> Self {
        line.drive(false);
        Self {
            line,
            state: PumpState::Off,
            remaining: budget,
            budget,
        }
    }

    /// Start the pump.  Returns `true` when the state changed.
    pub fn start_watering(&mut self) -> bool {
        if self.state == PumpState::On {
            return false;
        }
        if !self.enough_water() {
            warn!("pump start refused: safety budget exhausted");
            return false;
        }

        self.line.drive(true);
        self.state = PumpState::On;
        self.remaining -= 1;
        info!(remaining = self.remaining, "pump ON");
        true
    }

    /// Stop the pump.  Returns `true` when the state changed.
    pub fn stop_watering(&mut self) -> bool {
        if self.state == PumpState::Off {
            return false;
        }

        self.line.drive(false);
        self.state = PumpState::Off;
        info!(remaining = self.remaining, "pump OFF");
        true
    }

    pub fn state(&self) -> PumpState {
        self.state
    }

    pub fn is_watering(&self) -> bool {
        self.state == PumpState::On
    }

    pub fn enough_water(&self) -> bool {
        self.remaining > 0
    }

    pub fn remaining_activations(&self) -> u32 {
        self.remaining
    }

    /// Reset the safety counter.  A negative count restores the budget the
    /// actuator was built with instead of being rejected; this is
    /// intentional.
    pub fn set_activation_count(&mut self, count: i64) {
        self.remaining = if count < 0 {
            self.budget
        } else {
            u32::try_from(count).unwrap_or(u32::MAX)
        };
        info!(remaining = self.remaining, "activation budget reset");
    }
}

impl<L: PumpLine> Drop for WateringActuator<L> {
    fn drop(&mut self) {
        self.line.drive(false);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
