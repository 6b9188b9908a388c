//! Pump line drivers.  The `hw` feature gates the real rppal relay output;
//! the mock line only tracks and logs its state, and the simulator reads it
//! back to model watering.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use vase_core::PumpLine;

#[cfg(feature = "hw")]
use rppal::gpio::{Gpio, OutputPin};

// ---------------------------------------------------------------------------
// Real GPIO pump relay (requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "hw")]
pub(crate) struct GpioPump {
    pin: OutputPin,
    active_low: bool, // many relay boards are active-low
}

#[cfg(feature = "hw")]
impl GpioPump {
    pub(crate) fn new(gpio: &Gpio, pin_num: u8, active_low: bool) -> anyhow::Result<Self> {
        let pin = gpio.get(pin_num)?.into_output();
        let mut pump = Self { pin, active_low };
        // Relay released before the controller takes over.
        pump.drive(false);
        tracing::info!(gpio = pin_num, active_low, "pump relay initialised");
        Ok(pump)
    }
}

#[cfg(feature = "hw")]
impl PumpLine for GpioPump {
    fn drive(&mut self, on: bool) {
        // active-low relay: LOW = ON, HIGH = OFF
        if on != self.active_low {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
    }
}

// ---------------------------------------------------------------------------
// Mock pump (development, no hardware)
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
#[cfg_attr(feature = "hw", allow(dead_code))]
pub(crate) struct MockPump {
    energised: Arc<AtomicBool>,
}

#[cfg_attr(feature = "hw", allow(dead_code))]
impl MockPump {
    pub(crate) fn new() -> Self {
        tracing::info!("[mock-gpio] pump line initialised (no hardware)");
        Self::default()
    }

    /// Shared view of the line, for the soil simulator.
    pub(crate) fn monitor(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.energised)
    }
}

impl PumpLine for MockPump {
    fn drive(&mut self, on: bool) {
        let was = self.energised.swap(on, Ordering::Relaxed);
        if was != on {
            tracing::info!("[mock-gpio] pump set {}", if on { "ON" } else { "OFF" });
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_pump_starts_off() {
        let pump = MockPump::new();
        assert!(!pump.monitor().load(Ordering::Relaxed));
    }

    #[test]
    fn monitor_tracks_drive() {
        let mut pump = MockPump::new();
        let monitor = pump.monitor();
        pump.drive(true);
        assert!(monitor.load(Ordering::Relaxed));
        pump.drive(false);
        assert!(!monitor.load(Ordering::Relaxed));
    }

    #[test]
    fn actuator_over_mock_pump_releases_on_drop() {
        let pump = MockPump::new();
        let monitor = pump.monitor();
        let mut actuator = vase_core::WateringActuator::new(pump, 2);
        actuator.start_watering();
        assert!(monitor.load(Ordering::Relaxed));
        drop(actuator);
        assert!(!monitor.load(Ordering::Relaxed));
    }
}
