//! Watering decision-and-actuation core for a single-pot plant controller.
//!
//! The crate owns the moisture sampling engine, the pump actuator with its
//! safety budget, the watering policy, and the [`Controller`] that runs the
//! monitor and watering loops.  Hardware and the remote attribute layer are
//! reached only through the [`SoilProbe`], [`PumpLine`] and
//! [`TelemetrySink`] traits, so the same logic runs on a Raspberry Pi, in the
//! simulator, and under test.

pub mod actuator;
pub mod config;
pub mod controller;
pub mod policy;
pub mod request;
pub mod sensor;
pub mod telemetry;

pub use actuator::{PumpLine, PumpState, WateringActuator};
pub use config::ControllerConfig;
pub use controller::{Command, Controller, WateringSession};
pub use policy::should_water;
pub use request::{RequestSlot, WateringCause};
pub use sensor::{MoistureReading, MoistureSampler, SoilProbe};
pub use telemetry::{Telemetry, TelemetrySink, Throttle};
