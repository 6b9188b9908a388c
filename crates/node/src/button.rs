//! Physical override button on a GPIO input.

use std::time::{Duration, Instant};

use rppal::gpio::{Gpio, InputPin, Level, Trigger};
use tokio::sync::mpsc;

use vase_core::Command;

use crate::config::ButtonSection;

/// Contact bounce shorter than this counts as one press.
const DEBOUNCE: Duration = Duration::from_millis(200);

/// Watch the configured button pin, sending a press per edge.  The returned
/// pin must stay alive for the interrupt to keep firing.
pub(crate) fn watch(
    gpio: &Gpio,
    section: &ButtonSection,
    commands: mpsc::Sender<Command>,
) -> anyhow::Result<Option<InputPin>> {
    let Some(pin_num) = section.gpio else {
        tracing::info!("no button configured");
        return Ok(None);
    };

    let (mut pin, trigger) = if section.rising_edge {
        (gpio.get(pin_num)?.into_input_pulldown(), Trigger::RisingEdge)
    } else {
        (gpio.get(pin_num)?.into_input_pullup(), Trigger::FallingEdge)
    };

    let mut last_press: Option<Instant> = None;
    pin.set_async_interrupt(trigger, move |_: Level| {
        let now = Instant::now();
        if last_press.is_some_and(|t| now.duration_since(t) < DEBOUNCE) {
            return;
        }
        last_press = Some(now);
        if commands.try_send(Command::ButtonPressed).is_err() {
            tracing::warn!("button press dropped: command queue full");
        }
    })?;

    tracing::info!(gpio = pin_num, ?trigger, "button armed");
    Ok(Some(pin))
}
