//! Soil probe: ADS1115 16-bit ADC over I2C plus a GPIO excitation line, and
//! the dry/wet calibration that turns raw counts into a moisture percentage.
//!
//! Reads a single-ended channel at PGA ±4.096 V, 128 SPS, single-shot mode.
//! That matches typical capacitive probes powered from 3.3 V, which read
//! `raw_dry ≈ 26000` in air and `raw_wet ≈ 12000` in water.

#[cfg(feature = "hw")]
use rppal::{
    gpio::{Gpio, OutputPin},
    i2c::I2c,
};
#[cfg(feature = "hw")]
use std::{thread, time::Duration};
#[cfg(feature = "hw")]
use vase_core::SoilProbe;

// ── ADS1115 register addresses ──────────────────────────────────────────────

/// Conversion result register (read-only, 16-bit signed).
#[cfg(feature = "hw")]
const REG_CONVERSION: u8 = 0x00;
/// Configuration register (read/write).
#[cfg(feature = "hw")]
const REG_CONFIG: u8 = 0x01;

// ── Config register bit fields ──────────────────────────────────────────────
//
// Layout (MSB first):
//   [15]    OS       write 1 to start a single-shot conversion
//   [14:12] MUX      input multiplexer (channel selection)
//   [11:9]  PGA      programmable gain amplifier
//   [8]     MODE     0 = continuous, 1 = single-shot
//   [7:5]   DR       data rate
//   [4:2]   comparator mode/polarity/latch
//   [1:0]   COMP_QUE 11 = comparator off

/// OS=1, PGA=001 (±4.096 V), MODE=1, DR=100 (128 SPS), COMP_QUE=11.
const CONFIG_BASE: u16 = 0b1_000_001_1_100_0_0_0_11;

/// MUX values for AINx vs GND.
const MUX_SHIFT: u8 = 12;
const MUX_SINGLE_ENDED: [u16; 4] = [0b100, 0b101, 0b110, 0b111];

/// Highest single-ended channel index.
pub(crate) const MAX_CHANNEL: usize = 3;

/// Largest single-ended reading (15-bit unsigned).
pub(crate) const ADS1115_MAX: i16 = i16::MAX;

/// ~7.8 ms per conversion at 128 SPS.
#[cfg(feature = "hw")]
const CONVERSION_WAIT: Duration = Duration::from_millis(9);

/// Bit 15 of the config register reads back as "conversion done".
#[cfg(feature = "hw")]
const OS_READY_BIT: u16 = 1 << 15;

/// Config register value for a single-ended read on `channel` (0-3).
#[cfg_attr(not(feature = "hw"), allow(dead_code))]
fn config_for_channel(channel: usize) -> u16 {
    CONFIG_BASE | (MUX_SINGLE_ENDED[channel] << MUX_SHIFT)
}

// ── Calibration ─────────────────────────────────────────────────────────────

/// Map a raw reading onto 0 (at `raw_dry`) … 100 (at `raw_wet`), clamped.
///
/// Capacitive probes read lower the wetter the soil is, so `raw_dry` is
/// normally the larger endpoint; either orientation works.
pub(crate) fn moisture_percent(raw: i32, raw_dry: i64, raw_wet: i64) -> i32 {
    let range = raw_dry - raw_wet;
    if range == 0 {
        return 0;
    }
    let fraction = (raw_dry - i64::from(raw)) as f64 / range as f64;
    (fraction.clamp(0.0, 1.0) * 100.0).round() as i32
}

// ── Driver ──────────────────────────────────────────────────────────────────

/// One probe on one ADS1115 channel, powered through a GPIO output.
#[cfg(feature = "hw")]
pub(crate) struct Ads1115Probe {
    i2c: I2c,
    channel: usize,
    excitation: OutputPin,
    raw_dry: i64,
    raw_wet: i64,
}

#[cfg(feature = "hw")]
impl Ads1115Probe {
    /// Open I2C bus 1 for the ADS1115 at `addr` and claim the excitation pin.
    pub(crate) fn new(
        gpio: &Gpio,
        section: &crate::config::ProbeSection,
    ) -> anyhow::Result<Self> {
        let channel = usize::from(section.channel);
        anyhow::ensure!(
            channel <= MAX_CHANNEL,
            "ADS1115 channel {channel} out of range (0-{MAX_CHANNEL})"
        );

        let mut i2c = I2c::new()?;
        i2c.set_slave_address(section.i2c_addr)?;
        let mut excitation = gpio.get(section.excitation_gpio)?.into_output();
        excitation.set_low();

        tracing::info!(
            addr = format_args!("0x{:02x}", section.i2c_addr),
            channel,
            excitation_gpio = section.excitation_gpio,
            "ads1115 probe initialised"
        );

        Ok(Self {
            i2c,
            channel,
            excitation,
            raw_dry: section.raw_dry,
            raw_wet: section.raw_wet,
        })
    }

    /// Single-shot read, returning the raw signed 16-bit conversion.
    fn read_raw(&mut self) -> anyhow::Result<i16> {
        let config = config_for_channel(self.channel);
        self.i2c.block_write(REG_CONFIG, &config.to_be_bytes())?;

        thread::sleep(CONVERSION_WAIT);

        // One wait is normally enough at 128 SPS.
        for _ in 0..3 {
            let mut buf = [0u8; 2];
            self.i2c.block_read(REG_CONFIG, &mut buf)?;
            if u16::from_be_bytes(buf) & OS_READY_BIT != 0 {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }

        let mut buf = [0u8; 2];
        self.i2c.block_read(REG_CONVERSION, &mut buf)?;
        Ok(i16::from_be_bytes(buf))
    }
}

#[cfg(feature = "hw")]
impl SoilProbe for Ads1115Probe {
    fn set_excitation(&mut self, on: bool) {
        if on {
            self.excitation.set_high();
        } else {
            self.excitation.set_low();
        }
    }

    fn read_level(&mut self) -> anyhow::Result<i32> {
        // Single-ended reads are non-negative; clamp against bus corruption.
        let raw = i32::from(self.read_raw()?).clamp(0, i32::from(ADS1115_MAX));
        let level = moisture_percent(raw, self.raw_dry, self.raw_wet);
        tracing::trace!(raw, level, "probe read");
        Ok(level)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
