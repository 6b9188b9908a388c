mod config;
mod mqtt;
mod probe;
mod pump;
mod state;
mod web;

#[cfg(feature = "hw")]
mod button;
#[cfg(feature = "sim")]
#[cfg_attr(feature = "hw", allow(dead_code))]
mod sim;

#[cfg(not(any(feature = "sim", feature = "hw")))]
compile_error!("enable the `sim` feature or the `hw` feature");

use anyhow::{Context, Result};
use std::{env, sync::Arc};
use tokio::sync::{mpsc, RwLock};
use tracing_subscriber::EnvFilter;

use vase_core::{Command, Controller, ControllerConfig, PumpLine, SoilProbe};

use mqtt::{ChannelSink, Outbound};
use state::SystemState;

/// Remote writes and button presses waiting for the controller.
const COMMAND_QUEUE: usize = 16;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "vase.toml".to_string());
    let mut cfg = config::load(&config_path)?;
    cfg.apply_overrides(|key| env::var(key).ok())?;
    cfg.validate()
        .with_context(|| format!("invalid config: {config_path}"))?;

    tracing::info!(device_id = %cfg.device_id, config = %config_path, "vase node starting");

    // ── Shared state (ephemeral, for the status endpoint) ───────────
    let shared = Arc::new(RwLock::new(SystemState::new(&cfg.device_id, &cfg.controller)));
    shared
        .write()
        .await
        .record_system("node started".to_string());

    let (command_tx, command_rx) = mpsc::channel::<Command>(COMMAND_QUEUE);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Outbound>();

    // ── Web server ──────────────────────────────────────────────────
    let listener = web::bind(cfg.web.port).await?;
    let web_state = Arc::clone(&shared);
    tokio::spawn(async move {
        if let Err(e) = web::serve(listener, web_state).await {
            tracing::error!("{e:#}");
        }
    });

    // ── MQTT ────────────────────────────────────────────────────────
    tokio::spawn(mqtt::run_bridge(
        cfg.device_id.clone(),
        cfg.mqtt.clone(),
        command_tx.clone(),
        outbound_rx,
        Arc::clone(&shared),
    ));

    // ── Hardware ────────────────────────────────────────────────────
    #[cfg(feature = "hw")]
    {
        let gpio = rppal::gpio::Gpio::new().context("failed to open gpio")?;
        let probe = probe::Ads1115Probe::new(&gpio, &cfg.probe)
            .context("failed to initialise soil probe")?;
        let pump = pump::GpioPump::new(&gpio, cfg.pump.gpio, cfg.pump.active_low)
            .context("failed to initialise pump relay")?;
        let _button = button::watch(&gpio, &cfg.button, command_tx)
            .context("failed to initialise button")?;

        run_controller(cfg.controller, probe, pump, outbound_tx, command_rx).await
    }

    #[cfg(all(feature = "sim", not(feature = "hw")))]
    {
        let scenario = sim::Scenario::from_str_lossy(&cfg.sim.scenario);
        tracing::info!(%scenario, "using simulated soil and mock pump");
        drop(command_tx);

        let pump = pump::MockPump::new();
        let soil = sim::SoilSim::new(
            scenario,
            cfg.probe.raw_dry as f64,
            cfg.probe.raw_wet as f64,
            cfg.sim.diurnal_period_secs,
            pump.monitor(),
        );
        let probe = sim::SimProbe::new(soil, cfg.probe.raw_dry, cfg.probe.raw_wet);

        tokio::spawn(sim::run_ambient(
            sim::AmbientSim::new(cfg.sim.diurnal_period_secs),
            std::time::Duration::from_millis(cfg.sim.ambient_interval_ms),
            outbound_tx.clone(),
        ));

        run_controller(cfg.controller, probe, pump, outbound_tx, command_rx).await
    }
}

/// Run the controller until ctrl-c.  Dropping the controller drives the pump
/// line low.
async fn run_controller<P: SoilProbe, L: PumpLine>(
    config: ControllerConfig,
    probe: P,
    line: L,
    outbound: mpsc::UnboundedSender<Outbound>,
    commands: mpsc::Receiver<Command>,
) -> Result<()> {
    let controller = Controller::new(config, probe, line, ChannelSink::new(outbound));

    tokio::select! {
        _ = controller.run(commands) => {
            tracing::warn!("controller loops exited");
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            tracing::info!("shutting down");
        }
    }

    drop(controller);
    Ok(())
}
