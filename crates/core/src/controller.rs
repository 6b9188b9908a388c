//! The controller context: sampler, actuator, threshold, override flag and the
//! request slot, plus the loops that tie them together.
//!
//! All loops run inside one future ([`Controller::run`]) and therefore on one
//! thread.  They interleave only at `.await` points, and no `RefCell` borrow
//! is held across an `.await`, so the actuator's guards are the only thing
//! standing between two interleaved triggers and a double start.
//!
//! ```text
//!  sample loop ──refresh──▶ sampler ──(throttled)──▶ Moisture telemetry
//!  monitor loop ──should_water?──▶ RequestSlot ◀── remote water command
//!       ▲                               │
//!  button / override ── flag            ▼
//!                               watering loop ──▶ actuator (start, hold, stop)
//! ```

use std::cell::{Cell, RefCell};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::actuator::{PumpLine, WateringActuator};
use crate::config::ControllerConfig;
use crate::policy::should_water;
use crate::request::{RequestSlot, WateringCause};
use crate::sensor::{MoistureReading, MoistureSampler, SoilProbe};
use crate::telemetry::{Telemetry, TelemetrySink, Throttle};

/// Inbound commands from the trigger points and the remote attribute layer.
///
/// Remote writes carry `None` when the written payload was not a number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Physical button edge, or its remote equivalent.
    ButtonPressed,
    /// Remote watering command.  Non-zero values request a session.
    RemoteWater(Option<i64>),
    /// Remote threshold write.  Only positive values are accepted.
    WriteThreshold(Option<i64>),
    /// Reset of the pump safety budget.
    SetActivationCount(Option<i64>),
    SetSamplePeriod(Duration),
}

/// One bounded start → hold → stop cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WateringSession {
    pub started_at: Instant,
    pub duration: Duration,
    pub cause: WateringCause,
}

pub struct Controller<P: SoilProbe, L: PumpLine, S: TelemetrySink> {
    config: ControllerConfig,
    sampler: RefCell<MoistureSampler<P>>,
    actuator: RefCell<WateringActuator<L>>,
    threshold: Cell<i32>,
    override_flag: Cell<bool>,
    requests: RequestSlot,
    moisture_throttle: RefCell<Throttle>,
    period_changed: Notify,
    sink: S,
    running: Cell<bool>,
}

impl<P: SoilProbe, L: PumpLine, S: TelemetrySink> Controller<P, L, S> {
    pub fn new(config: ControllerConfig, probe: P, line: L, sink: S) -> Self {
        Self {
            sampler: RefCell::new(MoistureSampler::new(probe, config.sample_period())),
            actuator: RefCell::new(WateringActuator::new(line, config.activation_budget)),
            threshold: Cell::new(config.threshold),
            override_flag: Cell::new(false),
            requests: RequestSlot::new(),
            moisture_throttle: RefCell::new(Throttle::new(config.telemetry_interval())),
            period_changed: Notify::new(),
            sink,
            running: Cell::new(false),
            config,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    // -----------------------------------------------------------------------
    // Moisture
    // -----------------------------------------------------------------------

    /// Current moisture level, sampling first if the cached one is stale.
    pub fn moisture_level(&self) -> i32 {
        let (level, fresh) = {
            let mut sampler = self.sampler.borrow_mut();
            let fresh = sampler.refresh();
            (sampler.cached_level(), fresh)
        };
        if fresh.is_some() {
            self.publish_moisture(level);
        }
        level
    }

    pub fn latest_reading(&self) -> Option<MoistureReading> {
        self.sampler.borrow().latest()
    }

    pub fn sample_period(&self) -> Duration {
        self.sampler.borrow().period()
    }

    /// Change the sample period.  Zero is ignored.
    pub fn set_sample_period(&self, period: Duration) {
        if period.is_zero() {
            debug!("zero sample period ignored");
            return;
        }
        let fresh = self.sampler.borrow_mut().set_period(period);
        if let Some(reading) = fresh {
            self.publish_moisture(reading.level);
        }
        info!(period_ms = period.as_millis() as u64, "sample period changed");
        self.period_changed.notify_one();
    }

    fn publish_moisture(&self, level: i32) {
        if self.moisture_throttle.borrow_mut().ready(Instant::now()) {
            self.sink.publish(Telemetry::Moisture { level });
        }
    }

    // -----------------------------------------------------------------------
    // Threshold and override
    // -----------------------------------------------------------------------

    pub fn threshold(&self) -> i32 {
        self.threshold.get()
    }

    /// Apply a remote threshold write.  Anything but a positive value leaves
    /// the threshold alone and reports the last moisture level back.
    pub fn write_threshold(&self, value: Option<i64>) -> bool {
        match value
            .and_then(|v| i32::try_from(v).ok())
            .filter(|v| *v > 0)
        {
            Some(threshold) => {
                self.threshold.set(threshold);
                info!(threshold, "moisture threshold updated");
                self.sink.publish(Telemetry::ThresholdUpdated { threshold });
                true
            }
            None => {
                debug!(?value, "threshold write rejected");
                let level = self.sampler.borrow().cached_level();
                self.sink.publish(Telemetry::Moisture { level });
                false
            }
        }
    }

    /// Button edge: water on the next monitor tick regardless of moisture.
    pub fn press_button(&self) {
        self.override_flag.set(true);
        info!("watering override requested");
    }

    pub fn override_requested(&self) -> bool {
        self.override_flag.get()
    }

    // -----------------------------------------------------------------------
    // Requests and actuator
    // -----------------------------------------------------------------------

    /// Remote watering command.  Returns `true` when the value asked for
    /// watering, even if the request coalesced into a pending one.
    pub fn remote_water(&self, value: Option<i64>) -> bool {
        match value {
            Some(v) if v != 0 => {
                info!("watering requested remotely");
                self.requests.raise(WateringCause::Remote);
                true
            }
            _ => {
                debug!(?value, "remote watering write ignored");
                false
            }
        }
    }

    pub fn request_watering(&self, cause: WateringCause) -> bool {
        self.requests.raise(cause)
    }

    pub fn request_pending(&self) -> bool {
        self.requests.is_pending()
    }

    pub fn is_watering(&self) -> bool {
        self.actuator.borrow().is_watering()
    }

    pub fn enough_water(&self) -> bool {
        self.actuator.borrow().enough_water()
    }

    pub fn remaining_activations(&self) -> u32 {
        self.actuator.borrow().remaining_activations()
    }

    pub fn set_activation_count(&self, count: i64) {
        self.actuator.borrow_mut().set_activation_count(count);
        self.publish_pump_state();
    }

    fn publish_pump_state(&self) {
        let (on, remaining_activations) = {
            let actuator = self.actuator.borrow();
            (actuator.is_watering(), actuator.remaining_activations())
        };
        self.sink.publish(Telemetry::Watering {
            on,
            remaining_activations,
        });
    }

    // -----------------------------------------------------------------------
    // Loop bodies
    // -----------------------------------------------------------------------

    /// One monitor-loop evaluation.  Returns `true` when a request was raised.
    pub fn monitor_tick(&self) -> bool {
        let moisture = self.moisture_level();
        let forced = self.override_flag.get();
        let (watering, water_remaining) = {
            let actuator = self.actuator.borrow();
            (actuator.is_watering(), actuator.enough_water())
        };

        if !should_water(
            moisture,
            self.threshold.get(),
            forced,
            watering,
            water_remaining,
        ) {
            return false;
        }

        let cause = if forced {
            WateringCause::ManualOverride
        } else {
            WateringCause::Scheduled
        };
        debug!(moisture, threshold = self.threshold.get(), ?cause, "watering needed");
        self.requests.raise(cause);
        true
    }

    /// Run one watering session to completion.  Returns `None` when the pump
    /// was already running or refused to start.
    pub async fn run_session(&self, cause: WateringCause) -> Option<WateringSession> {
        if self.is_watering() {
            debug!(?cause, "pump already running; request absorbed");
            return None;
        }

        if !self.actuator.borrow_mut().start_watering() {
            warn!(?cause, "watering request refused by actuator");
            self.override_flag.set(false);
            return None;
        }
        self.publish_pump_state();

        let session = WateringSession {
            started_at: Instant::now(),
            duration: self.config.watering_duration(),
            cause,
        };
        info!(
            ?cause,
            duration_ms = session.duration.as_millis() as u64,
            "watering session started"
        );
        self.sink.publish(Telemetry::SessionStarted { cause });

        sleep(session.duration).await;

        if self.actuator.borrow_mut().stop_watering() {
            self.publish_pump_state();
        }
        self.override_flag.set(false);
        if let Some(absorbed) = self.requests.clear() {
            debug!(?absorbed, "request raised during session absorbed");
        }

        let duration_ms = session.started_at.elapsed().as_millis() as u64;
        info!(?cause, duration_ms, "watering session ended");
        self.sink
            .publish(Telemetry::SessionEnded { cause, duration_ms });

        Some(session)
    }

    pub fn handle(&self, command: Command) {
        match command {
            Command::ButtonPressed => self.press_button(),
            Command::RemoteWater(value) => {
                self.remote_water(value);
            }
            Command::WriteThreshold(value) => {
                self.write_threshold(value);
            }
            Command::SetActivationCount(Some(count)) => self.set_activation_count(count),
            Command::SetActivationCount(None) => {
                debug!("non-numeric activation count ignored");
            }
            Command::SetSamplePeriod(period) => self.set_sample_period(period),
        }
    }

    // -----------------------------------------------------------------------
    // Loops
    // -----------------------------------------------------------------------

    /// Run all controller loops until the future is dropped.
    ///
    /// Only the first call starts anything; later calls return at once, so
    /// the periodic sampler can never be registered twice.
    pub async fn run(&self, commands: mpsc::Receiver<Command>) {
        if self.running.replace(true) {
            warn!("controller already running; ignoring second start");
            return;
        }

        info!(
            threshold = self.threshold.get(),
            budget = self.remaining_activations(),
            monitor_ms = self.config.monitor_interval_ms,
            watering_ms = self.config.watering_duration_ms,
            "controller started"
        );

        tokio::join!(
            self.sample_loop(),
            self.monitor_loop(),
            self.watering_loop(),
            self.command_loop(commands),
        );
    }

    async fn sample_loop(&self) {
        loop {
            let due = self.sampler.borrow().next_due();
            if let Some(due) = due {
                tokio::select! {
                    _ = sleep_until(due) => {}
                    _ = self.period_changed.notified() => continue,
                }
            }

            let fresh = self.sampler.borrow_mut().refresh();
            if let Some(reading) = fresh {
                self.publish_moisture(reading.level);
            }
        }
    }

    async fn monitor_loop(&self) {
        let interval = self.config.monitor_interval();
        loop {
            self.monitor_tick();
            sleep(interval).await;
        }
    }

    async fn watering_loop(&self) {
        loop {
            let cause = self.requests.wait().await;
            debug!(?cause, "watering request received");
            self.run_session(cause).await;
        }
    }

    async fn command_loop(&self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            debug!(?command, "command received");
            self.handle(command);
        }
        debug!("command channel closed");
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::tests::FakeLine;
    use crate::sensor::tests::FakeProbe;

    #[derive(Default)]
    struct RecordingSink {
        events: RefCell<Vec<Telemetry>>,
    }

    impl RecordingSink {
        fn take(&self) -> Vec<Telemetry> {
            std::mem::take(&mut *self.events.borrow_mut())
        }

        fn moisture_pushes(&self) -> usize {
            self.events
                .borrow()
                .iter()
                .filter(|t| matches!(t, Telemetry::Moisture { .. }))
                .count()
        }
    }

    impl TelemetrySink for RecordingSink {
        fn publish(&self, telemetry: Telemetry) {
            self.events.borrow_mut().push(telemetry);
        }
    }

    type TestController = Controller<FakeProbe, FakeLine, RecordingSink>;

    fn controller(level: i32, budget: u32) -> (TestController, FakeProbe, FakeLine) {
        let probe = FakeProbe::with_level(level);
        let line = FakeLine::default();
        let config = ControllerConfig {
            activation_budget: budget,
            ..ControllerConfig::default()
        };
        let ctl = Controller::new(config, probe.clone(), line.clone(), RecordingSink::default());
        (ctl, probe, line)
    }

    // -- Monitor tick -----------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn tick_raises_when_dry() {
        let (ctl, _, _) = controller(15, 4);
        assert!(ctl.monitor_tick());
        assert!(ctl.request_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn tick_quiet_when_wet() {
        let (ctl, _, _) = controller(60, 4);
        assert!(!ctl.monitor_tick());
        assert!(!ctl.request_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn tick_quiet_when_budget_exhausted() {
        let (ctl, _, _) = controller(5, 0);
        ctl.press_button();
        assert!(!ctl.monitor_tick());
    }

    #[tokio::test(start_paused = true)]
    async fn button_waits_for_next_tick() {
        let (ctl, _, _) = controller(90, 4);
        ctl.press_button();
        assert!(ctl.override_requested());
        assert!(!ctl.request_pending(), "button alone must not raise");

        assert!(ctl.monitor_tick());
        assert_eq!(ctl.requests.clear(), Some(WateringCause::ManualOverride));
    }

    // -- Threshold writes -------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn valid_threshold_write_is_applied_and_announced() {
        let (ctl, _, _) = controller(50, 4);
        assert!(ctl.write_threshold(Some(35)));
        assert_eq!(ctl.threshold(), 35);
        assert_eq!(
            ctl.sink().take(),
            vec![Telemetry::ThresholdUpdated { threshold: 35 }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_threshold_writes_are_ignored() {
        let (ctl, _, _) = controller(50, 4);
        ctl.moisture_level();
        ctl.sink().take();

        for bad in [Some(-5), Some(0), Some(i64::from(i32::MAX) + 1), None] {
            assert!(!ctl.write_threshold(bad), "{bad:?} should be rejected");
        }

        assert_eq!(ctl.threshold(), 20);
        let events = ctl.sink().take();
        assert_eq!(events.len(), 4);
        assert!(events
            .iter()
            .all(|t| *t == Telemetry::Moisture { level: 50 }));
    }

    // -- Remote watering --------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn remote_nonzero_raises() {
        let (ctl, _, _) = controller(90, 4);
        assert!(ctl.remote_water(Some(1)));
        assert!(ctl.request_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn remote_zero_or_garbage_ignored() {
        let (ctl, _, _) = controller(90, 4);
        assert!(!ctl.remote_water(Some(0)));
        assert!(!ctl.remote_water(None));
        assert!(!ctl.request_pending());
    }

    // -- Sessions ---------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn session_runs_fixed_duration_and_clears_override() {
        let (ctl, _, line) = controller(90, 4);
        ctl.press_button();
        let start = Instant::now();

        let session = ctl.run_session(WateringCause::ManualOverride).await.unwrap();

        assert_eq!(Instant::now() - start, Duration::from_secs(5));
        assert_eq!(session.cause, WateringCause::ManualOverride);
        assert!(!ctl.is_watering());
        assert!(!ctl.override_requested());
        assert_eq!(ctl.remaining_activations(), 3);
        assert_eq!(*line.writes.borrow(), vec![false, true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn session_telemetry_sequence() {
        let (ctl, _, _) = controller(90, 4);
        ctl.run_session(WateringCause::Remote).await;

        assert_eq!(
            ctl.sink().take(),
            vec![
                Telemetry::Watering {
                    on: true,
                    remaining_activations: 3
                },
                Telemetry::SessionStarted {
                    cause: WateringCause::Remote
                },
                Telemetry::Watering {
                    on: false,
                    remaining_activations: 3
                },
                Telemetry::SessionEnded {
                    cause: WateringCause::Remote,
                    duration_ms: 5000
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn refused_session_spends_no_time() {
        let (ctl, _, line) = controller(5, 0);
        ctl.press_button();
        let start = Instant::now();

        assert!(ctl.run_session(WateringCause::Remote).await.is_none());

        assert_eq!(Instant::now(), start);
        assert!(!ctl.override_requested());
        assert_eq!(line.activations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pump_on_checked_during_session() {
        let (ctl, _, line) = controller(90, 4);
        let (first, second) = tokio::join!(ctl.run_session(WateringCause::Remote), async {
            sleep(Duration::from_secs(1)).await;
            ctl.run_session(WateringCause::Remote).await
        });

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(line.activations(), 1);
        assert_eq!(ctl.remaining_activations(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn requests_during_session_are_absorbed() {
        let (ctl, _, _) = controller(90, 4);
        tokio::join!(ctl.run_session(WateringCause::Remote), async {
            sleep(Duration::from_secs(1)).await;
            ctl.remote_water(Some(1));
            assert!(ctl.request_pending());
        });
        assert!(!ctl.request_pending());
    }

    // -- Sampling and telemetry -------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn moisture_telemetry_is_rate_limited() {
        let (ctl, probe, _) = controller(40, 4);
        for _ in 0..4 {
            ctl.moisture_level();
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        // Four samples over four seconds, one push.
        assert_eq!(probe.log.borrow().reads, 4);
        assert_eq!(ctl.sink().moisture_pushes(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        ctl.moisture_level();
        assert_eq!(ctl.sink().moisture_pushes(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_sample_period_ignored() {
        let (ctl, _, _) = controller(40, 4);
        ctl.set_sample_period(Duration::ZERO);
        assert_eq!(ctl.sample_period(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn set_sample_period_resamples() {
        let (ctl, probe, _) = controller(40, 4);
        ctl.moisture_level();
        ctl.set_sample_period(Duration::from_millis(250));
        assert_eq!(ctl.sample_period(), Duration::from_millis(250));
        assert_eq!(probe.log.borrow().reads, 2);
    }

    // -- Commands ---------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn handle_dispatches_commands() {
        let (ctl, _, _) = controller(90, 4);

        ctl.handle(Command::WriteThreshold(Some(30)));
        ctl.handle(Command::SetActivationCount(Some(7)));
        ctl.handle(Command::SetActivationCount(None));
        ctl.handle(Command::ButtonPressed);
        ctl.handle(Command::RemoteWater(Some(2)));

        assert_eq!(ctl.threshold(), 30);
        assert_eq!(ctl.remaining_activations(), 7);
        assert!(ctl.override_requested());
        assert!(ctl.request_pending());
    }

    // -- Loops ------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn run_is_single_shot() {
        let (ctl, _, _) = controller(90, 4);
        let (_tx, rx) = mpsc::channel(4);
        let (_tx2, rx2) = mpsc::channel(4);

        tokio::select! {
            _ = ctl.run(rx) => panic!("first run never returns"),
            _ = async {
                sleep(Duration::from_millis(10)).await;
                // Returns immediately instead of starting a second sampler.
                ctl.run(rx2).await;
            } => {}
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sample_loop_samples_once_per_period() {
        let (ctl, probe, _) = controller(90, 4);
        let (_tx, rx) = mpsc::channel(4);

        tokio::select! {
            _ = ctl.run(rx) => unreachable!(),
            _ = sleep(Duration::from_millis(10_500)) => {}
        }

        // t = 0, 1, ..., 10 s.  Monitor reads hit the cache.
        assert_eq!(probe.log.borrow().reads, 11);
    }

    #[tokio::test(start_paused = true)]
    async fn commands_flow_through_run() {
        let (ctl, _, line) = controller(90, 4);
        let (tx, rx) = mpsc::channel(4);

        tokio::select! {
            _ = ctl.run(rx) => unreachable!(),
            _ = async {
                tx.send(Command::RemoteWater(Some(1))).await.unwrap();
                sleep(Duration::from_millis(100)).await;
                assert!(ctl.is_watering());
                sleep(Duration::from_secs(5)).await;
            } => {}
        }

        assert!(!ctl.is_watering());
        assert_eq!(line.activations(), 1);
    }
}
