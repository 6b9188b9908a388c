use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use vase_core::{Command, ControllerConfig, Telemetry, WateringCause};

use crate::mqtt::Outbound;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Last known device state, as seen through the telemetry stream.
pub struct SystemState {
    pub started_at: Instant,
    pub device_id: String,
    pub mqtt_connected: bool,
    pub moisture: Option<MoistureState>,
    pub watering: bool,
    pub remaining_activations: u32,
    pub threshold: i32,
    pub ambient: Option<AmbientState>,
    pub last_session: Option<SessionState>,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Clone, Serialize)]
pub struct MoistureState {
    pub level: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

#[derive(Clone, Serialize)]
pub struct AmbientState {
    pub light: u8,
    pub temperature_c: f32,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

#[derive(Clone, Serialize)]
pub struct SessionState {
    pub cause: WateringCause,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    pub duration_ms: Option<u64>,
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Moisture,
    Watering,
    Threshold,
    Session,
    Command,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub device_id: String,
    pub mqtt_connected: bool,
    pub moisture: Option<MoistureState>,
    pub watering: bool,
    pub remaining_activations: u32,
    pub threshold: i32,
    pub ambient: Option<AmbientState>,
    pub last_session: Option<SessionState>,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new(device_id: &str, controller: &ControllerConfig) -> Self {
        Self {
            started_at: Instant::now(),
            device_id: device_id.to_string(),
            mqtt_connected: false,
            moisture: None,
            watering: false,
            remaining_activations: controller.activation_budget,
            threshold: controller.threshold,
            ambient: None,
            last_session: None,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Fold one outbound item into the snapshot.
    pub fn record(&mut self, item: &Outbound) {
        let now = OffsetDateTime::now_utc();
        match item {
            Outbound::Controller(Telemetry::Moisture { level }) => {
                self.moisture = Some(MoistureState {
                    level: *level,
                    at: now,
                });
                self.push_event(EventKind::Moisture, format!("moisture {level}"));
            }
            Outbound::Controller(Telemetry::Watering {
                on,
                remaining_activations,
            }) => {
                self.watering = *on;
                self.remaining_activations = *remaining_activations;
                let state_str = if *on { "ON" } else { "OFF" };
                self.push_event(
                    EventKind::Watering,
                    format!("pump {state_str} ({remaining_activations} activations left)"),
                );
            }
            Outbound::Controller(Telemetry::ThresholdUpdated { threshold }) => {
                self.threshold = *threshold;
                self.push_event(EventKind::Threshold, format!("threshold set to {threshold}"));
            }
            Outbound::Controller(Telemetry::SessionStarted { cause }) => {
                self.last_session = Some(SessionState {
                    cause: *cause,
                    started_at: now,
                    ended_at: None,
                    duration_ms: None,
                });
                self.push_event(EventKind::Session, format!("session started ({cause:?})"));
            }
            Outbound::Controller(Telemetry::SessionEnded { cause, duration_ms }) => {
                match self.last_session.as_mut() {
                    Some(session) if session.ended_at.is_none() => {
                        session.ended_at = Some(now);
                        session.duration_ms = Some(*duration_ms);
                    }
                    _ => {
                        self.last_session = Some(SessionState {
                            cause: *cause,
                            started_at: now - time::Duration::milliseconds(*duration_ms as i64),
                            ended_at: Some(now),
                            duration_ms: Some(*duration_ms),
                        });
                    }
                }
                self.push_event(
                    EventKind::Session,
                    format!("session ended ({cause:?}, {duration_ms} ms)"),
                );
            }
            // Too chatty for the event log.
            Outbound::Ambient {
                light,
                temperature_c,
            } => {
                self.ambient = Some(AmbientState {
                    light: *light,
                    temperature_c: *temperature_c,
                    at: now,
                });
            }
        }
    }

    /// Record a remote write handed to the controller.
    pub fn record_command(&mut self, command: &Command) {
        self.push_event(EventKind::Command, format!("{command:?}"));
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            device_id: self.device_id.clone(),
            mqtt_connected: self.mqtt_connected,
            moisture: self.moisture.clone(),
            watering: self.watering,
            remaining_activations: self.remaining_activations,
            threshold: self.threshold,
            ambient: self.ambient.clone(),
            last_session: self.last_session.clone(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================
