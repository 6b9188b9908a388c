//! MQTT attribute bridge: controller telemetry out, remote writes in.
//!
//! Everything lives under `vase/<device_id>/`.  Outbound attributes are
//! plain decimal payloads except `session`, which carries the JSON event.
//! Inbound writes arrive on `<attribute>/set`.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use vase_core::{Command, Telemetry, TelemetrySink};

use crate::config::MqttSection;
use crate::state::SharedState;

const TOPIC_ROOT: &str = "vase";
const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Outbound items
// ---------------------------------------------------------------------------

/// Everything the node publishes, in the order it was produced.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outbound {
    Controller(Telemetry),
    Ambient { light: u8, temperature_c: f32 },
}

/// Controller-side sink feeding the bridge.
#[derive(Clone)]
pub(crate) struct ChannelSink(mpsc::UnboundedSender<Outbound>);

impl ChannelSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self(tx)
    }
}

impl TelemetrySink for ChannelSink {
    fn publish(&self, telemetry: Telemetry) {
        if self.0.send(Outbound::Controller(telemetry)).is_err() {
            debug!("bridge gone; telemetry dropped");
        }
    }
}

// ---------------------------------------------------------------------------
// Topic / payload helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub(crate) struct Topics {
    root: String,
}

impl Topics {
    pub(crate) fn new(device_id: &str) -> Self {
        Self {
            root: format!("{TOPIC_ROOT}/{device_id}"),
        }
    }

    pub(crate) fn attribute(&self, name: &str) -> String {
        format!("{}/{name}", self.root)
    }

    /// Subscription filter covering every writable attribute.
    pub(crate) fn write_filter(&self) -> String {
        format!("{}/+/set", self.root)
    }

    /// Extract the attribute name from "vase/<id>/<attribute>/set".
    pub(crate) fn extract_write<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let rest = topic.strip_prefix(self.root.as_str())?.strip_prefix('/')?;
        let (name, suffix) = rest.split_once('/')?;
        (suffix == "set" && !name.is_empty()).then_some(name)
    }

    /// Map an inbound write to a controller command.  Non-numeric payloads
    /// reach the controller as `None`.
    pub(crate) fn extract_command(&self, topic: &str, payload: &[u8]) -> Option<Command> {
        let value = parse_numeric(payload).ok();
        match self.extract_write(topic)? {
            "water" => Some(Command::RemoteWater(value)),
            "threshold" => Some(Command::WriteThreshold(value)),
            "budget" => Some(Command::SetActivationCount(value)),
            "override" => matches!(value, Some(v) if v != 0).then_some(Command::ButtonPressed),
            "period" => match value {
                Some(ms) if ms > 0 => Some(Command::SetSamplePeriod(Duration::from_millis(
                    ms.unsigned_abs(),
                ))),
                _ => None,
            },
            _ => None,
        }
    }

    /// Topic/payload pairs for one outbound item.
    pub(crate) fn messages(&self, item: &Outbound) -> Vec<(String, Vec<u8>)> {
        match item {
            Outbound::Controller(telemetry) => match telemetry {
                Telemetry::Moisture { level } => {
                    vec![(self.attribute("moisture"), level.to_string().into_bytes())]
                }
                Telemetry::Watering { on, .. } => {
                    let payload = if *on { "1" } else { "0" };
                    vec![(self.attribute("watering"), payload.into())]
                }
                Telemetry::ThresholdUpdated { threshold } => {
                    vec![(self.attribute("threshold"), threshold.to_string().into_bytes())]
                }
                Telemetry::SessionStarted { .. } | Telemetry::SessionEnded { .. } => {
                    match serde_json::to_vec(telemetry) {
                        Ok(json) => vec![(self.attribute("session"), json)],
                        Err(e) => {
                            warn!("session event not serialisable: {e}");
                            Vec::new()
                        }
                    }
                }
            },
            Outbound::Ambient {
                light,
                temperature_c,
            } => vec![
                (self.attribute("light"), light.to_string().into_bytes()),
                (
                    self.attribute("temperature"),
                    format!("{temperature_c:.1}").into_bytes(),
                ),
            ],
        }
    }
}

/// Parse a decimal integer payload (trims whitespace).
pub(crate) fn parse_numeric(payload: &[u8]) -> Result<i64, String> {
    let s = String::from_utf8_lossy(payload);
    let s = s.trim();
    s.parse()
        .map_err(|_| format!("payload '{s}' is not a number"))
}

// ---------------------------------------------------------------------------
// Bridge task
// ---------------------------------------------------------------------------

/// Run the bridge until either channel closes.  Broker errors are logged and
/// retried; outbound items produced while disconnected are dropped.
pub(crate) async fn run_bridge(
    device_id: String,
    settings: MqttSection,
    commands: mpsc::Sender<Command>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    shared: SharedState,
) {
    let topics = Topics::new(&device_id);
    let mut options = MqttOptions::new(
        format!("vase-node-{device_id}"),
        settings.host.clone(),
        settings.port,
    );
    options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs));

    let (client, mut eventloop) = AsyncClient::new(options, 20);
    let mut connected = false;

    info!(
        host = %settings.host,
        port = settings.port,
        root = %topics.attribute(""),
        "mqtt bridge starting"
    );

    loop {
        tokio::select! {
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("mqtt connected");
                    connected = true;
                    // Clean sessions drop subscriptions on reconnect.
                    if let Err(e) = client.try_subscribe(topics.write_filter(), QoS::AtLeastOnce) {
                        warn!("mqtt subscribe failed: {e}");
                    }
                    let mut st = shared.write().await;
                    st.mqtt_connected = true;
                    st.record_system("mqtt connected".to_string());
                }
                Ok(Event::Incoming(Packet::Publish(p))) => {
                    match topics.extract_command(&p.topic, &p.payload) {
                        Some(command) => {
                            debug!(topic = %p.topic, ?command, "remote write");
                            shared.write().await.record_command(&command);
                            if commands.send(command).await.is_err() {
                                info!("controller gone; mqtt bridge stopping");
                                return;
                            }
                        }
                        None => debug!(topic = %p.topic, "unhandled write ignored"),
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("mqtt disconnected");
                    connected = false;
                    let mut st = shared.write().await;
                    st.mqtt_connected = false;
                    st.record_system("mqtt disconnected".to_string());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("mqtt error: {e}. reconnecting...");
                    connected = false;
                    let mut st = shared.write().await;
                    st.mqtt_connected = false;
                    st.record_error(format!("mqtt error: {e}"));
                    drop(st);

                    sleep(RECONNECT_BACKOFF).await;
                }
            },
            item = outbound.recv() => {
                let Some(item) = item else {
                    info!("telemetry channel closed; mqtt bridge stopping");
                    return;
                };
                shared.write().await.record(&item);
                if !connected {
                    debug!(?item, "not connected; dropped");
                    continue;
                }
                for (topic, payload) in topics.messages(&item) {
                    if let Err(e) = client.try_publish(topic.as_str(), QoS::AtLeastOnce, false, payload) {
                        warn!(%topic, "publish failed: {e}");
                    }
                }
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
