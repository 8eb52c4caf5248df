//! ==============================================================================
//! live.rs - broker listener and live fan-out
//! ==============================================================================
//!
//! purpose:
//!     subscribes to the sensor attribute topics and re-broadcasts every
//!     decoded payload to whoever is connected to /ws right now.
//!     nothing is kept: a viewer that connects late only sees what arrives
//!     after it connected, and this path never touches the history series.
//!
//! relationships:
//!     - used by: main.rs (spawns the listener), server.rs (websocket subscribers)
//!     - uses: rumqttc (broker connection), tokio broadcast (fan-out)
//!
//! wire format (one json text frame per message):
//!
//!     { "event": "novo_dado_luminosidade", "topic": "/TEF/hosp200/attrs/l", "valor": 312 }
//!
//! ==============================================================================

use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use serde_json::value::RawValue;
use tokio::sync::broadcast;

use crate::config::MqttConfig;

/// slots per subscriber before a slow viewer starts skipping events
const CHANNEL_CAPACITY: usize = 64;
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// which reading a topic carries, from its last path segment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Measurement {
    Luminosity,
    Temperature,
    Humidity,
    Other,
}

impl Measurement {
    pub fn from_topic(topic: &str) -> Self {
        match topic.rsplit('/').next() {
            Some("l") => Self::Luminosity,
            Some("t") => Self::Temperature,
            Some("h") => Self::Humidity,
            _ => Self::Other,
        }
    }

    /// event name the live page listens for
    pub fn event_name(self) -> &'static str {
        match self {
            Self::Luminosity => "novo_dado_luminosidade",
            Self::Temperature => "novo_dado_temperatura",
            Self::Humidity => "novo_dado_umidade",
            Self::Other => "novo_dado",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct LiveEvent {
    pub event: &'static str,
    pub topic: String,
    /// payload text as received, only checked to be json
    pub valor: Box<RawValue>,
}

/// decode one broker message; the payload is forwarded verbatim
pub fn decode(topic: &str, payload: &[u8]) -> Result<LiveEvent, serde_json::Error> {
    let valor: Box<RawValue> = serde_json::from_slice(payload)?;
    Ok(LiveEvent {
        event: Measurement::from_topic(topic).event_name(),
        topic: topic.to_string(),
        valor,
    })
}

// ==============================================================================
// fan-out
// ==============================================================================

#[derive(Clone)]
pub struct LiveFeed {
    tx: broadcast::Sender<LiveEvent>,
}

impl Default for LiveFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.tx.subscribe()
    }

    /// hand one raw message to every current viewer; bad json is dropped
    pub fn publish(&self, topic: &str, payload: &[u8]) -> Option<LiveEvent> {
        match decode(topic, payload) {
            Ok(event) => {
                tracing::info!("[LIVE] {} <- {}", event.event, event.valor);
                // no viewers is fine, there is nothing to keep
                let viewers = self.tx.send(event.clone()).unwrap_or(0);
                tracing::debug!(viewers, "[LIVE] broadcast");
                Some(event)
            }
            Err(e) => {
                tracing::warn!("[LIVE] ⚠ Failed to decode JSON on {}: {}", topic, e);
                None
            }
        }
    }
}

// ==============================================================================
// broker listener
// ==============================================================================

pub struct MqttListener {
    config: MqttConfig,
    feed: LiveFeed,
}

impl MqttListener {
    pub fn new(config: MqttConfig, feed: LiveFeed) -> Self {
        Self { config, feed }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.config.client_id.clone(),
            self.config.broker.clone(),
            self.config.port,
        );
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_seconds));
        options
    }

    /// drive the broker connection forever, resubscribing after every connect
    pub async fn run(self) {
        let (client, mut eventloop) = AsyncClient::new(self.options(), 10);
        tracing::info!(
            "[LIVE] Connecting to mqtt://{}:{}",
            self.config.broker,
            self.config.port
        );

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    tracing::info!("[LIVE] ✓ Connected ({:?})", ack.code);
                    for topic in &self.config.topics {
                        // try_ variant: the request queue is drained by this same loop
                        if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                            tracing::warn!("[LIVE] ⚠ Subscribe to {} failed: {}", topic, e);
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.feed.publish(&publish.topic, &publish.payload);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("[LIVE] ⚠ Broker connection error: {}", e);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }
}
