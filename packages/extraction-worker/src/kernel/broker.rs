//! Broker client abstraction for production and testing.
//!
//! The worker talks to the broker through two seams:
//! - [`BrokerClient`] for outgoing requests (subscribe, publish)
//! - [`EventSource`] for incoming events (CONNACK, SUBACK, PUBLISH, failures)
//!
//! Production uses `rumqttc`'s MQTT v5 `AsyncClient` and `EventLoop`; tests use
//! [`TestBroker`] and scripted event sources.
//!
//! The `EventLoop` is the only thing that drains the `AsyncClient` request
//! channel, so [`MqttEvents`] polls it on its own task and forwards events.
//! Publishing from the task that consumes events can then never stall the
//! connection.

use std::io;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::{AsyncClient, ConnectionError, Event, EventLoop, Incoming, MqttOptions};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{BrokerError, BrokerResult, WorkerError};

pub use rumqttc::v5::mqttbytes::QoS;

/// Capacity of the request channel between client handles and the event loop.
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Incoming broker traffic, reduced to what the worker reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    /// Connection acknowledged by the broker
    ConnAck,
    /// Subscription acknowledged by the broker
    SubAck,
    /// Message delivered on a subscribed topic
    Publish { topic: String, payload: Bytes },
    /// Broker closed the session
    Disconnected,
    /// Anything else (pings, acks for our own publishes, outgoing notices)
    Other,
}

impl From<Event> for BrokerEvent {
    fn from(event: Event) -> Self {
        match event {
            Event::Incoming(Incoming::ConnAck(_)) => BrokerEvent::ConnAck,
            Event::Incoming(Incoming::SubAck(_)) => BrokerEvent::SubAck,
            Event::Incoming(Incoming::Publish(publish)) => BrokerEvent::Publish {
                topic: String::from_utf8_lossy(&publish.topic).into_owned(),
                payload: publish.payload,
            },
            Event::Incoming(Incoming::Disconnect(_)) => BrokerEvent::Disconnected,
            _ => BrokerEvent::Other,
        }
    }
}

impl From<ConnectionError> for BrokerError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::ConnectionRefused(code) => BrokerError::Refused(format!("{:?}", code)),
            ConnectionError::Io(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                BrokerError::Refused(e.to_string())
            }
            ConnectionError::RequestsDone => BrokerError::Closed,
            other => BrokerError::Transport(other.to_string()),
        }
    }
}

/// Outgoing broker operations.
///
/// This allows swapping between a real MQTT client and test mocks.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Subscribe to a topic filter.
    async fn subscribe(&self, filter: String, qos: QoS) -> BrokerResult<()>;

    /// Publish a message to a topic.
    async fn publish(&self, topic: String, qos: QoS, retain: bool, payload: Bytes)
        -> BrokerResult<()>;
}

/// Source of incoming broker events.
///
/// Polling drives the connection: the MQTT implementation connects (and
/// reconnects after a failure) inside `poll`.
#[async_trait]
pub trait EventSource: Send {
    async fn poll(&mut self) -> BrokerResult<BrokerEvent>;
}

/// Real MQTT v5 client.
#[derive(Clone)]
pub struct MqttBroker {
    client: AsyncClient,
}

#[async_trait]
impl BrokerClient for MqttBroker {
    async fn subscribe(&self, filter: String, qos: QoS) -> BrokerResult<()> {
        self.client
            .subscribe(filter, qos)
            .await
            .map_err(|e| BrokerError::Client(e.to_string()))
    }

    async fn publish(
        &self,
        topic: String,
        qos: QoS,
        retain: bool,
        payload: Bytes,
    ) -> BrokerResult<()> {
        self.client
            .publish(topic, qos, retain, payload)
            .await
            .map_err(|e| BrokerError::Client(e.to_string()))
    }
}

/// Real MQTT v5 event loop.
///
/// The loop starts on the first poll and runs on a spawned task until this
/// value is dropped. After a connection failure the task waits
/// `reconnect_delay` before polling (and so reconnecting) again.
pub struct MqttEvents {
    event_loop: Option<EventLoop>,
    reconnect_delay: Duration,
    pump: Option<EventPump>,
}

struct EventPump {
    events: mpsc::UnboundedReceiver<BrokerResult<BrokerEvent>>,
    task: JoinHandle<()>,
}

impl MqttEvents {
    fn start(&mut self) -> Option<&mut EventPump> {
        if self.pump.is_none() {
            let event_loop = self.event_loop.take()?;
            let (tx, events) = mpsc::unbounded_channel();
            let task = tokio::spawn(pump_events(event_loop, tx, self.reconnect_delay));
            self.pump = Some(EventPump { events, task });
        }
        self.pump.as_mut()
    }
}

#[async_trait]
impl EventSource for MqttEvents {
    async fn poll(&mut self) -> BrokerResult<BrokerEvent> {
        let Some(pump) = self.start() else {
            return Err(BrokerError::Closed);
        };
        pump.events.recv().await.unwrap_or(Err(BrokerError::Closed))
    }
}

impl Drop for MqttEvents {
    fn drop(&mut self) {
        if let Some(pump) = &self.pump {
            pump.task.abort();
        }
    }
}

async fn pump_events(
    mut event_loop: EventLoop,
    tx: mpsc::UnboundedSender<BrokerResult<BrokerEvent>>,
    reconnect_delay: Duration,
) {
    loop {
        let polled = match event_loop.poll().await {
            Ok(event) => match BrokerEvent::from(event) {
                BrokerEvent::Other => continue,
                event => Ok(event),
            },
            Err(e) => Err(BrokerError::from(e)),
        };

        let failed = polled.is_err();
        let closed = matches!(polled, Err(BrokerError::Closed));
        if tx.send(polled).is_err() || closed {
            break;
        }

        if failed {
            tokio::select! {
                _ = tx.closed() => break,
                _ = tokio::time::sleep(reconnect_delay) => {}
            }
        }
    }
    debug!("MQTT event loop stopped");
}

/// Client identifier for a connection.
///
/// A configured ID is used as-is for the worker itself and suffixed for
/// auxiliary connections so they don't kick each other off the broker.
pub fn client_id(config: &Config, suffix: Option<&str>) -> String {
    let base = config
        .mqtt_client_id
        .clone()
        .unwrap_or_else(|| format!("pixlieai-gliner-{}", Uuid::new_v4().simple()));
    match suffix {
        Some(suffix) => format!("{}-{}", base, suffix),
        None => base,
    }
}

/// MQTT options for a connection to the configured broker.
pub fn mqtt_options(config: &Config, suffix: Option<&str>) -> MqttOptions {
    let mut options = MqttOptions::new(
        client_id(config, suffix),
        config.mqtt_host.clone(),
        config.mqtt_port,
    );
    options.set_keep_alive(config.keep_alive);
    options.set_clean_start(true);
    options.set_max_packet_size(Some(config.max_packet_size));
    options
}

/// Create a client handle and its event loop.
///
/// Nothing touches the network until the event source is polled.
pub fn connect(config: &Config, suffix: Option<&str>) -> (MqttBroker, MqttEvents) {
    let (client, event_loop) =
        AsyncClient::new(mqtt_options(config, suffix), REQUEST_CHANNEL_CAPACITY);
    let events = MqttEvents {
        event_loop: Some(event_loop),
        reconnect_delay: config.reconnect_delay,
        pump: None,
    };
    (MqttBroker { client }, events)
}

/// Check that the configured broker accepts connections.
pub async fn check_broker(config: &Config) -> Result<(), WorkerError> {
    let (_broker, events) = connect(config, Some("check"));
    await_connack(
        events,
        config.connect_timeout,
        &config.mqtt_host,
        config.mqtt_port,
    )
    .await
}

/// Poll `events` until the first CONNACK, the first failure or `timeout`.
pub async fn await_connack<E: EventSource>(
    mut events: E,
    timeout: Duration,
    host: &str,
    port: u16,
) -> Result<(), WorkerError> {
    let unavailable = |reason: String| WorkerError::BrokerUnavailable {
        host: host.to_string(),
        port,
        reason,
    };

    let connack = async {
        loop {
            match events.poll().await {
                Ok(BrokerEvent::ConnAck) => return Ok(()),
                Ok(other) => debug!(event = ?other, "waiting for CONNACK"),
                Err(e) => return Err(e),
            }
        }
    };

    match tokio::time::timeout(timeout, connack).await {
        Ok(Ok(())) => {
            info!(host = %host, port, "Message broker is reachable");
            Ok(())
        }
        Ok(Err(e)) => Err(unavailable(e.to_string())),
        Err(_) => Err(unavailable(format!("no CONNACK within {:?}", timeout))),
    }
}

/// A message handed to [`TestBroker::publish`].
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Bytes,
}

/// Mock broker client that records operations for testing.
///
/// Tests inspect what would have been published or subscribed without a
/// running broker.
#[derive(Default)]
pub struct TestBroker {
    published: RwLock<Vec<PublishedMessage>>,
    subscriptions: RwLock<Vec<(String, QoS)>>,
    fail_publish: RwLock<bool>,
}

impl TestBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following publish fail with a client error.
    pub fn fail_publishes(&self, fail: bool) {
        *self.fail_publish.write().unwrap_or_else(|e| e.into_inner()) = fail;
    }

    /// Get all published messages.
    pub fn published_messages(&self) -> Vec<PublishedMessage> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Get published messages for a specific topic.
    pub fn messages_for_topic(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn publish_count(&self) -> usize {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Get all subscriptions in the order they were made.
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of times `filter` was subscribed to.
    pub fn subscription_count(&self, filter: &str) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(f, _)| f == filter)
            .count()
    }

    /// Deserialize a published message payload as JSON.
    pub fn deserialize_message<T: serde::de::DeserializeOwned>(
        &self,
        msg: &PublishedMessage,
    ) -> std::result::Result<T, serde_json::Error> {
        serde_json::from_slice(&msg.payload)
    }
}

#[async_trait]
impl BrokerClient for TestBroker {
    async fn subscribe(&self, filter: String, qos: QoS) -> BrokerResult<()> {
        self.subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((filter, qos));
        Ok(())
    }

    async fn publish(
        &self,
        topic: String,
        qos: QoS,
        retain: bool,
        payload: Bytes,
    ) -> BrokerResult<()> {
        if *self.fail_publish.read().unwrap_or_else(|e| e.into_inner()) {
            return Err(BrokerError::Client("publish rejected by test broker".into()));
        }
        self.published
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(PublishedMessage {
                topic,
                qos,
                retain,
                payload,
            });
        Ok(())
    }
}
