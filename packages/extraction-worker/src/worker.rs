//! Extraction worker: answers entity extraction requests arriving over MQTT.
//!
//! The `ExtractionWorker` is a long-running service that:
//! - Subscribes to `{prefix}/{name}/requests/+` on every CONNACK
//! - Parses each request payload into an [`ExtractionRequest`]
//! - Calls the NER model
//! - Publishes the entity list on `{prefix}/{name}/responses/{correlation_id}`
//!
//! # Architecture
//!
//! ```text
//! ExtractionWorker::run
//!     │
//!     ├─► EventSource::poll (connects / reconnects)
//!     ├─► handle_event
//!     │       ├─► ConnAck  → subscribe (QoS 2)
//!     │       └─► Publish  → parse → EntityModel::predict_entities → publish (QoS 2)
//!     └─► on poll failure: fatal before the first CONNACK, otherwise back off and retry
//! ```
//!
//! Events are handled one at a time; a slow inference call
//! delays the next event.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::{ConnectionEvent, ConnectionState, ConnectionTracker};
use crate::error::{BrokerError, RequestError, Result, WorkerError};
use crate::kernel::{BrokerClient, BrokerEvent, EntityModel, EventSource, QoS};
use crate::protocol::{CorrelationId, ExtractedEntity, ExtractionRequest, TopicScheme};

/// Confidence threshold used unless configured otherwise.
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Configuration for the extraction worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub topics: TopicScheme,
    pub threshold: f32,
    /// Pause after a mid-session connection failure before polling again
    pub reconnect_delay: Duration,
    /// Broker address, for error reporting
    pub host: String,
    pub port: u16,
}

impl WorkerConfig {
    pub fn new(topics: TopicScheme) -> Self {
        Self {
            topics,
            threshold: DEFAULT_THRESHOLD,
            reconnect_delay: Duration::from_secs(1),
            host: "localhost".to_string(),
            port: 1883,
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            topics: config.topics.clone(),
            threshold: config.threshold,
            reconnect_delay: config.reconnect_delay,
            host: config.mqtt_host.clone(),
            port: config.mqtt_port,
        }
    }
}

/// Counters kept over the worker's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Messages delivered on the request filter
    pub received: u64,
    /// Responses published
    pub responded: u64,
    /// Requests that produced no response
    pub dropped: u64,
}

/// A request answered by the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub correlation_id: CorrelationId,
    pub topic: String,
    pub entities: Vec<ExtractedEntity>,
}

/// Bridges the broker to the NER model.
pub struct ExtractionWorker {
    broker: Arc<dyn BrokerClient>,
    model: Arc<dyn EntityModel>,
    config: WorkerConfig,
    connection: ConnectionTracker,
    stats: WorkerStats,
}

impl ExtractionWorker {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        model: Arc<dyn EntityModel>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            broker,
            model,
            config,
            connection: ConnectionTracker::new(),
            stats: WorkerStats::default(),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    fn transition(&mut self, event: ConnectionEvent) {
        match self.connection.apply(event) {
            Ok(state) => debug!(?event, %state, "connection state changed"),
            Err(e) => warn!(error = %e, "ignoring unexpected connection event"),
        }
    }

    /// React to a single broker event.
    ///
    /// Request failures are logged and counted; only a failed subscription
    /// is returned as an error.
    pub async fn handle_event(&mut self, event: BrokerEvent) -> Result<()> {
        match event {
            BrokerEvent::ConnAck => {
                self.transition(ConnectionEvent::ConnAck);
                let filter = self.config.topics.request_filter();
                if self.connection.reconnections() > 0 {
                    info!(
                        reconnections = self.connection.reconnections(),
                        "Reconnected to message broker"
                    );
                } else {
                    info!("Connected to message broker");
                }
                // Subscribing on every CONNACK renews the subscription after a reconnect.
                self.broker
                    .subscribe(filter.clone(), QoS::ExactlyOnce)
                    .await?;
                info!(filter = %filter, "Listening for entity extraction requests");
            }
            BrokerEvent::SubAck => self.transition(ConnectionEvent::SubAck),
            BrokerEvent::Disconnected => {
                warn!("Broker closed the session");
                self.transition(ConnectionEvent::ConnectionLost);
            }
            BrokerEvent::Publish { topic, payload } => {
                self.stats.received += 1;
                match self.handle_request(&topic, &payload).await {
                    Ok(response) => {
                        self.stats.responded += 1;
                        info!(
                            correlation_id = %response.correlation_id,
                            entity_count = response.entities.len(),
                            "Extracted entities"
                        );
                    }
                    Err(e @ RequestError::Publish(_)) => {
                        self.stats.dropped += 1;
                        error!(topic = %topic, error = %e, "failed to answer extraction request");
                    }
                    Err(e) => {
                        self.stats.dropped += 1;
                        warn!(topic = %topic, error = %e, "dropping extraction request");
                    }
                }
            }
            BrokerEvent::Other => {}
        }
        Ok(())
    }

    /// Process one request message and publish its response.
    pub async fn handle_request(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> std::result::Result<Response, RequestError> {
        let correlation_id = self
            .config
            .topics
            .parse_request_topic(topic)
            .ok_or_else(|| RequestError::UnroutableTopic(topic.to_string()))?;

        let request: ExtractionRequest =
            serde_json::from_slice(payload).map_err(RequestError::MalformedPayload)?;

        let entities = if request.labels.is_empty() {
            Vec::new()
        } else {
            self.model
                .predict_entities(&request.text, &request.labels, self.config.threshold)
                .await?
        };

        let body = serde_json::to_vec(&entities).map_err(RequestError::Serialize)?;
        let response_topic = self.config.topics.response_topic(&correlation_id);

        self.broker
            .publish(
                response_topic.clone(),
                QoS::ExactlyOnce,
                false,
                Bytes::from(body),
            )
            .await
            .map_err(RequestError::Publish)?;

        Ok(Response {
            correlation_id,
            topic: response_topic,
            entities,
        })
    }

    /// Run until `shutdown` is cancelled or the event source closes.
    ///
    /// Returns [`WorkerError::BrokerUnavailable`] if the broker cannot be
    /// reached before the first CONNACK. Later failures are recovered by
    /// polling again after `reconnect_delay`.
    pub async fn run<E: EventSource>(
        mut self,
        mut events: E,
        shutdown: CancellationToken,
    ) -> Result<WorkerStats> {
        info!(
            host = %self.config.host,
            port = self.config.port,
            "Connecting to message broker"
        );

        loop {
            if self.connection.state() == ConnectionState::Disconnected {
                self.transition(ConnectionEvent::ConnectStarted);
            }

            let polled = tokio::select! {
                _ = shutdown.cancelled() => None,
                polled = events.poll() => Some(polled),
            };

            match polled {
                None => {
                    info!("Shutdown requested");
                    break;
                }
                Some(Ok(event)) => {
                    let handled = tokio::select! {
                        _ = shutdown.cancelled() => None,
                        handled = self.handle_event(event) => Some(handled),
                    };
                    match handled {
                        Some(handled) => handled?,
                        None => {
                            info!("Shutdown requested while handling an event");
                            break;
                        }
                    }
                }
                Some(Err(BrokerError::Closed)) => {
                    info!("Broker event loop closed");
                    break;
                }
                Some(Err(e)) if !self.connection.has_connected() => {
                    error!(
                        host = %self.config.host,
                        port = self.config.port,
                        error = %e,
                        "Connection to message broker failed, is it running?"
                    );
                    return Err(WorkerError::BrokerUnavailable {
                        host: self.config.host.clone(),
                        port: self.config.port,
                        reason: e.to_string(),
                    });
                }
                Some(Err(e)) => {
                    warn!(
                        error = %e,
                        delay_ms = self.config.reconnect_delay.as_millis(),
                        "Lost connection to message broker, reconnecting"
                    );
                    self.transition(ConnectionEvent::ConnectionLost);
                    tokio::select! {
                        _ = shutdown.cancelled() => {}
                        _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                    }
                }
            }
        }

        let stats = self.stats;
        info!(
            received = stats.received,
            responded = stats.responded,
            dropped = stats.dropped,
            "Extraction worker stopped"
        );
        Ok(stats)
    }
}
