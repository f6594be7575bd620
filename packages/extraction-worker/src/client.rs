//! Requester side of the correlation protocol.
//!
//! An [`ExtractionClient`] publishes a request under a fresh correlation ID and
//! waits for the matching message on the response topic. Responses for all
//! in-flight requests arrive through one wildcard subscription and are routed
//! to their waiters by the [`ResponseRouter`].
//!
//! ```ignore
//! let (broker, events) = kernel::broker::connect(&config, Some("requester"));
//! let broker: Arc<dyn BrokerClient> = Arc::new(broker);
//! let router = Arc::new(ResponseRouter::new(config.topics.clone()));
//! let (ready_tx, ready_rx) = watch::channel(false);
//!
//! tokio::spawn(drive_client(
//!     events,
//!     broker.clone(),
//!     router.clone(),
//!     ready_tx,
//!     config.reconnect_delay,
//!     shutdown,
//! ));
//!
//! let client = ExtractionClient::new(broker, router, ready_rx, config.response_timeout);
//! let entities = client.extract(&ExtractionRequest::new("Paris is nice", ["location"])).await?;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{BrokerError, BrokerResult, ClientError};
use crate::kernel::{BrokerClient, BrokerEvent, EventSource, QoS};
use crate::protocol::{CorrelationId, ExtractedEntity, ExtractionRequest, TopicScheme};

/// Routes response messages to the requests waiting for them.
pub struct ResponseRouter {
    topics: TopicScheme,
    pending: Mutex<HashMap<CorrelationId, oneshot::Sender<Bytes>>>,
}

impl ResponseRouter {
    pub fn new(topics: TopicScheme) -> Self {
        Self {
            topics,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn topics(&self) -> &TopicScheme {
        &self.topics
    }

    /// Start waiting for the response to `id`.
    pub fn register(&self, id: CorrelationId) -> oneshot::Receiver<Bytes> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);
        rx
    }

    /// Stop waiting for `id`.
    pub fn forget(&self, id: &CorrelationId) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }

    /// Number of requests still waiting.
    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Hand a response message to its waiter; false if nobody is waiting.
    pub fn deliver(&self, topic: &str, payload: Bytes) -> bool {
        let Some(id) = self.topics.parse_response_topic(topic) else {
            debug!(topic = %topic, "ignoring message outside the response topics");
            return false;
        };

        let waiter = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);

        match waiter {
            Some(tx) => tx.send(payload).is_ok(),
            None => {
                debug!(correlation_id = %id, "ignoring response without a pending request");
                false
            }
        }
    }
}

/// Poll the requester's event source until shutdown or close.
///
/// Subscribes to the response filter on every CONNACK, flips `ready` once the
/// subscription is acknowledged and routes incoming messages into `router`.
/// After a mid-session failure it waits `reconnect_delay` before polling again.
pub async fn drive_client<E: EventSource>(
    mut events: E,
    broker: Arc<dyn BrokerClient>,
    router: Arc<ResponseRouter>,
    ready: watch::Sender<bool>,
    reconnect_delay: Duration,
    shutdown: CancellationToken,
) -> BrokerResult<()> {
    let filter = router.topics().response_filter();
    let mut connected = false;

    loop {
        let polled = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            polled = events.poll() => polled,
        };

        match polled {
            Ok(BrokerEvent::ConnAck) => {
                connected = true;
                broker.subscribe(filter.clone(), QoS::ExactlyOnce).await?;
            }
            Ok(BrokerEvent::SubAck) => {
                info!(filter = %filter, "Listening for extraction responses");
                ready.send_replace(true);
            }
            Ok(BrokerEvent::Publish { topic, payload }) => {
                router.deliver(&topic, payload);
            }
            Ok(BrokerEvent::Disconnected) => {
                ready.send_replace(false);
            }
            Ok(BrokerEvent::Other) => {}
            Err(BrokerError::Closed) => return Ok(()),
            Err(e) if !connected => return Err(e),
            Err(e) => {
                warn!(
                    error = %e,
                    delay_ms = reconnect_delay.as_millis(),
                    "Lost connection to message broker, reconnecting"
                );
                ready.send_replace(false);
                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(reconnect_delay) => {}
                }
            }
        }
    }
}

/// Sends extraction requests and awaits their responses.
#[derive(Clone)]
pub struct ExtractionClient {
    broker: Arc<dyn BrokerClient>,
    router: Arc<ResponseRouter>,
    ready: watch::Receiver<bool>,
    timeout: Duration,
}

impl ExtractionClient {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        router: Arc<ResponseRouter>,
        ready: watch::Receiver<bool>,
        timeout: Duration,
    ) -> Self {
        Self {
            broker,
            router,
            ready,
            timeout,
        }
    }

    /// Extract entities through whichever worker serves the topic.
    ///
    /// The timeout covers waiting for the response subscription as well as
    /// the round trip itself.
    pub async fn extract(
        &self,
        request: &ExtractionRequest,
    ) -> Result<Vec<ExtractedEntity>, ClientError> {
        match tokio::time::timeout(self.timeout, self.round_trip(request)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(self.timeout)),
        }
    }

    async fn round_trip(
        &self,
        request: &ExtractionRequest,
    ) -> Result<Vec<ExtractedEntity>, ClientError> {
        let mut ready = self.ready.clone();
        ready
            .wait_for(|ready| *ready)
            .await
            .map_err(|_| ClientError::Closed)?;

        let body = serde_json::to_vec(request).map_err(ClientError::Serialize)?;
        let id = CorrelationId::generate();
        let topic = self.router.topics().request_topic(&id);

        // Registered before publishing so a fast response is not missed;
        // the guard removes the entry on every early exit, including timeout.
        let rx = self.router.register(id.clone());
        let guard = PendingGuard {
            router: &self.router,
            id: &id,
        };

        self.broker
            .publish(topic, QoS::ExactlyOnce, false, Bytes::from(body))
            .await?;
        debug!(correlation_id = %id, "Published extraction request");

        let payload = rx.await.map_err(|_| ClientError::Closed)?;
        drop(guard);

        serde_json::from_slice(&payload).map_err(ClientError::MalformedResponse)
    }
}

struct PendingGuard<'a> {
    router: &'a ResponseRouter,
    id: &'a CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.router.forget(self.id);
    }
}
