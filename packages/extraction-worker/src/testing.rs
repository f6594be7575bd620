//! Testing utilities including mock implementations.
//!
//! These let tests drive the worker and the client without a broker or an
//! inference server.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{BrokerError, BrokerResult, ModelError};
use crate::kernel::{BrokerEvent, EntityModel, EventSource};
use crate::protocol::ExtractedEntity;

/// Record of a call made to the mock model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelCall {
    pub text: String,
    pub labels: Vec<String>,
    pub threshold: f32,
}

/// A mock NER model for testing.
///
/// Returns predefined entities by text (nothing for unknown text). Like the
/// real model it only returns entities whose label was requested and whose
/// score meets the threshold.
#[derive(Default)]
pub struct MockEntityModel {
    /// Predefined entities by text
    entities: Arc<RwLock<HashMap<String, Vec<ExtractedEntity>>>>,

    /// Fail every call with this message
    failure: Option<String>,

    /// Time each call takes before answering
    delay: Option<Duration>,

    /// Call tracking for assertions
    calls: Arc<RwLock<Vec<ModelCall>>>,
}

impl MockEntityModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add predefined entities for a text.
    pub fn with_entities(self, text: impl Into<String>, entities: Vec<ExtractedEntity>) -> Self {
        self.entities.write().unwrap().insert(text.into(), entities);
        self
    }

    /// Make every call fail.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Make every call take `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Get all calls made to this mock.
    pub fn calls(&self) -> Vec<ModelCall> {
        self.calls.read().unwrap().clone()
    }
}

#[async_trait]
impl EntityModel for MockEntityModel {
    async fn predict_entities(
        &self,
        text: &str,
        labels: &[String],
        threshold: f32,
    ) -> Result<Vec<ExtractedEntity>, ModelError> {
        self.calls.write().unwrap().push(ModelCall {
            text: text.to_string(),
            labels: labels.to_vec(),
            threshold,
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(message) = &self.failure {
            return Err(ModelError::Other(message.clone()));
        }

        Ok(self
            .entities
            .read()
            .unwrap()
            .get(text)
            .map(|entities| {
                entities
                    .iter()
                    .filter(|e| labels.contains(&e.label) && e.score >= f64::from(threshold))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Event source that replays a script, then optionally a live feed.
///
/// Once both are exhausted it reports [`BrokerError::Closed`], or never
/// returns if built with [`ScriptedEvents::pending_when_done`].
#[derive(Default)]
pub struct ScriptedEvents {
    script: VecDeque<BrokerResult<BrokerEvent>>,
    live: Option<mpsc::UnboundedReceiver<BrokerResult<BrokerEvent>>>,
    pending_when_done: bool,
}

impl ScriptedEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event to the script.
    pub fn event(mut self, event: BrokerEvent) -> Self {
        self.script.push_back(Ok(event));
        self
    }

    /// Append a poll failure to the script.
    pub fn fail(mut self, error: BrokerError) -> Self {
        self.script.push_back(Err(error));
        self
    }

    /// Block forever instead of closing once everything was replayed.
    pub fn pending_when_done(mut self) -> Self {
        self.pending_when_done = true;
        self
    }

    /// Continue with events sent through the returned feed after the script.
    pub fn live(mut self) -> (Self, EventFeed) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.live = Some(rx);
        (self, EventFeed(tx))
    }
}

#[async_trait]
impl EventSource for ScriptedEvents {
    async fn poll(&mut self) -> BrokerResult<BrokerEvent> {
        if let Some(next) = self.script.pop_front() {
            return next;
        }
        if let Some(live) = self.live.as_mut() {
            if let Some(next) = live.recv().await {
                return next;
            }
        }
        if self.pending_when_done {
            std::future::pending::<()>().await;
        }
        Err(BrokerError::Closed)
    }
}

/// Sender half of a live [`ScriptedEvents`] feed; dropping it closes the feed.
#[derive(Clone)]
pub struct EventFeed(mpsc::UnboundedSender<BrokerResult<BrokerEvent>>);

impl EventFeed {
    pub fn send(&self, event: BrokerEvent) {
        let _ = self.0.send(Ok(event));
    }

    pub fn fail(&self, error: BrokerError) {
        let _ = self.0.send(Err(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(label: &str, score: f64) -> ExtractedEntity {
        ExtractedEntity {
            text: "Paris".into(),
            label: label.into(),
            start: 0,
            end: 5,
            score,
        }
    }

    #[tokio::test]
    async fn test_mock_model_filters_by_label_and_threshold() {
        let model = MockEntityModel::new().with_entities(
            "Paris",
            vec![entity("location", 0.9), entity("person", 0.9), entity("location", 0.2)],
        );

        let found = model
            .predict_entities("Paris", &["location".to_string()], 0.5)
            .await
            .unwrap();

        assert_eq!(found, vec![entity("location", 0.9)]);
        assert_eq!(model.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_scripted_events_replay_then_close() {
        let mut events = ScriptedEvents::new()
            .event(BrokerEvent::ConnAck)
            .fail(BrokerError::Transport("reset".into()));

        assert_eq!(events.poll().await.unwrap(), BrokerEvent::ConnAck);
        assert!(matches!(events.poll().await, Err(BrokerError::Transport(_))));
        assert!(matches!(events.poll().await, Err(BrokerError::Closed)));
    }

    #[tokio::test]
    async fn test_live_feed_follows_script() {
        let (mut events, feed) = ScriptedEvents::new().event(BrokerEvent::ConnAck).live();
        feed.send(BrokerEvent::SubAck);
        drop(feed);

        assert_eq!(events.poll().await.unwrap(), BrokerEvent::ConnAck);
        assert_eq!(events.poll().await.unwrap(), BrokerEvent::SubAck);
        assert!(matches!(events.poll().await, Err(BrokerError::Closed)));
    }
}
