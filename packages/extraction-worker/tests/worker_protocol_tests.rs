//! Request/response protocol tests driving the worker's run loop.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use extraction_worker::error::BrokerResult;
use extraction_worker::kernel::{BrokerClient, BrokerEvent, QoS, TestBroker};
use extraction_worker::testing::{EventFeed, MockEntityModel, ScriptedEvents};
use extraction_worker::{
    drive_client, BrokerError, ExtractedEntity, ExtractionClient, ExtractionRequest,
    ExtractionWorker, ResponseRouter, TopicScheme, WorkerConfig, WorkerError,
};
use tokio::sync::watch;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

const REQUEST_FILTER: &str = "pixlieai/extract_entities_gliner/requests/+";

fn topics() -> TopicScheme {
    TopicScheme::new("pixlieai", "extract_entities_gliner").unwrap()
}

fn worker_config() -> WorkerConfig {
    WorkerConfig {
        reconnect_delay: Duration::from_millis(1),
        ..WorkerConfig::new(topics())
    }
}

fn paris_model() -> MockEntityModel {
    MockEntityModel::new().with_entities(
        "Paris is nice",
        vec![
            ExtractedEntity {
                text: "Paris".into(),
                label: "location".into(),
                start: 0,
                end: 5,
                score: 0.96,
            },
            ExtractedEntity {
                text: "Paris".into(),
                label: "person".into(),
                start: 0,
                end: 5,
                score: 0.61,
            },
        ],
    )
}

fn request(id: &str, payload: &'static str) -> BrokerEvent {
    BrokerEvent::Publish {
        topic: format!("pixlieai/extract_entities_gliner/requests/{}", id),
        payload: Bytes::from_static(payload.as_bytes()),
    }
}

#[tokio::test]
async fn test_request_round_trip_through_run_loop() {
    let broker = Arc::new(TestBroker::new());
    let worker = ExtractionWorker::new(broker.clone(), Arc::new(paris_model()), worker_config());
    let events = ScriptedEvents::new()
        .event(BrokerEvent::ConnAck)
        .event(BrokerEvent::SubAck)
        .event(request(
            "42",
            r#"{"text": "Paris is nice", "labels": ["location"]}"#,
        ));

    let stats = assert_ok!(worker.run(events, CancellationToken::new()).await);

    assert_eq!(stats.responded, 1);
    let responses = broker.messages_for_topic("pixlieai/extract_entities_gliner/responses/42");
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].qos, QoS::ExactlyOnce);
    assert!(!responses[0].retain);

    let entities: Vec<ExtractedEntity> = broker.deserialize_message(&responses[0]).unwrap();
    assert!(!entities.is_empty());
    for entity in &entities {
        assert_eq!(entity.label, "location");
        assert!((0.0..=1.0).contains(&entity.score));
    }
}

#[tokio::test]
async fn test_empty_labels_yield_empty_list() {
    let broker = Arc::new(TestBroker::new());
    let worker = ExtractionWorker::new(broker.clone(), Arc::new(paris_model()), worker_config());
    let events = ScriptedEvents::new()
        .event(BrokerEvent::ConnAck)
        .event(request("e", r#"{"text": "Paris is nice", "labels": []}"#));

    worker.run(events, CancellationToken::new()).await.unwrap();

    let responses = broker.messages_for_topic("pixlieai/extract_entities_gliner/responses/e");
    let entities: Vec<ExtractedEntity> = broker.deserialize_message(&responses[0]).unwrap();
    assert!(entities.is_empty());
}

#[tokio::test]
async fn test_malformed_request_is_dropped_and_worker_continues() {
    let broker = Arc::new(TestBroker::new());
    let worker = ExtractionWorker::new(broker.clone(), Arc::new(paris_model()), worker_config());
    let events = ScriptedEvents::new()
        .event(BrokerEvent::ConnAck)
        .event(request("bad", "{\"text\": \"Paris is nice\""))
        .event(request("missing", r#"{"text": "Paris is nice"}"#))
        .event(request(
            "good",
            r#"{"text": "Paris is nice", "labels": ["location"]}"#,
        ));

    let stats = worker.run(events, CancellationToken::new()).await.unwrap();

    assert_eq!(stats.received, 3);
    assert_eq!(stats.dropped, 2);
    assert_eq!(stats.responded, 1);
    assert_eq!(broker.publish_count(), 1);
    assert!(broker
        .messages_for_topic("pixlieai/extract_entities_gliner/responses/bad")
        .is_empty());
    assert_eq!(
        broker
            .messages_for_topic("pixlieai/extract_entities_gliner/responses/good")
            .len(),
        1
    );
}

#[tokio::test]
async fn test_reconnect_resubscribes() {
    let broker = Arc::new(TestBroker::new());
    let worker = ExtractionWorker::new(broker.clone(), Arc::new(paris_model()), worker_config());
    let events = ScriptedEvents::new()
        .event(BrokerEvent::ConnAck)
        .event(BrokerEvent::SubAck)
        .fail(BrokerError::Transport("connection reset".into()))
        .fail(BrokerError::Refused("broker restarting".into()))
        .event(BrokerEvent::ConnAck)
        .event(BrokerEvent::SubAck)
        .event(request(
            "after",
            r#"{"text": "Paris is nice", "labels": ["location"]}"#,
        ));

    let stats = worker.run(events, CancellationToken::new()).await.unwrap();

    assert_eq!(broker.subscription_count(REQUEST_FILTER), 2);
    assert!(broker
        .subscriptions()
        .iter()
        .all(|(_, qos)| *qos == QoS::ExactlyOnce));
    assert_eq!(stats.responded, 1);
}

#[tokio::test]
async fn test_broker_session_close_resubscribes() {
    let broker = Arc::new(TestBroker::new());
    let worker = ExtractionWorker::new(broker.clone(), Arc::new(paris_model()), worker_config());
    let events = ScriptedEvents::new()
        .event(BrokerEvent::ConnAck)
        .event(BrokerEvent::Disconnected)
        .event(BrokerEvent::ConnAck);

    worker.run(events, CancellationToken::new()).await.unwrap();

    assert_eq!(broker.subscription_count(REQUEST_FILTER), 2);
}

#[tokio::test]
async fn test_unreachable_broker_at_startup_is_fatal() {
    let broker = Arc::new(TestBroker::new());
    let worker = ExtractionWorker::new(broker.clone(), Arc::new(paris_model()), worker_config());
    let events = ScriptedEvents::new()
        .fail(BrokerError::Refused("Connection refused (os error 111)".into()))
        .event(BrokerEvent::ConnAck);

    let err = assert_err!(worker.run(events, CancellationToken::new()).await);

    assert!(matches!(err, WorkerError::BrokerUnavailable { .. }));
    assert_eq!(broker.subscription_count(REQUEST_FILTER), 0);
}

// =============================================================================
// Loopback broker: routes publishes to every matching subscriber's feed
// =============================================================================

#[derive(Default)]
struct Hub {
    subscriptions: Mutex<Vec<(String, EventFeed)>>,
}

struct LoopbackClient {
    hub: Arc<Hub>,
    feed: EventFeed,
}

fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter = filter.split('/');
    let mut topic = topic.split('/');
    loop {
        match (filter.next(), topic.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[async_trait]
impl BrokerClient for LoopbackClient {
    async fn subscribe(&self, filter: String, _qos: QoS) -> BrokerResult<()> {
        self.hub
            .subscriptions
            .lock()
            .unwrap()
            .push((filter, self.feed.clone()));
        self.feed.send(BrokerEvent::SubAck);
        Ok(())
    }

    async fn publish(
        &self,
        topic: String,
        _qos: QoS,
        _retain: bool,
        payload: Bytes,
    ) -> BrokerResult<()> {
        for (filter, feed) in self.hub.subscriptions.lock().unwrap().iter() {
            if topic_matches(filter, &topic) {
                feed.send(BrokerEvent::Publish {
                    topic: topic.clone(),
                    payload: payload.clone(),
                });
            }
        }
        Ok(())
    }
}

fn loopback_client(hub: &Arc<Hub>) -> (LoopbackClient, ScriptedEvents) {
    let (events, feed) = ScriptedEvents::new().event(BrokerEvent::ConnAck).live();
    let client = LoopbackClient {
        hub: hub.clone(),
        feed,
    };
    (client, events)
}

#[test]
fn test_topic_matching_helper() {
    assert!(topic_matches(REQUEST_FILTER, "pixlieai/extract_entities_gliner/requests/1"));
    assert!(!topic_matches(REQUEST_FILTER, "pixlieai/extract_entities_gliner/responses/1"));
    assert!(topic_matches("pixlieai/#", "pixlieai/a/b"));
}

#[tokio::test]
async fn test_client_and_worker_correlate_over_loopback() {
    let hub = Arc::new(Hub::default());
    let shutdown = CancellationToken::new();

    let (worker_broker, worker_events) = loopback_client(&hub);
    let worker = ExtractionWorker::new(
        Arc::new(worker_broker),
        Arc::new(paris_model()),
        worker_config(),
    );
    let worker_task = tokio::spawn(worker.run(worker_events, shutdown.clone()));

    // Requests published before the worker subscribed would be lost.
    while hub.subscriptions.lock().unwrap().is_empty() {
        tokio::task::yield_now().await;
    }

    let (client_broker, client_events) = loopback_client(&hub);
    let client_broker: Arc<dyn BrokerClient> = Arc::new(client_broker);
    let router = Arc::new(ResponseRouter::new(topics()));
    let (ready_tx, ready_rx) = watch::channel(false);
    let driver_task = tokio::spawn(drive_client(
        client_events,
        client_broker.clone(),
        router.clone(),
        ready_tx,
        Duration::from_millis(1),
        shutdown.clone(),
    ));

    let client = ExtractionClient::new(
        client_broker,
        router.clone(),
        ready_rx,
        Duration::from_secs(5),
    );

    let locations = ExtractionRequest::new("Paris is nice", ["location"]);
    let people = ExtractionRequest::new("Paris is nice", ["person"]);
    let (first, second) = tokio::join!(client.extract(&locations), client.extract(&people));

    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].label, "location");
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].label, "person");
    assert_eq!(router.pending(), 0);

    shutdown.cancel();
    let stats = worker_task.await.unwrap().unwrap();
    assert_eq!(stats.responded, 2);
    driver_task.await.unwrap().unwrap();
}
