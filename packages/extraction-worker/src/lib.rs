//! Entity extraction worker
//!
//! Bridges an MQTT broker to a named-entity-recognition model. Requests arrive
//! on `{prefix}/{name}/requests/{correlation_id}` as
//! `{"text": "...", "labels": [...]}`; the entity list is published on
//! `{prefix}/{name}/responses/{correlation_id}`.
//!
//! # Modules
//!
//! - [`protocol`] - Topic scheme, correlation IDs and wire payloads
//! - [`connection`] - Explicit broker connection state machine
//! - [`kernel`] - Broker and NER model seams (MQTT, GLiNER, test doubles)
//! - [`worker`] - The extraction worker and its run loop
//! - [`client`] - Requester side: send a request, await its response
//! - [`testing`] - Mock model and scripted broker events

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod kernel;
pub mod protocol;
pub mod testing;
pub mod worker;

pub use client::{drive_client, ExtractionClient, ResponseRouter};
pub use config::Config;
pub use connection::{ConnectionEvent, ConnectionState, ConnectionTracker};
pub use error::{BrokerError, ClientError, ModelError, RequestError, WorkerError};
pub use kernel::broker::check_broker;
pub use protocol::{CorrelationId, ExtractedEntity, ExtractionRequest, TopicScheme};
pub use worker::{ExtractionWorker, WorkerConfig, WorkerStats};
