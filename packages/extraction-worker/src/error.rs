//! Typed errors for the extraction worker.
//!
//! Library code returns these `thiserror` enums; the binary wraps them in
//! `anyhow` with context.

use std::time::Duration;

use thiserror::Error;

/// Errors that stop the worker or a broker operation.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Invalid or missing configuration value
    #[error("config error: {0}")]
    Config(String),

    /// The broker could not be reached before the first CONNACK
    #[error("broker {host}:{port} unavailable: {reason}")]
    BrokerUnavailable {
        host: String,
        port: u16,
        reason: String,
    },

    /// Broker operation failed
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}

/// Errors raised by the messaging layer.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// Request could not be handed to the client event loop
    #[error("client request failed: {0}")]
    Client(String),

    /// Broker (or the TCP peer) refused the connection
    #[error("connection refused: {0}")]
    Refused(String),

    /// Any other network or protocol failure
    #[error("transport error: {0}")]
    Transport(String),

    /// All client handles were dropped; the event loop has nothing left to do
    #[error("event loop closed")]
    Closed,
}

/// Errors from the NER model collaborator.
#[derive(Debug, Error)]
pub enum ModelError {
    /// GLiNER inference server failed
    #[error("GLiNER error: {0}")]
    Gliner(#[from] gliner_client::GlinerError),

    /// Model failed for another reason
    #[error("model error: {0}")]
    Other(String),
}

/// Reasons a single extraction request produced no response.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Topic does not follow `prefix/name/requests/<id>`
    #[error("unroutable topic: {0}")]
    UnroutableTopic(String),

    /// Payload is not a valid extraction request
    #[error("malformed payload: {0}")]
    MalformedPayload(#[source] serde_json::Error),

    /// Inference call failed
    #[error("inference failed: {0}")]
    Model(#[from] ModelError),

    /// Result could not be serialized
    #[error("failed to serialize response: {0}")]
    Serialize(#[source] serde_json::Error),

    /// Response could not be published
    #[error("failed to publish response: {0}")]
    Publish(#[source] BrokerError),
}

/// Errors returned to callers of the requester-side client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No response arrived in time
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// Broker operation failed
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Request could not be serialized
    #[error("failed to serialize request: {0}")]
    Serialize(#[source] serde_json::Error),

    /// Response payload is not a list of entities
    #[error("malformed response: {0}")]
    MalformedResponse(#[source] serde_json::Error),

    /// The client driver stopped before the response arrived
    #[error("client closed")]
    Closed,
}

/// Result type alias for worker operations.
pub type Result<T> = std::result::Result<T, WorkerError>;

/// Result type alias for broker operations.
pub type BrokerResult<T> = std::result::Result<T, BrokerError>;
