//! Topic naming for the request/response correlation protocol.
//!
//! Every request carries its correlation ID as the last topic segment:
//!
//! ```text
//! {prefix}/{name}/requests/{correlation_id}
//! {prefix}/{name}/responses/{correlation_id}
//! ```
//!
//! The worker subscribes to `{prefix}/{name}/requests/+` and answers on the
//! response topic with the same ID.

use std::fmt;

use uuid::Uuid;

use crate::error::WorkerError;

const REQUESTS: &str = "requests";
const RESPONSES: &str = "responses";

/// Opaque token pairing a request with its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh ID (hyphen-free UUID v4).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Accept `raw` if it is usable as a single topic segment.
    pub fn parse(raw: &str) -> Option<Self> {
        is_plain_segment(raw).then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Non-empty and free of separators and wildcards.
fn is_plain_segment(segment: &str) -> bool {
    !segment.is_empty() && !segment.contains(['/', '+', '#'])
}

/// Builds and parses the topics of one extraction service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    prefix: String,
    name: String,
}

impl TopicScheme {
    /// Create a scheme, rejecting segments that would break topic matching.
    pub fn new(prefix: impl Into<String>, name: impl Into<String>) -> Result<Self, WorkerError> {
        let prefix = prefix.into();
        let name = name.into();

        if !is_plain_segment(&prefix) {
            return Err(WorkerError::Config(format!(
                "invalid topic prefix {:?}: must be a single non-empty segment without wildcards",
                prefix
            )));
        }
        if !is_plain_segment(&name) {
            return Err(WorkerError::Config(format!(
                "invalid topic name {:?}: must be a single non-empty segment without wildcards",
                name
            )));
        }

        Ok(Self { prefix, name })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wildcard filter the worker subscribes to.
    pub fn request_filter(&self) -> String {
        format!("{}/{}/{}/+", self.prefix, self.name, REQUESTS)
    }

    /// Wildcard filter the requester-side client subscribes to.
    pub fn response_filter(&self) -> String {
        format!("{}/{}/{}/+", self.prefix, self.name, RESPONSES)
    }

    pub fn request_topic(&self, id: &CorrelationId) -> String {
        format!("{}/{}/{}/{}", self.prefix, self.name, REQUESTS, id)
    }

    pub fn response_topic(&self, id: &CorrelationId) -> String {
        format!("{}/{}/{}/{}", self.prefix, self.name, RESPONSES, id)
    }

    /// Correlation ID of a request topic, or `None` if the topic is not ours.
    pub fn parse_request_topic(&self, topic: &str) -> Option<CorrelationId> {
        self.parse_topic(topic, REQUESTS)
    }

    /// Correlation ID of a response topic, or `None` if the topic is not ours.
    pub fn parse_response_topic(&self, topic: &str) -> Option<CorrelationId> {
        self.parse_topic(topic, RESPONSES)
    }

    fn parse_topic(&self, topic: &str, kind: &str) -> Option<CorrelationId> {
        let mut segments = topic.split('/');
        if segments.next()? != self.prefix
            || segments.next()? != self.name
            || segments.next()? != kind
        {
            return None;
        }
        let id = CorrelationId::parse(segments.next()?)?;
        match segments.next() {
            Some(_) => None,
            None => Some(id),
        }
    }
}
