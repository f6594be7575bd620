//! Wire payloads exchanged over the broker.

use gliner_client::PredictedEntity;
use serde::{Deserialize, Serialize};

/// Request payload: `{"text": "...", "labels": ["...", ...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRequest {
    pub text: String,
    pub labels: Vec<String>,
}

impl ExtractionRequest {
    pub fn new<I, S>(text: impl Into<String>, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            text: text.into(),
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }
}

/// One labeled span, passed through from the model unchanged.
///
/// A response payload is a JSON array of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub text: String,
    pub label: String,
    pub start: usize,
    pub end: usize,
    /// Confidence in [0, 1]
    pub score: f64,
}

impl From<PredictedEntity> for ExtractedEntity {
    fn from(entity: PredictedEntity) -> Self {
        Self {
            text: entity.text,
            label: entity.label,
            start: entity.start,
            end: entity.end,
            score: entity.score,
        }
    }
}
