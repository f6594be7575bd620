//! GLiNER inference server request and response types.

use serde::{Deserialize, Serialize};

/// Body of `POST /predict`.
#[derive(Debug, Clone, Serialize)]
pub struct PredictRequest<'a> {
    /// Pretrained model name, loaded by the server on demand
    pub model: &'a str,

    /// Text to label
    pub text: &'a str,

    /// Entity labels to look for
    pub labels: &'a [String],

    /// Minimum confidence for an entity to be returned
    pub threshold: f32,
}

/// One entity span predicted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedEntity {
    pub text: String,
    pub label: String,
    /// Character offset where the span starts
    pub start: usize,
    /// Character offset one past the end of the span
    pub end: usize,
    pub score: f64,
}
