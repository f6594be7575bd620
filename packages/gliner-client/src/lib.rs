//! Pure GLiNER inference client
//!
//! A minimal client for an HTTP server that wraps a pretrained GLiNER model.
//! The client knows nothing about messaging; it only forwards
//! `predict_entities(text, labels, threshold)` calls.
//!
//! # Example
//!
//! ```rust,ignore
//! use gliner_client::GlinerClient;
//!
//! let client = GlinerClient::new("http://localhost:8000");
//! let entities = client
//!     .predict_entities("Paris is nice", &["location".to_string()], 0.5)
//!     .await?;
//! ```

pub mod error;
pub mod types;

pub use error::{GlinerError, Result};
pub use types::{PredictRequest, PredictedEntity};

use reqwest::Client;
use tracing::{debug, warn};

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "EmergentMethods/gliner_medium_news-v2.1";

/// Pure GLiNER inference server client.
#[derive(Clone)]
pub struct GlinerClient {
    http_client: Client,
    base_url: String,
    model: String,
}

impl GlinerClient {
    /// Create a new client for the server at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Use a different pretrained model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn predict_url(&self) -> String {
        format!("{}/predict", self.base_url)
    }

    /// Label spans of `text` with the given entity labels.
    ///
    /// Only entities scoring at or above `threshold` are returned.
    pub async fn predict_entities(
        &self,
        text: &str,
        labels: &[String],
        threshold: f32,
    ) -> Result<Vec<PredictedEntity>> {
        let start = std::time::Instant::now();
        let request = PredictRequest {
            model: &self.model,
            text,
            labels,
            threshold,
        };

        let response = self
            .http_client
            .post(self.predict_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "GLiNER request failed");
                GlinerError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %body, "GLiNER API error");
            return Err(GlinerError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let entities: Vec<PredictedEntity> = response
            .json()
            .await
            .map_err(|e| GlinerError::Parse(e.to_string()))?;

        debug!(
            model = %self.model,
            entity_count = entities.len(),
            duration_ms = start.elapsed().as_millis(),
            "GLiNER prediction"
        );

        Ok(entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builder() {
        let client = GlinerClient::new("http://gliner.local:8000/")
            .with_model("urchade/gliner_mediumv2.1");

        assert_eq!(client.base_url(), "http://gliner.local:8000");
        assert_eq!(client.model(), "urchade/gliner_mediumv2.1");
        assert_eq!(client.predict_url(), "http://gliner.local:8000/predict");
    }

    #[test]
    fn test_default_model() {
        let client = GlinerClient::new("http://localhost:8000");
        assert_eq!(client.model(), DEFAULT_MODEL);
    }

    #[test]
    fn test_predict_request_body() {
        let labels = vec!["location".to_string(), "person".to_string()];
        let request = PredictRequest {
            model: DEFAULT_MODEL,
            text: "Paris is nice",
            labels: &labels,
            threshold: 0.5,
        };

        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["model"], DEFAULT_MODEL);
        assert_eq!(body["text"], "Paris is nice");
        assert_eq!(body["labels"][1], "person");
        assert_eq!(body["threshold"], 0.5);
    }

    #[test]
    fn test_parse_entities() {
        let raw = r#"[{"start":0,"end":5,"text":"Paris","label":"location","score":0.97}]"#;
        let entities: Vec<PredictedEntity> = serde_json::from_str(raw).unwrap();

        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].text, "Paris");
        assert_eq!(entities[0].label, "location");
        assert_eq!((entities[0].start, entities[0].end), (0, 5));
        assert!(entities[0].score > 0.9);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error() {
        let client = GlinerClient::new("http://127.0.0.1:9");
        let err = tokio_test::assert_err!(
            client
                .predict_entities("Paris", &["location".to_string()], 0.5)
                .await
        );

        assert!(matches!(err, GlinerError::Network(_)));
    }
}
