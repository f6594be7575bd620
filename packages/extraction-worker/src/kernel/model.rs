//! NER model abstraction.
//!
//! The worker treats the model as a black box with a single call,
//! `predict_entities(text, labels, threshold)`. Production forwards the call
//! to a GLiNER inference server; tests use `testing::MockEntityModel`.

use async_trait::async_trait;
use gliner_client::GlinerClient;
use tracing::debug;

use crate::config::Config;
use crate::error::ModelError;
use crate::protocol::ExtractedEntity;

/// Trait for named-entity recognition backends.
#[async_trait]
pub trait EntityModel: Send + Sync {
    /// Label spans of `text` with entries from `labels`.
    ///
    /// Only entities scoring at least `threshold` are returned.
    async fn predict_entities(
        &self,
        text: &str,
        labels: &[String],
        threshold: f32,
    ) -> Result<Vec<ExtractedEntity>, ModelError>;
}

/// GLiNER model served over HTTP.
pub struct GlinerModel {
    client: GlinerClient,
}

impl GlinerModel {
    pub fn new(client: GlinerClient) -> Self {
        Self { client }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(GlinerClient::new(&config.gliner_url).with_model(&config.gliner_model))
    }
}

#[async_trait]
impl EntityModel for GlinerModel {
    async fn predict_entities(
        &self,
        text: &str,
        labels: &[String],
        threshold: f32,
    ) -> Result<Vec<ExtractedEntity>, ModelError> {
        debug!(
            model = %self.client.model(),
            label_count = labels.len(),
            text_len = text.len(),
            "predicting entities"
        );
        let entities = self
            .client
            .predict_entities(text, labels, threshold)
            .await?;
        Ok(entities.into_iter().map(ExtractedEntity::from).collect())
    }
}
