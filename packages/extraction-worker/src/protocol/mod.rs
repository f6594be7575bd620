//! Request/response correlation protocol on top of publish/subscribe.

pub mod topics;
pub mod types;

pub use topics::{CorrelationId, TopicScheme};
pub use types::{ExtractedEntity, ExtractionRequest};
