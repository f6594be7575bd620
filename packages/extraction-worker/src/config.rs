use std::time::Duration;

use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use gliner_client::DEFAULT_MODEL;

use crate::protocol::TopicScheme;

/// Smallest keep-alive interval the MQTT client accepts.
const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Worker configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    /// Fixed client identifier; a random one is generated when unset
    pub mqtt_client_id: Option<String>,
    pub keep_alive: Duration,
    /// Largest MQTT packet accepted in either direction, in bytes
    pub max_packet_size: u32,
    pub topics: TopicScheme,
    pub threshold: f32,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
    pub gliner_url: String,
    pub gliner_model: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let topics = TopicScheme::new(
            var("TOPIC_PREFIX", "pixlieai"),
            var("EXTRACT_ENTITIES_TOPIC", "extract_entities_gliner"),
        )?;

        let threshold: f32 = var("ENTITY_THRESHOLD", "0.5")
            .parse()
            .context("ENTITY_THRESHOLD must be a number")?;
        if !(0.0..=1.0).contains(&threshold) {
            bail!("ENTITY_THRESHOLD must be between 0 and 1, got {}", threshold);
        }

        let keep_alive_secs: u64 = var("MQTT_KEEP_ALIVE_SECS", "60")
            .parse()
            .context("MQTT_KEEP_ALIVE_SECS must be a valid number")?;
        if keep_alive_secs < MIN_KEEP_ALIVE_SECS {
            bail!(
                "MQTT_KEEP_ALIVE_SECS must be at least {}, got {}",
                MIN_KEEP_ALIVE_SECS,
                keep_alive_secs
            );
        }

        let max_packet_size: u32 = var("MQTT_MAX_PACKET_SIZE", "1048576")
            .parse()
            .context("MQTT_MAX_PACKET_SIZE must be a valid number")?;
        if max_packet_size == 0 {
            bail!("MQTT_MAX_PACKET_SIZE must be greater than 0");
        }

        Ok(Self {
            mqtt_host: var("MQTT_HOST", "localhost"),
            mqtt_port: var("MQTT_PORT", "1883")
                .parse()
                .context("MQTT_PORT must be a valid port number")?,
            mqtt_client_id: lookup("MQTT_CLIENT_ID").filter(|id| !id.is_empty()),
            keep_alive: Duration::from_secs(keep_alive_secs),
            max_packet_size,
            topics,
            threshold,
            reconnect_delay: Duration::from_millis(
                var("RECONNECT_DELAY_MS", "1000")
                    .parse()
                    .context("RECONNECT_DELAY_MS must be a valid number")?,
            ),
            connect_timeout: Duration::from_secs(
                var("CONNECT_TIMEOUT_SECS", "5")
                    .parse()
                    .context("CONNECT_TIMEOUT_SECS must be a valid number")?,
            ),
            response_timeout: Duration::from_secs(
                var("RESPONSE_TIMEOUT_SECS", "30")
                    .parse()
                    .context("RESPONSE_TIMEOUT_SECS must be a valid number")?,
            ),
            gliner_url: var("GLINER_URL", "http://localhost:8000"),
            gliner_model: var("GLINER_MODEL", DEFAULT_MODEL),
        })
    }
}
