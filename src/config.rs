/// Client configuration.
/// Holds the backend endpoint, credentials and the timing knobs used by the
/// HTTP and realtime layers.

use crate::error::{ClientError, Result};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend base URL, e.g. https://xyz.supabase.co
    pub base_url: String,
    /// Public anon key sent as `apikey` on every request
    pub anon_key: String,
    pub http_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub join_timeout: Duration,
    pub connect_attempts: u32,
    pub connect_backoff: Duration,
    pub max_connect_backoff: Duration,
    /// Re-open a message subscription once after the channel reports an error
    pub resubscribe_on_error: bool,
    /// Directory for the local SQLite state
    pub state_dir: Option<PathBuf>,
}

impl ClientConfig {
    pub fn new(base_url: &str, anon_key: &str) -> Self {
        ClientConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            http_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            join_timeout: Duration::from_secs(10),
            connect_attempts: 5,
            connect_backoff: Duration::from_millis(500),
            max_connect_backoff: Duration::from_secs(8),
            resubscribe_on_error: false,
            state_dir: None,
        }
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = attempts;
        self
    }

    pub fn with_resubscribe_on_error(mut self, enabled: bool) -> Self {
        self.resubscribe_on_error = enabled;
        self
    }

    pub fn with_state_dir(mut self, dir: PathBuf) -> Self {
        self.state_dir = Some(dir);
        self
    }

    /// Check that the URL is http(s) and the key is present
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.base_url)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ClientError::Config(format!(
                "Backend URL must be http or https, got {}",
                url.scheme()
            )));
        }
        if self.anon_key.trim().is_empty() {
            return Err(ClientError::Config("Anon key is required".to_string()));
        }
        if self.connect_attempts == 0 {
            return Err(ClientError::Config(
                "connect_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Realtime WebSocket endpoint derived from the base URL
    pub fn realtime_url(&self) -> Result<Url> {
        let ws_base = self
            .base_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        let mut url = Url::parse(&format!("{}/realtime/v1/websocket", ws_base))?;
        url.query_pairs_mut()
            .append_pair("apikey", &self.anon_key)
            .append_pair("vsn", "1.0.0");
        Ok(url)
    }
}
