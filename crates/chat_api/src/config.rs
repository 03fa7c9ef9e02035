use std::collections::BTreeMap;
use std::time::Duration;

use crate::retry::BASE_DELAY_MS;
use crate::url::DEFAULT_CHAT_BASE_URL;

/// Default maximum silence between two stream chunks.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Transport configuration for chat-completions requests.
#[derive(Debug, Clone)]
pub struct ChatApiConfig {
    /// Bearer credential passed to `Authorization`.
    pub api_key: String,
    /// Base URL for the provider, normalized to `/chat/completions`.
    pub base_url: String,
    /// Optional `User-Agent` override.
    pub user_agent: Option<String>,
    /// Additional headers merged into request headers.
    pub extra_headers: BTreeMap<String, String>,
    /// Optional TCP/TLS connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Maximum gap between streamed chunks before the stream is abandoned.
    pub idle_timeout: Duration,
    /// Delay before the first retry; later retries double it.
    pub retry_base_delay: Duration,
}

impl Default for ChatApiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_CHAT_BASE_URL.to_string(),
            user_agent: None,
            extra_headers: BTreeMap::new(),
            connect_timeout: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            retry_base_delay: Duration::from_millis(BASE_DELAY_MS),
        }
    }
}

impl ChatApiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn insert_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(key.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.extra_headers.extend(headers);
        self
    }
}
