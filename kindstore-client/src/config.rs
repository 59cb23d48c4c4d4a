use crate::error::{ClientError, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://datastore.googleapis.com/v1";
pub const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

/// Client configuration for endpoints, token renewal and connection behaviour
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST root; requests go to `{base_url}/projects/{project}:{method}`
    pub base_url: String,

    /// OAuth scope requested in the bearer assertion
    pub scope: String,

    /// Lifetime of each signed assertion
    pub token_lifetime: Duration,

    /// Renew this long before the token's reported expiry
    pub token_renew_margin: Duration,

    /// Wait after a failed token exchange before trying again
    pub renewal_retry_delay: Duration,

    /// How often `connect` checks for the first token
    pub connect_poll_interval: Duration,

    /// Give up on `connect` after this long
    pub connect_timeout: Duration,

    /// Idle connections kept per host by the HTTP transport
    pub pool_max_idle_per_host: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            token_lifetime: Duration::from_secs(3600),
            token_renew_margin: Duration::from_secs(100),
            renewal_retry_delay: Duration::from_secs(1),
            connect_poll_interval: Duration::from_millis(10),
            connect_timeout: Duration::from_secs(30),
            pool_max_idle_per_host: usize::MAX,
        }
    }
}

impl ClientConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Point the client at another REST root (an emulator, for instance)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.token_lifetime = lifetime;
        self
    }

    pub fn with_token_renew_margin(mut self, margin: Duration) -> Self {
        self.token_renew_margin = margin;
        self
    }

    pub fn with_renewal_retry_delay(mut self, delay: Duration) -> Self {
        self.renewal_retry_delay = delay;
        self
    }

    pub fn with_connect_poll_interval(mut self, interval: Duration) -> Self {
        self.connect_poll_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = max;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.base_url.is_empty() {
            return Err("base_url must not be empty".to_string());
        }

        if self.token_lifetime.is_zero() {
            return Err("token_lifetime must be greater than 0".to_string());
        }

        if self.token_renew_margin >= self.token_lifetime {
            return Err("token_renew_margin must be shorter than token_lifetime".to_string());
        }

        if self.connect_poll_interval.is_zero() {
            return Err("connect_poll_interval must be greater than 0".to_string());
        }

        if self.connect_poll_interval > self.connect_timeout {
            return Err("connect_poll_interval must not exceed connect_timeout".to_string());
        }

        Ok(())
    }
}

/// Service-account credentials
#[derive(Clone, Deserialize)]
pub struct ServiceAccount {
    pub project_id: String,
    pub token_uri: String,
    pub private_key: String,
    pub client_email: String,
}

impl ServiceAccount {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ClientError::Auth(format!("invalid service account: {}", e)))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Auth(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&contents)
    }
}

impl std::fmt::Debug for ServiceAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccount")
            .field("project_id", &self.project_id)
            .field("token_uri", &self.token_uri)
            .field("client_email", &self.client_email)
            .finish_non_exhaustive()
    }
}
