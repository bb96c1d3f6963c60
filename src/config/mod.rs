//! Client configuration shared by the REST controller and the LiveQuery client.
//!
//! A `ParseConfig` is built once at startup and handed to each component as an
//! `Arc<ParseConfig>`; components never mutate it.

use std::collections::BTreeMap;
use std::time::Duration;

use url::Url;

use crate::error::{not_initialized, ParseResult};

pub const DEFAULT_REQUEST_ATTEMPT_LIMIT: u32 = 5;
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(125);
pub const DEFAULT_REQUEST_BATCH_SIZE: usize = 20;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
pub const DEFAULT_MAX_RECONNECT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseConfig {
    pub application_id: String,
    pub server_url: String,
    pub javascript_key: Option<String>,
    pub master_key: Option<String>,
    pub maintenance_key: Option<String>,
    pub live_query_server_url: Option<String>,
    /// Attach `X-Parse-Request-Id` to POST/PUT requests so the server can drop duplicates.
    pub idempotency: bool,
    pub request_attempt_limit: u32,
    pub retry_base_delay: Duration,
    pub request_timeout: Option<Duration>,
    pub request_batch_size: usize,
    pub force_revocable_session: bool,
    pub server_auth_type: Option<String>,
    pub server_auth_token: Option<String>,
    pub request_headers: BTreeMap<String, String>,
    pub installation_id: Option<String>,
    pub live_query_max_reconnect_attempts: u32,
    pub live_query_max_reconnect_interval: Duration,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            application_id: String::new(),
            server_url: String::new(),
            javascript_key: None,
            master_key: None,
            maintenance_key: None,
            live_query_server_url: None,
            idempotency: false,
            request_attempt_limit: DEFAULT_REQUEST_ATTEMPT_LIMIT,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            request_timeout: None,
            request_batch_size: DEFAULT_REQUEST_BATCH_SIZE,
            force_revocable_session: false,
            server_auth_type: None,
            server_auth_token: None,
            request_headers: BTreeMap::new(),
            installation_id: None,
            live_query_max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            live_query_max_reconnect_interval: DEFAULT_MAX_RECONNECT_INTERVAL,
        }
    }
}

impl ParseConfig {
    pub fn new(application_id: impl Into<String>, server_url: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            server_url: server_url.into(),
            ..Default::default()
        }
    }

    /// Reads the configuration from `PARSE_*` environment variables.
    pub fn from_env() -> ParseResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> ParseResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let config = Self {
            application_id: non_empty("PARSE_APPLICATION_ID").unwrap_or_default(),
            server_url: non_empty("PARSE_SERVER_URL").unwrap_or_default(),
            javascript_key: non_empty("PARSE_JAVASCRIPT_KEY"),
            master_key: non_empty("PARSE_MASTER_KEY"),
            maintenance_key: non_empty("PARSE_MAINTENANCE_KEY"),
            live_query_server_url: non_empty("PARSE_LIVE_QUERY_SERVER_URL"),
            idempotency: non_empty("PARSE_IDEMPOTENCY")
                .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ParseResult<()> {
        if self.application_id.trim().is_empty() {
            return Err(not_initialized(
                "You need to set an application id before talking to Parse Server",
            ));
        }
        if self.server_url.trim().is_empty() {
            return Err(not_initialized(
                "You need to set a server URL before talking to Parse Server",
            ));
        }
        Ok(())
    }

    pub fn with_javascript_key(mut self, key: impl Into<String>) -> Self {
        self.javascript_key = Some(key.into());
        self
    }

    pub fn with_master_key(mut self, key: impl Into<String>) -> Self {
        self.master_key = Some(key.into());
        self
    }

    pub fn with_maintenance_key(mut self, key: impl Into<String>) -> Self {
        self.maintenance_key = Some(key.into());
        self
    }

    pub fn with_idempotency(mut self, enabled: bool) -> Self {
        self.idempotency = enabled;
        self
    }

    pub fn with_live_query_server_url(mut self, url: impl Into<String>) -> Self {
        self.live_query_server_url = Some(url.into());
        self
    }

    /// The websocket endpoint for LiveQuery.
    ///
    /// Falls back to the REST server URL with its scheme switched to `ws`/`wss`.
    pub fn live_query_url(&self) -> Option<String> {
        if let Some(url) = self
            .live_query_server_url
            .as_ref()
            .filter(|url| !url.trim().is_empty())
        {
            return Some(url.clone());
        }

        let mut url = Url::parse(self.server_url.trim()).ok()?;
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            "ws" | "wss" => return Some(url.to_string()),
            _ => return None,
        };
        url.set_scheme(scheme).ok()?;
        Some(url.to_string())
    }

    /// Path component of the server URL, used to prefix batch sub-request paths.
    pub fn server_mount_path(&self) -> String {
        let path = Url::parse(self.server_url.trim())
            .map(|url| url.path().to_string())
            .unwrap_or_else(|_| "/".to_string());
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            trimmed.to_string()
        }
    }

    /// Value of the `Authorization` header when a server auth pair is configured.
    pub fn authorization_header(&self) -> Option<String> {
        match (&self.server_auth_type, &self.server_auth_token) {
            (Some(kind), Some(token)) if !kind.is_empty() && !token.is_empty() => {
                Some(format!("{kind} {token}"))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn live_query_url_derives_from_server_url() {
        let config = ParseConfig::new("app", "https://api.example.com/parse");
        assert_eq!(
            config.live_query_url().as_deref(),
            Some("wss://api.example.com/parse")
        );

        let plain = ParseConfig::new("app", "http://localhost:1337/parse");
        assert_eq!(
            plain.live_query_url().as_deref(),
            Some("ws://localhost:1337/parse")
        );
    }

    #[test]
    fn explicit_live_query_url_wins() {
        let config = ParseConfig::new("app", "https://api.example.com/parse")
            .with_live_query_server_url("wss://live.example.com");
        assert_eq!(
            config.live_query_url().as_deref(),
            Some("wss://live.example.com")
        );
    }

    #[test]
    fn mount_path_strips_trailing_slash() {
        let config = ParseConfig::new("app", "https://api.example.com/parse/");
        assert_eq!(config.server_mount_path(), "/parse");

        let root = ParseConfig::new("app", "https://api.example.com");
        assert_eq!(root.server_mount_path(), "");
    }

    #[test]
    fn validate_rejects_missing_application_id() {
        let err = ParseConfig::new("", "https://api.example.com")
            .validate()
            .unwrap_err();
        assert_eq!(err.code, crate::error::ParseErrorCode::NotInitialized);
    }

    #[test]
    fn lookup_reads_keys_and_flags() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("PARSE_APPLICATION_ID", "app-id"),
            ("PARSE_SERVER_URL", "http://localhost:1337/parse"),
            ("PARSE_MASTER_KEY", "master"),
            ("PARSE_IDEMPOTENCY", "true"),
            ("PARSE_JAVASCRIPT_KEY", "  "),
        ]);
        let config = ParseConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.application_id, "app-id");
        assert_eq!(config.master_key.as_deref(), Some("master"));
        assert_eq!(config.javascript_key, None);
        assert!(config.idempotency);
    }

    #[test]
    fn authorization_requires_type_and_token() {
        let mut config = ParseConfig::new("app", "http://localhost");
        assert_eq!(config.authorization_header(), None);
        config.server_auth_type = Some("Bearer".into());
        config.server_auth_token = Some("abc".into());
        assert_eq!(config.authorization_header().as_deref(), Some("Bearer abc"));
    }
}
