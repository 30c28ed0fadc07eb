use crate::error::{RealtimeError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use url::Url;

/// Path of the realtime endpoint when the URL is derived from another origin.
pub const WS_ENDPOINT_PATH: &str = "/ws";
/// Query parameter carrying the bearer token.
pub const TOKEN_QUERY_PARAM: &str = "token";

const DEFAULT_MAX_ATTEMPTS: u32 = 15;
const DEFAULT_INITIAL_DELAY_MS: u64 = 1_000;
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Retries allowed after a failed or dropped connection before giving up.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Time between two ping probes.
    pub interval_ms: u64,
    /// Grace period for the pong reply.
    pub timeout_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            timeout_ms: DEFAULT_HEARTBEAT_TIMEOUT_MS,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Client configuration.
///
/// The connection URL is resolved in this order:
///
/// 1. `url`, used verbatim.
/// 2. `api_base_url`: same host and port, `https` becomes `wss` and `http`
///    becomes `ws`, path replaced by [`WS_ENDPOINT_PATH`].
/// 3. `page_origin`: the origin the application was served from, same rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub url: Option<String>,
    pub api_base_url: Option<String>,
    pub page_origin: Option<String>,
    pub reconnect: ReconnectConfig,
    pub heartbeat: HeartbeatConfig,
    /// Log every frame sent and received at debug level.
    pub debug: bool,
    /// Cap on messages buffered while offline. `None` keeps every message.
    pub max_queued_messages: Option<usize>,
}

impl ClientConfig {
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_api_base_url(mut self, base: impl Into<String>) -> Self {
        self.api_base_url = Some(base.into());
        self
    }

    pub fn with_page_origin(mut self, origin: impl Into<String>) -> Self {
        self.page_origin = Some(origin.into());
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_max_queued_messages(mut self, max: usize) -> Self {
        self.max_queued_messages = Some(max);
        self
    }

    /// Reads the URL sources and the debug flag from the environment.
    ///
    /// Recognised variables: `REALTIME_WS_URL`, `REALTIME_API_BASE_URL`,
    /// `REALTIME_PAGE_ORIGIN`, `REALTIME_DEBUG`. Everything else keeps its
    /// default.
    pub fn from_env() -> Self {
        let non_empty = |name: &str| env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            url: non_empty("REALTIME_WS_URL"),
            api_base_url: non_empty("REALTIME_API_BASE_URL"),
            page_origin: non_empty("REALTIME_PAGE_ORIGIN"),
            debug: non_empty("REALTIME_DEBUG")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            ..Default::default()
        }
    }

    /// Resolves the connection URL, appending `token` as a query parameter.
    pub fn resolve_url(&self, token: Option<&str>) -> Result<Url> {
        let mut url = if let Some(explicit) = &self.url {
            Url::parse(explicit)?
        } else if let Some(base) = &self.api_base_url {
            derive_ws_url(base)?
        } else if let Some(origin) = &self.page_origin {
            derive_ws_url(origin)?
        } else {
            return Err(RealtimeError::Config(
                "no url, api_base_url or page_origin configured".to_string(),
            ));
        };

        if let Some(token) = token {
            url.query_pairs_mut().append_pair(TOKEN_QUERY_PARAM, token);
        }
        Ok(url)
    }
}

/// Renders `url` for logs with the bearer token masked.
pub(crate) fn redact_token(url: &Url) -> String {
    if !url.query_pairs().any(|(k, _)| k == TOKEN_QUERY_PARAM) {
        return url.to_string();
    }
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == TOKEN_QUERY_PARAM {
                "***".to_string()
            } else {
                v.into_owned()
            };
            (k.into_owned(), v)
        })
        .collect();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}

/// Maps an http(s) origin onto the ws(s) endpoint on the same host.
fn derive_ws_url(base: &str) -> Result<Url> {
    let mut url = Url::parse(base)?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(RealtimeError::Config(format!(
                "cannot derive a websocket url from scheme '{}'",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| RealtimeError::Config(format!("cannot switch '{}' to {}", base, scheme)))?;
    url.set_path(WS_ENDPOINT_PATH);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.reconnect.max_attempts, 15);
        assert_eq!(config.reconnect.initial_delay_ms, 1_000);
        assert_eq!(config.reconnect.max_delay_ms, 30_000);
        assert_eq!(config.heartbeat.interval(), Duration::from_secs(30));
        assert_eq!(config.heartbeat.timeout(), Duration::from_secs(10));
        assert!(!config.debug);
        assert_eq!(config.max_queued_messages, None);
    }

    #[test]
    fn test_explicit_url_wins() {
        let config = ClientConfig::default()
            .with_url("ws://explicit.local:9000/socket")
            .with_api_base_url("https://api.example.com/api")
            .with_page_origin("https://app.example.com");
        let url = config.resolve_url(None).unwrap();
        assert_eq!(url.as_str(), "ws://explicit.local:9000/socket");
    }

    #[test]
    fn test_derived_from_secure_api_base() {
        let config = ClientConfig::default()
            .with_api_base_url("https://api.example.com:8443/api/v1?x=1")
            .with_page_origin("http://app.example.com");
        let url = config.resolve_url(Some("tok123")).unwrap();
        assert_eq!(url.as_str(), "wss://api.example.com:8443/ws?token=tok123");
    }

    #[test]
    fn test_derived_from_plain_api_base() {
        let config = ClientConfig::default().with_api_base_url("http://localhost:8000/api");
        let url = config.resolve_url(None).unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8000/ws");
    }

    #[test]
    fn test_page_origin_fallback() {
        let config = ClientConfig::default().with_page_origin("https://app.example.com/dashboard");
        let url = config.resolve_url(None).unwrap();
        assert_eq!(url.as_str(), "wss://app.example.com/ws");
    }

    #[test]
    fn test_token_is_url_encoded() {
        let config = ClientConfig::default().with_url("wss://rt.example.com/ws?v=2");
        let url = config.resolve_url(Some("a b&c")).unwrap();
        assert_eq!(url.as_str(), "wss://rt.example.com/ws?v=2&token=a+b%26c");
    }

    #[test]
    fn test_redact_token_masks_only_token() {
        let config = ClientConfig::default().with_url("wss://rt.example.com/ws?v=2");
        let url = config.resolve_url(Some("secret")).unwrap();
        assert_eq!(redact_token(&url), "wss://rt.example.com/ws?v=2&token=***");
    }

    #[test]
    fn test_missing_source_is_config_error() {
        let err = ClientConfig::default().resolve_url(None).unwrap_err();
        assert!(matches!(err, RealtimeError::Config(_)));
    }

    #[test]
    fn test_from_env_reads_sources_and_debug() {
        env::set_var("REALTIME_WS_URL", "");
        env::set_var("REALTIME_API_BASE_URL", "https://api.example.com/api");
        env::set_var("REALTIME_PAGE_ORIGIN", "https://app.example.com");
        env::set_var("REALTIME_DEBUG", "TRUE");

        let config = ClientConfig::from_env();

        env::remove_var("REALTIME_WS_URL");
        env::remove_var("REALTIME_API_BASE_URL");
        env::remove_var("REALTIME_PAGE_ORIGIN");
        env::remove_var("REALTIME_DEBUG");

        // Empty values count as unset.
        assert_eq!(config.url, None);
        assert_eq!(config.api_base_url.as_deref(), Some("https://api.example.com/api"));
        assert_eq!(config.page_origin.as_deref(), Some("https://app.example.com"));
        assert!(config.debug);
        assert_eq!(config.reconnect, ReconnectConfig::default());
    }

    #[test]
    fn test_unsupported_scheme_rejected() {
        let config = ClientConfig::default().with_api_base_url("ftp://files.example.com");
        assert!(matches!(
            config.resolve_url(None),
            Err(RealtimeError::Config(_))
        ));
    }
}
