use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://localhost:8081";
pub const DEFAULT_API_VERSION: &str = "2015-12-16";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Connection settings for the HTTP gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayConfig {
    pub endpoint: String,
    pub request_timeout_ms: u64,
    /// Sent as `x-ms-version`.
    pub api_version: String,
    /// Pre-computed `authorization` header value; signing is out of scope.
    pub authorization: Option<String>,
    pub user_agent: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            api_version: DEFAULT_API_VERSION.to_string(),
            authorization: None,
            user_agent: format!("docdb-gateway/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl GatewayConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Defaults overlaid with `DOCDB_ENDPOINT`, `DOCDB_AUTHORIZATION` and
    /// `DOCDB_REQUEST_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let mut config = Self::default();
        if let Some(endpoint) = read("DOCDB_ENDPOINT") {
            config.endpoint = endpoint;
        }
        config.authorization = read("DOCDB_AUTHORIZATION");
        if let Some(timeout_ms) = read("DOCDB_REQUEST_TIMEOUT_MS")
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|timeout_ms| *timeout_ms > 0)
        {
            config.request_timeout_ms = timeout_ms;
        }
        config
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
