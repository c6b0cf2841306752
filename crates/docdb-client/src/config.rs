use crate::retry::RetryPolicy;
use crate::types::ConsistencyLevel;

/// Runtime configuration for a client instance.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    /// Consistency applied when a request carries no override.
    pub default_consistency: ConsistencyLevel,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_consistency: ConsistencyLevel::Session,
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults overlaid with `DOCDB_CONSISTENCY_LEVEL`,
    /// `DOCDB_MAX_RETRY_ATTEMPTS` and `DOCDB_MAX_RETRY_WAIT_MS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(level) = read("DOCDB_CONSISTENCY_LEVEL").and_then(|value| value.parse().ok()) {
            config.default_consistency = level;
        }
        if let Some(attempts) = read("DOCDB_MAX_RETRY_ATTEMPTS")
            .and_then(|value| value.trim().parse::<u32>().ok())
            .filter(|attempts| *attempts > 0)
        {
            config.retry.max_attempts = attempts;
        }
        if let Some(wait_ms) =
            read("DOCDB_MAX_RETRY_WAIT_MS").and_then(|value| value.trim().parse::<u64>().ok())
        {
            config.retry.max_elapsed_ms = wait_ms;
        }
        config
    }
}
