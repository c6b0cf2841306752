//! Wire header names and a case-insensitive header map.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const SESSION_TOKEN: &str = "x-ms-session-token";
pub const CONSISTENCY_LEVEL: &str = "x-ms-consistency-level";
pub const CONTINUATION: &str = "x-ms-continuation";
pub const PARTITION_KEY: &str = "x-ms-documentdb-partitionkey";
pub const IS_UPSERT: &str = "x-ms-is-upsert";
pub const IF_MATCH: &str = "If-Match";
pub const IF_NONE_MATCH: &str = "If-None-Match";
pub const RETRY_AFTER_MS: &str = "x-ms-retry-after-ms";
pub const PARTITION_COUNT: &str = "x-ms-documentdb-partitioncount";
pub const PARTITION_KEY_RANGE_ID: &str = "x-ms-documentdb-partitionkeyrangeid";
pub const PAGE_SIZE: &str = "x-ms-max-item-count";
pub const IS_QUERY: &str = "x-ms-documentdb-isquery";
pub const ENABLE_SCAN_IN_QUERY: &str = "x-ms-documentdb-query-enable-scan";
pub const ENABLE_CROSS_PARTITION_QUERY: &str = "x-ms-documentdb-query-enablecrosspartition";
pub const SUB_STATUS: &str = "x-ms-substatus";
pub const ACTIVITY_ID: &str = "x-ms-activity-id";
pub const REQUEST_CHARGE: &str = "x-ms-request-charge";
pub const CONTENT_TYPE: &str = "Content-Type";

pub const QUERY_CONTENT_TYPE: &str = "application/query+json";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Header map with case-insensitive names. Names are stored lower-cased.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) -> Option<String> {
        self.0.insert(name.to_ascii_lowercase(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Like [`Headers::get`], but treats an empty value as absent.
    pub fn get_non_empty(&self, name: &str) -> Option<&str> {
        self.get(name).filter(|value| !value.trim().is_empty())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name.as_ref(), value);
        }
        headers
    }
}
