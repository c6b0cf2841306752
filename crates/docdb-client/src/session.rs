//! Session token tracking.
//!
//! Every response may carry `x-ms-session-token` in the form
//! `rangeId:lsn[,rangeId:lsn...]`. The store keeps, per collection identity,
//! the highest LSN observed for each partition range and hands that vector
//! back on later requests so reads are at least as fresh as this client's own
//! history. Merges take the pointwise maximum and never move an LSN backwards.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::errors::{DocDbError, DocDbResult};
use crate::headers;
use crate::links;
use crate::types::{ConsistencyLevel, Request, Response};

/// Range id used for the legacy single-partition token form (`"42"`).
pub const DEFAULT_PARTITION_RANGE_ID: &str = "0";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionToken {
    pub partition_range_id: String,
    pub lsn: u64,
}

impl FromStr for SessionToken {
    type Err = DocDbError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        let (range, lsn) = match raw.split_once(':') {
            Some((range, lsn)) => (range.trim(), lsn.trim()),
            None => (DEFAULT_PARTITION_RANGE_ID, raw),
        };
        if range.is_empty() {
            return Err(DocDbError::InvalidArgument(format!(
                "session token has an empty partition range id: {raw}"
            )));
        }
        let lsn = lsn.parse::<u64>().map_err(|_| {
            DocDbError::InvalidArgument(format!("session token LSN is not a number: {raw}"))
        })?;
        Ok(Self {
            partition_range_id: range.to_string(),
            lsn,
        })
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.partition_range_id, self.lsn)
    }
}

/// Highest observed LSN per partition range of one collection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTokenSet {
    ranges: BTreeMap<String, u64>,
}

impl SessionTokenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(raw: &str) -> DocDbResult<Self> {
        let mut set = Self::new();
        for part in raw.split(',').filter(|part| !part.trim().is_empty()) {
            set.observe(part.parse()?);
        }
        Ok(set)
    }

    /// Records one token, keeping the larger LSN for its range.
    pub fn observe(&mut self, token: SessionToken) {
        let current = self.ranges.entry(token.partition_range_id).or_insert(0);
        *current = (*current).max(token.lsn);
    }

    pub fn merge(&mut self, other: &SessionTokenSet) {
        for (range, lsn) in &other.ranges {
            let current = self.ranges.entry(range.clone()).or_insert(0);
            *current = (*current).max(*lsn);
        }
    }

    pub fn lsn(&self, partition_range_id: &str) -> Option<u64> {
        self.ranges.get(partition_range_id).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn tokens(&self) -> impl Iterator<Item = SessionToken> + '_ {
        self.ranges.iter().map(|(range, lsn)| SessionToken {
            partition_range_id: range.clone(),
            lsn: *lsn,
        })
    }
}

impl fmt::Display for SessionTokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (range, lsn) in &self.ranges {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            write!(f, "{range}:{lsn}")?;
        }
        Ok(())
    }
}

/// Process-wide session state for one client instance.
#[derive(Debug, Default)]
pub struct SessionTokenStore {
    tokens: DashMap<String, SessionTokenSet>,
}

impl SessionTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identities a request's session state is filed under: the owning
    /// collection's resource id and, when the path is deep enough, its
    /// collection link.
    fn session_keys(request: &Request) -> Vec<String> {
        let mut keys = Vec::with_capacity(2);
        if let Some(resource_id) = request
            .resource_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
        {
            keys.push(resource_id.to_string());
        }
        if let Some(collection_link) = links::collection_link_of(&request.path) {
            keys.push(collection_link);
        }
        keys
    }

    /// Token to attach to an outgoing request, if the ambient session applies.
    pub fn resolve(
        &self,
        request: &Request,
        default_consistency: ConsistencyLevel,
    ) -> DocDbResult<Option<String>> {
        if request.session_token().is_some() {
            return Ok(None);
        }
        let effective = request
            .consistency_override()?
            .unwrap_or(default_consistency);
        if effective != ConsistencyLevel::Session {
            return Ok(None);
        }
        for key in Self::session_keys(request) {
            if let Some(set) = self.tokens.get(&key) {
                if !set.is_empty() {
                    return Ok(Some(set.to_string()));
                }
            }
        }
        Ok(None)
    }

    /// Merges the response's session token into every identity of the request.
    pub fn capture(&self, request: &Request, response: &Response) -> DocDbResult<()> {
        let Some(raw) = response.session_token() else {
            return Ok(());
        };
        let observed = SessionTokenSet::parse(raw)?;
        if observed.is_empty() {
            return Ok(());
        }
        for key in Self::session_keys(request) {
            // The entry guard holds the shard lock, so the merge is atomic per key.
            self.tokens.entry(key.clone()).or_default().merge(&observed);
            tracing::debug!(key = %key, token = %raw, "captured session token");
        }
        Ok(())
    }

    /// Drops the entries of a collection that was successfully deleted.
    pub fn clear(&self, request: &Request, response: &Response) {
        if !response.is_success() {
            return;
        }
        for key in Self::session_keys(request) {
            if self.tokens.remove(&key).is_some() {
                tracing::debug!(key = %key, "cleared session token");
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<SessionTokenSet> {
        self.tokens
            .get(links::trim_slashes(key))
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Renders the store as `key=token-set` lines, sorted by key.
    pub fn to_text(&self) -> String {
        let mut entries: Vec<(String, String)> = self
            .tokens
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().to_string()))
            .collect();
        entries.sort();
        let mut text = String::new();
        for (key, token) in entries {
            text.push_str(&key);
            text.push('=');
            text.push_str(&token);
            text.push('\n');
        }
        text
    }

    /// Parses the form written by [`SessionTokenStore::to_text`]. Blank lines
    /// and lines starting with `#` are skipped.
    pub fn from_text(text: &str) -> DocDbResult<Self> {
        let store = Self::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            // Self-link ids may contain '=', token sets never do.
            let (key, token) = line.rsplit_once('=').ok_or_else(|| {
                DocDbError::Persistence(format!("line {}: expected key=token", index + 1))
            })?;
            let set = SessionTokenSet::parse(token)
                .map_err(|err| DocDbError::Persistence(format!("line {}: {err}", index + 1)))?;
            store
                .tokens
                .entry(key.trim().to_string())
                .or_default()
                .merge(&set);
        }
        Ok(store)
    }

    /// Writes through a uniquely named sibling file, then renames it into place.
    pub fn save(&self, path: impl AsRef<Path>) -> DocDbResult<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|err| DocDbError::Persistence(format!("create session file failed: {err}")))?;
        tmp.write_all(self.to_text().as_bytes())
            .map_err(|err| DocDbError::Persistence(format!("write session file failed: {err}")))?;
        tmp.persist(path).map_err(|err| {
            DocDbError::Persistence(format!("rename session file failed: {}", err.error))
        })?;
        Ok(())
    }

    /// Loads a saved store; a missing file yields an empty store.
    pub fn load(path: impl AsRef<Path>) -> DocDbResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let text = fs::read_to_string(path)
            .map_err(|err| DocDbError::Persistence(format!("read session file failed: {err}")))?;
        Self::from_text(&text)
    }
}

/// Writes the resolved token onto the request unless the caller already set one.
pub(crate) fn apply_session_token(
    store: &SessionTokenStore,
    request: &mut Request,
    default_consistency: ConsistencyLevel,
) -> DocDbResult<()> {
    if let Some(token) = store.resolve(request, default_consistency)? {
        request.headers.insert(headers::SESSION_TOKEN, token);
    }
    Ok(())
}
