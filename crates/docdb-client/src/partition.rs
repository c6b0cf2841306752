//! Client-directed partitioning.
//!
//! A database link (`dbs/<id>`) says nothing about which collection should
//! receive a document. Callers register a [`PartitionResolver`] per database
//! and the registry routes writes and reads through it; collection-shaped
//! links bypass the registry entirely.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::errors::{DocDbError, DocDbResult};
use crate::links;

pub const NO_RESOLVER_MESSAGE: &str = "no partition resolver registered for this database link; \
check that the exact link form used at registration matches the one provided, or register both \
the self-link and the id-based link";

/// Strategy mapping documents and partition keys to collection links.
pub trait PartitionResolver: Send + Sync {
    /// Collection that should store `document`.
    fn resolve_for_create(&self, document: &Value) -> DocDbResult<String>;

    /// Candidate collections for a read. `None` means every collection.
    fn resolve_for_read(&self, partition_key: Option<&Value>) -> DocDbResult<Vec<String>>;
}

impl<T> PartitionResolver for Arc<T>
where
    T: PartitionResolver + ?Sized,
{
    fn resolve_for_create(&self, document: &Value) -> DocDbResult<String> {
        (**self).resolve_for_create(document)
    }

    fn resolve_for_read(&self, partition_key: Option<&Value>) -> DocDbResult<Vec<String>> {
        (**self).resolve_for_read(partition_key)
    }
}

#[derive(Default)]
pub struct PartitionResolverRegistry {
    resolvers: RwLock<HashMap<String, Arc<dyn PartitionResolver>>>,
}

impl std::fmt::Debug for PartitionResolverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut links: Vec<String> = self.resolvers.read().keys().cloned().collect();
        links.sort();
        f.debug_struct("PartitionResolverRegistry")
            .field("database_links", &links)
            .finish()
    }
}

impl PartitionResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(database_link: &str) -> DocDbResult<String> {
        let normalized = links::trim_slashes(database_link.trim());
        if normalized.is_empty() {
            return Err(DocDbError::InvalidArgument(
                "database link must not be empty".to_string(),
            ));
        }
        Ok(normalized.to_string())
    }

    /// Registers `resolver` for `database_link`; a later registration for the
    /// same normalized link replaces the earlier one.
    pub fn register(
        &self,
        database_link: &str,
        resolver: Arc<dyn PartitionResolver>,
    ) -> DocDbResult<()> {
        let key = Self::normalize(database_link)?;
        self.resolvers.write().insert(key, resolver);
        Ok(())
    }

    pub fn lookup(&self, database_link: &str) -> Option<Arc<dyn PartitionResolver>> {
        let key = Self::normalize(database_link).ok()?;
        self.resolvers.read().get(&key).cloned()
    }

    fn require(&self, database_link: &str) -> DocDbResult<Arc<dyn PartitionResolver>> {
        self.lookup(database_link).ok_or_else(|| {
            DocDbError::Configuration(format!("{NO_RESOLVER_MESSAGE} (link: {database_link})"))
        })
    }

    /// Collection that should receive `document`.
    pub fn route_for_write(
        &self,
        database_or_collection_link: &str,
        document: &Value,
    ) -> DocDbResult<String> {
        if links::trim_slashes(database_or_collection_link.trim()).is_empty() {
            return Err(DocDbError::InvalidArgument(
                "database or collection link must not be empty".to_string(),
            ));
        }
        if document.is_null() {
            return Err(DocDbError::InvalidArgument(
                "document must not be null".to_string(),
            ));
        }
        if !links::is_database_link(database_or_collection_link) {
            return Ok(database_or_collection_link.to_string());
        }

        let resolver = self.require(database_or_collection_link)?;
        let collection_link = resolver.resolve_for_create(document)?;
        if links::trim_slashes(&collection_link).is_empty() {
            return Err(DocDbError::Configuration(format!(
                "partition resolver for {database_or_collection_link} returned an empty collection link"
            )));
        }
        Ok(collection_link)
    }

    /// Collections a read against the link has to visit, in resolver order.
    pub fn route_for_read(
        &self,
        database_or_collection_link: &str,
        partition_key: Option<&Value>,
    ) -> DocDbResult<Vec<String>> {
        if links::trim_slashes(database_or_collection_link.trim()).is_empty() {
            return Err(DocDbError::InvalidArgument(
                "database or collection link must not be empty".to_string(),
            ));
        }
        if !links::is_database_link(database_or_collection_link) {
            return Ok(vec![database_or_collection_link.to_string()]);
        }
        self.require(database_or_collection_link)?
            .resolve_for_read(partition_key)
    }
}

fn normalize_key_path(key_path: &str) -> String {
    let key_path = key_path.trim();
    if key_path.starts_with('/') {
        key_path.to_string()
    } else {
        format!("/{key_path}")
    }
}

fn extract_partition_key<'a>(document: &'a Value, key_path: &str) -> DocDbResult<&'a Value> {
    document
        .pointer(key_path)
        .filter(|value| !value.is_null())
        .ok_or_else(|| {
            DocDbError::InvalidArgument(format!("document has no partition key at {key_path}"))
        })
}

fn key_text(key: &Value) -> String {
    match key {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn ring_hash(bytes: &[u8]) -> u64 {
    let digest = blake3::hash(bytes);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(prefix)
}

/// Consistent-hash resolver: each collection owns `virtual_nodes` points on
/// a ring and a key belongs to the first point at or after its hash.
#[derive(Clone, Debug)]
pub struct HashPartitionResolver {
    key_path: String,
    collection_links: Vec<String>,
    ring: Vec<(u64, usize)>,
}

impl HashPartitionResolver {
    pub const DEFAULT_VIRTUAL_NODES: usize = 128;

    pub fn new(
        key_path: &str,
        collection_links: Vec<String>,
        virtual_nodes: usize,
    ) -> DocDbResult<Self> {
        if collection_links.is_empty() {
            return Err(DocDbError::InvalidArgument(
                "hash resolver needs at least one collection".to_string(),
            ));
        }
        if virtual_nodes == 0 {
            return Err(DocDbError::InvalidArgument(
                "virtual_nodes must be positive".to_string(),
            ));
        }
        let mut ring = Vec::with_capacity(collection_links.len() * virtual_nodes);
        for (index, link) in collection_links.iter().enumerate() {
            for node in 0..virtual_nodes {
                ring.push((ring_hash(format!("{link}#{node}").as_bytes()), index));
            }
        }
        ring.sort_unstable();
        Ok(Self {
            key_path: normalize_key_path(key_path),
            collection_links,
            ring,
        })
    }

    pub fn collection_for_key(&self, key: &Value) -> &str {
        let hash = ring_hash(key_text(key).as_bytes());
        let position = self.ring.partition_point(|(point, _)| *point < hash);
        let (_, index) = self.ring[position % self.ring.len()];
        &self.collection_links[index]
    }
}

impl PartitionResolver for HashPartitionResolver {
    fn resolve_for_create(&self, document: &Value) -> DocDbResult<String> {
        let key = extract_partition_key(document, &self.key_path)?;
        Ok(self.collection_for_key(key).to_string())
    }

    fn resolve_for_read(&self, partition_key: Option<&Value>) -> DocDbResult<Vec<String>> {
        match partition_key {
            Some(key) => Ok(vec![self.collection_for_key(key).to_string()]),
            None => Ok(self.collection_links.clone()),
        }
    }
}

/// Half-open key range `[low, high)` owned by one collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionRange {
    pub low: String,
    pub high: String,
    pub collection_link: String,
}

impl PartitionRange {
    pub fn new(
        low: impl Into<String>,
        high: impl Into<String>,
        collection_link: impl Into<String>,
    ) -> Self {
        Self {
            low: low.into(),
            high: high.into(),
            collection_link: collection_link.into(),
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.low.as_str() <= key && key < self.high.as_str()
    }
}

/// Range resolver over string keys, in declaration order.
#[derive(Clone, Debug)]
pub struct RangePartitionResolver {
    key_path: String,
    ranges: Vec<PartitionRange>,
}

impl RangePartitionResolver {
    pub fn new(key_path: &str, ranges: Vec<PartitionRange>) -> DocDbResult<Self> {
        if ranges.is_empty() {
            return Err(DocDbError::InvalidArgument(
                "range resolver needs at least one range".to_string(),
            ));
        }
        if let Some(range) = ranges.iter().find(|range| range.low >= range.high) {
            return Err(DocDbError::InvalidArgument(format!(
                "range [{}, {}) is empty",
                range.low, range.high
            )));
        }
        Ok(Self {
            key_path: normalize_key_path(key_path),
            ranges,
        })
    }

    fn range_for(&self, key: &Value) -> DocDbResult<&PartitionRange> {
        let key = key_text(key);
        self.ranges
            .iter()
            .find(|range| range.contains(&key))
            .ok_or_else(|| {
                DocDbError::InvalidArgument(format!("no partition range contains key {key}"))
            })
    }
}

impl PartitionResolver for RangePartitionResolver {
    fn resolve_for_create(&self, document: &Value) -> DocDbResult<String> {
        let key = extract_partition_key(document, &self.key_path)?;
        Ok(self.range_for(key)?.collection_link.clone())
    }

    fn resolve_for_read(&self, partition_key: Option<&Value>) -> DocDbResult<Vec<String>> {
        if let Some(key) = partition_key {
            return Ok(vec![self.range_for(key)?.collection_link.clone()]);
        }
        let mut links: Vec<String> = Vec::with_capacity(self.ranges.len());
        for range in &self.ranges {
            if !links.contains(&range.collection_link) {
                links.push(range.collection_link.clone());
            }
        }
        Ok(links)
    }
}
