use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{DocDbError, DocDbResult};
use crate::headers::{self, Headers};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    Create,
    Upsert,
    Read,
    ReadFeed,
    Query,
    Replace,
    Delete,
}

impl OperationType {
    pub fn is_feed(self) -> bool {
        matches!(self, Self::ReadFeed | Self::Query)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    Database,
    DocumentCollection,
    Document,
    StoredProcedure,
    Trigger,
    UserDefinedFunction,
    Attachment,
    Conflict,
    User,
    Permission,
    Offer,
}

impl ResourceType {
    /// Path segment that addresses a feed of this resource type.
    pub fn path_segment(self) -> &'static str {
        match self {
            Self::Database => "dbs",
            Self::DocumentCollection => "colls",
            Self::Document => "docs",
            Self::StoredProcedure => "sprocs",
            Self::Trigger => "triggers",
            Self::UserDefinedFunction => "udfs",
            Self::Attachment => "attachments",
            Self::Conflict => "conflicts",
            Self::User => "users",
            Self::Permission => "permissions",
            Self::Offer => "offers",
        }
    }

    /// Body key under which a feed response lists its items.
    pub fn feed_key(self) -> &'static str {
        match self {
            Self::Database => "Databases",
            Self::DocumentCollection => "DocumentCollections",
            Self::Document => "Documents",
            Self::StoredProcedure => "StoredProcedures",
            Self::Trigger => "Triggers",
            Self::UserDefinedFunction => "UserDefinedFunctions",
            Self::Attachment => "Attachments",
            Self::Conflict => "Conflicts",
            Self::User => "Users",
            Self::Permission => "Permissions",
            Self::Offer => "Offers",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsistencyLevel {
    Strong,
    BoundedStaleness,
    Session,
    Eventual,
    ConsistentPrefix,
}

impl ConsistencyLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strong => "Strong",
            Self::BoundedStaleness => "BoundedStaleness",
            Self::Session => "Session",
            Self::Eventual => "Eventual",
            Self::ConsistentPrefix => "ConsistentPrefix",
        }
    }
}

impl fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsistencyLevel {
    type Err = DocDbError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strong" => Ok(Self::Strong),
            "boundedstaleness" => Ok(Self::BoundedStaleness),
            "session" => Ok(Self::Session),
            "eventual" => Ok(Self::Eventual),
            "consistentprefix" => Ok(Self::ConsistentPrefix),
            other => Err(DocDbError::InvalidArgument(format!(
                "unknown consistency level: {other}"
            ))),
        }
    }
}

/// An operation as produced by the request-builder layer.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub operation: OperationType,
    pub resource_type: ResourceType,
    /// Hierarchical path, e.g. `dbs/orders/colls/2024/docs`.
    pub path: String,
    /// Resource id of the collection that owns the target, when the builder knows it.
    pub resource_id: Option<String>,
    pub headers: Headers,
    pub body: Option<Value>,
}

impl Request {
    pub fn new(
        operation: OperationType,
        resource_type: ResourceType,
        path: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            resource_type,
            path: path.into(),
            resource_id: None,
            headers: Headers::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn session_token(&self) -> Option<&str> {
        self.headers.get_non_empty(headers::SESSION_TOKEN)
    }

    pub fn continuation(&self) -> Option<&str> {
        self.headers.get_non_empty(headers::CONTINUATION)
    }

    /// Consistency override set on this request, if any.
    pub fn consistency_override(&self) -> DocDbResult<Option<ConsistencyLevel>> {
        self.headers
            .get_non_empty(headers::CONSISTENCY_LEVEL)
            .map(str::parse)
            .transpose()
    }
}

/// Result of one gateway call.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: Value,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Value::Null,
        }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(200).with_body(body)
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn session_token(&self) -> Option<&str> {
        self.headers.get_non_empty(headers::SESSION_TOKEN)
    }

    /// Continuation for the next page; an empty header means the feed is drained.
    pub fn continuation(&self) -> Option<&str> {
        self.headers.get_non_empty(headers::CONTINUATION)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.headers
            .get_non_empty(headers::RETRY_AFTER_MS)
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
    }

    pub fn sub_status(&self) -> Option<u32> {
        self.headers
            .get_non_empty(headers::SUB_STATUS)
            .and_then(|value| value.trim().parse::<u32>().ok())
    }

    pub fn request_charge(&self) -> Option<f64> {
        self.headers
            .get_non_empty(headers::REQUEST_CHARGE)
            .and_then(|value| value.trim().parse::<f64>().ok())
    }

    /// Items of a feed page for the given resource type.
    pub fn feed_items(&self, resource_type: ResourceType) -> DocDbResult<Vec<Value>> {
        match self.body.get(resource_type.feed_key()) {
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(_) => Err(DocDbError::Serialization(format!(
                "feed key {} is not an array",
                resource_type.feed_key()
            ))),
            None if self.body.is_null() => Ok(Vec::new()),
            None => Err(DocDbError::Serialization(format!(
                "feed response is missing {}",
                resource_type.feed_key()
            ))),
        }
    }

    /// Turns a non-success response into the matching error.
    pub fn into_result(self) -> DocDbResult<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let message = match &self.body {
            Value::Object(map) => map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| self.body.to_string()),
            Value::String(text) => text.clone(),
            Value::Null => format!("status {}", self.status),
            other => other.to_string(),
        };
        Err(DocDbError::from_status(
            self.status,
            self.sub_status(),
            self.retry_after(),
            message,
        ))
    }
}
