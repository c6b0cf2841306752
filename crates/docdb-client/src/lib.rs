#![doc = r#"
Client core for an HTTP document database.

Every operation flows through one pipeline on [`DocDbClient::execute`]:

| Step | Module | Behavior |
| --- | --- | --- |
| Route | `partition` | Database links are mapped to collection links by the registered resolver |
| Attach session | `session` | Ambient `x-ms-session-token` is set unless the caller set one or consistency is not Session |
| Send | `transport` | `GatewayTransport::execute`; `docdb-gateway` provides the reqwest implementation |
| Classify | `errors` | Status and sub-status map to a `DocDbError` variant |
| Retry | `retry` | Throttling, stale sessions and transport failures back off and resend |
| Capture | `session` | Returned tokens merge into the store; a collection delete clears it |
| Page | `feed` | Continuations drive `FeedIterator`; database links fan out via `PartitionedFeed` |

Implementation notes:
- Session tokens are merged per partition range, keeping the highest LSN, so concurrent captures never regress.
- A server `x-ms-retry-after-ms` hint replaces the computed backoff for that attempt.
- Feeds are forward-only; resume by seeding `FeedOptions::request_continuation`.
"#]

pub mod client;
pub mod config;
pub mod errors;
pub mod feed;
pub mod headers;
pub mod links;
pub mod partition;
pub mod retry;
pub mod session;
pub mod testing;
pub mod transport;
pub mod types;

pub use client::{AccessCondition, DocDbClient, RequestOptions, validate_resource_id};
pub use config::ClientConfig;
pub use errors::{DocDbError, DocDbResult, ErrorKind};
pub use feed::{
    Feed, FeedIterator, FeedOptions, FeedPage, PartitionedFeed, SqlParameter, SqlQuerySpec,
    collect_all, into_stream,
};
pub use headers::Headers;
pub use partition::{
    HashPartitionResolver, PartitionRange, PartitionResolver, PartitionResolverRegistry,
    RangePartitionResolver,
};
pub use retry::{RetryBackoffConfig, RetryContext, RetryDecision, RetryPolicy, run_with_retry};
pub use session::{SessionToken, SessionTokenSet, SessionTokenStore};
pub use testing::{MockGateway, MockOutcome};
pub use transport::GatewayTransport;
pub use types::{ConsistencyLevel, OperationType, Request, ResourceType, Response};
pub use tokio_util::sync::CancellationToken;
