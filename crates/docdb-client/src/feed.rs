//! Paginated reads and queries.
//!
//! A feed is pulled page by page: each fetch sends the stored continuation,
//! buffers the returned items and keeps the new continuation. An absent or
//! empty continuation means the feed is drained. Feeds are forward-only; to
//! resume later, persist [`Feed::current_continuation_token`] and start a new
//! feed seeded with it.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::client::DocDbClient;
use crate::errors::{DocDbError, DocDbResult};
use crate::headers::{self, Headers};
use crate::links;
use crate::types::{OperationType, Request, ResourceType};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeedOptions {
    pub page_size: Option<u32>,
    pub request_continuation: Option<String>,
    pub session_token: Option<String>,
    pub enable_scan_in_query: Option<bool>,
    pub enable_cross_partition_query: Option<bool>,
}

impl FeedOptions {
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_continuation(mut self, continuation: impl Into<String>) -> Self {
        self.request_continuation = Some(continuation.into());
        self
    }

    /// Headers shared by every page request; the continuation is tracked by
    /// the feed itself.
    pub(crate) fn page_headers(&self) -> Headers {
        let mut headers = Headers::new();
        if let Some(page_size) = self.page_size {
            headers.insert(headers::PAGE_SIZE, page_size.to_string());
        }
        if let Some(token) = self.session_token.as_deref().filter(|t| !t.is_empty()) {
            headers.insert(headers::SESSION_TOKEN, token);
        }
        if let Some(scan) = self.enable_scan_in_query {
            headers.insert(headers::ENABLE_SCAN_IN_QUERY, scan.to_string());
        }
        if let Some(cross) = self.enable_cross_partition_query {
            headers.insert(headers::ENABLE_CROSS_PARTITION_QUERY, cross.to_string());
        }
        headers
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlParameter {
    pub name: String,
    pub value: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlQuerySpec {
    pub query: String,
    #[serde(default)]
    pub parameters: Vec<SqlParameter>,
}

impl SqlQuerySpec {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameters.push(SqlParameter {
            name: name.into(),
            value,
        });
        self
    }

    pub(crate) fn validate(&self) -> DocDbResult<()> {
        if self.query.trim().is_empty() {
            return Err(DocDbError::InvalidArgument(
                "query text must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// One page as returned by the service.
#[derive(Clone, Debug, PartialEq)]
pub struct FeedPage {
    pub items: Vec<Value>,
    pub continuation: Option<String>,
    pub request_charge: Option<f64>,
}

#[async_trait]
pub trait Feed: Send {
    /// True when another item is available, fetching pages as needed.
    async fn has_next(&mut self) -> DocDbResult<bool>;

    async fn next(&mut self) -> DocDbResult<Option<Value>>;

    /// Continuation of the page after the one currently buffered.
    fn current_continuation_token(&self) -> Option<&str>;
}

#[async_trait]
impl<F> Feed for Box<F>
where
    F: Feed + ?Sized,
{
    async fn has_next(&mut self) -> DocDbResult<bool> {
        (**self).has_next().await
    }

    async fn next(&mut self) -> DocDbResult<Option<Value>> {
        (**self).next().await
    }

    fn current_continuation_token(&self) -> Option<&str> {
        (**self).current_continuation_token()
    }
}

/// Lazily yields every item; an error is yielded once and ends the stream.
pub fn into_stream<F>(feed: F) -> BoxStream<'static, DocDbResult<Value>>
where
    F: Feed + 'static,
{
    stream::unfold(Some(feed), |feed| async move {
        let mut feed = feed?;
        match feed.next().await {
            Ok(Some(item)) => Some((Ok(item), Some(feed))),
            Ok(None) => None,
            Err(error) => Some((Err(error), None)),
        }
    })
    .boxed()
}

/// Drains a feed into memory.
pub async fn collect_all<F>(feed: &mut F) -> DocDbResult<Vec<Value>>
where
    F: Feed + ?Sized,
{
    let mut items = Vec::new();
    while let Some(item) = feed.next().await? {
        items.push(item);
    }
    Ok(items)
}

/// Feed over a single collection or sub-resource path.
pub struct FeedIterator {
    client: DocDbClient,
    request: Request,
    continuation: Option<String>,
    exhausted: bool,
    buffered: VecDeque<Value>,
    cancel: CancellationToken,
}

impl FeedIterator {
    /// Starts a feed from a fully built page request. A continuation header
    /// on the request seeds the first fetch.
    pub fn from_request(client: DocDbClient, mut request: Request, cancel: CancellationToken) -> Self {
        let continuation = request
            .headers
            .remove(headers::CONTINUATION)
            .filter(|value| !value.trim().is_empty());
        Self {
            client,
            request,
            continuation,
            exhausted: false,
            buffered: VecDeque::new(),
            cancel,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted && self.buffered.is_empty()
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    async fn fetch_page(&mut self) -> DocDbResult<FeedPage> {
        if self.cancel.is_cancelled() {
            self.exhausted = true;
            return Err(DocDbError::Cancelled);
        }
        let mut page_request = self.request.clone();
        if let Some(continuation) = &self.continuation {
            page_request
                .headers
                .insert(headers::CONTINUATION, continuation.clone());
        }

        let result = self
            .client
            .execute(page_request, &self.cancel)
            .await
            .and_then(|response| {
                let items = response.feed_items(self.request.resource_type)?;
                Ok(FeedPage {
                    items,
                    continuation: response.continuation().map(str::to_string),
                    request_charge: response.request_charge(),
                })
            });

        match result {
            Ok(page) => {
                tracing::debug!(
                    path = %self.request.path,
                    items = page.items.len(),
                    has_more = page.continuation.is_some(),
                    "fetched feed page"
                );
                self.continuation = page.continuation.clone();
                if self.continuation.is_none() {
                    self.exhausted = true;
                }
                Ok(page)
            }
            Err(error) => {
                self.exhausted = true;
                Err(error)
            }
        }
    }

    /// Returns the buffered remainder if any, otherwise fetches one page.
    pub async fn next_page(&mut self) -> DocDbResult<Option<FeedPage>> {
        if !self.buffered.is_empty() {
            return Ok(Some(FeedPage {
                items: self.buffered.drain(..).collect(),
                continuation: self.continuation.clone(),
                request_charge: None,
            }));
        }
        if self.exhausted {
            return Ok(None);
        }
        self.fetch_page().await.map(Some)
    }
}

#[async_trait]
impl Feed for FeedIterator {
    async fn has_next(&mut self) -> DocDbResult<bool> {
        // Pages may be empty while the continuation is still set.
        while self.buffered.is_empty() && !self.exhausted {
            let page = self.fetch_page().await?;
            self.buffered.extend(page.items);
        }
        Ok(!self.buffered.is_empty())
    }

    async fn next(&mut self) -> DocDbResult<Option<Value>> {
        if !self.has_next().await? {
            return Ok(None);
        }
        Ok(self.buffered.pop_front())
    }

    fn current_continuation_token(&self) -> Option<&str> {
        self.continuation.as_deref()
    }
}

/// What each per-collection feed of a fan-out sends.
#[derive(Clone, Debug)]
pub(crate) struct PageTemplate {
    pub operation: OperationType,
    pub resource_type: ResourceType,
    pub headers: Headers,
    pub body: Option<Value>,
}

impl PageTemplate {
    pub fn request_for(&self, parent_link: &str) -> Request {
        Request {
            operation: self.operation,
            resource_type: self.resource_type,
            path: links::join_path(parent_link, self.resource_type.path_segment()),
            resource_id: None,
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }
}

/// Feed over several collections, visited one after another in resolver order.
///
/// A single continuation cannot describe a position across collections: a
/// seed continuation applies to the first collection only and every later
/// collection starts from its beginning.
pub struct PartitionedFeed {
    client: DocDbClient,
    template: PageTemplate,
    pending: VecDeque<String>,
    current: Option<(String, FeedIterator)>,
    seed_continuation: Option<String>,
    failed: bool,
    cancel: CancellationToken,
}

impl PartitionedFeed {
    pub(crate) fn new(
        client: DocDbClient,
        template: PageTemplate,
        collection_links: Vec<String>,
        seed_continuation: Option<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            template,
            pending: collection_links.into(),
            current: None,
            seed_continuation,
            failed: false,
            cancel,
        }
    }

    /// Collection whose feed is currently being read.
    pub fn current_collection_link(&self) -> Option<&str> {
        self.current.as_ref().map(|(link, _)| link.as_str())
    }

    pub fn remaining_collections(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait]
impl Feed for PartitionedFeed {
    async fn has_next(&mut self) -> DocDbResult<bool> {
        // An error ends the whole sequence, not just the current collection.
        if self.failed {
            return Ok(false);
        }
        loop {
            if let Some((_, feed)) = self.current.as_mut() {
                match feed.has_next().await {
                    Ok(true) => return Ok(true),
                    Ok(false) => {}
                    Err(error) => {
                        self.failed = true;
                        return Err(error);
                    }
                }
            }
            let Some(link) = self.pending.pop_front() else {
                return Ok(false);
            };
            if self.cancel.is_cancelled() {
                self.failed = true;
                return Err(DocDbError::Cancelled);
            }
            let mut request = self.template.request_for(&link);
            if let Some(continuation) = self.seed_continuation.take() {
                request.headers.insert(headers::CONTINUATION, continuation);
            }
            let feed = FeedIterator::from_request(self.client.clone(), request, self.cancel.clone());
            self.current = Some((link, feed));
        }
    }

    async fn next(&mut self) -> DocDbResult<Option<Value>> {
        if !self.has_next().await? {
            return Ok(None);
        }
        let result = match self.current.as_mut() {
            Some((_, feed)) => feed.next().await,
            None => Ok(None),
        };
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn current_continuation_token(&self) -> Option<&str> {
        self.current
            .as_ref()
            .and_then(|(_, feed)| feed.current_continuation_token())
    }
}
