use std::sync::Arc;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::errors::{DocDbError, DocDbResult};
use crate::feed::{Feed, FeedIterator, FeedOptions, PageTemplate, PartitionedFeed, SqlQuerySpec};
use crate::headers::{self, Headers};
use crate::links;
use crate::partition::{PartitionResolver, PartitionResolverRegistry};
use crate::retry;
use crate::session::{self, SessionTokenStore};
use crate::transport::GatewayTransport;
use crate::types::{ConsistencyLevel, OperationType, Request, ResourceType, Response};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessCondition {
    IfMatch(String),
    IfNoneMatch(String),
}

/// Per-request overrides.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestOptions {
    pub access_condition: Option<AccessCondition>,
    pub consistency_level: Option<ConsistencyLevel>,
    pub session_token: Option<String>,
    pub partition_key: Option<Value>,
}

impl RequestOptions {
    pub(crate) fn apply_to(&self, headers: &mut Headers) {
        match &self.access_condition {
            Some(AccessCondition::IfMatch(etag)) => {
                headers.insert(headers::IF_MATCH, etag.clone());
            }
            Some(AccessCondition::IfNoneMatch(etag)) => {
                headers.insert(headers::IF_NONE_MATCH, etag.clone());
            }
            None => {}
        }
        if let Some(level) = self.consistency_level {
            headers.insert(headers::CONSISTENCY_LEVEL, level.as_str());
        }
        if let Some(token) = self.session_token.as_deref().filter(|t| !t.is_empty()) {
            headers.insert(headers::SESSION_TOKEN, token);
        }
        if let Some(key) = &self.partition_key {
            headers.insert(headers::PARTITION_KEY, json!([key]).to_string());
        }
    }
}

/// Entry point for every operation against the service.
///
/// Each request goes through the same pipeline: the ambient session token is
/// attached, the transport is called under the retry policy, and the
/// response's session token is captured. Cloning is cheap and clones share
/// session state and resolver registrations.
#[derive(Clone)]
pub struct DocDbClient {
    transport: Arc<dyn GatewayTransport>,
    sessions: Arc<SessionTokenStore>,
    resolvers: Arc<PartitionResolverRegistry>,
    config: ClientConfig,
}

impl std::fmt::Debug for DocDbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocDbClient")
            .field("sessions", &self.sessions.len())
            .field("resolvers", &self.resolvers)
            .field("config", &self.config)
            .finish()
    }
}

impl DocDbClient {
    pub fn new(transport: Arc<dyn GatewayTransport>, config: ClientConfig) -> Self {
        Self::with_components(
            transport,
            config,
            Arc::new(SessionTokenStore::new()),
            Arc::new(PartitionResolverRegistry::new()),
        )
    }

    /// Builds a client around existing session state, e.g. one restored with
    /// [`SessionTokenStore::load`].
    pub fn with_components(
        transport: Arc<dyn GatewayTransport>,
        config: ClientConfig,
        sessions: Arc<SessionTokenStore>,
        resolvers: Arc<PartitionResolverRegistry>,
    ) -> Self {
        Self {
            transport,
            sessions,
            resolvers,
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session_store(&self) -> &Arc<SessionTokenStore> {
        &self.sessions
    }

    pub fn partition_resolvers(&self) -> &Arc<PartitionResolverRegistry> {
        &self.resolvers
    }

    pub fn register_partition_resolver(
        &self,
        database_link: &str,
        resolver: Arc<dyn PartitionResolver>,
    ) -> DocDbResult<()> {
        self.resolvers.register(database_link, resolver)
    }

    pub fn partition_resolver(&self, database_link: &str) -> Option<Arc<dyn PartitionResolver>> {
        self.resolvers.lookup(database_link)
    }

    /// Sends one request through the session and retry pipeline.
    ///
    /// Non-success statuses come back as typed errors. A successful delete of
    /// a collection drops its session state; every other success records the
    /// returned session token.
    pub async fn execute(
        &self,
        mut request: Request,
        cancel: &CancellationToken,
    ) -> DocDbResult<Response> {
        session::apply_session_token(&self.sessions, &mut request, self.config.default_consistency)?;

        let transport = Arc::clone(&self.transport);
        let response = retry::run_with_retry(&self.config.retry, cancel, request.clone(), |attempt| {
            let transport = Arc::clone(&transport);
            async move { transport.execute(&attempt).await?.into_result() }
        })
        .await?;

        tracing::debug!(
            operation = ?request.operation,
            path = %request.path,
            status = response.status,
            "request completed"
        );

        if request.operation == OperationType::Delete
            && request.resource_type == ResourceType::DocumentCollection
        {
            self.sessions.clear(&request, &response);
        } else if let Err(err) = self.sessions.capture(&request, &response) {
            // The operation already succeeded on the server.
            tracing::warn!(path = %request.path, error = %err, "ignoring malformed session token");
        }
        Ok(response)
    }

    pub async fn create(&self, request: Request, cancel: &CancellationToken) -> DocDbResult<Response> {
        self.execute(with_operation(request, OperationType::Create), cancel)
            .await
    }

    pub async fn upsert(&self, request: Request, cancel: &CancellationToken) -> DocDbResult<Response> {
        let request = with_operation(request, OperationType::Upsert).with_header(headers::IS_UPSERT, "true");
        self.execute(request, cancel).await
    }

    pub async fn read(&self, request: Request, cancel: &CancellationToken) -> DocDbResult<Response> {
        self.execute(with_operation(request, OperationType::Read), cancel)
            .await
    }

    pub async fn replace(&self, request: Request, cancel: &CancellationToken) -> DocDbResult<Response> {
        self.execute(with_operation(request, OperationType::Replace), cancel)
            .await
    }

    pub async fn delete(&self, request: Request, cancel: &CancellationToken) -> DocDbResult<Response> {
        self.execute(with_operation(request, OperationType::Delete), cancel)
            .await
    }

    /// Creates a document in the collection the link resolves to.
    ///
    /// `link` may name a collection directly or a database with a registered
    /// partition resolver. A missing `id` is generated unless
    /// `disable_automatic_id_generation` is set.
    pub async fn create_document(
        &self,
        link: &str,
        document: Value,
        options: &RequestOptions,
        disable_automatic_id_generation: bool,
        cancel: &CancellationToken,
    ) -> DocDbResult<Response> {
        let request = self.document_write_request(
            OperationType::Create,
            link,
            document,
            options,
            disable_automatic_id_generation,
        )?;
        self.create(request, cancel).await
    }

    pub async fn upsert_document(
        &self,
        link: &str,
        document: Value,
        options: &RequestOptions,
        disable_automatic_id_generation: bool,
        cancel: &CancellationToken,
    ) -> DocDbResult<Response> {
        let request = self.document_write_request(
            OperationType::Upsert,
            link,
            document,
            options,
            disable_automatic_id_generation,
        )?;
        self.upsert(request, cancel).await
    }

    /// Reads one resource by link, e.g. `dbs/db/colls/c/docs/d1`.
    pub async fn read_resource(
        &self,
        resource_type: ResourceType,
        link: &str,
        options: &RequestOptions,
        cancel: &CancellationToken,
    ) -> DocDbResult<Response> {
        let request = resource_request(OperationType::Read, resource_type, link, None, options)?;
        self.read(request, cancel).await
    }

    pub async fn replace_resource(
        &self,
        resource_type: ResourceType,
        link: &str,
        resource: Value,
        options: &RequestOptions,
        cancel: &CancellationToken,
    ) -> DocDbResult<Response> {
        if let Some(id) = resource.get("id").and_then(Value::as_str) {
            validate_resource_id(id)?;
        }
        let request =
            resource_request(OperationType::Replace, resource_type, link, Some(resource), options)?;
        self.replace(request, cancel).await
    }

    pub async fn delete_resource(
        &self,
        resource_type: ResourceType,
        link: &str,
        options: &RequestOptions,
        cancel: &CancellationToken,
    ) -> DocDbResult<Response> {
        let request = resource_request(OperationType::Delete, resource_type, link, None, options)?;
        self.delete(request, cancel).await
    }

    /// Feed of the `resource_type` children under `parent_link`.
    pub fn read_feed(
        &self,
        parent_link: &str,
        resource_type: ResourceType,
        options: &FeedOptions,
        cancel: CancellationToken,
    ) -> FeedIterator {
        let template = PageTemplate {
            operation: OperationType::ReadFeed,
            resource_type,
            headers: options.page_headers(),
            body: None,
        };
        FeedIterator::from_request(self.clone(), seeded(template.request_for(parent_link), options), cancel)
    }

    pub fn query(
        &self,
        parent_link: &str,
        resource_type: ResourceType,
        query: &SqlQuerySpec,
        options: &FeedOptions,
        cancel: CancellationToken,
    ) -> DocDbResult<FeedIterator> {
        let template = query_template(resource_type, query, options)?;
        Ok(FeedIterator::from_request(
            self.clone(),
            seeded(template.request_for(parent_link), options),
            cancel,
        ))
    }

    /// Document feed over a collection, or over every collection a database's
    /// resolver selects for `partition_key`.
    pub fn read_documents(
        &self,
        link: &str,
        options: &FeedOptions,
        partition_key: Option<&Value>,
        cancel: CancellationToken,
    ) -> DocDbResult<Box<dyn Feed>> {
        let template = PageTemplate {
            operation: OperationType::ReadFeed,
            resource_type: ResourceType::Document,
            headers: options.page_headers(),
            body: None,
        };
        self.document_feed(link, template, options, partition_key, cancel)
    }

    pub fn query_documents(
        &self,
        link: &str,
        query: &SqlQuerySpec,
        options: &FeedOptions,
        partition_key: Option<&Value>,
        cancel: CancellationToken,
    ) -> DocDbResult<Box<dyn Feed>> {
        let template = query_template(ResourceType::Document, query, options)?;
        self.document_feed(link, template, options, partition_key, cancel)
    }

    fn document_feed(
        &self,
        link: &str,
        mut template: PageTemplate,
        options: &FeedOptions,
        partition_key: Option<&Value>,
        cancel: CancellationToken,
    ) -> DocDbResult<Box<dyn Feed>> {
        if links::trim_slashes(link.trim()).is_empty() {
            return Err(DocDbError::InvalidArgument(
                "collection or database link must not be empty".to_string(),
            ));
        }
        if links::is_database_link(link) {
            let collection_links = self.resolvers.route_for_read(link, partition_key)?;
            tracing::debug!(
                database = %links::trim_slashes(link),
                collections = collection_links.len(),
                "fanning out feed across collections"
            );
            return Ok(Box::new(PartitionedFeed::new(
                self.clone(),
                template,
                collection_links,
                options.request_continuation.clone(),
                cancel,
            )));
        }

        if let Some(key) = partition_key {
            template
                .headers
                .insert(headers::PARTITION_KEY, json!([key]).to_string());
        }
        Ok(Box::new(FeedIterator::from_request(
            self.clone(),
            seeded(template.request_for(link), options),
            cancel,
        )))
    }

    fn document_write_request(
        &self,
        operation: OperationType,
        link: &str,
        mut document: Value,
        options: &RequestOptions,
        disable_automatic_id_generation: bool,
    ) -> DocDbResult<Request> {
        let collection_link = self.resolvers.route_for_write(link, &document)?;
        let Some(fields) = document.as_object_mut() else {
            return Err(DocDbError::InvalidArgument(
                "document must be a JSON object".to_string(),
            ));
        };

        match fields.get("id").cloned() {
            Some(Value::String(id)) => validate_resource_id(&id)?,
            Some(Value::Null) | None if !disable_automatic_id_generation => {
                fields.insert("id".to_string(), Value::String(uuid::Uuid::new_v4().to_string()));
            }
            Some(Value::Null) | None => {
                return Err(DocDbError::InvalidArgument(
                    "document has no id and automatic id generation is disabled".to_string(),
                ));
            }
            Some(_) => {
                return Err(DocDbError::InvalidArgument(
                    "document id must be a string".to_string(),
                ));
            }
        }

        let mut request = Request::new(
            operation,
            ResourceType::Document,
            links::join_path(&collection_link, ResourceType::Document.path_segment()),
        )
        .with_body(document);
        options.apply_to(&mut request.headers);
        Ok(request)
    }
}

fn with_operation(mut request: Request, operation: OperationType) -> Request {
    request.operation = operation;
    request
}

fn seeded(mut request: Request, options: &FeedOptions) -> Request {
    if let Some(continuation) = options
        .request_continuation
        .as_deref()
        .filter(|c| !c.trim().is_empty())
    {
        request.headers.insert(headers::CONTINUATION, continuation);
    }
    request
}

fn query_template(
    resource_type: ResourceType,
    query: &SqlQuerySpec,
    options: &FeedOptions,
) -> DocDbResult<PageTemplate> {
    query.validate()?;
    let mut headers = options.page_headers();
    headers.insert(headers::IS_QUERY, "true");
    headers.insert(headers::CONTENT_TYPE, headers::QUERY_CONTENT_TYPE);
    Ok(PageTemplate {
        operation: OperationType::Query,
        resource_type,
        headers,
        body: Some(serde_json::to_value(query)?),
    })
}

fn resource_request(
    operation: OperationType,
    resource_type: ResourceType,
    link: &str,
    body: Option<Value>,
    options: &RequestOptions,
) -> DocDbResult<Request> {
    if links::trim_slashes(link.trim()).is_empty() {
        return Err(DocDbError::InvalidArgument(
            "resource link must not be empty".to_string(),
        ));
    }
    let mut request = Request::new(operation, resource_type, links::trim_slashes(link));
    request.body = body;
    options.apply_to(&mut request.headers);
    Ok(request)
}

/// Ids become path segments, so separators and a trailing space are rejected.
pub fn validate_resource_id(id: &str) -> DocDbResult<()> {
    if id.is_empty() {
        return Err(DocDbError::InvalidArgument("id must not be empty".to_string()));
    }
    if id.contains(['/', '\\', '?', '#']) {
        return Err(DocDbError::InvalidArgument(format!(
            "id contains invalid character: {id}"
        )));
    }
    if id.ends_with(' ') {
        return Err(DocDbError::InvalidArgument(format!(
            "id ends with a space: {id:?}"
        )));
    }
    Ok(())
}
