use async_trait::async_trait;
use docdb_client::{
    DocDbError, DocDbResult, GatewayTransport, Headers, OperationType, Request, Response, headers,
};
use reqwest::Method;
use serde_json::Value;

use crate::config::GatewayConfig;

pub const VERSION_HEADER: &str = "x-ms-version";
pub const DATE_HEADER: &str = "x-ms-date";

/// [`GatewayTransport`] over HTTPS with reqwest.
#[derive(Clone, Debug)]
pub struct ReqwestGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl ReqwestGateway {
    pub fn new(config: GatewayConfig) -> DocDbResult<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(DocDbError::Configuration(
                "gateway endpoint must not be empty".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|err| DocDbError::Configuration(format!("http client build failed: {err}")))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> DocDbResult<Self> {
        Self::new(GatewayConfig::from_env())
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

pub(crate) fn method_for(operation: OperationType) -> Method {
    match operation {
        OperationType::Create | OperationType::Upsert | OperationType::Query => Method::POST,
        OperationType::Read | OperationType::ReadFeed => Method::GET,
        OperationType::Replace => Method::PUT,
        OperationType::Delete => Method::DELETE,
    }
}

pub(crate) fn rfc1123_now() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

pub(crate) fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Requests that could not be built (bad header value, bad URL) never reach
/// the wire and fail the same way on every attempt.
pub(crate) fn send_error(err: reqwest::Error, method: &Method, path: &str) -> DocDbError {
    if err.is_builder() {
        return DocDbError::InvalidArgument(format!("http {method} {path} rejected: {err}"));
    }
    DocDbError::TransientTransport(format!("http {method} {path} failed: {err}"))
}

#[async_trait]
impl GatewayTransport for ReqwestGateway {
    async fn execute(&self, request: &Request) -> DocDbResult<Response> {
        let method = method_for(request.operation);
        let mut builder = self.client.request(method.clone(), self.endpoint(&request.path));
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        builder = builder
            .header(VERSION_HEADER, self.config.api_version.as_str())
            .header(DATE_HEADER, rfc1123_now());
        if let Some(authorization) = &self.config.authorization {
            builder = builder.header(reqwest::header::AUTHORIZATION, authorization.as_str());
        }
        if let Some(body) = &request.body {
            if !request.headers.contains(headers::CONTENT_TYPE) {
                builder = builder.header(reqwest::header::CONTENT_TYPE, headers::JSON_CONTENT_TYPE);
            }
            builder = builder.body(serde_json::to_vec(body)?);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| send_error(err, &method, &request.path))?;
        let status = response.status().as_u16();
        let response_headers: Headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|value| (name.as_str(), value.to_string())))
            .collect();
        let text = response.text().await.map_err(|err| {
            DocDbError::TransientTransport(format!("http read body failed: {err}"))
        })?;

        tracing::debug!(%method, path = %request.path, status, "gateway responded");
        Ok(Response {
            status,
            headers: response_headers,
            body: parse_body(&text),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docdb_client::ResourceType;
    use serde_json::json;

    #[test]
    fn method_for_operations_expected_http_verbs() {
        assert_eq!(method_for(OperationType::Create), Method::POST);
        assert_eq!(method_for(OperationType::Upsert), Method::POST);
        assert_eq!(method_for(OperationType::Query), Method::POST);
        assert_eq!(method_for(OperationType::Read), Method::GET);
        assert_eq!(method_for(OperationType::ReadFeed), Method::GET);
        assert_eq!(method_for(OperationType::Replace), Method::PUT);
        assert_eq!(method_for(OperationType::Delete), Method::DELETE);
    }

    #[test]
    fn endpoint_join_expected_single_separator() {
        let gateway = ReqwestGateway::new(GatewayConfig::new("https://db.local:8081/")).unwrap();
        assert_eq!(
            gateway.endpoint("/dbs/db/colls/c/docs"),
            "https://db.local:8081/dbs/db/colls/c/docs"
        );
    }

    #[test]
    fn parse_body_expected_null_json_or_text() {
        assert_eq!(parse_body(""), Value::Null);
        assert_eq!(parse_body("{\"id\":\"d1\"}"), json!({"id": "d1"}));
        assert_eq!(parse_body("gateway down"), Value::String("gateway down".to_string()));
    }

    #[test]
    fn rfc1123_now_expected_gmt_suffix() {
        let date = rfc1123_now();
        assert!(date.ends_with(" GMT"), "{date}");
        assert_eq!(date.split(' ').count(), 6);
    }

    #[test]
    fn empty_endpoint_expected_configuration_error() {
        let err = ReqwestGateway::new(GatewayConfig::new("  ")).unwrap_err();
        assert!(matches!(err, DocDbError::Configuration(_)));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unreachable_endpoint_expected_transient_transport() {
        let mut config = GatewayConfig::new("http://127.0.0.1:1");
        config.request_timeout_ms = 2_000;
        let gateway = ReqwestGateway::new(config).unwrap();
        let request = Request::new(OperationType::Read, ResourceType::Database, "dbs/db");
        let err = gateway.execute(&request).await.unwrap_err();
        assert!(matches!(err, DocDbError::TransientTransport(_)), "{err:?}");
        assert!(err.is_retryable());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn malformed_header_value_expected_invalid_argument() {
        let gateway = ReqwestGateway::new(GatewayConfig::new("http://127.0.0.1:1")).unwrap();
        let request = Request::new(OperationType::Read, ResourceType::Document, "dbs/db/colls/c/docs/d1")
            .with_header(headers::IF_MATCH, "bad\nvalue");
        let err = gateway.execute(&request).await.unwrap_err();
        assert!(matches!(err, DocDbError::InvalidArgument(_)), "{err:?}");
        assert!(!err.is_retryable());
    }
}
