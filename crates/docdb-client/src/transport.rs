use async_trait::async_trait;

use crate::errors::DocDbResult;
use crate::types::{Request, Response};

/// The HTTP hop to the service.
///
/// Implementations return `Ok` for every response the service produced,
/// whatever its status; `Err` is reserved for failures where no response
/// arrived (connection reset, timeout), reported as
/// [`DocDbError::TransientTransport`](crate::DocDbError::TransientTransport).
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    async fn execute(&self, request: &Request) -> DocDbResult<Response>;
}

#[async_trait]
impl<T> GatewayTransport for std::sync::Arc<T>
where
    T: GatewayTransport + ?Sized,
{
    async fn execute(&self, request: &Request) -> DocDbResult<Response> {
        (**self).execute(request).await
    }
}
