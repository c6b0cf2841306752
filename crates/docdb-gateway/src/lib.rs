#![doc = r#"
HTTP transport for `docdb-client`.

| Operation | HTTP method |
| --- | --- |
| `Create`, `Upsert`, `Query` | `POST` |
| `Read`, `ReadFeed` | `GET` |
| `Replace` | `PUT` |
| `Delete` | `DELETE` |

Implementation notes:
- Request headers are forwarded verbatim; `x-ms-version` and `x-ms-date` are added on every call.
- Every HTTP status is returned as a `Response`; classification happens in the client pipeline.
- Only failures where no response arrived become `TransientTransport` errors.
"#]

pub mod config;
pub mod gateway;

pub use config::{DEFAULT_API_VERSION, DEFAULT_ENDPOINT, GatewayConfig};
pub use gateway::{DATE_HEADER, ReqwestGateway, VERSION_HEADER};
