use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Method, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use thiserror::Error;

use crate::error::TransportErrorKind;
use crate::response::Response;
use crate::util::classify_transport_error;

const DEFAULT_MAX_RESPONSE_BODY_BYTES: usize = 8 * 1024 * 1024;
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 8;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// One fully prepared delivery attempt: resolved uri, merged headers with the
/// pinned correlation id, and the request body.
#[derive(Clone, Debug)]
pub struct AttemptRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport io error ({kind}): {source}")]
    Io {
        kind: TransportErrorKind,
        #[source]
        source: BoxError,
    },
    #[error("failed to read response body: {source}")]
    BodyRead {
        #[source]
        source: BoxError,
    },
    #[error("response body exceeded {limit_bytes} bytes (got {actual_bytes})")]
    BodyTooLarge {
        limit_bytes: usize,
        actual_bytes: usize,
    },
}

/// Delivery of one prepared attempt to the downstream.
///
/// The pipeline owns correlation, timeouts, retries, and the circuit breaker;
/// implementations only send the request and buffer the response. Stub
/// transports swap in for tests and for embedders with their own wire stack.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: AttemptRequest) -> Result<Response, TransportError>;
}

type PlainHyperClient = Client<HttpConnector, Full<Bytes>>;

/// Plain-HTTP transport over a pooled hyper client.
#[derive(Clone)]
pub struct HyperTransport {
    client: PlainHyperClient,
    max_response_body_bytes: usize,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HyperTransport")
            .field("max_response_body_bytes", &self.max_response_body_bytes)
            .finish()
    }
}

impl HyperTransport {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(DEFAULT_POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(DEFAULT_POOL_MAX_IDLE_PER_HOST)
            .build_http();
        Self {
            client,
            max_response_body_bytes: DEFAULT_MAX_RESPONSE_BODY_BYTES,
        }
    }

    pub fn max_response_body_bytes(mut self, max_response_body_bytes: usize) -> Self {
        self.max_response_body_bytes = max_response_body_bytes.max(1);
        self
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn send(&self, request: AttemptRequest) -> Result<Response, TransportError> {
        let mut http_request = http::Request::builder()
            .method(request.method)
            .uri(request.uri)
            .body(Full::new(request.body))
            .map_err(|source| TransportError::Io {
                kind: TransportErrorKind::InvalidRequest,
                source: Box::new(source),
            })?;
        *http_request.headers_mut() = request.headers;

        let response = self
            .client
            .request(http_request)
            .await
            .map_err(|source| TransportError::Io {
                kind: classify_transport_error(&source),
                source: Box::new(source),
            })?;

        let (parts, body) = response.into_parts();
        let collected = read_body_limited(body, self.max_response_body_bytes).await?;
        Ok(Response::new(parts.status, parts.headers, collected))
    }
}

async fn read_body_limited(
    mut body: Incoming,
    limit_bytes: usize,
) -> Result<Bytes, TransportError> {
    let mut collected = BytesMut::with_capacity(1024);
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|source| TransportError::BodyRead {
            source: Box::new(source),
        })?;
        if let Ok(chunk) = frame.into_data() {
            if collected.len() + chunk.len() > limit_bytes {
                return Err(TransportError::BodyTooLarge {
                    limit_bytes,
                    actual_bytes: collected.len() + chunk.len(),
                });
            }
            collected.extend_from_slice(&chunk);
        }
    }
    Ok(collected.freeze())
}
