use http::Method;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Read,
    InvalidRequest,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Read => "read",
            Self::InvalidRequest => "invalid_request",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidBaseEndpoint,
    InvalidUri,
    SerializeJson,
    Transport,
    Timeout,
    DeadlineExceeded,
    ReadBody,
    ResponseBodyTooLarge,
    HttpStatus,
    Deserialize,
    InvalidHeaderName,
    InvalidHeaderValue,
    CircuitOpen,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidBaseEndpoint => "invalid_base_endpoint",
            Self::InvalidUri => "invalid_uri",
            Self::SerializeJson => "serialize_json",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::ReadBody => "read_body",
            Self::ResponseBodyTooLarge => "response_body_too_large",
            Self::HttpStatus => "http_status",
            Self::Deserialize => "deserialize",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::CircuitOpen => "circuit_open",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid base endpoint: {endpoint}")]
    InvalidBaseEndpoint { endpoint: String },
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("failed to serialize request json: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("transport error ({kind}) for {method} {uri}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("attempt timed out after {timeout_ms}ms for {method} {uri}")]
    Timeout {
        timeout_ms: u128,
        method: Method,
        uri: String,
    },
    #[error("call deadline exceeded after {timeout_ms}ms for {method} {uri}")]
    DeadlineExceeded {
        timeout_ms: u128,
        method: Method,
        uri: String,
    },
    #[error("failed to read response body: {source}")]
    ReadBody {
        #[source]
        source: BoxError,
    },
    #[error(
        "response body too large ({actual_bytes} bytes > {limit_bytes} bytes) for {method} {uri}"
    )]
    ResponseBodyTooLarge {
        limit_bytes: usize,
        actual_bytes: usize,
        method: Method,
        uri: String,
    },
    #[error("http status error {status} for {method} {uri}: {body}")]
    HttpStatus {
        status: u16,
        method: Method,
        uri: String,
        body: String,
    },
    #[error("failed to decode response json: {source}; body={body}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
        body: String,
    },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("circuit breaker is open for {method} {uri}; retry after {retry_after_ms}ms")]
    CircuitOpen {
        method: Method,
        uri: String,
        retry_after_ms: u128,
    },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidBaseEndpoint { .. } => ErrorCode::InvalidBaseEndpoint,
            Self::InvalidUri { .. } => ErrorCode::InvalidUri,
            Self::Serialize { .. } => ErrorCode::SerializeJson,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::DeadlineExceeded { .. } => ErrorCode::DeadlineExceeded,
            Self::ReadBody { .. } => ErrorCode::ReadBody,
            Self::ResponseBodyTooLarge { .. } => ErrorCode::ResponseBodyTooLarge,
            Self::HttpStatus { .. } => ErrorCode::HttpStatus,
            Self::Deserialize { .. } => ErrorCode::Deserialize,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::CircuitOpen { .. } => ErrorCode::CircuitOpen,
        }
    }
}
