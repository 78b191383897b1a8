use std::time::Duration;

use http::{Method, StatusCode};

use crate::error::{Error, TransportErrorKind};
use crate::response::Response;
use crate::transport::TransportError;
use crate::util::truncate_body;

/// Classified result of a single delivery attempt.
///
/// Every attempt is mapped into one of these before the retry policy and the
/// circuit breaker see it, so both always agree on what counted as a failure.
#[derive(Debug)]
pub enum Outcome {
    /// 2xx response.
    Success(Response),
    /// Transport failure, 429, or 5xx. Eligible for retry.
    Retryable(Error),
    /// Any other status, or a request the transport cannot send. Never retried.
    Fatal(Error),
    /// The attempt exceeded its timeout. Retried, and counted as a breaker failure.
    TimedOut(Error),
}

impl Outcome {
    pub(crate) fn from_response(response: Response, method: &Method, uri: &str) -> Self {
        let status = response.status();
        if status.is_success() {
            return Self::Success(response);
        }

        let error = Error::HttpStatus {
            status: status.as_u16(),
            method: method.clone(),
            uri: uri.to_owned(),
            body: truncate_body(response.body()),
        };
        if retryable_status(status) {
            Self::Retryable(error)
        } else {
            Self::Fatal(error)
        }
    }

    pub(crate) fn from_transport_error(error: TransportError, method: &Method, uri: &str) -> Self {
        match error {
            TransportError::Io { kind, source } => {
                let error = Error::Transport {
                    kind,
                    method: method.clone(),
                    uri: uri.to_owned(),
                    source,
                };
                if transport_kind_retryable(kind) {
                    Self::Retryable(error)
                } else {
                    Self::Fatal(error)
                }
            }
            TransportError::BodyRead { source } => Self::Retryable(Error::ReadBody { source }),
            TransportError::BodyTooLarge {
                limit_bytes,
                actual_bytes,
            } => Self::Fatal(Error::ResponseBodyTooLarge {
                limit_bytes,
                actual_bytes,
                method: method.clone(),
                uri: uri.to_owned(),
            }),
        }
    }

    pub(crate) fn timed_out(attempt_timeout: Duration, method: &Method, uri: &str) -> Self {
        Self::TimedOut(Error::Timeout {
            timeout_ms: attempt_timeout.as_millis(),
            method: method.clone(),
            uri: uri.to_owned(),
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_) | Self::TimedOut(_))
    }

    pub(crate) fn error(&self) -> Option<&Error> {
        match self {
            Self::Success(_) => None,
            Self::Retryable(error) | Self::Fatal(error) | Self::TimedOut(error) => Some(error),
        }
    }

    pub(crate) fn into_result(self) -> crate::Result<Response> {
        match self {
            Self::Success(response) => Ok(response),
            Self::Retryable(error) | Self::Fatal(error) | Self::TimedOut(error) => Err(error),
        }
    }
}

pub(crate) fn retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

const fn transport_kind_retryable(kind: TransportErrorKind) -> bool {
    !matches!(kind, TransportErrorKind::InvalidRequest)
}
