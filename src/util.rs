use std::sync::Mutex;
use std::time::{Duration, Instant};

use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};

use crate::error::{Error, TransportErrorKind};

const MAX_ERROR_BODY_LEN: usize = 2048;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn merge_headers(default_headers: &HeaderMap, request_headers: &HeaderMap) -> HeaderMap {
    let mut merged = default_headers.clone();
    for (name, value) in request_headers {
        merged.insert(name.clone(), value.clone());
    }
    merged
}

pub(crate) fn redact_uri_for_logs(uri_text: &str) -> String {
    let without_fragment = uri_text.split('#').next().unwrap_or(uri_text);
    without_fragment
        .split('?')
        .next()
        .unwrap_or(without_fragment)
        .to_owned()
}

/// Joins a request path onto the pipeline base endpoint. Absolute URLs are not
/// accepted here; every call goes to the one downstream target the pipeline
/// (and its circuit breaker) was built for.
pub(crate) fn resolve_uri(base_endpoint: &str, path: &str) -> crate::Result<(String, Uri)> {
    let uri_text = join_base_path(base_endpoint, path);
    let uri = uri_text.parse().map_err(|_| Error::InvalidUri {
        uri: uri_text.clone(),
    })?;
    Ok((uri_text, uri))
}

pub(crate) fn join_base_path(base_endpoint: &str, path: &str) -> String {
    let base = base_endpoint.trim_end_matches('/');
    let relative = path.trim_start_matches('/');
    match (base.is_empty(), relative.is_empty()) {
        (true, true) => String::new(),
        (true, false) => relative.to_owned(),
        (false, true) => base.to_owned(),
        (false, false) => format!("{base}/{relative}"),
    }
}

pub(crate) fn parse_header_name(name: &str) -> crate::Result<HeaderName> {
    name.parse().map_err(|source| Error::InvalidHeaderName {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> crate::Result<HeaderValue> {
    value.parse().map_err(|source| Error::InvalidHeaderValue {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn remaining_attempt_timeout(
    attempt_timeout: Duration,
    deadline: Option<Duration>,
    call_started_at: Instant,
) -> Option<Duration> {
    let Some(deadline) = deadline else {
        return Some(attempt_timeout);
    };

    let elapsed = call_started_at.elapsed();
    if elapsed >= deadline {
        return None;
    }

    let remaining = deadline - elapsed;
    Some(attempt_timeout.min(remaining))
}

pub(crate) fn bounded_retry_delay(
    retry_delay: Duration,
    deadline: Option<Duration>,
    call_started_at: Instant,
) -> Option<Duration> {
    let Some(deadline) = deadline else {
        return Some(retry_delay);
    };

    let elapsed = call_started_at.elapsed();
    if elapsed >= deadline {
        return None;
    }

    let remaining = deadline - elapsed;
    if retry_delay >= remaining {
        return None;
    }
    Some(retry_delay)
}

pub(crate) fn deadline_exceeded_error(
    deadline: Option<Duration>,
    method: &Method,
    uri: &str,
) -> Error {
    let timeout_ms = deadline.map(|item| item.as_millis()).unwrap_or(0);
    Error::DeadlineExceeded {
        timeout_ms,
        method: method.clone(),
        uri: uri.to_owned(),
    }
}

pub(crate) fn classify_transport_error(
    error: &hyper_util::client::legacy::Error,
) -> TransportErrorKind {
    if error.is_connect() {
        let text = error.to_string().to_ascii_lowercase();
        if text.contains("dns")
            || text.contains("name or service not known")
            || text.contains("failed to lookup address")
        {
            return TransportErrorKind::Dns;
        }
        return TransportErrorKind::Connect;
    }

    let text = error.to_string().to_ascii_lowercase();
    if text.contains("read")
        || text.contains("connection reset")
        || text.contains("broken pipe")
        || text.contains("unexpected eof")
    {
        return TransportErrorKind::Read;
    }

    TransportErrorKind::Other
}

pub(crate) fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() <= MAX_ERROR_BODY_LEN {
        return text.into_owned();
    }

    let truncated: String = text.chars().take(MAX_ERROR_BODY_LEN).collect();
    format!("{truncated}...(truncated)")
}
