use http::HeaderMap;
use http::header::HeaderValue;
use uuid::Uuid;

use crate::CORRELATION_ID_HEADER;

/// Ambient trace context lookup.
///
/// When a call starts inside a traced request, implementations return the
/// active trace id and the pipeline reuses it verbatim as the correlation id.
pub trait TraceContextSource: Send + Sync {
    fn current_trace_id(&self) -> Option<String>;
}

/// Default source: no ambient tracing, every call gets a generated id.
#[derive(Debug, Default)]
pub struct NoAmbientTrace;

impl TraceContextSource for NoAmbientTrace {
    fn current_trace_id(&self) -> Option<String> {
        None
    }
}

/// Correlation id shared by every attempt of one logical call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Mints a fresh random id, for callers that record or forward the id they
    /// hand to [`PipelineRequest::correlation_id`](crate::PipelineRequest::correlation_id).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub(crate) fn from_text(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Resolves the correlation id for one logical call and pins it into `headers`.
///
/// Precedence: a caller-supplied header wins, then the ambient trace id, then a
/// freshly generated uuid. Resolution happens once per call; retries reuse the
/// pinned header untouched.
pub(crate) fn resolve_correlation_id(
    headers: &mut HeaderMap,
    trace_source: &dyn TraceContextSource,
) -> CorrelationId {
    if let Some(existing) = headers.get(CORRELATION_ID_HEADER)
        && let Ok(text) = existing.to_str()
        && !text.trim().is_empty()
    {
        return CorrelationId::from_text(text);
    }

    if let Some(trace_id) = trace_source.current_trace_id() {
        let trace_id = trace_id.trim();
        if !trace_id.is_empty()
            && let Ok(value) = HeaderValue::from_str(trace_id)
        {
            headers.insert(CORRELATION_ID_HEADER, value);
            return CorrelationId::from_text(trace_id);
        }
    }

    let id = CorrelationId::generate();
    if let Ok(value) = HeaderValue::from_str(id.as_str()) {
        headers.insert(CORRELATION_ID_HEADER, value);
    }
    id
}
