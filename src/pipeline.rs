use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};
use tokio::time::{sleep, timeout};
use tracing::{Instrument, debug, info_span, warn};

use crate::breaker::{CircuitBreaker, CircuitBreakerPolicy};
use crate::clock::{Clock, SystemClock};
use crate::correlation::{CorrelationId, NoAmbientTrace, TraceContextSource, resolve_correlation_id};
use crate::error::Error;
use crate::metrics::{PipelineMetrics, PipelineMetricsSnapshot};
use crate::outcome::Outcome;
use crate::request::{PipelineRequest, Request};
use crate::response::Response;
use crate::retry::{RetryDirective, RetryPolicy};
use crate::transport::{AttemptRequest, HyperTransport, Transport};
use crate::util::{
    bounded_retry_delay, deadline_exceeded_error, merge_headers, parse_header_name,
    parse_header_value, redact_uri_for_logs, remaining_attempt_timeout, resolve_uri,
};

const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_PIPELINE_NAME: &str = "egress";

/// Builder for [`Pipeline`]. Obtained from [`Pipeline::builder`].
pub struct PipelineBuilder {
    base_endpoint: String,
    pipeline_name: String,
    default_headers: HeaderMap,
    attempt_timeout: Duration,
    deadline: Option<Duration>,
    retry_policy: RetryPolicy,
    breaker_policy: CircuitBreakerPolicy,
    shared_breaker: Option<Arc<CircuitBreaker>>,
    transport: Option<Arc<dyn Transport>>,
    trace_source: Arc<dyn TraceContextSource>,
    clock: Arc<dyn Clock>,
}

impl PipelineBuilder {
    pub fn new(base_endpoint: impl Into<String>) -> Self {
        Self {
            base_endpoint: base_endpoint.into(),
            pipeline_name: DEFAULT_PIPELINE_NAME.to_owned(),
            default_headers: HeaderMap::new(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            deadline: None,
            retry_policy: RetryPolicy::standard(),
            breaker_policy: CircuitBreakerPolicy::standard(),
            shared_breaker: None,
            transport: None,
            trace_source: Arc::new(NoAmbientTrace),
            clock: Arc::new(SystemClock),
        }
    }

    /// Name used in log spans, so several pipelines in one process stay
    /// distinguishable.
    pub fn pipeline_name(mut self, pipeline_name: impl Into<String>) -> Self {
        self.pipeline_name = pipeline_name.into();
        self
    }

    /// Upper bound for a single delivery attempt. Defaults to 30s.
    pub fn attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout.max(Duration::from_millis(1));
        self
    }

    /// Overall deadline for every call on this pipeline, spanning all attempts
    /// and backoff waits. Unset by default; a per-request deadline overrides
    /// this value.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline.max(Duration::from_millis(1)));
        self
    }

    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn try_default_header(mut self, name: &str, value: &str) -> crate::Result<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn circuit_breaker_policy(mut self, breaker_policy: CircuitBreakerPolicy) -> Self {
        self.breaker_policy = breaker_policy;
        self
    }

    /// Shares an existing breaker instead of creating one. Pipelines pointed
    /// at the same downstream should share, so failures seen by one protect
    /// the others.
    pub fn shared_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.shared_breaker = Some(breaker);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Source consulted for an ambient trace id when a request carries no
    /// correlation header of its own.
    pub fn trace_context_source(mut self, trace_source: Arc<dyn TraceContextSource>) -> Self {
        self.trace_source = trace_source;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> crate::Result<Pipeline> {
        let parsed: Uri = self
            .base_endpoint
            .parse()
            .map_err(|_| Error::InvalidBaseEndpoint {
                endpoint: self.base_endpoint.clone(),
            })?;
        if parsed.scheme().is_none() || parsed.authority().is_none() {
            return Err(Error::InvalidBaseEndpoint {
                endpoint: self.base_endpoint,
            });
        }

        let breaker = self.shared_breaker.unwrap_or_else(|| {
            Arc::new(CircuitBreaker::with_clock(
                self.breaker_policy,
                Arc::clone(&self.clock),
            ))
        });
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(HyperTransport::new()));

        Ok(Pipeline {
            base_endpoint: self.base_endpoint,
            pipeline_name: self.pipeline_name,
            default_headers: self.default_headers,
            attempt_timeout: self.attempt_timeout,
            deadline: self.deadline,
            retry_policy: self.retry_policy,
            breaker,
            transport,
            trace_source: self.trace_source,
            metrics: PipelineMetrics::default(),
        })
    }
}

/// Outbound request pipeline for one downstream target.
///
/// Every call sent through the pipeline gets a correlation id, a per-attempt
/// timeout, retries with fixed backoff for transient failures, and admission
/// control through a circuit breaker shared by all clones of this pipeline.
#[derive(Clone)]
pub struct Pipeline {
    base_endpoint: String,
    pipeline_name: String,
    default_headers: HeaderMap,
    attempt_timeout: Duration,
    deadline: Option<Duration>,
    retry_policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
    transport: Arc<dyn Transport>,
    trace_source: Arc<dyn TraceContextSource>,
    metrics: PipelineMetrics,
}

struct CallContext {
    method: Method,
    uri: Uri,
    uri_text: String,
    redacted_uri_text: String,
    headers: HeaderMap,
    body: Bytes,
    correlation_id: CorrelationId,
    deadline: Option<Duration>,
    call_started_at: Instant,
}

impl Pipeline {
    pub fn builder(base_endpoint: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(base_endpoint)
    }

    pub fn request(&self, method: Method, path: impl Into<String>) -> PipelineRequest<'_> {
        PipelineRequest::new(self, method, path.into())
    }

    pub fn get(&self, path: impl Into<String>) -> PipelineRequest<'_> {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: impl Into<String>) -> PipelineRequest<'_> {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: impl Into<String>) -> PipelineRequest<'_> {
        self.request(Method::PUT, path)
    }

    pub fn patch(&self, path: impl Into<String>) -> PipelineRequest<'_> {
        self.request(Method::PATCH, path)
    }

    pub fn delete(&self, path: impl Into<String>) -> PipelineRequest<'_> {
        self.request(Method::DELETE, path)
    }

    /// Breaker guarding this pipeline's downstream. Hand it to
    /// [`PipelineBuilder::shared_circuit_breaker`] to build another pipeline
    /// against the same target.
    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn metrics_snapshot(&self) -> PipelineMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Runs one logical call through the pipeline.
    ///
    /// The correlation id is resolved exactly once, before the first attempt,
    /// and every retry of this call carries the same id.
    pub async fn execute(&self, request: Request) -> crate::Result<Response> {
        let (method, path, headers, body, request_deadline) = request.into_parts();
        let (uri_text, uri) = resolve_uri(&self.base_endpoint, &path)?;
        let redacted_uri_text = redact_uri_for_logs(&uri_text);
        let mut merged_headers = merge_headers(&self.default_headers, &headers);
        let correlation_id = resolve_correlation_id(&mut merged_headers, self.trace_source.as_ref());
        let deadline = request_deadline.or(self.deadline);

        self.metrics.record_call_started();
        let _in_flight = self.metrics.enter_in_flight();
        let call_started_at = Instant::now();

        let result = self
            .execute_with_retry(CallContext {
                method,
                uri,
                uri_text,
                redacted_uri_text,
                headers: merged_headers,
                body,
                correlation_id,
                deadline,
                call_started_at,
            })
            .await;
        self.metrics
            .record_call_completed(&result, call_started_at.elapsed());
        result
    }

    async fn execute_with_retry(&self, context: CallContext) -> crate::Result<Response> {
        let max_attempts = self.retry_policy.max_attempts_value();

        for attempt in 1..=max_attempts {
            let span = info_span!(
                "egress.call",
                pipeline = %self.pipeline_name,
                method = %context.method,
                uri = %context.redacted_uri_text,
                correlation_id = %context.correlation_id,
                attempt = attempt,
                max_attempts = max_attempts,
            );

            let Some(attempt_timeout) = remaining_attempt_timeout(
                self.attempt_timeout,
                context.deadline,
                context.call_started_at,
            ) else {
                return Err(deadline_exceeded_error(
                    context.deadline,
                    &context.method,
                    &context.uri_text,
                ));
            };

            let permit = match self.breaker.admit() {
                Ok(permit) => permit,
                Err(rejection) => {
                    span.in_scope(|| {
                        warn!(
                            retry_after_ms = rejection.retry_after.as_millis() as u64,
                            "circuit open; call rejected without an attempt"
                        );
                    });
                    return Err(Error::CircuitOpen {
                        method: context.method.clone(),
                        uri: context.uri_text.clone(),
                        retry_after_ms: rejection.retry_after.as_millis(),
                    });
                }
            };

            self.metrics.record_attempt();
            span.in_scope(|| debug!("sending request"));

            let outcome = self
                .run_attempt(attempt_timeout, &context)
                .instrument(span.clone())
                .await;
            permit.complete(&outcome);

            match self.retry_policy.decide(&outcome, attempt) {
                RetryDirective::Stop => return outcome.into_result(),
                RetryDirective::RetryAfter(retry_delay) => {
                    let Some(retry_delay) =
                        bounded_retry_delay(retry_delay, context.deadline, context.call_started_at)
                    else {
                        return Err(deadline_exceeded_error(
                            context.deadline,
                            &context.method,
                            &context.uri_text,
                        ));
                    };
                    if let Some(error) = outcome.error() {
                        span.in_scope(|| {
                            warn!(
                                delay_ms = retry_delay.as_millis() as u64,
                                error = %error,
                                "retrying after failed attempt"
                            );
                        });
                    }
                    self.metrics.record_retry();
                    if !retry_delay.is_zero() {
                        sleep(retry_delay).await;
                    }
                }
            }
        }

        Err(deadline_exceeded_error(
            context.deadline,
            &context.method,
            &context.uri_text,
        ))
    }

    async fn run_attempt(&self, attempt_timeout: Duration, context: &CallContext) -> Outcome {
        let attempt_request = AttemptRequest {
            method: context.method.clone(),
            uri: context.uri.clone(),
            headers: context.headers.clone(),
            body: context.body.clone(),
        };

        match timeout(attempt_timeout, self.transport.send(attempt_request)).await {
            Ok(Ok(response)) => Outcome::from_response(response, &context.method, &context.uri_text),
            Ok(Err(error)) => {
                Outcome::from_transport_error(error, &context.method, &context.uri_text)
            }
            Err(_) => {
                self.metrics.record_attempt_timeout();
                Outcome::timed_out(attempt_timeout, &context.method, &context.uri_text)
            }
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Pipeline")
            .field("base_endpoint", &self.base_endpoint)
            .field("pipeline_name", &self.pipeline_name)
            .field("attempt_timeout", &self.attempt_timeout)
            .field("deadline", &self.deadline)
            .field("retry_policy", &self.retry_policy)
            .field("breaker", &self.breaker)
            .finish()
    }
}
