//! `egress` is an outbound-request pipeline for downstream HTTP APIs with
//! correlation ids, per-attempt timeouts, bounded retries, and a circuit breaker.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use egress::prelude::{CircuitBreakerPolicy, Pipeline, RetryPolicy};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct OrderStatus {
//!     state: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Pipeline::builder("http://orders.internal:8080")
//!         .pipeline_name("orders-sdk")
//!         .attempt_timeout(Duration::from_secs(5))
//!         .retry_policy(RetryPolicy::standard().max_attempts(3))
//!         .circuit_breaker_policy(CircuitBreakerPolicy::standard().failure_threshold(5))
//!         .build()?;
//!
//!     let status: OrderStatus = pipeline
//!         .get("/v1/orders/42/status")
//!         .send_json()
//!         .await?;
//!
//!     println!("order state={}", status.state);
//!     Ok(())
//! }
//! ```
//!
//! # Recommended Defaults
//!
//! - Keep the fixed default backoff schedule for downstream API traffic.
//! - Share one `CircuitBreaker` between pipelines that target the same downstream.
//! - Let the pipeline assign `x-correlation-id`; set it yourself only when relaying
//!   an id received from upstream.

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

mod breaker;
mod clock;
mod correlation;
mod error;
mod metrics;
mod outcome;
mod pipeline;
mod request;
mod response;
mod retry;
mod transport;
mod util;

pub use crate::breaker::{CircuitBreaker, CircuitBreakerPolicy, CircuitPermit, CircuitRejection};
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::correlation::{CorrelationId, NoAmbientTrace, TraceContextSource};
pub use crate::error::{Error, ErrorCode, TransportErrorKind};
pub use crate::metrics::PipelineMetricsSnapshot;
pub use crate::outcome::Outcome;
pub use crate::pipeline::{Pipeline, PipelineBuilder};
pub use crate::request::{PipelineRequest, Request, RequestBuilder};
pub use crate::response::Response;
pub use crate::retry::{RetryDirective, RetryPolicy};
pub use crate::transport::{AttemptRequest, HyperTransport, Transport, TransportError};

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        CircuitBreaker, CircuitBreakerPolicy, CorrelationId, Error, ErrorCode, Outcome, Pipeline,
        PipelineMetricsSnapshot, Request, Response, RetryPolicy, Transport, TransportErrorKind,
    };
}

#[cfg(test)]
mod tests;
