use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::CORRELATION_ID_HEADER;
use crate::error::Error;
use crate::pipeline::Pipeline;
use crate::response::Response;
use crate::util::{parse_header_name, parse_header_value};

/// One logical call to the downstream, before the pipeline takes over.
///
/// A request is plain data: it can be cloned and executed again, and every
/// execution is a fresh logical call with its own correlation id and retry
/// budget.
#[derive(Clone, Debug)]
pub struct Request {
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Bytes,
    deadline: Option<Duration>,
}

impl Request {
    pub fn builder(method: Method, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            deadline: None,
        }
    }

    pub fn get(path: impl Into<String>) -> RequestBuilder {
        Self::builder(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> RequestBuilder {
        Self::builder(Method::POST, path)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    pub(crate) fn into_parts(self) -> (Method, String, HeaderMap, Bytes, Option<Duration>) {
        (
            self.method,
            self.path,
            self.headers,
            self.body,
            self.deadline,
        )
    }
}

/// Builder for a detached [`Request`].
pub struct RequestBuilder {
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Bytes,
    deadline: Option<Duration>,
}

impl RequestBuilder {
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn try_header(self, name: &str, value: &str) -> crate::Result<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.header(name, value))
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn json<T>(self, payload: &T) -> crate::Result<Self>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(payload).map_err(|source| Error::Serialize { source })?;
        let with_body = self.body(Bytes::from(body));
        Ok(with_body.header(CONTENT_TYPE, HeaderValue::from_static("application/json")))
    }

    /// Overall deadline for the logical call, spanning attempts and waits.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline.max(Duration::from_millis(1)));
        self
    }

    pub fn build(self) -> Request {
        Request {
            method: self.method,
            path: self.path,
            headers: self.headers,
            body: self.body,
            deadline: self.deadline,
        }
    }
}

/// Fluent request bound to a [`Pipeline`], created by [`Pipeline::get`] and
/// friends.
pub struct PipelineRequest<'a> {
    pipeline: &'a Pipeline,
    builder: RequestBuilder,
}

impl<'a> PipelineRequest<'a> {
    pub(crate) fn new(pipeline: &'a Pipeline, method: Method, path: String) -> Self {
        Self {
            pipeline,
            builder: Request::builder(method, path),
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.builder = self.builder.header(name, value);
        self
    }

    pub fn try_header(mut self, name: &str, value: &str) -> crate::Result<Self> {
        self.builder = self.builder.try_header(name, value)?;
        Ok(self)
    }

    /// Relays an upstream correlation id instead of letting the pipeline
    /// resolve one.
    pub fn correlation_id(self, correlation_id: &str) -> crate::Result<Self> {
        self.try_header(CORRELATION_ID_HEADER, correlation_id)
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.builder = self.builder.body(body);
        self
    }

    pub fn json<T>(mut self, payload: &T) -> crate::Result<Self>
    where
        T: Serialize + ?Sized,
    {
        self.builder = self.builder.json(payload)?;
        Ok(self)
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.builder = self.builder.deadline(deadline);
        self
    }

    pub async fn send(self) -> crate::Result<Response> {
        self.pipeline.execute(self.builder.build()).await
    }

    pub async fn send_json<T>(self) -> crate::Result<T>
    where
        T: DeserializeOwned,
    {
        let response = self.send().await?;
        response.json()
    }
}
