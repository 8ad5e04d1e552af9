//! Transport abstraction and the reqwest-backed implementation.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use http::{HeaderMap, Method, StatusCode};
use std::time::Duration;

use crate::{HttpClientConfig, HttpClientError, Result};

/// A fully-formed request handed to the transport for one attempt.
#[derive(Debug)]
pub struct TransportRequest {
    /// HTTP method.
    pub method: Method,
    /// Final URL including the merged query string.
    pub url: url::Url,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body for this attempt.
    pub body: TransportBody,
    /// Per-request timeout, if any.
    pub timeout: Option<Duration>,
}

/// Body of a single attempt.
pub enum TransportBody {
    /// No body.
    Empty,
    /// In-memory body.
    Bytes(Bytes),
    /// Streamed body; only ever sent once.
    Stream(BoxStream<'static, Result<Bytes>>),
}

impl TransportBody {
    /// The in-memory content, if the body is not streamed.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Empty => Some(&[]),
            Self::Bytes(bytes) => Some(bytes),
            Self::Stream(_) => None,
        }
    }
}

impl std::fmt::Debug for TransportBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Body of a raw response: buffered, or still streaming from the transport.
pub enum ResponseBody {
    /// Fully read body.
    Buffered(Bytes),
    /// Body that has not been read yet.
    Streaming(BoxStream<'static, Result<Bytes>>),
}

impl ResponseBody {
    /// An empty buffered body.
    pub fn empty() -> Self {
        Self::Buffered(Bytes::new())
    }

    /// Read the whole body into memory.
    pub async fn collect(self) -> Result<Bytes> {
        match self {
            Self::Buffered(bytes) => Ok(bytes),
            Self::Streaming(mut stream) => {
                let mut buffer = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buffer.extend_from_slice(&chunk?);
                }
                Ok(buffer.freeze())
            }
        }
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buffered(bytes) => f.debug_tuple("Buffered").field(&bytes.len()).finish(),
            Self::Streaming(_) => f.write_str("Streaming"),
        }
    }
}

/// The response of one transport attempt.
#[derive(Debug)]
pub struct RawResponse {
    status: StatusCode,
    headers: HeaderMap,
    url: Option<url::Url>,
    body: ResponseBody,
}

impl RawResponse {
    /// Create a response with a buffered body.
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            url: None,
            body: ResponseBody::Buffered(body.into()),
        }
    }

    /// Create a response whose body is read lazily.
    pub fn streaming(
        status: StatusCode,
        headers: HeaderMap,
        body: BoxStream<'static, Result<Bytes>>,
    ) -> Self {
        Self {
            status,
            headers,
            url: None,
            body: ResponseBody::Streaming(body),
        }
    }

    /// Set the URL the response was received from.
    pub fn with_url(mut self, url: url::Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// URL the response was received from, if known.
    pub fn url(&self) -> Option<&url::Url> {
        self.url.as_ref()
    }

    /// Whether the body is already in memory.
    pub fn is_buffered(&self) -> bool {
        matches!(self.body, ResponseBody::Buffered(_))
    }

    /// Read the body into memory so it can be replayed.
    pub async fn buffer(self) -> Result<Self> {
        let body = self.body.collect().await?;
        Ok(Self {
            body: ResponseBody::Buffered(body),
            ..self
        })
    }

    pub(crate) fn into_parts(self) -> (StatusCode, HeaderMap, Option<url::Url>, ResponseBody) {
        (self.status, self.headers, self.url, self.body)
    }
}

/// Sends a single request and returns the raw response.
///
/// Cancellation is driven by dropping the returned future; implementations
/// must not keep the request alive after returning.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one physical request.
    async fn dispatch(&self, request: TransportRequest) -> Result<RawResponse>;
}

/// [`Transport`] backed by a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    inner: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport from the client configuration.
    pub fn new(config: &HttpClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .gzip(config.gzip)
            .brotli(config.brotli);

        if config.follow_redirects {
            builder = builder.redirect(reqwest::redirect::Policy::limited(config.max_redirects));
        } else {
            builder = builder.redirect(reqwest::redirect::Policy::none());
        }

        let inner = builder
            .build()
            .map_err(|e| HttpClientError::Configuration(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Wrap an existing reqwest client.
    pub fn from_client(inner: reqwest::Client) -> Self {
        Self { inner }
    }

    /// Get the underlying reqwest client.
    pub fn inner(&self) -> &reqwest::Client {
        &self.inner
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn dispatch(&self, request: TransportRequest) -> Result<RawResponse> {
        let mut builder = self
            .inner
            .request(request.method, request.url)
            .headers(request.headers);

        builder = match request.body {
            TransportBody::Empty => builder,
            TransportBody::Bytes(bytes) => builder.body(bytes),
            TransportBody::Stream(stream) => builder.body(reqwest::Body::wrap_stream(stream)),
        };
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes_stream().map_err(map_reqwest_error).boxed();

        Ok(RawResponse::streaming(status, headers, body).with_url(url))
    }
}

fn map_reqwest_error(error: reqwest::Error) -> HttpClientError {
    if error.is_timeout() {
        HttpClientError::Timeout(error.to_string())
    } else if error.is_connect() {
        HttpClientError::Connection(error.to_string())
    } else {
        HttpClientError::Http(error)
    }
}
