//! Request bodies.
//!
//! A body is sent once per attempt, so it must be replayable: in-memory bytes
//! are cloned cheaply and factories are invoked again. A stream can only be
//! sent once; dispatching it a second time fails with a configuration error.

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use http::HeaderValue;
use parking_lot::Mutex;
use serde::Serialize;

use crate::transport::TransportBody;
use crate::{FormatterCollection, HttpClientError, Result};

/// Produces a fresh body for every attempt.
pub type BodyFactoryFn = Arc<dyn Fn() -> Result<Bytes> + Send + Sync>;

type SingleUseStream = Arc<Mutex<Option<BoxStream<'static, Result<Bytes>>>>>;

#[derive(Clone, Default)]
enum BodyContent {
    #[default]
    Empty,
    Bytes(Bytes),
    Factory(BodyFactoryFn),
    Stream(SingleUseStream),
}

/// A request body and its content type.
#[derive(Clone, Default)]
pub struct Body {
    content: BodyContent,
    content_type: Option<HeaderValue>,
}

impl Body {
    /// No body.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Raw bytes, sent as `application/octet-stream` unless overridden.
    pub fn bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            content: BodyContent::Bytes(bytes.into()),
            content_type: Some(HeaderValue::from_static("application/octet-stream")),
        }
    }

    /// UTF-8 text.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: BodyContent::Bytes(Bytes::from(text.into())),
            content_type: Some(HeaderValue::from_static("text/plain; charset=utf-8")),
        }
    }

    /// A body rebuilt by `factory` on every attempt.
    pub fn factory<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Bytes> + Send + Sync + 'static,
    {
        Self {
            content: BodyContent::Factory(Arc::new(factory)),
            content_type: Some(HeaderValue::from_static("application/octet-stream")),
        }
    }

    /// A single-use streamed body. It cannot be retried or re-dispatched.
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        Self {
            content: BodyContent::Stream(Arc::new(Mutex::new(Some(stream.boxed())))),
            content_type: Some(HeaderValue::from_static("application/octet-stream")),
        }
    }

    /// Override the content type.
    pub fn with_content_type(mut self, content_type: HeaderValue) -> Self {
        self.content_type = Some(content_type);
        self
    }

    /// The body's content type, if any.
    pub fn content_type(&self) -> Option<&HeaderValue> {
        self.content_type.as_ref()
    }

    /// Whether there is no body.
    pub fn is_empty(&self) -> bool {
        matches!(self.content, BodyContent::Empty)
    }

    /// Whether the body can be sent more than once.
    pub fn is_replayable(&self) -> bool {
        !matches!(self.content, BodyContent::Stream(_))
    }

    /// Produce the body for one attempt.
    pub(crate) fn materialize(&self) -> Result<TransportBody> {
        match &self.content {
            BodyContent::Empty => Ok(TransportBody::Empty),
            BodyContent::Bytes(bytes) => Ok(TransportBody::Bytes(bytes.clone())),
            BodyContent::Factory(factory) => factory().map(TransportBody::Bytes),
            BodyContent::Stream(stream) => stream.lock().take().map(TransportBody::Stream).ok_or_else(|| {
                HttpClientError::Configuration(
                    "a streamed body can only be sent once; use bytes or a factory to allow retries"
                        .to_string(),
                )
            }),
        }
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let content = match &self.content {
            BodyContent::Empty => "empty",
            BodyContent::Bytes(_) => "bytes",
            BodyContent::Factory(_) => "factory",
            BodyContent::Stream(_) => "stream",
        };
        f.debug_struct("Body")
            .field("content", &content)
            .field("content_type", &self.content_type)
            .finish()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::bytes(bytes)
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Self::text(text)
    }
}

/// Builds bodies with access to the request's formatters.
#[derive(Debug, Clone, Copy)]
pub struct BodyBuilder<'a> {
    formatters: &'a FormatterCollection,
}

impl<'a> BodyBuilder<'a> {
    pub(crate) fn new(formatters: &'a FormatterCollection) -> Self {
        Self { formatters }
    }

    /// Serialize a model with the default formatter.
    pub fn model<T: Serialize + ?Sized>(&self, model: &T) -> Result<Body> {
        let formatter = self.formatters.select(None)?;
        let content_type = formatter
            .media_types()
            .first()
            .copied()
            .ok_or_else(|| HttpClientError::Configuration("default formatter has no media type".into()))?;
        self.encode(model, formatter.as_ref(), content_type)
    }

    /// Serialize a model for a specific content type.
    pub fn model_as<T: Serialize + ?Sized>(&self, model: &T, content_type: &str) -> Result<Body> {
        let formatter = self.formatters.select(Some(content_type))?;
        self.encode(model, formatter.as_ref(), content_type)
    }

    /// Encode a flat record as `application/x-www-form-urlencoded`.
    pub fn form_url_encoded<T: Serialize + ?Sized>(&self, form: &T) -> Result<Body> {
        let encoded = serde_urlencoded::to_string(form)
            .map_err(|e| HttpClientError::Format(e.to_string()))?;
        Ok(Body::bytes(encoded).with_content_type(HeaderValue::from_static(
            "application/x-www-form-urlencoded",
        )))
    }

    /// Raw bytes.
    pub fn bytes(&self, bytes: impl Into<Bytes>) -> Result<Body> {
        Ok(Body::bytes(bytes))
    }

    /// UTF-8 text.
    pub fn text(&self, text: impl Into<String>) -> Result<Body> {
        Ok(Body::text(text))
    }

    /// A body rebuilt for every attempt.
    pub fn factory<F>(&self, factory: F) -> Result<Body>
    where
        F: Fn() -> Result<Bytes> + Send + Sync + 'static,
    {
        Ok(Body::factory(factory))
    }

    /// A single-use stream.
    pub fn stream<S>(&self, stream: S) -> Result<Body>
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        Ok(Body::stream(stream))
    }

    fn encode<T: Serialize + ?Sized>(
        &self,
        model: &T,
        formatter: &dyn crate::Formatter,
        content_type: &str,
    ) -> Result<Body> {
        let value = serde_json::to_value(model).map_err(|e| HttpClientError::Format(e.to_string()))?;
        let bytes = formatter.serialize(&value)?;
        let content_type = HeaderValue::from_str(content_type)
            .map_err(|e| HttpClientError::Configuration(e.to_string()))?;
        Ok(Body::bytes(bytes).with_content_type(content_type))
    }
}
