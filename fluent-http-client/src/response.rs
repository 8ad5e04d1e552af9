//! HTTP response wrapper.

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use http::{HeaderMap, StatusCode};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::transport::ResponseBody;
use crate::{Formatter, FormatterCollection, HttpClientError, JsonFormatter, RawResponse, Result};

/// A completed response whose body can be read any number of times.
///
/// The body is read from the transport on first access and replayed from
/// memory afterwards. Clones share the same buffer.
#[derive(Clone)]
pub struct Response {
    inner: Arc<Inner>,
}

struct Inner {
    status: StatusCode,
    headers: HeaderMap,
    url: Option<url::Url>,
    body: OnceCell<Bytes>,
    pending: Mutex<Option<ResponseBody>>,
    formatters: FormatterCollection,
    cancel: CancellationToken,
}

impl Response {
    pub(crate) fn new(
        raw: RawResponse,
        formatters: FormatterCollection,
        cancel: CancellationToken,
    ) -> Self {
        let (status, headers, url, body) = raw.into_parts();
        let (body, pending) = match body {
            ResponseBody::Buffered(bytes) => (OnceCell::new_with(Some(bytes)), None),
            streaming => (OnceCell::new(), Some(streaming)),
        };

        Self {
            inner: Arc::new(Inner {
                status,
                headers,
                url,
                body,
                pending: Mutex::new(pending),
                formatters,
                cancel,
            }),
        }
    }

    /// Wrap a raw response using the default formatters.
    pub fn from_raw(raw: RawResponse) -> Self {
        Self::new(raw, FormatterCollection::default(), CancellationToken::new())
    }

    /// Get the status code.
    pub fn status(&self) -> StatusCode {
        self.inner.status
    }

    /// Check if the response was successful (2xx).
    pub fn is_success(&self) -> bool {
        self.inner.status.is_success()
    }

    /// Check if the response was a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        self.inner.status.is_client_error()
    }

    /// Check if the response was a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.inner.status.is_server_error()
    }

    /// Get the response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    /// Get a specific header value.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.inner
            .headers
            .get(name.as_ref())
            .and_then(|v| v.to_str().ok())
    }

    /// Get the response URL, if the transport reported one.
    pub fn url(&self) -> Option<&url::Url> {
        self.inner.url.as_ref()
    }

    /// Get the content type if available.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Get the content length if available.
    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length").and_then(|v| v.parse().ok())
    }

    /// Read the body as bytes.
    pub async fn as_bytes(&self) -> Result<Bytes> {
        let bytes = self
            .inner
            .body
            .get_or_try_init(|| async {
                let pending = self.inner.pending.lock().take();
                let Some(body) = pending else {
                    return Err(HttpClientError::Body(
                        "a previous read of the response body failed".to_string(),
                    ));
                };

                tokio::select! {
                    biased;
                    _ = self.inner.cancel.cancelled() => Err(HttpClientError::Cancelled),
                    bytes = body.collect() => bytes,
                }
            })
            .await?;
        Ok(bytes.clone())
    }

    /// Read the body as UTF-8 text.
    pub async fn as_string(&self) -> Result<String> {
        let bytes = self.as_bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(|e| HttpClientError::Format(e.to_string()))
    }

    /// Read the body as a stream of chunks.
    pub async fn as_stream(&self) -> Result<BoxStream<'static, Result<Bytes>>> {
        let bytes = self.as_bytes().await?;
        Ok(stream::once(async move { Ok(bytes) }).boxed())
    }

    /// Deserialize the body with the formatter matching its content type.
    pub async fn as_model<T: DeserializeOwned>(&self) -> Result<T> {
        let formatter = self.inner.formatters.select(self.content_type())?;
        let bytes = self.as_bytes().await?;
        let value = formatter.deserialize(&bytes)?;
        serde_json::from_value(value).map_err(|e| HttpClientError::Format(e.to_string()))
    }

    /// Deserialize the body as a list of models.
    pub async fn as_array<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.as_model().await
    }

    /// Parse the body as JSON regardless of content type.
    pub async fn as_raw_json(&self) -> Result<serde_json::Value> {
        let bytes = self.as_bytes().await?;
        JsonFormatter.deserialize(&bytes)
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.inner.status)
            .field("url", &self.inner.url)
            .field("headers", &self.inner.headers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use http::header::CONTENT_TYPE;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        id: u32,
        name: String,
    }

    fn json_headers(content_type: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        headers
    }

    fn streaming(chunks: Vec<&'static str>, polled: Arc<AtomicU32>) -> RawResponse {
        let body = stream::iter(chunks)
            .map(move |chunk| {
                polled.fetch_add(1, Ordering::SeqCst);
                Ok(Bytes::from(chunk))
            })
            .boxed();
        RawResponse::streaming(StatusCode::OK, json_headers("text/plain"), body)
    }

    #[tokio::test]
    async fn test_as_string_twice_returns_same_content() {
        let polled = Arc::new(AtomicU32::new(0));
        let response = Response::from_raw(streaming(vec!["hello ", "world"], polled.clone()));

        assert_eq!(response.as_string().await.unwrap(), "hello world");
        assert_eq!(response.as_string().await.unwrap(), "hello world");
        assert_eq!(polled.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_mixed_accessors_share_buffer() {
        let polled = Arc::new(AtomicU32::new(0));
        let response = Response::from_raw(streaming(vec!["abc"], polled));

        let mut chunks = response.as_stream().await.unwrap();
        let first = chunks.next().await.unwrap().unwrap();
        assert_eq!(first, Bytes::from("abc"));
        assert_eq!(response.as_bytes().await.unwrap(), Bytes::from("abc"));
        assert_eq!(response.clone().as_string().await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_as_model_selects_formatter() {
        let raw = RawResponse::new(
            StatusCode::OK,
            json_headers("application/json; charset=utf-8"),
            r#"{"id": 7, "name": "widget"}"#,
        );
        let response = Response::from_raw(raw);

        let item: Item = response.as_model().await.unwrap();
        assert_eq!(item, Item { id: 7, name: "widget".into() });
        let again: Item = response.as_model().await.unwrap();
        assert_eq!(again.id, 7);
    }

    #[tokio::test]
    async fn test_as_array() {
        let raw = RawResponse::new(
            StatusCode::OK,
            json_headers("application/json"),
            r#"[{"id": 1, "name": "a"}, {"id": 2, "name": "b"}]"#,
        );
        let items: Vec<Item> = Response::from_raw(raw).as_array().await.unwrap();
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_as_model_without_formatter_is_configuration_error() {
        let raw = RawResponse::new(StatusCode::OK, json_headers("application/xml"), "<item/>");
        let err = Response::from_raw(raw).as_model::<Item>().await.unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("application/xml"));
    }

    #[tokio::test]
    async fn test_plain_text_model() {
        let raw = RawResponse::new(StatusCode::OK, json_headers("text/plain"), "pong");
        let text: String = Response::from_raw(raw).as_model().await.unwrap();
        assert_eq!(text, "pong");
    }

    #[tokio::test]
    async fn test_raw_json_ignores_content_type() {
        let raw = RawResponse::new(StatusCode::OK, json_headers("text/plain"), r#"{"a":1}"#);
        let value = Response::from_raw(raw).as_raw_json().await.unwrap();
        assert_eq!(value["a"], 1);
    }

    #[tokio::test]
    async fn test_status_projections() {
        let raw = RawResponse::new(StatusCode::SERVICE_UNAVAILABLE, HeaderMap::new(), "");
        let response = Response::from_raw(raw);
        assert!(!response.is_success());
        assert!(response.is_server_error());
        assert!(!response.is_client_error());
        assert_eq!(response.content_type(), None);
    }

    #[tokio::test]
    async fn test_cancelled_read() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let raw = RawResponse::streaming(
            StatusCode::OK,
            HeaderMap::new(),
            stream::pending().boxed(),
        );
        let response = Response::new(raw, FormatterCollection::default(), cancel);
        assert!(response.as_bytes().await.unwrap_err().is_cancelled());
    }
}
