// Test doubles for the transport and filter seams

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fluent_http_client::{
    Bytes, Filter, HeaderMap, HeaderValue, HttpClientError, Method, PreparedRequest, RawResponse,
    Response, Result, StatusCode, Transport, TransportBody, TransportRequest, Url, header,
};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;

type Responder = Arc<dyn Fn(&RecordedRequest, u32) -> Result<RawResponse> + Send + Sync>;

enum Reply {
    Response(StatusCode, HeaderMap, Bytes),
    Failure(HttpClientError),
}

/// A request as seen by [`MockTransport`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub timeout: Option<Duration>,
}

impl RecordedRequest {
    /// Get a header value as text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The body as UTF-8 text.
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Default)]
struct MockState {
    script: Mutex<VecDeque<Reply>>,
    responder: Mutex<Option<Responder>>,
    requests: Mutex<Vec<RecordedRequest>>,
    calls: AtomicU32,
    delay: Mutex<Option<Duration>>,
}

/// Scripted transport.
///
/// Replies queued with `respond_*`/`fail_with` are used first, in order. After
/// that the responder runs, and without one every call returns an empty 200.
/// Clones share the same script and call log.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response with a text body
    pub fn respond_with(self, status: u16, body: impl Into<Bytes>) -> Self {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self.push(Reply::Response(status, HeaderMap::new(), body.into()))
    }

    /// Queue a JSON response
    pub fn respond_json<T: Serialize>(self, status: u16, body: &T) -> Self {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        let body = serde_json::to_vec(body).unwrap_or_default();
        self.push(Reply::Response(status, headers, body.into()))
    }

    /// Queue a transport failure
    pub fn fail_with(self, error: HttpClientError) -> Self {
        self.push(Reply::Failure(error))
    }

    /// Answer unscripted calls with `responder`, which receives the request
    /// and the 1-based call number
    pub fn responder<F>(self, responder: F) -> Self
    where
        F: Fn(&RecordedRequest, u32) -> Result<RawResponse> + Send + Sync + 'static,
    {
        *self.state.responder.lock() = Some(Arc::new(responder));
        self
    }

    /// Wait before every reply
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.state.delay.lock() = Some(delay);
        self
    }

    /// Number of dispatches so far
    pub fn call_count(&self) -> u32 {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// All dispatched requests, oldest first
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }

    /// The most recent request
    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.state.requests.lock().last().cloned()
    }

    fn push(self, reply: Reply) -> Self {
        self.state.script.lock().push_back(reply);
        self
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn dispatch(&self, request: TransportRequest) -> Result<RawResponse> {
        let call = self.state.calls.fetch_add(1, Ordering::SeqCst) + 1;

        let body = match request.body {
            TransportBody::Empty => Bytes::new(),
            TransportBody::Bytes(bytes) => bytes,
            TransportBody::Stream(mut stream) => {
                let mut buffer = Vec::new();
                while let Some(chunk) = stream.next().await {
                    buffer.extend_from_slice(&chunk?);
                }
                Bytes::from(buffer)
            }
        };
        let recorded = RecordedRequest {
            method: request.method,
            url: request.url,
            headers: request.headers,
            body,
            timeout: request.timeout,
        };
        self.state.requests.lock().push(recorded.clone());

        let delay = *self.state.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.state.script.lock().pop_front();
        match scripted {
            Some(Reply::Response(status, headers, body)) => {
                Ok(RawResponse::new(status, headers, body).with_url(recorded.url))
            }
            Some(Reply::Failure(error)) => Err(error),
            None => {
                let responder = self.state.responder.lock().clone();
                match responder {
                    Some(responder) => responder(&recorded, call),
                    None => Ok(RawResponse::new(StatusCode::OK, HeaderMap::new(), Bytes::new())),
                }
            }
        }
    }
}

/// Shared, ordered log of filter hook invocations.
#[derive(Clone, Default)]
pub struct HookLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl HookLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all entries
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Clear all entries
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    fn record(&self, entry: String) {
        self.entries.lock().push(entry);
    }
}

/// Filter that writes `"<name>:before"` and `"<name>:after:<status>"` to a [`HookLog`].
#[derive(Clone)]
pub struct RecordingFilter {
    name: String,
    log: HookLog,
}

impl RecordingFilter {
    /// Create a filter writing to `log`
    pub fn new(name: &str, log: &HookLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
        }
    }
}

#[async_trait]
impl Filter for RecordingFilter {
    async fn on_request(&self, _request: &mut PreparedRequest) -> Result<()> {
        self.log.record(format!("{}:before", self.name));
        Ok(())
    }

    async fn on_response(&self, response: &Response, _http_errors_as_exceptions: bool) -> Result<()> {
        self.log
            .record(format!("{}:after:{}", self.name, response.status().as_u16()));
        Ok(())
    }
}
