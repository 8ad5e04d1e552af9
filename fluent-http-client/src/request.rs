//! Request descriptor and execution pipeline.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use bytes::Bytes;
use futures::future::BoxFuture;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::ClientContext;
use crate::query::{ArgumentValue, Arguments, merge_query, resolve_url};
use crate::transport::TransportRequest;
use crate::{
    Body, BodyBuilder, CompletionMode, Filter, FilterChain, FormatterCollection, HttpClientError,
    RequestOptions, Response, Result, RetryCoordinator, RetryStrategy,
};

/// Request state for one execution, as seen by filters.
///
/// The method and body are fixed; filters may change the URL, headers and timeout.
#[derive(Debug)]
pub struct PreparedRequest {
    method: Method,
    url: url::Url,
    headers: HeaderMap,
    body: Body,
    options: RequestOptions,
    timeout: Option<Duration>,
}

impl PreparedRequest {
    /// Create a request with no headers or body.
    pub fn new(method: Method, url: url::Url, options: RequestOptions) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Body::empty(),
            options,
            timeout: None,
        }
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Final URL, including merged arguments.
    pub fn url(&self) -> &url::Url {
        &self.url
    }

    /// Mutable access to the URL.
    pub fn url_mut(&mut self) -> &mut url::Url {
        &mut self.url
    }

    /// Request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable access to the headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Request body.
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Effective options.
    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    /// Per-request timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Set the per-request timeout.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    fn to_transport(&self) -> Result<TransportRequest> {
        Ok(TransportRequest {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.materialize()?,
            timeout: self.timeout,
        })
    }
}

/// A request being built.
///
/// Every `with_*` call updates the descriptor and returns it for chaining.
/// Executing or awaiting runs the whole pipeline (filters, retries, transport)
/// again each time; nothing is memoized.
pub struct Request {
    context: Arc<ClientContext>,
    method: Method,
    resource: String,
    headers: HeaderMap,
    arguments: Vec<(String, Option<String>)>,
    body: Body,
    options: RequestOptions,
    filters: FilterChain,
    formatters: FormatterCollection,
    coordinator: RetryCoordinator,
    cancel: CancellationToken,
    timeout: Option<Duration>,
    build_error: Option<String>,
}

impl Request {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        context: Arc<ClientContext>,
        method: Method,
        resource: String,
        headers: HeaderMap,
        options: RequestOptions,
        filters: FilterChain,
        formatters: FormatterCollection,
        coordinator: RetryCoordinator,
    ) -> Self {
        Self {
            context,
            method,
            resource,
            headers,
            arguments: Vec::new(),
            body: Body::empty(),
            options,
            filters,
            formatters,
            coordinator,
            cancel: CancellationToken::new(),
            timeout: None,
            build_error: None,
        }
    }

    /// Set a header, replacing any existing value.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        match (
            HeaderName::try_from(name.as_ref()),
            HeaderValue::try_from(value.as_ref()),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => self.fail(format!("invalid header '{}'", name.as_ref())),
        }
        self
    }

    /// Add multiple headers, replacing existing values with the same names.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Add a query argument. `None` values follow the `ignore_null_arguments` option.
    pub fn with_argument(mut self, key: impl Into<String>, value: impl ArgumentValue) -> Self {
        self.arguments.push((key.into(), value.into_argument()));
        self
    }

    /// Add query arguments from pairs or a map.
    pub fn with_arguments<I, K, V>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ArgumentValue,
    {
        self.arguments.extend(
            arguments
                .into_iter()
                .map(|(key, value)| (key.into(), value.into_argument())),
        );
        self
    }

    /// Add query arguments from the fields of a serializable record.
    pub fn with_arguments_from<T: Serialize + ?Sized>(self, record: &T) -> Self {
        match Arguments::from_serialize(record) {
            Ok(arguments) => self.with_arguments(arguments),
            Err(e) => self.failed(e.to_string()),
        }
    }

    /// Set the body using a builder that can serialize models.
    pub fn with_body<F>(mut self, build: F) -> Self
    where
        F: FnOnce(BodyBuilder<'_>) -> Result<Body>,
    {
        match build(BodyBuilder::new(&self.formatters)) {
            Ok(body) => self.body = body,
            Err(e) => self.fail(e.to_string()),
        }
        self
    }

    /// Set the body to a model serialized with the default formatter.
    pub fn with_model<T: Serialize + ?Sized>(self, model: &T) -> Self {
        self.with_body(|body| body.model(model))
    }

    /// Apply an arbitrary change to the request.
    pub fn with_custom<F: FnOnce(&mut Self)>(mut self, customize: F) -> Self {
        customize(&mut self);
        self
    }

    /// Use a cancellation token for this request and its response body.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Override options; unset fields keep their current values.
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = self.options.merge(options);
        self
    }

    /// Set a per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Retry with a single strategy, replacing the client's default.
    pub fn with_retry_policy<S: RetryStrategy + 'static>(mut self, policy: S) -> Self {
        self.coordinator = RetryCoordinator::new(policy);
        self
    }

    /// Replace the retry coordinator.
    pub fn with_retry_coordinator(mut self, coordinator: RetryCoordinator) -> Self {
        self.coordinator = coordinator;
        self
    }

    /// Disable retries for this request.
    pub fn without_retry(mut self) -> Self {
        self.coordinator = RetryCoordinator::none();
        self
    }

    /// Append a filter for this request only.
    pub fn with_filter<F: Filter + 'static>(mut self, filter: F) -> Self {
        self.filters.add(filter);
        self
    }

    /// Remove every filter of type `F` from this request.
    pub fn without_filter<F: Filter + 'static>(mut self) -> Self {
        self.filters.remove_all::<F>();
        self
    }

    /// Remove one specific filter instance from this request.
    pub fn without_filter_instance(mut self, filter: &Arc<dyn Filter>) -> Self {
        self.filters.remove(filter);
        self
    }

    /// Set the `Authorization` header.
    pub fn with_authentication(self, scheme: &str, parameter: &str) -> Self {
        match HeaderValue::try_from(format!("{scheme} {parameter}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                self.with_custom(|request| {
                    request.headers.insert(AUTHORIZATION, value);
                })
            }
            Err(e) => self.failed(e.to_string()),
        }
    }

    /// Set bearer authentication.
    pub fn with_bearer_authentication(self, token: &str) -> Self {
        self.with_authentication("Bearer", token)
    }

    /// Set basic authentication.
    pub fn with_basic_authentication(self, username: &str, password: &str) -> Self {
        self.with_authentication("Basic", &basic_credentials(username, password))
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The resource as given, before resolution against the base URL.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Current headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable access to the headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Query arguments in insertion order.
    pub fn arguments(&self) -> &[(String, Option<String>)] {
        &self.arguments
    }

    /// Current options.
    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    /// This request's filters.
    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }

    /// Mutable access to this request's filters.
    pub fn filters_mut(&mut self) -> &mut FilterChain {
        &mut self.filters
    }

    /// This request's formatters.
    pub fn formatters(&self) -> &FormatterCollection {
        &self.formatters
    }

    /// The cancellation token.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The final URL, with the resource resolved and arguments merged.
    pub fn url(&self) -> Result<url::Url> {
        let resolved = resolve_url(self.context.base_url(), &self.resource)?;
        let merged = merge_query(
            &resolved,
            &self.arguments,
            self.options.ignores_null_arguments(),
        );
        url::Url::parse(&merged).map_err(|e| HttpClientError::InvalidUrl(format!("{merged}: {e}")))
    }

    /// Run the pipeline: request filters, 1..N attempts, response filters.
    pub async fn execute(&self) -> Result<Response> {
        if self.context.is_disposed() {
            return Err(HttpClientError::Configuration(
                "the client has been disposed".to_string(),
            ));
        }
        if let Some(error) = &self.build_error {
            return Err(HttpClientError::RequestBuild(error.clone()));
        }

        let mut prepared = PreparedRequest {
            method: self.method.clone(),
            url: self.url()?,
            headers: self.headers.clone(),
            body: self.body.clone(),
            options: self.options,
            timeout: self.timeout,
        };
        if let Some(content_type) = prepared.body.content_type().cloned() {
            prepared.headers.insert(CONTENT_TYPE, content_type);
        }

        debug!(method = %prepared.method, url = %prepared.url, "Executing request");
        self.filters.on_request(&mut prepared).await?;

        let transport = self.context.transport();
        let completion = prepared.options.completion_mode();
        let raw = self
            .coordinator
            .execute(&self.cancel, |_| {
                let transport = Arc::clone(&transport);
                let request = prepared.to_transport();
                async move {
                    let response = transport.dispatch(request?).await?;
                    match completion {
                        CompletionMode::ContentRead => response.buffer().await,
                        CompletionMode::HeadersRead => Ok(response),
                    }
                }
            })
            .await?;

        let response = Response::new(raw, self.formatters.clone(), self.cancel.clone());
        self.filters
            .on_response(&response, prepared.options.http_errors_as_exceptions())
            .await?;
        Ok(response)
    }

    /// Execute and read the body as bytes.
    pub async fn as_bytes(&self) -> Result<Bytes> {
        self.execute().await?.as_bytes().await
    }

    /// Execute and read the body as text.
    pub async fn as_string(&self) -> Result<String> {
        self.execute().await?.as_string().await
    }

    /// Execute and deserialize the body.
    pub async fn as_model<T: DeserializeOwned>(&self) -> Result<T> {
        self.execute().await?.as_model().await
    }

    /// Execute and deserialize the body as a list.
    pub async fn as_array<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.execute().await?.as_array().await
    }

    fn fail(&mut self, message: String) {
        if self.build_error.is_none() {
            tracing::error!(error = %message, "Failed to build request");
            self.build_error = Some(message);
        }
    }

    fn failed(mut self, message: String) -> Self {
        self.fail(message);
        self
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("resource", &self.resource)
            .field("arguments", &self.arguments)
            .field("body", &self.body)
            .field("options", &self.options)
            .field("filters", &self.filters)
            .field("retry", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl<'a> IntoFuture for &'a Request {
    type Output = Result<Response>;
    type IntoFuture = BoxFuture<'a, Result<Response>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.execute())
    }
}

impl IntoFuture for Request {
    type Output = Result<Response>;
    type IntoFuture = BoxFuture<'static, Result<Response>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.execute().await })
    }
}

pub(crate) fn basic_credentials(username: &str, password: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HttpClient, HttpClientConfig, RawResponse, Transport};
    use async_trait::async_trait;
    use http::StatusCode;

    struct Ok200;

    #[async_trait]
    impl Transport for Ok200 {
        async fn dispatch(&self, _request: TransportRequest) -> Result<RawResponse> {
            Ok(RawResponse::new(StatusCode::OK, HeaderMap::new(), Bytes::new()))
        }
    }

    fn client() -> HttpClient {
        let config = HttpClientConfig::builder()
            .base_url("https://api.example.com/v2/")
            .build();
        HttpClient::with_transport(config, Ok200).unwrap()
    }

    #[test]
    fn test_url_resolves_and_merges_arguments() {
        let request = client()
            .get("search?q=rust")
            .with_argument("limit", 10u32)
            .with_argument("cursor", None::<String>)
            .with_arguments([("tag", "a"), ("tag", "b")]);

        assert_eq!(
            request.url().unwrap().as_str(),
            "https://api.example.com/v2/search?q=rust&limit=10&tag=a&tag=b"
        );
    }

    #[test]
    fn test_null_arguments_kept_when_requested() {
        let request = client()
            .get("items")
            .with_argument("cursor", None::<String>)
            .with_options(RequestOptions::new().ignore_null_arguments(false));

        assert_eq!(
            request.url().unwrap().as_str(),
            "https://api.example.com/v2/items?cursor="
        );
    }

    #[test]
    fn test_with_header_replaces_value() {
        let request = client()
            .get("items")
            .with_header("x-version", "1")
            .with_header("x-version", "2");
        assert_eq!(request.headers().get_all("x-version").iter().count(), 1);
        assert_eq!(request.headers()["x-version"], "2");
    }

    #[test]
    fn test_with_custom_and_accessors() {
        let request = client().post("items").with_custom(|request| {
            request.headers_mut().append("x-a", HeaderValue::from_static("1"));
            request.headers_mut().append("x-a", HeaderValue::from_static("2"));
        });
        assert_eq!(request.method(), &Method::POST);
        assert_eq!(request.resource(), "items");
        assert_eq!(request.headers().get_all("x-a").iter().count(), 2);
    }

    #[test]
    fn test_bearer_authentication() {
        let request = client().get("items").with_bearer_authentication("abc");
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer abc");
    }

    #[tokio::test]
    async fn test_first_build_error_is_reported() {
        let err = client()
            .get("items")
            .with_header("bad header", "1")
            .with_arguments_from(&42)
            .execute()
            .await
            .unwrap_err();

        match err {
            HttpClientError::RequestBuild(message) => assert!(message.contains("bad header")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_body_content_type_sent_with_request() {
        let request = client().post("items").with_body(|body| body.text("hello"));
        let response = request.execute().await.unwrap();
        assert!(response.is_success());
        assert_eq!(
            request.body.content_type().unwrap(),
            "text/plain; charset=utf-8"
        );
    }

    struct UnavailableThenStream {
        calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl Transport for UnavailableThenStream {
        async fn dispatch(&self, _request: TransportRequest) -> Result<RawResponse> {
            let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let status = if call == 0 { StatusCode::SERVICE_UNAVAILABLE } else { StatusCode::OK };
            let chunks = futures::stream::iter([
                Ok::<_, HttpClientError>(Bytes::from("str")),
                Ok(Bytes::from("eamed")),
            ]);
            Ok(RawResponse::streaming(status, HeaderMap::new(), Box::pin(chunks)))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_retried_streaming_request_runs_on_spawned_task() {
        let transport = UnavailableThenStream {
            calls: std::sync::atomic::AtomicU32::new(0),
        };
        let client = HttpClient::with_transport(HttpClientConfig::default(), transport).unwrap();
        let request = client
            .get("https://api.example.com/feed")
            .with_options(RequestOptions::new().complete_when(CompletionMode::HeadersRead))
            .with_retry_policy(crate::RetryPolicy::immediate(3));

        let response = tokio::spawn(async move { request.execute().await })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.as_string().await.unwrap(), "streamed");

        let owned = client.get("https://api.example.com/feed");
        let response = tokio::spawn(owned.into_future()).await.unwrap().unwrap();
        assert!(response.is_success());
    }

    #[test]
    fn test_basic_credentials() {
        assert_eq!(basic_credentials("Aladdin", "open sesame"), "QWxhZGRpbjpvcGVuIHNlc2FtZQ==");
    }
}
