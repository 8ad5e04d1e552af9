//! HTTP client implementation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use http::header::{AUTHORIZATION, HeaderName, HeaderValue, USER_AGENT};
use http::{HeaderMap, Method};
use parking_lot::RwLock;
use tracing::debug;

use crate::request::basic_credentials;
use crate::{
    Filter, FilterChain, Formatter, FormatterCollection, HttpClientConfig, HttpClientError,
    ReqwestTransport, Request, RequestOptions, Result, RetryCoordinator, RetryStrategy, Transport,
};

/// A mutator applied to every request the client creates.
pub type DefaultRequestFn = Arc<dyn Fn(Request) -> Request + Send + Sync>;

/// State every request shares with its client for its whole lifetime.
pub(crate) struct ClientContext {
    transport: Arc<dyn Transport>,
    base_url: Option<String>,
    disposed: AtomicBool,
}

impl ClientContext {
    pub(crate) fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    pub(crate) fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

/// Defaults copied into each new request.
#[derive(Clone)]
struct ClientState {
    headers: HeaderMap,
    options: RequestOptions,
    filters: FilterChain,
    formatters: FormatterCollection,
    coordinator: RetryCoordinator,
    defaults: Vec<DefaultRequestFn>,
}

/// Fluent HTTP client.
///
/// Cloning is cheap and clones share configuration. Configuration methods
/// (`add_filter`, `set_*`, `add_default`) are meant to be called before
/// requests are dispatched; each request snapshots the client state when it
/// is created.
#[derive(Clone)]
pub struct HttpClient {
    context: Arc<ClientContext>,
    state: Arc<RwLock<ClientState>>,
}

impl HttpClient {
    /// Create a client backed by reqwest.
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(&config)?;
        Self::with_transport(config, transport)
    }

    /// Create a client with a custom transport.
    pub fn with_transport<T: Transport + 'static>(
        config: HttpClientConfig,
        transport: T,
    ) -> Result<Self> {
        let headers = default_headers(&config)?;
        Ok(Self::assemble(config, Arc::new(transport), headers))
    }

    /// Create a client with a custom transport and default configuration.
    pub fn from_transport<T: Transport + 'static>(transport: T) -> Self {
        let config = HttpClientConfig::default();
        let headers = default_headers(&config).unwrap_or_default();
        Self::assemble(config, Arc::new(transport), headers)
    }

    fn assemble(
        config: HttpClientConfig,
        transport: Arc<dyn Transport>,
        headers: HeaderMap,
    ) -> Self {
        let coordinator = config
            .retry
            .map(RetryCoordinator::new)
            .unwrap_or_default();

        debug!(base_url = ?config.base_url, "Creating HTTP client");

        Self {
            context: Arc::new(ClientContext {
                transport,
                base_url: config.base_url,
                disposed: AtomicBool::new(false),
            }),
            state: Arc::new(RwLock::new(ClientState {
                headers,
                options: config.options,
                filters: FilterChain::with_defaults(),
                formatters: FormatterCollection::default(),
                coordinator,
                defaults: Vec::new(),
            })),
        }
    }

    /// The base URL relative resources are resolved against.
    pub fn base_url(&self) -> Option<&str> {
        self.context.base_url()
    }

    /// Create a GET request.
    pub fn get(&self, resource: impl Into<String>) -> Request {
        self.request(Method::GET, resource)
    }

    /// Create a POST request.
    pub fn post(&self, resource: impl Into<String>) -> Request {
        self.request(Method::POST, resource)
    }

    /// Create a PUT request.
    pub fn put(&self, resource: impl Into<String>) -> Request {
        self.request(Method::PUT, resource)
    }

    /// Create a PATCH request.
    pub fn patch(&self, resource: impl Into<String>) -> Request {
        self.request(Method::PATCH, resource)
    }

    /// Create a DELETE request.
    pub fn delete(&self, resource: impl Into<String>) -> Request {
        self.request(Method::DELETE, resource)
    }

    /// Create a HEAD request.
    pub fn head(&self, resource: impl Into<String>) -> Request {
        self.request(Method::HEAD, resource)
    }

    /// Create a request with any method.
    pub fn request(&self, method: Method, resource: impl Into<String>) -> Request {
        let state = self.state.read().clone();
        let request = Request::new(
            Arc::clone(&self.context),
            method,
            resource.into(),
            state.headers,
            state.options,
            state.filters,
            state.formatters,
            state.coordinator,
        );
        state
            .defaults
            .iter()
            .fold(request, |request, apply| apply(request))
    }

    /// Append a client-level filter. The handle can be passed to
    /// [`Request::without_filter_instance`].
    pub fn add_filter<F: Filter + 'static>(&self, filter: F) -> Arc<dyn Filter> {
        self.state.write().filters.add(filter)
    }

    /// Remove all client-level filters of type `F`.
    pub fn remove_filters<F: Filter + 'static>(&self) -> usize {
        self.state.write().filters.remove_all::<F>()
    }

    /// A copy of the client-level filter chain.
    pub fn filters(&self) -> FilterChain {
        self.state.read().filters.clone()
    }

    /// Register a formatter with the highest priority.
    pub fn add_formatter<F: Formatter + 'static>(&self, formatter: F) {
        self.state.write().formatters.add_first(formatter);
    }

    /// Override default options; unset fields keep their current values.
    pub fn set_options(&self, options: RequestOptions) {
        let mut state = self.state.write();
        state.options = state.options.merge(options);
    }

    /// Retry every request with one strategy.
    pub fn set_retry_policy<S: RetryStrategy + 'static>(&self, policy: S) {
        self.state.write().coordinator = RetryCoordinator::new(policy);
    }

    /// Replace the default retry coordinator.
    pub fn set_retry_coordinator(&self, coordinator: RetryCoordinator) {
        self.state.write().coordinator = coordinator;
    }

    /// Set the `User-Agent` header.
    pub fn set_user_agent(&self, user_agent: &str) -> Result<()> {
        let value = parse_value(user_agent)?;
        self.state.write().headers.insert(USER_AGENT, value);
        Ok(())
    }

    /// Set a default header, replacing any existing value.
    pub fn set_default_header(&self, name: &str, value: &str) -> Result<()> {
        let name = HeaderName::try_from(name)
            .map_err(|e| HttpClientError::Configuration(format!("header '{name}': {e}")))?;
        let value = parse_value(value)?;
        self.state.write().headers.insert(name, value);
        Ok(())
    }

    /// Set the default `Authorization` header.
    pub fn set_authentication(&self, scheme: &str, parameter: &str) -> Result<()> {
        let mut value = parse_value(&format!("{scheme} {parameter}"))?;
        value.set_sensitive(true);
        self.state.write().headers.insert(AUTHORIZATION, value);
        Ok(())
    }

    /// Set default bearer authentication.
    pub fn set_bearer_authentication(&self, token: &str) -> Result<()> {
        self.set_authentication("Bearer", token)
    }

    /// Set default basic authentication.
    pub fn set_basic_authentication(&self, username: &str, password: &str) -> Result<()> {
        self.set_authentication("Basic", &basic_credentials(username, password))
    }

    /// Apply `apply` to every request created after this call.
    pub fn add_default<F>(&self, apply: F)
    where
        F: Fn(Request) -> Request + Send + Sync + 'static,
    {
        self.state.write().defaults.push(Arc::new(apply));
    }

    /// Mark the client as disposed. Executing any of its requests afterwards
    /// fails with a configuration error.
    pub fn dispose(&self) {
        if !self.context.disposed.swap(true, Ordering::AcqRel) {
            debug!("HTTP client disposed");
        }
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.context.is_disposed()
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("HttpClient")
            .field("base_url", &self.context.base_url)
            .field("disposed", &self.context.is_disposed())
            .field("filters", &state.filters)
            .field("formatters", &state.formatters)
            .field("retry", &state.coordinator)
            .finish_non_exhaustive()
    }
}

fn default_headers(config: &HttpClientConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, parse_value(&config.user_agent)?);
    for (name, value) in &config.default_headers {
        let name = HeaderName::try_from(name.as_str())
            .map_err(|e| HttpClientError::Configuration(format!("header '{name}': {e}")))?;
        headers.append(name, parse_value(value)?);
    }
    Ok(headers)
}

fn parse_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::try_from(value)
        .map_err(|e| HttpClientError::Configuration(format!("invalid header value: {e}")))
}
