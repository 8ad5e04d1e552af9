//! Request/response filters and the ordered chain that runs them.
//!
//! Filters are configured before requests are dispatched. A request takes a
//! shallow copy of its client's chain when it is created, so later changes to
//! the client's filters don't affect requests already built.

use std::any::TypeId;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use http::header::{AUTHORIZATION, HeaderName, HeaderValue};

use crate::{ApiError, HttpClientError, PreparedRequest, Response, Result};

/// Middleware with hooks around every dispatch.
#[async_trait]
pub trait Filter: Send + Sync {
    /// Called before the request is sent. May mutate headers and URL.
    async fn on_request(&self, _request: &mut PreparedRequest) -> Result<()> {
        Ok(())
    }

    /// Called with the final response, after any retries.
    async fn on_response(
        &self,
        _response: &Response,
        _http_errors_as_exceptions: bool,
    ) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
struct FilterEntry {
    type_id: TypeId,
    filter: Arc<dyn Filter>,
}

/// Ordered list of filters.
#[derive(Clone, Default)]
pub struct FilterChain {
    filters: Vec<FilterEntry>,
}

impl FilterChain {
    /// An empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// A chain holding the [`DefaultErrorFilter`].
    pub fn with_defaults() -> Self {
        let mut chain = Self::new();
        chain.add(DefaultErrorFilter);
        chain
    }

    /// Append a filter and return a handle that can later remove it.
    pub fn add<F: Filter + 'static>(&mut self, filter: F) -> Arc<dyn Filter> {
        self.add_shared(Arc::new(filter))
    }

    /// Append a filter shared with other chains.
    pub fn add_shared<F: Filter + 'static>(&mut self, filter: Arc<F>) -> Arc<dyn Filter> {
        let filter: Arc<dyn Filter> = filter;
        self.filters.push(FilterEntry {
            type_id: TypeId::of::<F>(),
            filter: filter.clone(),
        });
        filter
    }

    /// Remove one specific filter instance.
    pub fn remove(&mut self, filter: &Arc<dyn Filter>) -> bool {
        let before = self.filters.len();
        self.filters.retain(|entry| !Arc::ptr_eq(&entry.filter, filter));
        self.filters.len() != before
    }

    /// Remove every filter of type `F`, returning how many were removed.
    pub fn remove_all<F: Filter + 'static>(&mut self) -> usize {
        let before = self.filters.len();
        self.filters.retain(|entry| entry.type_id != TypeId::of::<F>());
        before - self.filters.len()
    }

    /// Whether a filter of type `F` is present.
    pub fn contains<F: Filter + 'static>(&self) -> bool {
        self.filters.iter().any(|entry| entry.type_id == TypeId::of::<F>())
    }

    /// Remove all filters.
    pub fn clear(&mut self) {
        self.filters.clear();
    }

    /// Number of filters.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run every `on_request` hook in registration order.
    pub async fn on_request(&self, request: &mut PreparedRequest) -> Result<()> {
        for entry in &self.filters {
            entry.filter.on_request(request).await?;
        }
        Ok(())
    }

    /// Run every `on_response` hook in registration order.
    pub async fn on_response(&self, response: &Response, http_errors_as_exceptions: bool) -> Result<()> {
        for entry in &self.filters {
            entry
                .filter
                .on_response(response, http_errors_as_exceptions)
                .await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain")
            .field("len", &self.filters.len())
            .finish()
    }
}

/// Raises [`ApiError`] for non-success responses when HTTP errors are raised.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultErrorFilter;

#[async_trait]
impl Filter for DefaultErrorFilter {
    async fn on_response(&self, response: &Response, http_errors_as_exceptions: bool) -> Result<()> {
        if http_errors_as_exceptions && !response.is_success() {
            return Err(ApiError::new(response.clone()).into());
        }
        Ok(())
    }
}

/// Logging filter that logs requests and responses.
#[derive(Debug, Default, Clone)]
pub struct LoggingFilter {
    log_headers: bool,
}

impl LoggingFilter {
    /// Create a new logging filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable logging of headers.
    pub fn with_headers(mut self) -> Self {
        self.log_headers = true;
        self
    }
}

#[async_trait]
impl Filter for LoggingFilter {
    async fn on_request(&self, request: &mut PreparedRequest) -> Result<()> {
        tracing::debug!(
            method = %request.method(),
            url = %request.url(),
            "Sending HTTP request"
        );

        if self.log_headers {
            for (name, value) in request.headers() {
                tracing::trace!(header = %name, value = ?value, "Request header");
            }
        }
        Ok(())
    }

    async fn on_response(&self, response: &Response, _http_errors_as_exceptions: bool) -> Result<()> {
        tracing::debug!(status = %response.status(), "Received HTTP response");

        if self.log_headers {
            for (name, value) in response.headers() {
                tracing::trace!(header = %name, value = ?value, "Response header");
            }
        }
        Ok(())
    }
}

/// Adds an authentication header to every request.
#[derive(Clone)]
pub struct AuthFilter {
    header: HeaderName,
    value: HeaderValue,
}

impl AuthFilter {
    /// Authenticate with an arbitrary `Authorization` scheme.
    pub fn scheme(scheme: &str, parameter: &str) -> Result<Self> {
        Ok(Self {
            header: AUTHORIZATION,
            value: sensitive_value(&format!("{scheme} {parameter}"))?,
        })
    }

    /// Authenticate with a bearer token.
    pub fn bearer(token: &str) -> Result<Self> {
        Self::scheme("Bearer", token)
    }

    /// Authenticate with basic credentials.
    pub fn basic(username: &str, password: &str) -> Result<Self> {
        Self::scheme("Basic", &crate::request::basic_credentials(username, password))
    }

    /// Authenticate with an API key sent in a custom header.
    pub fn api_key(header: &str, key: &str) -> Result<Self> {
        let header = HeaderName::from_bytes(header.as_bytes())
            .map_err(|e| HttpClientError::Configuration(e.to_string()))?;
        Ok(Self {
            header,
            value: sensitive_value(key)?,
        })
    }
}

impl std::fmt::Debug for AuthFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthFilter")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

fn sensitive_value(value: &str) -> Result<HeaderValue> {
    let mut value =
        HeaderValue::from_str(value).map_err(|e| HttpClientError::Configuration(e.to_string()))?;
    value.set_sensitive(true);
    Ok(value)
}

#[async_trait]
impl Filter for AuthFilter {
    async fn on_request(&self, request: &mut PreparedRequest) -> Result<()> {
        request
            .headers_mut()
            .insert(self.header.clone(), self.value.clone());
        Ok(())
    }
}

/// Adds a unique ID header to each request.
#[derive(Debug, Clone)]
pub struct RequestIdFilter {
    header: HeaderName,
}

static REQUEST_SEQUENCE: AtomicU64 = AtomicU64::new(0);

impl RequestIdFilter {
    /// Create a request ID filter using `X-Request-ID`.
    pub fn new() -> Self {
        Self {
            header: HeaderName::from_static("x-request-id"),
        }
    }

    /// Create with a custom header name.
    pub fn with_header(header: &str) -> Result<Self> {
        let header = HeaderName::from_bytes(header.as_bytes())
            .map_err(|e| HttpClientError::Configuration(e.to_string()))?;
        Ok(Self { header })
    }
}

impl Default for RequestIdFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Filter for RequestIdFilter {
    async fn on_request(&self, request: &mut PreparedRequest) -> Result<()> {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let sequence = REQUEST_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let request_id = format!("{nanos:x}-{sequence:x}");

        if let Ok(value) = HeaderValue::from_str(&request_id) {
            request.headers_mut().insert(self.header.clone(), value);
        }
        Ok(())
    }
}
