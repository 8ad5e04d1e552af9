//! HTTP client configuration and per-request options.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// When an attempt is considered complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionMode {
    /// Read the whole body inside the attempt, so body failures can be retried.
    #[default]
    ContentRead,
    /// Complete as soon as headers arrive; the body is read on first access.
    HeadersRead,
}

/// Request options. Unset fields inherit from the client's defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Return non-success responses instead of raising [`crate::ApiError`].
    pub ignore_http_errors: Option<bool>,
    /// Drop query arguments with no value instead of sending `key=`.
    pub ignore_null_arguments: Option<bool>,
    /// When an attempt completes.
    pub complete_when: Option<CompletionMode>,
}

impl RequestOptions {
    /// Empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether HTTP error statuses are returned instead of raised.
    pub fn ignore_http_errors(mut self, ignore: bool) -> Self {
        self.ignore_http_errors = Some(ignore);
        self
    }

    /// Set whether null arguments are dropped.
    pub fn ignore_null_arguments(mut self, ignore: bool) -> Self {
        self.ignore_null_arguments = Some(ignore);
        self
    }

    /// Set the completion mode.
    pub fn complete_when(mut self, mode: CompletionMode) -> Self {
        self.complete_when = Some(mode);
        self
    }

    /// Overlay the fields set in `other` onto these options.
    pub fn merge(self, other: RequestOptions) -> Self {
        Self {
            ignore_http_errors: other.ignore_http_errors.or(self.ignore_http_errors),
            ignore_null_arguments: other.ignore_null_arguments.or(self.ignore_null_arguments),
            complete_when: other.complete_when.or(self.complete_when),
        }
    }

    /// Whether non-success statuses should raise an error.
    pub fn http_errors_as_exceptions(&self) -> bool {
        !self.ignore_http_errors.unwrap_or(false)
    }

    /// Whether null arguments are dropped.
    pub fn ignores_null_arguments(&self) -> bool {
        self.ignore_null_arguments.unwrap_or(true)
    }

    /// The effective completion mode.
    pub fn completion_mode(&self) -> CompletionMode {
        self.complete_when.unwrap_or_default()
    }
}

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Base URL that relative resources are resolved against.
    pub base_url: Option<String>,
    /// Default request timeout.
    pub timeout: Duration,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Default headers for all requests.
    pub default_headers: Vec<(String, String)>,
    /// User agent string.
    pub user_agent: String,
    /// Default request options.
    pub options: RequestOptions,
    /// Default retry policy; `None` means a single attempt.
    pub retry: Option<RetryPolicy>,
    /// Enable gzip compression.
    pub gzip: bool,
    /// Enable brotli compression.
    pub brotli: bool,
    /// Follow redirects.
    pub follow_redirects: bool,
    /// Maximum redirects to follow.
    pub max_redirects: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(100),
            connect_timeout: Duration::from_secs(10),
            default_headers: Vec::new(),
            user_agent: format!("fluent-http-client/{}", env!("CARGO_PKG_VERSION")),
            options: RequestOptions::default(),
            retry: None,
            gzip: true,
            brotli: true,
            follow_redirects: true,
            max_redirects: 10,
        }
    }
}

impl HttpClientConfig {
    /// Create a new configuration builder.
    pub fn builder() -> HttpClientConfigBuilder {
        HttpClientConfigBuilder::default()
    }
}

/// Builder for HTTP client configuration.
#[derive(Debug, Default)]
pub struct HttpClientConfigBuilder {
    config: HttpClientConfig,
}

impl HttpClientConfigBuilder {
    /// Set the base URL for all requests.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    /// Set the default request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Add a default header for all requests.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.push((name.into(), value.into()));
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Set the default request options.
    pub fn options(mut self, options: RequestOptions) -> Self {
        self.config.options = self.config.options.merge(options);
        self
    }

    /// Set the default retry policy.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = Some(policy);
        self
    }

    /// Enable or disable gzip compression.
    pub fn gzip(mut self, enable: bool) -> Self {
        self.config.gzip = enable;
        self
    }

    /// Enable or disable brotli compression.
    pub fn brotli(mut self, enable: bool) -> Self {
        self.config.brotli = enable;
        self
    }

    /// Enable or disable following redirects.
    pub fn follow_redirects(mut self, enable: bool) -> Self {
        self.config.follow_redirects = enable;
        self
    }

    /// Set the maximum number of redirects to follow.
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.config.max_redirects = max;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> HttpClientConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = RequestOptions::default();
        assert!(options.http_errors_as_exceptions());
        assert!(options.ignores_null_arguments());
        assert_eq!(options.completion_mode(), CompletionMode::ContentRead);
    }

    #[test]
    fn test_merge_only_overrides_set_fields() {
        let base = RequestOptions::new().ignore_http_errors(true);
        let merged = base.merge(RequestOptions::new().ignore_null_arguments(false));
        assert_eq!(merged.ignore_http_errors, Some(true));
        assert_eq!(merged.ignore_null_arguments, Some(false));
        assert!(!merged.http_errors_as_exceptions());

        let overridden = merged.merge(RequestOptions::new().ignore_http_errors(false));
        assert_eq!(overridden.ignore_http_errors, Some(false));
    }

    #[test]
    fn test_builder() {
        let config = HttpClientConfig::builder()
            .base_url("https://api.example.com")
            .timeout(Duration::from_secs(5))
            .default_header("X-Api-Version", "2")
            .options(RequestOptions::new().ignore_http_errors(true))
            .build();

        assert_eq!(config.base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.default_headers.len(), 1);
        assert_eq!(config.options.ignore_http_errors, Some(true));
        assert!(config.retry.is_none());
    }
}
