//! HTTP client error types.

use http::StatusCode;
use thiserror::Error;

use crate::Response;

/// Result type for HTTP client operations.
pub type Result<T> = std::result::Result<T, HttpClientError>;

/// HTTP client errors.
#[derive(Debug, Error)]
pub enum HttpClientError {
    /// The client or request was misconfigured (e.g. the client was disposed).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No registered formatter handles the content type.
    #[error("No formatter is registered for content type '{0}'")]
    NoFormatter(String),

    /// The final response had a non-success status and HTTP errors are raised.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The request was cancelled by the caller.
    #[error("Request was cancelled")]
    Cancelled,

    /// The transport timed out before a response arrived.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Reading or replaying a body failed.
    #[error("Body error: {0}")]
    Body(String),

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Request building error.
    #[error("Failed to build request: {0}")]
    RequestBuild(String),

    /// Serialization or deserialization by a formatter failed.
    #[error("Format error: {0}")]
    Format(String),

    /// Underlying HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HttpClientError {
    /// Check if this is caller misconfiguration rather than a runtime failure.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::NoFormatter(_)
                | Self::InvalidUrl(_)
                | Self::UrlParse(_)
                | Self::RequestBuild(_)
        )
    }

    /// Check if the transport call itself failed.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Connection(_) | Self::Body(_) | Self::Http(_) | Self::Io(_)
        )
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_)) || matches!(self, Self::Http(e) if e.is_timeout())
    }

    /// Check if this is a connection error.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_)) || matches!(self, Self::Http(e) if e.is_connect())
    }

    /// Check if the caller cancelled the request.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Get the HTTP status code if this error carries one.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::Api(e) => Some(e.status()),
            Self::Http(e) => e.status(),
            _ => None,
        }
    }

    /// Get the API error if this is one.
    pub fn as_api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api(e) => Some(e),
            _ => None,
        }
    }
}

/// A response whose status indicates failure, raised by [`crate::DefaultErrorFilter`].
#[derive(Debug, Error)]
#[error("The API responded with HTTP {}", .response.status())]
pub struct ApiError {
    response: Response,
}

impl ApiError {
    /// Wrap a failed response.
    pub fn new(response: Response) -> Self {
        Self { response }
    }

    /// Status code of the failed response.
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    /// The failed response, still readable.
    pub fn response(&self) -> &Response {
        &self.response
    }

    /// Consume the error and return the response.
    pub fn into_response(self) -> Response {
        self.response
    }
}
