//! # Fluent HTTP Client
//!
//! A fluent request builder in front of a pluggable HTTP transport, with
//! filters, retry coordination and repeatable response reads.
//!
//! ## Features
//!
//! - **Fluent requests**: method, resource, arguments, headers, body and authentication
//! - **Filters**: ordered before/after hooks around every request
//! - **Retries**: chained retry policies with backoff and per-policy budgets
//! - **Cancellation**: one token aborts in-flight attempts, delays and body reads
//! - **Formatters**: JSON, form and plain text (de)serialization by content type
//! - **Repeatable responses**: the body can be read any number of times
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fluent_http_client::{HttpClient, HttpClientConfig};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = HttpClientConfig::builder()
//!         .base_url("https://api.example.com")
//!         .build();
//!     let client = HttpClient::new(config)?;
//!
//!     let users: Vec<User> = client
//!         .get("users")
//!         .with_argument("page", 2)
//!         .with_argument("search", None::<String>)
//!         .as_array()
//!         .await?;
//!
//!     println!("{} users", users.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Retries and Cancellation
//!
//! ```rust,no_run
//! use fluent_http_client::{CancellationToken, HttpClient, HttpClientConfig, RetryPolicy};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = HttpClient::new(HttpClientConfig::default())?;
//!     let cancel = CancellationToken::new();
//!
//!     let request = client
//!         .post("https://api.example.com/orders")
//!         .with_model(&serde_json::json!({"item": "widget", "quantity": 5}))
//!         .with_retry_policy(RetryPolicy::exponential(3, Duration::from_millis(100)))
//!         .with_cancellation(cancel.clone());
//!
//!     // Awaiting a reference runs the whole pipeline again each time.
//!     let first = (&request).await?;
//!     let second = (&request).await?;
//!     println!("{} {}", first.status(), second.status());
//!     Ok(())
//! }
//! ```

mod body;
mod client;
mod config;
mod error;
mod filter;
mod formatter;
mod query;
mod request;
mod response;
mod retry;
mod transport;

pub use body::{Body, BodyBuilder, BodyFactoryFn};
pub use client::{DefaultRequestFn, HttpClient};
pub use config::{CompletionMode, HttpClientConfig, HttpClientConfigBuilder, RequestOptions};
pub use error::{ApiError, HttpClientError, Result};
pub use filter::{AuthFilter, DefaultErrorFilter, Filter, FilterChain, LoggingFilter, RequestIdFilter};
pub use formatter::{
    FormUrlEncodedFormatter, Formatter, FormatterCollection, JsonFormatter, PlainTextFormatter,
};
pub use query::{ArgumentValue, Arguments, merge_query, resolve_url};
pub use request::{PreparedRequest, Request};
pub use response::Response;
pub use retry::{
    AttemptOutcome, BackoffStrategy, RetryCoordinator, RetryDelayFn, RetryPolicy,
    RetryPredicateFn, RetryStrategy,
};
pub use transport::{
    RawResponse, ReqwestTransport, ResponseBody, Transport, TransportBody, TransportRequest,
};

pub use bytes::Bytes;
pub use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
pub use tokio_util::sync::CancellationToken;
pub use url::Url;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::{
        Body, CancellationToken, CompletionMode, Filter, HttpClient, HttpClientConfig,
        HttpClientError, Method, Request, RequestOptions, Response, Result, RetryPolicy,
        StatusCode,
    };
}
