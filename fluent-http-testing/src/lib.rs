//! Testing utilities for fluent-http-client.
//!
//! ## Features
//!
//! - **MockTransport** - Scripted transport with a call log
//! - **RecordingFilter** - Records filter hook order into a shared [`HookLog`]
//!
//! ## Quick Start
//!
//! ```
//! use fluent_http_testing::{MockTransport, mock_client};
//!
//! # tokio_test::block_on(async {
//! let transport = MockTransport::new().respond_with(200, "pong");
//! let client = mock_client(&transport);
//!
//! let body = client.get("ping").as_string().await.unwrap();
//! assert_eq!(body, "pong");
//! assert_eq!(transport.call_count(), 1);
//! assert_eq!(transport.last_request().unwrap().url.as_str(), "https://mock.test/ping");
//! # });
//! ```

mod mock;

pub use mock::{HookLog, MockTransport, RecordedRequest, RecordingFilter};

use fluent_http_client::{HttpClient, HttpClientConfig};

/// Base URL used by [`mock_client`].
pub const MOCK_BASE_URL: &str = "https://mock.test";

/// A client with base URL [`MOCK_BASE_URL`] dispatching through `transport`.
pub fn mock_client(transport: &MockTransport) -> HttpClient {
    mock_client_with(transport, HttpClientConfig::builder())
}

/// Like [`mock_client`], starting from a custom configuration.
pub fn mock_client_with(
    transport: &MockTransport,
    config: fluent_http_client::HttpClientConfigBuilder,
) -> HttpClient {
    let config = config.base_url(MOCK_BASE_URL).build();
    match HttpClient::with_transport(config, transport.clone()) {
        Ok(client) => client,
        Err(e) => panic!("invalid mock client configuration: {e}"),
    }
}
