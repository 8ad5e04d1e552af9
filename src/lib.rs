// Fluent HTTP - a fluent request pipeline in front of a pluggable transport
//
// This library provides a builder-style request API with filters, chained
// retry policies, cancellation and repeatable response reads.

// Re-export the client
pub use fluent_http_client::*;

// Re-export optional crates
#[cfg(feature = "testing")]
pub use fluent_http_testing;

/// Prelude for common imports.
pub mod prelude {
    pub use fluent_http_client::prelude::*;
    pub use fluent_http_client::{
        ApiError, BodyBuilder, FilterChain, FormatterCollection, RetryCoordinator, RetryStrategy,
    };
}
