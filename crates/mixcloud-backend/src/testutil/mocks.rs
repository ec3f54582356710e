//! Mock implementations for testing
//!
//! This module re-exports mock implementations from their respective modules
//! for convenient access in tests.

// Re-export HTTP mocks
pub use crate::mixcloud::http::mock::{MockHttpClient, MockOutcome};

// Re-export token storage mocks
pub use crate::auth::store::mock::MemoryTokenStore;

// Re-export token endpoint mocks
pub use crate::auth::endpoint_mock::MockTokenEndpoint;
