//! # Poll Test Utilities
//!
//! Shared test utilities for the Live Poll service.
//!
//! ## Modules
//!
//! - `mock_broadcaster` - `RecordingBroadcaster` that captures outbound events
//! - `mock_persistence` - `MockPersistence` with failure injection
//! - `fixtures` - Poll specs and client frames
//! - `server_harness` - `TestPollServer` and a WebSocket `TestClient`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use poll_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let server = TestPollServer::spawn().await.unwrap();
//!     let mut presenter = server.connect("presenter1000").await.unwrap();
//!     presenter.send(fixtures::create_poll_frame("Color?", &["Red", "Blue"])).await;
//!     let created = presenter.expect_event("pollCreated").await;
//! }
//! ```

pub mod fixtures;
pub mod mock_broadcaster;
pub mod mock_persistence;
pub mod server_harness;

pub use mock_broadcaster::RecordingBroadcaster;
pub use mock_persistence::MockPersistence;
pub use server_harness::{TestClient, TestPollServer};
