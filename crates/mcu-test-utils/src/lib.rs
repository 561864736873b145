//! # MCU Test Utilities
//!
//! Shared test utilities for the MCU meeting session core.
//!
//! This crate provides mock implementations of the injected capabilities and
//! test fixtures, so session behavior can be driven without a media SDK.
//!
//! ## Modules
//!
//! - `mock_engine` - Scriptable, call-recording media engine
//! - `mock_network` - Settable network reachability
//! - `fixtures` - Pre-configured test data (rooms, accounts, streams)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mcu_test_utils::*;
//! use std::sync::Arc;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     // Engine whose first subscribe is rejected
//!     let engine = Arc::new(MockEngine::builder().fail_subscribe(1).build());
//!     let network = Arc::new(MockNetwork::wifi());
//!
//!     // Drive the session, then inspect what the engine was asked to do
//!     assert_eq!(engine.subscribe_count(), 0);
//! }
//! ```

pub mod fixtures;
pub mod mock_engine;
pub mod mock_network;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_engine::*;
pub use mock_network::*;
