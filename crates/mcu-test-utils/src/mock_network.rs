//! Mock network monitor.
//!
//! # Example
//!
//! ```rust,ignore
//! use mcu_test_utils::MockNetwork;
//!
//! let network = MockNetwork::wifi();
//! network.set(NetworkStatus::Unavailable);
//! ```

use common::engine::NetworkMonitor;
use common::types::NetworkStatus;
use std::sync::Mutex;

/// Network monitor whose status can be changed mid-test.
#[derive(Debug)]
pub struct MockNetwork {
    status: Mutex<NetworkStatus>,
}

impl MockNetwork {
    #[must_use]
    pub fn new(status: NetworkStatus) -> Self {
        Self {
            status: Mutex::new(status),
        }
    }

    #[must_use]
    pub fn wifi() -> Self {
        Self::new(NetworkStatus::Wifi)
    }

    #[must_use]
    pub fn cellular() -> Self {
        Self::new(NetworkStatus::Cellular)
    }

    #[must_use]
    pub fn offline() -> Self {
        Self::new(NetworkStatus::Unavailable)
    }

    /// Change the reported status.
    pub fn set(&self, status: NetworkStatus) {
        *self.status.lock().unwrap() = status;
    }
}

impl NetworkMonitor for MockNetwork {
    fn status(&self) -> NetworkStatus {
        *self.status.lock().unwrap()
    }
}
