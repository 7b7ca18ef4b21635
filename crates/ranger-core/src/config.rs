//! Configuration for the connection pipeline.

use std::time::Duration;

use crate::error::{Error, Result};

/// Options controlling the connection pipeline.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use ranger_core::RangerConfig;
///
/// let config = RangerConfig::new()
///     .with_connect_timeout(Duration::from_secs(8))
///     .with_event_capacity(64);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct RangerConfig {
    /// Deadline for a single connection attempt. Default: 12 seconds.
    pub connect_timeout: Duration,
    /// Capacity of the broadcast channel carrying observer events.
    /// Default: 32.
    pub event_capacity: usize,
}

impl Default for RangerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(12),
            event_capacity: 32,
        }
    }
}

impl RangerConfig {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection attempt deadline.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the observer event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(Error::invalid_config("connect_timeout must be non-zero"));
        }
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event_capacity must be non-zero"));
        }
        Ok(())
    }
}
