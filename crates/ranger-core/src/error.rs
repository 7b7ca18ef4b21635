//! Error types for ranger-core.
//!
//! All transport-layer faults funnel into this single [`Error`] enum. The
//! orchestrator captures at most one of them at a time as its pending error
//! signal; the caller only ever observes the resulting transition to
//! `Stopped`, so these types exist mainly for logging and for transport
//! implementations.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while driving a Ranger connection.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No Bluetooth adapter available on this host.
    #[error("no Bluetooth adapter available")]
    NoAdapter,

    /// The connection attempt to a device failed.
    #[error("connection to '{device}' failed: {reason}")]
    ConnectFailed {
        /// Identity of the device that failed to connect.
        device: String,
        /// Transport-reported reason.
        reason: String,
    },

    /// The device disconnected with an error reason.
    #[error("device '{device}' disconnected: {reason}")]
    Disconnected {
        /// Identity of the disconnected device.
        device: String,
        /// Transport-reported reason.
        reason: String,
    },

    /// Service or characteristic discovery failed.
    #[error("discovery on '{device}' failed: {detail}")]
    DiscoveryFailed {
        /// Identity of the device being discovered.
        device: String,
        /// Transport-reported detail.
        detail: String,
    },

    /// A notification or value read failed.
    #[error("value update for characteristic {uuid} failed: {detail}")]
    ValueFailed {
        /// The characteristic the value was expected from.
        uuid: uuid::Uuid,
        /// Transport-reported detail.
        detail: String,
    },

    /// Operation timed out.
    #[error("operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Invalid configuration provided.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a connection failure error.
    pub fn connect_failed(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConnectFailed {
            device: device.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

/// Result type alias using ranger-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::connect_failed("ranger-1", "rejected");
        assert!(err.to_string().contains("ranger-1"));
        assert!(err.to_string().contains("rejected"));

        let err = Error::NoAdapter;
        assert_eq!(err.to_string(), "no Bluetooth adapter available");

        let err = Error::timeout("connect", Duration::from_secs(12));
        assert!(err.to_string().contains("connect"));
        assert!(err.to_string().contains("12s"));
    }

    #[test]
    fn test_btleplug_error_conversion() {
        fn _assert_from_impl<T: From<btleplug::Error>>() {}
        _assert_from_impl::<Error>();
    }
}
