//! Core types for the Ranger connection lifecycle.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Mutually exclusive states of a Ranger connection pipeline.
///
/// Exactly one state is active at any time; the orchestrator is the only
/// component that transitions between them, and every transition is
/// observable through the event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConnectionState {
    /// State after construction, before `start` is requested for the first time.
    Initialized,
    /// A start request has been consumed; the transport is being brought up.
    Starting,
    /// Scanning for Ranger devices nearby.
    ///
    /// There is no timeout on the scanning phase. Callers who want to bound
    /// it must request a stop explicitly.
    Scanning,
    /// A connection attempt to a detected Ranger device is in flight.
    Connecting,
    /// Connected; range and battery notifications are expected.
    Connected,
    /// Reached when stop was requested or an error occurred after starting.
    Stopped,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initialized => "initialized",
            Self::Starting => "starting",
            Self::Scanning => "scanning",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}
