//! Observable events emitted by the connection pipeline.
//!
//! Observers subscribe through a broadcast channel: emission order is
//! preserved, delivery is asynchronous, and consumers receive events on
//! whatever task they choose to poll from — decoupled from the engine's
//! own execution context.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use ranger_types::ConnectionState;

/// Events delivered to subscribers of a [`crate::Ranger`].
///
/// Each event is emitted exactly once per accepted change: state
/// transitions always, measurement updates only when the value differs from
/// the previous one. Unwinding to `Stopped` resets both measurements and
/// emits the corresponding `...Changed(None)` events when a numeric value
/// was present before.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
#[non_exhaustive]
pub enum RangerEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// A new range value was accepted, in millimeters. `None` on unwind.
    RangeChanged(Option<u16>),
    /// A new battery value was accepted, in percent. `None` on unwind.
    BatteryChanged(Option<u8>),
}

/// Sender for pipeline events.
pub type EventSender = broadcast::Sender<RangerEvent>;

/// Receiver for pipeline events.
pub type EventReceiver = broadcast::Receiver<RangerEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    broadcast::channel(capacity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_string(&RangerEvent::StateChanged(ConnectionState::Scanning))
            .unwrap();
        assert!(json.contains("state_changed"));

        let json = serde_json::to_string(&RangerEvent::RangeChanged(Some(16))).unwrap();
        assert!(json.contains("16"));
    }

    #[tokio::test]
    async fn test_channel_preserves_order() {
        let (tx, mut rx) = event_channel(8);
        tx.send(RangerEvent::StateChanged(ConnectionState::Starting))
            .unwrap();
        tx.send(RangerEvent::RangeChanged(Some(1))).unwrap();
        tx.send(RangerEvent::RangeChanged(Some(2))).unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            RangerEvent::StateChanged(ConnectionState::Starting)
        );
        assert_eq!(rx.recv().await.unwrap(), RangerEvent::RangeChanged(Some(1)));
        assert_eq!(rx.recv().await.unwrap(), RangerEvent::RangeChanged(Some(2)));
    }
}
