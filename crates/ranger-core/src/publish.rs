//! Compare-and-publish sink for state and measurement changes.
//!
//! The orchestrator owns exactly one [`Publisher`] and routes every state
//! transition and accepted measurement through it. Publication happens at
//! the single point of assignment: a write that does not change the value
//! emits nothing, a write that does emits one broadcast event and updates
//! the watch mirror the facade reads from.

use tokio::sync::{broadcast, watch};
use tracing::debug;

use ranger_types::ConnectionState;

use crate::events::{EventReceiver, EventSender, RangerEvent};

/// Snapshot handles for the facade's synchronous getters.
#[derive(Debug, Clone)]
pub(crate) struct Snapshots {
    pub(crate) state: watch::Receiver<ConnectionState>,
    pub(crate) range: watch::Receiver<Option<u16>>,
    pub(crate) battery: watch::Receiver<Option<u8>>,
}

/// Turns orchestrator-internal assignments into observable changes.
#[derive(Debug)]
pub struct Publisher {
    state: ConnectionState,
    range: Option<u16>,
    battery: Option<u8>,
    events: broadcast::Sender<RangerEvent>,
    state_tx: watch::Sender<ConnectionState>,
    range_tx: watch::Sender<Option<u16>>,
    battery_tx: watch::Sender<Option<u8>>,
}

impl Publisher {
    /// Create a publisher with the given broadcast capacity.
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        let (state_tx, _) = watch::channel(ConnectionState::Initialized);
        let (range_tx, _) = watch::channel(None);
        let (battery_tx, _) = watch::channel(None);
        Self {
            state: ConnectionState::Initialized,
            range: None,
            battery: None,
            events,
            state_tx,
            range_tx,
            battery_tx,
        }
    }

    /// Subscribe to published events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> EventSender {
        self.events.clone()
    }

    pub(crate) fn snapshots(&self) -> Snapshots {
        Snapshots {
            state: self.state_tx.subscribe(),
            range: self.range_tx.subscribe(),
            battery: self.battery_tx.subscribe(),
        }
    }

    /// Assign the connection state, publishing if it changed.
    pub fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        debug!(from = %self.state, to = %state, "state transition");
        self.state = state;
        self.state_tx.send_replace(state);
        let _ = self.events.send(RangerEvent::StateChanged(state));
    }

    /// Assign the range value, publishing if it changed.
    pub fn set_range(&mut self, range: Option<u16>) {
        if self.range == range {
            return;
        }
        self.range = range;
        self.range_tx.send_replace(range);
        let _ = self.events.send(RangerEvent::RangeChanged(range));
    }

    /// Assign the battery value, publishing if it changed.
    pub fn set_battery(&mut self, battery: Option<u8>) {
        if self.battery == battery {
            return;
        }
        self.battery = battery;
        self.battery_tx.send_replace(battery);
        let _ = self.events.send(RangerEvent::BatteryChanged(battery));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_change_does_not_republish() {
        let mut publisher = Publisher::new(8);
        let mut rx = publisher.subscribe();

        publisher.set_range(Some(100));
        publisher.set_range(Some(100));
        publisher.set_range(Some(101));

        assert_eq!(rx.recv().await.unwrap(), RangerEvent::RangeChanged(Some(100)));
        assert_eq!(rx.recv().await.unwrap(), RangerEvent::RangeChanged(Some(101)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reset_to_none_is_published() {
        let mut publisher = Publisher::new(8);
        publisher.set_battery(Some(90));
        let mut rx = publisher.subscribe();

        publisher.set_battery(None);
        // A second reset is a no-op
        publisher.set_battery(None);

        assert_eq!(rx.recv().await.unwrap(), RangerEvent::BatteryChanged(None));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_state_transitions_in_order() {
        let mut publisher = Publisher::new(8);
        let mut rx = publisher.subscribe();

        publisher.set_state(ConnectionState::Starting);
        publisher.set_state(ConnectionState::Scanning);
        publisher.set_state(ConnectionState::Scanning);
        publisher.set_state(ConnectionState::Stopped);

        assert_eq!(
            rx.recv().await.unwrap(),
            RangerEvent::StateChanged(ConnectionState::Starting)
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            RangerEvent::StateChanged(ConnectionState::Scanning)
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            RangerEvent::StateChanged(ConnectionState::Stopped)
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_watch_mirrors_follow_assignments() {
        let mut publisher = Publisher::new(8);
        let snapshots = publisher.snapshots();

        publisher.set_state(ConnectionState::Connected);
        publisher.set_range(Some(42));

        assert_eq!(*snapshots.state.borrow(), ConnectionState::Connected);
        assert_eq!(*snapshots.range.borrow(), Some(42));
        assert_eq!(*snapshots.battery.borrow(), None);
    }
}
