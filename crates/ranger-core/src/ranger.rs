//! The public handle to a range-sensing peripheral.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use ranger_types::ConnectionState;

use crate::config::RangerConfig;
use crate::error::Result;
use crate::events::{EventReceiver, EventSender};
use crate::orchestrator::{Command, Event, Orchestrator};
use crate::publish::{Publisher, Snapshots};
use crate::transport::{Transport, TransportSink};

/// A handle to one range-sensing peripheral.
///
/// Owns the background task that drives the connection pipeline. Property
/// reads are synchronous snapshots; changes are observed through
/// [`subscribe`](Ranger::subscribe). Dropping the handle shuts the
/// pipeline down.
///
/// # Example
///
/// ```no_run
/// use ranger_core::{BtleCentral, Ranger, RangerEvent};
///
/// #[tokio::main]
/// async fn main() -> ranger_core::Result<()> {
///     let ranger = Ranger::new(BtleCentral::new())?;
///     let mut events = ranger.subscribe();
///     ranger.start();
///
///     while let Ok(event) = events.recv().await {
///         if let RangerEvent::RangeChanged(Some(mm)) = event {
///             println!("range: {mm} mm");
///         }
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Ranger {
    tx: mpsc::UnboundedSender<Event>,
    events: EventSender,
    snapshots: Snapshots,
    shutdown: CancellationToken,
}

impl Ranger {
    /// Create a ranger over the given transport with default options.
    ///
    /// Must be called from within a Tokio runtime; the pipeline task is
    /// spawned immediately but stays idle until [`start`](Ranger::start).
    pub fn new<T: Transport>(transport: T) -> Result<Self> {
        Self::with_config(transport, RangerConfig::default())
    }

    /// Create a ranger with explicit options.
    pub fn with_config<T: Transport>(transport: T, config: RangerConfig) -> Result<Self> {
        config.validate()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(transport);
        transport.bind(TransportSink::new(tx.clone()));

        let publisher = Publisher::new(config.event_capacity);
        let events = publisher.event_sender();
        let snapshots = publisher.snapshots();

        let shutdown = CancellationToken::new();
        let orchestrator = Orchestrator::new(
            transport,
            publisher,
            config,
            tx.clone(),
            rx,
            shutdown.clone(),
        );
        tokio::spawn(orchestrator.run());

        Ok(Self {
            tx,
            events,
            snapshots,
            shutdown,
        })
    }

    /// Request the pipeline to start. Idempotent; a request issued while a
    /// session is already running is absorbed by it.
    pub fn start(&self) {
        let _ = self.tx.send(Event::Command(Command::Start));
    }

    /// Request the pipeline to stop and return to `Stopped`. Idempotent.
    pub fn stop(&self) {
        let _ = self.tx.send(Event::Command(Command::Stop));
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.snapshots.state.borrow()
    }

    /// Latest range measurement in millimeters, `None` when not connected.
    pub fn range(&self) -> Option<u16> {
        *self.snapshots.range.borrow()
    }

    /// Latest battery level in percent, `None` when not connected.
    pub fn battery(&self) -> Option<u8> {
        *self.snapshots.battery.borrow()
    }

    /// Subscribe to state and measurement changes, in emission order.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// A watch handle for awaiting connection state changes.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.snapshots.state.clone()
    }

    /// A watch handle for awaiting range changes.
    pub fn range_watch(&self) -> watch::Receiver<Option<u16>> {
        self.snapshots.range.clone()
    }

    /// A watch handle for awaiting battery changes.
    pub fn battery_watch(&self) -> watch::Receiver<Option<u8>> {
        self.snapshots.battery.clone()
    }
}

impl Drop for Ranger {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
