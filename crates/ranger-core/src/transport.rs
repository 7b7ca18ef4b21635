//! Transport adapter contract.
//!
//! The orchestrator never talks to a radio stack directly. It issues the
//! asynchronous primitives of the [`Transport`] trait and consumes the
//! outcomes as [`TransportEvent`]s delivered through a [`TransportSink`] —
//! results are never returned in-band. A returned `Err` from issuing a
//! request is captured by the orchestrator as its pending error signal.
//!
//! Two implementations ship with this crate: [`crate::central::BtleCentral`]
//! over btleplug, and [`crate::mock::MockTransport`] for tests.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::Result;
use crate::orchestrator::Event;

/// Stable identifier of a peripheral, suitable for reconnecting to the same
/// device later in the process lifetime.
///
/// On Linux/Windows this is typically the MAC address; on macOS it is the
/// UUID assigned by the system. It is never persisted across restarts.
pub type DeviceIdentity = String;

/// An opaque reference to a discovered peripheral.
///
/// Exclusively owned by the orchestrator while a connection attempt or an
/// active session is in progress; [`Transport::release`] is called whenever
/// the orchestrator relinquishes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    /// The stable identity of the peripheral.
    pub identity: DeviceIdentity,
}

impl DeviceHandle {
    /// Create a handle from an identity.
    pub fn new(identity: impl Into<DeviceIdentity>) -> Self {
        Self {
            identity: identity.into(),
        }
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identity)
    }
}

/// Power state of the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerState {
    /// State not yet reported by the transport.
    #[default]
    Unknown,
    /// Radio is up and usable.
    PoweredOn,
    /// Radio is off or unavailable.
    PoweredOff,
}

/// Asynchronous outcomes reported by a transport.
///
/// Every variant is fed into the orchestrator's event queue and evaluated
/// on its next tick.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The radio power state changed (or was reported for the first time).
    PowerChanged(PowerState),
    /// A candidate device was discovered while scanning.
    Discovered(DeviceHandle),
    /// A connection attempt succeeded.
    Connected {
        /// Identity of the connected device.
        device: DeviceIdentity,
    },
    /// A connection attempt failed.
    ConnectFailed {
        /// Identity of the device that failed to connect.
        device: DeviceIdentity,
        /// Transport-reported reason.
        reason: String,
    },
    /// The device disconnected. A reason is present only for faults;
    /// a clean requested disconnect carries `None`.
    Disconnected {
        /// Identity of the disconnected device.
        device: DeviceIdentity,
        /// Fault reason, if any.
        reason: Option<String>,
    },
    /// Service discovery completed.
    ServicesDiscovered {
        /// Identity of the device.
        device: DeviceIdentity,
        /// Services now known on the device.
        services: Vec<Uuid>,
    },
    /// Characteristic discovery completed for one service.
    CharacteristicsDiscovered {
        /// The service the characteristics belong to.
        service: Uuid,
        /// Characteristics now known under that service.
        characteristics: Vec<Uuid>,
    },
    /// Service or characteristic discovery failed.
    DiscoveryFailed {
        /// Identity of the device.
        device: DeviceIdentity,
        /// Transport-reported detail.
        detail: String,
    },
    /// A characteristic reported a new raw value.
    ValueUpdated {
        /// The characteristic the value belongs to.
        characteristic: Uuid,
        /// The raw payload bytes.
        payload: Vec<u8>,
    },
    /// A value read or notification failed.
    ValueFailed {
        /// The characteristic the value was expected from.
        characteristic: Uuid,
        /// Transport-reported detail.
        detail: String,
    },
}

/// Sending side handed to a transport at bind time.
///
/// Cloneable; sends are non-blocking and silently dropped once the engine
/// has shut down.
#[derive(Clone)]
pub struct TransportSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl TransportSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { tx }
    }

    /// Deliver a transport event to the orchestrator's queue.
    pub fn send(&self, event: TransportEvent) {
        let _ = self.tx.send(Event::Transport(event));
    }
}

impl fmt::Debug for TransportSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSink").finish_non_exhaustive()
    }
}

/// The asynchronous scan/connect/discover/notify primitives the
/// orchestrator depends on.
///
/// All requests are fire-and-forget from the orchestrator's point of view:
/// completion (success or failure) arrives later as a [`TransportEvent`] on
/// the bound sink. Stop/cancel style calls must be idempotent, since the
/// abort path issues them without knowing whether the operation is still
/// pending.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Attach the event sink. Called once, before any other method.
    fn bind(&self, sink: TransportSink);

    /// Acquire the central radio handle and begin reporting power state.
    async fn attach(&self) -> Result<()>;

    /// Release the central radio handle. Idempotent.
    async fn detach(&self);

    /// Start scanning for devices advertising the given service.
    async fn start_scan(&self, service: Uuid) -> Result<()>;

    /// Stop an in-progress scan. Idempotent.
    async fn stop_scan(&self) -> Result<()>;

    /// Look up a previously connected device by identity, without scanning.
    async fn retrieve_known(&self, identity: &DeviceIdentity) -> Option<DeviceHandle>;

    /// Begin a connection attempt.
    async fn connect(&self, device: &DeviceHandle) -> Result<()>;

    /// Abandon a pending or established connection attempt. Idempotent.
    async fn cancel_connect(&self, device: &DeviceHandle) -> Result<()>;

    /// Discover the given services on a connected device.
    async fn discover_services(&self, device: &DeviceHandle, services: &[Uuid]) -> Result<()>;

    /// Discover the given characteristics under one service.
    async fn discover_characteristics(
        &self,
        device: &DeviceHandle,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> Result<()>;

    /// Enable or disable value notifications for a characteristic.
    async fn set_notify(&self, device: &DeviceHandle, characteristic: Uuid, enabled: bool)
    -> Result<()>;

    /// Request a one-shot value read; the value arrives as
    /// [`TransportEvent::ValueUpdated`].
    async fn read_value(&self, device: &DeviceHandle, characteristic: Uuid) -> Result<()>;

    /// Relinquish a device handle, tearing down any notification links.
    /// Idempotent.
    async fn release(&self, device: &DeviceHandle);
}

/// Delegating impl so a shared transport can be handed to the pipeline
/// while the caller keeps its own reference (used with mocks in tests).
#[async_trait]
impl<T: Transport> Transport for std::sync::Arc<T> {
    fn bind(&self, sink: TransportSink) {
        (**self).bind(sink);
    }

    async fn attach(&self) -> Result<()> {
        (**self).attach().await
    }

    async fn detach(&self) {
        (**self).detach().await;
    }

    async fn start_scan(&self, service: Uuid) -> Result<()> {
        (**self).start_scan(service).await
    }

    async fn stop_scan(&self) -> Result<()> {
        (**self).stop_scan().await
    }

    async fn retrieve_known(&self, identity: &DeviceIdentity) -> Option<DeviceHandle> {
        (**self).retrieve_known(identity).await
    }

    async fn connect(&self, device: &DeviceHandle) -> Result<()> {
        (**self).connect(device).await
    }

    async fn cancel_connect(&self, device: &DeviceHandle) -> Result<()> {
        (**self).cancel_connect(device).await
    }

    async fn discover_services(&self, device: &DeviceHandle, services: &[Uuid]) -> Result<()> {
        (**self).discover_services(device, services).await
    }

    async fn discover_characteristics(
        &self,
        device: &DeviceHandle,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> Result<()> {
        (**self)
            .discover_characteristics(device, service, characteristics)
            .await
    }

    async fn set_notify(
        &self,
        device: &DeviceHandle,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<()> {
        (**self).set_notify(device, characteristic, enabled).await
    }

    async fn read_value(&self, device: &DeviceHandle, characteristic: Uuid) -> Result<()> {
        (**self).read_value(device, characteristic).await
    }

    async fn release(&self, device: &DeviceHandle) {
        (**self).release(device).await;
    }
}
