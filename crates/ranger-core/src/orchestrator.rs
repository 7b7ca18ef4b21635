//! The connection orchestrator.
//!
//! One task owns the whole lifecycle: it drains a single event queue and
//! advances a sequential pipeline (scan, connect, discover, subscribe,
//! stream) between suspension points. Every external stimulus - transport
//! callback, watchdog expiry, start/stop command - arrives as an [`Event`]
//! and is applied in one atomic tick; the pipeline then re-evaluates its
//! current wait condition. No two ticks ever overlap.
//!
//! Aborts are modelled as nested scopes with cumulative watch conditions:
//! a stop request or captured error aborts everywhere, power loss aborts
//! everything past the power gate, and an unsolicited disconnect aborts the
//! connected section. Any abort unwinds the pipeline completely and lands
//! in [`Orchestrator::reset`], which returns the machine to `Stopped`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use ranger_types::uuids::{BATTERY_LEVEL, BATTERY_SERVICE, RANGE_MEASUREMENT, RANGE_SERVICE};
use ranger_types::{decode_battery, decode_range, ConnectionState};

use crate::config::RangerConfig;
use crate::error::{Error, Result};
use crate::publish::Publisher;
use crate::transport::{
    DeviceHandle, DeviceIdentity, PowerState, Transport, TransportEvent,
};
use crate::watchdog::Watchdog;

/// Everything the orchestrator can be woken by.
#[derive(Debug)]
pub(crate) enum Event {
    /// A caller command relayed by the facade.
    Command(Command),
    /// A transport callback.
    Transport(TransportEvent),
    /// The connect watchdog expired.
    ConnectTimeout,
}

/// Caller intents relayed through the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Start,
    Stop,
}

/// The latest unconsumed caller intent. A new command overwrites an
/// unconsumed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Request {
    #[default]
    None,
    Start,
    Stop,
}

/// Nesting depth of the abort scopes, outermost first. Watch conditions
/// are cumulative: a deeper scope aborts on everything its parents do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Scope {
    /// Idle wait, nothing aborts it.
    Idle,
    /// Active session: aborts on stop request or captured error.
    Active,
    /// Past the power gate: additionally aborts on power loss.
    Powered,
    /// Established connection: additionally aborts on disconnect.
    Connected,
}

/// Why a wait did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unwind {
    /// An abort scope's watch condition fired; unwind to reset.
    Abort,
    /// The facade was dropped; leave the run loop entirely.
    Shutdown,
}

type Flow<T> = std::result::Result<T, Unwind>;

/// Mutable state the event queue is applied to, and the wait and abort
/// predicates are evaluated against.
#[derive(Debug, Default)]
struct Machine {
    request: Request,
    power: PowerState,
    error: Option<Error>,
    connect_error: Option<String>,
    connect_timed_out: bool,
    device: Option<DeviceHandle>,
    device_connected: bool,
    last_identity: Option<DeviceIdentity>,
    candidates: Vec<DeviceHandle>,
    services: Vec<Uuid>,
    characteristics: HashMap<Uuid, Vec<Uuid>>,
    pending_range: Option<u16>,
    pending_battery: Option<u8>,
}

impl Machine {
    fn aborted(&self, scope: Scope) -> bool {
        if scope >= Scope::Active && (self.request == Request::Stop || self.error.is_some()) {
            return true;
        }
        if scope >= Scope::Powered && self.power != PowerState::PoweredOn {
            return true;
        }
        if scope >= Scope::Connected && !self.device_connected {
            return true;
        }
        false
    }

    fn has_service(&self, service: Uuid) -> bool {
        self.services.contains(&service)
    }

    fn has_characteristic(&self, service: Uuid, characteristic: Uuid) -> bool {
        self.characteristics
            .get(&service)
            .is_some_and(|chars| chars.contains(&characteristic))
    }

    /// Whether an event's identity refers to the working device. Events
    /// about any other peripheral are not ours to act on.
    fn is_working_device(&self, identity: &DeviceIdentity) -> bool {
        self.device.as_ref().is_some_and(|d| &d.identity == identity)
    }
}

/// Drives the scan/connect/discover/subscribe/stream pipeline.
pub(crate) struct Orchestrator<T: Transport> {
    transport: Arc<T>,
    rx: mpsc::UnboundedReceiver<Event>,
    publisher: Publisher,
    watchdog: Watchdog<Event>,
    shutdown: CancellationToken,
    config: RangerConfig,
    machine: Machine,
    ticking: AtomicBool,
}

impl<T: Transport> Orchestrator<T> {
    pub(crate) fn new(
        transport: Arc<T>,
        publisher: Publisher,
        config: RangerConfig,
        tx: mpsc::UnboundedSender<Event>,
        rx: mpsc::UnboundedReceiver<Event>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            transport,
            rx,
            publisher,
            watchdog: Watchdog::new(tx),
            shutdown,
            config,
            machine: Machine::default(),
            ticking: AtomicBool::new(false),
        }
    }

    /// Run until shutdown. One iteration per session: idle wait, pipeline,
    /// reset to `Stopped`.
    pub(crate) async fn run(mut self) {
        debug!("orchestrator running");
        loop {
            let idle = self
                .wait_until(Scope::Idle, |m| m.request == Request::Start)
                .await;
            if idle.is_err() {
                break;
            }
            let flow = self.session().await;
            self.reset().await;
            if flow == Err(Unwind::Shutdown) {
                break;
            }
        }
        self.watchdog.disarm();
        self.transport.detach().await;
        debug!("orchestrator stopped");
    }

    /// One full session from `Starting` until unwind.
    async fn session(&mut self) -> Flow<()> {
        self.machine.request = Request::None;
        self.publisher.set_state(ConnectionState::Starting);
        let attach = self.transport.attach().await;
        self.issue(attach);
        let flow = self.active().await;
        self.transport.detach().await;
        flow
    }

    /// Active scope: wait for the power state to be known, then run the
    /// powered section if the radio is up. A radio that reports anything
    /// else ends the session.
    async fn active(&mut self) -> Flow<()> {
        self.wait_until(Scope::Active, |m| m.power != PowerState::Unknown)
            .await?;
        if self.machine.power == PowerState::PoweredOn {
            self.powered().await?;
        }
        Ok(())
    }

    /// Powered scope: acquire a device (cached identity first, full scan as
    /// fallback), then run the connected section.
    async fn powered(&mut self) -> Flow<()> {
        let mut connected = false;
        if let Some(identity) = self.machine.last_identity.clone() {
            if let Some(handle) = self.transport.retrieve_known(&identity).await {
                debug!(device = %handle, "retrieved known device");
                self.set_device(Some(handle)).await;
                connected = self.connect_device().await?;
            }
        }
        if !connected {
            self.machine.last_identity = None;
            self.scan_for_device().await?;
            connected = self.connect_device().await?;
        }
        if connected {
            self.linked().await?;
        }
        Ok(())
    }

    /// Scan until at least one candidate advertising the range service is
    /// found, then take the first one as the working device. Scanning is
    /// always stopped and leftover candidates discarded, aborted or not.
    async fn scan_for_device(&mut self) -> Flow<()> {
        self.publisher.set_state(ConnectionState::Scanning);
        let start = self.transport.start_scan(RANGE_SERVICE).await;
        self.issue(start);
        let wait = self
            .wait_until(Scope::Powered, |m| !m.candidates.is_empty())
            .await;
        let stop = self.transport.stop_scan().await;
        self.issue(stop);
        let selected = self.machine.candidates.first().cloned();
        self.machine.candidates.clear();
        wait?;
        if let Some(handle) = selected {
            debug!(device = %handle, "device discovered");
            self.set_device(Some(handle)).await;
        }
        Ok(())
    }

    /// One connection attempt against the working device, bounded by the
    /// connect watchdog. Returns whether the device ended up connected;
    /// failure (error or timeout) cancels the pending attempt and leaves
    /// the decision to the caller.
    async fn connect_device(&mut self) -> Flow<bool> {
        let Some(device) = self.machine.device.clone() else {
            return Ok(false);
        };
        self.publisher.set_state(ConnectionState::Connecting);
        self.machine.connect_error = None;
        self.machine.connect_timed_out = false;
        // A success event from an earlier, torn-down attempt may still sit
        // in the queue; only events applied after this point may decide
        // the outcome.
        self.machine.device_connected = false;
        let connect = self.transport.connect(&device).await;
        self.issue(connect);
        self.watchdog.arm(self.config.connect_timeout, Event::ConnectTimeout);
        let wait = self
            .wait_until(Scope::Powered, |m| {
                m.device_connected || m.connect_error.is_some() || m.connect_timed_out
            })
            .await;
        self.watchdog.disarm();
        wait?;
        let connected = self.machine.device_connected && self.machine.connect_error.is_none();
        if connected {
            info!(device = %device, "connected");
            self.machine.last_identity = Some(device.identity.clone());
        } else {
            if self.machine.connect_timed_out {
                warn!(device = %device, timeout = ?self.config.connect_timeout, "connect timed out");
            } else {
                warn!(device = %device, reason = ?self.machine.connect_error, "connect failed");
            }
            let cancel = self.transport.cancel_connect(&device).await;
            self.issue(cancel);
        }
        Ok(connected)
    }

    /// Connected scope: discover what is missing, subscribe to both
    /// characteristics, then stream decoded values until the scope aborts.
    async fn linked(&mut self) -> Flow<()> {
        let Some(device) = self.machine.device.clone() else {
            return Ok(());
        };
        self.publisher.set_state(ConnectionState::Connected);

        if !self.machine.has_service(RANGE_SERVICE) || !self.machine.has_service(BATTERY_SERVICE) {
            let discover = self
                .transport
                .discover_services(&device, &[RANGE_SERVICE, BATTERY_SERVICE])
                .await;
            self.issue(discover);
            self.wait_until(Scope::Connected, |m| {
                m.has_service(RANGE_SERVICE) && m.has_service(BATTERY_SERVICE)
            })
            .await?;
        }

        if !self.machine.has_characteristic(RANGE_SERVICE, RANGE_MEASUREMENT)
            || !self.machine.has_characteristic(BATTERY_SERVICE, BATTERY_LEVEL)
        {
            let discover = self
                .transport
                .discover_characteristics(&device, RANGE_SERVICE, &[RANGE_MEASUREMENT])
                .await;
            self.issue(discover);
            let discover = self
                .transport
                .discover_characteristics(&device, BATTERY_SERVICE, &[BATTERY_LEVEL])
                .await;
            self.issue(discover);
            self.wait_until(Scope::Connected, |m| {
                m.has_characteristic(RANGE_SERVICE, RANGE_MEASUREMENT)
                    && m.has_characteristic(BATTERY_SERVICE, BATTERY_LEVEL)
            })
            .await?;
        }

        for characteristic in [RANGE_MEASUREMENT, BATTERY_LEVEL] {
            let notify = self.transport.set_notify(&device, characteristic, true).await;
            self.issue(notify);
            let read = self.transport.read_value(&device, characteristic).await;
            self.issue(read);
        }

        // No natural end: values stream until the scope aborts.
        loop {
            self.wait_until(Scope::Connected, |m| {
                m.pending_range.is_some() || m.pending_battery.is_some()
            })
            .await?;
            if let Some(range) = self.machine.pending_range.take() {
                self.publisher.set_range(Some(range));
            }
            if let Some(battery) = self.machine.pending_battery.take() {
                self.publisher.set_battery(Some(battery));
            }
        }
    }

    /// Unwind target for every abort: relinquish the device, clear all
    /// transient state and land in `Stopped`. The cached identity survives.
    async fn reset(&mut self) {
        self.set_device(None).await;
        let machine = &mut self.machine;
        machine.device_connected = false;
        machine.candidates.clear();
        machine.services.clear();
        machine.characteristics.clear();
        machine.pending_range = None;
        machine.pending_battery = None;
        machine.error = None;
        machine.connect_error = None;
        machine.connect_timed_out = false;
        machine.request = Request::None;
        self.publisher.set_state(ConnectionState::Stopped);
        self.publisher.set_range(None);
        self.publisher.set_battery(None);
    }

    /// Replace the working device, releasing the previous handle first.
    async fn set_device(&mut self, device: Option<DeviceHandle>) {
        if let Some(old) = self.machine.device.take() {
            self.transport.release(&old).await;
        }
        self.machine.device = device;
    }

    /// Suspend until `pred` holds, applying one queued event per tick.
    /// The scope's abort condition is re-checked before the predicate on
    /// every tick and wins when both hold.
    async fn wait_until(&mut self, scope: Scope, pred: impl Fn(&Machine) -> bool) -> Flow<()> {
        loop {
            if self.machine.aborted(scope) {
                trace!(?scope, "scope aborted");
                return Err(Unwind::Abort);
            }
            if pred(&self.machine) {
                return Ok(());
            }
            let event = self.next_event().await?;
            self.apply(event);
        }
    }

    async fn next_event(&mut self) -> Flow<Event> {
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(Unwind::Shutdown),
            event = self.rx.recv() => event.ok_or(Unwind::Shutdown),
        }
    }

    /// Capture a failed transport request as the pending error signal.
    /// The first captured error wins; it is consumed by the abort path.
    fn issue(&mut self, result: Result<()>) {
        if let Err(err) = result {
            warn!(error = %err, "transport request failed");
            if self.machine.error.is_none() {
                self.machine.error = Some(err);
            }
        }
    }

    /// One atomic tick: fold a single event into the machine.
    ///
    /// # Panics
    ///
    /// Panics if re-entered, which would mean the single-consumer
    /// serialization invariant was broken.
    fn apply(&mut self, event: Event) {
        assert!(
            !self.ticking.swap(true, Ordering::SeqCst),
            "orchestrator tick re-entered"
        );
        trace!(?event, "tick");
        match event {
            Event::Command(Command::Start) => self.machine.request = Request::Start,
            Event::Command(Command::Stop) => self.machine.request = Request::Stop,
            Event::ConnectTimeout => self.machine.connect_timed_out = true,
            Event::Transport(event) => self.apply_transport(event),
        }
        self.ticking.store(false, Ordering::SeqCst);
    }

    fn apply_transport(&mut self, event: TransportEvent) {
        let machine = &mut self.machine;
        match event {
            TransportEvent::PowerChanged(power) => machine.power = power,
            TransportEvent::Discovered(handle) => machine.candidates.push(handle),
            TransportEvent::Connected { device } => {
                if machine.is_working_device(&device) {
                    machine.device_connected = true;
                }
            }
            TransportEvent::ConnectFailed { device, reason } => {
                if machine.is_working_device(&device) {
                    machine.connect_error = Some(reason);
                }
            }
            TransportEvent::Disconnected { device, reason } => {
                if !machine.is_working_device(&device) {
                    return;
                }
                machine.device_connected = false;
                if let Some(reason) = reason {
                    if machine.error.is_none() {
                        machine.error = Some(Error::Disconnected { device, reason });
                    }
                }
            }
            TransportEvent::ServicesDiscovered { services, .. } => {
                for service in services {
                    if !machine.services.contains(&service) {
                        machine.services.push(service);
                    }
                }
            }
            TransportEvent::CharacteristicsDiscovered {
                service,
                characteristics,
            } => {
                let known = machine.characteristics.entry(service).or_default();
                for characteristic in characteristics {
                    if !known.contains(&characteristic) {
                        known.push(characteristic);
                    }
                }
            }
            TransportEvent::DiscoveryFailed { device, detail } => {
                if machine.error.is_none() {
                    machine.error = Some(Error::DiscoveryFailed { device, detail });
                }
            }
            TransportEvent::ValueUpdated {
                characteristic,
                payload,
            } => {
                // Wrong-length payloads are dropped, not errors.
                if characteristic == RANGE_MEASUREMENT {
                    if let Some(range) = decode_range(&payload) {
                        machine.pending_range = Some(range);
                    }
                } else if characteristic == BATTERY_LEVEL {
                    if let Some(battery) = decode_battery(&payload) {
                        machine.pending_battery = Some(battery);
                    }
                }
            }
            TransportEvent::ValueFailed {
                characteristic,
                detail,
            } => {
                if machine.error.is_none() {
                    machine.error = Some(Error::ValueFailed {
                        uuid: characteristic,
                        detail,
                    });
                }
            }
        }
    }
}
