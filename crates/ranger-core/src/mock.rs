//! Mock transport implementation for testing.
//!
//! This module provides a scriptable transport that can drive the whole
//! connection pipeline without BLE hardware.
//!
//! The [`MockTransport`] implements the [`Transport`] trait, so it can be
//! used interchangeably with the real btleplug adapter in generic code.
//!
//! # Features
//!
//! - **Scripted replies**: power reports on attach, scan hits, automatic
//!   discovery completions and read responses
//! - **Failure injection**: refuse the next N connection attempts, or stay
//!   silent so the connect watchdog fires
//! - **Call log**: every primitive invocation is recorded for assertions

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::OnceLock;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::transport::{
    DeviceHandle, DeviceIdentity, PowerState, Transport, TransportEvent, TransportSink,
};

/// One recorded invocation of a transport primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// `attach` was called.
    Attach,
    /// `detach` was called.
    Detach,
    /// `start_scan` was called with this service filter.
    StartScan(Uuid),
    /// `stop_scan` was called.
    StopScan,
    /// `retrieve_known` was called for this identity.
    RetrieveKnown(DeviceIdentity),
    /// `connect` was called for this identity.
    Connect(DeviceIdentity),
    /// `cancel_connect` was called for this identity.
    CancelConnect(DeviceIdentity),
    /// `discover_services` was called with these service ids.
    DiscoverServices(DeviceIdentity, Vec<Uuid>),
    /// `discover_characteristics` was called for this service.
    DiscoverCharacteristics(Uuid, Vec<Uuid>),
    /// `set_notify` was called for this characteristic.
    SetNotify(Uuid, bool),
    /// `read_value` was called for this characteristic.
    ReadValue(Uuid),
    /// `release` was called for this identity.
    Release(DeviceIdentity),
}

/// A scriptable mock transport for testing.
///
/// # Example
///
/// ```
/// use ranger_core::{MockTransport, Transport};
/// use ranger_core::transport::PowerState;
///
/// let transport = MockTransport::new()
///     .with_power_on_attach(PowerState::PoweredOn)
///     .with_scan_results(vec![MockTransport::device()]);
/// ```
pub struct MockTransport {
    sink: OnceLock<TransportSink>,
    calls: RwLock<Vec<MockCall>>,
    power_on_attach: RwLock<Option<PowerState>>,
    scan_results: RwLock<Vec<DeviceHandle>>,
    known_devices: RwLock<Vec<DeviceHandle>>,
    read_responses: RwLock<HashMap<Uuid, Vec<u8>>>,
    /// Do not reply to `connect` at all, so the watchdog decides.
    silent_connect: AtomicBool,
    /// Number of connection attempts to refuse before accepting.
    connect_refusals: AtomicU32,
    /// Reply to discovery requests with exactly what was asked for.
    auto_discovery: AtomicBool,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("silent_connect", &self.silent_connect.load(Ordering::Relaxed))
            .field("connect_refusals", &self.connect_refusals.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Create a mock that reports powered-on radio and completes discovery
    /// and connection requests successfully.
    pub fn new() -> Self {
        Self {
            sink: OnceLock::new(),
            calls: RwLock::new(Vec::new()),
            power_on_attach: RwLock::new(Some(PowerState::PoweredOn)),
            scan_results: RwLock::new(Vec::new()),
            known_devices: RwLock::new(Vec::new()),
            read_responses: RwLock::new(HashMap::new()),
            silent_connect: AtomicBool::new(false),
            connect_refusals: AtomicU32::new(0),
            auto_discovery: AtomicBool::new(true),
        }
    }

    /// A device handle with a random mock identity.
    pub fn device() -> DeviceHandle {
        DeviceHandle::new(format!("MOCK-{:06X}", rand::random::<u32>() % 0xFF_FFFF))
    }

    /// Report this power state as soon as `attach` is called. `None`
    /// leaves the power state unreported.
    pub fn with_power_on_attach(mut self, power: impl Into<Option<PowerState>>) -> Self {
        *self.power_on_attach.get_mut() = power.into();
        self
    }

    /// Devices reported as discovered when a scan starts.
    pub fn with_scan_results(mut self, devices: Vec<DeviceHandle>) -> Self {
        *self.scan_results.get_mut() = devices;
        self
    }

    /// Devices returned by `retrieve_known` lookups.
    pub fn with_known_devices(mut self, devices: Vec<DeviceHandle>) -> Self {
        *self.known_devices.get_mut() = devices;
        self
    }

    /// Payload delivered in response to a `read_value` on `characteristic`.
    pub fn with_read_response(mut self, characteristic: Uuid, payload: Vec<u8>) -> Self {
        self.read_responses.get_mut().insert(characteristic, payload);
        self
    }

    /// Never reply to `connect`; the attempt can only end by timeout.
    pub fn with_silent_connect(self) -> Self {
        self.silent_connect.store(true, Ordering::Relaxed);
        self
    }

    /// Refuse the next `count` connection attempts with a failure reply.
    pub fn with_connect_refusals(self, count: u32) -> Self {
        self.connect_refusals.store(count, Ordering::Relaxed);
        self
    }

    /// Change the refusal count after construction.
    pub fn set_connect_refusals(&self, count: u32) {
        self.connect_refusals.store(count, Ordering::Relaxed);
    }

    /// Disable automatic discovery replies; tests drive them via [`emit`].
    ///
    /// [`emit`]: MockTransport::emit
    pub fn with_manual_discovery(self) -> Self {
        self.auto_discovery.store(false, Ordering::Relaxed);
        self
    }

    /// Inject a transport event, as if the radio stack reported it.
    pub fn emit(&self, event: TransportEvent) {
        if let Some(sink) = self.sink.get() {
            sink.send(event);
        }
    }

    /// All primitive invocations recorded so far, in order.
    pub async fn calls(&self) -> Vec<MockCall> {
        self.calls.read().await.clone()
    }

    async fn record(&self, call: MockCall) {
        self.calls.write().await.push(call);
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn bind(&self, sink: TransportSink) {
        let _ = self.sink.set(sink);
    }

    async fn attach(&self) -> Result<()> {
        self.record(MockCall::Attach).await;
        if let Some(power) = *self.power_on_attach.read().await {
            self.emit(TransportEvent::PowerChanged(power));
        }
        Ok(())
    }

    async fn detach(&self) {
        self.record(MockCall::Detach).await;
    }

    async fn start_scan(&self, service: Uuid) -> Result<()> {
        self.record(MockCall::StartScan(service)).await;
        for device in self.scan_results.read().await.iter() {
            self.emit(TransportEvent::Discovered(device.clone()));
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.record(MockCall::StopScan).await;
        Ok(())
    }

    async fn retrieve_known(&self, identity: &DeviceIdentity) -> Option<DeviceHandle> {
        self.record(MockCall::RetrieveKnown(identity.clone())).await;
        self.known_devices
            .read()
            .await
            .iter()
            .find(|device| &device.identity == identity)
            .cloned()
    }

    async fn connect(&self, device: &DeviceHandle) -> Result<()> {
        self.record(MockCall::Connect(device.identity.clone())).await;
        if self.silent_connect.load(Ordering::Relaxed) {
            return Ok(());
        }
        if self.connect_refusals.load(Ordering::Relaxed) > 0 {
            self.connect_refusals.fetch_sub(1, Ordering::Relaxed);
            self.emit(TransportEvent::ConnectFailed {
                device: device.identity.clone(),
                reason: "mock connect refused".to_string(),
            });
        } else {
            self.emit(TransportEvent::Connected {
                device: device.identity.clone(),
            });
        }
        Ok(())
    }

    async fn cancel_connect(&self, device: &DeviceHandle) -> Result<()> {
        self.record(MockCall::CancelConnect(device.identity.clone()))
            .await;
        Ok(())
    }

    async fn discover_services(&self, device: &DeviceHandle, services: &[Uuid]) -> Result<()> {
        self.record(MockCall::DiscoverServices(
            device.identity.clone(),
            services.to_vec(),
        ))
        .await;
        if self.auto_discovery.load(Ordering::Relaxed) {
            self.emit(TransportEvent::ServicesDiscovered {
                device: device.identity.clone(),
                services: services.to_vec(),
            });
        }
        Ok(())
    }

    async fn discover_characteristics(
        &self,
        device: &DeviceHandle,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> Result<()> {
        let _ = device;
        self.record(MockCall::DiscoverCharacteristics(
            service,
            characteristics.to_vec(),
        ))
        .await;
        if self.auto_discovery.load(Ordering::Relaxed) {
            self.emit(TransportEvent::CharacteristicsDiscovered {
                service,
                characteristics: characteristics.to_vec(),
            });
        }
        Ok(())
    }

    async fn set_notify(
        &self,
        _device: &DeviceHandle,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<()> {
        self.record(MockCall::SetNotify(characteristic, enabled)).await;
        Ok(())
    }

    async fn read_value(&self, _device: &DeviceHandle, characteristic: Uuid) -> Result<()> {
        self.record(MockCall::ReadValue(characteristic)).await;
        if let Some(payload) = self.read_responses.read().await.get(&characteristic) {
            self.emit(TransportEvent::ValueUpdated {
                characteristic,
                payload: payload.clone(),
            });
        }
        Ok(())
    }

    async fn release(&self, device: &DeviceHandle) {
        self.record(MockCall::Release(device.identity.clone())).await;
    }
}
