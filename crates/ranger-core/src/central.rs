//! btleplug-backed transport adapter.
//!
//! Bridges the callback-free btleplug API onto the event-driven
//! [`Transport`] contract: requests spawn short-lived tasks whose outcomes
//! are reported through the bound sink, and a central event pump forwards
//! adapter state changes, discoveries and disconnects for as long as the
//! transport is attached.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::transport::{
    DeviceHandle, DeviceIdentity, PowerState, Transport, TransportEvent, TransportSink,
};

/// The production [`Transport`] over the host's first Bluetooth adapter.
#[derive(Default, Clone)]
pub struct BtleCentral {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for BtleCentral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleCentral").finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Shared {
    sink: OnceLock<TransportSink>,
    state: RwLock<State>,
}

#[derive(Default)]
struct State {
    adapter: Option<Adapter>,
    peripherals: HashMap<DeviceIdentity, Peripheral>,
    /// Identity whose connect/disconnect events are forwarded.
    tracked: Option<DeviceIdentity>,
    /// Service filter of the scan in progress, if any.
    scan_filter: Option<Uuid>,
    pump: Option<CancellationToken>,
    forwarders: HashMap<DeviceIdentity, CancellationToken>,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        if let Some(sink) = self.sink.get() {
            sink.send(event);
        }
    }
}

fn power_state(state: CentralState) -> PowerState {
    match state {
        CentralState::PoweredOn => PowerState::PoweredOn,
        CentralState::PoweredOff => PowerState::PoweredOff,
        _ => PowerState::Unknown,
    }
}

impl BtleCentral {
    /// Create a transport; the adapter is acquired lazily on `attach`.
    pub fn new() -> Self {
        Self::default()
    }

    async fn adapter(&self) -> Result<Adapter> {
        self.shared
            .state
            .read()
            .await
            .adapter
            .clone()
            .ok_or(Error::NoAdapter)
    }

    async fn peripheral(&self, identity: &DeviceIdentity) -> Option<Peripheral> {
        self.shared
            .state
            .read()
            .await
            .peripherals
            .get(identity)
            .cloned()
    }

    /// Forward central events into the sink until cancelled.
    async fn pump(shared: Arc<Shared>, adapter: Adapter, token: CancellationToken) {
        let mut events = match adapter.events().await {
            Ok(events) => events,
            Err(err) => {
                warn!(error = %err, "adapter event stream unavailable");
                return;
            }
        };
        loop {
            let event = tokio::select! {
                _ = token.cancelled() => break,
                event = events.next() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            match event {
                CentralEvent::StateUpdate(state) => {
                    shared.emit(TransportEvent::PowerChanged(power_state(state)));
                }
                CentralEvent::DeviceDiscovered(id) => {
                    let filter = shared.state.read().await.scan_filter;
                    let Some(service) = filter else { continue };
                    let Ok(peripheral) = adapter.peripheral(&id).await else {
                        continue;
                    };
                    // The platform may report devices outside the scan
                    // filter; double-check the advertised services.
                    let advertised = match peripheral.properties().await {
                        Ok(Some(props)) => props.services,
                        _ => continue,
                    };
                    if !advertised.contains(&service) {
                        continue;
                    }
                    let identity = id.to_string();
                    trace!(device = %identity, "peripheral discovered");
                    shared
                        .state
                        .write()
                        .await
                        .peripherals
                        .insert(identity.clone(), peripheral);
                    shared.emit(TransportEvent::Discovered(DeviceHandle::new(identity)));
                }
                CentralEvent::DeviceConnected(id) => {
                    let identity = id.to_string();
                    if shared.state.read().await.tracked.as_deref() == Some(identity.as_str()) {
                        shared.emit(TransportEvent::Connected { device: identity });
                    }
                }
                CentralEvent::DeviceDisconnected(id) => {
                    let identity = id.to_string();
                    if shared.state.read().await.tracked.as_deref() == Some(identity.as_str()) {
                        // btleplug reports no disconnect reason.
                        shared.emit(TransportEvent::Disconnected {
                            device: identity,
                            reason: None,
                        });
                    }
                }
                _ => {}
            }
        }
        trace!("central event pump stopped");
    }

    /// Push raw notifications from one peripheral into the sink.
    async fn forward_notifications(
        shared: Arc<Shared>,
        identity: DeviceIdentity,
        peripheral: Peripheral,
        token: CancellationToken,
    ) {
        let mut notifications = match peripheral.notifications().await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(device = %identity, error = %err, "notification stream unavailable");
                return;
            }
        };
        loop {
            let notification = tokio::select! {
                _ = token.cancelled() => break,
                notification = notifications.next() => match notification {
                    Some(notification) => notification,
                    None => break,
                },
            };
            shared.emit(TransportEvent::ValueUpdated {
                characteristic: notification.uuid,
                payload: notification.value,
            });
        }
        trace!(device = %identity, "notification forwarder stopped");
    }

    async fn ensure_forwarder(&self, identity: &DeviceIdentity, peripheral: &Peripheral) {
        let mut state = self.shared.state.write().await;
        if state.forwarders.contains_key(identity) {
            return;
        }
        let token = CancellationToken::new();
        state.forwarders.insert(identity.clone(), token.clone());
        drop(state);
        tokio::spawn(Self::forward_notifications(
            self.shared.clone(),
            identity.clone(),
            peripheral.clone(),
            token,
        ));
    }

    async fn characteristic(
        &self,
        peripheral: &Peripheral,
        characteristic: Uuid,
    ) -> Result<btleplug::api::Characteristic> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic)
            .ok_or(Error::ValueFailed {
                uuid: characteristic,
                detail: "characteristic not discovered".to_string(),
            })
    }
}

#[async_trait]
impl Transport for BtleCentral {
    fn bind(&self, sink: TransportSink) {
        let _ = self.shared.sink.set(sink);
    }

    async fn attach(&self) -> Result<()> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(Error::NoAdapter)?;
        let initial = adapter.adapter_state().await?;
        let token = CancellationToken::new();
        {
            let mut state = self.shared.state.write().await;
            state.adapter = Some(adapter.clone());
            state.pump = Some(token.clone());
        }
        tokio::spawn(Self::pump(self.shared.clone(), adapter, token));
        self.shared
            .emit(TransportEvent::PowerChanged(power_state(initial)));
        Ok(())
    }

    async fn detach(&self) {
        let mut state = self.shared.state.write().await;
        if let Some(token) = state.pump.take() {
            token.cancel();
        }
        for (_, token) in state.forwarders.drain() {
            token.cancel();
        }
        state.peripherals.clear();
        state.tracked = None;
        state.scan_filter = None;
        state.adapter = None;
    }

    async fn start_scan(&self, service: Uuid) -> Result<()> {
        let adapter = self.adapter().await?;
        self.shared.state.write().await.scan_filter = Some(service);
        debug!(%service, "scanning");
        adapter
            .start_scan(ScanFilter {
                services: vec![service],
            })
            .await?;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        let adapter = self.adapter().await?;
        self.shared.state.write().await.scan_filter = None;
        adapter.stop_scan().await?;
        Ok(())
    }

    async fn retrieve_known(&self, identity: &DeviceIdentity) -> Option<DeviceHandle> {
        let adapter = self.adapter().await.ok()?;
        let peripherals = adapter.peripherals().await.ok()?;
        let peripheral = peripherals
            .into_iter()
            .find(|p| &p.id().to_string() == identity)?;
        self.shared
            .state
            .write()
            .await
            .peripherals
            .insert(identity.clone(), peripheral);
        Some(DeviceHandle::new(identity.clone()))
    }

    async fn connect(&self, device: &DeviceHandle) -> Result<()> {
        let peripheral = self
            .peripheral(&device.identity)
            .await
            .ok_or_else(|| Error::connect_failed(&device.identity, "device not retained"))?;
        self.shared.state.write().await.tracked = Some(device.identity.clone());
        let shared = self.shared.clone();
        let identity = device.identity.clone();
        tokio::spawn(async move {
            match peripheral.connect().await {
                Ok(()) => shared.emit(TransportEvent::Connected { device: identity }),
                Err(err) => shared.emit(TransportEvent::ConnectFailed {
                    device: identity,
                    reason: err.to_string(),
                }),
            }
        });
        Ok(())
    }

    async fn cancel_connect(&self, device: &DeviceHandle) -> Result<()> {
        let Some(peripheral) = self.peripheral(&device.identity).await else {
            return Ok(());
        };
        peripheral.disconnect().await?;
        Ok(())
    }

    async fn discover_services(&self, device: &DeviceHandle, services: &[Uuid]) -> Result<()> {
        let peripheral = self.peripheral(&device.identity).await.ok_or_else(|| {
            Error::DiscoveryFailed {
                device: device.identity.clone(),
                detail: "device not retained".to_string(),
            }
        })?;
        debug!(device = %device, requested = ?services, "discovering services");
        let shared = self.shared.clone();
        let identity = device.identity.clone();
        tokio::spawn(async move {
            // btleplug discovers the full service tree in one pass.
            match peripheral.discover_services().await {
                Ok(()) => {
                    let services = peripheral.services().iter().map(|s| s.uuid).collect();
                    shared.emit(TransportEvent::ServicesDiscovered {
                        device: identity,
                        services,
                    });
                }
                Err(err) => shared.emit(TransportEvent::DiscoveryFailed {
                    device: identity,
                    detail: err.to_string(),
                }),
            }
        });
        Ok(())
    }

    async fn discover_characteristics(
        &self,
        device: &DeviceHandle,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> Result<()> {
        let peripheral = self.peripheral(&device.identity).await.ok_or_else(|| {
            Error::DiscoveryFailed {
                device: device.identity.clone(),
                detail: "device not retained".to_string(),
            }
        })?;
        let _ = characteristics;
        // Characteristics were resolved during service discovery; report
        // what the service actually carries.
        let found = peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == service)
            .map(|s| s.characteristics.iter().map(|c| c.uuid).collect::<Vec<_>>());
        match found {
            Some(characteristics) => self.shared.emit(TransportEvent::CharacteristicsDiscovered {
                service,
                characteristics,
            }),
            None => self.shared.emit(TransportEvent::DiscoveryFailed {
                device: device.identity.clone(),
                detail: format!("service {service} not present"),
            }),
        }
        Ok(())
    }

    async fn set_notify(
        &self,
        device: &DeviceHandle,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<()> {
        let Some(peripheral) = self.peripheral(&device.identity).await else {
            return Err(Error::ValueFailed {
                uuid: characteristic,
                detail: "device not retained".to_string(),
            });
        };
        let target = self.characteristic(&peripheral, characteristic).await?;
        if enabled {
            self.ensure_forwarder(&device.identity, &peripheral).await;
            peripheral.subscribe(&target).await?;
        } else {
            peripheral.unsubscribe(&target).await?;
        }
        Ok(())
    }

    async fn read_value(&self, device: &DeviceHandle, characteristic: Uuid) -> Result<()> {
        let Some(peripheral) = self.peripheral(&device.identity).await else {
            return Err(Error::ValueFailed {
                uuid: characteristic,
                detail: "device not retained".to_string(),
            });
        };
        let target = self.characteristic(&peripheral, characteristic).await?;
        let shared = self.shared.clone();
        tokio::spawn(async move {
            match peripheral.read(&target).await {
                Ok(payload) => shared.emit(TransportEvent::ValueUpdated {
                    characteristic,
                    payload,
                }),
                Err(err) => shared.emit(TransportEvent::ValueFailed {
                    characteristic,
                    detail: err.to_string(),
                }),
            }
        });
        Ok(())
    }

    async fn release(&self, device: &DeviceHandle) {
        let peripheral = {
            let mut state = self.shared.state.write().await;
            if let Some(token) = state.forwarders.remove(&device.identity) {
                token.cancel();
            }
            if state.tracked.as_deref() == Some(device.identity.as_str()) {
                state.tracked = None;
            }
            state.peripherals.remove(&device.identity)
        };
        if let Some(peripheral) = peripheral {
            if let Err(err) = peripheral.disconnect().await {
                debug!(device = %device, error = %err, "disconnect on release failed");
            }
        }
    }
}
