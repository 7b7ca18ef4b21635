//! Connection orchestration for Ranger BLE distance sensors.
//!
//! This crate manages the whole lifecycle of a single connection to a
//! range-sensing peripheral: discovering it, connecting with a bounded
//! timeout, resolving its services and characteristics, subscribing to the
//! range and battery channels, and streaming decoded measurements until
//! stopped or disconnected.
//!
//! # Features
//!
//! - **Event-driven pipeline**: one task, one event queue, strictly
//!   serialized state machine ticks
//! - **Abort semantics**: stop requests, transport errors, radio power loss
//!   and unsolicited disconnects all unwind the pipeline cleanly to
//!   `Stopped`
//! - **Reconnect shortcut**: the last connected device is remembered for
//!   the process lifetime and tried first before falling back to a scan
//! - **Connect watchdog**: connection attempts are bounded at 12 seconds
//!   by default
//! - **Observable**: synchronous snapshots plus ordered change events
//! - **Testable**: a scriptable [`MockTransport`] drives the pipeline
//!   without hardware
//!
//! # Quick Start
//!
//! ```no_run
//! use ranger_core::{BtleCentral, Ranger, RangerEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ranger = Ranger::new(BtleCentral::new())?;
//!     let mut events = ranger.subscribe();
//!     ranger.start();
//!
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             RangerEvent::StateChanged(state) => println!("state: {state}"),
//!             RangerEvent::RangeChanged(Some(mm)) => println!("range: {mm} mm"),
//!             RangerEvent::BatteryChanged(Some(pct)) => println!("battery: {pct}%"),
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod central;
pub mod config;
pub mod error;
pub mod events;
pub mod mock;
mod orchestrator;
mod publish;
pub mod ranger;
pub mod transport;
mod watchdog;

// Re-export the shared types crate's surface.
pub use ranger_types::{decode_battery, decode_range, uuids, ConnectionState};

// Core exports
pub use central::BtleCentral;
pub use config::RangerConfig;
pub use error::{Error, Result};
pub use events::{event_channel, EventReceiver, EventSender, RangerEvent};
pub use mock::{MockCall, MockTransport};
pub use ranger::Ranger;
pub use transport::{
    DeviceHandle, DeviceIdentity, PowerState, Transport, TransportEvent, TransportSink,
};
