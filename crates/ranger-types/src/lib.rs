//! Platform-agnostic types for Ranger distance sensors.
//!
//! This crate provides the pieces of the Ranger BLE profile that do not
//! depend on any radio stack:
//!
//! - The [`ConnectionState`] lifecycle enumeration
//! - UUID constants for the range and battery services
//! - Payload decoders for the two notification characteristics
//!
//! # Example
//!
//! ```
//! use ranger_types::{decode_range, decode_battery};
//!
//! assert_eq!(decode_range(&[0x10, 0x00]), Some(16));
//! assert_eq!(decode_battery(&[0x5A]), Some(90));
//! ```

pub mod decode;
pub mod types;
pub mod uuid;

pub use decode::{decode_battery, decode_range};
pub use types::ConnectionState;
pub use uuid as uuids;
