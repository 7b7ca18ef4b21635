//! Bluetooth UUIDs for Ranger devices.
//!
//! This module contains all the UUIDs needed to communicate with a Ranger
//! distance sensor over Bluetooth Low Energy.

use uuid::{Uuid, uuid};

// --- Service UUIDs ---

/// Ranger custom service carrying the range measurement characteristic.
pub const RANGE_SERVICE: Uuid = uuid!("337c1e7b-b79f-4253-8ab7-66d59edbfb73");

/// Standard Battery service.
pub const BATTERY_SERVICE: Uuid = uuid!("0000180f-0000-1000-8000-00805f9b34fb");

// --- Characteristic UUIDs ---

/// Range measurement characteristic (2 bytes, little-endian, millimeters).
pub const RANGE_MEASUREMENT: Uuid = uuid!("b5791522-10cf-45ae-a308-9a37ffa329d8");

/// Standard Battery Level characteristic (1 byte, percent).
pub const BATTERY_LEVEL: Uuid = uuid!("00002a19-0000-1000-8000-00805f9b34fb");
