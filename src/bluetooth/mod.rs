//! Bluetooth LE transport layer.
//!
//! This module defines the transport seam the session drives, the BlueZ
//! implementation of it, and a recording fake used by the tests.

pub mod bluez;
#[cfg(test)]
pub mod fake;
pub mod transport;
