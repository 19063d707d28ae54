//! GATT identifiers and value types for iTag style keyrings.
//!
//! This module contains the well-known service and characteristic UUIDs the
//! tracker looks for, the immediate-alert levels, and the capability types
//! shared between the transport and the session.

use std::fmt;

use smallvec::SmallVec;
use uuid::Uuid;

/// Immediate Alert service (Bluetooth SIG).
pub const IMMEDIATE_ALERT_SERVICE: Uuid = Uuid::from_u128(0x00001802_0000_1000_8000_00805f9b34fb);
/// Battery service (Bluetooth SIG).
pub const BATTERY_SERVICE: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);
/// Vendor "find me" service carrying the button notifications.
pub const FIND_ME_SERVICE: Uuid = Uuid::from_u128(0x0000ffe0_0000_1000_8000_00805f9b34fb);

/// Alert Level characteristic inside the immediate-alert service.
pub const ALERT_LEVEL_CHARACTERISTIC: Uuid =
   Uuid::from_u128(0x00002a06_0000_1000_8000_00805f9b34fb);
/// Button characteristic inside the find-me service.
pub const FIND_ME_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb);

/// Characteristic payload as delivered by the transport.
pub type Value = SmallVec<[u8; 20]>;

/// Alert levels accepted by the immediate-alert characteristic.
#[repr(u8)]
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   strum::FromRepr,
   strum::Display,
   strum::EnumString,
   strum::IntoStaticStr,
)]
#[strum(ascii_case_insensitive)]
pub enum AlertLevel {
   #[strum(serialize = "none")]
   None = 0x00,
   #[strum(to_string = "medium", serialize = "mild")]
   Medium = 0x01,
   #[strum(serialize = "high")]
   High = 0x02,
}

impl AlertLevel {
   pub fn to_str(self) -> &'static str {
      self.into()
   }

   pub const fn to_bytes(self) -> [u8; 1] {
      [self as u8]
   }
}

/// The capability categories a session can resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
pub enum Capability {
   #[strum(serialize = "immediate alert")]
   ImmediateAlert,
   #[strum(serialize = "battery")]
   Battery,
   #[strum(serialize = "find me")]
   FindMe,
}

/// A (service, characteristic) pair confirmed present on the current link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CapabilityHandle {
   pub service: Uuid,
   pub characteristic: Uuid,
}

impl CapabilityHandle {
   pub const fn new(service: Uuid, characteristic: Uuid) -> Self {
      Self {
         service,
         characteristic,
      }
   }

   pub fn is_find_me(&self) -> bool {
      self.service == FIND_ME_SERVICE
   }
}

impl fmt::Display for CapabilityHandle {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "{}/{}", self.service, self.characteristic)
   }
}

/// One service of a discovered capability set, characteristics in the
/// order the transport reported them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
   pub uuid: Uuid,
   pub characteristics: Vec<Uuid>,
}

impl DiscoveredService {
   pub fn new(uuid: Uuid, characteristics: impl IntoIterator<Item = Uuid>) -> Self {
      Self {
         uuid,
         characteristics: characteristics.into_iter().collect(),
      }
   }
}
