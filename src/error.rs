//! Error types for the keyring tracker service.
//!
//! This module defines all error types that can occur during the operation
//! of the service, including Bluetooth, D-Bus, I/O, configuration and
//! session errors.

use thiserror::Error;

use crate::gatt::protocol::Capability;

/// Main error type for the tracker service.
#[derive(Error, Debug)]
pub enum TrackerError {
   #[error("Bluetooth error: {0}")]
   Bluetooth(#[from] bluer::Error),

   #[error("D-Bus error: {0}")]
   DBus(#[from] zbus::Error),

   #[error("D-Bus connection error: {0}")]
   DBusConnection(#[from] zbus::fdo::Error),

   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   #[error("No device is bound in the configuration")]
   NoBoundDevice,

   #[error("Invalid device address: {0}")]
   InvalidAddress(String),

   #[error("Capability unavailable: {0}")]
   CapabilityUnavailable(Capability),

   #[error("Capability was not discovered on this link")]
   UnknownCapability,

   #[error("Transport error: {0}")]
   Transport(String),

   #[error("Link closed")]
   LinkClosed,

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),

   #[error("Tracker has been shut down")]
   ManagerShutdown,
}

/// Convenience type alias for Results with `TrackerError`.
pub type Result<T> = std::result::Result<T, TrackerError>;
