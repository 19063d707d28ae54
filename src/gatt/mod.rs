//! GATT level knowledge about the keyring.
//!
//! This module contains the service/characteristic identifiers of iTag
//! style keyrings and the resolver mapping a discovered capability set to
//! the handles the session drives.

pub mod protocol;
pub mod resolver;
