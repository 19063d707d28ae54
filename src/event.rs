//! Event handling system for keyring session updates.
//!
//! This module provides the event infrastructure for notifying about
//! link, capability, proximity, battery and button changes.

use std::sync::Arc;

use bluer::Address;

/// Events that can be emitted by a tracker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr)]
pub enum TrackerEvent {
   LinkEstablished,
   CapabilitiesDiscovered,
   ImmediateAlertAvailable,
   /// Link quality, 0-100.
   RssiUpdated(u8),
   /// Battery level, 0-100.
   BatteryLevel(u8),
   SingleClick,
   DoubleClick,
   OutOfBandAction,
   ImmediateAlertFailed,
}

impl TrackerEvent {
   pub fn name(&self) -> &'static str {
      self.into()
   }
}

/// Trait for implementing event emission.
pub trait EventBus: Send + Sync {
   /// Emits an event to all registered listeners.
   fn emit(&self, device: Address, event: TrackerEvent);
}

/// Type alias for a thread-safe event sender.
pub type EventSender = Arc<dyn EventBus>;
