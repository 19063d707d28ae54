//! Transport seam between the session and the platform Bluetooth stack.
//!
//! Every operation on a [`Link`] only issues a request and returns; its
//! outcome arrives later as a [`LinkEvent`] posted through the link's
//! [`LinkCallbacks`] into the session actor.

use std::fmt;

use bluer::Address;
use log::warn;
use tokio::time::Instant;

use crate::{
   error::Result,
   gatt::protocol::{CapabilityHandle, DiscoveredService, Value},
   tracker::{Loopback, LoopbackSender},
};

/// Identifies one opened link so that callbacks from a torn-down link can be
/// told apart from the current one.
pub type LinkId = u64;

/// Status carried by every asynchronous transport result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GattStatus(pub u16);

impl GattStatus {
   pub const SUCCESS: Self = Self(0x0000);
   /// Link supervision timeout: the peer went silent, which for a keyring
   /// means it was switched off or left radio range.
   pub const PEER_POWERED_OFF: Self = Self(0x0008);
   /// The peer closed the link but still answers.
   pub const REMOTE_TERMINATED: Self = Self(0x0013);
   pub const FAILURE: Self = Self(0x0101);

   pub const fn is_success(self) -> bool {
      self.0 == Self::SUCCESS.0
   }
}

impl fmt::Display for GattStatus {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "{:#06x}", self.0)
   }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum LinkState {
   Connected,
   Disconnected,
}

/// Callbacks reported by a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
   StateChanged {
      status: GattStatus,
      state: LinkState,
   },
   CapabilitiesDiscovered {
      services: Vec<DiscoveredService>,
      status: GattStatus,
   },
   CharacteristicRead {
      capability: CapabilityHandle,
      value: Value,
      status: GattStatus,
   },
   CharacteristicWritten {
      capability: CapabilityHandle,
      status: GattStatus,
   },
   CharacteristicChanged {
      capability: CapabilityHandle,
      value: Value,
      /// When the notification arrived from the peer.
      at: Instant,
   },
   SignalStrengthSampled {
      rssi: i16,
      status: GattStatus,
   },
   DescriptorWritten {
      status: GattStatus,
   },
}

/// Sender half handed to a link so it can report back to the session.
///
/// This type is cheaply cloneable.
#[derive(Debug, Clone)]
pub struct LinkCallbacks {
   link: LinkId,
   tx: LoopbackSender,
}

impl LinkCallbacks {
   pub const fn new(link: LinkId, tx: LoopbackSender) -> Self {
      Self { link, tx }
   }

   pub const fn link_id(&self) -> LinkId {
      self.link
   }

   pub async fn send(&self, event: LinkEvent) {
      if let Err(e) = self
         .tx
         .send(Loopback::Link {
            link: self.link,
            event,
         })
         .await
      {
         warn!("Link {}: session gone, dropping callback: {:?}", self.link, e.0);
      }
   }
}

/// Opens links to a peer device.
pub trait Transport: Send + Sync {
   fn open_link(&self, device: Address, callbacks: LinkCallbacks) -> Result<Box<dyn Link>>;
}

/// An open (or opening) link to the bound device.
pub trait Link: Send {
   /// Disconnects and releases the link. Repeated calls are harmless.
   fn close(&mut self);

   fn discover_capabilities(&self) -> Result<()>;

   fn read_characteristic(&self, capability: CapabilityHandle) -> Result<()>;

   fn write_characteristic(&self, capability: CapabilityHandle, value: &[u8]) -> Result<()>;

   fn set_notification(&self, capability: CapabilityHandle, enabled: bool) -> Result<()>;

   fn probe_signal_strength(&self) -> Result<()>;
}
