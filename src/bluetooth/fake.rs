//! In-memory transport recording every link operation.

use std::sync::Arc;

use bluer::Address;
use parking_lot::Mutex;

use crate::{
   bluetooth::transport::{Link, LinkCallbacks, LinkEvent, LinkId, Transport},
   error::{Result, TrackerError},
   gatt::protocol::CapabilityHandle,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOp {
   Open(Address),
   Close,
   Discover,
   Read(CapabilityHandle),
   Write(CapabilityHandle, Vec<u8>),
   SetNotification(CapabilityHandle, bool),
   ProbeRssi,
}

#[derive(Debug, Default)]
struct FakeInner {
   ops: Mutex<Vec<(LinkId, LinkOp)>>,
   links: Mutex<Vec<LinkCallbacks>>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeTransport(Arc<FakeInner>);

impl FakeTransport {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn ops(&self) -> Vec<LinkOp> {
      self.0.ops.lock().iter().map(|(_, op)| op.clone()).collect()
   }

   pub fn count(&self, pred: impl Fn(&LinkOp) -> bool) -> usize {
      self.0.ops.lock().iter().filter(|(_, op)| pred(op)).count()
   }

   pub fn clear(&self) {
      self.0.ops.lock().clear();
   }

   pub fn open_count(&self) -> usize {
      self.0.links.lock().len()
   }

   /// Callbacks of the most recently opened link.
   pub fn callbacks(&self) -> LinkCallbacks {
      self
         .0
         .links
         .lock()
         .last()
         .cloned()
         .expect("no link was opened")
   }

   /// Reports `event` as if the most recently opened link produced it.
   pub async fn inject(&self, event: LinkEvent) {
      let callbacks = self.callbacks();
      callbacks.send(event).await;
   }
}

impl Transport for FakeTransport {
   fn open_link(&self, device: Address, callbacks: LinkCallbacks) -> Result<Box<dyn Link>> {
      let id = callbacks.link_id();
      self.0.ops.lock().push((id, LinkOp::Open(device)));
      self.0.links.lock().push(callbacks);
      Ok(Box::new(FakeLink {
         id,
         inner: self.0.clone(),
         closed: false,
      }))
   }
}

struct FakeLink {
   id: LinkId,
   inner: Arc<FakeInner>,
   closed: bool,
}

impl FakeLink {
   fn record(&self, op: LinkOp) -> Result<()> {
      if self.closed {
         return Err(TrackerError::LinkClosed);
      }
      self.inner.ops.lock().push((self.id, op));
      Ok(())
   }
}

impl Link for FakeLink {
   fn close(&mut self) {
      if !self.closed {
         self.inner.ops.lock().push((self.id, LinkOp::Close));
         self.closed = true;
      }
   }

   fn discover_capabilities(&self) -> Result<()> {
      self.record(LinkOp::Discover)
   }

   fn read_characteristic(&self, capability: CapabilityHandle) -> Result<()> {
      self.record(LinkOp::Read(capability))
   }

   fn write_characteristic(&self, capability: CapabilityHandle, value: &[u8]) -> Result<()> {
      self.record(LinkOp::Write(capability, value.to_vec()))
   }

   fn set_notification(&self, capability: CapabilityHandle, enabled: bool) -> Result<()> {
      self.record(LinkOp::SetNotification(capability, enabled))
   }

   fn probe_signal_strength(&self) -> Result<()> {
      self.record(LinkOp::ProbeRssi)
   }
}
