//! BlueZ transport for the keyring link.
//!
//! This module drives a LE GATT client through `bluer`. Every request runs
//! as a task owned by the link and reports its outcome through the link's
//! callbacks; dropping or closing the link aborts all of them.

use std::{collections::HashMap, future::Future, pin::pin, sync::Arc, time::Duration};

use bluer::{
   Adapter, Address, Device, DeviceEvent, DeviceProperty, Session, gatt::remote::Characteristic,
};
use futures::StreamExt;
use log::{debug, info, warn};
use parking_lot::Mutex;
use rand::Rng;
use tokio::{
   task::{AbortHandle, JoinSet},
   time,
};

use crate::{
   bluetooth::transport::{GattStatus, Link, LinkCallbacks, LinkEvent, LinkState, Transport},
   error::{Result, TrackerError},
   gatt::protocol::{CapabilityHandle, DiscoveredService, Value},
};

/// Timeout for a single connection attempt
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Maximum time to wait for BlueZ to resolve the GATT database
const SERVICES_RESOLVED_TIMEOUT: Duration = Duration::from_secs(15);
/// Poll interval while waiting for services or watching a link without events
const LINK_CHECK_INTERVAL: Duration = Duration::from_millis(500);
/// Time a lost peer gets to answer again before it counts as switched off
const LOSS_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
/// Maximum reconnect delay
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(120);

/// Transport over the default BlueZ adapter.
pub struct BluezTransport {
   _session: Session,
   adapter: Adapter,
   reconnect_delay: Duration,
}

impl BluezTransport {
   pub async fn new(reconnect_delay: Duration) -> Result<Self> {
      let session = Session::new().await?;
      let adapter = session.default_adapter().await?;

      if !adapter.is_powered().await? {
         adapter.set_powered(true).await?;
         info!("Powered on adapter: {}", adapter.name());
      }
      info!("Using adapter {}", adapter.name());

      Ok(Self {
         _session: session,
         adapter,
         reconnect_delay,
      })
   }
}

impl Transport for BluezTransport {
   fn open_link(&self, device: Address, callbacks: LinkCallbacks) -> Result<Box<dyn Link>> {
      let device = self.adapter.device(device)?;
      Ok(Box::new(BluezLink::open(device, callbacks, self.reconnect_delay)))
   }
}

/// State shared between a link and its tasks.
struct LinkShared {
   device: Device,
   callbacks: LinkCallbacks,
   characteristics: Mutex<HashMap<CapabilityHandle, Characteristic>>,
}

impl LinkShared {
   fn characteristic(&self, capability: CapabilityHandle) -> Result<Characteristic> {
      self
         .characteristics
         .lock()
         .get(&capability)
         .cloned()
         .ok_or(TrackerError::UnknownCapability)
   }
}

pub struct BluezLink {
   shared: Arc<LinkShared>,
   tasks: Mutex<JoinSet<()>>,
   notifications: Mutex<HashMap<CapabilityHandle, AbortHandle>>,
   closed: bool,
}

impl BluezLink {
   fn open(device: Device, callbacks: LinkCallbacks, reconnect_delay: Duration) -> Self {
      let link = Self {
         shared: Arc::new(LinkShared {
            device,
            callbacks,
            characteristics: Mutex::new(HashMap::new()),
         }),
         tasks: Mutex::new(JoinSet::new()),
         notifications: Mutex::new(HashMap::new()),
         closed: false,
      };
      link.spawn(supervise(link.shared.clone(), reconnect_delay));
      link
   }

   fn spawn<F>(&self, task: F) -> AbortHandle
   where
      F: Future<Output = ()> + Send + 'static,
   {
      let mut tasks = self.tasks.lock();
      // Reap finished requests so the set does not grow with every probe.
      while tasks.try_join_next().is_some() {}
      tasks.spawn(task)
   }

   fn ensure_open(&self) -> Result<()> {
      if self.closed {
         Err(TrackerError::LinkClosed)
      } else {
         Ok(())
      }
   }
}

impl Link for BluezLink {
   fn close(&mut self) {
      if self.closed {
         return;
      }
      self.closed = true;
      self.notifications.lock().clear();
      self.tasks.lock().abort_all();

      let device = self.shared.device.clone();
      tokio::spawn(async move {
         if let Err(e) = device.disconnect().await {
            debug!("{}: disconnect: {e}", device.address());
         }
      });
   }

   fn discover_capabilities(&self) -> Result<()> {
      self.ensure_open()?;
      let shared = self.shared.clone();
      self.spawn(async move {
         let (services, status) = match discover(&shared).await {
            Ok(services) => (services, GattStatus::SUCCESS),
            Err(e) => {
               warn!("{}: discovery failed: {e}", shared.device.address());
               (Vec::new(), GattStatus::FAILURE)
            },
         };
         shared
            .callbacks
            .send(LinkEvent::CapabilitiesDiscovered { services, status })
            .await;
      });
      Ok(())
   }

   fn read_characteristic(&self, capability: CapabilityHandle) -> Result<()> {
      self.ensure_open()?;
      let characteristic = self.shared.characteristic(capability)?;
      let shared = self.shared.clone();
      self.spawn(async move {
         let (value, status) = match characteristic.read().await {
            Ok(value) => {
               debug!("← {capability}: {}", hex::encode(&value));
               (Value::from_vec(value), GattStatus::SUCCESS)
            },
            Err(e) => {
               warn!("{}: read {capability} failed: {e}", shared.device.address());
               (Value::new(), GattStatus::FAILURE)
            },
         };
         shared
            .callbacks
            .send(LinkEvent::CharacteristicRead {
               capability,
               value,
               status,
            })
            .await;
      });
      Ok(())
   }

   fn write_characteristic(&self, capability: CapabilityHandle, value: &[u8]) -> Result<()> {
      self.ensure_open()?;
      let characteristic = self.shared.characteristic(capability)?;
      let shared = self.shared.clone();
      let value = value.to_vec();
      self.spawn(async move {
         debug!("→ {capability}: {}", hex::encode(&value));
         let status = match characteristic.write(&value).await {
            Ok(()) => GattStatus::SUCCESS,
            Err(e) => {
               warn!("{}: write {capability} failed: {e}", shared.device.address());
               GattStatus::FAILURE
            },
         };
         shared
            .callbacks
            .send(LinkEvent::CharacteristicWritten { capability, status })
            .await;
      });
      Ok(())
   }

   fn set_notification(&self, capability: CapabilityHandle, enabled: bool) -> Result<()> {
      self.ensure_open()?;
      if !enabled {
         if let Some(handle) = self.notifications.lock().remove(&capability) {
            debug!("Unsubscribing from {capability}");
            handle.abort();
         }
         return Ok(());
      }

      if self
         .notifications
         .lock()
         .get(&capability)
         .is_some_and(|h| !h.is_finished())
      {
         return Ok(());
      }

      let characteristic = self.shared.characteristic(capability)?;
      let shared = self.shared.clone();
      let handle = self.spawn(async move {
         let stream = match characteristic.notify().await {
            Ok(stream) => stream,
            Err(e) => {
               warn!("{}: subscribe {capability} failed: {e}", shared.device.address());
               shared
                  .callbacks
                  .send(LinkEvent::DescriptorWritten {
                     status: GattStatus::FAILURE,
                  })
                  .await;
               return;
            },
         };
         shared
            .callbacks
            .send(LinkEvent::DescriptorWritten {
               status: GattStatus::SUCCESS,
            })
            .await;

         let mut stream = pin!(stream);
         while let Some(value) = stream.next().await {
            debug!("← {capability}: {}", hex::encode(&value));
            shared
               .callbacks
               .send(LinkEvent::CharacteristicChanged {
                  capability,
                  value: Value::from_vec(value),
                  at: time::Instant::now(),
               })
               .await;
         }
         debug!("{}: notifications on {capability} ended", shared.device.address());
      });
      self.notifications.lock().insert(capability, handle);
      Ok(())
   }

   fn probe_signal_strength(&self) -> Result<()> {
      self.ensure_open()?;
      let shared = self.shared.clone();
      self.spawn(async move {
         let event = match shared.device.rssi().await {
            Ok(Some(rssi)) => LinkEvent::SignalStrengthSampled {
               rssi,
               status: GattStatus::SUCCESS,
            },
            Ok(None) => LinkEvent::SignalStrengthSampled {
               rssi: 0,
               status: GattStatus::FAILURE,
            },
            Err(e) => {
               debug!("{}: RSSI unavailable: {e}", shared.device.address());
               LinkEvent::SignalStrengthSampled {
                  rssi: 0,
                  status: GattStatus::FAILURE,
               }
            },
         };
         shared.callbacks.send(event).await;
      });
      Ok(())
   }
}

/// Keeps the link up for as long as it is open, reconnecting with backoff
/// after every loss.
async fn supervise(shared: Arc<LinkShared>, reconnect_delay: Duration) {
   let addr = shared.device.address();
   let mut retry_count = 0;
   let mut connected = false;

   loop {
      if !connected {
         connected = try_connect(&shared.device, CONNECT_TIMEOUT).await;
      }
      if !connected {
         retry_count += 1;
         let delay = calc_retry_delay(reconnect_delay, retry_count);
         debug!("{addr}: reconnecting in {delay:?}");
         time::sleep(delay).await;
         continue;
      }

      retry_count = 0;
      info!("{addr}: connected (link {})", shared.callbacks.link_id());
      shared
         .callbacks
         .send(LinkEvent::StateChanged {
            status: GattStatus::SUCCESS,
            state: LinkState::Connected,
         })
         .await;

      wait_for_disconnect(&shared.device).await;
      shared.characteristics.lock().clear();

      // BlueZ does not expose the disconnect reason; a peer that answers a
      // prompt reconnect only dropped the link.
      connected = try_connect(&shared.device, LOSS_PROBE_TIMEOUT).await;
      let status = loss_status(connected);
      warn!("{addr}: link lost (status {status})");
      shared
         .callbacks
         .send(LinkEvent::StateChanged {
            status,
            state: LinkState::Disconnected,
         })
         .await;
   }
}

/// Status reported for a lost link, given whether the peer answered a
/// prompt reconnect.
const fn loss_status(peer_reachable: bool) -> GattStatus {
   if peer_reachable {
      GattStatus::REMOTE_TERMINATED
   } else {
      GattStatus::PEER_POWERED_OFF
   }
}

async fn try_connect(device: &Device, timeout: Duration) -> bool {
   if device.is_connected().await.unwrap_or(false) {
      return true;
   }
   match time::timeout(timeout, device.connect()).await {
      Ok(Ok(())) => true,
      Ok(Err(e)) => {
         debug!("{}: connect failed: {e}", device.address());
         false
      },
      Err(_) => {
         debug!("{}: connect timed out", device.address());
         false
      },
   }
}

async fn wait_for_disconnect(device: &Device) {
   match device.events().await {
      Ok(events) => {
         let mut events = pin!(events);
         while let Some(event) = events.next().await {
            if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
               return;
            }
         }
      },
      Err(e) => warn!("{}: no device events ({e}), polling", device.address()),
   }

   let mut interval = time::interval(LINK_CHECK_INTERVAL);
   loop {
      interval.tick().await;
      if !device.is_connected().await.unwrap_or(false) {
         return;
      }
   }
}

async fn discover(shared: &LinkShared) -> Result<Vec<DiscoveredService>> {
   let device = &shared.device;
   time::timeout(SERVICES_RESOLVED_TIMEOUT, async {
      while !device.is_services_resolved().await.unwrap_or(false) {
         time::sleep(LINK_CHECK_INTERVAL).await;
      }
   })
   .await
   .map_err(|_| TrackerError::Transport("services not resolved".into()))?;

   // Attribute handle order, as the peer lists them.
   let mut services = device.services().await?;
   services.sort_by_key(|s| s.id());

   let mut discovered = Vec::with_capacity(services.len());
   let mut characteristics = HashMap::new();
   for service in services {
      let uuid = service.uuid().await?;
      let mut chars = service.characteristics().await?;
      chars.sort_by_key(|c| c.id());

      let mut ids = Vec::with_capacity(chars.len());
      for characteristic in chars {
         let char_uuid = characteristic.uuid().await?;
         characteristics.insert(CapabilityHandle::new(uuid, char_uuid), characteristic);
         ids.push(char_uuid);
      }
      debug!("{}: service {uuid} with {} characteristics", device.address(), ids.len());
      discovered.push(DiscoveredService::new(uuid, ids));
   }

   *shared.characteristics.lock() = characteristics;
   Ok(discovered)
}

fn calc_retry_delay(base_delay: Duration, retry_count: u32) -> Duration {
   let exponential = base_delay * (1 << retry_count.min(4));
   let delay = exponential.min(MAX_RECONNECT_DELAY);
   let jitter = rand::thread_rng().gen_range(0..1000);
   delay + Duration::from_millis(jitter)
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_retry_delay_backs_off_and_caps() {
      let base = Duration::from_secs(2);
      let first = calc_retry_delay(base, 0);
      assert!(first >= base && first < base + Duration::from_secs(1));

      let fourth = calc_retry_delay(base, 3);
      assert!(fourth >= Duration::from_secs(16));

      let late = calc_retry_delay(Duration::from_secs(60), 30);
      assert!(late >= MAX_RECONNECT_DELAY);
      assert!(late < MAX_RECONNECT_DELAY + Duration::from_secs(1));
   }

   #[test]
   fn test_loss_status_separates_power_off_from_drop() {
      assert_eq!(loss_status(false), GattStatus::PEER_POWERED_OFF);
      assert_eq!(loss_status(true), GattStatus::REMOTE_TERMINATED);
      assert_ne!(loss_status(true), GattStatus::PEER_POWERED_OFF);
   }
}
