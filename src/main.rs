//! iTag keyring D-Bus service
//!
//! This service keeps a persistent Bluetooth LE session with one bound
//! keyring, tracks its proximity, battery and button, and maps button and
//! power-off events onto configured actions exposed over D-Bus.

use std::{sync::Arc, time::Duration};

use bluer::Address;
use crossbeam::queue::SegQueue;
use log::{info, warn};
use tokio::{signal, sync::Notify, time};
use zbus::{Connection, connection, object_server::InterfaceRef};

use action::ActionMapper;
use bluetooth::bluez::BluezTransport;
use dbus::TrackerService;
use event::{EventBus, TrackerEvent};
use tracker::{manager::Tracker, session::SessionConfig};

mod action;
mod bluetooth;
mod config;
mod dbus;
mod error;
mod event;
mod gatt;
mod tracker;

use crate::{
   dbus::TrackerServiceSignals,
   error::{Result, TrackerError},
};

const OBJECT_PATH: &str = "/org/itagd/tracker";

#[tokio::main]
async fn main() -> Result<()> {
   env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

   info!("Starting itagd D-Bus service...");

   // Load configuration
   let config = config::Config::load()?;
   info!(
      "Loaded configuration: device {}, double-click window {}ms",
      config.device.as_deref().unwrap_or("<unbound>"),
      config.double_click_delay_ms
   );

   // Create event channel
   let event_bus = EventProcessor::new(ActionMapper::new(&config.actions));

   // Create the transport and the session actor
   let transport = BluezTransport::new(config.reconnect_delay()).await?;
   let tracker = Tracker::new(
      SessionConfig::from(&config),
      Arc::new(transport),
      event_bus.clone(),
   );

   // Build D-Bus connection
   let connection = connection::Builder::session()?
      .name("org.itagd")?
      .serve_at(OBJECT_PATH, TrackerService::new(tracker.clone()))?
      .build()
      .await?;

   info!("itagd D-Bus service started at org.itagd");

   // Start event processor
   event_bus.spawn_dispatcher(connection).await?;

   match tracker.connect().await {
      Ok(()) => {},
      Err(TrackerError::NoBoundDevice) => {
         warn!("No keyring bound, set `device` in the configuration file");
      },
      Err(e) => warn!("Initial connect failed: {e}"),
   }

   // Wait for shutdown signal
   signal::ctrl_c().await?;
   info!("Shutting down itagd service...");
   tracker.shutdown().await?;

   Ok(())
}

struct EventProcessor {
   queue: SegQueue<(Address, TrackerEvent)>,
   notifier: Notify,
   actions: ActionMapper,
}

impl EventProcessor {
   fn new(actions: ActionMapper) -> Arc<Self> {
      Arc::new(Self {
         queue: SegQueue::new(),
         notifier: Notify::new(),
         actions,
      })
   }
}

impl EventProcessor {
   async fn recv(self: &Arc<Self>) -> Option<(Address, TrackerEvent)> {
      loop {
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         let notify = self.notifier.notified();
         if let Some(event) = self.queue.pop() {
            return Some(event);
         }
         if Arc::strong_count(self) == 1 {
            return None;
         }
         let _ = time::timeout(Duration::from_secs(1), notify).await;
      }
   }

   async fn dispatch(
      &self,
      iface: &InterfaceRef<TrackerService>,
      (device, event): (Address, TrackerEvent),
   ) -> Result<()> {
      let addr = device.to_string();
      let addr_str = addr.as_str();
      match event {
         TrackerEvent::LinkEstablished => {
            iface.link_established(addr_str).await?;
         },
         TrackerEvent::CapabilitiesDiscovered => {
            iface.capabilities_discovered(addr_str).await?;
         },
         TrackerEvent::ImmediateAlertAvailable => {
            iface.immediate_alert_available(addr_str).await?;
         },
         TrackerEvent::ImmediateAlertFailed => {
            iface.immediate_alert_failed(addr_str).await?;
         },
         TrackerEvent::RssiUpdated(quality) => {
            iface.rssi_updated(addr_str, quality).await?;
         },
         TrackerEvent::BatteryLevel(level) => {
            iface.battery_level(addr_str, level).await?;
         },
         TrackerEvent::SingleClick => {
            iface.single_click(addr_str).await?;
         },
         TrackerEvent::DoubleClick => {
            iface.double_click(addr_str).await?;
         },
         TrackerEvent::OutOfBandAction => {
            iface.out_of_band_action(addr_str).await?;
         },
      }

      if let Some(action) = self.actions.map(event) {
         info!("{addr}: {} -> {action}", event.name());
         iface.action_triggered(addr_str, action).await?;
      }
      Ok(())
   }

   async fn spawn_dispatcher(self: Arc<Self>, connection: Connection) -> Result<()> {
      let iface = connection
         .object_server()
         .interface::<_, TrackerService>(OBJECT_PATH)
         .await?;
      tokio::spawn(async move {
         while let Some(event) = self.recv().await {
            if let Err(e) = self.dispatch(&iface, event).await {
               warn!("Error dispatching event: {e}");
            }
         }
      });

      Ok(())
   }
}

impl EventBus for EventProcessor {
   fn emit(&self, device: Address, event: TrackerEvent) {
      self.queue.push((device, event));
      self.notifier.notify_waiters();
   }
}
