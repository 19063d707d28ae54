//! Session actor and its handle.
//!
//! This module hosts the single [`Session`] on one task. User commands
//! arrive through [`Tracker`]; transport callbacks and timer firings arrive
//! on the loopback channel. Both are handled strictly one at a time.

use std::sync::Arc;

use log::{info, warn};
use tokio::{
   select,
   sync::{mpsc, oneshot},
};

use crate::{
   bluetooth::transport::Transport,
   error::{Result, TrackerError},
   event::EventSender,
   gatt::protocol::AlertLevel,
   tracker::{
      Loopback,
      session::{Session, SessionConfig},
   },
};

/// Channel buffer size
const CHANNEL_BUFFER_SIZE: usize = 1000;

// === Commands ===

#[derive(Debug)]
enum TrackerCommand {
   Connect(oneshot::Sender<Result<()>>),
   Disconnect(oneshot::Sender<()>),
   ImmediateAlert(AlertLevel, oneshot::Sender<Result<()>>),
   GetStatus(oneshot::Sender<serde_json::Value>),
   Shutdown(oneshot::Sender<()>),
}

// === Handle ===

/// Handle to the session actor.
///
/// This type is cheaply cloneable. The actor tears the session down and
/// stops once every handle is dropped or [`Tracker::shutdown`] is called.
#[derive(Clone)]
pub struct Tracker {
   inbox: mpsc::Sender<TrackerCommand>,
}

impl Tracker {
   pub fn new(config: SessionConfig, transport: Arc<dyn Transport>, event_tx: EventSender) -> Self {
      let (command_tx, command_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
      let (loopback_tx, loopback_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
      let session = Session::new(config, transport, event_tx, loopback_tx);
      tokio::spawn(
         SessionActor {
            session,
            command_rx,
            loopback_rx,
         }
         .run(),
      );
      Self { inbox: command_tx }
   }

   async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> TrackerCommand) -> Result<T> {
      let (tx, rx) = oneshot::channel();
      self
         .inbox
         .send(make(tx))
         .await
         .map_err(|_| TrackerError::ManagerShutdown)?;
      rx.await.map_err(|_| TrackerError::ManagerShutdown)
   }

   pub async fn connect(&self) -> Result<()> {
      self.request(TrackerCommand::Connect).await?
   }

   pub async fn disconnect(&self) -> Result<()> {
      self.request(TrackerCommand::Disconnect).await
   }

   pub async fn send_immediate_alert(&self, level: AlertLevel) -> Result<()> {
      self
         .request(|tx| TrackerCommand::ImmediateAlert(level, tx))
         .await?
   }

   pub async fn status(&self) -> Result<serde_json::Value> {
      self.request(TrackerCommand::GetStatus).await
   }

   /// Tears the session down and stops the actor.
   pub async fn shutdown(&self) -> Result<()> {
      self.request(TrackerCommand::Shutdown).await
   }
}

// === Session Actor ===

struct SessionActor {
   session: Session,
   command_rx: mpsc::Receiver<TrackerCommand>,
   loopback_rx: mpsc::Receiver<Loopback>,
}

impl SessionActor {
   async fn run(mut self) {
      match self.session.device() {
         Some(device) => info!("Tracker session starting up for {device}"),
         None => info!("Tracker session starting up without a bound device"),
      }

      loop {
         select! {
             // Callbacks already queued are handled before later commands.
             biased;

             Some(msg) = self.loopback_rx.recv() => {
                 self.session.handle_loopback(msg);
             }
             cmd = self.command_rx.recv() => {
                 let Some(cmd) = cmd else {
                     info!("Tracker handles dropped, shutting down");
                     break;
                 };
                 if !self.handle_command(cmd) {
                     break;
                 }
             }
         }
      }

      self.session.disconnect();
      info!("Tracker session stopped ({})", self.session.state());
   }

   fn handle_command(&mut self, cmd: TrackerCommand) -> bool {
      match cmd {
         TrackerCommand::Connect(reply) => {
            let result = self.session.connect();
            if let Err(e) = &result {
               warn!("Connect failed: {e}");
            }
            let _ = reply.send(result);
         },
         TrackerCommand::Disconnect(reply) => {
            self.session.disconnect();
            let _ = reply.send(());
         },
         TrackerCommand::ImmediateAlert(level, reply) => {
            let _ = reply.send(self.session.send_immediate_alert(level));
         },
         TrackerCommand::GetStatus(reply) => {
            let _ = reply.send(self.session.to_json());
         },
         TrackerCommand::Shutdown(reply) => {
            info!("Tracker shutdown requested");
            self.session.disconnect();
            let _ = reply.send(());
            return false;
         },
      }
      true
   }
}

#[cfg(test)]
mod tests {
   use std::time::Duration;

   use bluer::Address;
   use tokio::time;

   use super::*;
   use crate::{
      bluetooth::{
         fake::{FakeTransport, LinkOp},
         transport::{GattStatus, LinkEvent, LinkState},
      },
      event::{TrackerEvent, testing::RecordingBus},
      gatt::protocol::{
         ALERT_LEVEL_CHARACTERISTIC, CapabilityHandle, DiscoveredService, FIND_ME_CHARACTERISTIC,
         FIND_ME_SERVICE, IMMEDIATE_ALERT_SERVICE, Value,
      },
   };

   fn config(device: Option<Address>) -> SessionConfig {
      SessionConfig {
         device,
         action_on_power_off: false,
         double_click_delay: Duration::from_millis(400),
      }
   }

   fn spawn(device: Option<Address>) -> (Tracker, FakeTransport, Arc<RecordingBus>) {
      let transport = FakeTransport::new();
      let bus = RecordingBus::new();
      let tracker = Tracker::new(config(device), Arc::new(transport.clone()), bus.clone());
      (tracker, transport, bus)
   }

   async fn state(tracker: &Tracker) -> String {
      let status = tracker.status().await.unwrap();
      status["state"].as_str().unwrap_or_default().to_string()
   }

   #[tokio::test(start_paused = true)]
   async fn test_connect_without_device_is_surfaced() {
      let (tracker, transport, _bus) = spawn(None);
      assert!(matches!(
         tracker.connect().await,
         Err(TrackerError::NoBoundDevice)
      ));
      assert_eq!(transport.open_count(), 0);
   }

   #[tokio::test(start_paused = true)]
   async fn test_full_session_through_handle() {
      let (tracker, transport, bus) = spawn(Some(Address::any()));

      tracker.connect().await.unwrap();
      assert_eq!(state(&tracker).await, "Connecting");

      transport
         .inject(LinkEvent::StateChanged {
            status: GattStatus::SUCCESS,
            state: LinkState::Connected,
         })
         .await;
      transport
         .inject(LinkEvent::CapabilitiesDiscovered {
            services: vec![
               DiscoveredService::new(IMMEDIATE_ALERT_SERVICE, [ALERT_LEVEL_CHARACTERISTIC]),
               DiscoveredService::new(FIND_ME_SERVICE, [FIND_ME_CHARACTERISTIC]),
            ],
            status: GattStatus::SUCCESS,
         })
         .await;
      assert_eq!(state(&tracker).await, "Active");

      tracker.send_immediate_alert(AlertLevel::Medium).await.unwrap();
      let alert = CapabilityHandle::new(IMMEDIATE_ALERT_SERVICE, ALERT_LEVEL_CHARACTERISTIC);
      assert_eq!(
         transport.count(|op| *op == LinkOp::Write(alert, vec![0x01])),
         1
      );

      let status = tracker.status().await.unwrap();
      assert_eq!(status["capabilities"]["immediate_alert"], true);
      assert_eq!(status["capabilities"]["battery"], false);
      assert_eq!(
         bus.events()[..3],
         [
            TrackerEvent::LinkEstablished,
            TrackerEvent::CapabilitiesDiscovered,
            TrackerEvent::ImmediateAlertAvailable,
         ]
      );
   }

   #[tokio::test(start_paused = true)]
   async fn test_disconnect_with_live_timers_silences_session() {
      let (tracker, transport, bus) = spawn(Some(Address::any()));
      tracker.connect().await.unwrap();
      transport
         .inject(LinkEvent::StateChanged {
            status: GattStatus::SUCCESS,
            state: LinkState::Connected,
         })
         .await;
      transport
         .inject(LinkEvent::CapabilitiesDiscovered {
            services: vec![DiscoveredService::new(FIND_ME_SERVICE, [FIND_ME_CHARACTERISTIC])],
            status: GattStatus::SUCCESS,
         })
         .await;
      transport
         .inject(LinkEvent::CharacteristicChanged {
            capability: CapabilityHandle::new(FIND_ME_SERVICE, FIND_ME_CHARACTERISTIC),
            value: Value::from_slice(&[0x01]),
            at: time::Instant::now(),
         })
         .await;
      let status = tracker.status().await.unwrap();
      assert_eq!(status["rssi_polling"], true);
      assert!(status["last_press_age_ms"].is_u64());

      tracker.disconnect().await.unwrap();
      tracker.disconnect().await.unwrap();
      let probes = transport.count(|op| *op == LinkOp::ProbeRssi);
      bus.clear();

      time::sleep(Duration::from_secs(30)).await;
      assert_eq!(state(&tracker).await, "Disconnected");
      assert!(bus.events().is_empty(), "events after teardown: {:?}", bus.events());
      assert_eq!(transport.count(|op| *op == LinkOp::ProbeRssi), probes);
      assert_eq!(transport.count(|op| *op == LinkOp::Close), 1);
   }

   #[tokio::test(start_paused = true)]
   async fn test_shutdown_tears_down_and_stops() {
      let (tracker, transport, _bus) = spawn(Some(Address::any()));
      tracker.connect().await.unwrap();

      tracker.shutdown().await.unwrap();
      assert_eq!(transport.count(|op| *op == LinkOp::Close), 1);
      assert!(matches!(
         tracker.connect().await,
         Err(TrackerError::ManagerShutdown)
      ));
   }
}
