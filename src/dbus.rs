use std::str::FromStr;

use log::info;
use zbus::{interface, object_server::SignalEmitter};

use crate::{gatt::protocol::AlertLevel, tracker::manager::Tracker};

pub struct TrackerService {
   tracker: Tracker,
}

impl TrackerService {
   pub const fn new(tracker: Tracker) -> Self {
      Self { tracker }
   }
}

#[interface(name = "org.itagd.Tracker")]
impl TrackerService {
   async fn connect(&self) -> zbus::fdo::Result<bool> {
      self
         .tracker
         .connect()
         .await
         .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
      Ok(true)
   }

   async fn disconnect(&self) -> zbus::fdo::Result<bool> {
      self
         .tracker
         .disconnect()
         .await
         .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
      Ok(true)
   }

   async fn immediate_alert(&self, level: String) -> zbus::fdo::Result<bool> {
      let level = AlertLevel::from_str(&level)
         .map_err(|_| zbus::fdo::Error::InvalidArgs(format!("Invalid alert level: {level}")))?;

      self
         .tracker
         .send_immediate_alert(level)
         .await
         .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;

      info!("Sent immediate alert: {}", level.to_str());
      Ok(true)
   }

   async fn get_status(&self) -> zbus::fdo::Result<String> {
      let status = self
         .tracker
         .status()
         .await
         .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
      Ok(status.to_string())
   }

   // Signals
   #[zbus(signal)]
   pub async fn link_established(emitter: &SignalEmitter<'_>, address: &str) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn capabilities_discovered(
      emitter: &SignalEmitter<'_>,
      address: &str,
   ) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn immediate_alert_available(
      emitter: &SignalEmitter<'_>,
      address: &str,
   ) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn immediate_alert_failed(
      emitter: &SignalEmitter<'_>,
      address: &str,
   ) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn rssi_updated(
      emitter: &SignalEmitter<'_>,
      address: &str,
      quality: u8,
   ) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn battery_level(
      emitter: &SignalEmitter<'_>,
      address: &str,
      level: u8,
   ) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn single_click(emitter: &SignalEmitter<'_>, address: &str) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn double_click(emitter: &SignalEmitter<'_>, address: &str) -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn out_of_band_action(emitter: &SignalEmitter<'_>, address: &str)
   -> zbus::Result<()>;

   #[zbus(signal)]
   pub async fn action_triggered(
      emitter: &SignalEmitter<'_>,
      address: &str,
      action: &str,
   ) -> zbus::Result<()>;

   #[zbus(property(emits_changed_signal = "false"))]
   async fn state(&self) -> String {
      self
         .tracker
         .status()
         .await
         .ok()
         .and_then(|status| status["state"].as_str().map(str::to_owned))
         .unwrap_or_default()
   }
}
