//! Session state machine for the bound keyring.
//!
//! A [`Session`] owns the transport link, the capabilities resolved on it,
//! the RSSI poller and the click classifier. It is driven exclusively by the
//! manager actor, so none of its state is shared.

use std::{sync::Arc, time::Duration};

use bluer::Address;
use log::{debug, info, warn};
use serde_json::json;
use tokio::time::Instant;

use crate::{
   bluetooth::transport::{GattStatus, Link, LinkCallbacks, LinkEvent, LinkId, LinkState, Transport},
   config::Config,
   error::{Result, TrackerError},
   event::{EventSender, TrackerEvent},
   gatt::{
      protocol::{AlertLevel, Capability, CapabilityHandle, DiscoveredService, Value},
      resolver::{self, ResolvedCapabilities},
   },
   tracker::{
      Loopback, LoopbackSender,
      debounce::{Click, ClickClassifier},
      poller::{RssiPoller, rssi_quality},
      timer::{TimerFired, TimerKind},
   },
};

/// Lifecycle of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
pub enum SessionState {
   Idle,
   Connecting,
   Connected,
   Discovering,
   Active,
   Disconnected,
}

impl SessionState {
   pub fn to_str(self) -> &'static str {
      self.into()
   }

   const fn is_link_up(self) -> bool {
      matches!(self, Self::Connected | Self::Discovering | Self::Active)
   }
}

/// The configuration slice a session needs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
   pub device: Option<Address>,
   pub action_on_power_off: bool,
   pub double_click_delay: Duration,
}

impl From<&Config> for SessionConfig {
   fn from(config: &Config) -> Self {
      let device = match config.bound_device() {
         Ok(addr) => Some(addr),
         Err(TrackerError::NoBoundDevice) => None,
         Err(e) => {
            warn!("Ignoring configured device: {e}");
            None
         },
      };
      Self {
         device,
         action_on_power_off: config.action_on_power_off,
         double_click_delay: config.double_click_delay(),
      }
   }
}

struct ActiveLink {
   id: LinkId,
   link: Box<dyn Link>,
}

pub struct Session {
   config: SessionConfig,
   transport: Arc<dyn Transport>,
   events: EventSender,
   loopback: LoopbackSender,

   state: SessionState,
   link: Option<ActiveLink>,
   next_link_id: LinkId,
   capabilities: ResolvedCapabilities,
   find_me_button: Option<CapabilityHandle>,
   poller: RssiPoller,
   classifier: ClickClassifier,
   last_rssi: Option<(Instant, u8)>,
   last_battery: Option<u8>,
}

impl Session {
   pub fn new(
      config: SessionConfig,
      transport: Arc<dyn Transport>,
      events: EventSender,
      loopback: LoopbackSender,
   ) -> Self {
      Self {
         poller: RssiPoller::new(loopback.clone()),
         classifier: ClickClassifier::new(config.double_click_delay, loopback.clone()),
         config,
         transport,
         events,
         loopback,
         state: SessionState::Idle,
         link: None,
         next_link_id: 0,
         capabilities: ResolvedCapabilities::default(),
         find_me_button: None,
         last_rssi: None,
         last_battery: None,
      }
   }

   pub const fn state(&self) -> SessionState {
      self.state
   }

   pub const fn device(&self) -> Option<Address> {
      self.config.device
   }

   /// Opens the link to the bound device, or re-requests discovery when a
   /// link is already held.
   pub fn connect(&mut self) -> Result<()> {
      let Some(device) = self.config.device else {
         return Err(TrackerError::NoBoundDevice);
      };

      if let Some(active) = &self.link {
         info!("{device}: link already open, re-discovering capabilities");
         if let Err(e) = active.link.discover_capabilities() {
            warn!("{device}: discovery request failed: {e}");
         }
         return Ok(());
      }

      self.next_link_id += 1;
      let id = self.next_link_id;
      info!("{device}: opening link {id}");
      let link = self
         .transport
         .open_link(device, LinkCallbacks::new(id, self.loopback.clone()))?;
      self.link = Some(ActiveLink { id, link });
      self.transition(SessionState::Connecting);
      Ok(())
   }

   /// Tears the session down: closes the link and cancels both timers.
   /// Repeated calls are harmless.
   pub fn disconnect(&mut self) {
      self.poller.disarm();
      self.classifier.cancel();
      if let Some(mut active) = self.link.take() {
         info!("{}: closing link {}", self.device_str(), active.id);
         active.link.close();
      }
      self.capabilities = ResolvedCapabilities::default();
      self.find_me_button = None;
      if self.state != SessionState::Disconnected {
         self.transition(SessionState::Disconnected);
      }
   }

   pub fn send_immediate_alert(&mut self, level: AlertLevel) -> Result<()> {
      let target = match (&self.link, self.capabilities.immediate_alert) {
         (Some(active), Some(capability)) if self.state == SessionState::Active => {
            Some((active, capability))
         },
         _ => None,
      };
      let Some((active, capability)) = target else {
         warn!("{}: immediate alert requested but not available", self.device_str());
         self.emit(TrackerEvent::ImmediateAlertFailed);
         return Err(TrackerError::CapabilityUnavailable(Capability::ImmediateAlert));
      };

      debug!("{}: writing alert level {level}", self.device_str());
      if let Err(e) = active.link.write_characteristic(capability, &level.to_bytes()) {
         warn!("{}: alert write failed: {e}", self.device_str());
         self.emit(TrackerEvent::ImmediateAlertFailed);
         return Err(e);
      }
      Ok(())
   }

   pub fn handle_loopback(&mut self, msg: Loopback) {
      match msg {
         Loopback::Link { link, event } => {
            if self.link.as_ref().map(|l| l.id) != Some(link) {
               debug!("Dropping callback from stale link {link}: {event:?}");
               return;
            }
            self.handle_link_event(event);
         },
         Loopback::Timer(fired) => self.handle_timer(fired),
      }
   }

   fn handle_link_event(&mut self, event: LinkEvent) {
      match event {
         LinkEvent::StateChanged { status, state } => self.on_link_state_changed(status, state),
         LinkEvent::CapabilitiesDiscovered { services, status } => {
            self.on_capabilities_discovered(&services, status);
         },
         LinkEvent::CharacteristicRead {
            capability,
            value,
            status,
         } => self.on_characteristic_read(capability, &value, status),
         LinkEvent::CharacteristicWritten { capability, status } => {
            self.on_characteristic_written(capability, status);
         },
         LinkEvent::CharacteristicChanged {
            capability,
            value,
            at,
         } => self.on_characteristic_changed(capability, &value, at),
         LinkEvent::SignalStrengthSampled { rssi, status } => {
            self.on_signal_strength_sampled(rssi, status);
         },
         LinkEvent::DescriptorWritten { status } => self.on_descriptor_written(status),
      }
   }

   fn handle_timer(&mut self, fired: TimerFired) {
      match fired.kind {
         TimerKind::RssiPoll => {
            let link = self.link.as_ref().map(|l| l.link.as_ref());
            self.poller.on_timer(fired, link);
         },
         TimerKind::PendingClick => {
            if let Some(Click::Single) = self.classifier.on_timer(fired) {
               debug!("{}: single click", self.device_str());
               self.emit(TrackerEvent::SingleClick);
            }
         },
      }
   }

   fn on_link_state_changed(&mut self, status: GattStatus, state: LinkState) {
      debug!("{}: link state {state} (status {status})", self.device_str());
      match state {
         LinkState::Connected => {
            if !status.is_success() {
               warn!("{}: connect reported status {status}, ignoring", self.device_str());
               return;
            }
            info!("{}: link established", self.device_str());
            self.transition(SessionState::Connected);
            self.emit(TrackerEvent::LinkEstablished);
            if let Some(active) = &self.link
               && let Err(e) = active.link.discover_capabilities()
            {
               warn!("{}: discovery request failed: {e}", self.device_str());
            }
            self.transition(SessionState::Discovering);
         },
         LinkState::Disconnected => {
            // The peer-powered-off status triggers the action even when the
            // policy is off.
            if self.config.action_on_power_off || status == GattStatus::PEER_POWERED_OFF {
               info!("{}: link lost (status {status}), out-of-band action", self.device_str());
               self.emit(TrackerEvent::OutOfBandAction);
               self.set_find_me_notification(false);
            } else {
               info!("{}: link lost (status {status})", self.device_str());
            }
            // The link handle is kept: the transport reconnects on its own.
            self.poller.disarm();
            self.capabilities = ResolvedCapabilities::default();
            self.find_me_button = None;
            self.transition(SessionState::Disconnected);
         },
      }
   }

   fn on_capabilities_discovered(&mut self, services: &[DiscoveredService], status: GattStatus) {
      self.poller.arm();
      self.emit(TrackerEvent::CapabilitiesDiscovered);

      if !status.is_success() {
         warn!("{}: capability discovery failed (status {status})", self.device_str());
         return;
      }

      self.capabilities = resolver::resolve(services);
      self.find_me_button = resolver::find_me_button(services);
      self.transition(SessionState::Active);
      let caps = self.capabilities;
      debug!("{}: resolved {caps:?}", self.device_str());

      if let Some(alert) = caps.immediate_alert {
         self.emit(TrackerEvent::ImmediateAlertAvailable);
         self.issue("alert level read", |link| link.read_characteristic(alert));
      }
      if let Some(battery) = caps.battery {
         self.issue("battery read", |link| link.read_characteristic(battery));
      }
      if let Some(find_me) = caps.find_me {
         self.issue("find-me subscription", |link| link.set_notification(find_me, true));
      }
      self.set_find_me_notification(true);
   }

   fn on_characteristic_read(&mut self, capability: CapabilityHandle, value: &Value, status: GattStatus) {
      if !status.is_success() {
         warn!("{}: read of {capability} failed (status {status})", self.device_str());
         return;
      }
      match self.capabilities.classify(capability) {
         Some(Capability::Battery) => {
            let Some(&level) = value.first() else {
               warn!("{}: empty battery value", self.device_str());
               return;
            };
            let level = level.min(100);
            debug!("{}: battery {level}%", self.device_str());
            self.last_battery = Some(level);
            self.emit(TrackerEvent::BatteryLevel(level));
         },
         Some(Capability::ImmediateAlert) => {
            let level = value.first().and_then(|&b| AlertLevel::from_repr(b));
            debug!("{}: current alert level {level:?}", self.device_str());
         },
         _ => debug!("{}: read {capability}: {}", self.device_str(), hex::encode(value)),
      }
   }

   fn on_characteristic_written(&mut self, capability: CapabilityHandle, status: GattStatus) {
      if status.is_success() {
         debug!("{}: wrote {capability}", self.device_str());
         return;
      }
      warn!("{}: write to {capability} failed (status {status})", self.device_str());
      if self.capabilities.immediate_alert == Some(capability) {
         self.emit(TrackerEvent::ImmediateAlertFailed);
      }
   }

   fn on_characteristic_changed(&mut self, capability: CapabilityHandle, value: &Value, at: Instant) {
      if self.state != SessionState::Active || !capability.is_find_me() {
         debug!("{}: ignoring notification on {capability}", self.device_str());
         return;
      }
      debug!("{}: button press ({})", self.device_str(), hex::encode(value));
      match self.classifier.on_raw_press(at) {
         Some(Click::Double) => {
            debug!("{}: double click", self.device_str());
            self.emit(TrackerEvent::DoubleClick);
         },
         Some(Click::Single) => {
            debug!("{}: single click", self.device_str());
            self.emit(TrackerEvent::SingleClick);
         },
         None => {},
      }
   }

   fn on_signal_strength_sampled(&mut self, rssi: i16, status: GattStatus) {
      if !status.is_success() {
         warn!("{}: RSSI probe failed (status {status})", self.device_str());
         return;
      }
      if !self.state.is_link_up() {
         return;
      }
      let quality = rssi_quality(rssi);
      self.last_rssi = Some((Instant::now(), quality));
      self.emit(TrackerEvent::RssiUpdated(quality));
   }

   fn on_descriptor_written(&mut self, status: GattStatus) {
      if !status.is_success() {
         warn!("{}: descriptor write failed (status {status})", self.device_str());
         return;
      }
      if self.state == SessionState::Active
         && let Some(battery) = self.capabilities.battery
      {
         self.issue("battery read", |link| link.read_characteristic(battery));
      }
   }

   /// Best-effort toggle of the find-me button subscription.
   fn set_find_me_notification(&self, enabled: bool) {
      let Some(button) = self.find_me_button.or(self.capabilities.find_me) else {
         return;
      };
      if let Some(active) = &self.link
         && let Err(e) = active.link.set_notification(button, enabled)
      {
         debug!("{}: find-me notification toggle ignored: {e}", self.device_str());
      }
   }

   fn issue(&self, what: &str, op: impl FnOnce(&dyn Link) -> Result<()>) {
      let Some(active) = &self.link else {
         return;
      };
      if let Err(e) = op(active.link.as_ref()) {
         warn!("{}: {what} failed: {e}", self.device_str());
      }
   }

   fn transition(&mut self, next: SessionState) {
      debug!("{}: {} -> {next}", self.device_str(), self.state);
      self.state = next;
   }

   fn emit(&self, event: TrackerEvent) {
      self
         .events
         .emit(self.config.device.unwrap_or(Address::any()), event);
   }

   fn device_str(&self) -> String {
      self
         .config
         .device
         .map_or_else(|| "<unbound>".to_string(), |d| d.to_string())
   }

   /// Snapshot of the session for status queries.
   pub fn to_json(&self) -> serde_json::Value {
      let now = Instant::now();
      json!({
         "state": self.state.to_str(),
         "device": self.config.device.map(|d| d.to_string()),
         "capabilities": {
            "immediate_alert": self.capabilities.immediate_alert.is_some(),
            "battery": self.capabilities.battery.is_some(),
            "find_me": self.capabilities.find_me.is_some(),
         },
         "rssi_quality": self.last_rssi.map(|(_, q)| q),
         "rssi_age_secs": self.last_rssi.map(|(at, _)| now.duration_since(at).as_secs()),
         "battery_level": self.last_battery,
         "last_press_age_ms": self
            .classifier
            .last_press()
            .map(|at| now.duration_since(at).as_millis() as u64),
         "rssi_polling": self.poller.is_armed(),
         "double_click_window_ms": self.classifier.window().as_millis() as u64,
      })
   }
}
