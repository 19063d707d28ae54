//! Configuration management for the tracker service.
//!
//! This module handles loading and saving configuration from disk: the
//! bound keyring, the button debounce window, and the actions triggered
//! by button and power-off events.

use std::{
   env, fs,
   path::{Path, PathBuf},
   str::FromStr,
   time::Duration,
};

use bluer::Address;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::error::{Result, TrackerError};

/// Main configuration structure for the service.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
   /// Bluetooth address of the bound keyring.
   #[serde(default)]
   pub device: Option<String>,

   /// Trigger the out-of-band action on every link loss, including drops
   /// the peer recovers from, not only when it stops answering.
   #[serde(default)]
   pub action_on_power_off: bool,

   #[serde(default = "default_double_click_delay")]
   pub double_click_delay_ms: u64,

   #[serde(default = "default_reconnect_delay")]
   pub reconnect_delay_sec: u64,

   #[serde(default)]
   pub actions: ActionConfig,
}

/// Action identifiers bound to the keyring events.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ActionConfig {
   #[serde(default = "default_simple_click_action")]
   pub simple_click: SmolStr,

   #[serde(default = "default_double_click_action")]
   pub double_click: SmolStr,

   #[serde(default = "default_out_of_band_action")]
   pub out_of_band: SmolStr,
}

const fn default_double_click_delay() -> u64 {
   500
}

const fn default_reconnect_delay() -> u64 {
   2
}

fn default_simple_click_action() -> SmolStr {
   SmolStr::new_static("ring_phone")
}

fn default_double_click_action() -> SmolStr {
   SmolStr::new_static("take_picture")
}

fn default_out_of_band_action() -> SmolStr {
   SmolStr::new_static("ring_phone")
}

impl Default for ActionConfig {
   fn default() -> Self {
      Self {
         simple_click: default_simple_click_action(),
         double_click: default_double_click_action(),
         out_of_band: default_out_of_band_action(),
      }
   }
}

impl Default for Config {
   fn default() -> Self {
      Self {
         device: None,
         action_on_power_off: false,
         double_click_delay_ms: default_double_click_delay(),
         reconnect_delay_sec: default_reconnect_delay(),
         actions: ActionConfig::default(),
      }
   }
}

impl Config {
   /// Loads configuration from disk or creates default if not exists.
   pub fn load() -> Result<Self> {
      Self::load_from(&Self::config_path()?)
   }

   /// Loads configuration from an explicit path, writing defaults there if
   /// the file does not exist yet.
   pub fn load_from(path: &Path) -> Result<Self> {
      if path.exists() {
         let contents = fs::read_to_string(path)?;
         Ok(toml::from_str(&contents)?)
      } else {
         let config = Self::default();
         config.save_to(path)?;
         Ok(config)
      }
   }

   /// Saves the configuration to `path`, creating parent directories.
   pub fn save_to(&self, path: &Path) -> Result<()> {
      if let Some(parent) = path.parent() {
         fs::create_dir_all(parent)?;
      }

      let contents = toml::to_string_pretty(self)?;
      fs::write(path, contents)?;

      Ok(())
   }

   fn config_path() -> Result<PathBuf> {
      let config_dir = if let Ok(itag_home) = env::var("ITAG_HOME") {
         PathBuf::from(itag_home)
      } else if let Some(config_dir) = dirs::config_dir() {
         config_dir
      } else {
         return Err(TrackerError::ConfigDirNotFound);
      };

      Ok(config_dir.join("itagd").join("config.toml"))
   }

   /// Parses the bound device reference.
   pub fn bound_device(&self) -> Result<Address> {
      let Some(device) = self.device.as_deref() else {
         return Err(TrackerError::NoBoundDevice);
      };
      Address::from_str(device.trim()).map_err(|_| TrackerError::InvalidAddress(device.to_string()))
   }

   pub const fn double_click_delay(&self) -> Duration {
      Duration::from_millis(self.double_click_delay_ms)
   }

   pub const fn reconnect_delay(&self) -> Duration {
      Duration::from_secs(self.reconnect_delay_sec)
   }
}
