//! Maps classified keyring events onto the user's configured actions.

use smol_str::{SmolStr, format_smolstr};

use crate::{config::ActionConfig, event::TrackerEvent};

/// Namespace every outgoing action identifier lives under.
pub const ACTION_PREFIX: &str = "org.itagd.action.";

#[derive(Debug, Clone)]
pub struct ActionMapper {
   simple_click: SmolStr,
   double_click: SmolStr,
   out_of_band: SmolStr,
}

impl ActionMapper {
   pub fn new(config: &ActionConfig) -> Self {
      Self {
         simple_click: qualify(&config.simple_click),
         double_click: qualify(&config.double_click),
         out_of_band: qualify(&config.out_of_band),
      }
   }

   /// Returns the action bound to `event`, if any.
   pub fn map(&self, event: TrackerEvent) -> Option<&str> {
      let action = match event {
         TrackerEvent::SingleClick => &self.simple_click,
         TrackerEvent::DoubleClick => &self.double_click,
         TrackerEvent::OutOfBandAction => &self.out_of_band,
         _ => return None,
      };
      (!action.is_empty()).then_some(action.as_str())
   }
}

fn qualify(action: &str) -> SmolStr {
   let action = action.trim();
   if action.starts_with(ACTION_PREFIX) {
      SmolStr::new(action)
   } else if action.is_empty() {
      SmolStr::default()
   } else {
      format_smolstr!("{ACTION_PREFIX}{action}")
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   fn mapper() -> ActionMapper {
      ActionMapper::new(&ActionConfig::default())
   }

   #[test]
   fn test_default_bindings() {
      let mapper = mapper();
      assert_eq!(
         mapper.map(TrackerEvent::SingleClick),
         Some("org.itagd.action.ring_phone")
      );
      assert_eq!(
         mapper.map(TrackerEvent::DoubleClick),
         Some("org.itagd.action.take_picture")
      );
      assert_eq!(
         mapper.map(TrackerEvent::OutOfBandAction),
         Some("org.itagd.action.ring_phone")
      );
   }

   #[test]
   fn test_non_button_events_map_to_nothing() {
      let mapper = mapper();
      for event in [
         TrackerEvent::LinkEstablished,
         TrackerEvent::CapabilitiesDiscovered,
         TrackerEvent::ImmediateAlertAvailable,
         TrackerEvent::RssiUpdated(40),
         TrackerEvent::BatteryLevel(90),
         TrackerEvent::ImmediateAlertFailed,
      ] {
         assert_eq!(mapper.map(event), None, "{event:?}");
      }
   }

   #[test]
   fn test_custom_and_qualified_identifiers() {
      let mapper = ActionMapper::new(&ActionConfig {
         simple_click: "org.itagd.action.play_music".into(),
         double_click: " next_track ".into(),
         out_of_band: "".into(),
      });
      assert_eq!(
         mapper.map(TrackerEvent::SingleClick),
         Some("org.itagd.action.play_music")
      );
      assert_eq!(
         mapper.map(TrackerEvent::DoubleClick),
         Some("org.itagd.action.next_track")
      );
      assert_eq!(mapper.map(TrackerEvent::OutOfBandAction), None);
   }
}
