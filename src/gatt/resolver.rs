//! Maps a freshly discovered capability set onto the handles a session uses.

use uuid::Uuid;

use crate::gatt::protocol::{
   ALERT_LEVEL_CHARACTERISTIC, BATTERY_SERVICE, Capability, CapabilityHandle, DiscoveredService,
   FIND_ME_CHARACTERISTIC, FIND_ME_SERVICE, IMMEDIATE_ALERT_SERVICE,
};

/// Capability handles resolved for the current link. Each is `None` when the
/// peer does not expose the matching service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolvedCapabilities {
   pub immediate_alert: Option<CapabilityHandle>,
   pub battery: Option<CapabilityHandle>,
   pub find_me: Option<CapabilityHandle>,
}

impl ResolvedCapabilities {
   pub const fn get(&self, capability: Capability) -> Option<CapabilityHandle> {
      match capability {
         Capability::ImmediateAlert => self.immediate_alert,
         Capability::Battery => self.battery,
         Capability::FindMe => self.find_me,
      }
   }

   /// Which category a handle was resolved as, if any.
   pub fn classify(&self, handle: CapabilityHandle) -> Option<Capability> {
      [Capability::ImmediateAlert, Capability::Battery, Capability::FindMe]
         .into_iter()
         .find(|&c| self.get(c) == Some(handle))
   }
}

/// Resolves the three known capabilities out of a discovered set.
///
/// Battery and find-me take the first characteristic of their service;
/// immediate alert requires the alert-level characteristic specifically.
pub fn resolve(services: &[DiscoveredService]) -> ResolvedCapabilities {
   ResolvedCapabilities {
      immediate_alert: find(services, IMMEDIATE_ALERT_SERVICE, ALERT_LEVEL_CHARACTERISTIC),
      battery: first_characteristic(services, BATTERY_SERVICE),
      find_me: first_characteristic(services, FIND_ME_SERVICE),
   }
}

/// The find-me button characteristic by identifier, used when (re-)enabling
/// the button subscription.
pub fn find_me_button(services: &[DiscoveredService]) -> Option<CapabilityHandle> {
   find(services, FIND_ME_SERVICE, FIND_ME_CHARACTERISTIC)
}

pub fn find(
   services: &[DiscoveredService],
   service: Uuid,
   characteristic: Uuid,
) -> Option<CapabilityHandle> {
   services
      .iter()
      .find(|s| s.uuid == service)?
      .characteristics
      .iter()
      .find(|&&c| c == characteristic)
      .map(|&c| CapabilityHandle::new(service, c))
}

fn first_characteristic(services: &[DiscoveredService], service: Uuid) -> Option<CapabilityHandle> {
   let svc = services.iter().find(|s| s.uuid == service)?;
   svc.characteristics
      .first()
      .map(|&c| CapabilityHandle::new(service, c))
}
