//! Periodic signal-strength probing of the active link.

use std::time::Duration;

use log::{debug, warn};

use crate::{
   bluetooth::transport::Link,
   tracker::{
      LoopbackSender,
      timer::{Timer, TimerFired, TimerKind},
   },
};

/// Delay between a probe being issued and the next one.
pub const RSSI_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// Converts a raw RSSI (dBm) into a 0-100 link quality.
pub fn rssi_quality(rssi: i16) -> u8 {
   (2 * (i32::from(rssi) + 100)).clamp(0, 100) as u8
}

#[derive(Debug)]
pub struct RssiPoller {
   timer: Timer,
}

impl RssiPoller {
   pub const fn new(tx: LoopbackSender) -> Self {
      Self {
         timer: Timer::new(TimerKind::RssiPoll, tx),
      }
   }

   /// (Re-)arms polling; the first probe goes out on the next loop turn.
   pub fn arm(&mut self) {
      if self.timer.is_armed() {
         debug!("Re-arming RSSI poller");
      }
      self.timer.schedule(Duration::ZERO);
   }

   pub fn disarm(&mut self) {
      if self.timer.cancel() {
         debug!("RSSI poller disarmed");
      }
   }

   pub const fn is_armed(&self) -> bool {
      self.timer.is_armed()
   }

   /// Handles a poll tick: probes the link and schedules the next tick one
   /// interval after the probe. Stale ticks are ignored.
   pub fn on_timer(&mut self, fired: TimerFired, link: Option<&dyn Link>) {
      if !self.timer.accept(fired) {
         return;
      }
      let Some(link) = link else {
         return;
      };
      if let Err(e) = link.probe_signal_strength() {
         warn!("RSSI probe failed: {e}");
      }
      self.timer.schedule(RSSI_POLL_INTERVAL);
   }
}

#[cfg(test)]
mod tests {
   use tokio::{sync::mpsc, time};

   use super::*;
   use crate::{
      bluetooth::fake::{FakeTransport, LinkOp},
      bluetooth::transport::{LinkCallbacks, Transport},
      tracker::Loopback,
   };

   #[test]
   fn test_quality_reference_points() {
      assert_eq!(rssi_quality(-100), 0);
      assert_eq!(rssi_quality(-75), 50);
      assert_eq!(rssi_quality(-50), 100);
      assert_eq!(rssi_quality(-127), 0);
      assert_eq!(rssi_quality(-20), 100);
      assert_eq!(rssi_quality(i16::MIN), 0);
      assert_eq!(rssi_quality(i16::MAX), 100);
   }

   #[test]
   fn test_quality_is_monotonic() {
      let mut prev = 0;
      for raw in -130..=10 {
         let q = rssi_quality(raw);
         assert!(q >= prev, "quality dropped at {raw}");
         assert!(q <= 100);
         prev = q;
      }
   }

   #[tokio::test(start_paused = true)]
   async fn test_double_arm_keeps_one_live_timer() {
      let (tx, mut rx) = mpsc::channel(16);
      let transport = FakeTransport::new();
      let link = transport
         .open_link(bluer::Address::any(), LinkCallbacks::new(1, tx.clone()))
         .unwrap();
      let mut poller = RssiPoller::new(tx);

      poller.arm();
      poller.arm();

      let start = time::Instant::now();
      while let Ok(Some(Loopback::Timer(fired))) =
         time::timeout(Duration::from_millis(12_500), rx.recv()).await
      {
         poller.on_timer(fired, Some(link.as_ref()));
         if start.elapsed() >= Duration::from_secs(10) {
            break;
         }
      }

      // Probes at t=0, 5s and 10s, never duplicated.
      assert_eq!(transport.count(|op| matches!(op, LinkOp::ProbeRssi)), 3);
   }

   #[tokio::test(start_paused = true)]
   async fn test_disarm_stops_probes() {
      let (tx, mut rx) = mpsc::channel(16);
      let transport = FakeTransport::new();
      let link = transport
         .open_link(bluer::Address::any(), LinkCallbacks::new(1, tx.clone()))
         .unwrap();
      let mut poller = RssiPoller::new(tx);

      poller.arm();
      if let Some(Loopback::Timer(fired)) = rx.recv().await {
         poller.on_timer(fired, Some(link.as_ref()));
      }
      poller.disarm();
      assert!(!poller.is_armed());

      while let Ok(Some(Loopback::Timer(fired))) =
         time::timeout(Duration::from_secs(30), rx.recv()).await
      {
         poller.on_timer(fired, Some(link.as_ref()));
      }
      assert_eq!(transport.count(|op| matches!(op, LinkOp::ProbeRssi)), 1);
   }
}
