//! Single/double click classification of raw button presses.
//!
//! ```text
//!          press                     press within window
//!  Idle ───────────► ArmedForDouble ─────────────────────► Idle  (DoubleClick)
//!   ▲                      │
//!   └──── window elapsed ──┘                                     (SingleClick)
//! ```
//!
//! A press arriving at or after the end of the window starts a new episode.
//! Presses are classified by arrival time, so one handled late can still
//! settle the previous press as a single click before its timer runs.

use std::time::Duration;

use tokio::time::Instant;

use crate::tracker::{
   LoopbackSender,
   timer::{Timer, TimerFired, TimerKind},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Click {
   Single,
   Double,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClickState {
   Idle,
   ArmedForDouble { since: Instant },
}

#[derive(Debug)]
pub struct ClickClassifier {
   window: Duration,
   state: ClickState,
   pending: Timer,
}

impl ClickClassifier {
   pub const fn new(window: Duration, tx: LoopbackSender) -> Self {
      Self {
         window,
         state: ClickState::Idle,
         pending: Timer::new(TimerKind::PendingClick, tx),
      }
   }

   /// Feeds one raw press that arrived at `at`. Returns a click that is
   /// known immediately; a single click is otherwise reported later through
   /// [`Self::on_timer`].
   pub fn on_raw_press(&mut self, at: Instant) -> Option<Click> {
      let mut settled = None;
      if let ClickState::ArmedForDouble { since } = self.state {
         if at < since + self.window {
            self.state = ClickState::Idle;
            self.pending.cancel();
            return Some(Click::Double);
         }
         // Window already over, its timer just has not been handled yet.
         settled = Some(Click::Single);
      }

      self.state = ClickState::ArmedForDouble { since: at };
      self
         .pending
         .schedule((at + self.window).saturating_duration_since(Instant::now()));
      settled
   }

   pub fn on_timer(&mut self, fired: TimerFired) -> Option<Click> {
      if !self.pending.accept(fired) {
         return None;
      }
      self.state = ClickState::Idle;
      Some(Click::Single)
   }

   /// Drops any pending single click.
   pub fn cancel(&mut self) {
      self.state = ClickState::Idle;
      self.pending.cancel();
   }

   pub const fn window(&self) -> Duration {
      self.window
   }

   pub const fn last_press(&self) -> Option<Instant> {
      match self.state {
         ClickState::Idle => None,
         ClickState::ArmedForDouble { since } => Some(since),
      }
   }
}

#[cfg(test)]
mod tests {
   use tokio::{sync::mpsc, time};

   use super::*;
   use crate::tracker::Loopback;

   const WINDOW: Duration = Duration::from_millis(400);

   /// Runs the classifier against its own timer channel until no more
   /// firings arrive, collecting every click with the instant it surfaced.
   async fn drain(
      classifier: &mut ClickClassifier,
      rx: &mut mpsc::Receiver<Loopback>,
   ) -> Vec<(Click, Instant)> {
      let mut clicks = Vec::new();
      while let Ok(Some(Loopback::Timer(fired))) =
         time::timeout(Duration::from_secs(10), rx.recv()).await
      {
         if let Some(click) = classifier.on_timer(fired) {
            clicks.push((click, Instant::now()));
         }
      }
      clicks
   }

   #[tokio::test(start_paused = true)]
   async fn test_spaced_presses_are_single_clicks() {
      let (tx, mut rx) = mpsc::channel(8);
      let mut classifier = ClickClassifier::new(WINDOW, tx);

      for _ in 0..3 {
         let pressed = Instant::now();
         assert_eq!(classifier.on_raw_press(pressed), None);
         let clicks = drain(&mut classifier, &mut rx).await;
         assert_eq!(clicks.len(), 1);
         assert_eq!(clicks[0].0, Click::Single);
         assert!(clicks[0].1 >= pressed + WINDOW, "single click surfaced early");
      }
   }

   #[tokio::test(start_paused = true)]
   async fn test_quick_pair_is_one_double_click() {
      let (tx, mut rx) = mpsc::channel(8);
      let mut classifier = ClickClassifier::new(WINDOW, tx);

      let t0 = Instant::now();
      assert_eq!(classifier.on_raw_press(t0), None);
      time::advance(Duration::from_millis(300)).await;
      assert_eq!(classifier.on_raw_press(Instant::now()), Some(Click::Double));
      assert_eq!(classifier.last_press(), None);

      assert!(drain(&mut classifier, &mut rx).await.is_empty());
   }

   #[tokio::test(start_paused = true)]
   async fn test_press_at_window_edge_starts_new_episode() {
      let (tx, _rx) = mpsc::channel(8);
      let mut classifier = ClickClassifier::new(WINDOW, tx);

      let t0 = Instant::now();
      assert_eq!(classifier.on_raw_press(t0), None);
      assert_eq!(classifier.on_raw_press(t0 + WINDOW), Some(Click::Single));
      assert_eq!(classifier.last_press(), Some(t0 + WINDOW));
   }

   #[tokio::test(start_paused = true)]
   async fn test_late_handled_presses_use_arrival_time() {
      let (tx, mut rx) = mpsc::channel(8);
      let mut classifier = ClickClassifier::new(WINDOW, tx);

      let t0 = Instant::now();
      time::advance(Duration::from_millis(450)).await;
      let t1 = Instant::now();

      // Both presses are only handled now, 450ms apart on arrival.
      assert_eq!(classifier.on_raw_press(t0), None);
      assert_eq!(classifier.on_raw_press(t1), Some(Click::Single));

      let clicks = drain(&mut classifier, &mut rx).await;
      assert_eq!(clicks.len(), 1);
      assert_eq!(clicks[0].0, Click::Single);
      assert!(clicks[0].1 >= t1 + WINDOW);
   }

   #[tokio::test(start_paused = true)]
   async fn test_no_pairing_after_confirmed_single() {
      let (tx, mut rx) = mpsc::channel(8);
      let mut classifier = ClickClassifier::new(WINDOW, tx);

      classifier.on_raw_press(Instant::now());
      assert_eq!(drain(&mut classifier, &mut rx).await.len(), 1);

      // Third press right after the single click fired: a fresh episode.
      assert_eq!(classifier.on_raw_press(Instant::now()), None);
      let clicks = drain(&mut classifier, &mut rx).await;
      assert_eq!(clicks.iter().map(|c| c.0).collect::<Vec<_>>(), vec![Click::Single]);
   }

   #[tokio::test(start_paused = true)]
   async fn test_cancel_drops_pending_single() {
      let (tx, mut rx) = mpsc::channel(8);
      let mut classifier = ClickClassifier::new(WINDOW, tx);

      classifier.on_raw_press(Instant::now());
      classifier.cancel();
      assert!(drain(&mut classifier, &mut rx).await.is_empty());
      assert_eq!(classifier.last_press(), None);
   }
}
