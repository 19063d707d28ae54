//! Cancellable one-shot timers delivered through the session loopback.
//!
//! A timer firing is not a callback: the sleeping task posts a
//! [`TimerFired`] back into the actor's inbox, and the owner accepts it only
//! if its generation is still the live one. Cancelling therefore also voids
//! a firing that is already queued.

use std::time::Duration;

use log::warn;
use tokio::{task::JoinHandle, time};

use crate::tracker::{Loopback, LoopbackSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum TimerKind {
   RssiPoll,
   PendingClick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
   pub kind: TimerKind,
   pub generation: u64,
}

#[derive(Debug)]
pub struct Timer {
   kind: TimerKind,
   tx: LoopbackSender,
   generation: u64,
   handle: Option<JoinHandle<()>>,
}

impl Timer {
   pub const fn new(kind: TimerKind, tx: LoopbackSender) -> Self {
      Self {
         kind,
         tx,
         generation: 0,
         handle: None,
      }
   }

   /// Cancels any live instance, then schedules a new firing after `delay`.
   pub fn schedule(&mut self, delay: Duration) {
      self.cancel();
      let fired = TimerFired {
         kind: self.kind,
         generation: self.generation,
      };
      let tx = self.tx.clone();
      self.handle = Some(tokio::spawn(async move {
         time::sleep(delay).await;
         if tx.send(Loopback::Timer(fired)).await.is_err() {
            warn!("{} timer fired after session shut down", fired.kind);
         }
      }));
   }

   /// Cancels the live instance, if any. Returns whether one was live.
   pub fn cancel(&mut self) -> bool {
      self.generation = self.generation.wrapping_add(1);
      match self.handle.take() {
         Some(handle) => {
            handle.abort();
            true
         },
         None => false,
      }
   }

   /// Accepts a firing if it belongs to the live instance. An accepted timer
   /// is no longer armed.
   pub fn accept(&mut self, fired: TimerFired) -> bool {
      if fired.kind != self.kind || fired.generation != self.generation || self.handle.is_none() {
         return false;
      }
      self.handle = None;
      true
   }

   pub const fn is_armed(&self) -> bool {
      self.handle.is_some()
   }
}

impl Drop for Timer {
   fn drop(&mut self) {
      if let Some(handle) = self.handle.take() {
         handle.abort();
      }
   }
}
