//! Keyring session tracking.
//!
//! This module contains the session state machine, its timers, and the
//! actor that serialises commands, transport callbacks and timer firings
//! onto a single task.

use tokio::sync::mpsc;

use crate::bluetooth::transport::{LinkEvent, LinkId};

pub mod debounce;
pub mod manager;
pub mod poller;
pub mod session;
pub mod timer;

/// Inputs the session posts to itself: transport callbacks and timer firings.
#[derive(Debug)]
pub enum Loopback {
   Link { link: LinkId, event: LinkEvent },
   Timer(timer::TimerFired),
}

pub type LoopbackSender = mpsc::Sender<Loopback>;
