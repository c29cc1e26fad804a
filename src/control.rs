//! Cross-thread control signals.
//!
//! `ControlState` carries the three operator signals the acquisition loop
//! polls between frames:
//!
//! - `paused`: set and cleared by the control plane.
//! - `step_credits`: one credit lets exactly one frame through while paused.
//! - `terminate_requested`: one-way latch, never cleared once set.
//!
//! Each field is its own atomic. No lock spans them, so a pause toggle never
//! waits on a step or terminate update. The loop tolerates a stale read of
//! `paused` or `step_credits` for one poll interval; terminate is a latch, so
//! a late read only delays the stop, it never loses it.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

#[derive(Debug, Default)]
pub struct ControlState {
    paused: AtomicBool,
    step_credits: AtomicU32,
    terminate_requested: AtomicBool,
}

impl ControlState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Grant one single-step credit. Saturates at `u32::MAX`.
    pub fn add_step_credit(&self) {
        let _ = self
            .step_credits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |credits| {
                credits.checked_add(1)
            });
    }

    /// Consume one credit if any are available.
    ///
    /// The decrement and the zero check are a single atomic update, so two
    /// concurrent callers can never both take the last credit.
    pub fn try_consume_step_credit(&self) -> bool {
        self.step_credits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |credits| {
                credits.checked_sub(1)
            })
            .is_ok()
    }

    pub fn step_credits(&self) -> u32 {
        self.step_credits.load(Ordering::SeqCst)
    }

    /// Latch termination. Idempotent.
    pub fn request_terminate(&self) {
        self.terminate_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_terminate_requested(&self) -> bool {
        self.terminate_requested.load(Ordering::SeqCst)
    }
}
