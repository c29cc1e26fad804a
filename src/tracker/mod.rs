//! Consumer side of the pipeline.
//!
//! `TrackingSink` is the contract the acquisition loop and the supervisor
//! hold against a tracking/mapping engine. The engine itself is an external
//! collaborator; `KeyframeLogTracker` is a small in-crate implementation used
//! by the `feedline` binary and the pipeline tests.

mod keyframe_log;

use anyhow::Result;
use std::path::Path;

use crate::frame::{Frame, Mask};

pub use keyframe_log::{Keyframe, KeyframeLogTracker, KeyframeMap, TrackerConfig};

/// Tracking engine contract.
///
/// The sink is shared between the producer thread (feeding), the control
/// plane (reset) and the supervisor (shutdown, persist), so every method
/// takes `&self` and implementations synchronize internally.
pub trait TrackingSink: Send + Sync {
    /// Engine identifier for logs.
    fn name(&self) -> &str;

    /// Hand one frame to the engine. `timestamp` is wall-clock seconds since
    /// the UNIX epoch. Must not block beyond the call itself; heavy follow-up
    /// work belongs on the engine's own background threads.
    fn feed(&self, frame: &Frame, timestamp: f64, mask: Option<&Mask>);

    /// True when the engine itself wants the run to end.
    fn terminate_is_requested(&self) -> bool {
        false
    }

    /// True while asynchronous work triggered by earlier frames is still
    /// running. Polled during drain.
    fn background_work_is_running(&self) -> bool;

    /// Ask the engine to discard its state and start over.
    fn request_reset(&self) {}

    /// Stop background threads. Called once, after the producer has joined.
    fn shutdown(&self);

    /// Write the engine's state to `path`.
    fn persist(&self, path: &Path) -> Result<()>;
}
