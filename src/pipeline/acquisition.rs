//! Producer thread body.
//!
//! The loop is a small state machine:
//!
//! - `Running`: check terminate, then pause, then process one frame.
//! - `PauseWait`: poll while paused. Terminate wins over everything; a step
//!   credit lets exactly one frame through and comes back here.
//! - `Stopping`: no more frames are fetched.
//! - `Draining`: wait for the tracker's background work, then return.
//!
//! Every wait is a short sleep followed by a re-check, so a terminate request
//! is seen within one poll interval whatever the loop is doing, except while
//! a fetch or feed call is in flight. Those are never interrupted.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use super::timing::TrackTiming;
use crate::control::ControlState;
use crate::frame::{FrameRequest, Mask};
use crate::ingest::FrameSource;
use crate::tracker::TrackingSink;
use crate::transform::FrameTransform;

const DEFAULT_POLL: Duration = Duration::from_millis(5);

/// Sleep intervals used while waiting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollIntervals {
    /// Re-check period while paused.
    pub pause: Duration,
    /// Sleep after a transient acquisition miss.
    pub backoff: Duration,
    /// Re-check period while waiting for the tracker to settle.
    pub drain: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            pause: DEFAULT_POLL,
            backoff: DEFAULT_POLL,
            drain: DEFAULT_POLL,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Running,
    PauseWait,
    Stopping,
    Draining,
}

/// Why the loop stopped producing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The control state latch was set.
    TerminateRequested,
    /// The tracker asked for termination on its own.
    TrackerRequested,
    /// The frame source failed fatally.
    SourceFailed,
    /// A fetched frame could not be rescaled.
    TransformFailed,
}

/// What the producer hands back through the thread join.
#[derive(Debug)]
pub struct LoopReport {
    pub timing: TrackTiming,
    pub frames_fed: u64,
    pub transient_misses: u64,
    pub stop_reason: StopReason,
}

enum FrameOutcome {
    Fed,
    Miss,
    Fatal(StopReason),
}

pub struct AcquisitionLoop<S: FrameSource> {
    source: S,
    request: FrameRequest,
    transform: FrameTransform,
    sink: Arc<dyn TrackingSink>,
    mask: Option<Mask>,
    control: Arc<ControlState>,
    intervals: PollIntervals,
    timing: TrackTiming,
    frames_fed: u64,
    transient_misses: u64,
}

impl<S: FrameSource> AcquisitionLoop<S> {
    pub fn new(
        source: S,
        request: FrameRequest,
        sink: Arc<dyn TrackingSink>,
        control: Arc<ControlState>,
    ) -> Self {
        Self {
            source,
            request,
            transform: FrameTransform::identity(),
            sink,
            mask: None,
            control,
            intervals: PollIntervals::default(),
            timing: TrackTiming::new(),
            frames_fed: 0,
            transient_misses: 0,
        }
    }

    pub fn with_transform(mut self, transform: FrameTransform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_mask(mut self, mask: Option<Mask>) -> Self {
        self.mask = mask;
        self
    }

    pub fn with_intervals(mut self, intervals: PollIntervals) -> Self {
        self.intervals = intervals;
        self
    }

    /// Run until terminated, the tracker asks to stop, or a frame fails
    /// fatally.
    /// Returns only after the tracker's background work has drained.
    pub fn run(mut self) -> LoopReport {
        let mut state = LoopState::Running;
        let mut stop_reason = StopReason::TerminateRequested;

        loop {
            let next = match state {
                LoopState::Running => {
                    if let Some(reason) = self.termination() {
                        stop_reason = reason;
                        LoopState::Stopping
                    } else if self.control.is_paused() {
                        LoopState::PauseWait
                    } else {
                        match self.process_frame() {
                            FrameOutcome::Fed | FrameOutcome::Miss => LoopState::Running,
                            FrameOutcome::Fatal(reason) => {
                                stop_reason = reason;
                                LoopState::Stopping
                            }
                        }
                    }
                }
                LoopState::PauseWait => {
                    if let Some(reason) = self.termination() {
                        stop_reason = reason;
                        LoopState::Stopping
                    } else if !self.control.is_paused() {
                        LoopState::Running
                    } else if self.control.try_consume_step_credit() {
                        match self.step() {
                            Ok(()) => LoopState::PauseWait,
                            Err(reason) => {
                                stop_reason = reason;
                                LoopState::Stopping
                            }
                        }
                    } else {
                        std::thread::sleep(self.intervals.pause);
                        LoopState::PauseWait
                    }
                }
                LoopState::Stopping => {
                    log::info!(
                        "acquisition stopping ({:?}) after {} frames",
                        stop_reason,
                        self.frames_fed
                    );
                    LoopState::Draining
                }
                LoopState::Draining => {
                    drain_background_work(self.sink.as_ref(), self.intervals.drain);
                    break;
                }
            };
            if next != state {
                log::debug!("acquisition state {:?} -> {:?}", state, next);
            }
            state = next;
        }

        LoopReport {
            timing: self.timing,
            frames_fed: self.frames_fed,
            transient_misses: self.transient_misses,
            stop_reason,
        }
    }

    fn termination(&self) -> Option<StopReason> {
        if self.control.is_terminate_requested() {
            Some(StopReason::TerminateRequested)
        } else if self.sink.terminate_is_requested() {
            Some(StopReason::TrackerRequested)
        } else {
            None
        }
    }

    /// Spend one step credit: retry transient misses until one frame is fed.
    fn step(&mut self) -> Result<(), StopReason> {
        loop {
            match self.process_frame() {
                FrameOutcome::Fed => return Ok(()),
                FrameOutcome::Fatal(reason) => return Err(reason),
                FrameOutcome::Miss => {
                    if let Some(reason) = self.termination() {
                        return Err(reason);
                    }
                }
            }
        }
    }

    fn process_frame(&mut self) -> FrameOutcome {
        let frame = match self.source.fetch(&self.request) {
            Ok(Some(frame)) if !frame.is_empty() => frame,
            Ok(_) => {
                log::debug!("{}: no frame ready", self.source.name());
                self.transient_misses += 1;
                std::thread::sleep(self.intervals.backoff);
                return FrameOutcome::Miss;
            }
            Err(err) => {
                log::error!("{}: frame source failed: {:#}", self.source.name(), err);
                return FrameOutcome::Fatal(StopReason::SourceFailed);
            }
        };

        let frame = match self.transform.apply(frame) {
            Ok(frame) => frame,
            Err(err) => {
                log::error!("{}: frame transform failed: {:#}", self.source.name(), err);
                return FrameOutcome::Fatal(StopReason::TransformFailed);
            }
        };

        let started = Instant::now();
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        self.sink.feed(&frame, timestamp, self.mask.as_ref());
        self.timing.record(started.elapsed());
        self.frames_fed += 1;

        FrameOutcome::Fed
    }
}

/// Block until `sink` reports no background work, re-checking every
/// `interval`. Returns at once when nothing is running.
pub fn drain_background_work(sink: &dyn TrackingSink, interval: Duration) {
    if !sink.background_work_is_running() {
        return;
    }
    log::info!("waiting for {} background work to finish", sink.name());
    while sink.background_work_is_running() {
        std::thread::sleep(interval);
    }
}
