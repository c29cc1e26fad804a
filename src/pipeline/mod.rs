//! Producer/control-plane coordination.
//!
//! `PipelineSupervisor` starts an `AcquisitionLoop` on its own thread, runs
//! the control plane on the calling thread and performs the ordered
//! shutdown: join, sink shutdown, timing summary, persist.

pub mod acquisition;
mod supervisor;
mod timing;

pub use acquisition::{
    drain_background_work, AcquisitionLoop, LoopReport, LoopState, PollIntervals, StopReason,
};
pub use supervisor::{PipelineOutcome, PipelineSettings, PipelineSupervisor, RunStatus};
pub use timing::{TimingSummary, TrackTiming};
