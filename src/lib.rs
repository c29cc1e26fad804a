//! feedline
//!
//! Real-time frame ingestion from a simulator camera into a tracking engine,
//! with a live operator control plane and an orderly, drain-aware shutdown.
//!
//! # Architecture
//!
//! Two threads cooperate through a small set of atomics:
//!
//! 1. **Producer**: `AcquisitionLoop` fetches a frame, rescales it, feeds the
//!    tracker and records the feed latency. It checks the control state
//!    before every frame.
//! 2. **Calling thread**: runs the selected `ControlPlane` (headless, stdin
//!    console, loopback TCP) which pauses, single-steps, resets or stops the
//!    producer through registered callbacks.
//!
//! `PipelineSupervisor` ties them together and owns the shutdown order:
//! terminate, join (after the tracker's background work drains), shut the
//! tracker down, summarize timing, persist.
//!
//! # Module Structure
//!
//! - `control`: cross-thread pause / step / terminate state
//! - `frame`: frames, masks, image types and the request descriptor
//! - `transform`: bounded uniform rescale (triangle filter)
//! - `ingest`: frame sources (simulator image RPC adapter, synthetic client)
//! - `tracker`: tracking engine contract and the keyframe-log reference tracker
//! - `pipeline`: acquisition loop, timing, supervisor
//! - `control_plane`: operator control surfaces
//! - `config`: file + environment configuration

pub mod config;
pub mod control;
pub mod control_plane;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod tracker;
pub mod transform;

pub use config::PipelineConfig;
pub use control::ControlState;
pub use control_plane::{
    build_control_plane, install_interrupt_handler, Command, ControlCallbacks, ControlPlane,
    ControlPlaneKind, ProducerWatch,
};
pub use frame::{Frame, FrameRequest, ImageType, Mask, PixelLayout};
pub use ingest::{
    FrameSource, ImageClient, ImageResponse, SimCameraSource, SyntheticClient, SyntheticConfig,
};
pub use pipeline::{
    AcquisitionLoop, PipelineOutcome, PipelineSettings, PipelineSupervisor, PollIntervals,
    RunStatus, StopReason, TimingSummary, TrackTiming,
};
pub use tracker::{KeyframeLogTracker, TrackerConfig, TrackingSink};
pub use transform::FrameTransform;
