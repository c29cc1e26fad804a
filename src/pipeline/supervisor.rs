use std::path::PathBuf;
use std::sync::Arc;

use super::acquisition::{AcquisitionLoop, PollIntervals, StopReason};
use super::timing::TimingSummary;
use crate::control::ControlState;
use crate::control_plane::{ControlCallbacks, ControlPlane, ProducerWatch};
use crate::frame::{FrameRequest, Mask};
use crate::ingest::FrameSource;
use crate::tracker::TrackingSink;
use crate::transform::FrameTransform;

const PRODUCER_THREAD: &str = "acquisition";

/// Everything the producer needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub request: FrameRequest,
    pub transform: FrameTransform,
    pub mask: Option<Mask>,
    pub intervals: PollIntervals,
    /// Where the tracker's state is written at shutdown. `None` skips
    /// persistence.
    pub map_out: Option<PathBuf>,
    /// Start with the pause flag set; frames then only flow on step or
    /// resume.
    pub start_paused: bool,
}

impl PipelineSettings {
    pub fn new(request: FrameRequest) -> Self {
        Self {
            request,
            transform: FrameTransform::identity(),
            mask: None,
            intervals: PollIntervals::default(),
            map_out: None,
            start_paused: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failure,
}

/// Result of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub status: RunStatus,
    /// Path of the persisted tracker state, when one was written.
    pub artifact: Option<PathBuf>,
    pub summary: Option<TimingSummary>,
    pub frames_fed: u64,
    /// `None` when the producer never ran or did not report back.
    pub stop_reason: Option<StopReason>,
    /// Error the control plane returned, if it failed. The run still drains,
    /// shuts the sink down and persists, but reports `Failure`.
    pub control_error: Option<String>,
}

impl PipelineOutcome {
    fn failed_before_start() -> Self {
        Self {
            status: RunStatus::Failure,
            artifact: None,
            summary: None,
            frames_fed: 0,
            stop_reason: None,
            control_error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Success => 0,
            RunStatus::Failure => 1,
        }
    }
}

/// Owns a run from connect to persist.
pub struct PipelineSupervisor<S: FrameSource + 'static> {
    source: S,
    sink: Arc<dyn TrackingSink>,
    settings: PipelineSettings,
}

impl<S: FrameSource + 'static> PipelineSupervisor<S> {
    pub fn new(source: S, sink: Arc<dyn TrackingSink>, settings: PipelineSettings) -> Self {
        Self {
            source,
            sink,
            settings,
        }
    }

    /// Run the pipeline with `plane` on the calling thread.
    ///
    /// Blocks until the plane has returned, the producer has drained and the
    /// sink has been shut down and persisted.
    pub fn run(self, plane: &mut dyn ControlPlane) -> PipelineOutcome {
        let PipelineSupervisor {
            mut source,
            sink,
            settings,
        } = self;

        let control = Arc::new(ControlState::new());
        control.set_paused(settings.start_paused);

        if let Err(err) = source.connect(&settings.request) {
            log::error!("{}: connection failed: {:#}", source.name(), err);
            return PipelineOutcome::failed_before_start();
        }
        log::info!(
            "{} connected; feeding {} (scale {})",
            source.name(),
            sink.name(),
            settings.transform.scale()
        );

        let producer = ProducerWatch::new();
        let finished = producer.finish_guard();
        let acquisition = AcquisitionLoop::new(
            source,
            settings.request.clone(),
            sink.clone(),
            control.clone(),
        )
        .with_transform(settings.transform)
        .with_mask(settings.mask.clone())
        .with_intervals(settings.intervals);
        let spawned = std::thread::Builder::new()
            .name(PRODUCER_THREAD.to_string())
            .spawn(move || {
                let _finished = finished;
                acquisition.run()
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                log::error!("failed to start producer thread: {}", err);
                return PipelineOutcome::failed_before_start();
            }
        };

        plane.register(ControlCallbacks::wire(control.clone(), sink.clone()));
        let control_error = match plane.run(&producer) {
            Ok(()) => None,
            Err(err) => {
                log::error!("{} control plane failed: {:#}", plane.name(), err);
                Some(format!("{:#}", err))
            }
        };
        control.request_terminate();

        let report = match handle.join() {
            Ok(report) => report,
            Err(_) => {
                log::error!("producer thread panicked");
                sink.shutdown();
                return PipelineOutcome::failed_before_start();
            }
        };

        sink.shutdown();

        let summary = report.timing.summary();
        match &summary {
            Some(summary) => log::info!("{}", summary),
            None => log::warn!("No tracking measurements were recorded."),
        }
        if report.transient_misses > 0 {
            log::debug!("{} transient acquisition misses", report.transient_misses);
        }

        let mut outcome = PipelineOutcome {
            status: if control_error.is_some() {
                RunStatus::Failure
            } else {
                RunStatus::Success
            },
            artifact: None,
            summary,
            frames_fed: report.frames_fed,
            stop_reason: Some(report.stop_reason),
            control_error,
        };

        if let Some(path) = settings.map_out {
            match sink.persist(&path) {
                Ok(()) => {
                    log::info!("map written to {}", path.display());
                    outcome.artifact = Some(path);
                }
                Err(err) => {
                    log::error!("failed to persist map: {:#}", err);
                    outcome.status = RunStatus::Failure;
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::{Command, ScriptedControl};
    use std::time::Duration;
    use crate::frame::{Frame, ImageType, PixelLayout};
    use anyhow::{anyhow, Result};
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        fed: AtomicU64,
        shut_down: AtomicBool,
        persisted: AtomicBool,
    }

    impl TrackingSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }
        fn feed(&self, _frame: &Frame, _timestamp: f64, _mask: Option<&Mask>) {
            self.fed.fetch_add(1, Ordering::SeqCst);
        }
        fn background_work_is_running(&self) -> bool {
            false
        }
        fn shutdown(&self) {
            self.shut_down.store(true, Ordering::SeqCst);
        }
        fn persist(&self, _path: &Path) -> Result<()> {
            self.persisted.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct PanickingSource;

    impl FrameSource for PanickingSource {
        fn name(&self) -> &str {
            "panicking"
        }
        fn fetch(&mut self, _request: &FrameRequest) -> Result<Option<Frame>> {
            panic!("source blew up");
        }
    }

    struct RefusingSource;

    impl FrameSource for RefusingSource {
        fn name(&self) -> &str {
            "refusing"
        }
        fn connect(&mut self, _request: &FrameRequest) -> Result<()> {
            Err(anyhow!("connection refused"))
        }
        fn fetch(&mut self, _request: &FrameRequest) -> Result<Option<Frame>> {
            Ok(Some(Frame::new(vec![0; 3], 1, 1, PixelLayout::Bgr8)?))
        }
    }

    struct SteadySource;

    impl FrameSource for SteadySource {
        fn name(&self) -> &str {
            "steady"
        }
        fn fetch(&mut self, _request: &FrameRequest) -> Result<Option<Frame>> {
            std::thread::sleep(Duration::from_millis(1));
            Ok(Some(Frame::new(vec![0; 3], 1, 1, PixelLayout::Bgr8)?))
        }
    }

    /// Plane whose loop fails as soon as it starts.
    struct BrokenPlane;

    impl ControlPlane for BrokenPlane {
        fn name(&self) -> &'static str {
            "broken"
        }
        fn register(&mut self, _callbacks: ControlCallbacks) {}
        fn run(&mut self, _producer: &ProducerWatch) -> Result<()> {
            Err(anyhow!("accept failed"))
        }
    }

    fn settings() -> PipelineSettings {
        PipelineSettings::new(FrameRequest::new(
            "Drone1",
            "front_center",
            ImageType::Scene,
            false,
            false,
        ))
    }

    #[test]
    fn connect_failure_skips_everything() {
        let sink = Arc::new(RecordingSink::default());
        let mut settings = settings();
        settings.map_out = Some(PathBuf::from("unused.json"));
        let outcome = PipelineSupervisor::new(RefusingSource, sink.clone(), settings)
            .run(&mut ScriptedControl::new().then(Command::SaveAndExit));

        assert_eq!(outcome.status, RunStatus::Failure);
        assert_eq!(outcome.exit_code(), 1);
        assert!(outcome.stop_reason.is_none());
        assert_eq!(sink.fed.load(Ordering::SeqCst), 0);
        assert!(!sink.shut_down.load(Ordering::SeqCst));
        assert!(!sink.persisted.load(Ordering::SeqCst));
    }

    #[test]
    fn producer_panic_still_shuts_sink_down() {
        let sink = Arc::new(RecordingSink::default());
        let outcome = PipelineSupervisor::new(PanickingSource, sink.clone(), settings())
            .run(&mut ScriptedControl::new().wait(Duration::from_secs(5)));

        assert_eq!(outcome.status, RunStatus::Failure);
        assert!(sink.shut_down.load(Ordering::SeqCst));
        assert!(!sink.persisted.load(Ordering::SeqCst));
    }

    #[test]
    fn control_plane_error_fails_the_run_after_cleanup() {
        let sink = Arc::new(RecordingSink::default());
        let mut settings = settings();
        settings.map_out = Some(PathBuf::from("unused.json"));
        let outcome =
            PipelineSupervisor::new(SteadySource, sink.clone(), settings).run(&mut BrokenPlane);

        assert_eq!(outcome.status, RunStatus::Failure);
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(outcome.control_error.as_deref(), Some("accept failed"));
        assert_eq!(outcome.stop_reason, Some(StopReason::TerminateRequested));
        assert!(sink.shut_down.load(Ordering::SeqCst));
        assert!(sink.persisted.load(Ordering::SeqCst));
        assert_eq!(outcome.artifact, Some(PathBuf::from("unused.json")));
    }
}
