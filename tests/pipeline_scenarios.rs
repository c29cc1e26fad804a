use anyhow::{anyhow, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use feedline::control_plane::ScriptedControl;
use feedline::tracker::KeyframeMap;
use feedline::{
    Command, Frame, FrameRequest, FrameSource, FrameTransform, ImageClient, ImageResponse,
    ImageType, KeyframeLogTracker, Mask, PipelineSettings, PipelineSupervisor, PixelLayout,
    PollIntervals, RunStatus, SimCameraSource, StopReason, SyntheticClient, SyntheticConfig,
    TrackerConfig, TrackingSink,
};

#[derive(Default)]
struct CountingSink {
    fed: AtomicU64,
    shut_down: AtomicBool,
}

impl CountingSink {
    fn fed(&self) -> u64 {
        self.fed.load(Ordering::SeqCst)
    }
}

impl TrackingSink for CountingSink {
    fn name(&self) -> &str {
        "counting"
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
        Ok(())
    }
}

/// Serves `frames` tiny frames, then fails. `None` never fails.
struct CountedSource {
    frames: Option<u64>,
    calls: Arc<AtomicU64>,
}

impl FrameSource for CountedSource {
    fn name(&self) -> &str {
        "counted"
    }

    fn fetch(&mut self, _request: &FrameRequest) -> Result<Option<Frame>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.frames.is_some_and(|limit| call >= limit) {
            return Err(anyhow!("source exhausted"));
        }
        Ok(Some(Frame::new(vec![90; 4 * 4 * 3], 4, 4, PixelLayout::Bgr8)?))
    }
}

struct NeverReadySource {
    calls: Arc<AtomicU64>,
}

impl FrameSource for NeverReadySource {
    fn name(&self) -> &str {
        "never-ready"
    }

    fn fetch(&mut self, _request: &FrameRequest) -> Result<Option<Frame>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

struct UnreachableClient;

impl ImageClient for UnreachableClient {
    fn endpoint(&self) -> String {
        "127.0.0.1:41451".to_string()
    }

    fn confirm_connection(&mut self) -> Result<()> {
        Err(anyhow!("connection refused"))
    }

    fn enable_api_control(&mut self, _enabled: bool, _vehicle_name: &str) -> Result<()> {
        Ok(())
    }

    fn get_images(&mut self, _request: &FrameRequest) -> Result<Vec<ImageResponse>> {
        Err(anyhow!("not connected"))
    }
}

fn settings() -> PipelineSettings {
    let mut settings = PipelineSettings::new(FrameRequest::new(
        "Copter",
        "Camera",
        ImageType::Scene,
        false,
        false,
    ));
    settings.intervals = PollIntervals {
        pause: Duration::from_millis(1),
        backoff: Duration::from_millis(1),
        drain: Duration::from_millis(1),
    };
    settings
}

/// Plane that only waits; it returns early once the producer has finished.
fn patient_plane() -> ScriptedControl {
    ScriptedControl::new().wait(Duration::from_secs(10))
}

#[test]
fn always_transient_source_feeds_nothing_and_succeeds() {
    let calls = Arc::new(AtomicU64::new(0));
    let sink = Arc::new(CountingSink::default());
    let mut plane = ScriptedControl::new().wait(Duration::from_millis(50));

    let outcome = PipelineSupervisor::new(
        NeverReadySource {
            calls: calls.clone(),
        },
        sink.clone(),
        settings(),
    )
    .run(&mut plane);

    assert_eq!(outcome.status, RunStatus::Success);
    assert_eq!(outcome.frames_fed, 0);
    assert!(outcome.summary.is_none());
    assert_eq!(outcome.stop_reason, Some(StopReason::TerminateRequested));
    assert_eq!(sink.fed(), 0);
    assert!(sink.shut_down.load(Ordering::SeqCst));
    assert!(calls.load(Ordering::SeqCst) > 1);
}

#[test]
fn fatal_error_after_ten_frames_is_not_retried() {
    let calls = Arc::new(AtomicU64::new(0));
    let sink = Arc::new(CountingSink::default());

    let outcome = PipelineSupervisor::new(
        CountedSource {
            frames: Some(10),
            calls: calls.clone(),
        },
        sink.clone(),
        settings(),
    )
    .run(&mut patient_plane());

    assert_eq!(outcome.status, RunStatus::Success);
    assert_eq!(outcome.stop_reason, Some(StopReason::SourceFailed));
    assert_eq!(outcome.frames_fed, 10);
    assert_eq!(sink.fed(), 10);
    assert_eq!(calls.load(Ordering::SeqCst), 11);
    assert_eq!(outcome.summary.map(|s| s.count), Some(10));
    assert!(sink.shut_down.load(Ordering::SeqCst));
}

#[test]
fn three_steps_while_paused_feed_exactly_three_frames() {
    let sink = Arc::new(CountingSink::default());
    let mut settings = settings();
    settings.start_paused = true;

    let watched = sink.clone();
    let mut plane = ScriptedControl::new()
        .wait(Duration::from_millis(20))
        .then(Command::Step)
        .then(Command::Step)
        .then(Command::Step)
        .wait_until(move || watched.fed() >= 3)
        .wait(Duration::from_millis(30))
        .then(Command::SaveAndExit);

    let outcome = PipelineSupervisor::new(
        CountedSource {
            frames: None,
            calls: Arc::new(AtomicU64::new(0)),
        },
        sink.clone(),
        settings,
    )
    .run(&mut plane);

    assert_eq!(outcome.status, RunStatus::Success);
    assert_eq!(outcome.frames_fed, 3);
    assert_eq!(sink.fed(), 3);
    assert_eq!(outcome.summary.map(|s| s.count), Some(3));
    assert_eq!(outcome.stop_reason, Some(StopReason::TerminateRequested));
}

#[test]
fn terminate_while_paused_stops_without_feeding() {
    let sink = Arc::new(CountingSink::default());
    let mut settings = settings();
    settings.start_paused = true;
    let mut plane = ScriptedControl::new()
        .wait(Duration::from_millis(20))
        .then(Command::SaveAndExit);

    let started = Instant::now();
    let outcome = PipelineSupervisor::new(
        CountedSource {
            frames: None,
            calls: Arc::new(AtomicU64::new(0)),
        },
        sink.clone(),
        settings,
    )
    .run(&mut plane);

    assert_eq!(outcome.status, RunStatus::Success);
    assert_eq!(outcome.frames_fed, 0);
    assert_eq!(sink.fed(), 0);
    assert!(outcome.summary.is_none());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn resume_after_pause_lets_frames_flow() {
    let sink = Arc::new(CountingSink::default());
    let mut settings = settings();
    settings.start_paused = true;
    let watched = sink.clone();
    let mut plane = ScriptedControl::new()
        .wait(Duration::from_millis(20))
        .then(Command::TogglePause)
        .wait_until(move || watched.fed() >= 5)
        .then(Command::SaveAndExit);

    let outcome = PipelineSupervisor::new(
        CountedSource {
            frames: None,
            calls: Arc::new(AtomicU64::new(0)),
        },
        sink.clone(),
        settings,
    )
    .run(&mut plane);

    assert!(outcome.frames_fed >= 5);
    assert_eq!(outcome.frames_fed, sink.fed());
    assert_eq!(
        outcome.summary.map(|s| s.count as u64),
        Some(outcome.frames_fed)
    );
}

#[test]
fn connect_failure_aborts_before_feeding() {
    let sink = Arc::new(CountingSink::default());
    let outcome = PipelineSupervisor::new(
        SimCameraSource::new(UnreachableClient),
        sink.clone(),
        settings(),
    )
    .run(&mut patient_plane());

    assert_eq!(outcome.status, RunStatus::Failure);
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(sink.fed(), 0);
    assert!(!sink.shut_down.load(Ordering::SeqCst));
}

#[test]
fn synthetic_run_persists_keyframe_map() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let map_path = dir.path().join("map.json");
    let tracker = Arc::new(KeyframeLogTracker::new(TrackerConfig {
        keyframe_interval: 4,
        optimize_every: 2,
        optimize_duration: Duration::from_millis(5),
        frame_budget: Some(12),
    })?);
    let client = SyntheticClient::new(SyntheticConfig {
        endpoint: "stub://yard".to_string(),
        width: 64,
        height: 48,
        miss_every: 3,
        ..SyntheticConfig::default()
    })?;
    let mut settings = settings();
    settings.transform = FrameTransform::new(0.5)?;
    settings.map_out = Some(map_path.clone());

    let outcome = PipelineSupervisor::new(SimCameraSource::new(client), tracker.clone(), settings)
        .run(&mut patient_plane());

    assert_eq!(outcome.status, RunStatus::Success);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(outcome.stop_reason, Some(StopReason::TrackerRequested));
    assert_eq!(outcome.frames_fed, 12);
    assert_eq!(outcome.artifact.as_deref(), Some(map_path.as_path()));

    let map: KeyframeMap = serde_json::from_slice(&std::fs::read(&map_path)?)?;
    assert_eq!(map.frames_tracked, 12);
    assert_eq!(map.keyframes.len(), 3);
    assert!(map
        .keyframes
        .iter()
        .all(|kf| kf.width == 32 && kf.height == 24));
    assert!(!tracker.background_work_is_running());
    Ok(())
}

#[test]
fn shutdown_waits_for_background_work_to_drain() -> Result<()> {
    let tracker = Arc::new(KeyframeLogTracker::new(TrackerConfig {
        keyframe_interval: 1,
        optimize_every: 1,
        optimize_duration: Duration::from_millis(150),
        frame_budget: Some(1),
    })?);

    let started = Instant::now();
    let outcome = PipelineSupervisor::new(
        CountedSource {
            frames: None,
            calls: Arc::new(AtomicU64::new(0)),
        },
        tracker.clone(),
        settings(),
    )
    .run(&mut patient_plane());

    assert_eq!(outcome.stop_reason, Some(StopReason::TrackerRequested));
    assert_eq!(outcome.frames_fed, 1);
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert!(!tracker.background_work_is_running());
    assert_eq!(tracker.optimization_passes(), 1);
    Ok(())
}

#[test]
fn persist_failure_fails_the_run() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let tracker = Arc::new(KeyframeLogTracker::new(TrackerConfig {
        frame_budget: Some(3),
        ..TrackerConfig::default()
    })?);
    let mut settings = settings();
    settings.map_out = Some(dir.path().join("missing").join("map.json"));

    let outcome = PipelineSupervisor::new(
        CountedSource {
            frames: None,
            calls: Arc::new(AtomicU64::new(0)),
        },
        tracker.clone(),
        settings,
    )
    .run(&mut patient_plane());

    assert_eq!(outcome.status, RunStatus::Failure);
    assert!(outcome.artifact.is_none());
    assert_eq!(outcome.frames_fed, 3);
    assert!(outcome.summary.is_some());
    Ok(())
}

#[test]
fn loaded_map_accumulates_across_runs() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let map_path = dir.path().join("map.json");
    let config = TrackerConfig {
        keyframe_interval: 2,
        frame_budget: Some(4),
        ..TrackerConfig::default()
    };

    for _ in 0..2 {
        let tracker = Arc::new(KeyframeLogTracker::new(config.clone())?);
        if map_path.exists() {
            tracker.load_map(&map_path)?;
        }
        let mut settings = settings();
        settings.map_out = Some(map_path.clone());
        let outcome = PipelineSupervisor::new(
            CountedSource {
                frames: None,
                calls: Arc::new(AtomicU64::new(0)),
            },
            tracker,
            settings,
        )
        .run(&mut patient_plane());
        assert_eq!(outcome.status, RunStatus::Success);
        assert_eq!(outcome.frames_fed, 4);
    }

    let map: KeyframeMap = serde_json::from_slice(&std::fs::read(&map_path)?)?;
    assert_eq!(map.frames_tracked, 8);
    assert_eq!(map.keyframes.len(), 4);
    Ok(())
}
