use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use super::TrackingSink;
use crate::frame::{Frame, Mask};

/// Settings for `KeyframeLogTracker`.
#[derive(Clone, Debug)]
pub struct TrackerConfig {
    /// Promote every Nth fed frame to a keyframe (the first frame always is).
    pub keyframe_interval: u64,
    /// Start a background optimization pass after every N keyframes.
    pub optimize_every: usize,
    /// How long one optimization pass keeps the background worker busy.
    pub optimize_duration: Duration,
    /// Request termination once this many frames have been fed in this run.
    /// Frames restored from a loaded map do not count.
    pub frame_budget: Option<u64>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            keyframe_interval: 5,
            optimize_every: 4,
            optimize_duration: Duration::from_millis(40),
            frame_budget: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Keyframe {
    pub id: u64,
    pub frame_index: u64,
    pub timestamp: f64,
    pub width: u32,
    pub height: u32,
    pub mean_intensity: f64,
    /// Share of pixels the mask lets through, when a mask was supplied.
    pub usable_fraction: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KeyframeMap {
    pub tracker: String,
    pub frames_tracked: u64,
    pub optimization_passes: u64,
    pub keyframes: Vec<Keyframe>,
}

#[derive(Default)]
struct TrackerState {
    frames: u64,
    loaded_frames: u64,
    next_keyframe_id: u64,
    keyframes: Vec<Keyframe>,
    last_timestamp: Option<f64>,
    optimization_passes: u64,
    shut_down: bool,
}

/// Reference tracker: logs keyframes and simulates background optimization.
///
/// Each optimization pass runs on its own worker thread and keeps
/// `background_work_is_running()` true for `optimize_duration`, which gives
/// the pipeline's drain phase something real to wait on.
pub struct KeyframeLogTracker {
    config: TrackerConfig,
    state: Mutex<TrackerState>,
    optimizing: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    reset_requested: AtomicBool,
    terminate_requested: AtomicBool,
}

impl KeyframeLogTracker {
    pub fn new(config: TrackerConfig) -> Result<Self> {
        if config.keyframe_interval == 0 {
            return Err(anyhow!("keyframe_interval must be >= 1"));
        }
        if config.optimize_every == 0 {
            return Err(anyhow!("optimize_every must be >= 1"));
        }
        Ok(Self {
            config,
            state: Mutex::new(TrackerState::default()),
            optimizing: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
            reset_requested: AtomicBool::new(false),
            terminate_requested: AtomicBool::new(false),
        })
    }

    pub fn frames_tracked(&self) -> u64 {
        self.state.lock().map(|s| s.frames).unwrap_or(0)
    }

    pub fn keyframe_count(&self) -> usize {
        self.state.lock().map(|s| s.keyframes.len()).unwrap_or(0)
    }

    pub fn optimization_passes(&self) -> u64 {
        self.state.lock().map(|s| s.optimization_passes).unwrap_or(0)
    }

    /// Seed the tracker with a map written by `persist`.
    ///
    /// Must be called before the first frame is fed. Keyframe ids and frame
    /// indices continue from the loaded map.
    pub fn load_map(&self, path: &Path) -> Result<()> {
        let raw = std::fs::read(path)
            .with_context(|| format!("failed to read map {}", path.display()))?;
        let map: KeyframeMap = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse map {}", path.display()))?;
        if map.tracker != self.name() {
            log::warn!(
                "map {} was written by tracker '{}', loading it into '{}'",
                path.display(),
                map.tracker,
                self.name()
            );
        }
        if let Some(kf) = map
            .keyframes
            .iter()
            .find(|kf| kf.frame_index == 0 || kf.frame_index > map.frames_tracked)
        {
            bail!(
                "map {} is inconsistent: keyframe {} has frame index {} of {} tracked",
                path.display(),
                kf.id,
                kf.frame_index,
                map.frames_tracked
            );
        }

        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("tracker state lock poisoned"))?;
        if state.frames > 0 || state.shut_down {
            bail!("a map can only be loaded before tracking starts");
        }
        state.next_keyframe_id = map
            .keyframes
            .iter()
            .map(|kf| kf.id + 1)
            .max()
            .unwrap_or(0);
        state.frames = map.frames_tracked;
        state.loaded_frames = map.frames_tracked;
        state.optimization_passes = map.optimization_passes;
        state.keyframes = map.keyframes;
        log::info!(
            "loaded {} keyframes ({} frames) from {}",
            state.keyframes.len(),
            state.frames,
            path.display()
        );
        Ok(())
    }

    /// Start an optimization pass unless one is already running.
    fn start_optimization(&self) -> bool {
        if self
            .optimizing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        let optimizing = self.optimizing.clone();
        let duration = self.config.optimize_duration;
        let handle = std::thread::Builder::new()
            .name("keyframe-optimizer".to_string())
            .spawn(move || {
                std::thread::sleep(duration);
                optimizing.store(false, Ordering::SeqCst);
            });
        match handle {
            Ok(handle) => {
                if let Ok(mut workers) = self.workers.lock() {
                    workers.retain(|w| !w.is_finished());
                    workers.push(handle);
                }
                true
            }
            Err(err) => {
                log::error!("failed to start optimization pass: {}", err);
                self.optimizing.store(false, Ordering::SeqCst);
                false
            }
        }
    }
}

impl TrackingSink for KeyframeLogTracker {
    fn name(&self) -> &str {
        "keyframe-log"
    }

    fn feed(&self, frame: &Frame, timestamp: f64, mask: Option<&Mask>) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(_) => {
                log::error!("tracker state lock poisoned; dropping frame");
                return;
            }
        };
        if state.shut_down {
            log::debug!("tracker is shut down; ignoring frame");
            return;
        }

        if self.reset_requested.swap(false, Ordering::SeqCst) {
            log::info!(
                "tracker reset: discarding {} keyframes",
                state.keyframes.len()
            );
            state.keyframes.clear();
            state.last_timestamp = None;
        }

        if let Some(last) = state.last_timestamp {
            if timestamp < last {
                log::warn!(
                    "frame timestamp went backwards ({:.6} < {:.6})",
                    timestamp,
                    last
                );
            }
        }
        state.last_timestamp = Some(timestamp);
        state.frames += 1;
        let frame_index = state.frames;

        if (frame_index - 1) % self.config.keyframe_interval == 0 {
            let id = state.next_keyframe_id;
            state.next_keyframe_id += 1;
            state.keyframes.push(Keyframe {
                id,
                frame_index,
                timestamp,
                width: frame.width(),
                height: frame.height(),
                mean_intensity: mean_intensity(frame.pixels()),
                usable_fraction: mask.map(|m| usable_fraction(m.pixels())),
            });
            if state.keyframes.len() % self.config.optimize_every == 0
                && self.start_optimization()
            {
                state.optimization_passes += 1;
            }
        }

        if let Some(budget) = self.config.frame_budget {
            if frame_index - state.loaded_frames >= budget
                && !self.terminate_requested.swap(true, Ordering::SeqCst) {
                log::info!("tracker frame budget of {} reached", budget);
            }
        }
    }

    fn terminate_is_requested(&self) -> bool {
        self.terminate_requested.load(Ordering::SeqCst)
    }

    fn background_work_is_running(&self) -> bool {
        self.optimizing.load(Ordering::SeqCst)
    }

    fn request_reset(&self) {
        self.reset_requested.store(true, Ordering::SeqCst);
    }

    fn shutdown(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.shut_down = true;
        }
        let workers = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => return,
        };
        for worker in workers {
            if worker.join().is_err() {
                log::warn!("optimization worker panicked");
            }
        }
    }

    fn persist(&self, path: &Path) -> Result<()> {
        let doc = {
            let state = self
                .state
                .lock()
                .map_err(|_| anyhow!("tracker state lock poisoned"))?;
            KeyframeMap {
                tracker: self.name().to_string(),
                frames_tracked: state.frames,
                optimization_passes: state.optimization_passes,
                keyframes: state.keyframes.clone(),
            }
        };
        let json = serde_json::to_vec_pretty(&doc)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write map to {}", path.display()))?;
        log::info!(
            "stored {} keyframes to {}",
            doc.keyframes.len(),
            path.display()
        );
        Ok(())
    }
}

fn mean_intensity(pixels: &[u8]) -> f64 {
    if pixels.is_empty() {
        return 0.0;
    }
    pixels.iter().map(|&p| p as u64).sum::<u64>() as f64 / pixels.len() as f64
}

fn usable_fraction(mask: &[u8]) -> f64 {
    if mask.is_empty() {
        return 0.0;
    }
    mask.iter().filter(|&&p| p != 0).count() as f64 / mask.len() as f64
}
