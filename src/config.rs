use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::control_plane::ControlPlaneKind;
use crate::frame::{FrameRequest, ImageType};
use crate::ingest::SyntheticConfig;
use crate::pipeline::PollIntervals;
use crate::tracker::TrackerConfig;
use crate::transform::FrameTransform;

pub const CONFIG_ENV: &str = "FEEDLINE_CONFIG";

const DEFAULT_SOURCE: &str = "stub://sim";
const DEFAULT_VEHICLE: &str = "Copter";
const DEFAULT_CAMERA: &str = "Camera";
const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:7878";
const DEFAULT_POLL_MS: u64 = 5;

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    source: Option<String>,
    request: Option<RequestConfigFile>,
    scale: Option<f32>,
    mask: Option<PathBuf>,
    map_in: Option<PathBuf>,
    map_out: Option<PathBuf>,
    poll_ms: Option<u64>,
    control: Option<ControlConfigFile>,
    tracker: Option<TrackerConfigFile>,
    synthetic: Option<SyntheticConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct RequestConfigFile {
    vehicle: Option<String>,
    camera: Option<String>,
    image_type: Option<String>,
    pixels_as_float: Option<bool>,
    compress: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct ControlConfigFile {
    kind: Option<String>,
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    keyframe_interval: Option<u64>,
    optimize_every: Option<usize>,
    optimize_ms: Option<u64>,
    frame_budget: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SyntheticConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    miss_every: Option<u32>,
    fail_after: Option<u64>,
    frame_delay_ms: Option<u64>,
    seed: Option<u64>,
}

/// Run configuration: defaults, then the optional config file, then
/// `FEEDLINE_*` environment overrides.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// `stub://<name>` for the synthetic client, `host:port` for a simulator.
    pub source: String,
    pub vehicle: String,
    pub camera: String,
    pub image_type: ImageType,
    pub pixels_as_float: bool,
    pub compress: bool,
    pub scale: f32,
    pub mask: Option<PathBuf>,
    /// Keyframe map loaded into the tracker before the run starts.
    pub map_in: Option<PathBuf>,
    pub map_out: Option<PathBuf>,
    pub control: ControlPlaneKind,
    pub control_addr: String,
    pub poll: Duration,
    pub tracker: TrackerConfig,
    pub synthetic: SyntheticConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: DEFAULT_SOURCE.to_string(),
            vehicle: DEFAULT_VEHICLE.to_string(),
            camera: DEFAULT_CAMERA.to_string(),
            image_type: ImageType::Scene,
            pixels_as_float: false,
            compress: false,
            scale: 1.0,
            mask: None,
            map_in: None,
            map_out: None,
            control: ControlPlaneKind::None,
            control_addr: DEFAULT_CONTROL_ADDR.to_string(),
            poll: Duration::from_millis(DEFAULT_POLL_MS),
            tracker: TrackerConfig::default(),
            synthetic: SyntheticConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load using the file named by `FEEDLINE_CONFIG`, if set.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV)
            .ok()
            .filter(|path| !path.trim().is_empty());
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load using an explicit config file instead of `FEEDLINE_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => PipelineConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let request = file.request.unwrap_or_default();
        let control = file.control.unwrap_or_default();
        let tracker = file.tracker.unwrap_or_default();
        let synthetic = file.synthetic.unwrap_or_default();

        let image_type = match request.image_type {
            Some(name) => name.parse()?,
            None => defaults.image_type,
        };
        let control_kind = match control.kind {
            Some(kind) => kind.parse()?,
            None => defaults.control,
        };

        Ok(Self {
            source: file.source.unwrap_or(defaults.source),
            vehicle: request.vehicle.unwrap_or(defaults.vehicle),
            camera: request.camera.unwrap_or(defaults.camera),
            image_type,
            pixels_as_float: request.pixels_as_float.unwrap_or(false),
            compress: request.compress.unwrap_or(false),
            scale: file.scale.unwrap_or(defaults.scale),
            mask: file.mask,
            map_in: file.map_in,
            map_out: file.map_out,
            control: control_kind,
            control_addr: control.addr.unwrap_or(defaults.control_addr),
            poll: file
                .poll_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll),
            tracker: TrackerConfig {
                keyframe_interval: tracker
                    .keyframe_interval
                    .unwrap_or(defaults.tracker.keyframe_interval),
                optimize_every: tracker
                    .optimize_every
                    .unwrap_or(defaults.tracker.optimize_every),
                optimize_duration: tracker
                    .optimize_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.tracker.optimize_duration),
                frame_budget: tracker.frame_budget,
            },
            synthetic: SyntheticConfig {
                width: synthetic.width.unwrap_or(defaults.synthetic.width),
                height: synthetic.height.unwrap_or(defaults.synthetic.height),
                miss_every: synthetic
                    .miss_every
                    .unwrap_or(defaults.synthetic.miss_every),
                fail_after: synthetic.fail_after,
                frame_delay: synthetic
                    .frame_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.synthetic.frame_delay),
                seed: synthetic.seed.unwrap_or(defaults.synthetic.seed),
                ..defaults.synthetic
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(source) = env_value("FEEDLINE_SOURCE") {
            self.source = source;
        }
        if let Some(vehicle) = env_value("FEEDLINE_VEHICLE") {
            self.vehicle = vehicle;
        }
        if let Some(camera) = env_value("FEEDLINE_CAMERA") {
            self.camera = camera;
        }
        if let Some(image_type) = env_value("FEEDLINE_IMAGE_TYPE") {
            self.image_type = image_type
                .parse()
                .map_err(|e| anyhow!("FEEDLINE_IMAGE_TYPE: {}", e))?;
        }
        if let Some(scale) = env_value("FEEDLINE_SCALE") {
            self.scale = scale
                .parse()
                .map_err(|_| anyhow!("FEEDLINE_SCALE must be a number"))?;
        }
        if let Some(control) = env_value("FEEDLINE_CONTROL") {
            self.control = control
                .parse()
                .map_err(|e| anyhow!("FEEDLINE_CONTROL: {}", e))?;
        }
        if let Some(path) = env_value("FEEDLINE_MAP_IN") {
            self.map_in = Some(PathBuf::from(path));
        }
        if let Some(path) = env_value("FEEDLINE_MAP_OUT") {
            self.map_out = Some(PathBuf::from(path));
        }
        if let Some(poll) = env_value("FEEDLINE_POLL_MS") {
            let millis: u64 = poll.parse().map_err(|_| {
                anyhow!("FEEDLINE_POLL_MS must be an integer number of milliseconds")
            })?;
            self.poll = Duration::from_millis(millis);
        }
        Ok(())
    }

    /// Check cross-field constraints. Run again after applying CLI flags.
    pub fn validate(&self) -> Result<()> {
        if !self.source.starts_with("stub://") {
            validate_host_port(&self.source)?;
        }
        if self.vehicle.trim().is_empty() {
            return Err(anyhow!("vehicle name must not be empty"));
        }
        FrameTransform::new(self.scale)?;
        if self.control == ControlPlaneKind::Tcp {
            let addr: SocketAddr = self
                .control_addr
                .parse()
                .map_err(|e| anyhow!("invalid control address '{}': {}", self.control_addr, e))?;
            if !addr.ip().is_loopback() {
                return Err(anyhow!(
                    "control address '{}' must be a loopback address",
                    addr
                ));
            }
        }
        if self.poll.is_zero() {
            return Err(anyhow!("poll interval must be greater than zero"));
        }
        if self.tracker.keyframe_interval == 0 || self.tracker.optimize_every == 0 {
            return Err(anyhow!("tracker intervals must be greater than zero"));
        }
        if self.synthetic.width == 0 || self.synthetic.height == 0 {
            return Err(anyhow!("synthetic image size must be non-zero"));
        }
        Ok(())
    }

    pub fn frame_request(&self) -> FrameRequest {
        FrameRequest::new(
            &self.vehicle,
            &self.camera,
            self.image_type,
            self.pixels_as_float,
            self.compress,
        )
    }

    pub fn transform(&self) -> Result<FrameTransform> {
        FrameTransform::new(self.scale)
    }

    pub fn poll_intervals(&self) -> PollIntervals {
        PollIntervals {
            pause: self.poll,
            backoff: self.poll,
            drain: self.poll,
        }
    }

    /// Synthetic client settings for a `stub://` source.
    pub fn synthetic_config(&self) -> SyntheticConfig {
        SyntheticConfig {
            endpoint: self.source.clone(),
            ..self.synthetic.clone()
        }
    }
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn validate_host_port(endpoint: &str) -> Result<()> {
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("source '{}' must be stub://<name> or host:port", endpoint))?;
    if host.is_empty() {
        return Err(anyhow!("source '{}' is missing a host", endpoint));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| anyhow!("source port in '{}' must be within 1-65535", endpoint))?;
    if port == 0 {
        return Err(anyhow!("source port in '{}' must be within 1-65535", endpoint));
    }
    Ok(())
}
