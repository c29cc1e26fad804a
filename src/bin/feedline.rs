//! feedline - stream simulator camera frames into a tracker
//!
//! This binary:
//! 1. Loads configuration (file named by FEEDLINE_CONFIG or --config,
//!    FEEDLINE_* environment, then flags)
//! 2. Connects the image source and builds the tracker, seeding it from
//!    --map-db-in when given
//! 3. Runs the acquisition loop with the selected control plane
//!    (none, console, tcp)
//! 4. Drains, shuts the tracker down, reports timing and writes the map

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use feedline::{
    build_control_plane, install_interrupt_handler, ControlPlaneKind, FrameSource, ImageType,
    KeyframeLogTracker, Mask, PipelineConfig, PipelineSettings, PipelineSupervisor,
    SimCameraSource, SyntheticClient, TrackingSink,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    name = "feedline",
    version,
    about = "Feed simulator camera frames into a tracker with live pause/step control"
)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension)
    #[arg(long, value_name = "PATH", env = "FEEDLINE_CONFIG")]
    config: Option<PathBuf>,

    /// Image source: stub://<name> for the synthetic client, or host:port
    #[arg(long)]
    source: Option<String>,

    /// Simulator vehicle name
    #[arg(long)]
    vehicle: Option<String>,

    /// Simulator camera name
    #[arg(long)]
    camera: Option<String>,

    /// Image type (scene|depth|depthplanar|segmentation|infrared|disparity)
    #[arg(long, value_name = "TYPE")]
    image_type: Option<ImageType>,

    /// Request floating point pixels
    #[arg(long)]
    float: bool,

    /// Request compressed payloads
    #[arg(long)]
    compress: bool,

    /// Scaling ratio applied to every frame
    #[arg(short, long)]
    scale: Option<f32>,

    /// Grayscale mask image passed to the tracker with every frame
    #[arg(long, value_name = "PATH")]
    mask: Option<PathBuf>,

    /// Load a tracker map written by a previous run before starting
    #[arg(short = 'i', long, value_name = "PATH")]
    map_db_in: Option<PathBuf>,

    /// Store the tracker's map at this path after the run
    #[arg(short = 'o', long, value_name = "PATH")]
    map_db_out: Option<PathBuf>,

    /// Control plane (none|console|tcp)
    #[arg(long, value_name = "KIND")]
    control: Option<ControlPlaneKind>,

    /// Loopback address for the tcp control plane
    #[arg(long, value_name = "ADDR")]
    control_addr: Option<String>,

    /// Start paused; frames flow on step or resume
    #[arg(long)]
    start_paused: bool,

    /// Pause, backoff and drain polling interval in milliseconds
    #[arg(long, value_name = "MS")]
    poll_ms: Option<u64>,

    /// Stop after the tracker has seen this many frames
    #[arg(long, value_name = "N")]
    frame_budget: Option<u64>,

    /// Synthetic source image width
    #[arg(long, value_name = "PX")]
    synthetic_width: Option<u32>,

    /// Synthetic source image height
    #[arg(long, value_name = "PX")]
    synthetic_height: Option<u32>,

    /// Synthetic source: answer every Nth request with no image
    #[arg(long, value_name = "N")]
    synthetic_miss_every: Option<u32>,

    /// Synthetic source: fail after serving N images
    #[arg(long, value_name = "N")]
    synthetic_fail_after: Option<u64>,

    /// Synthetic source: render delay per image in milliseconds
    #[arg(long, value_name = "MS")]
    synthetic_delay_ms: Option<u64>,

    /// Log level filter (RUST_LOG takes precedence)
    #[arg(long, default_value = "info", value_name = "LEVEL")]
    log_level: String,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    match run(args) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            log::error!("{:#}", err);
            std::process::exit(1);
        }
    }
}

fn run(args: Args) -> Result<i32> {
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let cfg = {
        let _stage = ui.stage("Load configuration");
        let mut cfg = PipelineConfig::load_from(args.config.as_deref())?;
        apply_args(&mut cfg, &args);
        cfg.validate()?;
        cfg
    };
    log::info!(
        "source {} vehicle {} camera {} image type {} scale {}",
        cfg.source,
        cfg.vehicle,
        cfg.camera,
        cfg.image_type,
        cfg.scale
    );

    let (source, sink, settings) = {
        let _stage = ui.stage("Prepare source and tracker");
        let source = open_source(&cfg)?;
        let tracker = KeyframeLogTracker::new(cfg.tracker.clone())?;
        if let Some(path) = &cfg.map_in {
            tracker.load_map(path)?;
        }
        let sink: Arc<dyn TrackingSink> = Arc::new(tracker);
        let mask = match &cfg.mask {
            Some(path) => Some(
                Mask::load(path).with_context(|| format!("failed to load mask {}", path.display()))?,
            ),
            None => None,
        };
        let settings = PipelineSettings {
            request: cfg.frame_request(),
            transform: cfg.transform()?,
            mask,
            intervals: cfg.poll_intervals(),
            map_out: cfg.map_out.clone(),
            start_paused: args.start_paused,
        };
        (source, sink, settings)
    };

    let interrupt = install_interrupt_handler()?;
    let mut plane = build_control_plane(cfg.control, &cfg.control_addr, Some(interrupt))?;
    log::info!("control plane: {}", plane.name());

    let outcome = {
        let mut stage = ui.quiet_stage("Run pipeline");
        let outcome = PipelineSupervisor::new(source, sink, settings).run(plane.as_mut());
        if !outcome.is_success() {
            stage.fail();
        }
        outcome
    };

    if let Some(summary) = &outcome.summary {
        println!("{}", summary);
    }
    if let Some(path) = &outcome.artifact {
        println!("map: {}", path.display());
    }
    Ok(outcome.exit_code())
}

fn apply_args(cfg: &mut PipelineConfig, args: &Args) {
    if let Some(source) = &args.source {
        cfg.source = source.clone();
    }
    if let Some(vehicle) = &args.vehicle {
        cfg.vehicle = vehicle.clone();
    }
    if let Some(camera) = &args.camera {
        cfg.camera = camera.clone();
    }
    if let Some(image_type) = args.image_type {
        cfg.image_type = image_type;
    }
    cfg.pixels_as_float |= args.float;
    cfg.compress |= args.compress;
    if let Some(scale) = args.scale {
        cfg.scale = scale;
    }
    if let Some(mask) = &args.mask {
        cfg.mask = Some(mask.clone());
    }
    if let Some(path) = &args.map_db_in {
        cfg.map_in = Some(path.clone());
    }
    if let Some(path) = &args.map_db_out {
        cfg.map_out = Some(path.clone());
    }
    if let Some(control) = args.control {
        cfg.control = control;
    }
    if let Some(addr) = &args.control_addr {
        cfg.control_addr = addr.clone();
    }
    if let Some(ms) = args.poll_ms {
        cfg.poll = Duration::from_millis(ms);
    }
    if args.frame_budget.is_some() {
        cfg.tracker.frame_budget = args.frame_budget;
    }
    if let Some(width) = args.synthetic_width {
        cfg.synthetic.width = width;
    }
    if let Some(height) = args.synthetic_height {
        cfg.synthetic.height = height;
    }
    if let Some(every) = args.synthetic_miss_every {
        cfg.synthetic.miss_every = every;
    }
    if args.synthetic_fail_after.is_some() {
        cfg.synthetic.fail_after = args.synthetic_fail_after;
    }
    if let Some(ms) = args.synthetic_delay_ms {
        cfg.synthetic.frame_delay = Duration::from_millis(ms);
    }
}

fn open_source(cfg: &PipelineConfig) -> Result<Box<dyn FrameSource>> {
    if cfg.source.starts_with("stub://") {
        let client = SyntheticClient::new(cfg.synthetic_config())?;
        return Ok(Box::new(SimCameraSource::new(client)));
    }
    Err(anyhow!(
        "no image RPC transport is built in for '{}'; use a stub:// source or provide an ImageClient",
        cfg.source
    ))
}
