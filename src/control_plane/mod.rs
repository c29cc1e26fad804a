//! Operator control planes.
//!
//! A control plane runs on the supervisor's calling thread and talks to the
//! pipeline only through the callbacks it is given at registration. Exactly
//! one variant is active per run, chosen at startup:
//!
//! - `none`: `Headless`, waits for Ctrl-C or for the producer to finish.
//! - `console`: `ConsoleControl`, line commands on stdin.
//! - `tcp`: `TcpControl`, line commands over a loopback TCP socket.
//!
//! `ScriptedControl` replays a fixed command list and is meant for tests and
//! demos.

mod command;
pub mod console;
pub mod scripted;
pub mod tcp;

use anyhow::{anyhow, Result};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use crate::control::ControlState;
use crate::tracker::TrackingSink;

pub use command::Command;
pub(crate) use command::Dispatcher;
pub use console::ConsoleControl;
pub use scripted::ScriptedControl;
pub use tcp::TcpControl;

/// How often blocking control-plane loops re-check the producer.
pub(crate) const PLANE_POLL: Duration = Duration::from_millis(20);

pub type Callback = Box<dyn Fn() + Send + Sync>;

/// Callbacks a control plane fires on operator input.
pub struct ControlCallbacks {
    /// Pause state at registration, so a toggle flips the right way.
    pub initially_paused: bool,
    pub on_pause: Box<dyn Fn(bool) + Send + Sync>,
    pub on_step: Callback,
    pub on_reset: Callback,
    pub on_save_and_exit: Callback,
    pub on_close: Callback,
}

impl ControlCallbacks {
    /// Wire the callbacks to a pipeline's control state and tracker.
    ///
    /// Save-and-exit and close both latch terminate and then clear the pause
    /// flag, so a paused producer never sees "unpaused" without "terminate".
    pub fn wire(control: Arc<ControlState>, sink: Arc<dyn TrackingSink>) -> Self {
        let pause = control.clone();
        let step = control.clone();
        let exit = control.clone();
        let initially_paused = control.is_paused();
        let close = control;
        Self {
            initially_paused,
            on_pause: Box::new(move |paused| {
                log::info!("control: {}", if paused { "paused" } else { "resumed" });
                pause.set_paused(paused);
            }),
            on_step: Box::new(move || step.add_step_credit()),
            on_reset: Box::new(move || {
                log::info!("control: reset requested");
                sink.request_reset();
            }),
            on_save_and_exit: Box::new(move || {
                log::info!("control: save and exit");
                exit.request_terminate();
                exit.set_paused(false);
            }),
            on_close: Box::new(move || {
                close.request_terminate();
                close.set_paused(false);
            }),
        }
    }
}

/// Lets a control plane notice that the producer thread has exited.
#[derive(Clone, Debug, Default)]
pub struct ProducerWatch {
    finished: Arc<AtomicBool>,
}

impl ProducerWatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Guard that marks the producer finished when dropped, including on
    /// unwind.
    pub fn finish_guard(&self) -> FinishGuard {
        FinishGuard {
            finished: self.finished.clone(),
        }
    }
}

pub struct FinishGuard {
    finished: Arc<AtomicBool>,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.finished.store(true, Ordering::SeqCst);
    }
}

/// Operator control surface.
pub trait ControlPlane {
    fn name(&self) -> &'static str;

    /// Hand the plane its callbacks. Called once, before `run`.
    fn register(&mut self, callbacks: ControlCallbacks);

    /// Run the plane's loop on the calling thread. Returns when the operator
    /// exits or closes the plane, or when the producer has finished.
    fn run(&mut self, producer: &ProducerWatch) -> Result<()>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ControlPlaneKind {
    #[default]
    None,
    Console,
    Tcp,
}

impl ControlPlaneKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlPlaneKind::None => "none",
            ControlPlaneKind::Console => "console",
            ControlPlaneKind::Tcp => "tcp",
        }
    }
}

impl FromStr for ControlPlaneKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "none" => Ok(ControlPlaneKind::None),
            "console" => Ok(ControlPlaneKind::Console),
            "tcp" => Ok(ControlPlaneKind::Tcp),
            other => Err(anyhow!(
                "unknown control plane '{}' (expected none, console or tcp)",
                other
            )),
        }
    }
}

impl fmt::Display for ControlPlaneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the selected control plane.
pub fn build_control_plane(
    kind: ControlPlaneKind,
    tcp_addr: &str,
    interrupt: Option<Receiver<()>>,
) -> Result<Box<dyn ControlPlane>> {
    let plane: Box<dyn ControlPlane> = match kind {
        ControlPlaneKind::None => Box::new(Headless::new(interrupt)),
        ControlPlaneKind::Console => Box::new(ConsoleControl::new(interrupt)),
        ControlPlaneKind::Tcp => Box::new(TcpControl::bind(tcp_addr, interrupt)?),
    };
    Ok(plane)
}

/// Route Ctrl-C to a channel. Can only be installed once per process.
pub fn install_interrupt_handler() -> Result<Receiver<()>> {
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;
    Ok(rx)
}

pub(crate) fn interrupted(interrupt: Option<&Receiver<()>>) -> bool {
    interrupt.is_some_and(|rx| rx.try_recv().is_ok())
}

// ----------------------------------------------------------------------------
// Headless
// ----------------------------------------------------------------------------

/// The "no control plane" variant.
pub struct Headless {
    dispatcher: Dispatcher,
    interrupt: Option<Receiver<()>>,
}

impl Headless {
    pub fn new(interrupt: Option<Receiver<()>>) -> Self {
        Self {
            dispatcher: Dispatcher::new(),
            interrupt,
        }
    }
}

impl ControlPlane for Headless {
    fn name(&self) -> &'static str {
        "none"
    }

    fn register(&mut self, callbacks: ControlCallbacks) {
        self.dispatcher.register(callbacks);
    }

    fn run(&mut self, producer: &ProducerWatch) -> Result<()> {
        log::info!("running without control plane; Ctrl-C to stop");
        loop {
            if producer.is_finished() {
                return Ok(());
            }
            match &self.interrupt {
                Some(rx) => match rx.recv_timeout(PLANE_POLL) {
                    Ok(()) => {
                        log::info!("interrupt received, stopping");
                        self.dispatcher.close();
                        return Ok(());
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => self.interrupt = None,
                },
                None => std::thread::sleep(PLANE_POLL),
            }
        }
    }
}
