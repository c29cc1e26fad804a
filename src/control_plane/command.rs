use anyhow::{anyhow, Result};
use std::str::FromStr;

use super::ControlCallbacks;

/// Operator command understood by the text-driven control planes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    TogglePause,
    SetPaused(bool),
    Step,
    Reset,
    SaveAndExit,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let verb = words
            .next()
            .ok_or_else(|| anyhow!("empty command"))?
            .to_lowercase();
        let arg = words.next().map(|w| w.to_lowercase());
        if words.next().is_some() {
            return Err(anyhow!("too many arguments: {}", line.trim()));
        }

        let cmd = match (verb.as_str(), arg.as_deref()) {
            ("p" | "pause", None) => Command::TogglePause,
            ("p" | "pause", Some("on")) => Command::SetPaused(true),
            ("p" | "pause", Some("off")) => Command::SetPaused(false),
            ("resume", None) => Command::SetPaused(false),
            ("s" | "step", None) => Command::Step,
            ("r" | "reset", None) => Command::Reset,
            ("q" | "quit" | "exit", None) => Command::SaveAndExit,
            _ => return Err(anyhow!("unknown command: {}", line.trim())),
        };
        Ok(cmd)
    }
}

/// Applies commands to the registered callbacks.
///
/// Tracks the pause checkbox locally so `TogglePause` can flip it, the way a
/// GUI checkbox holds its own state.
pub(crate) struct Dispatcher {
    callbacks: Option<ControlCallbacks>,
    paused: bool,
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        Self {
            callbacks: None,
            paused: false,
        }
    }

    pub(crate) fn register(&mut self, callbacks: ControlCallbacks) {
        self.paused = callbacks.initially_paused;
        self.callbacks = Some(callbacks);
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused
    }

    /// Apply `cmd`. Returns true when the plane should exit.
    pub(crate) fn dispatch(&mut self, cmd: Command) -> bool {
        let Some(callbacks) = &self.callbacks else {
            log::warn!("control command {:?} ignored: no callbacks registered", cmd);
            return false;
        };
        match cmd {
            Command::TogglePause => {
                self.paused = !self.paused;
                (callbacks.on_pause)(self.paused);
            }
            Command::SetPaused(paused) => {
                self.paused = paused;
                (callbacks.on_pause)(paused);
            }
            Command::Step => (callbacks.on_step)(),
            Command::Reset => (callbacks.on_reset)(),
            Command::SaveAndExit => {
                self.paused = false;
                (callbacks.on_save_and_exit)();
                return true;
            }
        }
        false
    }

    /// The plane is going away without an explicit save-and-exit.
    pub(crate) fn close(&mut self) {
        self.paused = false;
        if let Some(callbacks) = &self.callbacks {
            (callbacks.on_close)();
        }
    }
}
