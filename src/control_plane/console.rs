//! Console control plane: one command per stdin line.
//!
//! `p`/`pause` toggles pause, `s`/`step` grants one frame, `r`/`reset`
//! resets the tracker, `q`/`quit` saves and exits. End of input counts as
//! closing the window.

use anyhow::Result;
use std::io::{BufRead, BufReader, Read};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};

use super::{
    interrupted, Command, ControlCallbacks, ControlPlane, Dispatcher, ProducerWatch, PLANE_POLL,
};

enum Input {
    Line(String),
    Closed,
}

pub struct ConsoleControl {
    dispatcher: Dispatcher,
    interrupt: Option<Receiver<()>>,
    input: Option<Box<dyn Read + Send>>,
}

impl ConsoleControl {
    pub fn new(interrupt: Option<Receiver<()>>) -> Self {
        Self {
            dispatcher: Dispatcher::new(),
            interrupt,
            input: None,
        }
    }

    /// Read commands from `input` instead of stdin.
    pub fn with_input(mut self, input: impl Read + Send + 'static) -> Self {
        self.input = Some(Box::new(input));
        self
    }

    fn spawn_reader(&mut self) -> Result<Receiver<Input>> {
        let (tx, rx) = mpsc::channel();
        let input: Box<dyn Read + Send> = match self.input.take() {
            Some(input) => input,
            None => Box::new(std::io::stdin()),
        };
        // The reader blocks on input and is left running if the plane exits
        // first; it ends with the process.
        std::thread::Builder::new()
            .name("console-control".to_string())
            .spawn(move || {
                let reader = BufReader::new(input);
                for line in reader.lines() {
                    match line {
                        Ok(line) => {
                            if tx.send(Input::Line(line)).is_err() {
                                return;
                            }
                        }
                        Err(err) => {
                            log::warn!("console input error: {}", err);
                            break;
                        }
                    }
                }
                let _ = tx.send(Input::Closed);
            })?;
        Ok(rx)
    }
}

impl ControlPlane for ConsoleControl {
    fn name(&self) -> &'static str {
        "console"
    }

    fn register(&mut self, callbacks: ControlCallbacks) {
        self.dispatcher.register(callbacks);
    }

    fn run(&mut self, producer: &ProducerWatch) -> Result<()> {
        let lines = self.spawn_reader()?;
        log::info!("console control: [p]ause, [s]tep, [r]eset, [q]uit");

        loop {
            if producer.is_finished() {
                log::info!("producer finished; leaving console control");
                return Ok(());
            }
            if interrupted(self.interrupt.as_ref()) {
                self.dispatcher.close();
                return Ok(());
            }
            match lines.recv_timeout(PLANE_POLL) {
                Ok(Input::Line(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match line.parse::<Command>() {
                        Ok(cmd) => {
                            if self.dispatcher.dispatch(cmd) {
                                return Ok(());
                            }
                        }
                        Err(err) => log::warn!("{}", err),
                    }
                }
                Ok(Input::Closed) | Err(RecvTimeoutError::Disconnected) => {
                    self.dispatcher.close();
                    return Ok(());
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }
}
