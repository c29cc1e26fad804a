//! Replays a fixed list of operator actions.

use anyhow::Result;
use std::time::{Duration, Instant};

use super::{Command, ControlCallbacks, ControlPlane, Dispatcher, ProducerWatch, PLANE_POLL};

type Condition = Box<dyn Fn() -> bool + Send>;

enum Action {
    Send(Command),
    Wait(Duration),
    WaitUntil(Condition),
}

/// Control plane driven by a script instead of an operator.
///
/// When the script runs out without a `SaveAndExit`, the plane behaves as if
/// its window were closed.
#[derive(Default)]
pub struct ScriptedControl {
    dispatcher: Option<Dispatcher>,
    actions: Vec<Action>,
}

impl ScriptedControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, cmd: Command) -> Self {
        self.actions.push(Action::Send(cmd));
        self
    }

    pub fn wait(mut self, duration: Duration) -> Self {
        self.actions.push(Action::Wait(duration));
        self
    }

    /// Block the script until `condition` holds or the producer finishes.
    pub fn wait_until(mut self, condition: impl Fn() -> bool + Send + 'static) -> Self {
        self.actions.push(Action::WaitUntil(Box::new(condition)));
        self
    }

    fn dispatcher(&mut self) -> &mut Dispatcher {
        self.dispatcher.get_or_insert_with(Dispatcher::new)
    }
}

impl ControlPlane for ScriptedControl {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn register(&mut self, callbacks: ControlCallbacks) {
        self.dispatcher().register(callbacks);
    }

    fn run(&mut self, producer: &ProducerWatch) -> Result<()> {
        let actions = std::mem::take(&mut self.actions);
        for action in actions {
            if producer.is_finished() {
                return Ok(());
            }
            match action {
                Action::Send(cmd) => {
                    log::debug!("scripted control: {:?}", cmd);
                    if self.dispatcher().dispatch(cmd) {
                        return Ok(());
                    }
                }
                Action::Wait(duration) => {
                    let deadline = Instant::now() + duration;
                    while Instant::now() < deadline {
                        if producer.is_finished() {
                            return Ok(());
                        }
                        let left = deadline.saturating_duration_since(Instant::now());
                        std::thread::sleep(PLANE_POLL.min(left));
                    }
                }
                Action::WaitUntil(condition) => {
                    while !condition() {
                        if producer.is_finished() {
                            return Ok(());
                        }
                        std::thread::sleep(Duration::from_millis(1));
                    }
                }
            }
        }
        self.dispatcher().close();
        Ok(())
    }
}
