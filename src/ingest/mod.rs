//! Frame acquisition.
//!
//! The acquisition loop pulls frames through the `FrameSource` trait. This
//! module provides:
//! - `SimCameraSource`: adapts a simulator image RPC client (`ImageClient`)
//!   into a frame source, converting raw, float and compressed responses.
//! - `SyntheticClient`: in-process `stub://` client (tests, offline runs).
//!
//! The RPC transport to a real simulator is an external collaborator; plug
//! it in by implementing `ImageClient`.
//!
//! Fetch outcomes follow one contract for every source:
//! - `Ok(Some(frame))`: a frame is ready.
//! - `Ok(None)`: nothing ready yet (transient). Callers back off and retry.
//! - `Err(_)`: the source is unusable for the rest of the run. Never retried.

mod normalize;
pub mod sim;
pub mod synthetic;

use anyhow::Result;

use crate::frame::{Frame, FrameRequest};

pub use normalize::ImageResponse;
pub use sim::{ImageClient, SimCameraSource};
pub use synthetic::{SyntheticClient, SyntheticConfig};

/// Producer-side frame source.
///
/// Sources are moved onto the producer thread, hence `Send`.
pub trait FrameSource: Send {
    /// Source identifier for logs.
    fn name(&self) -> &str;

    /// Establish the connection. Called once, before the producer starts;
    /// an error here aborts the run.
    fn connect(&mut self, _request: &FrameRequest) -> Result<()> {
        Ok(())
    }

    /// Fetch one frame for `request`.
    fn fetch(&mut self, request: &FrameRequest) -> Result<Option<Frame>>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn connect(&mut self, request: &FrameRequest) -> Result<()> {
        (**self).connect(request)
    }

    fn fetch(&mut self, request: &FrameRequest) -> Result<Option<Frame>> {
        (**self).fetch(request)
    }
}
