//! Simulator camera source.
//!
//! `SimCameraSource` turns an image RPC client into a `FrameSource`:
//! - `connect` confirms the RPC connection and hands vehicle control back to
//!   the simulator so the camera keeps following its own flight plan.
//! - `fetch` requests one image and converts it to a BGR frame.
//!
//! Transport failures surface as errors and end the run; empty or malformed
//! images are transient misses.

use anyhow::{Context, Result};

use super::normalize::{response_to_frame, ImageResponse};
use super::FrameSource;
use crate::frame::{Frame, FrameRequest};

/// Image RPC transport to a simulator.
pub trait ImageClient: Send {
    /// Human-readable endpoint, e.g. `127.0.0.1:41451`.
    fn endpoint(&self) -> String;

    fn confirm_connection(&mut self) -> Result<()>;

    fn enable_api_control(&mut self, enabled: bool, vehicle_name: &str) -> Result<()>;

    /// Request images for a single camera. The simulator may answer with no
    /// responses at all when the camera has not rendered yet.
    fn get_images(&mut self, request: &FrameRequest) -> Result<Vec<ImageResponse>>;
}

pub struct SimCameraSource<C: ImageClient> {
    client: C,
    name: String,
}

impl<C: ImageClient> SimCameraSource<C> {
    pub fn new(client: C) -> Self {
        let name = format!("sim:{}", client.endpoint());
        Self { client, name }
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

impl<C: ImageClient> FrameSource for SimCameraSource<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self, request: &FrameRequest) -> Result<()> {
        log::info!(
            "connecting to simulator at {} (vehicle='{}', camera='{}')",
            self.client.endpoint(),
            request.vehicle_name(),
            request.camera_name()
        );
        self.client
            .confirm_connection()
            .with_context(|| format!("failed to connect to {}", self.client.endpoint()))?;
        self.client
            .enable_api_control(false, request.vehicle_name())
            .with_context(|| {
                format!(
                    "failed to release api control of vehicle '{}'",
                    request.vehicle_name()
                )
            })?;
        Ok(())
    }

    fn fetch(&mut self, request: &FrameRequest) -> Result<Option<Frame>> {
        let responses = self
            .client
            .get_images(request)
            .context("image rpc failed")?;
        let Some(response) = responses.first() else {
            return Ok(None);
        };
        let frame = response_to_frame(response)?;
        Ok(frame.filter(|frame| !frame.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ImageType;
    use anyhow::anyhow;
    use std::collections::VecDeque;

    struct ScriptedClient {
        connect_ok: bool,
        api_control: Vec<(bool, String)>,
        replies: VecDeque<Result<Vec<ImageResponse>>>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Result<Vec<ImageResponse>>>) -> Self {
            Self {
                connect_ok: true,
                api_control: Vec::new(),
                replies: replies.into(),
            }
        }
    }

    impl ImageClient for ScriptedClient {
        fn endpoint(&self) -> String {
            "test:0".to_string()
        }

        fn confirm_connection(&mut self) -> Result<()> {
            if self.connect_ok {
                Ok(())
            } else {
                Err(anyhow!("connection refused"))
            }
        }

        fn enable_api_control(&mut self, enabled: bool, vehicle_name: &str) -> Result<()> {
            self.api_control.push((enabled, vehicle_name.to_string()));
            Ok(())
        }

        fn get_images(&mut self, _request: &FrameRequest) -> Result<Vec<ImageResponse>> {
            self.replies.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn request() -> FrameRequest {
        FrameRequest::new("Copter", "front", ImageType::Scene, false, false)
    }

    fn raw(width: i32, height: i32) -> ImageResponse {
        ImageResponse {
            width,
            height,
            image_data_u8: vec![1u8; (width * height * 3).max(0) as usize],
            ..ImageResponse::default()
        }
    }

    #[test]
    fn connect_releases_api_control_for_vehicle() -> Result<()> {
        let mut source = SimCameraSource::new(ScriptedClient::new(vec![]));
        source.connect(&request())?;
        assert_eq!(source.client().api_control, vec![(false, "Copter".to_string())]);
        assert_eq!(source.name(), "sim:test:0");
        Ok(())
    }

    #[test]
    fn connect_failure_is_an_error() {
        let mut client = ScriptedClient::new(vec![]);
        client.connect_ok = false;
        let mut source = SimCameraSource::new(client);
        let err = source.connect(&request()).unwrap_err();
        assert!(format!("{:#}", err).contains("connection refused"));
    }

    #[test]
    fn fetch_maps_outcomes() -> Result<()> {
        let mut source = SimCameraSource::new(ScriptedClient::new(vec![
            Ok(vec![]),
            Ok(vec![raw(0, 0)]),
            Ok(vec![raw(4, 2)]),
            Err(anyhow!("socket closed")),
        ]));
        let req = request();

        assert!(source.fetch(&req)?.is_none());
        assert!(source.fetch(&req)?.is_none());
        let frame = source.fetch(&req)?.expect("frame");
        assert_eq!((frame.width(), frame.height()), (4, 2));
        assert!(source.fetch(&req).is_err());
        Ok(())
    }
}
