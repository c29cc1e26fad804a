//! Synthetic image client (`stub://` endpoints).
//!
//! Stands in for a simulator when none is running: renders a drifting test
//! pattern with a little seeded noise, and can be told to miss frames or to
//! drop the connection after a number of frames. The pipeline tests and the
//! offline mode of the `feedline` binary both run on it.

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

use super::normalize::ImageResponse;
use super::sim::ImageClient;
use crate::frame::FrameRequest;

/// Configuration for a synthetic client.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    /// Endpoint, must start with `stub://`.
    pub endpoint: String,
    pub width: u32,
    pub height: u32,
    /// Answer every Nth image request with no image (0 disables misses).
    pub miss_every: u32,
    /// Fail every request after this many images were served.
    pub fail_after: Option<u64>,
    /// Simulated render latency per served image.
    pub frame_delay: Duration,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            endpoint: "stub://sim".to_string(),
            width: 320,
            height: 240,
            miss_every: 0,
            fail_after: None,
            frame_delay: Duration::from_millis(0),
            seed: 7,
        }
    }
}

pub struct SyntheticClient {
    config: SyntheticConfig,
    rng: StdRng,
    connected: bool,
    requests: u64,
    frames_served: u64,
}

impl SyntheticClient {
    pub fn new(config: SyntheticConfig) -> Result<Self> {
        if !config.endpoint.starts_with("stub://") {
            return Err(anyhow!(
                "synthetic client requires a stub:// endpoint, got '{}'",
                config.endpoint
            ));
        }
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("synthetic image size must be non-zero"));
        }
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            rng,
            connected: false,
            requests: 0,
            frames_served: 0,
        })
    }

    pub fn frames_served(&self) -> u64 {
        self.frames_served
    }

    pub fn requests(&self) -> u64 {
        self.requests
    }

    fn render_scene(&mut self) -> Vec<u8> {
        let width = self.config.width as usize;
        let height = self.config.height as usize;
        let shift = self.frames_served as usize;
        let mut pixels = vec![0u8; width * height * 3];
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let x = i % width;
            let y = i / width;
            let noise: u8 = self.rng.gen_range(0..8);
            px[0] = ((x + shift) % 256) as u8 ^ noise;
            px[1] = ((y + shift / 2) % 256) as u8;
            px[2] = ((x + y) % 256) as u8;
        }
        pixels
    }

    fn render_depth(&mut self) -> Vec<f32> {
        let width = self.config.width as usize;
        let height = self.config.height as usize;
        let mut depth = Vec::with_capacity(width * height);
        for y in 0..height {
            for _ in 0..width {
                let base = 1.0 + y as f32 / height as f32 * 50.0;
                depth.push(base + self.rng.gen_range(0.0..0.05));
            }
        }
        depth
    }
}

impl ImageClient for SyntheticClient {
    fn endpoint(&self) -> String {
        self.config.endpoint.clone()
    }

    fn confirm_connection(&mut self) -> Result<()> {
        self.connected = true;
        log::info!("{}: connected (synthetic)", self.config.endpoint);
        Ok(())
    }

    fn enable_api_control(&mut self, _enabled: bool, _vehicle_name: &str) -> Result<()> {
        Ok(())
    }

    fn get_images(&mut self, request: &FrameRequest) -> Result<Vec<ImageResponse>> {
        if !self.connected {
            return Err(anyhow!("{} is not connected", self.config.endpoint));
        }
        self.requests += 1;

        if let Some(limit) = self.config.fail_after {
            if self.frames_served >= limit {
                return Err(anyhow!(
                    "{}: connection lost after {} frames",
                    self.config.endpoint,
                    limit
                ));
            }
        }
        if self.config.miss_every > 0 && self.requests % self.config.miss_every as u64 == 0 {
            return Ok(Vec::new());
        }
        if !self.config.frame_delay.is_zero() {
            std::thread::sleep(self.config.frame_delay);
        }

        let mut response = ImageResponse {
            width: self.config.width as i32,
            height: self.config.height as i32,
            pixels_as_float: request.pixels_as_float(),
            // Payloads are always served uncompressed.
            compress: false,
            ..ImageResponse::default()
        };
        if request.pixels_as_float() {
            response.image_data_f32 = self.render_depth();
        } else {
            response.image_data_u8 = self.render_scene();
        }
        self.frames_served += 1;
        Ok(vec![response])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ImageType;

    fn scene_request() -> FrameRequest {
        FrameRequest::new("Copter", "0", ImageType::Scene, false, false)
    }

    #[test]
    fn rejects_non_stub_endpoint() {
        let cfg = SyntheticConfig {
            endpoint: "tcp://127.0.0.1:41451".to_string(),
            ..SyntheticConfig::default()
        };
        assert!(SyntheticClient::new(cfg).is_err());
    }

    #[test]
    fn requires_connection_before_images() -> Result<()> {
        let mut client = SyntheticClient::new(SyntheticConfig::default())?;
        assert!(client.get_images(&scene_request()).is_err());
        client.confirm_connection()?;
        let responses = client.get_images(&scene_request())?;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].image_data_u8.len(), 320 * 240 * 3);
        Ok(())
    }

    #[test]
    fn misses_and_failures_follow_config() -> Result<()> {
        let mut client = SyntheticClient::new(SyntheticConfig {
            width: 4,
            height: 4,
            miss_every: 3,
            fail_after: Some(4),
            ..SyntheticConfig::default()
        })?;
        client.confirm_connection()?;
        let req = scene_request();

        let mut served = 0;
        let mut missed = 0;
        loop {
            match client.get_images(&req) {
                Ok(responses) if responses.is_empty() => missed += 1,
                Ok(_) => served += 1,
                Err(_) => break,
            }
        }
        assert_eq!(served, 4);
        assert_eq!(missed, 1);
        assert_eq!(client.frames_served(), 4);
        Ok(())
    }

    #[test]
    fn float_requests_get_depth_payloads() -> Result<()> {
        let mut client = SyntheticClient::new(SyntheticConfig {
            width: 8,
            height: 2,
            ..SyntheticConfig::default()
        })?;
        client.confirm_connection()?;
        let req = FrameRequest::new("Copter", "0", ImageType::DepthPlanar, true, false);
        let responses = client.get_images(&req)?;
        assert!(responses[0].pixels_as_float);
        assert_eq!(responses[0].image_data_f32.len(), 16);
        assert!(responses[0].image_data_u8.is_empty());
        Ok(())
    }
}
