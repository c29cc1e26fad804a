//! Frame and request types shared by the acquisition loop and its collaborators.
//!
//! - `Frame`: owned pixel buffer with validated dimensions.
//! - `Mask`: optional grayscale mask handed to the tracker with every frame.
//! - `FrameRequest`: immutable description of what to fetch from the image source.
//! - `ImageType`: the simulator's camera image kinds.

use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Memory layout of a frame's pixel buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelLayout {
    /// Three interleaved 8-bit channels, blue first.
    Bgr8,
    /// One 8-bit channel.
    Gray8,
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Bgr8 => 3,
            PixelLayout::Gray8 => 1,
        }
    }
}

/// An owned image. The buffer length always matches `width * height * channels`.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    layout: PixelLayout,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, layout: PixelLayout) -> Result<Self> {
        let expected = expected_len(width, height, layout)?;
        if data.len() != expected {
            return Err(anyhow!(
                "frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            layout,
        })
    }

    /// Internal: build from a buffer whose length the caller already computed.
    pub(crate) fn from_sized(data: Vec<u8>, width: u32, height: u32, layout: PixelLayout) -> Self {
        debug_assert_eq!(
            data.len(),
            width as usize * height as usize * layout.channels()
        );
        Self {
            data,
            width,
            height,
            layout,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn channels(&self) -> usize {
        self.layout.channels()
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.data
    }
}

pub(crate) fn expected_len(width: u32, height: u32, layout: PixelLayout) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(layout.channels()))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// Mask
// ----------------------------------------------------------------------------

/// Grayscale mask. Non-zero pixels mark regions the tracker may use.
#[derive(Clone, Debug, PartialEq)]
pub struct Mask {
    frame: Frame,
}

impl Mask {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        Ok(Self {
            frame: Frame::new(data, width, height, PixelLayout::Gray8)?,
        })
    }

    /// Load a mask image from disk, converting it to grayscale.
    pub fn load(path: &Path) -> Result<Self> {
        let image = image::open(path)
            .with_context(|| format!("failed to read mask image {}", path.display()))?
            .into_luma8();
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height)
    }

    pub fn width(&self) -> u32 {
        self.frame.width()
    }

    pub fn height(&self) -> u32 {
        self.frame.height()
    }

    pub fn pixels(&self) -> &[u8] {
        self.frame.pixels()
    }
}

// ----------------------------------------------------------------------------
// FrameRequest
// ----------------------------------------------------------------------------

/// Image kinds a simulator camera can render.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ImageType {
    #[default]
    Scene,
    DepthPerspective,
    DepthPlanar,
    Segmentation,
    Infrared,
    DisparityNormalized,
}

impl ImageType {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageType::Scene => "scene",
            ImageType::DepthPerspective => "depthperspective",
            ImageType::DepthPlanar => "depthplanar",
            ImageType::Segmentation => "segmentation",
            ImageType::Infrared => "infrared",
            ImageType::DisparityNormalized => "disparity",
        }
    }
}

impl FromStr for ImageType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "scene" => Ok(ImageType::Scene),
            "depth" | "depthperspective" => Ok(ImageType::DepthPerspective),
            "depthplanar" => Ok(ImageType::DepthPlanar),
            "segmentation" | "mask" => Ok(ImageType::Segmentation),
            "infrared" => Ok(ImageType::Infrared),
            "disparity" => Ok(ImageType::DisparityNormalized),
            other => Err(anyhow!("unknown image type: {}", other)),
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to ask the image source for on every iteration.
///
/// Built once before the producer starts and never mutated afterwards; there
/// are no setters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameRequest {
    vehicle_name: String,
    camera_name: String,
    image_type: ImageType,
    pixels_as_float: bool,
    compress: bool,
}

impl FrameRequest {
    pub fn new(
        vehicle_name: impl Into<String>,
        camera_name: impl Into<String>,
        image_type: ImageType,
        pixels_as_float: bool,
        compress: bool,
    ) -> Self {
        Self {
            vehicle_name: vehicle_name.into(),
            camera_name: camera_name.into(),
            image_type,
            pixels_as_float,
            compress,
        }
    }

    pub fn vehicle_name(&self) -> &str {
        &self.vehicle_name
    }

    pub fn camera_name(&self) -> &str {
        &self.camera_name
    }

    pub fn image_type(&self) -> ImageType {
        self.image_type
    }

    pub fn pixels_as_float(&self) -> bool {
        self.pixels_as_float
    }

    pub fn compress(&self) -> bool {
        self.compress
    }
}
