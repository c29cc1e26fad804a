//! Frame normalization applied between acquisition and tracking.

use anyhow::{anyhow, bail, Result};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma, Pixel, Rgb};

use crate::frame::{expected_len, Frame, PixelLayout};

/// Largest accepted scale factor.
pub const MAX_SCALE: f32 = 16.0;

/// Largest width or height a rescaled frame may have.
pub const MAX_OUTPUT_SIDE: u32 = 8192;

/// Uniform rescale of a frame.
///
/// A scale of exactly 1.0 is the identity: `apply` hands the frame back
/// untouched and no resampling cost is paid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameTransform {
    scale: f32,
}

impl FrameTransform {
    pub fn new(scale: f32) -> Result<Self> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(anyhow!("scale must be a finite number > 0, got {}", scale));
        }
        if scale > MAX_SCALE {
            return Err(anyhow!(
                "scale must be at most {}, got {}",
                MAX_SCALE,
                scale
            ));
        }
        Ok(Self { scale })
    }

    pub fn identity() -> Self {
        Self { scale: 1.0 }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn is_identity(&self) -> bool {
        self.scale == 1.0
    }

    /// Rescale `frame`. Fails when the output would exceed
    /// `MAX_OUTPUT_SIDE` on either axis.
    pub fn apply(&self, frame: Frame) -> Result<Frame> {
        if self.is_identity() || frame.is_empty() {
            return Ok(frame);
        }

        let width = scaled_dim(frame.width(), self.scale)?;
        let height = scaled_dim(frame.height(), self.scale)?;
        let layout = frame.layout();
        let expected = expected_len(width, height, layout)?;

        let pixels = match layout {
            PixelLayout::Bgr8 => resize_as::<Rgb<u8>>(&frame, width, height)?,
            PixelLayout::Gray8 => resize_as::<Luma<u8>>(&frame, width, height)?,
        };
        if pixels.len() != expected {
            bail!(
                "resized buffer holds {} bytes, expected {}",
                pixels.len(),
                expected
            );
        }
        Ok(Frame::from_sized(pixels, width, height, layout))
    }
}

impl Default for FrameTransform {
    fn default() -> Self {
        Self::identity()
    }
}

fn scaled_dim(dim: u32, scale: f32) -> Result<u32> {
    let scaled = (dim as f64 * scale as f64).round().max(1.0);
    if scaled > MAX_OUTPUT_SIDE as f64 {
        bail!(
            "scaling {} px by {} gives {} px, above the {} px limit",
            dim,
            scale,
            scaled,
            MAX_OUTPUT_SIDE
        );
    }
    Ok(scaled as u32)
}

// Channel order is irrelevant to the filter, so BGR frames go through as Rgb.
fn resize_as<P>(frame: &Frame, width: u32, height: u32) -> Result<Vec<u8>>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    let src = ImageBuffer::<P, &[u8]>::from_raw(frame.width(), frame.height(), frame.pixels())
        .ok_or_else(|| {
            anyhow!(
                "frame buffer does not hold a {}x{} image",
                frame.width(),
                frame.height()
            )
        })?;
    Ok(imageops::resize(&src, width, height, FilterType::Triangle).into_raw())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Frame {
        let mut data = Vec::new();
        for y in 0..height {
            for x in 0..width {
                let v = (x * 10 + y) as u8;
                data.extend_from_slice(&[v, v, v]);
            }
        }
        Frame::new(data, width, height, PixelLayout::Bgr8).unwrap()
    }

    #[test]
    fn rejects_non_positive_scale() {
        assert!(FrameTransform::new(0.0).is_err());
        assert!(FrameTransform::new(-1.0).is_err());
        assert!(FrameTransform::new(f32::NAN).is_err());
        assert!(FrameTransform::new(0.5).is_ok());
    }

    #[test]
    fn rejects_scale_above_limit() {
        assert!(FrameTransform::new(1e10).is_err());
        assert!(FrameTransform::new(f32::INFINITY).is_err());
        assert!(FrameTransform::new(MAX_SCALE * 2.0).is_err());
        assert!(FrameTransform::new(MAX_SCALE).is_ok());
    }

    #[test]
    fn unit_scale_is_identity() -> Result<()> {
        let frame = gradient(4, 3);
        let out = FrameTransform::new(1.0)?.apply(frame.clone())?;
        assert_eq!(out, frame);
        Ok(())
    }

    #[test]
    fn half_scale_halves_dimensions() -> Result<()> {
        let out = FrameTransform::new(0.5)?.apply(gradient(8, 6))?;
        assert_eq!((out.width(), out.height()), (4, 3));
        assert_eq!(out.pixels().len(), 4 * 3 * 3);
        assert_eq!(out.layout(), PixelLayout::Bgr8);
        Ok(())
    }

    #[test]
    fn upscale_of_uniform_frame_stays_uniform() -> Result<()> {
        let frame = Frame::new(vec![77u8; 2 * 2], 2, 2, PixelLayout::Gray8)?;
        let out = FrameTransform::new(2.5)?.apply(frame)?;
        assert_eq!((out.width(), out.height()), (5, 5));
        assert!(out.pixels().iter().all(|&p| p == 77));
        Ok(())
    }

    #[test]
    fn channel_order_survives_resize() -> Result<()> {
        let frame = Frame::new([5u8, 120, 250].repeat(16), 4, 4, PixelLayout::Bgr8)?;
        let out = FrameTransform::new(0.5)?.apply(frame)?;
        assert!(out.pixels().chunks(3).all(|px| px == [5, 120, 250]));
        Ok(())
    }

    #[test]
    fn tiny_scale_keeps_at_least_one_pixel() -> Result<()> {
        let out = FrameTransform::new(0.01)?.apply(gradient(4, 4))?;
        assert_eq!((out.width(), out.height()), (1, 1));
        Ok(())
    }

    #[test]
    fn oversized_output_is_an_error_not_a_panic() -> Result<()> {
        let frame = Frame::new(vec![0u8; 1024], 1024, 1, PixelLayout::Gray8)?;
        let err = FrameTransform::new(MAX_SCALE)?.apply(frame).unwrap_err();
        assert!(err.to_string().contains("limit"));
        Ok(())
    }
}
