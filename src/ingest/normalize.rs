use anyhow::Result;

use crate::frame::{expected_len, Frame, PixelLayout};

/// One image as returned by the simulator image RPC.
///
/// Exactly one of the payload vectors is populated, selected by
/// `pixels_as_float`. Dimensions are signed on the wire; non-positive values
/// mean the camera had nothing to render.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImageResponse {
    pub width: i32,
    pub height: i32,
    pub pixels_as_float: bool,
    pub compress: bool,
    pub image_data_u8: Vec<u8>,
    pub image_data_f32: Vec<f32>,
}

/// Convert a response into a 3-channel frame.
///
/// Malformed or empty payloads are transient (`Ok(None)`): the simulator
/// regularly answers with an empty image while a camera warms up. Only a
/// response whose dimensions overflow the address space is an error.
pub(crate) fn response_to_frame(response: &ImageResponse) -> Result<Option<Frame>> {
    if response.width <= 0 || response.height <= 0 {
        return Ok(None);
    }
    let width = response.width as u32;
    let height = response.height as u32;

    if response.pixels_as_float {
        return Ok(float_to_colormap(&response.image_data_f32, width, height));
    }
    if response.compress {
        return decode_compressed(&response.image_data_u8);
    }

    let expected = expected_len(width, height, PixelLayout::Bgr8)?;
    if response.image_data_u8.len() != expected {
        log::debug!(
            "raw response length mismatch: expected {}, got {}",
            expected,
            response.image_data_u8.len()
        );
        return Ok(None);
    }
    Ok(Some(Frame::from_sized(
        response.image_data_u8.clone(),
        width,
        height,
        PixelLayout::Bgr8,
    )))
}

/// Min/max normalize a float image to 8 bits, then color-map it.
fn float_to_colormap(values: &[f32], width: u32, height: u32) -> Option<Frame> {
    let count = (width as usize).checked_mul(height as usize)?;
    if values.len() != count {
        log::debug!(
            "float response length mismatch: expected {}, got {}",
            count,
            values.len()
        );
        return None;
    }

    let (min, max) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<(f32, f32)>, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
        .unwrap_or((0.0, 0.0));
    let range = (max - min) as f64;
    let scale = if range > 1e-6 { 255.0 / range } else { 50.0 };

    let mut bgr = Vec::with_capacity(count * 3);
    for &v in values {
        let level = if v.is_finite() {
            ((v - min) as f64 * scale).round().clamp(0.0, 255.0) as u8
        } else {
            0
        };
        let [r, g, b] = viridis(level);
        bgr.extend_from_slice(&[b, g, r]);
    }
    Some(Frame::from_sized(bgr, width, height, PixelLayout::Bgr8))
}

const VIRIDIS_RGB: [[u8; 3]; 9] = [
    [68, 1, 84],
    [71, 44, 122],
    [59, 81, 139],
    [44, 113, 142],
    [33, 144, 141],
    [39, 173, 129],
    [92, 200, 99],
    [170, 220, 50],
    [253, 231, 37],
];

fn viridis(level: u8) -> [u8; 3] {
    let segments = (VIRIDIS_RGB.len() - 1) as f32;
    let pos = level as f32 / 255.0 * segments;
    let lo = (pos.floor() as usize).min(VIRIDIS_RGB.len() - 2);
    let t = pos - lo as f32;
    let a = VIRIDIS_RGB[lo];
    let b = VIRIDIS_RGB[lo + 1];
    std::array::from_fn(|i| (a[i] as f32 + (b[i] as f32 - a[i] as f32) * t).round() as u8)
}

fn decode_compressed(payload: &[u8]) -> Result<Option<Frame>> {
    let image = match image::load_from_memory(payload) {
        Ok(image) => image.into_rgb8(),
        Err(err) => {
            log::debug!("compressed response did not decode: {}", err);
            return Ok(None);
        }
    };
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Ok(None);
    }
    let mut bgr = image.into_raw();
    for px in bgr.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
    Ok(Some(Frame::from_sized(bgr, width, height, PixelLayout::Bgr8)))
}
