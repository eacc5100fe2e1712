//! JPEG encoding for frames the camera did not compress itself.
//!
//! Raw layouts are first normalized to RGB (or kept as luma for grayscale),
//! then handed to `image`'s baseline JPEG encoder.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder as ImageEncoder;
use image::ExtendedColorType;
use std::borrow::Cow;

use crate::frame::{Frame, PixelFormat};

/// Quality used for every transcoded stream frame.
pub const STREAM_JPEG_QUALITY: u8 = 80;

/// JPEG encoder boundary.
pub trait JpegEncoder: Send + Sync {
    /// Encode `frame` into a freshly allocated JPEG buffer.
    fn encode_to_jpeg(&self, frame: &Frame, quality: u8) -> Result<Vec<u8>>;
}

/// Encoder backed by the `image` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImageJpegEncoder;

impl JpegEncoder for ImageJpegEncoder {
    fn encode_to_jpeg(&self, frame: &Frame, quality: u8) -> Result<Vec<u8>> {
        if frame.format.is_jpeg() {
            return Ok(frame.data().to_vec());
        }
        let (pixels, color) = normalize(frame)?;
        let mut out = Vec::with_capacity(frame.len() / 8);
        {
            let mut encoder = ImageEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
            encoder
                .encode(&pixels, frame.width, frame.height, color)
                .context("encode jpeg")?;
        }
        Ok(out)
    }
}

fn normalize(frame: &Frame) -> Result<(Cow<'_, [u8]>, ExtendedColorType)> {
    let expected = expected_len(frame)?;
    if frame.len() != expected {
        return Err(anyhow!(
            "{:?} frame length mismatch: expected {}, got {}",
            frame.format,
            expected,
            frame.len()
        ));
    }
    match frame.format {
        PixelFormat::Rgb888 => Ok((Cow::Borrowed(frame.data()), ExtendedColorType::Rgb8)),
        PixelFormat::Grayscale => Ok((Cow::Borrowed(frame.data()), ExtendedColorType::L8)),
        PixelFormat::Rgb565 => Ok((Cow::Owned(rgb565_to_rgb(frame.data())), ExtendedColorType::Rgb8)),
        PixelFormat::Yuv422 => Ok((Cow::Owned(yuyv_to_rgb(frame.data())), ExtendedColorType::Rgb8)),
        PixelFormat::Jpeg => Err(anyhow!("jpeg frames are not normalized")),
    }
}

fn expected_len(frame: &Frame) -> Result<usize> {
    let bpp = frame
        .format
        .bytes_per_pixel()
        .ok_or_else(|| anyhow!("jpeg frames have no fixed size"))?;
    (frame.width as usize)
        .checked_mul(frame.height as usize)
        .and_then(|v| v.checked_mul(bpp))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

fn rgb565_to_rgb(pixels: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(pixels.len() / 2 * 3);
    for px in pixels.chunks_exact(2) {
        let v = u16::from_be_bytes([px[0], px[1]]);
        let r = ((v >> 11) & 0x1F) as u8;
        let g = ((v >> 5) & 0x3F) as u8;
        let b = (v & 0x1F) as u8;
        rgb.push((r << 3) | (r >> 2));
        rgb.push((g << 2) | (g >> 4));
        rgb.push((b << 3) | (b >> 2));
    }
    rgb
}

fn yuyv_to_rgb(pixels: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(pixels.len() / 2 * 3);
    for quad in pixels.chunks_exact(4) {
        let u = quad[1] as f32 - 128.0;
        let v = quad[3] as f32 - 128.0;
        for y in [quad[0], quad[2]] {
            let y = y as f32;
            rgb.push(clamp_to_u8(y + 1.402_f32 * v));
            rgb.push(clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v));
            rgb.push(clamp_to_u8(y + 1.772_f32 * u));
        }
    }
    rgb
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    #[test]
    fn yuyv_neutral_chroma_produces_gray() {
        let rgb = yuyv_to_rgb(&[128, 128, 128, 128]);
        assert_eq!(rgb, vec![128u8; 6]);
    }

    #[test]
    fn rgb565_white_expands_to_full_scale() {
        let rgb = rgb565_to_rgb(&[0xFF, 0xFF, 0x00, 0x00]);
        assert_eq!(rgb, vec![255, 255, 255, 0, 0, 0]);
    }

    #[test]
    fn encodes_rgb_frame_to_decodable_jpeg() -> Result<()> {
        let frame = Frame::new(vec![90u8; 16 * 8 * 3], PixelFormat::Rgb888, 16, 8);
        let jpeg = ImageJpegEncoder.encode_to_jpeg(&frame, STREAM_JPEG_QUALITY)?;
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);

        let decoded = image::load_from_memory(&jpeg)?;
        assert_eq!(decoded.dimensions(), (16, 8));
        Ok(())
    }

    #[test]
    fn encodes_grayscale_and_yuyv_frames() -> Result<()> {
        let gray = Frame::new(vec![10u8; 8 * 8], PixelFormat::Grayscale, 8, 8);
        assert!(!ImageJpegEncoder.encode_to_jpeg(&gray, 50)?.is_empty());

        let yuyv = Frame::new(vec![128u8; 8 * 8 * 2], PixelFormat::Yuv422, 8, 8);
        assert!(!ImageJpegEncoder.encode_to_jpeg(&yuyv, 50)?.is_empty());
        Ok(())
    }

    #[test]
    fn rejects_short_raw_frames() {
        let frame = Frame::new(vec![0u8; 10], PixelFormat::Rgb888, 4, 4);
        assert!(ImageJpegEncoder.encode_to_jpeg(&frame, 80).is_err());
    }
}
