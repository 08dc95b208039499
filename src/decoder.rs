//! Frame decoding and normalization.
//!
//! This module turns a compressed image byte buffer (JPEG or PNG) into a
//! [`NormalizedImage`]: a fixed-resolution, three-channel float32 array with
//! samples scaled to `[0, 1]`, ready for numeric consumption downstream.

use image::imageops::FilterType;
use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur while decoding a frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed image data: {0}")]
    Malformed(String),

    #[error("Decoded frame has zero dimensions ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },

    #[error("Invalid target resolution ({width}x{height})")]
    InvalidTarget { width: u32, height: u32 },
}

/// Channel order of the normalized output.
///
/// One order is chosen at decoder construction and applied to every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

impl Default for ChannelOrder {
    fn default() -> Self {
        ChannelOrder::Rgb
    }
}

/// A decoded, resized, normalized frame.
///
/// Samples are stored row-major as `height * width * channels` float32
/// values in `[0, 1]`. The struct is exclusively owned by the pipeline
/// stage processing it and is never shared across concurrent publishes.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedImage {
    /// Height in pixels
    pub height: u32,

    /// Width in pixels
    pub width: u32,

    /// Number of color channels (always 3 for decoder output)
    pub channels: u32,

    /// Row-major samples, `height * width * channels` values
    pub samples: Vec<f32>,
}

impl NormalizedImage {
    /// Expected number of samples given the declared dimensions.
    pub fn expected_len(&self) -> usize {
        self.height as usize * self.width as usize * self.channels as usize
    }

    /// Shape as `(height, width, channels)`.
    pub fn shape(&self) -> (u32, u32, u32) {
        (self.height, self.width, self.channels)
    }
}

/// Decoder producing [`NormalizedImage`] values at a fixed target resolution.
///
/// Resizing always uses bilinear interpolation ([`FilterType::Triangle`]);
/// normalization divides each 8-bit sample by 255. Both policies are fixed
/// so that decoding the same bytes twice yields bit-identical output.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    target_width: u32,
    target_height: u32,
    channel_order: ChannelOrder,
}

impl FrameDecoder {
    /// Create a decoder for the given target resolution and channel order.
    pub fn new(
        target_width: u32,
        target_height: u32,
        channel_order: ChannelOrder,
    ) -> Result<Self, DecodeError> {
        if target_width == 0 || target_height == 0 {
            return Err(DecodeError::InvalidTarget {
                width: target_width,
                height: target_height,
            });
        }

        Ok(Self {
            target_width,
            target_height,
            channel_order,
        })
    }

    /// Target resolution as `(width, height)`.
    pub fn target_resolution(&self) -> (u32, u32) {
        (self.target_width, self.target_height)
    }

    /// Channel order applied to decoded frames.
    pub fn channel_order(&self) -> ChannelOrder {
        self.channel_order
    }

    /// Decode compressed image bytes into a normalized frame.
    ///
    /// Pure transform: no I/O, no shared state. Fails with
    /// [`DecodeError::Malformed`] when the bytes are not a valid image and
    /// [`DecodeError::EmptyFrame`] when the decoded frame has no pixels.
    pub fn decode(&self, data: &[u8]) -> Result<NormalizedImage, DecodeError> {
        let img = image::load_from_memory(data)
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;

        if img.width() == 0 || img.height() == 0 {
            return Err(DecodeError::EmptyFrame {
                width: img.width(),
                height: img.height(),
            });
        }

        let resized = img.resize_exact(
            self.target_width,
            self.target_height,
            FilterType::Triangle,
        );
        let rgb = resized.to_rgb8();

        let mut samples =
            Vec::with_capacity(sample_capacity(self.target_width, self.target_height));

        for pixel in rgb.pixels() {
            let [r, g, b] = pixel.0;
            match self.channel_order {
                ChannelOrder::Rgb => {
                    samples.push(f32::from(r) / 255.0);
                    samples.push(f32::from(g) / 255.0);
                    samples.push(f32::from(b) / 255.0);
                }
                ChannelOrder::Bgr => {
                    samples.push(f32::from(b) / 255.0);
                    samples.push(f32::from(g) / 255.0);
                    samples.push(f32::from(r) / 255.0);
                }
            }
        }

        Ok(NormalizedImage {
            height: self.target_height,
            width: self.target_width,
            channels: 3,
            samples,
        })
    }
}

/// Sample count for a three-channel frame, computed in usize so large
/// target resolutions do not overflow 32-bit arithmetic.
fn sample_capacity(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;

    fn encode_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let buf: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_pixel(width, height, Rgb(color));
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(buf)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_zero_image() {
        let png = encode_png(10, 10, [0, 0, 0]);
        let decoder = FrameDecoder::new(4, 4, ChannelOrder::Rgb).unwrap();
        let img = decoder.decode(&png).unwrap();

        assert_eq!(img.shape(), (4, 4, 3));
        assert_eq!(img.samples.len(), 48);
        assert!(img.samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_decode_is_deterministic() {
        let png = encode_png(16, 12, [37, 142, 250]);
        let decoder = FrameDecoder::new(8, 6, ChannelOrder::Rgb).unwrap();

        let first = decoder.decode(&png).unwrap();
        let second = decoder.decode(&png).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_decode_normalizes_to_unit_range() {
        let png = encode_png(8, 8, [255, 128, 0]);
        let decoder = FrameDecoder::new(8, 8, ChannelOrder::Rgb).unwrap();
        let img = decoder.decode(&png).unwrap();

        assert_eq!(img.samples[0], 1.0);
        assert_eq!(img.samples[1], 128.0 / 255.0);
        assert_eq!(img.samples[2], 0.0);
        assert!(img.samples.iter().all(|&s| (0.0..=1.0).contains(&s)));
    }

    #[test]
    fn test_bgr_order_swaps_channels() {
        let png = encode_png(4, 4, [200, 100, 50]);

        let rgb = FrameDecoder::new(4, 4, ChannelOrder::Rgb)
            .unwrap()
            .decode(&png)
            .unwrap();
        let bgr = FrameDecoder::new(4, 4, ChannelOrder::Bgr)
            .unwrap()
            .decode(&png)
            .unwrap();

        assert_eq!(rgb.samples[0], bgr.samples[2]);
        assert_eq!(rgb.samples[1], bgr.samples[1]);
        assert_eq!(rgb.samples[2], bgr.samples[0]);
    }

    #[test]
    fn test_decode_malformed_bytes() {
        let decoder = FrameDecoder::new(4, 4, ChannelOrder::Rgb).unwrap();
        let result = decoder.decode(b"definitely not an image");
        assert!(matches!(result, Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_invalid_target_resolution() {
        assert!(matches!(
            FrameDecoder::new(0, 240, ChannelOrder::Rgb),
            Err(DecodeError::InvalidTarget { .. })
        ));
        assert!(matches!(
            FrameDecoder::new(352, 0, ChannelOrder::Rgb),
            Err(DecodeError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn test_sample_capacity_large_resolution() {
        assert_eq!(sample_capacity(4, 4), 48);
        // 65535 * 65535 * 3 exceeds u32::MAX; the capacity math must not
        // wrap for resolutions the config does not cap.
        assert_eq!(sample_capacity(65_535, 65_535), 65_535usize * 65_535 * 3);
    }

    #[test]
    fn test_decode_jpeg_input() {
        let buf: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_pixel(20, 20, Rgb([90, 90, 90]));
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(buf)
            .write_to(&mut out, ImageFormat::Jpeg)
            .unwrap();

        let decoder = FrameDecoder::new(10, 10, ChannelOrder::Rgb).unwrap();
        let img = decoder.decode(&out.into_inner()).unwrap();
        assert_eq!(img.shape(), (10, 10, 3));
    }
}
