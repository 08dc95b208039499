//! Payload encoding for normalized frames.
//!
//! Serializes a [`NormalizedImage`] into a contiguous byte buffer: row-major,
//! little-endian IEEE-754 float32, 4 bytes per sample, no header and no
//! compression. The payload length is always
//! `height * width * channels * 4`.

use crate::decoder::NormalizedImage;
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Bytes per sample in the encoded payload.
pub const SAMPLE_BYTES: usize = std::mem::size_of::<f32>();

/// Errors that can occur while encoding a payload.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Sample buffer length {actual} does not match declared {height}x{width}x{channels} layout (expected {expected})")]
    LayoutMismatch {
        height: u32,
        width: u32,
        channels: u32,
        expected: usize,
        actual: usize,
    },
}

/// Encode a normalized frame into a flat little-endian float32 buffer.
///
/// Deterministic: the same image always yields a byte-identical payload.
pub fn encode_payload(image: &NormalizedImage) -> Result<Bytes, EncodeError> {
    let expected = image.expected_len();
    if image.samples.len() != expected {
        return Err(EncodeError::LayoutMismatch {
            height: image.height,
            width: image.width,
            channels: image.channels,
            expected,
            actual: image.samples.len(),
        });
    }

    let mut buf = BytesMut::with_capacity(expected * SAMPLE_BYTES);
    for &sample in &image.samples {
        buf.put_f32_le(sample);
    }

    Ok(buf.freeze())
}

/// Expected payload length in bytes for the given dimensions.
pub fn payload_len(height: u32, width: u32, channels: u32) -> usize {
    height as usize * width as usize * channels as usize * SAMPLE_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_image(height: u32, width: u32, fill: f32) -> NormalizedImage {
        let len = (height * width * 3) as usize;
        NormalizedImage {
            height,
            width,
            channels: 3,
            samples: vec![fill; len],
        }
    }

    #[test]
    fn test_payload_length_invariant() {
        let image = create_test_image(4, 4, 0.0);
        let payload = encode_payload(&image).unwrap();
        assert_eq!(payload.len(), 192);
        assert_eq!(payload.len(), payload_len(4, 4, 3));
    }

    #[test]
    fn test_zero_image_yields_zero_bytes() {
        let image = create_test_image(4, 4, 0.0);
        let payload = encode_payload(&image).unwrap();
        assert!(payload.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let image = create_test_image(6, 8, 0.25);
        let first = encode_payload(&image).unwrap();
        let second = encode_payload(&image).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_little_endian_sample_layout() {
        let image = NormalizedImage {
            height: 1,
            width: 1,
            channels: 3,
            samples: vec![1.0, 0.5, 0.0],
        };
        let payload = encode_payload(&image).unwrap();
        assert_eq!(&payload[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&payload[4..8], &0.5f32.to_le_bytes());
        assert_eq!(&payload[8..12], &0.0f32.to_le_bytes());
    }

    #[test]
    fn test_layout_mismatch_rejected() {
        let mut image = create_test_image(4, 4, 0.0);
        image.samples.pop();

        let result = encode_payload(&image);
        assert!(matches!(
            result,
            Err(EncodeError::LayoutMismatch {
                expected: 48,
                actual: 47,
                ..
            })
        ));
    }
}
