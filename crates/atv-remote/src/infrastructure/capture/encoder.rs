//! Frame encoding: PNG screenshot in, base64 JPEG out.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::GenericImageView;

use super::CaptureError;

/// Converts a raw screenshot into the payload carried by a frame.
///
/// Encoding is CPU-bound; callers on the async runtime run it through
/// `spawn_blocking`.
#[cfg_attr(test, mockall::automock)]
pub trait FrameEncoder: Send + Sync {
    /// `quality` is a JPEG quality in `1..=100`.
    fn encode(&self, png: &[u8], quality: u8) -> Result<String, CaptureError>;
}

/// Downscales to at most `max_width` pixels wide, preserving the aspect
/// ratio, then encodes as JPEG and base64.
#[derive(Debug, Clone)]
pub struct JpegFrameEncoder {
    max_width: u32,
}

impl JpegFrameEncoder {
    pub fn new(max_width: u32) -> Self {
        Self {
            max_width: max_width.max(1),
        }
    }
}

impl FrameEncoder for JpegFrameEncoder {
    fn encode(&self, png: &[u8], quality: u8) -> Result<String, CaptureError> {
        let img = image::load_from_memory(png)?;

        let (width, height) = img.dimensions();
        let img = if width > self.max_width {
            let ratio = self.max_width as f64 / width as f64;
            let new_height = ((height as f64 * ratio) as u32).max(1);
            img.resize_exact(self.max_width, new_height, FilterType::Lanczos3)
        } else {
            img
        };

        // JPEG has no alpha channel.
        let rgb = img.to_rgb8();
        let mut jpeg = Vec::new();
        {
            let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100));
            encoder.encode_image(&rgb)?;
        }

        Ok(BASE64.encode(jpeg))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use image::{ImageFormat, Rgba, RgbaImage};

    fn png_of(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([10, 120, 200, 255]));
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .expect("png encode");
        out
    }

    fn decode(payload: &str) -> image::DynamicImage {
        let bytes = BASE64.decode(payload).expect("base64");
        image::load_from_memory_with_format(&bytes, ImageFormat::Jpeg).expect("jpeg")
    }

    #[test]
    fn test_wide_frame_is_downscaled_preserving_aspect_ratio() {
        // Arrange
        let encoder = JpegFrameEncoder::new(800);

        // Act
        let payload = encoder.encode(&png_of(1920, 1080), 85).unwrap();

        // Assert
        assert_eq!(decode(&payload).dimensions(), (800, 450));
    }

    #[test]
    fn test_narrow_frame_keeps_its_size() {
        let encoder = JpegFrameEncoder::new(800);

        let payload = encoder.encode(&png_of(640, 360), 85).unwrap();

        assert_eq!(decode(&payload).dimensions(), (640, 360));
    }

    #[test]
    fn test_lower_quality_produces_smaller_payload() {
        let encoder = JpegFrameEncoder::new(800);
        // A gradient compresses differently at each quality level.
        let img = RgbaImage::from_fn(400, 300, |x, y| Rgba([(x % 256) as u8, (y % 256) as u8, 90, 255]));
        let mut png = Vec::new();
        img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png).unwrap();

        let low = encoder.encode(&png, 10).unwrap();
        let high = encoder.encode(&png, 95).unwrap();

        assert!(low.len() < high.len());
    }

    #[test]
    fn test_invalid_input_is_encode_error() {
        let encoder = JpegFrameEncoder::new(800);
        let result = encoder.encode(b"definitely not a png", 85);
        assert!(matches!(result, Err(CaptureError::Encode(_))));
    }
}
