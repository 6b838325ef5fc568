//! Still-image encoding for `Engine::export_image`.

use image::{ColorType, ImageEncoder, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg { quality: u8 },
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg { .. } => "jpg",
        }
    }
}

/// Converts a read-back color target into tightly packed RGBA8. Handles
/// the BGRA surface formats.
pub fn to_rgba8(format: wgpu::TextureFormat, mut pixels: Vec<u8>) -> Vec<u8> {
    if matches!(
        format,
        wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb
    ) {
        for pixel in pixels.chunks_exact_mut(4) {
            pixel.swap(0, 2);
        }
    }
    pixels
}

/// Encodes RGBA8 pixels.
pub fn encode_rgba(width: u32, height: u32, rgba: Vec<u8>, format: ImageFormat) -> EngineResult<Vec<u8>> {
    let image = RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| EngineError::Export(format!("pixel buffer does not match {width}x{height}")))?;
    let mut bytes = Vec::new();
    let result = match format {
        ImageFormat::Png => image::codecs::png::PngEncoder::new(&mut bytes).write_image(
            image.as_raw(),
            width,
            height,
            ColorType::Rgba8,
        ),
        ImageFormat::Jpeg { quality } => {
            let rgb = image::DynamicImage::ImageRgba8(image).to_rgb8();
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100))
                .write_image(rgb.as_raw(), width, height, ColorType::Rgb8)
        }
    };
    result.map_err(|e| EngineError::Export(e.to_string()))?;
    tracing::info!(width, height, ?format, bytes = bytes.len(), "image encoded");
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_signature() {
        let bytes = encode_rgba(2, 2, vec![255; 16], ImageFormat::Png).unwrap();
        assert_eq!(&bytes[..8], &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]);
    }

    #[test]
    fn test_jpeg_signature() {
        let bytes = encode_rgba(4, 4, vec![128; 64], ImageFormat::Jpeg { quality: 80 }).unwrap();
        assert_eq!(&bytes[..2], &[0xff, 0xd8]);
    }

    #[test]
    fn test_size_mismatch_is_an_error() {
        let result = encode_rgba(4, 4, vec![0; 3], ImageFormat::Png);
        assert!(matches!(result, Err(EngineError::Export(_))));
    }

    #[test]
    fn test_bgra_swizzle() {
        let pixels = to_rgba8(wgpu::TextureFormat::Bgra8Unorm, vec![1, 2, 3, 4]);
        assert_eq!(pixels, vec![3, 2, 1, 4]);
    }
}
