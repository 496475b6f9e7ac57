//! Image encoding: rendered pages → JPEG bytes, page artifacts → base64.
//!
//! Rendered pages are flattened onto an opaque RGB surface and JPEG-encoded
//! at high quality (95 by default). JPEG keeps a 2× page render to a few
//! hundred kilobytes, which matters because every page shares the model's
//! finite input capacity; at q95 text edges stay legible.

use crate::pipeline::classify::PageArtifact;
use crate::pipeline::request::ImagePart;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use tracing::debug;

/// Encode a rendered page as an opaque JPEG.
///
/// Any alpha channel is dropped: the model sees a white page, never a
/// transparent one.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;
    debug!(
        "Encoded {}x{} page → {} bytes JPEG (q{})",
        rgb.width(),
        rgb.height(),
        buf.len(),
        quality
    );
    Ok(buf)
}

/// Wrap a page artifact as a base64 image part for the model request.
pub fn encode_artifact(artifact: &PageArtifact) -> ImagePart {
    ImagePart {
        label: artifact.label.clone(),
        mime_type: artifact.media_type.clone(),
        data: STANDARD.encode(artifact.data()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_transparent_image_as_jpeg() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 0])));
        let bytes = encode_jpeg(&img, 95).expect("encode should succeed");
        assert!(bytes.starts_with(&[0xFF, 0xD8, 0xFF]), "not a JPEG");

        let decoded = image::load_from_memory(&bytes).expect("decodable");
        assert_eq!(decoded.width(), 10);
        assert!(!decoded.color().has_alpha());
    }

    #[test]
    fn artifact_payload_is_valid_base64() {
        let artifact = PageArtifact::new(0, 0, "a.png", None, "image/png", vec![1u8, 2, 3].into(), None);
        let part = encode_artifact(&artifact);
        assert_eq!(part.mime_type, "image/png");
        assert_eq!(part.label, "a.png");
        assert_eq!(STANDARD.decode(&part.data).unwrap(), vec![1u8, 2, 3]);
    }
}
