use anyhow::{Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSummary {
    pub width: u32,
    pub height: u32,
    pub format: String,
}

/// Decode base64 image data, accepting an optional `data:image/...;base64,` prefix.
pub fn decode_base64_image(data: &str) -> Result<(Vec<u8>, ImageSummary)> {
    let trimmed = data.trim();
    let payload = match trimmed.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => trimmed,
    };

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .context("Invalid base64 image data")?;
    let summary = inspect_image_bytes(&bytes)?;
    Ok((bytes, summary))
}

/// Check that bytes are an image the decoder understands and report its size.
pub fn inspect_image_bytes(bytes: &[u8]) -> Result<ImageSummary> {
    let format = image::guess_format(bytes).context("Unrecognized image format")?;
    let decoded = image::load_from_memory_with_format(bytes, format)
        .context("Failed to decode image data")?;

    Ok(ImageSummary {
        width: decoded.width(),
        height: decoded.height(),
        format: format!("{:?}", format).to_ascii_lowercase(),
    })
}

#[cfg(test)]
pub(crate) fn tiny_png_base64() -> String {
    let mut buffer = std::io::Cursor::new(Vec::new());
    image::RgbImage::from_pixel(3, 2, image::Rgb([200, 120, 40]))
        .write_to(&mut buffer, image::ImageFormat::Png)
        .expect("encode png");
    base64::engine::general_purpose::STANDARD.encode(buffer.into_inner())
}
