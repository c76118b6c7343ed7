pub mod app;
pub mod chat;
pub mod generation;
pub mod persona;
pub mod settings;

use anyhow::{Context, Result};
use base64::Engine;
use eframe::egui;

/// Decode image bytes into an egui texture.
pub fn texture_from_bytes(
    ctx: &egui::Context,
    name: &str,
    bytes: &[u8],
) -> Result<egui::TextureHandle> {
    let image = image::load_from_memory(bytes).context("Failed to decode image")?;
    let rgba = image.to_rgba8();
    let size = [rgba.width() as usize, rgba.height() as usize];
    let color_image = egui::ColorImage::from_rgba_unmultiplied(size, rgba.as_raw());
    Ok(ctx.load_texture(name, color_image, egui::TextureOptions::LINEAR))
}

pub fn texture_from_base64(
    ctx: &egui::Context,
    name: &str,
    data: &str,
) -> Result<egui::TextureHandle> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .context("Image payload is not valid base64")?;
    texture_from_bytes(ctx, name, &bytes)
}

/// Scale `size` down to fit within `max_side`, keeping the aspect ratio.
pub fn fit_within(size: egui::Vec2, max_side: f32) -> egui::Vec2 {
    let longest = size.x.max(size.y);
    if longest <= max_side || longest <= 0.0 {
        size
    } else {
        size * (max_side / longest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_within_keeps_aspect_ratio() {
        assert_eq!(fit_within(egui::vec2(512.0, 256.0), 256.0), egui::vec2(256.0, 128.0));
        assert_eq!(fit_within(egui::vec2(100.0, 50.0), 256.0), egui::vec2(100.0, 50.0));
    }
}
