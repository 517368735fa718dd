//! Image normalisation for the variation and vision endpoints.

use anyhow::{Context, Result};
use base64::Engine;
use image::ImageFormat;

/// Largest edge sent to the vision model; bigger images are downscaled.
const VISION_MAX_DIM: u32 = 2048;

/// Decode JPEG/PNG bytes and re-encode them as an RGBA PNG, the only input
/// the variation endpoint accepts. Runs on the blocking pool.
pub async fn to_rgba_png(bytes: Vec<u8>) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
        let img = image::load_from_memory(&bytes).context("Unable to decode image")?;
        let rgba = image::DynamicImage::ImageRgba8(img.to_rgba8());
        let mut buf = Vec::new();
        rgba.write_to(&mut std::io::Cursor::new(&mut buf), ImageFormat::Png)
            .context("Unable to encode image as PNG")?;
        Ok(buf)
    })
    .await
    .context("Image conversion task failed")?
}

/// Prepare an image for the vision model: validate it decodes, shrink it when
/// oversized, and return a `data:` URL.
pub async fn to_vision_data_url(bytes: Vec<u8>) -> Result<String> {
    tokio::task::spawn_blocking(move || -> Result<String> {
        let format = image::guess_format(&bytes).context("Unrecognised image format")?;
        let img = image::load_from_memory_with_format(&bytes, format)
            .context("Unable to decode image")?;

        let (encoded, mime) = if img.width() > VISION_MAX_DIM || img.height() > VISION_MAX_DIM {
            let resized = img.thumbnail(VISION_MAX_DIM, VISION_MAX_DIM);
            let mut buf = Vec::new();
            resized
                .write_to(&mut std::io::Cursor::new(&mut buf), ImageFormat::Png)
                .context("Unable to encode resized image")?;
            (buf, "image/png")
        } else {
            let mime = match format {
                ImageFormat::Jpeg => "image/jpeg",
                _ => "image/png",
            };
            (bytes, mime)
        };

        let b64 = base64::engine::general_purpose::STANDARD.encode(&encoded);
        Ok(format!("data:{mime};base64,{b64}"))
    })
    .await
    .context("Image conversion task failed")?
}

/// Decode base64 image data returned by the image endpoints.
pub fn decode_b64_image(data: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .context("Backend returned invalid base64 image data")
}
