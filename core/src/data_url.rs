use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{ExtendedColorType, ImageEncoder, codecs::png::PngEncoder};

use crate::error::{ClipError, Result};

const DATA_URL_PREFIX: &str = "data:image/png;base64,";

pub fn to_data_url(width: usize, height: usize, rgba: &[u8]) -> Result<String> {
    let png = to_png(width, height, rgba)?;
    let mut url = String::with_capacity(DATA_URL_PREFIX.len() + png.len() * 4 / 3 + 4);
    url.push_str(DATA_URL_PREFIX);
    STANDARD.encode_string(&png, &mut url);
    Ok(url)
}

fn to_png(width: usize, height: usize, rgba: &[u8]) -> Result<Vec<u8>> {
    let (w, h) = (dimension(width)?, dimension(height)?);
    let expected = width.saturating_mul(height).saturating_mul(4);
    if rgba.len() != expected {
        return Err(ClipError::ClipboardIo(format!(
            "image buffer is {} bytes, expected {} for {}x{}",
            rgba.len(),
            expected,
            width,
            height
        )));
    }

    let mut png_data = Vec::new();
    PngEncoder::new(&mut png_data).write_image(rgba, w, h, ExtendedColorType::Rgba8)?;
    Ok(png_data)
}

fn dimension(value: usize) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| ClipError::ClipboardIo(format!("image dimension {} too large", value)))
}
