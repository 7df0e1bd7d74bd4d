//! Turns fetched bytes into an RGBA8 buffer sized for the current window.

use std::io::Cursor;

use fast_image_resize as fir;
use image::RgbaImage;
use tracing::debug;

use crate::error::FetchError;
use crate::processing::layout::{Dimensions, target_size};

/// Decoded pixels ready for the rendering surface.
#[derive(Clone)]
pub struct DecodedImage {
    /// RGBA8 pixels, row-major, `size.width * size.height * 4` bytes.
    pub pixels: Vec<u8>,
    /// Dimensions the pixels were resized to.
    pub size: Dimensions,
    /// Dimensions after EXIF orientation, before resizing.
    pub original: Dimensions,
    /// Window the target size was computed for.
    pub window: Dimensions,
}

impl std::fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedImage")
            .field("size", &self.size)
            .field("original", &self.original)
            .field("window", &self.window)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Decode, orient and resize `bytes` for `window`.
pub fn prepare(bytes: &[u8], window: Dimensions, max_resize: f32) -> Result<DecodedImage, FetchError> {
    let img = decode_rgba8_apply_exif(bytes)?;
    let original = Dimensions::new(img.width(), img.height());
    let size = target_size(original, window, max_resize);
    let resized = resize_rgba(img, size)?;
    Ok(DecodedImage {
        pixels: resized.into_raw(),
        size,
        original,
        window,
    })
}

// Orientation handling is best-effort; missing metadata keeps the stored orientation.
fn decode_rgba8_apply_exif(bytes: &[u8]) -> Result<RgbaImage, FetchError> {
    let img = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| FetchError::Decode(e.to_string()))?
        .decode()
        .map_err(|e| FetchError::Decode(e.to_string()))?;
    let img = img.to_rgba8();

    let oriented = match read_orientation(bytes).unwrap_or(1) {
        2 => image::imageops::flip_horizontal(&img),
        3 => image::imageops::rotate180(&img),
        4 => image::imageops::flip_vertical(&img),
        5 => image::imageops::flip_horizontal(&image::imageops::rotate90(&img)),
        6 => image::imageops::rotate90(&img),
        7 => image::imageops::flip_horizontal(&image::imageops::rotate270(&img)),
        8 => image::imageops::rotate270(&img),
        _ => img,
    };
    Ok(oriented)
}

fn read_orientation(bytes: &[u8]) -> Option<u16> {
    let exif = exif::Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let o = field.value.get_uint(0)? as u16;
    debug!(orientation = o, "exif orientation");
    Some(o)
}

fn resize_rgba(source: RgbaImage, target: Dimensions) -> Result<RgbaImage, FetchError> {
    if source.width() == target.width && source.height() == target.height {
        return Ok(source);
    }

    let src_view = fir::images::ImageRef::new(
        source.width(),
        source.height(),
        source.as_raw(),
        fir::PixelType::U8x4,
    )
    .map_err(|e| FetchError::Decode(format!("resize source view: {e}")))?;
    let mut dst_image = fir::images::Image::new(target.width, target.height, fir::PixelType::U8x4);
    let options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::CatmullRom));
    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_view, &mut dst_image, Some(&options))
        .map_err(|e| FetchError::Decode(format!("resize failed: {e}")))?;
    RgbaImage::from_raw(target.width, target.height, dst_image.into_vec())
        .ok_or_else(|| FetchError::Decode("resized buffer has unexpected length".into()))
}
