// Textures as seen by the renderer facade.
//
// GPU-side data lives in the backend and is addressed by a `TextureHandle`.
// Consumers detect staleness through `generation`, never through identity:
// a reloaded texture may get a handle that compares equal to the old one.

use anyhow::{Context, Result};
use std::path::Path;

/// Sentinel for "no generation yet" / "never synced".
pub const INVALID_ID: u32 = u32::MAX;

/// Channels every texture is expanded to on upload.
pub const TEXTURE_CHANNELS: u32 = 4;

slotmap::new_key_type! {
    /// Backend-owned GPU data for a texture.
    pub struct TextureHandle;
}

/// Index of a texture owned by the renderer facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub(crate) usize);

#[derive(Debug, Clone)]
pub struct Texture {
    pub id: u32,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub channel_count: u32,
    pub has_transparency: bool,
    /// `INVALID_ID` until the first successful upload, then strictly increasing.
    pub generation: u32,
    pub handle: Option<TextureHandle>,
}

impl Texture {
    /// An empty texture that has never been loaded.
    pub fn new(id: u32, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            width: 0,
            height: 0,
            channel_count: 0,
            has_transparency: false,
            generation: INVALID_ID,
            handle: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.generation != INVALID_ID
    }

    /// Size in bytes the pixel data for this texture must have.
    pub fn expected_size(&self) -> usize {
        self.width as usize * self.height as usize * self.channel_count as usize
    }
}

/// Generation after a successful (re)upload.
pub fn next_generation(current: u32) -> u32 {
    if current == INVALID_ID {
        0
    } else {
        current + 1
    }
}

/// Decoded RGBA8 pixels ready for upload.
#[derive(Debug, Clone)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub channel_count: u32,
    pub has_transparency: bool,
    pub pixels: Vec<u8>,
}

/// Decode a PNG into RGBA8, flipped so row 0 is the bottom of the image.
pub fn decode_png(path: &Path) -> Result<TextureData> {
    let image = image::open(path)
        .with_context(|| format!("Failed to load texture: {:?}", path))?
        .flipv()
        .into_rgba8();

    let (width, height) = image.dimensions();
    let pixels = image.into_raw();
    let has_transparency = has_transparency(&pixels, TEXTURE_CHANNELS);

    Ok(TextureData {
        width,
        height,
        channel_count: TEXTURE_CHANNELS,
        has_transparency,
        pixels,
    })
}

/// True if any pixel has alpha below 255.
pub fn has_transparency(pixels: &[u8], channel_count: u32) -> bool {
    if channel_count < 4 {
        return false;
    }
    pixels
        .chunks_exact(channel_count as usize)
        .any(|pixel| pixel[3] < 255)
}

/// Blue/white checkerboard used as the default diffuse texture.
pub fn checkerboard(dimension: u32) -> Vec<u8> {
    let channels = TEXTURE_CHANNELS as usize;
    let mut pixels = vec![255u8; dimension as usize * dimension as usize * channels];

    for row in 0..dimension as usize {
        for col in 0..dimension as usize {
            // blue on (odd, odd) and (even, even)
            if row % 2 == col % 2 {
                let index = (row * dimension as usize + col) * channels;
                pixels[index] = 0;
                pixels[index + 1] = 0;
            }
        }
    }

    pixels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_starts_at_zero_then_increments() {
        assert_eq!(next_generation(INVALID_ID), 0);
        assert_eq!(next_generation(0), 1);
        assert_eq!(next_generation(41), 42);
    }

    #[test]
    fn new_texture_is_not_loaded() {
        let texture = Texture::new(3, "paving");
        assert!(!texture.is_loaded());
        assert_eq!(texture.generation, INVALID_ID);
        assert!(texture.handle.is_none());
    }

    #[test]
    fn checkerboard_pattern() {
        let pixels = checkerboard(4);
        assert_eq!(pixels.len(), 4 * 4 * 4);
        // (0,0) blue
        assert_eq!(&pixels[0..4], &[0, 0, 255, 255]);
        // (0,1) white
        assert_eq!(&pixels[4..8], &[255, 255, 255, 255]);
        // (1,1) blue
        let index = (4 + 1) * 4;
        assert_eq!(&pixels[index..index + 4], &[0, 0, 255, 255]);
        assert!(!has_transparency(&pixels, 4));
    }

    #[test]
    fn transparency_detection() {
        let opaque = [10, 20, 30, 255, 1, 2, 3, 255];
        let translucent = [10, 20, 30, 255, 1, 2, 3, 128];
        assert!(!has_transparency(&opaque, 4));
        assert!(has_transparency(&translucent, 4));
        assert!(!has_transparency(&[1, 2, 3], 3));
    }

    #[test]
    fn decode_png_flips_and_expands_to_rgba() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("two_rows.png");

        // top row red, bottom row half-transparent green
        let mut source = image::RgbaImage::new(1, 2);
        source.put_pixel(0, 0, image::Rgba([255, 0, 0, 255]));
        source.put_pixel(0, 1, image::Rgba([0, 255, 0, 128]));
        source.save(&path).unwrap();

        let data = decode_png(&path).unwrap();
        assert_eq!((data.width, data.height, data.channel_count), (1, 2, 4));
        assert_eq!(&data.pixels[0..4], &[0, 255, 0, 128]);
        assert_eq!(&data.pixels[4..8], &[255, 0, 0, 255]);
        assert!(data.has_transparency);
    }

    #[test]
    fn decode_missing_png_fails() {
        assert!(decode_png(Path::new("nowhere/missing.png")).is_err());
    }
}
