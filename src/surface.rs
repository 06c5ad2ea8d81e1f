//! Owned RGBA pixel surfaces.
//!
//! A [`Surface`] is never mutated after construction; compositing and
//! cropping always produce a new one.

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{ImageFormat, ImageReader, RgbaImage};

use crate::error::Error;

/// Bytes per RGBA pixel in the flat buffer.
pub const CHANNELS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Surface {
    image: RgbaImage,
}

impl Surface {
    #[must_use]
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    /// Wrap a flat RGBA buffer laid out row-major as `(y * width + x) * 4 + channel`.
    ///
    /// Returns `None` when the buffer length does not match `width * height * 4`.
    #[must_use]
    pub fn from_raw(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        RgbaImage::from_raw(width, height, pixels).map(Self::new)
    }

    /// A surface filled with a single color.
    #[must_use]
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        Self::new(RgbaImage::from_pixel(width, height, image::Rgba(rgba)))
    }

    /// Decode encoded image bytes, sniffing the format from content.
    ///
    /// `reference` is only used to label the error.
    pub fn decode(reference: &str, bytes: &[u8]) -> Result<Self, Error> {
        let img = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| Error::decode(reference, e))?
            .decode()
            .map_err(|e| Error::decode(reference, e))?;
        Ok(Self::new(img.to_rgba8()))
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    #[must_use]
    pub fn as_image(&self) -> &RgbaImage {
        &self.image
    }

    #[must_use]
    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    #[must_use]
    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// Read one pixel; `None` outside the surface.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        self.image.get_pixel_checked(x, y).map(|p| p.0)
    }

    /// Read one pixel's alpha without touching the rest of the buffer.
    #[must_use]
    pub fn alpha_at(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        let idx = (y as usize * self.width() as usize + x as usize) * CHANNELS + 3;
        self.as_raw().get(idx).copied()
    }

    /// Encode as PNG.
    pub fn to_png_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut out = Cursor::new(Vec::new());
        self.image
            .write_to(&mut out, ImageFormat::Png)
            .map_err(|e| Error::Encode(e.to_string()))?;
        Ok(out.into_inner())
    }

    /// Encode as a `data:image/png;base64,...` reference.
    pub fn to_data_uri(&self) -> Result<String, Error> {
        let png = self.to_png_bytes()?;
        Ok(format!("data:image/png;base64,{}", STANDARD.encode(png)))
    }
}

impl From<RgbaImage> for Surface {
    fn from(image: RgbaImage) -> Self {
        Self::new(image)
    }
}
