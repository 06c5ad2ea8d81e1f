use image::imageops;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::surface::Surface;

/// Rectangle in absolute pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    fn fits_within(&self, width: u32, height: u32) -> bool {
        u64::from(self.x) + u64::from(self.width) <= u64::from(width)
            && u64::from(self.y) + u64::from(self.height) <= u64::from(height)
    }

    /// Intersection with a `width x height` surface anchored at the origin.
    fn clamped_to(&self, width: u32, height: u32) -> Self {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Self {
            x,
            y,
            width: self.width.min(width - x),
            height: self.height.min(height - y),
        }
    }
}

/// Handling of crop rectangles that reach past the source surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CropPolicy {
    /// Fail with [`Error::CropOutOfBounds`]; the output is always exactly the
    /// requested size.
    #[default]
    Reject,
    /// Shrink the rectangle to its overlap with the source; the output is the
    /// size of that overlap.
    Clamp,
}

/// Copy `rect` out of `surface` into a new surface. The source is untouched.
///
/// # Errors
/// [`Error::EmptyCrop`] when the (possibly clamped) rectangle has no area,
/// [`Error::CropOutOfBounds`] under [`CropPolicy::Reject`] when it leaves the source.
pub fn crop(surface: &Surface, rect: PixelRect, policy: CropPolicy) -> Result<Surface, Error> {
    let (sw, sh) = surface.dimensions();
    let rect = if rect.fits_within(sw, sh) {
        rect
    } else {
        match policy {
            CropPolicy::Reject => {
                return Err(Error::CropOutOfBounds {
                    x: rect.x,
                    y: rect.y,
                    width: rect.width,
                    height: rect.height,
                    source_width: sw,
                    source_height: sh,
                });
            }
            CropPolicy::Clamp => rect.clamped_to(sw, sh),
        }
    };
    if rect.width == 0 || rect.height == 0 {
        return Err(Error::EmptyCrop);
    }
    let view = imageops::crop_imm(surface.as_image(), rect.x, rect.y, rect.width, rect.height);
    Ok(Surface::new(view.to_image()))
}
