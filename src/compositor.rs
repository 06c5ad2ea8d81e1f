use std::borrow::Cow;

use image::RgbaImage;
use image::imageops::resize;

use crate::config::MaskResample;
use crate::surface::Surface;

/// Cut `base` out along `mask`.
///
/// The mask is resampled to the base's size, then each output pixel keeps
/// the base RGB and takes the mask's mean luminance `round((r + g + b) / 3)`
/// as alpha. The base's own alpha is discarded.
#[must_use]
pub fn compose(base: &Surface, mask: &Surface, resample: MaskResample) -> Surface {
    let (width, height) = base.dimensions();
    let mask: Cow<'_, RgbaImage> = if mask.dimensions() == (width, height) {
        Cow::Borrowed(mask.as_image())
    } else {
        Cow::Owned(resize(mask.as_image(), width, height, resample.filter()))
    };

    let mut out = base.as_image().clone();
    for (dst, m) in out.pixels_mut().zip(mask.pixels()) {
        dst[3] = luminance(m[0], m[1], m[2]);
    }
    Surface::new(out)
}

/// Mean of the three channels, rounded half up.
#[inline]
fn luminance(r: u8, g: u8, b: u8) -> u8 {
    let sum = u16::from(r) + u16::from(g) + u16::from(b);
    // round(sum / 3) == floor((2 * sum + 3) / 6)
    ((2 * sum + 3) / 6) as u8
}
