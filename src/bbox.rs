use serde::{Deserialize, Serialize};

use crate::surface::{CHANNELS, Surface};

/// Axis-aligned rectangle in percent of the surface's width and height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    /// Whether the box lies inside `[0, 100]` on both axes.
    #[must_use]
    pub fn is_within_canvas(&self) -> bool {
        const EPS: f64 = 1e-9;
        self.x >= 0.0
            && self.y >= 0.0
            && self.width >= 0.0
            && self.height >= 0.0
            && self.x + self.width <= 100.0 + EPS
            && self.y + self.height <= 100.0 + EPS
    }

    /// Whether a percentage point falls inside the box.
    #[must_use]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

/// Minimal rectangle enclosing every pixel whose alpha exceeds `threshold`,
/// in percent of the surface size. `None` when no pixel qualifies.
///
/// Single pass over the rows. Within a row only the leftmost present pixel
/// and the columns right of the current `max_x` can change the result, so
/// the right-hand scan stops once it reaches the known bound.
#[must_use]
pub fn extract_bbox(surface: &Surface, threshold: u8) -> Option<BoundingBox> {
    let (width, height) = surface.dimensions();
    if width == 0 || height == 0 {
        return None;
    }
    let w = width as usize;
    let stride = w * CHANNELS;
    let present = |row: &[u8], x: usize| row[x * CHANNELS + 3] > threshold;

    let mut bounds: Option<(usize, usize, usize, usize)> = None; // min_x, min_y, max_x, max_y
    for (y, row) in surface.as_raw().chunks_exact(stride).enumerate() {
        let Some(first) = (0..w).find(|&x| present(row, x)) else {
            continue;
        };
        let right_floor = bounds.map_or(first, |(_, _, max_x, _)| max_x.max(first));
        let last = (right_floor..w)
            .rev()
            .find(|&x| present(row, x))
            .unwrap_or(right_floor);

        bounds = Some(match bounds {
            None => (first, y, last, y),
            Some((min_x, min_y, max_x, _)) => (min_x.min(first), min_y, max_x.max(last), y),
        });
    }

    let (min_x, min_y, max_x, max_y) = bounds?;
    let (wf, hf) = (f64::from(width), f64::from(height));
    Some(BoundingBox {
        x: min_x as f64 / wf * 100.0,
        y: min_y as f64 / hf * 100.0,
        width: (max_x - min_x + 1) as f64 / wf * 100.0,
        height: (max_y - min_y + 1) as f64 / hf * 100.0,
    })
}
