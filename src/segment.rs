//! Turns segmentation masks into cut-out layers.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bbox::{BoundingBox, extract_bbox};
use crate::compositor::compose;
use crate::config::Configuration;
use crate::error::Error;
use crate::layer::Layer;
use crate::loader::ImageCache;
use crate::surface::Surface;

/// A mask that could not be turned into a layer.
#[derive(Debug)]
pub struct SkippedMask {
    /// Position in the input mask list.
    pub index: usize,
    pub reference: String,
    pub error: Error,
}

/// Result of processing one segmentation response.
#[derive(Debug, Default)]
pub struct SegmentBatch {
    /// One layer per usable mask, in input order.
    pub layers: Vec<Layer>,
    pub skipped: Vec<SkippedMask>,
}

/// Decode `base`, then for each mask in order: decode, composite, measure
/// and wrap as a segment layer.
///
/// Masks are handled one at a time so output order always matches input
/// order. A mask that fails is recorded in [`SegmentBatch::skipped`] and the
/// rest still run.
///
/// # Errors
/// Only when the base image itself cannot be loaded.
pub async fn cut_out_masks(
    base: &str,
    masks: &[String],
    cache: &ImageCache,
    cfg: &Configuration,
) -> Result<SegmentBatch, Error> {
    let base_surface = cache.load(base).await?;
    let mut batch = SegmentBatch::default();

    for (index, mask_ref) in masks.iter().enumerate() {
        match cut_out_one(base, &base_surface, mask_ref, index, cache, cfg).await {
            Ok(layer) => {
                debug!(index, layer = %layer.id(), bbox = ?layer.bbox(), "mask composed");
                batch.layers.push(layer);
            }
            Err(error) => {
                warn!(index, error = %error, "skipping mask");
                batch.skipped.push(SkippedMask {
                    index,
                    reference: mask_ref.clone(),
                    error,
                });
            }
        }
    }

    info!(
        composed = batch.layers.len(),
        skipped = batch.skipped.len(),
        "segmentation batch complete"
    );
    Ok(batch)
}

async fn cut_out_one(
    base: &str,
    base_surface: &Arc<Surface>,
    mask_ref: &str,
    index: usize,
    cache: &ImageCache,
    cfg: &Configuration,
) -> Result<Layer, Error> {
    let mask = cache.load(mask_ref).await?;
    let base_surface = base_surface.clone();
    let resample = cfg.mask_resample;
    let threshold = cfg.alpha_threshold;

    let (cutout, bbox, preview) = tokio::task::spawn_blocking(
        move || -> Result<(Surface, Option<BoundingBox>, String), Error> {
            let cutout = compose(&base_surface, &mask, resample);
            let bbox = extract_bbox(&cutout, threshold);
            let preview = cutout.to_data_uri()?;
            Ok((cutout, bbox, preview))
        },
    )
    .await
    .map_err(|e| Error::Encode(e.to_string()))??;

    // Later hit tests read this preview; avoid decoding what we just encoded.
    cache.insert(preview.clone(), cutout);
    Ok(Layer::segment(
        format!("Object {}", index + 1),
        preview,
        bbox,
        mask_ref,
        base,
    ))
}
