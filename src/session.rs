//! One editing session: a base image, its layer stack and an image cache.
//!
//! Operations that can fail do all fallible work before touching state, so a
//! failed crop or edit leaves the base image and every layer as they were.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::Configuration;
use crate::crop::{PixelRect, crop};
use crate::error::Error;
use crate::events::SegmentEvent;
use crate::hit_test::{PercentPoint, hit_test};
use crate::layer::{Layer, LayerId, LayerKind};
use crate::loader::ImageCache;
use crate::segment::{SegmentBatch, cut_out_masks};
use crate::stack::LayerStack;

/// What an external edit service should be given for the current selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditSource {
    /// Repaint `image` inside `mask` (segment layers).
    Inpaint { image: String, mask: String },
    /// Transform this image as a whole.
    Image(String),
}

#[derive(Debug)]
pub struct EditorSession {
    cfg: Configuration,
    cache: Arc<ImageCache>,
    stack: LayerStack,
    base: Option<String>,
    original_base: Option<String>,
}

impl EditorSession {
    pub fn new(cfg: Configuration) -> Self {
        let cache = Arc::new(ImageCache::new(&cfg));
        Self::with_cache(cfg, cache)
    }

    pub fn with_cache(cfg: Configuration, cache: Arc<ImageCache>) -> Self {
        Self {
            cfg,
            cache,
            stack: LayerStack::new(),
            base: None,
            original_base: None,
        }
    }

    pub fn config(&self) -> &Configuration {
        &self.cfg
    }

    pub fn cache(&self) -> &Arc<ImageCache> {
        &self.cache
    }

    pub fn stack(&self) -> &LayerStack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut LayerStack {
        &mut self.stack
    }

    pub fn base_image(&self) -> Option<&str> {
        self.base.as_deref()
    }

    pub fn original_base_image(&self) -> Option<&str> {
        self.original_base.as_deref()
    }

    fn require_base(&self) -> Result<&str, Error> {
        self.base.as_deref().ok_or(Error::NoBaseImage)
    }

    /// Start over on a new photo: every layer and the selection are dropped.
    pub fn open_image(&mut self, reference: impl Into<String>) {
        let reference = reference.into();
        self.base = Some(reference.clone());
        self.original_base = Some(reference);
        self.stack.clear();
    }

    /// Forget the base image and all layers.
    pub fn close_image(&mut self) {
        self.base = None;
        self.original_base = None;
        self.stack.clear();
    }

    /// Cut the current base along `masks` and prepend the resulting layers.
    /// The first new layer becomes selected. Returns the batch with layers
    /// moved into the stack and only the skipped masks left in it.
    pub async fn segment(&mut self, masks: &[String]) -> Result<SegmentBatch, Error> {
        let base = self.require_base()?.to_owned();
        let batch = cut_out_masks(&base, masks, &self.cache, &self.cfg).await?;
        self.accept_batch(batch)
    }

    /// Prepend layers produced elsewhere, e.g. by the segmenter task.
    pub fn accept_batch(&mut self, mut batch: SegmentBatch) -> Result<SegmentBatch, Error> {
        let layers = std::mem::take(&mut batch.layers);
        self.stack.insert_batch(layers)?;
        Ok(batch)
    }

    /// Apply a message from the segmenter task. Batches cut from a base that
    /// is no longer current are dropped.
    pub fn handle_segment_event(&mut self, event: SegmentEvent) -> Result<usize, Error> {
        match event {
            SegmentEvent::Ready { base, batch } => {
                if self.base.as_deref() != Some(base.as_str()) {
                    debug!("dropping segments for a base image that is no longer open");
                    return Ok(0);
                }
                let count = batch.layers.len();
                self.accept_batch(batch)?;
                Ok(count)
            }
            SegmentEvent::Failed { error, .. } => Err(error),
        }
    }

    /// Add an existing image as a new selected layer.
    pub fn import_layer(
        &mut self,
        kind: LayerKind,
        name: impl Into<String>,
        reference: String,
    ) -> Result<LayerId, Error> {
        self.stack.insert(Layer::from_image(kind, name, reference))
    }

    /// Pixel size of the base image, which hit-test points are relative to.
    pub async fn canvas_size(&self) -> Result<(u32, u32), Error> {
        let base = self.cache.load(self.require_base()?).await?;
        Ok(base.dimensions())
    }

    /// Topmost visible layer under `point`.
    pub async fn layer_at(&self, point: PercentPoint) -> Result<Option<LayerId>, Error> {
        let size = self.canvas_size().await?;
        Ok(hit_test(self.stack.layers(), point, size, &self.cache).await)
    }

    /// Select whatever is under `point`; clear the selection when nothing is.
    pub async fn select_at(&mut self, point: PercentPoint) -> Result<Option<LayerId>, Error> {
        let hit = self.layer_at(point).await?;
        match &hit {
            Some(id) => self.stack.select(id)?,
            None => self.stack.deselect(),
        }
        Ok(hit)
    }

    /// Crop the selected layer, or the base image when nothing is selected.
    ///
    /// Crops start from the pristine image, so repeated crops do not
    /// compound: a layer's original preview, or the base image as first
    /// opened. A base crop also drops segment layers, whose masks no longer
    /// line up.
    pub async fn crop(&mut self, rect: PixelRect) -> Result<(), Error> {
        let selected = self
            .stack
            .selected_layer()
            .map(|l| (l.id().clone(), l.crop_source().map(str::to_owned)));
        match selected {
            Some((id, source)) => {
                let source = source.ok_or_else(|| Error::NoPreview(id.clone()))?;
                let cropped = self.crop_reference(&source, rect).await?;
                self.stack.edit(&id, cropped)?;
                info!(layer = %id, ?rect, "layer cropped");
            }
            None => {
                let source = self
                    .original_base
                    .clone()
                    .or_else(|| self.base.clone())
                    .ok_or(Error::NoBaseImage)?;
                let cropped = self.crop_reference(&source, rect).await?;
                self.base = Some(cropped);
                let dropped = self.stack.remove_segments();
                info!(?rect, dropped, "base image cropped");
            }
        }
        Ok(())
    }

    async fn crop_reference(&self, reference: &str, rect: PixelRect) -> Result<String, Error> {
        let surface = self.cache.load(reference).await?;
        let cropped = crop(&surface, rect, self.cfg.crop_policy)?;
        let encoded = cropped.to_data_uri()?;
        self.cache.insert(encoded.clone(), cropped);
        Ok(encoded)
    }

    /// Undo destructive edits: the selected layer goes back to its original
    /// preview; with no selection the base image goes back to the one
    /// originally opened and segment layers are dropped.
    pub fn reset(&mut self) -> Result<(), Error> {
        if let Some(id) = self.stack.selected().cloned() {
            return self.stack.reset(&id);
        }
        let original = self.original_base.clone().ok_or(Error::NoBaseImage)?;
        self.base = Some(original);
        self.stack.remove_segments();
        Ok(())
    }

    /// What to hand an edit service for the current selection.
    pub fn edit_source(&self) -> Option<EditSource> {
        let Some(layer) = self.stack.selected_layer() else {
            return self.base.clone().map(EditSource::Image);
        };
        if layer.kind() == LayerKind::Segment
            && let (Some(mask), Some(base)) = (&layer.metadata().mask_url, &self.base)
        {
            return Some(EditSource::Inpaint {
                image: base.clone(),
                mask: mask.clone(),
            });
        }
        layer
            .preview()
            .map(str::to_owned)
            .or_else(|| self.base.clone())
            .map(EditSource::Image)
    }

    /// Install an edit result. An inpainted segment layer takes it as its new
    /// preview; any other selection, or none, makes it the new base image.
    /// Original previews are never replaced.
    pub fn apply_edit(&mut self, reference: String) -> Result<(), Error> {
        let inpainted = self
            .stack
            .selected_layer()
            .filter(|l| l.kind() == LayerKind::Segment && l.metadata().mask_url.is_some())
            .map(|l| l.id().clone());
        if let Some(id) = inpainted {
            return self.stack.edit(&id, reference);
        }
        self.require_base()?;
        self.base = Some(reference);
        Ok(())
    }

    pub fn save_layers(&self) -> Result<String, Error> {
        self.stack.to_json()
    }

    /// Restore persisted layers; on failure the session is left with none.
    pub fn restore_layers(&mut self, text: &str) -> Result<usize, Error> {
        self.stack.restore(text)
    }
}
