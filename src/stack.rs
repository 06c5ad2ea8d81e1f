//! Ordered layer collection and its editing transitions.
//!
//! Index 0 is the bottom of the stack; later layers render and hit-test on
//! top. New layers are prepended. Every transition either applies fully or
//! returns an error with the stack untouched.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::error::Error;
use crate::layer::{Layer, LayerId, LayerKind};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerStack {
    layers: Vec<Layer>,
    selected: Option<LayerId>,
    adjustments_created: u32,
}

impl LayerStack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Layers bottom to top.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Layer> {
        self.layers.iter()
    }

    /// Layers that render, bottom to top.
    pub fn visible(&self) -> impl DoubleEndedIterator<Item = &Layer> {
        self.layers.iter().filter(|l| l.is_hittable())
    }

    pub fn get(&self, id: &LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id() == id)
    }

    fn position(&self, id: &LayerId) -> Result<usize, Error> {
        self.layers
            .iter()
            .position(|l| l.id() == id)
            .ok_or_else(|| Error::LayerNotFound(id.clone()))
    }

    fn get_mut(&mut self, id: &LayerId) -> Result<&mut Layer, Error> {
        let idx = self.position(id)?;
        Ok(&mut self.layers[idx])
    }

    pub fn selected(&self) -> Option<&LayerId> {
        self.selected.as_ref()
    }

    pub fn selected_layer(&self) -> Option<&Layer> {
        self.selected.as_ref().and_then(|id| self.get(id))
    }

    pub fn select(&mut self, id: &LayerId) -> Result<(), Error> {
        self.position(id)?;
        self.selected = Some(id.clone());
        Ok(())
    }

    pub fn deselect(&mut self) {
        self.selected = None;
    }

    /// Prepend one layer and select it.
    ///
    /// # Errors
    /// [`Error::InconsistentStack`] if its id is already present.
    pub fn insert(&mut self, layer: Layer) -> Result<LayerId, Error> {
        self.insert_batch(vec![layer])?;
        self.selected
            .clone()
            .ok_or_else(|| Error::InconsistentStack("inserted layer was not selected".into()))
    }

    /// Prepend `batch` keeping its order, then select its first layer.
    /// An empty batch leaves the stack and selection alone.
    pub fn insert_batch(&mut self, batch: Vec<Layer>) -> Result<(), Error> {
        let mut seen: HashSet<&LayerId> = self.layers.iter().map(Layer::id).collect();
        for layer in &batch {
            if !seen.insert(layer.id()) {
                return Err(Error::InconsistentStack(format!(
                    "duplicate layer id {}",
                    layer.id()
                )));
            }
        }
        let Some(first) = batch.first().map(|l| l.id().clone()) else {
            return Ok(());
        };
        debug!(count = batch.len(), "prepending layers");
        self.layers.splice(0..0, batch);
        self.selected = Some(first);
        Ok(())
    }

    /// Add a fresh `Adjustment n` placeholder, prepended and selected.
    pub fn create_empty(&mut self) -> LayerId {
        self.adjustments_created += 1;
        let layer = Layer::empty(format!("Adjustment {}", self.adjustments_created));
        let id = layer.id().clone();
        self.layers.insert(0, layer);
        self.selected = Some(id.clone());
        id
    }

    /// Replace a layer's preview. Its original preview, position and id stay.
    pub fn edit(&mut self, id: &LayerId, preview: String) -> Result<(), Error> {
        self.get_mut(id)?.set_preview(preview);
        debug!(layer = %id, "layer preview replaced");
        Ok(())
    }

    /// Flip visibility and return the new state.
    pub fn toggle_visibility(&mut self, id: &LayerId) -> Result<bool, Error> {
        let layer = self.get_mut(id)?;
        let visible = !layer.is_visible();
        layer.set_visible(visible);
        Ok(visible)
    }

    pub fn rename(&mut self, id: &LayerId, name: impl Into<String>) -> Result<(), Error> {
        self.get_mut(id)?.rename(name);
        Ok(())
    }

    /// Restore the preview captured at creation.
    ///
    /// # Errors
    /// [`Error::NoOriginalPreview`] when the layer never had one.
    pub fn reset(&mut self, id: &LayerId) -> Result<(), Error> {
        let layer = self.get_mut(id)?;
        if layer.restore_original() {
            Ok(())
        } else {
            Err(Error::NoOriginalPreview(id.clone()))
        }
    }

    /// Move a layer to `index` (clamped to the top).
    pub fn reorder(&mut self, id: &LayerId, index: usize) -> Result<(), Error> {
        let from = self.position(id)?;
        let layer = self.layers.remove(from);
        let to = index.min(self.layers.len());
        self.layers.insert(to, layer);
        Ok(())
    }

    /// Remove a layer. If it was selected, the new first layer (or nothing)
    /// becomes selected.
    pub fn delete(&mut self, id: &LayerId) -> Result<Layer, Error> {
        let idx = self.position(id)?;
        let removed = self.layers.remove(idx);
        if self.selected.as_ref() == Some(id) {
            self.select_first();
        }
        debug!(layer = %id, remaining = self.layers.len(), "layer deleted");
        Ok(removed)
    }

    /// Drop every segment layer; used when the base image changes under them.
    pub fn remove_segments(&mut self) -> usize {
        let before = self.layers.len();
        self.layers.retain(|l| l.kind() != LayerKind::Segment);
        if self.selected.as_ref().is_some_and(|id| self.get(id).is_none()) {
            self.select_first();
        }
        before - self.layers.len()
    }

    pub fn clear(&mut self) {
        self.layers.clear();
        self.selected = None;
    }

    fn select_first(&mut self) {
        self.selected = self.layers.first().map(|l| l.id().clone());
    }

    /// Serialize as a JSON array in stack order.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(&self.layers)?)
    }

    /// Parse a JSON array produced by [`LayerStack::to_json`].
    pub fn from_json(text: &str) -> Result<Self, Error> {
        let layers: Vec<Layer> = serde_json::from_str(text)?;
        validate(&layers)?;
        let adjustments_created = layers
            .iter()
            .filter_map(|l| adjustment_number(l.name()))
            .max()
            .unwrap_or(0);
        let mut stack = Self {
            layers,
            selected: None,
            adjustments_created,
        };
        stack.select_first();
        Ok(stack)
    }

    /// Replace the contents with persisted layers. On failure the stack is
    /// left empty and the error returned for the caller to report.
    pub fn restore(&mut self, text: &str) -> Result<usize, Error> {
        match Self::from_json(text) {
            Ok(restored) => {
                *self = restored;
                Ok(self.len())
            }
            Err(e) => {
                warn!(error = %e, "failed to restore layers; starting empty");
                self.clear();
                Err(e)
            }
        }
    }
}

/// `n` for a layer named `Adjustment n`.
fn adjustment_number(name: &str) -> Option<u32> {
    name.strip_prefix("Adjustment ")?.parse().ok()
}

fn validate(layers: &[Layer]) -> Result<(), Error> {
    let mut ids = HashSet::new();
    for layer in layers {
        if !ids.insert(layer.id()) {
            return Err(Error::InconsistentStack(format!(
                "duplicate layer id {}",
                layer.id()
            )));
        }
        if layer.kind() == LayerKind::Segment && layer.metadata().mask_url.is_none() {
            return Err(Error::InconsistentStack(format!(
                "segment layer {} has no mask reference",
                layer.id()
            )));
        }
        if layer.bbox().is_some_and(|b| !b.is_within_canvas()) {
            return Err(Error::InconsistentStack(format!(
                "layer {} has a bounding box outside the canvas",
                layer.id()
            )));
        }
    }
    Ok(())
}

impl<'a> IntoIterator for &'a LayerStack {
    type Item = &'a Layer;
    type IntoIter = std::slice::Iter<'a, Layer>;

    fn into_iter(self) -> Self::IntoIter {
        self.layers.iter()
    }
}
