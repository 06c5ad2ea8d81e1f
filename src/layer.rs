//! Layers: one image reference plus the metadata derived from it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bbox::BoundingBox;

/// Opaque, stable layer identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(String);

impl LayerId {
    /// Fresh id of the form `<prefix>-<uuid>`.
    #[must_use]
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{prefix}-{}", uuid::Uuid::new_v4().simple()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LayerId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for LayerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Where a layer came from. Only the UI treats kinds differently, except
/// that base-image crops and resets drop `Segment` layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Segment,
    Source,
    Ai,
    Empty,
}

impl LayerKind {
    fn id_prefix(self) -> &'static str {
        match self {
            Self::Segment => "segment",
            Self::Source => "source",
            Self::Ai => "ai",
            Self::Empty => "layer",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerMetadata {
    /// Mask the layer was cut with; always set on segment layers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_url: Option<String>,
    /// Base image the mask was applied to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_base_image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    id: LayerId,
    name: String,
    kind: LayerKind,
    preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    original_preview: Option<String>,
    visible: bool,
    #[serde(default)]
    bbox: Option<BoundingBox>,
    #[serde(default)]
    metadata: LayerMetadata,
}

impl Layer {
    /// A cut-out produced from `mask_url` applied to `base`.
    #[must_use]
    pub fn segment(
        name: impl Into<String>,
        preview: String,
        bbox: Option<BoundingBox>,
        mask_url: impl Into<String>,
        base: impl Into<String>,
    ) -> Self {
        Self {
            id: LayerId::generate(LayerKind::Segment.id_prefix()),
            name: name.into(),
            kind: LayerKind::Segment,
            original_preview: Some(preview.clone()),
            preview: Some(preview),
            visible: true,
            bbox,
            metadata: LayerMetadata {
                mask_url: Some(mask_url.into()),
                original_base_image: Some(base.into()),
            },
        }
    }

    /// Placeholder for a manual adjustment; has no preview until edited.
    #[must_use]
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            id: LayerId::generate(LayerKind::Empty.id_prefix()),
            name: name.into(),
            kind: LayerKind::Empty,
            preview: None,
            original_preview: None,
            visible: true,
            bbox: None,
            metadata: LayerMetadata::default(),
        }
    }

    /// A layer wrapping an existing image, e.g. an imported source or a
    /// generated result.
    #[must_use]
    pub fn from_image(kind: LayerKind, name: impl Into<String>, preview: String) -> Self {
        Self {
            id: LayerId::generate(kind.id_prefix()),
            name: name.into(),
            kind,
            original_preview: Some(preview.clone()),
            preview: Some(preview),
            visible: true,
            bbox: None,
            metadata: LayerMetadata::default(),
        }
    }

    pub fn id(&self) -> &LayerId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    pub fn preview(&self) -> Option<&str> {
        self.preview.as_deref()
    }

    pub fn original_preview(&self) -> Option<&str> {
        self.original_preview.as_deref()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn bbox(&self) -> Option<&BoundingBox> {
        self.bbox.as_ref()
    }

    pub fn metadata(&self) -> &LayerMetadata {
        &self.metadata
    }

    /// What a crop should start from: the pristine preview when there is one.
    pub fn crop_source(&self) -> Option<&str> {
        self.original_preview().or(self.preview())
    }

    /// Whether the layer takes part in rendering and hit-testing.
    pub fn is_hittable(&self) -> bool {
        self.visible && self.preview.is_some()
    }

    pub(crate) fn set_preview(&mut self, preview: String) {
        self.preview = Some(preview);
    }

    pub(crate) fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Restore the preview captured at creation. Returns `false` when there is none.
    pub(crate) fn restore_original(&mut self) -> bool {
        match &self.original_preview {
            Some(original) => {
                self.preview = Some(original.clone());
                true
            }
            None => false,
        }
    }
}
