use thiserror::Error;

use crate::layer::LayerId;

/// Library error type for layer compositing operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An image reference could not be turned into a surface.
    #[error("failed to decode image {reference}: {reason}")]
    Decode { reference: String, reason: String },

    /// A surface could not be encoded back into an image reference.
    #[error("failed to encode surface: {0}")]
    Encode(String),

    /// Persisted layer text is malformed.
    #[error("malformed layer data: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Persisted layer text parsed but violates a stack invariant.
    #[error("inconsistent layer data: {0}")]
    InconsistentStack(String),

    /// No layer with this id exists in the stack.
    #[error("no layer with id {0}")]
    LayerNotFound(LayerId),

    /// Reset was requested on a layer that never captured an original preview.
    #[error("layer {0} has no original preview to restore")]
    NoOriginalPreview(LayerId),

    /// The operation needs a preview but the layer is an empty placeholder.
    #[error("layer {0} has no preview")]
    NoPreview(LayerId),

    /// The session has no base image loaded.
    #[error("no base image loaded")]
    NoBaseImage,

    /// Crop rectangle reaches outside the source surface.
    #[error(
        "crop rectangle {x},{y} {width}x{height} exceeds source bounds {source_width}x{source_height}"
    )]
    CropOutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        source_width: u32,
        source_height: u32,
    },

    /// Crop rectangle selects no pixels.
    #[error("crop rectangle is empty")]
    EmptyCrop,

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// YAML/serde configuration error.
    #[error(transparent)]
    Config(#[from] serde_yaml::Error),
}

impl Error {
    pub(crate) fn decode(reference: &str, reason: impl ToString) -> Self {
        Self::Decode {
            reference: abbreviate(reference),
            reason: reason.to_string(),
        }
    }
}

/// Data URIs can be megabytes long; keep error messages readable.
fn abbreviate(reference: &str) -> String {
    const MAX: usize = 64;
    if reference.len() <= MAX {
        return reference.to_string();
    }
    let mut end = MAX;
    while !reference.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &reference[..end])
}
