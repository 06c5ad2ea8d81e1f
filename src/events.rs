use crate::segment::SegmentBatch;

/// Masks returned by the segmentation service for one base image.
#[derive(Debug, Clone)]
pub struct SegmentationResult {
    pub base: String,
    pub masks: Vec<String>,
}

#[derive(Debug)]
pub enum SegmentEvent {
    /// Layers are ready to be prepended to the stack.
    Ready { base: String, batch: SegmentBatch },
    /// The base image could not be loaded; no layers were produced.
    Failed { base: String, error: crate::Error },
}
