use std::sync::Arc;

use anyhow::Result;
use tokio::select;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Configuration;
use crate::events::{SegmentEvent, SegmentationResult};
use crate::loader::ImageCache;
use crate::segment::cut_out_masks;

/// Consumes segmentation results one at a time and forwards the cut-out
/// layers. Results are processed strictly in arrival order; a new result is
/// not taken until the previous batch has been sent.
pub async fn run(
    mut results_rx: Receiver<SegmentationResult>,
    to_session: Sender<SegmentEvent>,
    cache: Arc<ImageCache>,
    cfg: Configuration,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        select! {
            _ = cancel.cancelled() => {
                info!("cancel received; exiting segmenter task");
                break;
            }

            maybe = results_rx.recv() => {
                let Some(SegmentationResult { base, masks }) = maybe else {
                    debug!("segmentation producer closed");
                    break;
                };
                debug!(masks = masks.len(), "segmentation result received");
                let event = match cut_out_masks(&base, &masks, &cache, &cfg).await {
                    Ok(batch) => SegmentEvent::Ready { base, batch },
                    Err(error) => {
                        warn!(error = %error, "segmentation base image failed to load");
                        SegmentEvent::Failed { base, error }
                    }
                };
                if to_session.send(event).await.is_err() {
                    warn!("session channel closed");
                    break;
                }
            }
        }
    }
    Ok(())
}
