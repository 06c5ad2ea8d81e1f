use std::sync::Arc;
use std::time::Duration;

use cutout_studio::Error;
use cutout_studio::config::Configuration;
use cutout_studio::crop::{CropPolicy, PixelRect};
use cutout_studio::events::{SegmentEvent, SegmentationResult};
use cutout_studio::hit_test::PercentPoint;
use cutout_studio::layer::LayerKind;
use cutout_studio::session::{EditSource, EditorSession};
use cutout_studio::stack::LayerStack;
use cutout_studio::surface::Surface;
use cutout_studio::tasks::segmenter;
use image::{Rgba, RgbaImage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// White-on-black mask lighting the rectangle `[x0, x1) x [y0, y1)`.
fn rect_mask(w: u32, h: u32, x0: u32, y0: u32, x1: u32, y1: u32) -> String {
    Surface::new(RgbaImage::from_fn(w, h, |x, y| {
        if (x0..x1).contains(&x) && (y0..y1).contains(&y) {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([0, 0, 0, 255])
        }
    }))
    .to_data_uri()
    .unwrap()
}

fn base_image() -> String {
    Surface::new(RgbaImage::from_fn(100, 100, |x, y| {
        Rgba([x as u8, y as u8, 128, 255])
    }))
    .to_data_uri()
    .unwrap()
}

fn session() -> EditorSession {
    let mut s = EditorSession::new(Configuration::default());
    s.open_image(base_image());
    s
}

const BROKEN: &str = "data:image/png;base64,Y29ycnVwdA==";

#[tokio::test]
async fn segments_keep_input_order_and_skip_broken_masks() {
    let mut s = session();
    let masks = vec![
        rect_mask(100, 100, 0, 0, 10, 10),
        BROKEN.to_string(),
        rect_mask(50, 50, 25, 25, 50, 50),
    ];
    let leftover = s.segment(&masks).await.unwrap();

    assert_eq!(leftover.skipped.len(), 1);
    assert_eq!(leftover.skipped[0].index, 1);
    assert!(matches!(leftover.skipped[0].error, Error::Decode { .. }));

    let layers = s.stack().layers();
    assert_eq!(layers.len(), 2);
    assert_eq!(layers[0].name(), "Object 1");
    assert_eq!(layers[1].name(), "Object 3");
    assert_eq!(s.stack().selected(), Some(layers[0].id()));

    for (layer, mask) in layers.iter().zip([&masks[0], &masks[2]]) {
        assert_eq!(layer.kind(), LayerKind::Segment);
        assert_eq!(layer.metadata().mask_url.as_deref(), Some(mask.as_str()));
        assert_eq!(layer.preview(), layer.original_preview());
    }

    let first = layers[0].bbox().unwrap();
    assert!(first.x.abs() < 1e-6 && first.y.abs() < 1e-6);
    assert!((first.width - 10.0).abs() < 1e-6 && (first.height - 10.0).abs() < 1e-6);

    let second = layers[1].bbox().unwrap();
    assert!((second.x - 50.0).abs() < 1e-6 && (second.y - 50.0).abs() < 1e-6);
    assert!((second.width - 50.0).abs() < 1e-6 && (second.height - 50.0).abs() < 1e-6);
}

#[tokio::test]
async fn new_batches_are_prepended() {
    let mut s = session();
    s.segment(&[rect_mask(100, 100, 0, 0, 5, 5)]).await.unwrap();
    let older = s.stack().layers()[0].id().clone();
    s.segment(&[rect_mask(100, 100, 90, 90, 100, 100)]).await.unwrap();
    assert_eq!(s.stack().len(), 2);
    assert_eq!(s.stack().layers()[1].id(), &older);
    assert_ne!(s.stack().selected(), Some(&older));
}

#[tokio::test]
async fn fully_dark_mask_yields_layer_without_bbox() {
    let mut s = session();
    s.segment(&[rect_mask(10, 10, 0, 0, 0, 0)]).await.unwrap();
    let layer = &s.stack().layers()[0];
    assert!(layer.bbox().is_none());
}

#[tokio::test]
async fn segment_needs_a_base_image() {
    let mut s = EditorSession::new(Configuration::default());
    let err = s.segment(&[rect_mask(4, 4, 0, 0, 2, 2)]).await.unwrap_err();
    assert!(matches!(err, Error::NoBaseImage));

    let mut s = EditorSession::new(Configuration::default());
    s.open_image(BROKEN);
    assert!(s.segment(&[rect_mask(4, 4, 0, 0, 2, 2)]).await.is_err());
    assert!(s.stack().is_empty());
}

#[tokio::test]
async fn select_at_resolves_the_cutout_under_the_pointer() {
    let mut s = session();
    s.segment(&[
        rect_mask(100, 100, 0, 0, 50, 100),
        rect_mask(100, 100, 25, 0, 75, 100),
    ])
    .await
    .unwrap();
    let left = s.stack().layers()[0].id().clone();
    let middle = s.stack().layers()[1].id().clone();

    assert_eq!(s.select_at(PercentPoint::new(10.0, 50.0)).await.unwrap(), Some(left.clone()));
    assert_eq!(s.stack().selected(), Some(&left));
    // Overlap: the later (upper) layer wins.
    assert_eq!(s.select_at(PercentPoint::new(30.0, 50.0)).await.unwrap(), Some(middle));
    assert_eq!(s.select_at(PercentPoint::new(90.0, 50.0)).await.unwrap(), None);
    assert_eq!(s.stack().selected(), None);
}

#[tokio::test]
async fn edit_then_reset_restores_original_bits() {
    let mut s = session();
    s.segment(&[rect_mask(100, 100, 10, 10, 20, 20)]).await.unwrap();
    let id = s.stack().selected().cloned().unwrap();
    let created = s.stack().get(&id).unwrap().preview().unwrap().to_owned();

    let edited = Surface::filled(100, 100, [1, 1, 1, 255]).to_data_uri().unwrap();
    s.apply_edit(edited.clone()).unwrap();
    assert_eq!(s.stack().get(&id).unwrap().preview(), Some(edited.as_str()));
    assert_eq!(s.stack().get(&id).unwrap().original_preview(), Some(created.as_str()));

    s.reset().unwrap();
    let restored = s.stack().get(&id).unwrap().preview().unwrap();
    assert_eq!(restored, created);
    let a = s.cache().load(restored).await.unwrap();
    let b = s.cache().load(&created).await.unwrap();
    assert_eq!(a.as_raw(), b.as_raw());
}

#[tokio::test]
async fn layer_crop_starts_from_original_and_keeps_it() {
    let mut s = session();
    s.segment(&[rect_mask(100, 100, 0, 0, 100, 100)]).await.unwrap();
    let id = s.stack().selected().cloned().unwrap();
    let original = s.stack().get(&id).unwrap().original_preview().unwrap().to_owned();

    s.crop(PixelRect::new(10, 20, 30, 40)).await.unwrap();
    s.crop(PixelRect::new(0, 0, 50, 50)).await.unwrap();

    let layer = s.stack().get(&id).unwrap();
    assert_eq!(layer.original_preview(), Some(original.as_str()));
    let cropped = s.cache().load(layer.preview().unwrap()).await.unwrap();
    // Second crop is taken from the pristine 100x100 cut-out, not the 30x40 one.
    assert_eq!(cropped.dimensions(), (50, 50));
    assert_eq!(cropped.pixel(10, 20), Some([10, 20, 128, 255]));
}

#[tokio::test]
async fn failed_crop_changes_nothing() {
    let mut s = session();
    s.segment(&[rect_mask(100, 100, 0, 0, 10, 10)]).await.unwrap();
    let before = s.stack().clone();
    let base_before = s.base_image().map(str::to_owned);

    let err = s.crop(PixelRect::new(90, 90, 20, 20)).await.unwrap_err();
    assert!(matches!(err, Error::CropOutOfBounds { .. }));
    assert_eq!(s.stack(), &before);
    assert_eq!(s.base_image().map(str::to_owned), base_before);
}

#[tokio::test]
async fn clamp_policy_crops_the_overlap() {
    let cfg = Configuration {
        crop_policy: CropPolicy::Clamp,
        ..Configuration::default()
    };
    let mut s = EditorSession::new(cfg);
    s.open_image(base_image());
    s.crop(PixelRect::new(90, 95, 20, 20)).await.unwrap();
    assert_eq!(s.canvas_size().await.unwrap(), (10, 5));
}

#[tokio::test]
async fn base_crop_drops_segments_and_reset_restores_base() {
    let mut s = session();
    let adjustment = s.stack_mut().create_empty();
    s.segment(&[rect_mask(100, 100, 0, 0, 10, 10)]).await.unwrap();
    s.stack_mut().deselect();

    s.crop(PixelRect::new(0, 0, 40, 30)).await.unwrap();
    assert_eq!(s.canvas_size().await.unwrap(), (40, 30));
    assert_eq!(s.stack().len(), 1);
    assert_eq!(s.stack().layers()[0].id(), &adjustment);
    assert_ne!(s.base_image(), s.original_base_image());

    s.stack_mut().deselect();
    s.reset().unwrap();
    assert_eq!(s.base_image(), s.original_base_image());
    assert_eq!(s.canvas_size().await.unwrap(), (100, 100));
}

#[tokio::test]
async fn repeated_base_crops_start_from_the_opened_image() {
    let mut s = session();
    s.crop(PixelRect::new(0, 0, 40, 30)).await.unwrap();
    assert_eq!(s.canvas_size().await.unwrap(), (40, 30));

    // Larger than the first result, so it only fits the pristine 100x100 base.
    s.crop(PixelRect::new(5, 5, 50, 50)).await.unwrap();
    assert_eq!(s.canvas_size().await.unwrap(), (50, 50));
    let base = s.cache().load(s.base_image().unwrap()).await.unwrap();
    assert_eq!(base.pixel(0, 0), Some([5, 5, 128, 255]));
    assert_eq!(base.pixel(49, 49), Some([54, 54, 128, 255]));
}

#[tokio::test]
async fn reset_on_layer_without_original_is_rejected() {
    let mut s = session();
    s.stack_mut().create_empty();
    assert!(matches!(s.reset(), Err(Error::NoOriginalPreview(_))));
}

#[tokio::test]
async fn crop_of_empty_layer_reports_missing_preview() {
    let mut s = session();
    s.stack_mut().create_empty();
    let err = s.crop(PixelRect::new(0, 0, 1, 1)).await.unwrap_err();
    assert!(matches!(err, Error::NoPreview(_)));
}

#[tokio::test]
async fn edit_source_follows_layer_kind() {
    let mut s = session();
    let base = s.base_image().unwrap().to_owned();
    assert_eq!(s.edit_source(), Some(EditSource::Image(base.clone())));

    let mask = rect_mask(100, 100, 0, 0, 10, 10);
    s.segment(std::slice::from_ref(&mask)).await.unwrap();
    assert_eq!(
        s.edit_source(),
        Some(EditSource::Inpaint {
            image: base.clone(),
            mask,
        })
    );

    let generated = Surface::filled(2, 2, [5, 5, 5, 255]).to_data_uri().unwrap();
    s.import_layer(LayerKind::Ai, "Result", generated.clone()).unwrap();
    assert_eq!(s.edit_source(), Some(EditSource::Image(generated)));

    s.stack_mut().create_empty();
    assert_eq!(s.edit_source(), Some(EditSource::Image(base)));
}

#[tokio::test]
async fn edits_outside_segments_replace_the_base_image() {
    let mut s = session();
    let generated = Surface::filled(2, 2, [5, 5, 5, 255]).to_data_uri().unwrap();
    let id = s.import_layer(LayerKind::Ai, "Result", generated.clone()).unwrap();

    let edited = Surface::filled(100, 100, [9, 9, 9, 255]).to_data_uri().unwrap();
    s.apply_edit(edited.clone()).unwrap();
    assert_eq!(s.base_image(), Some(edited.as_str()));
    assert_eq!(s.stack().get(&id).unwrap().preview(), Some(generated.as_str()));
    assert_ne!(s.original_base_image(), Some(edited.as_str()));

    let adjustment = s.stack_mut().create_empty();
    let again = Surface::filled(100, 100, [8, 8, 8, 255]).to_data_uri().unwrap();
    s.apply_edit(again.clone()).unwrap();
    assert_eq!(s.base_image(), Some(again.as_str()));
    assert_eq!(s.stack().get(&adjustment).unwrap().preview(), None);
}

#[tokio::test]
async fn save_and_restore_round_trip() {
    let mut s = session();
    s.segment(&[
        rect_mask(100, 100, 0, 0, 10, 10),
        rect_mask(100, 100, 0, 0, 0, 0),
    ])
    .await
    .unwrap();
    let hidden = s.stack_mut().create_empty();
    s.stack_mut().toggle_visibility(&hidden).unwrap();
    let saved = s.save_layers().unwrap();

    let mut other = session();
    assert_eq!(other.restore_layers(&saved).unwrap(), 3);
    assert_eq!(other.stack().layers(), s.stack().layers());
    assert_eq!(other.stack().selected(), Some(s.stack().layers()[0].id()));
    assert!(!other.stack().get(&hidden).unwrap().is_visible());

    let reparsed = LayerStack::from_json(&saved).unwrap();
    assert_eq!(reparsed.layers(), s.stack().layers());
}

#[tokio::test]
async fn malformed_history_restores_nothing() {
    let mut s = session();
    s.segment(&[rect_mask(100, 100, 0, 0, 10, 10)]).await.unwrap();
    let err = s.restore_layers("{not json").unwrap_err();
    assert!(matches!(err, Error::Serialization(_)));
    assert!(s.stack().is_empty());
    assert!(s.stack().selected().is_none());

    let dup = r#"[
        {"id":"a","name":"A","kind":"empty","preview":null,"visible":true},
        {"id":"a","name":"B","kind":"empty","preview":null,"visible":true}
    ]"#;
    assert!(matches!(s.restore_layers(dup), Err(Error::InconsistentStack(_))));
    assert!(s.stack().is_empty());
}

#[tokio::test]
async fn opening_a_new_image_clears_layers() {
    let mut s = session();
    s.segment(&[rect_mask(100, 100, 0, 0, 10, 10)]).await.unwrap();
    s.open_image(Surface::filled(3, 3, [0, 0, 0, 255]).to_data_uri().unwrap());
    assert!(s.stack().is_empty());
    assert!(s.stack().selected().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn segmenter_task_forwards_batches_in_order() {
    let mut s = session();
    let base = s.base_image().unwrap().to_owned();
    let (results_tx, results_rx) = mpsc::channel(4);
    let (events_tx, mut events_rx) = mpsc::channel(4);
    let cancel = CancellationToken::new();

    let handle = tokio::spawn(segmenter::run(
        results_rx,
        events_tx,
        Arc::clone(s.cache()),
        s.config().clone(),
        cancel.clone(),
    ));

    results_tx
        .send(SegmentationResult {
            base: base.clone(),
            masks: vec![rect_mask(100, 100, 0, 0, 10, 10), BROKEN.into()],
        })
        .await
        .unwrap();
    results_tx
        .send(SegmentationResult {
            base: BROKEN.into(),
            masks: vec![rect_mask(4, 4, 0, 0, 1, 1)],
        })
        .await
        .unwrap();

    let first = tokio::time::timeout(Duration::from_secs(5), events_rx.recv())
        .await
        .expect("timeout waiting for batch")
        .expect("segmenter channel closed");
    match &first {
        SegmentEvent::Ready { batch, .. } => {
            assert_eq!(batch.layers.len(), 1);
            assert_eq!(batch.skipped.len(), 1);
        }
        SegmentEvent::Failed { error, .. } => panic!("unexpected failure: {error}"),
    }
    assert_eq!(s.handle_segment_event(first).unwrap(), 1);
    assert_eq!(s.stack().len(), 1);

    let second = tokio::time::timeout(Duration::from_secs(5), events_rx.recv())
        .await
        .expect("timeout waiting for failure")
        .expect("segmenter channel closed");
    assert!(matches!(second, SegmentEvent::Failed { .. }));
    assert!(s.handle_segment_event(second).is_err());
    assert_eq!(s.stack().len(), 1);

    cancel.cancel();
    let _ = handle.await;
}

#[tokio::test]
async fn stale_batches_are_ignored() {
    let mut s = session();
    let old_base = s.base_image().unwrap().to_owned();
    let masks = [rect_mask(100, 100, 0, 0, 10, 10)];
    let batch = cutout_studio::segment::cut_out_masks(&old_base, &masks, s.cache(), s.config())
        .await
        .unwrap();
    assert_eq!(batch.layers.len(), 1);

    s.open_image(Surface::filled(2, 2, [0, 0, 0, 255]).to_data_uri().unwrap());
    let event = SegmentEvent::Ready {
        base: old_base,
        batch,
    };
    assert_eq!(s.handle_segment_event(event).unwrap(), 0);
    assert!(s.stack().is_empty());
}
