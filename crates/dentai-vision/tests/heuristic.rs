use dentai_vision::heuristic::{merge_overlapping, same_region, HeuristicBackend, HeuristicTuning, RECTANGLE_LABEL};
use dentai_vision::{BackendIdentity, DetectError, DetectionParams, DetectorBackend, Rect};
use image::{DynamicImage, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Light frame with one dark tooth-sized block at x 100..180, y 60..140 (of 320x240).
fn frame() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(320, 240, |x, y| {
        if (100..180).contains(&x) && (60..140).contains(&y) {
            Rgb([40, 30, 30])
        } else {
            Rgb([235, 230, 225])
        }
    }))
}

#[test]
fn heuristic_backend_is_always_available() {
    let b = HeuristicBackend::default();
    assert_eq!(b.identity(), BackendIdentity::Heuristic);
    assert!(b.availability().available);
}

#[test]
fn finds_block_in_synthetic_frame() {
    let b = HeuristicBackend::default();
    let dets = b.detect(&frame(), &DetectionParams::default()).unwrap();
    assert!(!dets.is_empty());

    // the block itself, in source-relative coordinates
    let truth = Rect::new(100.0 / 320.0, 60.0 / 240.0, 80.0 / 320.0, 80.0 / 240.0);
    let best = &dets[0];
    assert_eq!(best.label, RECTANGLE_LABEL);
    assert!(best.bbox.iou(&truth) > 0.9, "got {:?}", best.bbox);

    // merged output holds a single region for a single object
    assert_eq!(dets.len(), 1);
}

#[test]
fn respects_confidence_floor_and_cap() {
    let b = HeuristicBackend::default();
    let strict = DetectionParams::new(1.0, 0.45, 100).unwrap();
    assert!(b.detect(&frame(), &strict).unwrap().iter().all(|d| d.confidence >= 1.0));

    let capped = DetectionParams::new(0.0, 0.45, 0).unwrap();
    assert!(b.detect(&frame(), &capped).unwrap().is_empty());
}

#[test]
fn blank_frame_has_no_detections() {
    let flat = DynamicImage::ImageRgb8(RgbImage::from_pixel(200, 150, Rgb([120, 120, 120])));
    let dets = HeuristicBackend::default().detect(&flat, &DetectionParams::default()).unwrap();
    assert!(dets.is_empty());
}

#[test]
fn empty_image_is_invalid_input() {
    let empty = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
    let err = HeuristicBackend::default().detect(&empty, &DetectionParams::default()).unwrap_err();
    assert!(matches!(err, DetectError::InvalidInput(_)));
}

#[test]
fn large_frames_are_downscaled_consistently() {
    let tuning = HeuristicTuning { working_size: 128, ..HeuristicTuning::default() };
    let dets = HeuristicBackend::new(tuning).detect(&frame(), &DetectionParams::default()).unwrap();
    let truth = Rect::new(100.0 / 320.0, 60.0 / 240.0, 80.0 / 320.0, 80.0 / 240.0);
    assert!(dets.iter().any(|d| d.bbox.iou(&truth) > 0.8));
}

#[test]
fn merge_output_is_a_fixed_point() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..100 {
        let n = rng.gen_range(0..25);
        let input: Vec<_> = (0..n)
            .map(|i| dentai_vision::Detection {
                label: format!("d{}", i),
                confidence: rng.gen_range(0.0..1.0),
                bbox: Rect::new(
                    rng.gen_range(0.0..0.8),
                    rng.gen_range(0.0..0.8),
                    rng.gen_range(0.02..0.3),
                    rng.gen_range(0.02..0.3),
                ),
            })
            .collect();

        let once = merge_overlapping(input);
        for (i, a) in once.iter().enumerate() {
            for b in &once[i + 1..] {
                assert!(!same_region(&a.bbox, &b.bbox));
            }
        }
        assert_eq!(merge_overlapping(once.clone()), once);
    }
}
