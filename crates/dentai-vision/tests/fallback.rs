use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dentai_vision::{
    BackendAvailability, BackendIdentity, BackendSelector, DetectError, Detection, DetectionConfig,
    DetectionParams, DetectorBackend, Rect, Result,
};
use image::DynamicImage;

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    Unavailable,
    /// reports available, then fails inside detect
    Crash,
    /// reports available, then returns a non-recoverable error
    Corrupt,
}

struct Fake {
    identity: BackendIdentity,
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
}

impl DetectorBackend for Fake {
    fn identity(&self) -> BackendIdentity {
        self.identity
    }

    fn availability(&self) -> BackendAvailability {
        match self.behavior {
            Behavior::Unavailable => BackendAvailability::missing("fake missing"),
            _ => BackendAvailability::ready("fake"),
        }
    }

    fn detect(&self, _image: &DynamicImage, _params: &DetectionParams) -> Result<Vec<Detection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Succeed => Ok(vec![Detection {
                label: self.identity.to_string(),
                confidence: 0.9,
                bbox: Rect::new(0.1, 0.1, 0.2, 0.2),
            }]),
            Behavior::Unavailable => Err(DetectError::ModelUnavailable {
                backend: self.identity,
                reason: "fake missing".into(),
            }),
            Behavior::Crash => Err(DetectError::InferenceFailed {
                backend: self.identity,
                detail: "fake crash".into(),
            }),
            Behavior::Corrupt => Err(DetectError::InvalidModelOutput("fake corrupt".into())),
        }
    }
}

struct Rig {
    selector: BackendSelector,
    calls: [Arc<AtomicUsize>; 3],
}

impl Rig {
    fn new(primary: Behavior, secondary: Behavior, heuristic: Behavior) -> Self {
        let calls = [
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicUsize::new(0)),
        ];
        let fake = |identity: BackendIdentity, behavior: Behavior, calls: &Arc<AtomicUsize>| -> Box<dyn DetectorBackend> {
            Box::new(Fake { identity, behavior, calls: calls.clone() })
        };
        let selector = BackendSelector::new(
            fake(BackendIdentity::Primary, primary, &calls[0]),
            fake(BackendIdentity::Secondary, secondary, &calls[1]),
            fake(BackendIdentity::Heuristic, heuristic, &calls[2]),
        );
        Self { selector, calls }
    }

    fn calls(&self) -> [usize; 3] {
        [
            self.calls[0].load(Ordering::SeqCst),
            self.calls[1].load(Ordering::SeqCst),
            self.calls[2].load(Ordering::SeqCst),
        ]
    }
}

fn image() -> DynamicImage {
    DynamicImage::ImageRgb8(image::RgbImage::new(16, 16))
}

fn no_fallback() -> DetectionConfig {
    DetectionConfig { fallback_enabled: false, ..DetectionConfig::default() }
}

#[test]
fn primary_serves_when_available() {
    let rig = Rig::new(Behavior::Succeed, Behavior::Succeed, Behavior::Succeed);
    let (dets, served) = rig.selector.detect_with_fallback(&image(), &DetectionConfig::default()).unwrap();
    assert_eq!(served, BackendIdentity::Primary);
    assert_eq!(dets[0].label, "primary");
    assert_eq!(rig.calls(), [1, 0, 0]);
}

#[test]
fn no_substitution_when_fallback_disabled() {
    let rig = Rig::new(Behavior::Unavailable, Behavior::Succeed, Behavior::Succeed);
    let err = rig.selector.select(&no_fallback()).err().unwrap();
    assert!(matches!(err, DetectError::ModelUnavailable { backend: BackendIdentity::Primary, .. }));

    let err = rig.selector.detect_with_fallback(&image(), &no_fallback()).unwrap_err();
    assert!(matches!(err, DetectError::ModelUnavailable { backend: BackendIdentity::Primary, .. }));
    assert_eq!(rig.calls(), [0, 0, 0]);
}

#[test]
fn runtime_failure_propagates_when_fallback_disabled() {
    let rig = Rig::new(Behavior::Crash, Behavior::Succeed, Behavior::Succeed);
    let err = rig.selector.detect_with_fallback(&image(), &no_fallback()).unwrap_err();
    assert_eq!(
        err,
        DetectError::InferenceFailed { backend: BackendIdentity::Primary, detail: "fake crash".into() }
    );
    assert_eq!(rig.calls(), [1, 0, 0]);
}

#[test]
fn disabled_primary_leaves_secondary_first() {
    let rig = Rig::new(Behavior::Unavailable, Behavior::Succeed, Behavior::Succeed);
    let cfg = DetectionConfig { primary_enabled: false, ..no_fallback() };
    assert_eq!(rig.selector.select(&cfg).unwrap().identity(), BackendIdentity::Secondary);
}

#[test]
fn unavailable_primary_falls_to_secondary() {
    let rig = Rig::new(Behavior::Unavailable, Behavior::Succeed, Behavior::Succeed);
    let cfg = DetectionConfig::default();
    assert_eq!(rig.selector.select(&cfg).unwrap().identity(), BackendIdentity::Secondary);

    let (_, served) = rig.selector.detect_with_fallback(&image(), &cfg).unwrap();
    assert_eq!(served, BackendIdentity::Secondary);
    assert_eq!(rig.calls(), [0, 1, 0]);
}

#[test]
fn runtime_failure_retries_once_on_next_backend() {
    let rig = Rig::new(Behavior::Crash, Behavior::Succeed, Behavior::Succeed);
    let (_, served) = rig.selector.detect_with_fallback(&image(), &DetectionConfig::default()).unwrap();
    assert_eq!(served, BackendIdentity::Secondary);
    assert_eq!(rig.calls(), [1, 1, 0]);
}

#[test]
fn retry_budget_is_one() {
    let rig = Rig::new(Behavior::Crash, Behavior::Crash, Behavior::Succeed);
    let err = rig.selector.detect_with_fallback(&image(), &DetectionConfig::default()).unwrap_err();
    assert!(matches!(err, DetectError::InferenceFailed { backend: BackendIdentity::Secondary, .. }));
    assert_eq!(rig.calls(), [1, 1, 0]);
}

#[test]
fn non_recoverable_error_is_not_retried() {
    let rig = Rig::new(Behavior::Corrupt, Behavior::Succeed, Behavior::Succeed);
    let err = rig.selector.detect_with_fallback(&image(), &DetectionConfig::default()).unwrap_err();
    assert!(matches!(err, DetectError::InvalidModelOutput(_)));
    assert_eq!(rig.calls(), [1, 0, 0]);
}

#[test]
fn all_unavailable_surfaces_last_failure() {
    let rig = Rig::new(Behavior::Unavailable, Behavior::Unavailable, Behavior::Unavailable);
    let err = rig.selector.detect_with_fallback(&image(), &DetectionConfig::default()).unwrap_err();
    assert!(matches!(err, DetectError::ModelUnavailable { backend: BackendIdentity::Heuristic, .. }));
    assert_eq!(rig.calls(), [0, 0, 0]);
}

#[test]
fn nothing_enabled_is_a_config_error() {
    let rig = Rig::new(Behavior::Succeed, Behavior::Succeed, Behavior::Succeed);
    let cfg = DetectionConfig {
        primary_enabled: false,
        secondary_enabled: false,
        heuristic_enabled: false,
        ..DetectionConfig::default()
    };
    let err = rig.selector.detect_with_fallback(&image(), &cfg).unwrap_err();
    assert!(matches!(err, DetectError::InvalidConfig(_)));
}

#[test]
fn invalid_thresholds_fail_before_any_backend_runs() {
    let rig = Rig::new(Behavior::Succeed, Behavior::Succeed, Behavior::Succeed);
    let cfg = DetectionConfig { nms_iou: 1.5, ..DetectionConfig::default() };
    let err = rig.selector.detect_with_fallback(&image(), &cfg).unwrap_err();
    assert!(matches!(err, DetectError::InvalidConfig(_)));
    assert_eq!(rig.calls(), [0, 0, 0]);
}

#[test]
fn availability_is_reported_in_priority_order() {
    let rig = Rig::new(Behavior::Unavailable, Behavior::Succeed, Behavior::Succeed);
    let report = rig.selector.availability();
    let ids: Vec<BackendIdentity> = report.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, BackendIdentity::PRIORITY.to_vec());
    assert!(!report[0].1.available);
    assert!(report[1].1.available);
}
