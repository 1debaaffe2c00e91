use std::sync::Arc;
use std::time::Instant;

use image::DynamicImage;
use serde::Serialize;

use crate::error::Result;
use crate::preprocess::load_image;
use crate::{BackendIdentity, BackendSelector, Detection, DetectionConfig, MetricsCollector};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionOutcome {
    pub detections: Vec<Detection>,
    pub served_by: BackendIdentity,
    pub latency_ms: f64,
}

/// Selector plus metrics: one call in, one outcome (and one metrics sample) out.
pub struct DetectionService {
    selector: BackendSelector,
    metrics: Arc<MetricsCollector>,
}

impl DetectionService {
    pub fn new(selector: BackendSelector, metrics: Arc<MetricsCollector>) -> Self {
        Self { selector, metrics }
    }

    pub fn selector(&self) -> &BackendSelector {
        &self.selector
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Failed calls are not measured.
    pub fn detect(&self, image: &DynamicImage, cfg: &DetectionConfig) -> Result<DetectionOutcome> {
        let start = Instant::now();
        let (detections, served_by) = self.selector.detect_with_fallback(image, cfg)?;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        let top = detections.iter().map(|d| d.confidence).fold(0.0f32, f32::max);
        self.metrics.record(latency_ms, top as f64);

        Ok(DetectionOutcome { detections, served_by, latency_ms })
    }

    pub fn detect_encoded(&self, bytes: &[u8], cfg: &DetectionConfig) -> Result<DetectionOutcome> {
        let image = load_image(bytes)?;
        self.detect(&image, cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristic::HeuristicBackend;
    use crate::{DetectError, DisabledBackend};

    fn service() -> DetectionService {
        let selector = BackendSelector::new(
            Box::new(DisabledBackend::new(BackendIdentity::Primary, "no model")),
            Box::new(DisabledBackend::new(BackendIdentity::Secondary, "no model")),
            Box::new(HeuristicBackend::default()),
        );
        DetectionService::new(selector, Arc::new(MetricsCollector::default()))
    }

    #[test]
    fn successful_call_is_recorded() {
        let svc = service();
        let image = DynamicImage::ImageLuma8(image::GrayImage::from_fn(64, 64, |x, y| {
            image::Luma([if (16..40).contains(&x) && (20..44).contains(&y) { 10 } else { 240 }])
        }));
        let out = svc.detect(&image, &DetectionConfig::default()).unwrap();
        assert_eq!(out.served_by, BackendIdentity::Heuristic);
        assert!(!out.detections.is_empty());
        assert_eq!(svc.metrics().snapshot().count, 1);
        assert!(svc.metrics().snapshot().avg_confidence > 0.0);
    }

    #[test]
    fn failed_call_is_not_recorded() {
        let svc = service();
        let cfg = DetectionConfig { fallback_enabled: false, ..DetectionConfig::default() };
        let image = DynamicImage::ImageRgb8(image::RgbImage::new(8, 8));
        let err = svc.detect(&image, &cfg).unwrap_err();
        assert!(matches!(err, DetectError::ModelUnavailable { backend: BackendIdentity::Primary, .. }));
        assert_eq!(svc.metrics().snapshot().count, 0);
    }

    #[test]
    fn undecodable_bytes_are_invalid_input() {
        let svc = service();
        let err = svc.detect_encoded(b"not an image", &DetectionConfig::default()).unwrap_err();
        assert!(matches!(err, DetectError::InvalidInput(_)));
    }
}
