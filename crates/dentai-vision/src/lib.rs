mod geom;
pub mod backend;
pub mod decode;
pub mod error;
pub mod heuristic;
pub mod labels;
pub mod metrics;
pub mod nms;
pub mod preprocess;
pub mod quant;
pub mod selector;
pub mod service;

#[cfg(feature = "vision-tflite")]
pub mod tflite;
#[cfg(feature = "backend-tract")]
pub mod tract;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use backend::{DetectorBackend, DisabledBackend, ModelBackend, ModelSpec};
pub use error::{DetectError, Result};
pub use geom::Rect;
pub use labels::LabelMap;
pub use metrics::{MetricsCollector, MetricsConfig, MetricsSnapshot};
pub use selector::BackendSelector;
pub use service::{DetectionOutcome, DetectionService};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    /// 0..1
    pub confidence: f32,
    /// normalized 0..1, relative to the source image
    pub bbox: Rect,
}

/// Which backend actually served a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendIdentity {
    Primary,
    Secondary,
    Heuristic,
}

impl BackendIdentity {
    /// Fixed priority order used by the selector.
    pub const PRIORITY: [BackendIdentity; 3] = [
        BackendIdentity::Primary,
        BackendIdentity::Secondary,
        BackendIdentity::Heuristic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendIdentity::Primary => "primary",
            BackendIdentity::Secondary => "secondary",
            BackendIdentity::Heuristic => "heuristic",
        }
    }
}

impl fmt::Display for BackendIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendAvailability {
    pub available: bool,
    pub status: String,
}

impl BackendAvailability {
    pub fn ready(status: impl Into<String>) -> Self {
        Self { available: true, status: status.into() }
    }

    pub fn missing(status: impl Into<String>) -> Self {
        Self { available: false, status: status.into() }
    }
}

/// Postprocessing parameters. Build through [`DetectionParams::new`] to get invariants checked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionParams {
    pub min_confidence: f32,
    pub nms_iou: f32,
    pub max_detections: usize,
}

impl DetectionParams {
    pub fn new(min_confidence: f32, nms_iou: f32, max_detections: usize) -> Result<Self> {
        for (name, v) in [("min_confidence", min_confidence), ("nms_iou", nms_iou)] {
            if !(0.0..=1.0).contains(&v) {
                return Err(DetectError::InvalidConfig(format!("{} must be within 0..1, got {}", name, v)));
            }
        }
        Ok(Self { min_confidence, nms_iou, max_detections })
    }
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self { min_confidence: 0.25, nms_iou: 0.45, max_detections: 100 }
    }
}

/// Resolved configuration handed to the core by its caller.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub primary_enabled: bool,
    pub secondary_enabled: bool,
    pub heuristic_enabled: bool,
    pub fallback_enabled: bool,
    pub min_confidence: f32,
    pub nms_iou: f32,
    pub max_detections: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        let p = DetectionParams::default();
        Self {
            primary_enabled: true,
            secondary_enabled: true,
            heuristic_enabled: true,
            fallback_enabled: true,
            min_confidence: p.min_confidence,
            nms_iou: p.nms_iou,
            max_detections: p.max_detections,
        }
    }
}

impl DetectionConfig {
    pub fn params(&self) -> Result<DetectionParams> {
        DetectionParams::new(self.min_confidence, self.nms_iou, self.max_detections)
    }

    pub fn enables(&self, backend: BackendIdentity) -> bool {
        match backend {
            BackendIdentity::Primary => self.primary_enabled,
            BackendIdentity::Secondary => self.secondary_enabled,
            BackendIdentity::Heuristic => self.heuristic_enabled,
        }
    }
}
