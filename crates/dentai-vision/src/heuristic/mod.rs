//! Non-learned backend.
//!
//! Several cheap structural detectors run over the same grayscale frame, each with its own
//! shape gates and label. Their outputs are merged with an asymmetric overlap rule: two
//! boxes are the same region when their intersection covers more than
//! [`MERGE_OVERLAP`] of *either* box. This is intentionally looser than NMS.

mod detectors;

use image::{imageops::FilterType, DynamicImage, GrayImage};
use serde::Deserialize;
use tracing::debug;

use crate::error::Result;
use crate::preprocess::ensure_pixels;
use crate::{BackendAvailability, BackendIdentity, Detection, DetectionParams, DetectorBackend, Rect};

pub use detectors::{
    contour_regions, rectangular_regions, salient_regions, CONTOUR_LABEL, RECTANGLE_LABEL, SALIENT_LABEL,
};

/// Fraction of either box's area that makes two detections one region.
pub const MERGE_OVERLAP: f32 = 0.3;

/// Shape gates shared by every structural detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeGate {
    pub min_confidence: f32,
    /// width / height
    pub min_aspect: f32,
    pub max_aspect: f32,
    /// fraction of the frame
    pub min_area: f32,
    pub max_area: f32,
}

impl ShapeGate {
    pub(crate) fn admits(&self, rect: &Rect, confidence: f32) -> bool {
        if rect.w <= 0.0 || rect.h <= 0.0 || confidence < self.min_confidence {
            return false;
        }
        let aspect = rect.w / rect.h;
        let area = rect.area();
        (self.min_aspect..=self.max_aspect).contains(&aspect)
            && (self.min_area..=self.max_area).contains(&area)
    }
}

/// Config tables may name any subset of fields; the rest keep their per-detector defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "TuningTable")]
pub struct HeuristicTuning {
    /// Longest side of the working frame; larger inputs are downscaled.
    pub working_size: u32,
    pub rectangle: ShapeGate,
    pub contour: ShapeGate,
    pub saliency: ShapeGate,
    /// Gaussian sigma applied before the saliency map is computed.
    pub saliency_blur: f32,
}

impl Default for HeuristicTuning {
    fn default() -> Self {
        Self {
            working_size: 256,
            rectangle: ShapeGate { min_confidence: 0.8, min_aspect: 0.3, max_aspect: 3.0, min_area: 0.01, max_area: 0.9 },
            contour: ShapeGate { min_confidence: 0.3, min_aspect: 0.2, max_aspect: 5.0, min_area: 0.005, max_area: 0.8 },
            saliency: ShapeGate { min_confidence: 0.4, min_aspect: 0.25, max_aspect: 4.0, min_area: 0.01, max_area: 0.7 },
            saliency_blur: 2.0,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct GateTable {
    min_confidence: Option<f32>,
    min_aspect: Option<f32>,
    max_aspect: Option<f32>,
    min_area: Option<f32>,
    max_area: Option<f32>,
}

impl GateTable {
    fn over(self, base: ShapeGate) -> ShapeGate {
        ShapeGate {
            min_confidence: self.min_confidence.unwrap_or(base.min_confidence),
            min_aspect: self.min_aspect.unwrap_or(base.min_aspect),
            max_aspect: self.max_aspect.unwrap_or(base.max_aspect),
            min_area: self.min_area.unwrap_or(base.min_area),
            max_area: self.max_area.unwrap_or(base.max_area),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TuningTable {
    working_size: Option<u32>,
    rectangle: GateTable,
    contour: GateTable,
    saliency: GateTable,
    saliency_blur: Option<f32>,
}

impl From<TuningTable> for HeuristicTuning {
    fn from(t: TuningTable) -> Self {
        let base = HeuristicTuning::default();
        Self {
            working_size: t.working_size.unwrap_or(base.working_size),
            rectangle: t.rectangle.over(base.rectangle),
            contour: t.contour.over(base.contour),
            saliency: t.saliency.over(base.saliency),
            saliency_blur: t.saliency_blur.unwrap_or(base.saliency_blur),
        }
    }
}

pub struct HeuristicBackend {
    tuning: HeuristicTuning,
}

impl HeuristicBackend {
    pub fn new(tuning: HeuristicTuning) -> Self {
        Self { tuning }
    }

    fn working_frame(&self, image: &DynamicImage) -> GrayImage {
        let gray = image.to_luma8();
        let (w, h) = gray.dimensions();
        let longest = w.max(h);
        let target = self.tuning.working_size.max(16);
        if longest <= target {
            return gray;
        }
        let scale = target as f32 / longest as f32;
        let nw = ((w as f32 * scale).round() as u32).max(1);
        let nh = ((h as f32 * scale).round() as u32).max(1);
        image::imageops::resize(&gray, nw, nh, FilterType::Triangle)
    }
}

impl Default for HeuristicBackend {
    fn default() -> Self {
        Self::new(HeuristicTuning::default())
    }
}

impl DetectorBackend for HeuristicBackend {
    fn identity(&self) -> BackendIdentity {
        BackendIdentity::Heuristic
    }

    fn availability(&self) -> BackendAvailability {
        BackendAvailability::ready("built-in structural detectors")
    }

    fn detect(&self, image: &DynamicImage, params: &DetectionParams) -> Result<Vec<Detection>> {
        ensure_pixels(image)?;
        let gray = self.working_frame(image);

        let rects = rectangular_regions(&gray, &self.tuning.rectangle);
        let contours = contour_regions(&gray, &self.tuning.contour);
        let salient = salient_regions(&gray, self.tuning.saliency_blur, &self.tuning.saliency);
        debug!(
            "heuristic: rect={} contour={} salient={}",
            rects.len(),
            contours.len(),
            salient.len()
        );

        let mut all = rects;
        all.extend(contours);
        all.extend(salient);
        all.retain(|d| d.confidence >= params.min_confidence);

        let mut merged = merge_overlapping(all);
        merged.truncate(params.max_detections);
        Ok(merged)
    }
}

/// True when the shared area exceeds [`MERGE_OVERLAP`] of either box.
pub fn same_region(a: &Rect, b: &Rect) -> bool {
    let inter = a.intersection_area(b);
    inter > MERGE_OVERLAP * a.area() || inter > MERGE_OVERLAP * b.area()
}

/// Keep the most confident detection of every overlapping group.
///
/// Output is sorted by descending confidence (stable), and no two survivors are
/// [`same_region`], so merging the output again returns it unchanged.
pub fn merge_overlapping(mut detections: Vec<Detection>) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for det in detections {
        if kept.iter().all(|k| !same_region(&k.bbox, &det.bbox)) {
            kept.push(det);
        }
    }
    kept
}
