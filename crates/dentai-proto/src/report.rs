use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServedBy {
    Primary,
    Secondary,
    Heuristic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub label: String,
    pub confidence: f32,
    // normalized 0..1, top-left origin
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

/// One line of `dentai detect` output per image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub ts_unix_ms: i64,
    pub image: String,
    /// Absent when the call failed.
    pub served_by: Option<ServedBy>,
    pub latency_ms: Option<f64>,
    pub detections: Vec<DetectionRecord>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub ts_unix_ms: i64,
    pub count: u64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub avg_confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendStatusRecord {
    pub backend: ServedBy,
    pub enabled: bool,
    pub available: bool,
    pub status: String,
}
