//! Candidate decoding from raw per-anchor model output.
//!
//! Row layout: `[cx, cy, w, h, objectness_logit, class_logit_0..N]`, coordinates in
//! model-input pixels. Logits are squashed through a sigmoid here; nothing downstream
//! ever sees a raw logit. No filtering happens at this stage.

use crate::error::{DetectError, Result};

/// Box geometry plus objectness.
pub const BOX_CHANNELS: usize = 5;

/// Raw output tensor handed back by an inference session.
#[derive(Debug, Clone, PartialEq)]
pub struct RawOutput {
    pub data: Vec<f32>,
    pub shape: Vec<usize>,
}

/// Pre-suppression detection hypothesis.
///
/// Scores are fixed at construction; the winning class and confidence are derived from them
/// once and cannot drift.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
    objectness: f32,
    class_scores: Vec<f32>,
    class_index: usize,
    confidence: f32,
}

impl Candidate {
    /// Build from already-activated scores. Fails when there are no class channels.
    pub fn new(cx: f32, cy: f32, w: f32, h: f32, objectness: f32, class_scores: Vec<f32>) -> Result<Self> {
        let class_index = argmax(&class_scores).ok_or_else(|| {
            DetectError::InvalidModelOutput("candidate has zero class channels".into())
        })?;
        let confidence = objectness * class_scores[class_index];
        Ok(Self { cx, cy, w, h, objectness, class_scores, class_index, confidence })
    }

    pub fn objectness(&self) -> f32 {
        self.objectness
    }

    pub fn class_scores(&self) -> &[f32] {
        &self.class_scores
    }

    /// Index of the best class; ties go to the lowest index.
    pub fn class_index(&self) -> usize {
        self.class_index
    }

    pub fn class_score(&self) -> f32 {
        self.class_scores[self.class_index]
    }

    /// `objectness * class_score`.
    pub fn confidence(&self) -> f32 {
        self.confidence
    }
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn argmax(scores: &[f32]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, &s) in scores.iter().enumerate() {
        match best {
            Some(b) if s <= scores[b] => {}
            _ => best = Some(i),
        }
    }
    best
}

/// Decode a flat row-major buffer with `stride` values per anchor.
pub fn decode_rows(data: &[f32], stride: usize) -> Result<Vec<Candidate>> {
    if stride <= BOX_CHANNELS {
        return Err(DetectError::InvalidModelOutput(format!(
            "row stride {} leaves no class channels (need > {})",
            stride, BOX_CHANNELS
        )));
    }
    if data.len() % stride != 0 {
        return Err(DetectError::InvalidModelOutput(format!(
            "buffer length {} is not a multiple of row stride {}",
            data.len(),
            stride
        )));
    }

    let mut out = Vec::with_capacity(data.len() / stride);
    for (i, row) in data.chunks_exact(stride).enumerate() {
        if let Some(bad) = row.iter().position(|v| !v.is_finite()) {
            return Err(DetectError::InvalidModelOutput(format!(
                "non-finite value at anchor {} channel {}",
                i, bad
            )));
        }
        let class_scores = row[BOX_CHANNELS..].iter().map(|&v| sigmoid(v)).collect();
        out.push(Candidate::new(row[0], row[1], row[2], row[3], sigmoid(row[4]), class_scores)?);
    }
    Ok(out)
}

/// Decode a session output, resolving its shape to `(anchors, stride)`.
///
/// Accepts `[1, N, S]` and `[N, S]`. When `num_classes` is known, a channel-major
/// `[1, S, N]` export is detected and transposed first.
pub fn decode_output(raw: &RawOutput, num_classes: Option<usize>) -> Result<Vec<Candidate>> {
    let (anchors, stride, transposed) = match raw.shape.as_slice() {
        [1, a, b] | [a, b] => {
            let (a, b) = (*a, *b);
            match num_classes.map(|n| n + BOX_CHANNELS) {
                Some(s) if b == s => (a, b, false),
                Some(s) if a == s => (b, a, true),
                Some(s) => {
                    return Err(DetectError::InvalidModelOutput(format!(
                        "output dims {:?} do not match {} channels per anchor",
                        raw.shape, s
                    )))
                }
                None => (a, b, false),
            }
        }
        other => {
            return Err(DetectError::InvalidModelOutput(format!(
                "unexpected output dims {:?}",
                other
            )))
        }
    };

    let need = anchors.checked_mul(stride).ok_or_else(|| {
        DetectError::InvalidModelOutput(format!("output dims {:?} overflow", raw.shape))
    })?;
    if raw.data.len() != need {
        return Err(DetectError::InvalidModelOutput(format!(
            "output holds {} values, dims {:?} need {}",
            raw.data.len(),
            raw.shape,
            need
        )));
    }

    if transposed {
        let mut rows = vec![0.0f32; need];
        for c in 0..stride {
            for a in 0..anchors {
                rows[a * stride + c] = raw.data[c * anchors + a];
            }
        }
        decode_rows(&rows, stride)
    } else {
        decode_rows(&raw.data, stride)
    }
}
