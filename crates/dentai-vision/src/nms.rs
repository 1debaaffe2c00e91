use crate::decode::Candidate;
use crate::geom::Rect;
use crate::DetectionParams;

/// Confidence filter followed by greedy class-agnostic NMS.
///
/// Output is ordered by descending confidence; equal confidences keep their input order.
pub fn postprocess(candidates: Vec<Candidate>, params: &DetectionParams) -> Vec<Candidate> {
    let survivors: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| c.confidence() >= params.min_confidence)
        .collect();
    if survivors.is_empty() || params.max_detections == 0 {
        return Vec::new();
    }

    let rects: Vec<Rect> = survivors
        .iter()
        .map(|c| Rect::from_center(c.cx, c.cy, c.w, c.h))
        .collect();

    let mut order: Vec<usize> = (0..survivors.len()).collect();
    // sort_by is stable
    order.sort_by(|&a, &b| {
        survivors[b]
            .confidence()
            .partial_cmp(&survivors[a].confidence())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut suppressed = vec![false; survivors.len()];
    let mut keep: Vec<usize> = Vec::new();

    for (pos, &i) in order.iter().enumerate() {
        if suppressed[i] {
            continue;
        }
        keep.push(i);
        if keep.len() == params.max_detections {
            break;
        }
        for &j in &order[pos + 1..] {
            if !suppressed[j] && rects[i].iou(&rects[j]) >= params.nms_iou {
                suppressed[j] = true;
            }
        }
    }

    let mut slots: Vec<Option<Candidate>> = survivors.into_iter().map(Some).collect();
    keep.into_iter().filter_map(|i| slots[i].take()).collect()
}
