use image::{GrayImage, Luma};
use imageproc::contrast::otsu_level;
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::gradients::sobel_gradients;
use imageproc::morphology::dilate;
use imageproc::region_labelling::{connected_components, Connectivity};

use super::ShapeGate;
use crate::{Detection, Rect};

pub const RECTANGLE_LABEL: &str = "rectangular_region";
pub const CONTOUR_LABEL: &str = "contour_region";
pub const SALIENT_LABEL: &str = "salient_region";

/// Bounding box and score accumulator of one connected component.
#[derive(Debug, Clone, Copy)]
struct Blob {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    pixels: u32,
    score_sum: f32,
    scored: u32,
}

impl Blob {
    fn at(x: u32, y: u32) -> Self {
        Self { min_x: x, min_y: y, max_x: x, max_y: y, pixels: 0, score_sum: 0.0, scored: 0 }
    }

    fn box_area(&self) -> u32 {
        (self.max_x - self.min_x + 1) * (self.max_y - self.min_y + 1)
    }

    fn mean_score(&self) -> f32 {
        if self.scored == 0 { 0.0 } else { self.score_sum / self.scored as f32 }
    }

    fn rect(&self, width: u32, height: u32) -> Rect {
        let (w, h) = (width as f32, height as f32);
        Rect::new(
            self.min_x as f32 / w,
            self.min_y as f32 / h,
            (self.max_x - self.min_x + 1) as f32 / w,
            (self.max_y - self.min_y + 1) as f32 / h,
        )
    }
}

/// Label 8-connected foreground (non-zero) regions of `mask`.
/// `score` is sampled per foreground pixel; `None` leaves the pixel unscored.
fn blobs(mask: &GrayImage, score: impl Fn(u32, u32) -> Option<f32>) -> Vec<Blob> {
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));
    let mut found: Vec<Option<Blob>> = Vec::new();

    for (x, y, px) in labels.enumerate_pixels() {
        let label = px[0];
        if label == 0 {
            continue;
        }
        let idx = (label - 1) as usize;
        if idx >= found.len() {
            found.resize(idx + 1, None);
        }
        let blob = found[idx].get_or_insert_with(|| Blob::at(x, y));
        blob.min_x = blob.min_x.min(x);
        blob.min_y = blob.min_y.min(y);
        blob.max_x = blob.max_x.max(x);
        blob.max_y = blob.max_y.max(y);
        blob.pixels += 1;
        if let Some(s) = score(x, y) {
            blob.score_sum += s;
            blob.scored += 1;
        }
    }

    found.into_iter().flatten().collect()
}

fn mean_std(values: &[f32]) -> (f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
    (mean, var.sqrt())
}

fn mask_from(width: u32, height: u32, on: impl Fn(u32, u32) -> bool) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| Luma([if on(x, y) { 255 } else { 0 }]))
}

/// Solid regions: Otsu split, minority side as foreground, confidence = fill ratio of the
/// component inside its bounding box.
pub fn rectangular_regions(gray: &GrayImage, gate: &ShapeGate) -> Vec<Detection> {
    let (w, h) = gray.dimensions();
    let total = (w as usize) * (h as usize);
    if total == 0 {
        return Vec::new();
    }

    let level = otsu_level(gray);
    let dark = gray.pixels().filter(|p| p[0] <= level).count();
    let dark_is_foreground = dark * 2 <= total;
    let mask = mask_from(w, h, |x, y| {
        let v = gray.get_pixel(x, y)[0];
        if dark_is_foreground { v <= level } else { v > level }
    });

    blobs(&mask, |_, _| None)
        .into_iter()
        .filter_map(|b| {
            let fill = b.pixels as f32 / b.box_area() as f32;
            let rect = b.rect(w, h);
            gate.admits(&rect, fill).then(|| Detection {
                label: RECTANGLE_LABEL.into(),
                confidence: fill,
                bbox: rect,
            })
        })
        .collect()
}

/// Closed edge chains: Sobel magnitude above mean + std, dilated once to bridge gaps.
/// Confidence is the mean normalized edge strength along the chain.
pub fn contour_regions(gray: &GrayImage, gate: &ShapeGate) -> Vec<Detection> {
    let (w, h) = gray.dimensions();
    let grad = sobel_gradients(gray);
    let mags: Vec<f32> = grad.pixels().map(|p| p[0] as f32).collect();
    let max = mags.iter().copied().fold(0.0f32, f32::max);
    if max <= 0.0 {
        return Vec::new();
    }
    let (mean, std) = mean_std(&mags);
    let thresh = mean + std;

    let edge = |x: u32, y: u32| grad.get_pixel(x, y)[0] as f32 > thresh;
    let edges = mask_from(w, h, &edge);
    let closed = dilate(&edges, Norm::LInf, 1);

    blobs(&closed, |x, y| edge(x, y).then(|| grad.get_pixel(x, y)[0] as f32 / max))
        .into_iter()
        .filter_map(|b| {
            let confidence = b.mean_score();
            let rect = b.rect(w, h);
            gate.admits(&rect, confidence).then(|| Detection {
                label: CONTOUR_LABEL.into(),
                confidence,
                bbox: rect,
            })
        })
        .collect()
}

/// Regions whose smoothed luminance stands out from the frame mean by more than
/// 1.5 standard deviations. Confidence is mean contrast relative to the strongest pixel.
pub fn salient_regions(gray: &GrayImage, blur_sigma: f32, gate: &ShapeGate) -> Vec<Detection> {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return Vec::new();
    }
    let smoothed = if blur_sigma > 0.0 { gaussian_blur_f32(gray, blur_sigma) } else { gray.clone() };

    let lum: Vec<f32> = smoothed.pixels().map(|p| p[0] as f32).collect();
    let (lum_mean, _) = mean_std(&lum);
    let saliency: Vec<f32> = lum.iter().map(|v| (v - lum_mean).abs()).collect();
    let max = saliency.iter().copied().fold(0.0f32, f32::max);
    if max <= 0.0 {
        return Vec::new();
    }
    let (mean, std) = mean_std(&saliency);
    let thresh = mean + 1.5 * std;

    let at = |x: u32, y: u32| saliency[(y * w + x) as usize];
    let mask = mask_from(w, h, |x, y| at(x, y) > thresh);

    blobs(&mask, |x, y| Some(at(x, y) / max))
        .into_iter()
        .filter_map(|b| {
            let confidence = b.mean_score();
            let rect = b.rect(w, h);
            gate.admits(&rect, confidence).then(|| Detection {
                label: SALIENT_LABEL.into(),
                confidence,
                bbox: rect,
            })
        })
        .collect()
}
