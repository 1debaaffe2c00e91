use serde::{Deserialize, Serialize};

/// Smallest union area used as IoU denominator.
pub const IOU_EPS: f32 = 1e-6;

/// Axis-aligned rectangle, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self { x: cx - w / 2.0, y: cy - h / 2.0, w, h }
    }

    pub fn right(&self) -> f32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.h
    }

    // Measured from the edges (not w*h) so a rect intersected with itself
    // yields exactly its own area.
    pub fn area(&self) -> f32 {
        (self.right() - self.x).max(0.0) * (self.bottom() - self.y).max(0.0)
    }

    pub fn intersection_area(&self, other: &Rect) -> f32 {
        let ix_a = self.x.max(other.x);
        let iy_a = self.y.max(other.y);
        let ix_b = self.right().min(other.right());
        let iy_b = self.bottom().min(other.bottom());
        let iw = (ix_b - ix_a).max(0.0);
        let ih = (iy_b - iy_a).max(0.0);
        iw * ih
    }

    pub fn iou(&self, other: &Rect) -> f32 {
        let inter = self.intersection_area(other);
        if inter <= 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        inter / union.max(IOU_EPS)
    }

    /// Clip into the unit square, keeping the box inside `[0,1]` on both axes.
    pub fn clamp01(self) -> Self {
        let x = self.x.clamp(0.0, 1.0);
        let y = self.y.clamp(0.0, 1.0);
        let r = self.right().clamp(0.0, 1.0);
        let b = self.bottom().clamp(0.0, 1.0);
        Self { x, y, w: (r - x).max(0.0), h: (b - y).max(0.0) }
    }
}
