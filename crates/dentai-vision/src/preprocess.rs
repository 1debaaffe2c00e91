use image::{imageops::FilterType, DynamicImage, RgbImage};
use serde::Deserialize;

use crate::error::{DetectError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// Planar float tensor, `[1, 3, H, W]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub data: Vec<f32>,
    pub shape: [usize; 4],
}

/// Decode an encoded image (JPEG/PNG).
pub fn load_image(bytes: &[u8]) -> Result<DynamicImage> {
    let img = image::load_from_memory(bytes).map_err(|e| DetectError::InvalidInput(e.to_string()))?;
    ensure_pixels(&img)?;
    Ok(img)
}

pub(crate) fn ensure_pixels(img: &DynamicImage) -> Result<()> {
    if img.width() == 0 || img.height() == 0 {
        return Err(DetectError::InvalidInput(format!(
            "image has no pixels ({}x{})",
            img.width(),
            img.height()
        )));
    }
    Ok(())
}

/// Resize to `target_size`², drop alpha, reorder channels and scale into `[0,1]`.
pub fn to_tensor(image: &DynamicImage, target_size: u32, order: ChannelOrder) -> Result<Tensor> {
    if target_size == 0 {
        return Err(DetectError::PreprocessingFailed("target size must be positive".into()));
    }
    ensure_pixels(image)?;

    let rgb = image.to_rgb8();
    let resized: RgbImage = if rgb.dimensions() == (target_size, target_size) {
        rgb
    } else {
        image::imageops::resize(&rgb, target_size, target_size, FilterType::CatmullRom)
    };

    let side = target_size as usize;
    let plane = side * side;
    let mut data = vec![0.0f32; 3 * plane];
    let channels: [usize; 3] = match order {
        ChannelOrder::Rgb => [0, 1, 2],
        ChannelOrder::Bgr => [2, 1, 0],
    };

    for (i, px) in resized.pixels().enumerate() {
        for (plane_idx, &src) in channels.iter().enumerate() {
            data[plane_idx * plane + i] = px.0[src] as f32 / 255.0;
        }
    }

    Ok(Tensor { data, shape: [1, 3, side, side] })
}
