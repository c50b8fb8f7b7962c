use image::{imageops::FilterType, RgbImage};

use crate::BBox;

/// Height of the sign thumbnail shown next to banner text.
pub const THUMBNAIL_HEIGHT: u32 = 50;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RegionError {
    #[error("region {0:?} is empty after clamping to the frame")]
    Empty([f32; 4]),
    #[error("region {0:?} has non-finite coordinates")]
    NotFinite([f32; 4]),
}

/// Cuts the detected sign out of `frame` and scales it to `height` pixels,
/// keeping the aspect ratio.
pub fn crop_region(frame: &RgbImage, bbox: &BBox, height: u32) -> Result<RgbImage, RegionError> {
    let raw: [f32; 4] = (*bbox).into();
    if raw.iter().any(|v| !v.is_finite()) {
        return Err(RegionError::NotFinite(raw));
    }

    let (fw, fh) = (frame.width() as f32, frame.height() as f32);
    let x0 = bbox.xmin.clamp(0.0, fw) as u32;
    let y0 = bbox.ymin.clamp(0.0, fh) as u32;
    let x1 = bbox.xmax.clamp(0.0, fw) as u32;
    let y1 = bbox.ymax.clamp(0.0, fh) as u32;
    if x1 <= x0 || y1 <= y0 {
        return Err(RegionError::Empty(raw));
    }

    let (w, h) = (x1 - x0, y1 - y0);
    let sign = image::imageops::crop_imm(frame, x0, y0, w, h).to_image();

    let height = height.max(1);
    let width = ((height as f32 * w as f32 / h as f32) as u32).max(1);
    Ok(image::imageops::resize(&sign, width, height, FilterType::Triangle))
}
