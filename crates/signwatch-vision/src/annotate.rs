use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::Detection;

/// Tableau 10, indexed by class id.
pub const BOX_COLORS: [Rgb<u8>; 10] = [
    Rgb([87, 120, 164]),
    Rgb([228, 148, 68]),
    Rgb([209, 97, 93]),
    Rgb([133, 182, 178]),
    Rgb([106, 159, 88]),
    Rgb([231, 202, 96]),
    Rgb([168, 124, 159]),
    Rgb([241, 162, 169]),
    Rgb([150, 118, 98]),
    Rgb([184, 176, 172]),
];

/// Tried in order when no font is configured.
pub const SYSTEM_FONTS: [&str; 4] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu-sans-fonts/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
];

const THICKNESS: u32 = 2;
const LABEL_PX: f32 = 16.0;
const LABEL_PAD: u32 = 3;
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

/// Font used for the `"<label>: <conf>%"` tag above each box.
pub struct LabelFont {
    font: FontVec,
    scale: PxScale,
}

impl LabelFont {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("read font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes).map_err(|e| anyhow::anyhow!("parse font {}: {}", path.display(), e))?;
        Ok(Self { font, scale: PxScale::from(LABEL_PX) })
    }

    /// The configured font, or the first usable system font. `None` means
    /// boxes are drawn without labels.
    pub fn discover(configured: Option<&Path>) -> Option<Self> {
        if let Some(p) = configured {
            match Self::load(p) {
                Ok(f) => return Some(f),
                Err(e) => warn!("vision: {:#}; falling back to system fonts", e),
            }
        }
        for p in SYSTEM_FONTS {
            let p = Path::new(p);
            if p.is_file() {
                if let Ok(f) = Self::load(p) {
                    debug!("vision: label font {}", p.display());
                    return Some(f);
                }
            }
        }
        info!("vision: no label font found, boxes drawn without labels");
        None
    }
}

pub fn color_for(class_id: usize) -> Rgb<u8> {
    BOX_COLORS[class_id % BOX_COLORS.len()]
}

pub fn label_text(d: &Detection) -> String {
    format!("{}: {}%", d.label, (d.conf * 100.0) as u32)
}

/// Draws a box outline per detection, tagged with class and confidence when a
/// font is available.
pub fn annotate(frame: &mut RgbImage, dets: &[Detection], font: Option<&LabelFont>) {
    for d in dets {
        let color = color_for(d.class_id);
        draw_rect(frame, d.bbox.xmin, d.bbox.ymin, d.bbox.xmax, d.bbox.ymax, color);
        if let Some(f) = font {
            draw_label(frame, d, color, f);
        }
    }
}

fn draw_label(img: &mut RgbImage, d: &Detection, color: Rgb<u8>, f: &LabelFont) {
    let text = label_text(d);
    let (tw, th) = text_size(f.scale, &f.font, &text);
    let (bw, bh) = (tw + 2 * LABEL_PAD, th + 2 * LABEL_PAD);
    let (x, y) = label_origin(d.bbox.xmin, d.bbox.ymin, bh);
    draw_filled_rect_mut(img, Rect::at(x, y).of_size(bw, bh), color);
    draw_text_mut(img, TEXT_COLOR, x + LABEL_PAD as i32, y + LABEL_PAD as i32, f.scale, &f.font, &text);
}

/// Top-left of a tag `bar_h` high: above the box, or inside it along the top
/// edge when the box touches the top of the frame.
fn label_origin(xmin: f32, ymin: f32, bar_h: u32) -> (i32, i32) {
    let x = xmin.max(0.0) as i32;
    let top = ymin.max(0.0) as i32;
    let y = if top >= bar_h as i32 { top - bar_h as i32 } else { top };
    (x, y)
}

fn draw_rect(img: &mut RgbImage, x0: f32, y0: f32, x1: f32, y1: f32, color: Rgb<u8>) {
    let (w, h) = (img.width(), img.height());
    if w == 0 || h == 0 { return; }
    let clamp_x = |v: f32| (v.max(0.0) as u32).min(w - 1);
    let clamp_y = |v: f32| (v.max(0.0) as u32).min(h - 1);
    let (x0, x1, y0, y1) = (clamp_x(x0), clamp_x(x1), clamp_y(y0), clamp_y(y1));
    if x1 < x0 || y1 < y0 { return; }

    for t in 0..THICKNESS {
        let (top, bottom) = ((y0 + t).min(y1), y1.saturating_sub(t).max(y0));
        for x in x0..=x1 {
            img.put_pixel(x, top, color);
            img.put_pixel(x, bottom, color);
        }
        let (left, right) = ((x0 + t).min(x1), x1.saturating_sub(t).max(x0));
        for y in y0..=y1 {
            img.put_pixel(left, y, color);
            img.put_pixel(right, y, color);
        }
    }
}
