mod nms;
pub mod annotate;
pub mod detector;
pub mod record;
pub mod region;
pub mod source;

use anyhow::Result;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Pixel-space box, `[xmin, ymin, xmax, ymax]` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl BBox {
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self { xmin: cx - w / 2.0, ymin: cy - h / 2.0, xmax: cx + w / 2.0, ymax: cy + h / 2.0 }
    }

    pub fn width(&self) -> f32 { (self.xmax - self.xmin).max(0.0) }

    pub fn height(&self) -> f32 { (self.ymax - self.ymin).max(0.0) }

    pub fn area(&self) -> f32 { self.width() * self.height() }
}

impl From<[f32; 4]> for BBox {
    fn from(v: [f32; 4]) -> Self {
        Self { xmin: v[0], ymin: v[1], xmax: v[2], ymax: v[3] }
    }
}

impl From<BBox> for [f32; 4] {
    fn from(b: BBox) -> Self { [b.xmin, b.ymin, b.xmax, b.ymax] }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    #[serde(default)]
    pub class_id: usize,
    pub conf: f32,
    pub bbox: BBox,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub conf_threshold: f32,
    pub nms_iou_threshold: f32,
    pub max_detections: usize,
    /// Index = class id. Needed for raw tensor output.
    pub class_names: Vec<String>,
    pub thumbnail_height: u32,
    /// TTF for box labels; system fonts are tried when unset.
    pub label_font: Option<PathBuf>,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            conf_threshold: 0.5,
            nms_iou_threshold: 0.45,
            max_detections: 100,
            class_names: Vec::new(),
            thumbnail_height: region::THUMBNAIL_HEIGHT,
            label_font: None,
        }
    }
}

/// Adapter over whatever model produces detections for a frame.
pub trait Detector: Send {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>>;
}

/// Keeps detections at or above `threshold`.
pub fn filter_confident(dets: Vec<Detection>, threshold: f32) -> Vec<Detection> {
    dets.into_iter().filter(|d| d.conf >= threshold).collect()
}

/// Decodes an Ultralytics-style export, one row per prediction:
/// `[cx, cy, w, h, obj, cls0..clsN]`, coordinates normalized to 0..1.
pub fn postprocess_ultralytics(
    raw: &[f32],
    num_preds: usize,
    class_names: &[String],
    conf_th: f32,
    frame_w: u32,
    frame_h: u32,
) -> Vec<Detection> {
    let num_classes = class_names.len();
    if num_classes == 0 {
        return Vec::new();
    }
    let stride = 5 + num_classes;
    let (fw, fh) = (frame_w as f32, frame_h as f32);
    let mut out = Vec::new();

    for i in 0..num_preds {
        let base = i * stride;
        if base + stride > raw.len() { break; }
        let row = &raw[base..base + stride];

        let mut best_c = 0usize;
        let mut best_p = 0.0f32;
        for (c, p) in row[5..].iter().enumerate() {
            if *p > best_p { best_p = *p; best_c = c; }
        }
        let conf = row[4] * best_p;
        if conf >= conf_th {
            out.push(Detection {
                label: class_names[best_c].clone(),
                class_id: best_c,
                conf,
                bbox: BBox::from_center(row[0] * fw, row[1] * fh, row[2] * fw, row[3] * fh),
            });
        }
    }
    out
}

/// Greedy class-wise non-maximum suppression, highest confidence first. Boxes
/// of different classes never suppress each other.
pub fn nms_filter(mut dets: Vec<Detection>, iou_th: f32, max_det: usize) -> Vec<Detection> {
    dets.sort_by(|a, b| b.conf.partial_cmp(&a.conf).unwrap_or(std::cmp::Ordering::Equal));
    let mut kept: Vec<Detection> = Vec::new();

    'outer: for d in dets {
        if kept.len() >= max_det { break; }
        for k in &kept {
            if k.class_id == d.class_id && nms::iou(&d.bbox, &k.bbox) >= iou_th {
                continue 'outer;
            }
        }
        kept.push(d);
    }
    kept
}
