use crate::BBox;

pub fn iou(a: &BBox, b: &BBox) -> f32 {
    let ix_a = a.xmin.max(b.xmin);
    let iy_a = a.ymin.max(b.ymin);
    let ix_b = a.xmax.min(b.xmax);
    let iy_b = a.ymax.min(b.ymax);

    let inter = (ix_b - ix_a).max(0.0) * (iy_b - iy_a).max(0.0);
    let union = a.area() + b.area() - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}
