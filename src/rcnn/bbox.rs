use nalgebra::{Point2, Rotation2, Vector2};
use ndarray::{Array2, ArrayView1, ArrayView2, ArrayViewMut1, Zip};

use crate::processing::context::ExecutionContext;

/// Ground plane rotated-box overlap.
///
/// Boxes are `(x, y, width, length, yaw)` rows. `width` spans the box's local
/// x axis, `length` its local y axis, and `yaw` rotates the box
/// counter-clockwise in radians. Implementations return an `[M, N]` IoU matrix
/// with values in `[0, 1]`.
pub trait RotatedOverlap: Send + Sync {
    fn overlaps(
        &self,
        boxes: ArrayView2<f32>,
        query_boxes: ArrayView2<f32>,
        context: ExecutionContext,
    ) -> Array2<f32>;
}

/// Exact IoU by clipping one footprint against the other.
#[derive(Debug, Clone, Copy, Default)]
pub struct BevRotatedIou;

impl RotatedOverlap for BevRotatedIou {
    fn overlaps(
        &self,
        boxes: ArrayView2<f32>,
        query_boxes: ArrayView2<f32>,
        context: ExecutionContext,
    ) -> Array2<f32> {
        bbox_overlaps(boxes, query_boxes, context)
    }
}

pub fn bbox_overlaps(
    boxes: ArrayView2<f32>,
    query_boxes: ArrayView2<f32>,
    context: ExecutionContext,
) -> Array2<f32> {
    let mut overlaps = Array2::<f32>::zeros((boxes.nrows(), query_boxes.nrows()));

    let fill = |mut row: ArrayViewMut1<f32>, bbox: ArrayView1<f32>| {
        for (overlap, query) in row.iter_mut().zip(query_boxes.rows()) {
            *overlap = rotated_iou(bbox, query);
        }
    };

    let zip = Zip::from(overlaps.rows_mut()).and(boxes.rows());
    if context.is_parallel() {
        zip.par_for_each(fill);
    } else {
        zip.for_each(fill);
    }
    overlaps
}

pub fn rotated_iou(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    let area_a = a[2] * a[3];
    let area_b = b[2] * b[3];
    if !(area_a > 0.0 && area_b > 0.0) {
        return 0.0;
    }

    // circumscribed circles do not touch
    let reach = 0.5 * (a[2].hypot(a[3]) + b[2].hypot(b[3]));
    if (a[0] - b[0]).hypot(a[1] - b[1]) > reach {
        return 0.0;
    }

    let inter = polygon_area(&clip_polygon(corners(a).to_vec(), &corners(b)));
    let union = area_a + area_b - inter;
    let iou = inter / union;
    if !iou.is_finite() {
        return 0.0;
    }
    iou.clamp(0.0, 1.0)
}

/// Footprint corners in counter-clockwise order.
fn corners(bbox: ArrayView1<f32>) -> [Point2<f32>; 4] {
    let center = Point2::new(bbox[0], bbox[1]);
    let rotation = Rotation2::new(bbox[4]);
    let (hw, hl) = (0.5 * bbox[2], 0.5 * bbox[3]);
    [(hw, hl), (-hw, hl), (-hw, -hl), (hw, -hl)]
        .map(|(dx, dy)| center + rotation * Vector2::new(dx, dy))
}

fn cross(u: Vector2<f32>, v: Vector2<f32>) -> f32 {
    u.x * v.y - u.y * v.x
}

// Sutherland-Hodgman against a convex, counter-clockwise clip polygon.
fn clip_polygon(mut subject: Vec<Point2<f32>>, clip: &[Point2<f32>; 4]) -> Vec<Point2<f32>> {
    for i in 0..clip.len() {
        if subject.is_empty() {
            break;
        }
        let a = clip[i];
        let b = clip[(i + 1) % clip.len()];
        let edge = b - a;
        let side = |p: &Point2<f32>| cross(edge, *p - a);

        let input = std::mem::take(&mut subject);
        for j in 0..input.len() {
            let current = input[j];
            let previous = input[(j + input.len() - 1) % input.len()];
            let (d_cur, d_prev) = (side(&current), side(&previous));

            if d_cur >= 0.0 {
                if d_prev < 0.0 {
                    subject.push(previous + (current - previous) * (d_prev / (d_prev - d_cur)));
                }
                subject.push(current);
            } else if d_prev >= 0.0 {
                subject.push(previous + (current - previous) * (d_prev / (d_prev - d_cur)));
            }
        }
    }
    subject
}

fn polygon_area(polygon: &[Point2<f32>]) -> f32 {
    if polygon.len() < 3 {
        return 0.0;
    }
    let mut twice_area = 0.0;
    for i in 0..polygon.len() {
        let p = polygon[i];
        let q = polygon[(i + 1) % polygon.len()];
        twice_area += p.x * q.y - q.x * p.y;
    }
    0.5 * twice_area.abs()
}
