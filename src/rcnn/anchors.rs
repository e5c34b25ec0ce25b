// Dense anchor grid over the BEV plane. One anchor per (class, yaw bin, row, col),
// rows along y and cols along x, each centered on its grid cell.

use std::f32::consts::PI;

use ndarray::{s, Array2, ArrayView2, ArrayView5};

use crate::error::Result;
use crate::pipeline::proposal_pipeline::config::{AnchorConfig, ProposalConfig, BOX_DOF};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridShape {
    pub num_classes: usize,
    pub num_yaw: usize,
    pub rows: usize,
    pub cols: usize,
}

impl GridShape {
    /// Anchors belonging to a single class.
    pub fn sites(&self) -> usize {
        self.num_yaw * self.rows * self.cols
    }

    pub fn num_anchors(&self) -> usize {
        self.num_classes * self.sites()
    }

    /// `(class, yaw, row, col)`
    pub fn class_dims(&self) -> (usize, usize, usize, usize) {
        (self.num_classes, self.num_yaw, self.rows, self.cols)
    }

    /// `(yaw, row, col)`
    pub fn site_dims(&self) -> (usize, usize, usize) {
        (self.num_yaw, self.rows, self.cols)
    }
}

fn anchors(shape: GridShape, bounds: [f32; 4], base_anchors: &[AnchorConfig]) -> Array2<f32> {
    let [x_min, y_min, x_max, y_max] = bounds;
    let stride_x = (x_max - x_min) / shape.cols as f32;
    let stride_y = (y_max - y_min) / shape.rows as f32;
    let mut all_anchors = Array2::<f32>::zeros((shape.num_anchors(), BOX_DOF));

    let mut i = 0;
    for base in base_anchors.iter().take(shape.num_classes) {
        let [w, l, h] = base.wlh;
        for k in 0..shape.num_yaw {
            let yaw = k as f32 * PI / shape.num_yaw as f32;
            for ih in 0..shape.rows {
                let sy = y_min + (ih as f32 + 0.5) * stride_y;
                for iw in 0..shape.cols {
                    let sx = x_min + (iw as f32 + 0.5) * stride_x;
                    all_anchors[[i, 0]] = sx;
                    all_anchors[[i, 1]] = sy;
                    all_anchors[[i, 2]] = base.center_z;
                    all_anchors[[i, 3]] = w;
                    all_anchors[[i, 4]] = l;
                    all_anchors[[i, 5]] = h;
                    all_anchors[[i, 6]] = yaw;
                    i += 1;
                }
            }
        }
    }
    all_anchors
}

/// Immutable anchor set, stored flat as `[classes * yaw * rows * cols, 7]`.
#[derive(Debug, Clone)]
pub struct AnchorGrid {
    shape: GridShape,
    anchors: Array2<f32>,
}

impl AnchorGrid {
    pub fn new(config: &ProposalConfig) -> Result<Self> {
        config.validate()?;
        let shape = GridShape {
            num_classes: config.num_classes,
            num_yaw: config.num_yaw,
            rows: config.grid.shape[0],
            cols: config.grid.shape[1],
        };
        let anchors = anchors(shape, config.grid.bounds, &config.anchors);
        Ok(AnchorGrid { shape, anchors })
    }

    pub fn shape(&self) -> GridShape {
        self.shape
    }

    pub fn anchors(&self) -> ArrayView2<'_, f32> {
        self.anchors.view()
    }

    /// Anchors of one class in `(yaw, row, col)` order.
    pub fn class_anchors(&self, class: usize) -> ArrayView2<'_, f32> {
        let n = self.shape.sites();
        self.anchors.slice(s![class * n..(class + 1) * n, ..])
    }

    /// `[class, yaw, row, col, 7]` view of the grid.
    pub fn view(&self) -> Result<ArrayView5<'_, f32>> {
        let (c, y, r, w) = self.shape.class_dims();
        Ok(self.anchors.view().into_shape((c, y, r, w, BOX_DOF))?)
    }
}
