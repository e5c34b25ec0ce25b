use ndarray::{s, Array2, Array3, Array4, Array5, ArrayView1, ArrayView2, ArrayView4, Axis, Zip};
use tracing::debug;

use crate::error::{check_shape, ProposalError, Result};
use crate::pipeline::proposal_pipeline::config::{ProposalConfig, BOX_DOF};
use crate::processing::bbox_regression::encode;
use crate::processing::context::ExecutionContext;
use crate::rcnn::anchors::AnchorGrid;
use crate::rcnn::bbox::{BevRotatedIou, RotatedOverlap};
use crate::rcnn::matcher::{Match, MatchLabel, Matcher};
use crate::types::{ProposalTargets, Scene};

/// (x, y, w, l, yaw) columns of a 7-dof box.
const BEV_COLUMNS: [usize; 5] = [0, 1, 3, 4, 6];

/// Per-class match results in `[class, yaw, row, col]` layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Matches {
    pub labels: Array4<MatchLabel>,
    /// Index into the scene's full box array, set only for positive anchors.
    pub gt_index: Array4<Option<usize>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergedLabels {
    pub labels: Array4<MatchLabel>,
    /// `[yaw, row, col]` sites resolved to background.
    pub negative: Array3<bool>,
    pub ambiguous: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClsTargets {
    pub g_cls: Array4<f32>,
    pub m_cls: Array3<bool>,
    pub ambiguous: usize,
}

/// Resolves cross-class conflicts in per-class labels.
///
/// 1. A site positive in more than one class is ignored in every class.
/// 2. A site background in some class and positive in none becomes
///    background in every class. This runs after step 1, so sites ignored
///    for ambiguity are never counted as background.
pub fn merge_class_labels(labels: ArrayView4<MatchLabel>) -> MergedLabels {
    let (_, num_yaw, rows, cols) = labels.dim();
    let mut resolved = labels.to_owned();
    let mut negative = Array3::from_elem((num_yaw, rows, cols), false);
    let mut ambiguous = 0;

    Zip::from(resolved.lanes_mut(Axis(0)))
        .and(&mut negative)
        .for_each(|mut site, negative| {
            let positives = site.iter().filter(|l| **l == MatchLabel::Positive).count();
            if positives > 1 {
                site.fill(MatchLabel::Ignore);
                ambiguous += 1;
                return;
            }
            let any_background = site.iter().any(|l| *l == MatchLabel::Background);
            if any_background && positives == 0 {
                site.fill(MatchLabel::Background);
                *negative = true;
            }
        });

    MergedLabels {
        labels: resolved,
        negative,
        ambiguous,
    }
}

/// Builds the one-hot classification target with a trailing background
/// channel, and the mask of sites that are not ignored by every class.
/// Ignore markers that survive the merge are written as 0 and masked out.
pub fn get_cls_targets(labels: ArrayView4<MatchLabel>) -> ClsTargets {
    let (num_classes, num_yaw, rows, cols) = labels.dim();
    let merged = merge_class_labels(labels);

    let mut g_cls = Array4::<f32>::zeros((num_classes + 1, num_yaw, rows, cols));
    g_cls
        .slice_mut(s![..num_classes, .., .., ..])
        .zip_mut_with(&merged.labels, |g, label| {
            *g = if *label == MatchLabel::Positive { 1.0 } else { 0.0 };
        });
    g_cls
        .index_axis_mut(Axis(0), num_classes)
        .zip_mut_with(&merged.negative, |g, negative| {
            *g = if *negative { 1.0 } else { 0.0 };
        });

    let m_cls = Zip::from(merged.labels.lanes(Axis(0)))
        .map_collect(|site| !site.iter().all(|l| *l == MatchLabel::Ignore));

    ClsTargets {
        g_cls,
        m_cls,
        ambiguous: merged.ambiguous,
    }
}

/// Matches scene boxes to the anchor grid and encodes proposal targets.
pub struct ProposalTargetAssigner<O = BevRotatedIou> {
    anchors: AnchorGrid,
    matchers: Vec<Matcher>,
    overlap: O,
}

impl ProposalTargetAssigner<BevRotatedIou> {
    pub fn new(config: &ProposalConfig) -> Result<Self> {
        Self::with_overlap(config, BevRotatedIou)
    }
}

impl<O: RotatedOverlap> ProposalTargetAssigner<O> {
    pub fn with_overlap(config: &ProposalConfig, overlap: O) -> Result<Self> {
        let anchors = AnchorGrid::new(config)?;
        let matchers = Self::build_matchers(config)?;
        Ok(ProposalTargetAssigner {
            anchors,
            matchers,
            overlap,
        })
    }

    fn build_matchers(config: &ProposalConfig) -> Result<Vec<Matcher>> {
        config
            .anchors
            .iter()
            .map(|anchor| Matcher::new(&anchor.iou_thresh, config.allow_low_quality_matches))
            .collect()
    }

    pub fn anchors(&self) -> &AnchorGrid {
        &self.anchors
    }

    /// Rotated IoU of the boxes' ground plane footprints. Height does not
    /// take part in matching.
    pub fn compute_iou(
        &self,
        boxes: ArrayView2<f32>,
        anchors: ArrayView2<f32>,
        context: ExecutionContext,
    ) -> Array2<f32> {
        let boxes = boxes.select(Axis(1), &BEV_COLUMNS);
        let anchors = anchors.select(Axis(1), &BEV_COLUMNS);
        self.overlap.overlaps(boxes.view(), anchors.view(), context)
    }

    fn match_class(
        &self,
        boxes: ArrayView2<f32>,
        class_idx: ArrayView1<usize>,
        class: usize,
        context: ExecutionContext,
    ) -> Vec<Match> {
        let members: Vec<usize> = class_idx
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == class)
            .map(|(i, _)| i)
            .collect();
        if members.is_empty() {
            return vec![Match::BACKGROUND; self.anchors.shape().sites()];
        }

        let iou = self.compute_iou(
            boxes.select(Axis(0), &members).view(),
            self.anchors.class_anchors(class),
            context,
        );
        let matches = self.matchers[class].call(iou.view());
        debug!(
            class,
            num_boxes = members.len(),
            num_positive = matches.iter().filter(|m| m.label == MatchLabel::Positive).count(),
            "matched class"
        );

        matches
            .into_iter()
            .map(|m| Match {
                label: m.label,
                gt_index: m.gt_index.map(|local| members[local]),
            })
            .collect()
    }

    /// Matches every class independently. Classes absent from the scene come
    /// back all background.
    pub fn get_matches(
        &self,
        boxes: ArrayView2<f32>,
        class_idx: ArrayView1<usize>,
        context: ExecutionContext,
    ) -> Result<Matches> {
        let shape = self.anchors.shape();
        let per_class = context.map_indices(shape.num_classes, |class| {
            self.match_class(boxes, class_idx, class, context)
        });

        let mut labels = Vec::with_capacity(shape.num_anchors());
        let mut gt_index = Vec::with_capacity(shape.num_anchors());
        for m in per_class.into_iter().flatten() {
            labels.push(m.label);
            gt_index.push(m.gt_index);
        }
        Ok(Matches {
            labels: Array4::from_shape_vec(shape.class_dims(), labels)?,
            gt_index: Array4::from_shape_vec(shape.class_dims(), gt_index)?,
        })
    }

    /// Encodes every positive anchor against its matched box; all other
    /// anchors get a zero target. Returns `(g_reg, m_reg)`.
    pub fn get_reg_targets(
        &self,
        boxes: ArrayView2<f32>,
        gt_index: ArrayView4<Option<usize>>,
        g_cls: ArrayView4<f32>,
    ) -> Result<(Array5<f32>, Array4<bool>)> {
        let shape = self.anchors.shape();
        let (num_classes, num_yaw, rows, cols) = shape.class_dims();
        check_shape("gt_index", &[num_classes, num_yaw, rows, cols], gt_index.shape())?;
        check_shape("g_cls", &[num_classes + 1, num_yaw, rows, cols], g_cls.shape())?;

        let m_reg = g_cls.slice(s![..num_classes, .., .., ..]).mapv(|v| v == 1.0);
        let anchors = self.anchors.anchors();
        let mut g_reg = Array2::<f32>::zeros((shape.num_anchors(), BOX_DOF));

        let mut missing = 0;
        for (i, (positive, gt)) in m_reg.iter().zip(gt_index.iter()).enumerate() {
            if !*positive {
                continue;
            }
            match gt {
                Some(gt) if *gt < boxes.nrows() => {
                    let deltas = encode(boxes.row(*gt), anchors.row(i));
                    g_reg.row_mut(i).assign(&ArrayView1::from(&deltas[..]));
                }
                _ => missing += 1,
            }
        }
        if missing > 0 {
            return Err(ProposalError::MissingMatch(missing));
        }

        let g_reg = g_reg.into_shape((num_classes, num_yaw, rows, cols, BOX_DOF))?;
        Ok((g_reg, m_reg))
    }

    pub fn assign(&self, scene: &Scene, context: ExecutionContext) -> Result<ProposalTargets> {
        scene.validate(self.anchors.shape().num_classes)?;

        let matches = self.get_matches(scene.boxes.view(), scene.class_idx.view(), context)?;
        let ClsTargets { g_cls, m_cls, ambiguous } = get_cls_targets(matches.labels.view());
        let (g_reg, m_reg) = self.get_reg_targets(scene.boxes.view(), matches.gt_index.view(), g_cls.view())?;

        let targets = ProposalTargets {
            g_cls,
            m_cls,
            g_reg,
            m_reg,
            ambiguous,
        };
        debug!(
            num_boxes = scene.num_boxes(),
            num_positive = targets.num_positive(),
            num_negative = targets.num_negative(),
            num_ignored = targets.num_ignored(),
            ambiguous,
            "assigned proposal targets"
        );
        Ok(targets)
    }

    /// Assigns targets and attaches them to the scene.
    pub fn forward(&self, scene: &mut Scene, context: ExecutionContext) -> Result<()> {
        let targets = self.assign(scene, context)?;
        scene.targets = Some(targets);
        Ok(())
    }
}
