use ndarray::{ArrayView2, Axis};

use crate::error::{ProposalError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchLabel {
    Background,
    Ignore,
    Positive,
}

/// Matcher output for one anchor. `gt_index` is set exactly when the anchor
/// is `Positive` and indexes the rows of the IoU matrix it was matched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub label: MatchLabel,
    pub gt_index: Option<usize>,
}

impl Match {
    pub const BACKGROUND: Match = Match {
        label: MatchLabel::Background,
        gt_index: None,
    };
}

pub(crate) fn validate_thresholds(thresholds: &[f32]) -> std::result::Result<(f32, f32), String> {
    match thresholds {
        &[low, high] if (0.0..=1.0).contains(&low) && (0.0..=1.0).contains(&high) && low <= high => {
            Ok((low, high))
        }
        &[low, high] => Err(format!(
            "iou thresholds must satisfy 0 <= low <= high <= 1, got [{low}, {high}]"
        )),
        other => Err(format!("expected 2 iou thresholds, got {}", other.len())),
    }
}

/// Assigns each anchor (column) to its best ground truth box (row).
///
/// Below `low` is background, `[low, high)` is ignored, `high` and above is
/// positive. With `allow_low_quality_matches`, the anchors tied for the best
/// IoU of every ground truth box are positive regardless of thresholds.
#[derive(Debug, Clone)]
pub struct Matcher {
    low: f32,
    high: f32,
    allow_low_quality_matches: bool,
}

impl Matcher {
    pub fn new(thresholds: &[f32], allow_low_quality_matches: bool) -> Result<Self> {
        let (low, high) = validate_thresholds(thresholds).map_err(ProposalError::InvalidConfiguration)?;
        Ok(Matcher {
            low,
            high,
            allow_low_quality_matches,
        })
    }

    pub fn thresholds(&self) -> (f32, f32) {
        (self.low, self.high)
    }

    /// `iou` is `[num_gt, num_anchors]`; returns one match per anchor.
    pub fn call(&self, iou: ArrayView2<f32>) -> Vec<Match> {
        let (num_gt, num_anchors) = iou.dim();
        if num_gt == 0 {
            return vec![Match::BACKGROUND; num_anchors];
        }

        let mut best = Vec::with_capacity(num_anchors);
        for column in iou.axis_iter(Axis(1)) {
            let mut best_gt = 0;
            let mut best_iou = column[0];
            for (gt, &value) in column.iter().enumerate().skip(1) {
                if value > best_iou {
                    best_gt = gt;
                    best_iou = value;
                }
            }
            // NaN overlaps fall through to background
            let label = if !(best_iou >= self.low) {
                MatchLabel::Background
            } else if best_iou < self.high {
                MatchLabel::Ignore
            } else {
                MatchLabel::Positive
            };
            best.push((best_gt, label));
        }

        if self.allow_low_quality_matches {
            for row in iou.axis_iter(Axis(0)) {
                let highest = row.iter().copied().fold(0.0f32, f32::max);
                if highest <= 0.0 {
                    continue;
                }
                for (anchor, &value) in row.iter().enumerate() {
                    if value == highest {
                        best[anchor].1 = MatchLabel::Positive;
                    }
                }
            }
        }

        best.into_iter()
            .map(|(gt, label)| Match {
                label,
                gt_index: (label == MatchLabel::Positive).then_some(gt),
            })
            .collect()
    }
}
