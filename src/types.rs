use ndarray::{s, stack, Array1, Array2, Array3, Array4, Array5, Array6, Axis};

use crate::error::{ProposalError, Result};
use crate::pipeline::proposal_pipeline::config::BOX_DOF;

/// One scene's ground truth, plus the targets attached by the assigner.
#[derive(Debug, Clone)]
pub struct Scene {
    /// `[N, 7]` boxes as (x, y, z, w, l, h, yaw).
    pub boxes: Array2<f32>,
    /// `[N]` class index of each box.
    pub class_idx: Array1<usize>,
    pub targets: Option<ProposalTargets>,
}

impl Scene {
    pub fn new(boxes: Array2<f32>, class_idx: Array1<usize>) -> Self {
        Scene {
            boxes,
            class_idx,
            targets: None,
        }
    }

    pub fn empty() -> Self {
        Self::new(Array2::zeros((0, BOX_DOF)), Array1::zeros(0))
    }

    pub fn num_boxes(&self) -> usize {
        self.boxes.nrows()
    }

    pub fn validate(&self, num_classes: usize) -> Result<()> {
        if self.boxes.ncols() != BOX_DOF {
            return Err(ProposalError::InvalidScene(format!(
                "boxes must be [N, {BOX_DOF}], got {:?}",
                self.boxes.shape()
            )));
        }
        if self.class_idx.len() != self.boxes.nrows() {
            return Err(ProposalError::InvalidScene(format!(
                "{} class labels for {} boxes",
                self.class_idx.len(),
                self.boxes.nrows()
            )));
        }
        if let Some(label) = self.class_idx.iter().find(|c| **c >= num_classes) {
            return Err(ProposalError::InvalidScene(format!(
                "class label {label} out of range for {num_classes} classes"
            )));
        }
        for (i, bbox) in self.boxes.rows().into_iter().enumerate() {
            if bbox.iter().any(|v| !v.is_finite()) {
                return Err(ProposalError::InvalidScene(format!("box {i} has non-finite values {bbox}")));
            }
            if bbox.slice(s![3..6]).iter().any(|v| *v <= 0.0) {
                return Err(ProposalError::InvalidScene(format!("box {i} has non-positive size {bbox}")));
            }
        }
        Ok(())
    }
}

/// Per-scene supervision for the proposal head.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposalTargets {
    /// `[classes + 1, yaw, rows, cols]`, last channel is background.
    pub g_cls: Array4<f32>,
    /// `[yaw, rows, cols]`, false where every class ignores the site.
    pub m_cls: Array3<bool>,
    /// `[classes, yaw, rows, cols, 7]`, zero outside positive anchors.
    pub g_reg: Array5<f32>,
    /// `[classes, yaw, rows, cols]`, true exactly at positive anchors.
    pub m_reg: Array4<bool>,
    /// Sites downgraded to ignore because several classes claimed them.
    pub ambiguous: usize,
}

impl ProposalTargets {
    pub fn num_positive(&self) -> usize {
        self.m_reg.iter().filter(|m| **m).count()
    }

    pub fn num_negative(&self) -> usize {
        match self.g_cls.outer_iter().last() {
            Some(background) => background.iter().filter(|v| **v > 0.0).count(),
            None => 0,
        }
    }

    pub fn num_ignored(&self) -> usize {
        self.m_cls.iter().filter(|m| !**m).count()
    }
}

/// Scene targets stacked along a leading batch axis.
#[derive(Debug, Clone)]
pub struct BatchTargets {
    pub g_cls: Array5<f32>,
    pub m_cls: Array4<bool>,
    pub g_reg: Array6<f32>,
    pub m_reg: Array5<bool>,
}

impl BatchTargets {
    pub fn stack(targets: &[&ProposalTargets]) -> Result<Self> {
        Ok(BatchTargets {
            g_cls: stack(Axis(0), &targets.iter().map(|t| t.g_cls.view()).collect::<Vec<_>>())?,
            m_cls: stack(Axis(0), &targets.iter().map(|t| t.m_cls.view()).collect::<Vec<_>>())?,
            g_reg: stack(Axis(0), &targets.iter().map(|t| t.g_reg.view()).collect::<Vec<_>>())?,
            m_reg: stack(Axis(0), &targets.iter().map(|t| t.m_reg.view()).collect::<Vec<_>>())?,
        })
    }

    pub fn from_scenes(scenes: &[Scene]) -> Result<Self> {
        let targets = scenes
            .iter()
            .enumerate()
            .map(|(i, scene)| {
                scene
                    .targets
                    .as_ref()
                    .ok_or_else(|| ProposalError::InvalidScene(format!("scene {i} has no targets assigned")))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::stack(&targets)
    }
}
