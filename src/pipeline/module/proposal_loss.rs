use std::collections::BTreeMap;
use std::f32::consts::PI;

use ndarray::{ArrayView1, Axis, Zip};
use serde::Serialize;

use crate::error::{check_shape, Result};
use crate::pipeline::module::proposal_layer::ProposalMaps;
use crate::pipeline::proposal_pipeline::config::{ProposalConfig, BOX_DOF};
use crate::types::BatchTargets;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProposalLosses {
    pub cls_loss: f32,
    pub reg_loss: f32,
    pub loss: f32,
}

impl ProposalLosses {
    pub fn to_map(&self) -> BTreeMap<&'static str, f32> {
        BTreeMap::from([
            ("classification_loss", self.cls_loss),
            ("regression_loss", self.reg_loss),
            ("total_loss", self.loss),
        ])
    }
}

/// Sigmoid focal loss of a single logit against a {0, 1} target.
/// A negative `alpha` turns off class balancing.
pub fn sigmoid_focal_loss(logit: f32, target: f32, alpha: f32, gamma: f32) -> f32 {
    let prob = 1.0 / (1.0 + (-logit).exp());
    // numerically stable binary cross entropy with logits
    let ce = logit.max(0.0) - logit * target + (-logit.abs()).exp().ln_1p();
    let p_t = prob * target + (1.0 - prob) * (1.0 - target);
    let mut loss = ce * (1.0 - p_t).powf(gamma);
    if alpha >= 0.0 {
        loss *= alpha * target + (1.0 - alpha) * (1.0 - target);
    }
    loss
}

pub fn smooth_l1(diff: f32, beta: f32) -> f32 {
    let diff = diff.abs();
    if beta < 1e-5 {
        diff
    } else if diff < beta {
        0.5 * diff * diff / beta
    } else {
        diff - 0.5 * beta
    }
}

#[derive(Debug, Clone)]
pub struct ProposalLoss {
    lambda: f32,
    alpha: f32,
    gamma: f32,
    beta: f32,
}

impl ProposalLoss {
    pub fn new(config: &ProposalConfig) -> Result<Self> {
        config.validate()?;
        Ok(ProposalLoss {
            lambda: config.train.lambda,
            alpha: config.train.focal_alpha,
            gamma: config.train.focal_gamma,
            beta: config.train.smooth_l1_beta,
        })
    }

    fn check_shapes(&self, predictions: &ProposalMaps, targets: &BatchTargets) -> Result<()> {
        let g_cls = targets.g_cls.shape();
        let g_reg = targets.g_reg.shape();
        check_shape("classification map", g_cls, predictions.cls.shape())?;
        check_shape(
            "classification mask",
            &[g_cls[0], g_cls[2], g_cls[3], g_cls[4]],
            targets.m_cls.shape(),
        )?;

        // one channel per class plus background
        check_shape("classification targets", &[g_reg[1] + 1], &[g_cls[1]])?;
        let m_reg = [g_cls[0], g_reg[1], g_cls[2], g_cls[3], g_cls[4]];
        check_shape("regression mask", &m_reg, targets.m_reg.shape())?;
        let mut expected_reg = m_reg.to_vec();
        expected_reg.push(BOX_DOF);
        check_shape("regression targets", &expected_reg, g_reg)?;
        check_shape("regression map", g_reg, predictions.reg.shape())
    }

    fn regression(&self, predicted: ArrayView1<f32>, target: ArrayView1<f32>) -> f32 {
        let term = |i: usize| smooth_l1(predicted[i] - target[i], self.beta);
        let translation: f32 = (0..3).map(term).sum();
        let size: f32 = (3..6).map(term).sum();
        let orientation = term(6) / PI;
        translation + size + orientation
    }

    pub fn forward(&self, predictions: &ProposalMaps, targets: &BatchTargets) -> Result<ProposalLosses> {
        self.check_shapes(predictions, targets)?;
        let num_positive = targets.m_reg.iter().filter(|m| **m).count();
        let normalizer = num_positive.max(1) as f32;

        let mut cls_sum = 0.0f32;
        Zip::indexed(&predictions.cls)
            .and(&targets.g_cls)
            .for_each(|(b, _, y, r, w), &logit, &target| {
                if targets.m_cls[[b, y, r, w]] {
                    cls_sum += sigmoid_focal_loss(logit, target, self.alpha, self.gamma);
                }
            });

        let mut reg_sum = 0.0f32;
        Zip::from(predictions.reg.lanes(Axis(5)))
            .and(targets.g_reg.lanes(Axis(5)))
            .and(&targets.m_reg)
            .for_each(|predicted, target, &positive| {
                if positive {
                    reg_sum += self.regression(predicted, target);
                }
            });

        let cls_loss = cls_sum / normalizer;
        let reg_loss = reg_sum / normalizer;
        Ok(ProposalLosses {
            cls_loss,
            reg_loss,
            loss: cls_loss + self.lambda * reg_loss,
        })
    }
}
