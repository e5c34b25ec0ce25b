use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::error::{ProposalError, Result};
use crate::rcnn::matcher::validate_thresholds;

pub const BOX_DOF: usize = 7;

/// Anchor template for a single class.
#[derive(Debug, Clone, Deserialize)]
pub struct AnchorConfig {
    #[serde(default)]
    pub name: String,
    /// Base box size (width, length, height).
    pub wlh: [f32; 3],
    /// Height of the anchor centers above the sensor origin.
    pub center_z: f32,
    /// `[low, high]` IoU thresholds used by this class's matcher.
    pub iou_thresh: Vec<f32>,
}

impl AnchorConfig {
    pub fn new(name: &str, wlh: [f32; 3], center_z: f32, iou_thresh: [f32; 2]) -> Self {
        AnchorConfig {
            name: name.to_string(),
            wlh,
            center_z,
            iou_thresh: iou_thresh.to_vec(),
        }
    }
}

/// Ground plane region covered by the anchor grid.
#[derive(Debug, Clone, Deserialize)]
pub struct GridConfig {
    /// `[x_min, y_min, x_max, y_max]` in meters.
    pub bounds: [f32; 4],
    /// `[rows, cols]`; rows run along y, cols along x.
    pub shape: [usize; 2],
}

impl GridConfig {
    pub fn new() -> Self {
        GridConfig {
            bounds: [0.0, -40.0, 70.4, 40.0],
            shape: [200, 176],
        }
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProposalHeadConfig {
    /// Channel count of the incoming BEV feature map.
    pub c_in: usize,
    /// Emit an extra background logit per yaw bin so the classification map
    /// lines up with the classification target channel for channel.
    pub predict_background: bool,
    pub seed: Option<u64>,
}

impl ProposalHeadConfig {
    pub fn new() -> Self {
        ProposalHeadConfig {
            c_in: 128,
            predict_background: false,
            seed: None,
        }
    }
}

impl Default for ProposalHeadConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Weight of the regression loss in the total loss.
    pub lambda: f32,
    /// Negative values disable the alpha balancing term.
    pub focal_alpha: f32,
    pub focal_gamma: f32,
    pub smooth_l1_beta: f32,
}

impl TrainConfig {
    pub fn new() -> Self {
        TrainConfig {
            lambda: 1.0,
            focal_alpha: 0.25,
            focal_gamma: 2.0,
            smooth_l1_beta: 1.0,
        }
    }
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProposalConfig {
    pub num_classes: usize,
    pub num_yaw: usize,
    pub box_dof: usize,
    pub allow_low_quality_matches: bool,
    pub grid: GridConfig,
    pub anchors: Vec<AnchorConfig>,
    pub proposal: ProposalHeadConfig,
    pub train: TrainConfig,
}

impl ProposalConfig {
    pub fn new() -> Self {
        ProposalConfig {
            num_classes: 3,
            num_yaw: 2,
            box_dof: BOX_DOF,
            allow_low_quality_matches: true,
            grid: GridConfig::new(),
            anchors: vec![
                AnchorConfig::new("Car", [1.6, 3.9, 1.56], -1.0, [0.45, 0.60]),
                AnchorConfig::new("Pedestrian", [0.6, 0.8, 1.73], -0.6, [0.35, 0.50]),
                AnchorConfig::new("Cyclist", [0.6, 1.76, 1.73], -0.6, [0.35, 0.50]),
            ],
            proposal: ProposalHeadConfig::new(),
            train: TrainConfig::new(),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = Self::from_yaml_str(&contents)
            .with_context(|| format!("failed to load config {}", path.display()))?;
        Ok(config)
    }

    pub fn from_yaml_str(contents: &str) -> anyhow::Result<Self> {
        let config: ProposalConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects any configuration the assigner, head or loss could not honor.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(ProposalError::InvalidConfiguration(msg));

        if self.box_dof != BOX_DOF {
            return invalid(format!("box_dof must be {BOX_DOF}, got {}", self.box_dof));
        }
        if self.num_classes == 0 {
            return invalid("num_classes must be positive".to_string());
        }
        if self.anchors.len() != self.num_classes {
            return invalid(format!(
                "{} anchor entries configured for {} classes",
                self.anchors.len(),
                self.num_classes
            ));
        }
        if self.num_yaw == 0 {
            return invalid("num_yaw must be positive".to_string());
        }

        let [rows, cols] = self.grid.shape;
        if rows == 0 || cols == 0 {
            return invalid(format!("grid shape {:?} has an empty axis", self.grid.shape));
        }
        let [x_min, y_min, x_max, y_max] = self.grid.bounds;
        if !(x_max > x_min && y_max > y_min) {
            return invalid(format!("grid bounds {:?} are empty", self.grid.bounds));
        }

        for (i, anchor) in self.anchors.iter().enumerate() {
            if anchor.wlh.iter().any(|v| !(*v > 0.0)) {
                return invalid(format!("anchor {i} has non-positive size {:?}", anchor.wlh));
            }
            validate_thresholds(&anchor.iou_thresh)
                .map_err(|e| ProposalError::InvalidConfiguration(format!("anchor {i}: {e}")))?;
        }

        if self.proposal.c_in == 0 {
            return invalid("proposal.c_in must be positive".to_string());
        }
        if !(self.train.lambda >= 0.0) {
            return invalid(format!("train.lambda must be non-negative, got {}", self.train.lambda));
        }
        if !(self.train.focal_gamma >= 0.0) {
            return invalid(format!("train.focal_gamma must be non-negative, got {}", self.train.focal_gamma));
        }
        if !(self.train.smooth_l1_beta >= 0.0) {
            return invalid(format!("train.smooth_l1_beta must be non-negative, got {}", self.train.smooth_l1_beta));
        }
        Ok(())
    }

    /// Classification channels produced per yaw bin by the proposal head.
    pub fn num_cls_channels(&self) -> usize {
        if self.proposal.predict_background {
            self.num_classes + 1
        } else {
            self.num_classes
        }
    }
}

impl Default for ProposalConfig {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(test)]
mod tests {
    use crate::error::ProposalError;
    use crate::pipeline::proposal_pipeline::config::{AnchorConfig, ProposalConfig};

    #[test]
    fn test_default_config_is_valid() {
        let config = ProposalConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.num_cls_channels(), 3);
    }

    #[test]
    fn test_threshold_list_length_mismatch() {
        let mut config = ProposalConfig::new();
        config.anchors[1].iou_thresh = vec![0.35];
        match config.validate() {
            Err(ProposalError::InvalidConfiguration(msg)) => assert!(msg.contains("anchor 1")),
            other => panic!("expected invalid configuration, got {:?}", other),
        }
    }

    #[test]
    fn test_inconsistent_class_count() {
        let mut config = ProposalConfig::new();
        config.anchors.push(AnchorConfig::new("Van", [1.9, 5.0, 2.0], -1.0, [0.45, 0.6]));
        assert!(matches!(config.validate(), Err(ProposalError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_inverted_thresholds() {
        let mut config = ProposalConfig::new();
        config.anchors[0].iou_thresh = vec![0.6, 0.45];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_box_dof_is_fixed() {
        let mut config = ProposalConfig::new();
        config.box_dof = 9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_yaml_str() {
        let yaml = r#"
num_classes: 1
num_yaw: 4
allow_low_quality_matches: false
grid:
  bounds: [0.0, 0.0, 8.0, 4.0]
  shape: [2, 4]
anchors:
  - name: Car
    wlh: [1.6, 3.9, 1.56]
    center_z: -1.0
    iou_thresh: [0.45, 0.6]
proposal:
  c_in: 16
train:
  lambda: 2.0
"#;
        let config = ProposalConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.num_classes, 1);
        assert_eq!(config.num_yaw, 4);
        assert_eq!(config.box_dof, 7);
        assert!(!config.allow_low_quality_matches);
        assert_eq!(config.proposal.c_in, 16);
        assert!(!config.proposal.predict_background);
        assert_eq!(config.train.lambda, 2.0);
        assert_eq!(config.train.focal_gamma, 2.0);
    }

    #[test]
    fn test_from_yaml_str_rejects_class_mismatch() {
        let yaml = r#"
num_classes: 2
anchors:
  - wlh: [1.6, 3.9, 1.56]
    center_z: -1.0
    iou_thresh: [0.45, 0.6]
"#;
        assert!(ProposalConfig::from_yaml_str(yaml).is_err());
    }
}
