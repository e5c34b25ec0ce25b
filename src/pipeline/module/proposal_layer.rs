use ndarray::{Array1, Array2, Array4, Array5, Array6, ArrayView4, Axis};
use ndarray_rand::rand::rngs::StdRng;
use ndarray_rand::rand::{thread_rng, Rng, SeedableRng};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;

use crate::error::{check_shape, ProposalError, Result};
use crate::pipeline::proposal_pipeline::config::{ProposalConfig, BOX_DOF};

/// Initial foreground probability encoded in the classification bias.
pub const PRIOR_PROBABILITY: f32 = 0.01;
pub const WEIGHT_STD: f32 = 0.01;

/// Raw head outputs.
#[derive(Debug, Clone)]
pub struct ProposalMaps {
    /// `[batch, classes, yaw, rows, cols]` logits (`classes + 1` with a
    /// background channel).
    pub cls: Array5<f32>,
    /// `[batch, classes, yaw, rows, cols, 7]` box deltas.
    pub reg: Array6<f32>,
}

/// 1x1 convolution over an NCHW feature map.
#[derive(Debug, Clone)]
pub struct PointwiseConv {
    /// `[out_channels, in_channels]`
    pub weight: Array2<f32>,
    pub bias: Array1<f32>,
}

impl PointwiseConv {
    pub fn forward(&self, features: ArrayView4<f32>) -> Result<Array4<f32>> {
        let (batch, channels, rows, cols) = features.dim();
        let out_channels = self.weight.nrows();
        check_shape("feature map channels", &[self.weight.ncols()], &[channels])?;

        let bias = self.bias.view().insert_axis(Axis(1));
        let mut output = Array4::<f32>::zeros((batch, out_channels, rows, cols));
        for (x, mut y) in features.outer_iter().zip(output.outer_iter_mut()) {
            let x = x.as_standard_layout().into_shape((channels, rows * cols))?;
            let projected = self.weight.dot(&x) + &bias;
            y.assign(&projected.into_shape((out_channels, rows, cols))?);
        }
        Ok(output)
    }
}

/// Proposal head over the BEV feature map.
#[derive(Debug, Clone)]
pub struct ProposalLayer {
    num_classes: usize,
    num_cls_channels: usize,
    num_yaw: usize,
    pub conv_cls: PointwiseConv,
    pub conv_reg: PointwiseConv,
}

impl ProposalLayer {
    pub fn new(config: &ProposalConfig) -> Result<Self> {
        match config.proposal.seed {
            Some(seed) => Self::with_rng(config, &mut StdRng::seed_from_u64(seed)),
            None => Self::with_rng(config, &mut thread_rng()),
        }
    }

    pub fn with_rng<R: Rng + ?Sized>(config: &ProposalConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let c_in = config.proposal.c_in;
        let num_cls_channels = config.num_cls_channels();
        let cls_out = num_cls_channels * config.num_yaw;
        let reg_out = config.num_classes * config.num_yaw * BOX_DOF;

        let normal = Normal::new(0.0f32, WEIGHT_STD)
            .map_err(|e| ProposalError::InvalidConfiguration(format!("weight init: {e}")))?;
        let prior_bias = -((1.0 - PRIOR_PROBABILITY) / PRIOR_PROBABILITY).ln();

        Ok(ProposalLayer {
            num_classes: config.num_classes,
            num_cls_channels,
            num_yaw: config.num_yaw,
            conv_cls: PointwiseConv {
                weight: Array2::random_using((cls_out, c_in), normal, rng),
                bias: Array1::from_elem(cls_out, prior_bias),
            },
            conv_reg: PointwiseConv {
                weight: Array2::random_using((reg_out, c_in), normal, rng),
                bias: Array1::zeros(reg_out),
            },
        })
    }

    fn reshape_cls(&self, cls_map: Array4<f32>) -> Result<Array5<f32>> {
        let (batch, _, rows, cols) = cls_map.dim();
        Ok(cls_map.into_shape((batch, self.num_cls_channels, self.num_yaw, rows, cols))?)
    }

    // channels are laid out (class, dof, yaw); move dof last
    fn reshape_reg(&self, reg_map: Array4<f32>) -> Result<Array6<f32>> {
        let (batch, _, rows, cols) = reg_map.dim();
        let reg_map = reg_map
            .into_shape((batch, self.num_classes, BOX_DOF, self.num_yaw, rows, cols))?
            .permuted_axes([0, 1, 3, 4, 5, 2]);
        Ok(reg_map.as_standard_layout().into_owned())
    }

    pub fn forward(&self, feature_map: ArrayView4<f32>) -> Result<ProposalMaps> {
        let cls = self.reshape_cls(self.conv_cls.forward(feature_map)?)?;
        let reg = self.reshape_reg(self.conv_reg.forward(feature_map)?)?;
        Ok(ProposalMaps { cls, reg })
    }
}


#[cfg(test)]
mod tests {
    use ndarray::{Array1, Array2, Array4};
    use ndarray_rand::rand::rngs::StdRng;
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;

    use crate::error::ProposalError;
    use crate::pipeline::module::proposal_layer::{ProposalLayer, PRIOR_PROBABILITY};
    use crate::pipeline::proposal_pipeline::config::{GridConfig, ProposalConfig};

    fn config() -> ProposalConfig {
        let mut config = ProposalConfig::new();
        config.num_yaw = 2;
        config.grid = GridConfig { bounds: [0.0, 0.0, 8.0, 6.0], shape: [3, 4] };
        config.proposal.c_in = 64;
        config.proposal.seed = Some(7);
        config
    }

    fn features(batch: usize, c_in: usize) -> Array4<f32> {
        let mut rng = StdRng::seed_from_u64(11);
        Array4::random_using((batch, c_in, 3, 4), Uniform::new(-1.0f32, 1.0), &mut rng)
    }

    #[test]
    fn test_forward_shapes() {
        let layer = ProposalLayer::new(&config()).unwrap();
        let maps = layer.forward(features(2, 64).view()).unwrap();
        assert_eq!(maps.cls.shape(), &[2, 3, 2, 3, 4]);
        assert_eq!(maps.reg.shape(), &[2, 3, 2, 3, 4, 7]);
    }

    #[test]
    fn test_forward_shapes_with_background() {
        let mut config = config();
        config.proposal.predict_background = true;
        let layer = ProposalLayer::new(&config).unwrap();
        let maps = layer.forward(features(1, 64).view()).unwrap();
        assert_eq!(maps.cls.shape(), &[1, 4, 2, 3, 4]);
        assert_eq!(maps.reg.shape(), &[1, 3, 2, 3, 4, 7]);
    }

    #[test]
    fn test_init_weights() {
        let layer = ProposalLayer::new(&config()).unwrap();
        for bias in layer.conv_cls.bias.iter() {
            let prob = 1.0 / (1.0 + (-bias).exp());
            assert!((prob - PRIOR_PROBABILITY).abs() < 1e-6);
        }
        assert!(layer.conv_reg.bias.iter().all(|b| *b == 0.0));

        let weights = &layer.conv_reg.weight;
        let n = weights.len() as f32;
        let mean = weights.sum() / n;
        let std = (weights.mapv(|w| (w - mean).powi(2)).sum() / n).sqrt();
        assert!(mean.abs() < 2e-3, "mean {mean}");
        assert!((std - 0.01).abs() < 2e-3, "std {std}");
    }

    #[test]
    fn test_seeded_init_is_reproducible() {
        let a = ProposalLayer::new(&config()).unwrap();
        let b = ProposalLayer::new(&config()).unwrap();
        assert_eq!(a.conv_cls.weight, b.conv_cls.weight);
        assert_eq!(a.conv_reg.weight, b.conv_reg.weight);
    }

    #[test]
    fn test_regression_layout() {
        let config = config();
        let mut layer = ProposalLayer::new(&config).unwrap();
        let reg_out = layer.conv_reg.bias.len();
        layer.conv_reg.weight = Array2::zeros((reg_out, 64));
        layer.conv_reg.bias = Array1::from_iter((0..reg_out).map(|o| o as f32));

        let maps = layer.forward(features(1, 64).view()).unwrap();
        let (num_yaw, dof) = (config.num_yaw, 7);
        for class in 0..config.num_classes {
            for yaw in 0..num_yaw {
                for d in 0..dof {
                    let channel = (class * dof + d) * num_yaw + yaw;
                    assert_eq!(maps.reg[[0, class, yaw, 2, 3, d]], channel as f32);
                }
            }
        }
    }

    #[test]
    fn test_pointwise_projection() {
        let config = config();
        let mut layer = ProposalLayer::new(&config).unwrap();
        let cls_out = layer.conv_cls.bias.len();
        layer.conv_cls.weight = Array2::zeros((cls_out, 64));
        layer.conv_cls.weight[[1, 5]] = 2.0;
        layer.conv_cls.bias = Array1::zeros(cls_out);

        let features = features(1, 64);
        let maps = layer.forward(features.view()).unwrap();
        // channel 1 is class 0, yaw bin 1
        assert!((maps.cls[[0, 0, 1, 1, 2]] - 2.0 * features[[0, 5, 1, 2]]).abs() < 1e-6);
        assert_eq!(maps.cls[[0, 0, 0, 1, 2]], 0.0);
    }

    #[test]
    fn test_channel_mismatch() {
        let layer = ProposalLayer::new(&config()).unwrap();
        match layer.forward(features(1, 32).view()) {
            Err(ProposalError::ShapeMismatch { expected, actual, .. }) => {
                assert_eq!(expected, vec![64]);
                assert_eq!(actual, vec![32]);
            }
            other => panic!("expected shape mismatch, got {:?}", other.map(|_| ())),
        }
    }
}
