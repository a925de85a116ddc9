/// Re-identification model interface and reference architectures
use candle_core::{Module, Result, Tensor, D};
use candle_nn::{conv2d_no_bias, Conv2d, Conv2dConfig, VarBuilder};
use serde::{Deserialize, Serialize};

use crate::layers::BatchNorm;
use crate::ReidError;

pub mod baseline;
pub mod loader;
pub mod part;

pub use baseline::BaselineNet;
pub use part::PartNet;

/// Output of a re-ID model forward pass
#[derive(Debug, Clone)]
pub enum ModelOutput {
    /// A single tensor: identity logits, or the embedding when the model has no classifier
    Embedding(Tensor),
    /// Global embedding plus one logit tensor per horizontal part
    Parts {
        embedding: Tensor,
        part_logits: Vec<Tensor>,
    },
}

impl ModelOutput {
    /// The global tensor: the embedding of a part model, or the single output otherwise
    pub fn embedding(&self) -> &Tensor {
        match self {
            ModelOutput::Embedding(t) => t,
            ModelOutput::Parts { embedding, .. } => embedding,
        }
    }

    /// Per-part logits, empty for single-output models
    pub fn part_logits(&self) -> &[Tensor] {
        match self {
            ModelOutput::Embedding(_) => &[],
            ModelOutput::Parts { part_logits, .. } => part_logits,
        }
    }
}

/// Capabilities the trainer needs from a model
pub trait ReidModel {
    fn forward(&self, images: &Tensor) -> Result<ModelOutput>;

    /// Whether `forward` returns [`ModelOutput::Parts`]
    fn has_part_predictions(&self) -> bool;

    /// Normalization layers of the shared feature extractor (head layers excluded)
    fn backbone_norms(&self) -> Vec<&BatchNorm>;

    /// Switch every normalization layer between training and inference mode
    fn set_training(&self, training: bool);
}

/// Architecture hyperparameters shared by the reference models
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Image channels
    pub in_channels: usize,

    /// Channels of the two backbone stages
    pub channels: (usize, usize),

    /// Embedding size after the head projection (0 keeps the pooled backbone features)
    pub num_features: usize,

    /// Number of identities (0 disables the classifier)
    pub num_classes: usize,

    /// Horizontal stripes for part-based models
    pub num_parts: usize,

    /// L2-normalize the embedding (used with OIM)
    pub normalize_features: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            channels: (32, 64),
            num_features: 128,
            num_classes: 751,
            num_parts: 6,
            normalize_features: false,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.in_channels == 0 || self.channels.0 == 0 || self.channels.1 == 0 {
            return Err(ReidError::Config(
                "in_channels and backbone channels must be > 0".to_string(),
            ));
        }

        if self.num_parts == 0 {
            return Err(ReidError::Config("num_parts must be > 0".to_string()));
        }

        Ok(())
    }

    /// Width of the tensor the head produces before the classifier
    pub fn feature_dim(&self) -> usize {
        if self.num_features > 0 {
            self.num_features
        } else {
            self.channels.1
        }
    }
}

/// Two-stage convolutional feature extractor
///
/// conv(stride 2) -> bn -> relu -> conv -> bn -> relu
pub struct Backbone {
    conv1: Conv2d,
    bn1: BatchNorm,
    conv2: Conv2d,
    bn2: BatchNorm,
}

impl Backbone {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let (c1, c2) = config.channels;
        let conv1 = conv2d_no_bias(
            config.in_channels,
            c1,
            3,
            Conv2dConfig {
                padding: 1,
                stride: 2,
                ..Default::default()
            },
            vb.pp("conv1"),
        )?;
        let conv2 = conv2d_no_bias(
            c1,
            c2,
            3,
            Conv2dConfig {
                padding: 1,
                ..Default::default()
            },
            vb.pp("conv2"),
        )?;

        Ok(Self {
            conv1,
            bn1: BatchNorm::new(c1, vb.pp("bn1"))?,
            conv2,
            bn2: BatchNorm::new(c2, vb.pp("bn2"))?,
        })
    }

    /// Feature map [batch, c2, height / 2, width / 2]
    pub fn forward(&self, images: &Tensor) -> Result<Tensor> {
        let x = self.bn1.forward(&self.conv1.forward(images)?)?.relu()?;
        self.bn2.forward(&self.conv2.forward(&x)?)?.relu()
    }

    pub fn norms(&self) -> Vec<&BatchNorm> {
        vec![&self.bn1, &self.bn2]
    }
}

/// Row-wise L2 normalization of a [batch, dim] tensor
pub fn l2_normalize(x: &Tensor) -> Result<Tensor> {
    let norm = (x.sqr()?.sum_keepdim(D::Minus1)? + 1e-12)?.sqrt()?;
    x.broadcast_div(&norm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn test_model_output_accessors() -> Result<()> {
        let device = Device::Cpu;
        let emb = Tensor::zeros((2, 4), DType::F32, &device)?;
        let logits = Tensor::ones((2, 3), DType::F32, &device)?;

        let plain = ModelOutput::Embedding(emb.clone());
        assert!(plain.part_logits().is_empty());
        assert_eq!(plain.embedding().dims(), &[2, 4]);

        let parts = ModelOutput::Parts {
            embedding: emb,
            part_logits: vec![logits.clone(), logits],
        };
        assert_eq!(parts.part_logits().len(), 2);
        assert_eq!(parts.embedding().dims(), &[2, 4]);

        Ok(())
    }

    #[test]
    fn test_l2_normalize_unit_rows() -> Result<()> {
        let x = Tensor::new(&[[3f32, 4.0], [0.0, 2.0]], &Device::Cpu)?;
        let norms = l2_normalize(&x)?.sqr()?.sum(1)?.to_vec1::<f32>()?;
        for n in norms {
            assert!((n - 1.0).abs() < 1e-5);
        }
        Ok(())
    }

    #[test]
    fn test_config_validation() {
        assert!(ModelConfig::default().validate().is_ok());

        let bad = ModelConfig {
            num_parts: 0,
            ..ModelConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
