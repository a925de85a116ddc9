/// Part-based re-ID network
///
/// The backbone feature map is cut into horizontal stripes; each stripe is
/// pooled, reduced and classified on its own.
use candle_core::{Module, Result, Tensor};
use candle_nn::{linear, Linear, VarBuilder};

use super::{l2_normalize, Backbone, ModelConfig, ModelOutput, ReidModel};
use crate::layers::BatchNorm;
use crate::ReidError;

/// Per-stripe head: reduce -> bn -> relu -> classify
struct PartHead {
    reduce: Linear,
    bn: BatchNorm,
    classifier: Linear,
}

impl PartHead {
    fn new(in_dim: usize, num_features: usize, num_classes: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            reduce: linear(in_dim, num_features, vb.pp("reduce"))?,
            bn: BatchNorm::new(num_features, vb.pp("bn"))?,
            classifier: linear(num_features, num_classes, vb.pp("classifier"))?,
        })
    }

    fn forward(&self, stripe: &Tensor) -> Result<Tensor> {
        let x = self.bn.forward(&self.reduce.forward(stripe)?)?.relu()?;
        self.classifier.forward(&x)
    }
}

/// Model returning the global embedding and one logit tensor per stripe
pub struct PartNet {
    config: ModelConfig,
    backbone: Backbone,
    heads: Vec<PartHead>,
}

impl PartNet {
    pub fn new(config: ModelConfig, vb: VarBuilder) -> crate::Result<Self> {
        config.validate()?;
        if config.num_classes == 0 || config.num_features == 0 {
            return Err(ReidError::Config(
                "part model needs num_classes > 0 and num_features > 0".to_string(),
            ));
        }

        let backbone = Backbone::new(&config, vb.pp("base"))?;
        let mut heads = Vec::with_capacity(config.num_parts);
        for i in 0..config.num_parts {
            heads.push(PartHead::new(
                config.channels.1,
                config.num_features,
                config.num_classes,
                vb.pp(format!("part_{}", i)),
            )?);
        }

        Ok(Self {
            config,
            backbone,
            heads,
        })
    }

    pub fn num_parts(&self) -> usize {
        self.heads.len()
    }

    /// Split [batch, c, h, w] into pooled stripes of shape [batch, c]
    fn pool_stripes(&self, map: &Tensor) -> Result<Vec<Tensor>> {
        let height = map.dim(2)?;
        let parts = self.heads.len();
        if height < parts {
            candle_core::bail!(
                "feature map height {} is smaller than the number of parts {}",
                height,
                parts
            );
        }

        let stripe = height / parts;
        let mut pooled = Vec::with_capacity(parts);
        for i in 0..parts {
            let start = i * stripe;
            // Last stripe absorbs the remainder rows
            let len = if i + 1 == parts { height - start } else { stripe };
            pooled.push(map.narrow(2, start, len)?.mean(3)?.mean(2)?);
        }
        Ok(pooled)
    }
}

impl ReidModel for PartNet {
    fn forward(&self, images: &Tensor) -> Result<ModelOutput> {
        let map = self.backbone.forward(images)?;

        let global = map.mean(3)?.mean(2)?;
        let embedding = if self.config.normalize_features {
            l2_normalize(&global)?
        } else {
            global
        };

        let stripes = self.pool_stripes(&map)?;
        let part_logits = self
            .heads
            .iter()
            .zip(stripes.iter())
            .map(|(head, stripe)| head.forward(stripe))
            .collect::<Result<Vec<_>>>()?;

        Ok(ModelOutput::Parts {
            embedding,
            part_logits,
        })
    }

    fn has_part_predictions(&self) -> bool {
        true
    }

    fn backbone_norms(&self) -> Vec<&BatchNorm> {
        self.backbone.norms()
    }

    fn set_training(&self, training: bool) {
        for bn in self.backbone.norms() {
            bn.set_training(training);
        }
        for head in &self.heads {
            head.bn.set_training(training);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_part_outputs() -> crate::Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let config = ModelConfig {
            in_channels: 3,
            channels: (4, 8),
            num_features: 6,
            num_classes: 5,
            num_parts: 3,
            normalize_features: false,
        };
        let model = PartNet::new(config, vb)?;

        // Feature map height is 14 / 2 = 7, split 2 + 2 + 3
        let images = Tensor::randn(0f32, 1.0, (4, 3, 14, 6), &device)?;
        let output = model.forward(&images)?;

        assert!(model.has_part_predictions());
        assert_eq!(output.embedding().dims(), &[4, 8]);
        assert_eq!(output.part_logits().len(), 3);
        for logits in output.part_logits() {
            assert_eq!(logits.dims(), &[4, 5]);
        }

        Ok(())
    }

    #[test]
    fn test_too_many_parts_fails() -> crate::Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let config = ModelConfig {
            in_channels: 1,
            channels: (2, 2),
            num_features: 2,
            num_classes: 2,
            num_parts: 6,
            normalize_features: false,
        };
        let model = PartNet::new(config, vb)?;

        let images = Tensor::randn(0f32, 1.0, (2, 1, 4, 4), &device)?;
        assert!(model.forward(&images).is_err());

        Ok(())
    }
}
