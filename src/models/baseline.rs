/// Plain re-ID network: backbone, global pooling, embedding head and optional classifier
use candle_core::{Module, Result, Tensor};
use candle_nn::{linear, Linear, VarBuilder};

use super::{l2_normalize, Backbone, ModelConfig, ModelOutput, ReidModel};
use crate::layers::BatchNorm;

/// Single-output model
///
/// Returns identity logits when built with `num_classes > 0`, otherwise the
/// (optionally normalized) embedding.
pub struct BaselineNet {
    config: ModelConfig,
    backbone: Backbone,
    feat: Option<(Linear, BatchNorm)>,
    classifier: Option<Linear>,
}

impl BaselineNet {
    pub fn new(config: ModelConfig, vb: VarBuilder) -> crate::Result<Self> {
        config.validate()?;

        let backbone = Backbone::new(&config, vb.pp("base"))?;

        let feat = if config.num_features > 0 {
            let proj = linear(config.channels.1, config.num_features, vb.pp("feat"))?;
            let bn = BatchNorm::new(config.num_features, vb.pp("feat_bn"))?;
            Some((proj, bn))
        } else {
            None
        };

        let classifier = if config.num_classes > 0 {
            Some(linear(
                config.feature_dim(),
                config.num_classes,
                vb.pp("classifier"),
            )?)
        } else {
            None
        };

        Ok(Self {
            config,
            backbone,
            feat,
            classifier,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Pooled, projected features before the classifier
    pub fn extract_features(&self, images: &Tensor) -> Result<Tensor> {
        let map = self.backbone.forward(images)?;
        let pooled = map.mean(3)?.mean(2)?;

        let x = match &self.feat {
            Some((proj, bn)) => bn.forward(&proj.forward(&pooled)?)?,
            None => pooled,
        };

        if self.config.normalize_features {
            l2_normalize(&x)
        } else {
            Ok(x)
        }
    }
}

impl ReidModel for BaselineNet {
    fn forward(&self, images: &Tensor) -> Result<ModelOutput> {
        let x = self.extract_features(images)?;

        match &self.classifier {
            Some(classifier) => {
                let x = if self.feat.is_some() && !self.config.normalize_features {
                    x.relu()?
                } else {
                    x
                };
                Ok(ModelOutput::Embedding(classifier.forward(&x)?))
            }
            None => Ok(ModelOutput::Embedding(x)),
        }
    }

    fn has_part_predictions(&self) -> bool {
        false
    }

    fn backbone_norms(&self) -> Vec<&BatchNorm> {
        self.backbone.norms()
    }

    fn set_training(&self, training: bool) {
        for bn in self.backbone.norms() {
            bn.set_training(training);
        }
        if let Some((_, bn)) = &self.feat {
            bn.set_training(training);
        }
    }
}
