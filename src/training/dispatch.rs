/// Loss and precision selection for one forward pass
use candle_core::{DType, Tensor};

use crate::config::PartPrecision;
use crate::evaluation::accuracy;
use crate::loss::{cross_entropy, LossSpec};
use crate::models::ModelOutput;
use crate::{ReidError, Result};

/// Result of dispatching one model output through the active loss
#[derive(Debug, Clone)]
pub struct ForwardOutput {
    pub loss: Tensor,
    /// Top-1 (or triplet) precision in [0, 1]
    pub precision: f64,
    /// `(dist_ap, dist_an)` per anchor, metric losses only
    pub distances: Option<(Tensor, Tensor)>,
}

/// Routes model outputs to the right loss computation.
///
/// Whether the model produces per-part predictions is fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct ForwardDispatcher {
    part_predictions: bool,
    part_precision: PartPrecision,
}

impl ForwardDispatcher {
    pub fn new(part_predictions: bool, part_precision: PartPrecision) -> Self {
        Self {
            part_predictions,
            part_precision,
        }
    }

    pub fn part_predictions(&self) -> bool {
        self.part_predictions
    }

    pub fn dispatch(
        &self,
        output: ModelOutput,
        targets: &Tensor,
        criterion: &LossSpec,
    ) -> Result<ForwardOutput> {
        match criterion {
            LossSpec::Classification => {
                if self.part_predictions {
                    let parts = self.part_logits(output)?;
                    self.classify_parts(&parts, targets)
                } else {
                    let logits = self.single(output)?;
                    let loss = cross_entropy(&logits, targets)?;
                    let precision = accuracy(&logits, targets)?;
                    Ok(ForwardOutput {
                        loss,
                        precision,
                        distances: None,
                    })
                }
            }
            LossSpec::IdentityDiscriminative(oim) => {
                let embedding = self.embedding(output)?;
                let (loss, logits) = oim.forward(&embedding, targets)?;
                let precision = accuracy(&logits, targets)?;
                Ok(ForwardOutput {
                    loss,
                    precision,
                    distances: None,
                })
            }
            LossSpec::Metric(metric) => {
                let embedding = self.embedding(output)?;
                let out = metric.forward(&embedding, targets)?;
                Ok(ForwardOutput {
                    loss: out.loss,
                    precision: out.precision,
                    distances: Some((out.dist_ap, out.dist_an)),
                })
            }
        }
    }

    fn classify_parts(&self, parts: &[Tensor], targets: &Tensor) -> Result<ForwardOutput> {
        let (first, rest) = parts
            .split_first()
            .ok_or_else(|| ReidError::Model("part model returned no part logits".to_string()))?;

        let mut loss = cross_entropy(first, targets)?;
        for logits in rest {
            loss = (loss + cross_entropy(logits, targets)?)?;
        }

        let precision = match self.part_precision {
            PartPrecision::FirstPart => accuracy(first, targets)?,
            PartPrecision::Ensemble => {
                let mut sum = first.detach();
                for logits in rest {
                    sum = (sum + logits.detach())?;
                }
                accuracy(&sum, targets)?
            }
        };

        Ok(ForwardOutput {
            loss,
            precision,
            distances: None,
        })
    }

    fn part_logits(&self, output: ModelOutput) -> Result<Vec<Tensor>> {
        match output {
            ModelOutput::Parts { part_logits, .. } => Ok(part_logits),
            ModelOutput::Embedding(_) => Err(ReidError::Model(
                "model declares part predictions but returned a single output".to_string(),
            )),
        }
    }

    fn single(&self, output: ModelOutput) -> Result<Tensor> {
        match output {
            ModelOutput::Embedding(t) => Ok(t),
            ModelOutput::Parts { .. } => Err(ReidError::Model(
                "model declares no part predictions but returned parts".to_string(),
            )),
        }
    }

    /// Global embedding: the first element for part models, the whole output otherwise
    fn embedding(&self, output: ModelOutput) -> Result<Tensor> {
        if self.part_predictions {
            match output {
                ModelOutput::Parts { embedding, .. } => Ok(embedding),
                ModelOutput::Embedding(_) => Err(ReidError::Model(
                    "model declares part predictions but returned a single output".to_string(),
                )),
            }
        } else {
            self.single(output)
        }
    }
}

/// Scalar value of a loss tensor
pub fn loss_value(loss: &Tensor) -> Result<f64> {
    Ok(loss.to_dtype(DType::F64)?.sum_all()?.to_scalar::<f64>()?)
}
