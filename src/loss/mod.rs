/// Loss functions and the loss selection the trainer dispatches on
///
/// - Classification: softmax cross-entropy on identity logits
/// - Identity-discriminative: OIM, cross-entropy over a lookup-table projection
/// - Metric: batch-hard triplet loss
/// - Label smoothing: regularizer for the auxiliary style stream

pub mod label_smoothing;
pub mod oim;
pub mod triplet;

pub use label_smoothing::LabelSmoothingLoss;
pub use oim::OimLoss;
pub use triplet::TripletLoss;

use candle_core::{Result, Tensor};

/// A loss that re-projects the embedding before computing cross-entropy
pub trait IdentityLoss {
    /// Returns `(loss, projected_logits)`
    fn forward(&self, embeddings: &Tensor, targets: &Tensor) -> Result<(Tensor, Tensor)>;
}

/// Everything a metric loss reports for one batch
#[derive(Debug, Clone)]
pub struct MetricLossOutput {
    pub loss: Tensor,
    /// Fraction of anchors whose hardest negative is farther than their hardest positive
    pub precision: f64,
    /// Anchor-positive distance per anchor
    pub dist_ap: Tensor,
    /// Anchor-negative distance per anchor
    pub dist_an: Tensor,
}

/// A loss computed on embeddings and pairwise distances
pub trait MetricLoss {
    fn forward(&self, embeddings: &Tensor, targets: &Tensor) -> Result<MetricLossOutput>;

    fn margin(&self) -> f64;
}

/// The loss family the trainer optimizes
pub enum LossSpec {
    Classification,
    IdentityDiscriminative(Box<dyn IdentityLoss>),
    Metric(Box<dyn MetricLoss>),
}

impl LossSpec {
    pub fn tag(&self) -> &'static str {
        match self {
            LossSpec::Classification => "classification",
            LossSpec::IdentityDiscriminative(_) => "identity_discriminative",
            LossSpec::Metric(_) => "metric",
        }
    }

    pub fn is_metric(&self) -> bool {
        matches!(self, LossSpec::Metric(_))
    }

    /// Triplet margin, for metric losses only
    pub fn margin(&self) -> Option<f64> {
        match self {
            LossSpec::Metric(loss) => Some(loss.margin()),
            _ => None,
        }
    }
}

impl std::fmt::Debug for LossSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.margin() {
            Some(margin) => write!(f, "LossSpec::{}(margin={})", self.tag(), margin),
            None => write!(f, "LossSpec::{}", self.tag()),
        }
    }
}

/// Softmax cross-entropy over identity logits
pub fn cross_entropy(logits: &Tensor, targets: &Tensor) -> Result<Tensor> {
    candle_nn::loss::cross_entropy(logits, targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_tags_and_margin() {
        let metric = LossSpec::Metric(Box::new(TripletLoss::new(0.3)));
        assert_eq!(metric.tag(), "metric");
        assert!(metric.is_metric());
        assert_eq!(metric.margin(), Some(0.3));

        let cls = LossSpec::Classification;
        assert!(!cls.is_metric());
        assert_eq!(cls.margin(), None);
        assert_eq!(format!("{:?}", cls), "LossSpec::classification");
    }

    #[test]
    fn test_cross_entropy_uniform_logits() -> Result<()> {
        let device = Device::Cpu;
        let logits = Tensor::zeros((2, 4), candle_core::DType::F32, &device)?;
        let targets = Tensor::new(&[0u32, 3], &device)?;

        let loss = cross_entropy(&logits, &targets)?.to_scalar::<f32>()?;
        assert!((loss - (4f32).ln()).abs() < 1e-5);

        Ok(())
    }
}
