/// Batch-hard triplet loss
///
/// For every anchor, the farthest same-identity sample and the nearest
/// other-identity sample are mined from the batch, and a margin ranking loss
/// pushes the negative at least `margin` beyond the positive.
use candle_core::{DType, Result, Tensor};

use super::{MetricLoss, MetricLossOutput};

/// Added to same-identity distances so they never win the negative search
const POSITIVE_MASK_OFFSET: f64 = 1e6;

#[derive(Debug, Clone)]
pub struct TripletLoss {
    margin: f64,
}

impl TripletLoss {
    pub fn new(margin: f64) -> Self {
        Self { margin }
    }
}

/// Euclidean distance matrix between the rows of `x`
pub fn pairwise_distances(x: &Tensor) -> Result<Tensor> {
    let sq = x.sqr()?.sum_keepdim(1)?;
    let gram = x.matmul(&x.t()?)?;
    let d2 = (sq.broadcast_add(&sq.t()?)? - (gram * 2.0)?)?;
    d2.maximum(1e-12)?.sqrt()
}

impl MetricLoss for TripletLoss {
    fn forward(&self, embeddings: &Tensor, targets: &Tensor) -> Result<MetricLossOutput> {
        let n = embeddings.dim(0)?;
        if targets.dim(0)? != n {
            candle_core::bail!("{} targets for {} embeddings", targets.dim(0)?, n);
        }

        let dist = pairwise_distances(embeddings)?;

        let t = targets.to_dtype(DType::U32)?.reshape((n, 1))?;
        let same = t.broadcast_eq(&t.t()?)?.to_dtype(dist.dtype())?;

        let dist_ap = (&dist * &same)?.max(1)?;
        let dist_an = (&dist + (&same * POSITIVE_MASK_OFFSET)?)?.min(1)?;

        let loss = ((&dist_ap - &dist_an)? + self.margin)?.relu()?.mean_all()?;

        let precision = dist_an
            .gt(&dist_ap)?
            .to_dtype(DType::F32)?
            .mean_all()?
            .to_scalar::<f32>()? as f64;

        Ok(MetricLossOutput {
            loss,
            precision,
            dist_ap,
            dist_an,
        })
    }

    fn margin(&self) -> f64 {
        self.margin
    }
}
