/// Classification metrics
use candle_core::{DType, Result, Tensor, D};

/// Top-1 accuracy of `logits` [batch, classes] against integer `targets` [batch], in [0, 1]
pub fn accuracy(logits: &Tensor, targets: &Tensor) -> Result<f64> {
    let batch = targets.dim(0)?;
    if batch == 0 {
        candle_core::bail!("accuracy of an empty batch");
    }
    if logits.dim(0)? != batch {
        candle_core::bail!("{} predictions for {} targets", logits.dim(0)?, batch);
    }

    let predicted = logits.detach().argmax(D::Minus1)?;
    let correct = predicted
        .eq(&targets.to_dtype(DType::U32)?)?
        .to_dtype(DType::F32)?
        .sum_all()?
        .to_scalar::<f32>()?;

    Ok(correct as f64 / batch as f64)
}
