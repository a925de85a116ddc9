/// Label-smoothed cross-entropy for the auxiliary style stream
///
/// The true class keeps `1 - epsilon` of the probability mass and `epsilon`
/// is spread uniformly over all classes, the true class included.
use candle_core::{DType, Device, Result, Tensor, D};
use candle_nn::{encoding, ops};

#[derive(Debug, Clone)]
pub struct LabelSmoothingLoss {
    epsilon: f64,
}

impl Default for LabelSmoothingLoss {
    fn default() -> Self {
        Self { epsilon: 0.1 }
    }
}

impl LabelSmoothingLoss {
    pub fn new(epsilon: f64) -> Self {
        Self { epsilon }
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Soft target distribution [batch, num_classes]
    pub fn soft_targets(
        &self,
        targets: &Tensor,
        num_classes: usize,
        dtype: DType,
        device: &Device,
    ) -> Result<Tensor> {
        let ids = targets.to_dtype(DType::U32)?.to_device(device)?;
        let onehot = encoding::one_hot(ids, num_classes, 1f32, 0f32)?.to_dtype(dtype)?;

        onehot.affine(1.0 - self.epsilon, self.epsilon / num_classes as f64)
    }

    /// Mean over the batch of `-sum_c soft[c] * log_softmax(logits)[c]`
    pub fn forward(&self, logits: &Tensor, targets: &Tensor) -> Result<Tensor> {
        let num_classes = logits.dim(D::Minus1)?;
        let soft = self.soft_targets(targets, num_classes, logits.dtype(), logits.device())?;
        let log_probs = ops::log_softmax(logits, D::Minus1)?;

        (soft * log_probs)?.sum(D::Minus1)?.neg()?.mean(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soft_target_rows_sum_to_one() -> Result<()> {
        let device = Device::Cpu;
        let lsr = LabelSmoothingLoss::default();

        for num_classes in [1usize, 2, 3, 7, 751] {
            let targets = Tensor::new(&[0u32, (num_classes - 1) as u32], &device)?;
            let soft = lsr.soft_targets(&targets, num_classes, DType::F64, &device)?;
            for sum in soft.sum(1)?.to_vec1::<f64>()? {
                assert!((sum - 1.0).abs() < 1e-12, "row sums to {} for {} classes", sum, num_classes);
            }
        }

        Ok(())
    }

    #[test]
    fn test_true_class_probability() -> Result<()> {
        let device = Device::Cpu;
        let lsr = LabelSmoothingLoss::default();
        let targets = Tensor::new(&[2u32], &device)?;

        let soft = lsr.soft_targets(&targets, 4, DType::F64, &device)?.to_vec2::<f64>()?;

        assert!((soft[0][2] - (0.9 + 0.1 / 4.0)).abs() < 1e-12);
        assert!((soft[0][0] - 0.025).abs() < 1e-12);

        Ok(())
    }

    #[test]
    fn test_uniform_logits_give_log_num_classes() -> Result<()> {
        let device = Device::Cpu;
        let logits = Tensor::zeros((3, 5), DType::F32, &device)?;
        let targets = Tensor::new(&[0u32, 1, 4], &device)?;

        let loss = LabelSmoothingLoss::default().forward(&logits, &targets)?;

        assert!((loss.to_scalar::<f32>()? - (5f32).ln()).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_confident_correct_logits_are_cheaper() -> Result<()> {
        let device = Device::Cpu;
        let targets = Tensor::new(&[1u32], &device)?;
        let flat = Tensor::zeros((1, 3), DType::F32, &device)?;
        let sharp = Tensor::new(&[[0f32, 3.0, 0.0]], &device)?;

        let lsr = LabelSmoothingLoss::default();
        let flat_loss = lsr.forward(&flat, &targets)?.to_scalar::<f32>()?;
        let sharp_loss = lsr.forward(&sharp, &targets)?.to_scalar::<f32>()?;

        assert!(sharp_loss < flat_loss);
        Ok(())
    }

    #[test]
    fn test_target_outside_classes_fails() -> Result<()> {
        let device = Device::Cpu;
        let targets = Tensor::new(&[0u32, 3], &device)?;
        assert!(LabelSmoothingLoss::default()
            .soft_targets(&targets, 3, DType::F32, &device)
            .is_err());
        Ok(())
    }
}
