/// Online Instance Matching loss
///
/// Embeddings are scored against a lookup table holding one feature per
/// identity; cross-entropy is taken over the scaled scores. The table is not
/// a trainable parameter: after every forward pass the rows of the identities
/// seen in the batch move toward the batch features and are re-normalized.
use candle_core::{DType, Device, Result, Tensor, Var};

use super::{cross_entropy, IdentityLoss};

pub struct OimLoss {
    lut: Var,
    num_features: usize,
    num_classes: usize,
    scalar: f64,
    momentum: f64,
}

impl OimLoss {
    pub fn new(
        num_features: usize,
        num_classes: usize,
        scalar: f64,
        momentum: f64,
        device: &Device,
    ) -> Result<Self> {
        Ok(Self {
            lut: Var::zeros((num_classes, num_features), DType::F32, device)?,
            num_features,
            num_classes,
            scalar,
            momentum,
        })
    }

    /// Current lookup table [num_classes, num_features]
    pub fn lookup_table(&self) -> &Tensor {
        self.lut.as_tensor()
    }

    fn update_lut(&self, features: &Tensor, targets: &Tensor) -> Result<()> {
        let mut rows = self.lut.as_tensor().to_vec2::<f32>()?;
        let features = features.to_dtype(DType::F32)?.to_vec2::<f32>()?;
        let ids = targets.to_dtype(DType::U32)?.to_vec1::<u32>()?;
        let m = self.momentum as f32;

        for (feature, &id) in features.iter().zip(ids.iter()) {
            let id = id as usize;
            if id >= self.num_classes {
                candle_core::bail!("target {} outside OIM table of {} classes", id, self.num_classes);
            }
            let row = &mut rows[id];
            for (r, f) in row.iter_mut().zip(feature.iter()) {
                *r = m * *r + (1.0 - m) * f;
            }
            let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm > 0.0 {
                row.iter_mut().for_each(|v| *v /= norm);
            }
        }

        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        let updated = Tensor::from_vec(
            flat,
            (self.num_classes, self.num_features),
            self.lut.as_tensor().device(),
        )?;
        self.lut.set(&updated)
    }
}

impl IdentityLoss for OimLoss {
    fn forward(&self, embeddings: &Tensor, targets: &Tensor) -> Result<(Tensor, Tensor)> {
        let lut = self.lut.as_tensor().detach().to_dtype(embeddings.dtype())?;
        let logits = (embeddings.matmul(&lut.t()?)? * self.scalar)?;
        let loss = cross_entropy(&logits, targets)?;

        self.update_lut(&embeddings.detach(), targets)?;

        Ok((loss, logits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_forward_sees_empty_table() -> Result<()> {
        let device = Device::Cpu;
        let oim = OimLoss::new(2, 3, 10.0, 0.5, &device)?;
        let x = Tensor::new(&[[1f32, 0.0], [0.0, 1.0]], &device)?;
        let y = Tensor::new(&[0u32, 2], &device)?;

        let (loss, logits) = oim.forward(&x, &y)?;

        assert_eq!(logits.dims(), &[2, 3]);
        // All-zero table gives uniform scores
        assert!((loss.to_scalar::<f32>()? - (3f32).ln()).abs() < 1e-5);

        Ok(())
    }

    #[test]
    fn test_lut_rows_updated_and_normalized() -> Result<()> {
        let device = Device::Cpu;
        let oim = OimLoss::new(2, 3, 10.0, 0.5, &device)?;
        let x = Tensor::new(&[[3f32, 4.0]], &device)?;
        let y = Tensor::new(&[1u32], &device)?;

        oim.forward(&x, &y)?;
        let lut = oim.lookup_table().to_vec2::<f32>()?;

        assert_eq!(lut[0], vec![0.0, 0.0]);
        assert!((lut[1][0] - 0.6).abs() < 1e-5);
        assert!((lut[1][1] - 0.8).abs() < 1e-5);

        // A second pass now scores identity 1 highest
        let (_, logits) = oim.forward(&x, &y)?;
        let pred = logits.argmax(1)?.to_vec1::<u32>()?;
        assert_eq!(pred, vec![1]);

        Ok(())
    }

    #[test]
    fn test_out_of_range_target_fails() -> Result<()> {
        let device = Device::Cpu;
        let oim = OimLoss::new(2, 2, 10.0, 0.5, &device)?;
        let x = Tensor::new(&[[1f32, 0.0]], &device)?;
        let y = Tensor::new(&[5u32], &device)?;

        assert!(oim.forward(&x, &y).is_err());
        Ok(())
    }
}
