/// Batch normalization with a switchable inference mode and freezable affine parameters
///
/// Normalizes over every dimension except the channel dimension (dim 1), so the
/// same layer serves `[batch, channels]` and `[batch, channels, height, width]` inputs.
use candle_core::{Result, Tensor, Var};
use candle_nn::{Init, VarBuilder};
use std::cell::Cell;

/// Batch normalization layer
///
/// Mode and freeze flags use interior mutability so a model can be toggled
/// through a shared reference, the same way `forward` is called.
pub struct BatchNorm {
    weight: Option<Tensor>,
    bias: Option<Tensor>,
    running_mean: Var,
    running_var: Var,
    num_features: usize,
    momentum: f64,
    eps: f64,
    training: Cell<bool>,
    affine_frozen: Cell<bool>,
}

impl BatchNorm {
    /// Create a layer with learnable scale and shift (initialized to 1 and 0)
    pub fn new(num_features: usize, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints(num_features, "weight", Init::Const(1.0))?;
        let bias = vb.get_with_hints(num_features, "bias", Init::Const(0.0))?;
        Self::build(num_features, Some(weight), Some(bias), vb)
    }

    /// Create a layer without affine parameters
    pub fn new_no_affine(num_features: usize, vb: VarBuilder) -> Result<Self> {
        Self::build(num_features, None, None, vb)
    }

    /// Running statistics live in the builder so saved weights carry them
    fn build(
        num_features: usize,
        weight: Option<Tensor>,
        bias: Option<Tensor>,
        vb: VarBuilder,
    ) -> Result<Self> {
        let running_mean = vb.get_with_hints(num_features, "running_mean", Init::Const(0.0))?;
        let running_var = vb.get_with_hints(num_features, "running_var", Init::Const(1.0))?;

        Ok(Self {
            weight,
            bias,
            running_mean: Var::from_tensor(&running_mean)?,
            running_var: Var::from_tensor(&running_var)?,
            num_features,
            momentum: 0.1,
            eps: 1e-5,
            training: Cell::new(true),
            affine_frozen: Cell::new(false),
        })
    }

    pub fn set_training(&self, training: bool) {
        self.training.set(training);
    }

    pub fn is_training(&self) -> bool {
        self.training.get()
    }

    pub fn is_affine(&self) -> bool {
        self.weight.is_some()
    }

    /// Stop gradients from reaching the scale and shift parameters.
    ///
    /// Stays in effect across mode switches; the optimizer never sees a
    /// gradient for them and leaves them untouched.
    pub fn freeze_affine(&self) {
        self.affine_frozen.set(true);
    }

    pub fn is_affine_frozen(&self) -> bool {
        self.affine_frozen.get()
    }

    pub fn running_mean(&self) -> &Tensor {
        self.running_mean.as_tensor()
    }

    pub fn running_var(&self) -> &Tensor {
        self.running_var.as_tensor()
    }

    /// Current scale parameter, if the layer is affine
    pub fn weight(&self) -> Option<&Tensor> {
        self.weight.as_ref()
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let channels = x.dim(1)?;
        if channels != self.num_features {
            candle_core::bail!(
                "BatchNorm expects {} channels, got {}",
                self.num_features,
                channels
            );
        }

        // Broadcast shape [1, C, 1, ...]
        let mut stat_shape = vec![1usize; x.rank()];
        stat_shape[1] = channels;

        let (mean, var) = if self.training.get() {
            // [C, N * spatial]
            let per_channel = x.transpose(0, 1)?.contiguous()?.flatten_from(1)?;
            let count = per_channel.dim(1)?;
            let mean = per_channel.mean_keepdim(1)?;
            let var = per_channel.broadcast_sub(&mean)?.sqr()?.mean_keepdim(1)?;
            let mean = mean.flatten_all()?;
            let var = var.flatten_all()?;
            self.update_running_stats(&mean, &var, count)?;
            (mean, var)
        } else {
            (
                self.running_mean.as_tensor().detach(),
                self.running_var.as_tensor().detach(),
            )
        };

        let mean = mean.reshape(stat_shape.clone())?;
        let std = (var.reshape(stat_shape.clone())? + self.eps)?.sqrt()?;
        let normalized = x.broadcast_sub(&mean)?.broadcast_div(&std)?;

        match (&self.weight, &self.bias) {
            (Some(weight), Some(bias)) => {
                let (weight, bias) = if self.affine_frozen.get() {
                    (weight.detach(), bias.detach())
                } else {
                    (weight.clone(), bias.clone())
                };
                normalized
                    .broadcast_mul(&weight.reshape(stat_shape.clone())?)?
                    .broadcast_add(&bias.reshape(stat_shape)?)
            }
            _ => Ok(normalized),
        }
    }

    fn update_running_stats(&self, mean: &Tensor, var: &Tensor, count: usize) -> Result<()> {
        // Running variance tracks the unbiased estimate
        let correction = if count > 1 {
            count as f64 / (count - 1) as f64
        } else {
            1.0
        };
        let m = self.momentum;

        let new_mean = ((self.running_mean.as_tensor() * (1.0 - m))? + (mean.detach() * m)?)?;
        let new_var =
            ((self.running_var.as_tensor() * (1.0 - m))? + (var.detach() * (m * correction))?)?;

        self.running_mean.set(&new_mean)?;
        self.running_var.set(&new_var)
    }
}
