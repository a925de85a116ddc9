/// Batch-norm freezing for fine-tuning
use crate::models::ReidModel;

/// Put every backbone batch-norm layer in inference mode and stop gradients to
/// its affine parameters. A `false` flag leaves the model untouched.
///
/// Only the backbone is walked; normalization layers in the heads keep training.
/// Returns the number of layers touched.
pub fn apply_bn_freeze<M: ReidModel + ?Sized>(model: &M, freeze: bool) -> usize {
    if !freeze {
        return 0;
    }

    let norms = model.backbone_norms();
    for bn in &norms {
        bn.set_training(false);
        if bn.is_affine() {
            bn.freeze_affine();
        }
    }

    log::debug!("Froze {} backbone batch-norm layers", norms.len());
    norms.len()
}
