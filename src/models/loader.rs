/// Weight loading from safetensors files
use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use std::path::Path;

use super::{BaselineNet, ModelConfig, PartNet};

fn mmaped_builder<P: AsRef<Path>>(weights_path: P, device: &Device) -> crate::Result<VarBuilder<'static>> {
    log::info!("Loading weights from {:?}", weights_path.as_ref());
    // Safety: the file must not be modified while mapped
    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(&[weights_path.as_ref()], DType::F32, device)?
    };
    Ok(vb)
}

/// Load a plain model from a safetensors file
pub fn load_baseline<P: AsRef<Path>>(
    config: ModelConfig,
    weights_path: P,
    device: &Device,
) -> crate::Result<BaselineNet> {
    BaselineNet::new(config, mmaped_builder(weights_path, device)?)
}

/// Load a part-based model from a safetensors file
pub fn load_part_net<P: AsRef<Path>>(
    config: ModelConfig,
    weights_path: P,
    device: &Device,
) -> crate::Result<PartNet> {
    PartNet::new(config, mmaped_builder(weights_path, device)?)
}
