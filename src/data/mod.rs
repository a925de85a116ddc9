/// Data loading for re-ID training
pub mod cyclic;
pub mod numpy_dataset;

pub use cyclic::{AuxiliaryStream, CyclicLoader};
pub use numpy_dataset::{DatasetMetadata, ReidDataLoader, ReidDataset};

use candle_core::{Device, Tensor};

/// One batch of re-ID samples
///
/// Only `images` and `pids` drive training; names and camera ids ride along
/// for logging and evaluation.
#[derive(Debug, Clone)]
pub struct ReidBatch {
    /// [batch, channels, height, width]
    pub images: Tensor,
    /// Per-sample identifiers (file names)
    pub names: Vec<String>,
    /// Person identity labels [batch], u32
    pub pids: Tensor,
    /// Camera ids
    pub camids: Vec<u32>,
}

impl ReidBatch {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Generic data loader trait
pub trait BatchDataLoader {
    /// Next batch, or `None` once the epoch is exhausted
    fn next_batch(&mut self, device: &Device) -> crate::Result<Option<ReidBatch>>;

    /// Reset loader for new epoch
    fn reset(&mut self);

    /// Get total number of batches
    fn num_batches(&self) -> usize;
}
