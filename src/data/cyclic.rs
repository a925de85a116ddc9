/// Endless replay over a finite loader, used for the auxiliary style stream
use candle_core::Device;

use super::{BatchDataLoader, ReidBatch};
use crate::{ReidError, Result};

/// Source of auxiliary batches that never runs dry
pub trait AuxiliaryStream {
    /// Next batch, restarting from the beginning of the stream when exhausted
    fn next_or_restart(&mut self, device: &Device) -> Result<ReidBatch>;
}

/// Cursor that restarts its loader whenever it is exhausted
///
/// Only exhaustion (`Ok(None)`) triggers a restart; loader errors propagate.
pub struct CyclicLoader<L: BatchDataLoader> {
    loader: L,
    restarts: usize,
}

impl<L: BatchDataLoader> CyclicLoader<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            restarts: 0,
        }
    }

    /// Number of times the underlying loader has been restarted
    pub fn restarts(&self) -> usize {
        self.restarts
    }

    pub fn into_inner(self) -> L {
        self.loader
    }
}

impl<L: BatchDataLoader> AuxiliaryStream for CyclicLoader<L> {
    fn next_or_restart(&mut self, device: &Device) -> Result<ReidBatch> {
        if let Some(batch) = self.loader.next_batch(device)? {
            return Ok(batch);
        }

        self.loader.reset();
        self.restarts += 1;
        log::debug!("Auxiliary stream exhausted, restart #{}", self.restarts);

        self.loader
            .next_batch(device)?
            .ok_or(ReidError::EmptyAuxiliaryStream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DatasetMetadata, ReidDataLoader, ReidDataset};
    use ndarray::{Array1, Array4};

    fn loader(n: usize, batch_size: usize) -> ReidDataLoader {
        let images = Array4::zeros((n, 1, 2, 2));
        let pids = Array1::zeros(n);
        let camids = Array1::zeros(n);
        let metadata = DatasetMetadata {
            num_classes: 1,
            ..DatasetMetadata::default()
        };
        let dataset = ReidDataset::from_arrays(images, pids, camids, metadata).unwrap();
        ReidDataLoader::new(dataset, batch_size, false)
    }

    struct FailingLoader;

    impl BatchDataLoader for FailingLoader {
        fn next_batch(&mut self, _device: &Device) -> Result<Option<ReidBatch>> {
            Err(ReidError::Batch("corrupt image".to_string()))
        }

        fn reset(&mut self) {}

        fn num_batches(&self) -> usize {
            1
        }
    }

    #[test]
    fn test_replays_cyclically() -> Result<()> {
        let device = Device::Cpu;
        let k = 3;
        let mut stream = CyclicLoader::new(loader(6, 2));

        let mut seen = Vec::new();
        for _ in 0..(3 * k + 1) {
            seen.push(stream.next_or_restart(&device)?.names);
        }

        for i in k..seen.len() {
            assert_eq!(seen[i], seen[i - k], "fetch {} differs from fetch {}", i, i - k);
        }
        assert_eq!(stream.restarts(), 3);

        Ok(())
    }

    #[test]
    fn test_empty_stream_fails_fast() {
        let mut stream = CyclicLoader::new(loader(0, 2));
        assert!(matches!(
            stream.next_or_restart(&Device::Cpu),
            Err(ReidError::EmptyAuxiliaryStream)
        ));
    }

    #[test]
    fn test_loader_errors_are_not_swallowed() {
        let mut stream = CyclicLoader::new(FailingLoader);
        assert!(matches!(
            stream.next_or_restart(&Device::Cpu),
            Err(ReidError::Batch(_))
        ));
        assert_eq!(stream.restarts(), 0);
    }
}
