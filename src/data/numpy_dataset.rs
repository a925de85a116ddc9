/// NumPy dataset loader for re-ID image data (.npy format)
use candle_core::{Device, Tensor};
use ndarray::{Array1, Array4, Axis};
use ndarray_npy::ReadNpyExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::{BatchDataLoader, ReidBatch};
use crate::{ReidError, Result};

/// Metadata from dataset.json
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatasetMetadata {
    pub num_classes: usize,
    #[serde(default)]
    pub description: String,
    /// Per-sample file names; generated from the index when absent
    #[serde(default)]
    pub names: Vec<String>,
}

/// Dataset held in memory as NumPy-compatible arrays
pub struct ReidDataset {
    images: Array4<f32>, // [N, C, H, W]
    pids: Array1<u32>,   // [N]
    camids: Array1<u32>, // [N]
    names: Vec<String>,
    metadata: DatasetMetadata,
}

fn read_ids(path: &Path) -> Result<Array1<u32>> {
    // Python saves integer arrays as i64
    let ids = <Array1<i64> as ReadNpyExt>::read_npy(File::open(path)?)?;
    if let Some(bad) = ids.iter().find(|&&v| v < 0 || v > u32::MAX as i64) {
        return Err(ReidError::Config(format!(
            "{:?} holds out-of-range id {}",
            path, bad
        )));
    }
    Ok(ids.mapv(|v| v as u32))
}

impl ReidDataset {
    /// Load from directory containing images.npy, pids.npy, camids.npy and dataset.json
    pub fn from_directory<P: AsRef<Path>>(path: P) -> Result<Self> {
        let dir = path.as_ref();

        log::info!("Loading re-ID dataset from: {:?}", dir);

        let images = <Array4<f32> as ReadNpyExt>::read_npy(File::open(dir.join("images.npy"))?)?;
        log::info!("Loaded images: shape {:?}", images.shape());

        let pids = read_ids(&dir.join("pids.npy"))?;

        let camids_path = dir.join("camids.npy");
        let camids = if camids_path.exists() {
            read_ids(&camids_path)?
        } else {
            log::warn!("camids.npy not found, assigning camera 0 to every sample");
            Array1::zeros(pids.len())
        };

        let metadata_path = dir.join("dataset.json");
        let metadata: DatasetMetadata = if metadata_path.exists() {
            serde_json::from_reader(BufReader::new(File::open(&metadata_path)?))?
        } else {
            log::warn!("dataset.json not found, inferring num_classes from pids");
            DatasetMetadata {
                num_classes: pids.iter().max().map(|&m| m as usize + 1).unwrap_or(0),
                description: "Unknown".to_string(),
                names: Vec::new(),
            }
        };

        Self::from_arrays(images, pids, camids, metadata)
    }

    /// Build from in-memory arrays, validating that their lengths agree
    pub fn from_arrays(
        images: Array4<f32>,
        pids: Array1<u32>,
        camids: Array1<u32>,
        mut metadata: DatasetMetadata,
    ) -> Result<Self> {
        let n = images.len_of(Axis(0));
        if pids.len() != n || camids.len() != n {
            return Err(ReidError::Config(format!(
                "Length mismatch: {} images, {} pids, {} camids",
                n,
                pids.len(),
                camids.len()
            )));
        }

        if let Some(&max_pid) = pids.iter().max() {
            if max_pid as usize >= metadata.num_classes {
                return Err(ReidError::Config(format!(
                    "pid {} outside num_classes {}",
                    max_pid, metadata.num_classes
                )));
            }
        }

        let names = if metadata.names.is_empty() {
            (0..n).map(|i| format!("{:06}", i)).collect()
        } else if metadata.names.len() == n {
            std::mem::take(&mut metadata.names)
        } else {
            return Err(ReidError::Config(format!(
                "{} names for {} images",
                metadata.names.len(),
                n
            )));
        };

        log::info!(
            "Dataset ready: {} images, {} identities, image shape {:?}",
            n,
            metadata.num_classes,
            &images.shape()[1..]
        );

        Ok(Self {
            images,
            pids,
            camids,
            names,
            metadata,
        })
    }

    pub fn len(&self) -> usize {
        self.images.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_classes(&self) -> usize {
        self.metadata.num_classes
    }

    /// (channels, height, width)
    pub fn image_shape(&self) -> (usize, usize, usize) {
        let s = self.images.shape();
        (s[1], s[2], s[3])
    }

    pub fn metadata(&self) -> &DatasetMetadata {
        &self.metadata
    }
}

/// Batching loader over a [`ReidDataset`]
pub struct ReidDataLoader {
    dataset: ReidDataset,
    batch_size: usize,
    current_idx: usize,
    indices: Vec<usize>,
    shuffle: bool,
}

impl ReidDataLoader {
    pub fn new(dataset: ReidDataset, batch_size: usize, shuffle: bool) -> Self {
        let mut indices: Vec<usize> = (0..dataset.len()).collect();

        if shuffle {
            use rand::seq::SliceRandom;
            let mut rng = rand::thread_rng();
            indices.shuffle(&mut rng);
        }

        Self {
            dataset,
            batch_size: batch_size.max(1),
            current_idx: 0,
            indices,
            shuffle,
        }
    }

    pub fn dataset(&self) -> &ReidDataset {
        &self.dataset
    }
}

impl BatchDataLoader for ReidDataLoader {
    fn next_batch(&mut self, device: &Device) -> Result<Option<ReidBatch>> {
        if self.current_idx >= self.indices.len() {
            return Ok(None);
        }

        let end_idx = (self.current_idx + self.batch_size).min(self.indices.len());
        let batch_indices = &self.indices[self.current_idx..end_idx];
        let batch_size = batch_indices.len();
        let (c, h, w) = self.dataset.image_shape();

        let mut pixels = Vec::with_capacity(batch_size * c * h * w);
        let mut pids = Vec::with_capacity(batch_size);
        let mut camids = Vec::with_capacity(batch_size);
        let mut names = Vec::with_capacity(batch_size);

        for &idx in batch_indices {
            pixels.extend(self.dataset.images.index_axis(Axis(0), idx).iter().copied());
            pids.push(self.dataset.pids[idx]);
            camids.push(self.dataset.camids[idx]);
            names.push(self.dataset.names[idx].clone());
        }

        self.current_idx = end_idx;

        let images = Tensor::from_vec(pixels, (batch_size, c, h, w), device)?;
        let pids = Tensor::from_vec(pids, batch_size, device)?;

        Ok(Some(ReidBatch {
            images,
            names,
            pids,
            camids,
        }))
    }

    fn reset(&mut self) {
        self.current_idx = 0;

        if self.shuffle {
            use rand::seq::SliceRandom;
            let mut rng = rand::thread_rng();
            self.indices.shuffle(&mut rng);
        }
    }

    fn num_batches(&self) -> usize {
        (self.dataset.len() + self.batch_size - 1) / self.batch_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_npy::WriteNpyExt;

    fn tiny_dataset(n: usize) -> ReidDataset {
        let images = Array4::from_shape_fn((n, 1, 2, 2), |(i, _, _, _)| i as f32);
        let pids = Array1::from_iter((0..n).map(|i| (i % 2) as u32));
        let camids = Array1::zeros(n);
        let metadata = DatasetMetadata {
            num_classes: 2,
            ..DatasetMetadata::default()
        };
        ReidDataset::from_arrays(images, pids, camids, metadata).unwrap()
    }

    #[test]
    fn test_metadata_deserialization() {
        let json = r#"{
            "num_classes": 751,
            "description": "Market-1501 train"
        }"#;

        let metadata: DatasetMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(metadata.num_classes, 751);
        assert!(metadata.names.is_empty());
    }

    #[test]
    fn test_batches_cover_dataset_in_order() -> Result<()> {
        let device = Device::Cpu;
        let mut loader = ReidDataLoader::new(tiny_dataset(5), 2, false);
        assert_eq!(loader.num_batches(), 3);

        let mut sizes = Vec::new();
        let mut first_pixels = Vec::new();
        while let Some(batch) = loader.next_batch(&device)? {
            assert_eq!(batch.pids.dim(0)?, batch.images.dim(0)?);
            sizes.push(batch.len());
            first_pixels.push(batch.images.flatten_all()?.to_vec1::<f32>()?[0]);
        }

        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(first_pixels, vec![0.0, 2.0, 4.0]);

        loader.reset();
        assert!(loader.next_batch(&device)?.is_some());
        Ok(())
    }

    #[test]
    fn test_pid_outside_classes_rejected() {
        let images = Array4::zeros((2, 1, 2, 2));
        let pids = Array1::from_vec(vec![0u32, 5]);
        let camids = Array1::zeros(2);
        let metadata = DatasetMetadata {
            num_classes: 2,
            ..DatasetMetadata::default()
        };

        assert!(ReidDataset::from_arrays(images, pids, camids, metadata).is_err());
    }

    #[test]
    fn test_from_directory() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let images = Array4::<f32>::ones((3, 3, 4, 2));
        let pids = Array1::from_vec(vec![0i64, 1, 1]);
        let camids = Array1::from_vec(vec![1i64, 2, 3]);
        images.write_npy(File::create(dir.path().join("images.npy"))?).unwrap();
        pids.write_npy(File::create(dir.path().join("pids.npy"))?).unwrap();
        camids.write_npy(File::create(dir.path().join("camids.npy"))?).unwrap();
        std::fs::write(
            dir.path().join("dataset.json"),
            r#"{ "num_classes": 2, "names": ["a.jpg", "b.jpg", "c.jpg"] }"#,
        )?;

        let dataset = ReidDataset::from_directory(dir.path())?;
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.image_shape(), (3, 4, 2));

        let mut loader = ReidDataLoader::new(dataset, 3, false);
        let batch = loader.next_batch(&Device::Cpu)?.unwrap();
        assert_eq!(batch.names, vec!["a.jpg", "b.jpg", "c.jpg"]);
        assert_eq!(batch.camids, vec![1, 2, 3]);
        assert_eq!(batch.pids.to_vec1::<u32>()?, vec![0, 1, 1]);

        Ok(())
    }
}
