//! Person re-identification training loop
//!
//! Drives one epoch of forward/backward passes for re-ID networks on top of
//! candle. The trainer picks the loss path from a [`LossSpec`] and a model
//! capability query, so the same loop serves:
//! - **Classification**: cross-entropy on logits, summed over parts for part-based models
//! - **Identity-discriminative**: OIM lookup-table projection followed by cross-entropy
//! - **Metric**: batch-hard triplet loss on the global embedding
//!
//! An optional auxiliary stream of style-transferred images adds a
//! label-smoothed cross-entropy term to every batch.
//!
//! # Example
//!
//! ```ignore
//! use reid_trainer::{Trainer, TrainerConfig, LossSpec};
//!
//! let mut trainer = Trainer::new(model, LossSpec::Classification, TrainerConfig::default(), device)?;
//! let (loss, prec) = trainer.train(epoch, &mut loader, &mut optimizer)?;
//! ```

pub mod config;
pub mod data;
pub mod evaluation;
pub mod layers;
pub mod loss;
pub mod models;
pub mod training;

// Re-export commonly used items
pub use config::{LossConfig, MetricReport, PartPrecision, TrainerConfig};
pub use data::{BatchDataLoader, CyclicLoader, ReidBatch};
pub use loss::LossSpec;
pub use models::{ModelOutput, ReidModel};
pub use training::{RunningStatistic, Trainer};

/// Library error types
#[derive(Debug, thiserror::Error)]
pub enum ReidError {
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Unsupported loss: {0}")]
    UnsupportedLoss(String),

    #[error("Auxiliary stream yielded no batch after restart")]
    EmptyAuxiliaryStream,

    #[error("Statistic queried before any update")]
    EmptyStatistic,

    #[error("Malformed batch: {0}")]
    Batch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("NumPy read error: {0}")]
    Npy(#[from] ndarray_npy::ReadNpyError),
}

pub type Result<T> = std::result::Result<T, ReidError>;
