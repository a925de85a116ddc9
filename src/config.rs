/// Configuration for the re-ID trainer and its loss functions
use candle_core::Device;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::loss::{LossSpec, OimLoss, TripletLoss};
use crate::{ReidError, Result};

/// Which logits the classification precision is computed from on part-based models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartPrecision {
    /// Only the first part's logits
    #[default]
    FirstPart,
    /// Sum of all part logits
    Ensemble,
}

/// Which values the metric-loss epoch summary reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricReport {
    /// Values of the last batch of the epoch
    #[default]
    LastBatch,
    /// Running averages over the epoch
    Average,
}

/// Trainer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Emit a progress line every N batches
    pub print_freq: usize,

    /// Put backbone batch-norm layers in eval mode and freeze their affine parameters
    pub fixed_bn: bool,

    /// Probability mass spread uniformly over all classes by the auxiliary regularizer
    pub label_smoothing: f64,

    pub part_precision: PartPrecision,

    pub metric_report: MetricReport,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            print_freq: 10,
            fixed_bn: false,
            label_smoothing: 0.1,
            part_precision: PartPrecision::FirstPart,
            metric_report: MetricReport::LastBatch,
        }
    }
}

impl TrainerConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.print_freq == 0 {
            return Err(ReidError::Config("print_freq must be > 0".to_string()));
        }

        if !(self.label_smoothing > 0.0 && self.label_smoothing < 1.0) {
            return Err(ReidError::Config(format!(
                "label_smoothing must lie in (0, 1), got {}",
                self.label_smoothing
            )));
        }

        Ok(())
    }
}

/// Loss configuration, resolved into a [`LossSpec`] by [`LossConfig::build`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LossConfig {
    /// "softmax" (aliases "xent", "cross_entropy"), "oim" or "triplet"
    pub name: String,

    /// Triplet margin
    pub margin: f64,

    /// Embedding size fed to the OIM lookup table
    pub num_features: usize,

    /// Number of training identities
    pub num_classes: usize,

    /// OIM logit scale
    pub oim_scalar: f64,

    /// OIM lookup table update momentum
    pub oim_momentum: f64,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            name: "softmax".to_string(),
            margin: 0.5,
            num_features: 128,
            num_classes: 751, // Market-1501 training identities
            oim_scalar: 30.0,
            oim_momentum: 0.5,
        }
    }
}

impl LossConfig {
    /// Build the loss this configuration names
    pub fn build(&self, device: &Device) -> Result<LossSpec> {
        match self.name.as_str() {
            "softmax" | "xent" | "cross_entropy" => Ok(LossSpec::Classification),
            "oim" => {
                if self.num_features == 0 || self.num_classes == 0 {
                    return Err(ReidError::Config(
                        "oim needs num_features > 0 and num_classes > 0".to_string(),
                    ));
                }
                let oim = OimLoss::new(
                    self.num_features,
                    self.num_classes,
                    self.oim_scalar,
                    self.oim_momentum,
                    device,
                )?;
                Ok(LossSpec::IdentityDiscriminative(Box::new(oim)))
            }
            "triplet" => {
                if self.margin < 0.0 {
                    return Err(ReidError::Config(format!(
                        "margin must be >= 0, got {}",
                        self.margin
                    )));
                }
                Ok(LossSpec::Metric(Box::new(TripletLoss::new(self.margin))))
            }
            other => Err(ReidError::UnsupportedLoss(other.to_string())),
        }
    }
}
