/// Running statistics for per-epoch bookkeeping
///
/// Meters only accumulate; formatting and emitting log lines is left to the trainer.
use candle_core::{DType, Tensor};

use crate::{ReidError, Result};

/// Weighted running average of a scalar
#[derive(Debug, Clone, Default)]
pub struct RunningStatistic {
    current: f64,
    sum: f64,
    count: usize,
}

impl RunningStatistic {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` observed over `weight` samples
    pub fn update(&mut self, value: f64, weight: usize) {
        self.current = value;
        self.sum += value * weight as f64;
        self.count += weight;
    }

    /// Last recorded value
    pub fn current(&self) -> f64 {
        self.current
    }

    /// Weighted mean of every recorded value
    pub fn average(&self) -> Result<f64> {
        if self.count == 0 {
            return Err(ReidError::EmptyStatistic);
        }
        Ok(self.sum / self.count as f64)
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

/// Timing, loss and precision meters for one epoch
#[derive(Debug, Clone, Default)]
pub struct EpochMeters {
    pub batch_time: RunningStatistic,
    pub data_time: RunningStatistic,
    pub losses: RunningStatistic,
    pub precisions: RunningStatistic,
}

impl EpochMeters {
    /// Progress line for batch `batch` (1-based) of `total`
    pub fn progress_line(&self, epoch: usize, batch: usize, total: usize) -> Result<String> {
        Ok(format!(
            "Epoch: [{}][{}/{}]\tTime {:.3} ({:.3})\tData {:.3} ({:.3})\tLoss {:.3} ({:.3})\tPrec {:.2}% ({:.2}%)",
            epoch,
            batch,
            total,
            self.batch_time.current(),
            self.batch_time.average()?,
            self.data_time.current(),
            self.data_time.average()?,
            self.losses.current(),
            self.losses.average()?,
            self.precisions.current() * 100.0,
            self.precisions.average()? * 100.0,
        ))
    }

    /// Aggregate line emitted once the epoch is over
    pub fn summary_line(&self, epoch: usize) -> Result<String> {
        Ok(format!(
            "Epoch: [{}] done, {} batches\tTime ({:.3})\tData ({:.3})\tLoss ({:.3})\tPrec ({:.2}%)",
            epoch,
            self.batch_time.count(),
            self.batch_time.average()?,
            self.data_time.average()?,
            self.losses.average()?,
            self.precisions.average()? * 100.0,
        ))
    }
}

/// Per-batch triplet diagnostics
#[derive(Debug, Clone, Default)]
pub struct MetricMeters {
    pub precision: RunningStatistic,
    /// Fraction of anchors satisfying the margin
    pub margin_satisfied: RunningStatistic,
    pub dist_ap: RunningStatistic,
    pub dist_an: RunningStatistic,
    pub loss: RunningStatistic,
}

impl MetricMeters {
    /// Record one batch: triplet precision, per-anchor distances and the loss value
    pub fn update(
        &mut self,
        precision: f64,
        dist_ap: &Tensor,
        dist_an: &Tensor,
        margin: f64,
        loss: f64,
    ) -> Result<()> {
        let satisfied = margin_satisfaction(dist_ap, dist_an, margin)?;
        let d_ap = dist_ap.to_dtype(DType::F64)?.mean_all()?.to_scalar::<f64>()?;
        let d_an = dist_an.to_dtype(DType::F64)?.mean_all()?.to_scalar::<f64>()?;

        self.precision.update(precision, 1);
        self.margin_satisfied.update(satisfied, 1);
        self.dist_ap.update(d_ap, 1);
        self.dist_an.update(d_an, 1);
        self.loss.update(loss, 1);
        Ok(())
    }

    /// Epoch summary from the last batch's values
    pub fn last_batch_line(&self, epoch: usize, seconds: f64) -> String {
        format!(
            "Epoch [{}], {:.2}s, prec {:.2}%, sm {:.2}%, d_ap {:.4}, d_an {:.4}, loss {:.4}",
            epoch,
            seconds,
            self.precision.current() * 100.0,
            self.margin_satisfied.current() * 100.0,
            self.dist_ap.current(),
            self.dist_an.current(),
            self.loss.current(),
        )
    }

    /// Epoch summary from running averages
    pub fn average_line(&self, epoch: usize, seconds: f64) -> Result<String> {
        Ok(format!(
            "Epoch [{}], {:.2}s, prec {:.2}%, sm {:.2}%, d_ap {:.4}, d_an {:.4}, loss {:.4}",
            epoch,
            seconds,
            self.precision.average()? * 100.0,
            self.margin_satisfied.average()? * 100.0,
            self.dist_ap.average()?,
            self.dist_an.average()?,
            self.loss.average()?,
        ))
    }
}

/// Fraction of anchors whose negative is farther than the positive by more than `margin`
pub fn margin_satisfaction(dist_ap: &Tensor, dist_an: &Tensor, margin: f64) -> candle_core::Result<f64> {
    dist_an
        .gt(&(dist_ap + margin)?)?
        .to_dtype(DType::F64)?
        .mean_all()?
        .to_scalar::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_weighted_average() {
        let mut stat = RunningStatistic::new();
        let updates = [(0.5, 4usize), (1.5, 2), (-2.0, 1), (3.25, 8)];
        for &(v, w) in &updates {
            stat.update(v, w);
        }

        let total: usize = updates.iter().map(|&(_, w)| w).sum();
        let expected = updates.iter().map(|&(v, w)| v * w as f64).sum::<f64>() / total as f64;

        assert!((stat.average().unwrap() - expected).abs() < 1e-12);
        assert_eq!(stat.current(), 3.25);
        assert_eq!(stat.count(), total);
    }

    #[test]
    fn test_average_before_update_fails() {
        let stat = RunningStatistic::new();
        assert!(matches!(stat.average(), Err(ReidError::EmptyStatistic)));
    }

    #[test]
    fn test_count_never_decreases() {
        let mut stat = RunningStatistic::new();
        let mut last = 0;
        for w in [1usize, 0, 3, 2] {
            stat.update(1.0, w);
            assert!(stat.count() >= last);
            last = stat.count();
        }
    }

    #[test]
    fn test_progress_line_format() {
        let mut meters = EpochMeters::default();
        meters.batch_time.update(0.5, 1);
        meters.data_time.update(0.1, 1);
        meters.losses.update(2.0, 8);
        meters.precisions.update(0.25, 8);

        let line = meters.progress_line(3, 10, 20).unwrap();
        assert!(line.starts_with("Epoch: [3][10/20]"));
        assert!(line.contains("Loss 2.000 (2.000)"));
        assert!(line.contains("Prec 25.00% (25.00%)"));
    }

    #[test]
    fn test_margin_satisfaction_counts_strict_excess() -> Result<()> {
        let device = Device::Cpu;
        let dist_ap = Tensor::new(&[1.0f32, 1.0, 2.0, 0.5], &device)?;
        // Exceeds, ties, falls short, exceeds
        let dist_an = Tensor::new(&[2.0f32, 1.5, 2.2, 3.0], &device)?;

        let rate = margin_satisfaction(&dist_ap, &dist_an, 0.5)?;
        assert!((rate - 0.5).abs() < 1e-12);
        assert_eq!(margin_satisfaction(&dist_ap, &dist_an, 10.0)?, 0.0);

        Ok(())
    }

    #[test]
    fn test_metric_summary_last_batch_versus_average() -> Result<()> {
        let device = Device::Cpu;
        let mut meters = MetricMeters::default();

        meters.update(
            0.5,
            &Tensor::new(&[1.0f32, 1.0], &device)?,
            &Tensor::new(&[1.2f32, 3.0], &device)?,
            0.5,
            2.0,
        )?;
        meters.update(
            1.0,
            &Tensor::new(&[0.5f32, 0.5], &device)?,
            &Tensor::new(&[2.0f32, 2.0], &device)?,
            0.5,
            0.25,
        )?;

        assert_eq!(meters.margin_satisfied.current(), 1.0);
        assert_eq!(meters.margin_satisfied.average()?, 0.75);

        assert_eq!(
            meters.last_batch_line(4, 1.5),
            "Epoch [4], 1.50s, prec 100.00%, sm 100.00%, d_ap 0.5000, d_an 2.0000, loss 0.2500"
        );
        assert_eq!(
            meters.average_line(4, 1.5)?,
            "Epoch [4], 1.50s, prec 75.00%, sm 75.00%, d_ap 0.7500, d_an 2.0500, loss 1.1250"
        );

        Ok(())
    }
}
