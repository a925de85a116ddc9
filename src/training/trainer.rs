/// Epoch loop for re-ID models
use candle_core::{DType, Device, Tensor};
use candle_nn::Optimizer;
use std::time::Instant;

use super::dispatch::{loss_value, ForwardDispatcher, ForwardOutput};
use super::freeze::apply_bn_freeze;
use super::meters::{EpochMeters, MetricMeters};
use crate::config::{MetricReport, TrainerConfig};
use crate::data::{AuxiliaryStream, BatchDataLoader, ReidBatch};
use crate::loss::{LabelSmoothingLoss, LossSpec};
use crate::models::{ModelOutput, ReidModel};
use crate::{ReidError, Result};

/// Trainer for re-ID models
pub struct Trainer<M: ReidModel> {
    model: M,
    criterion: LossSpec,
    dispatcher: ForwardDispatcher,
    regularizer: LabelSmoothingLoss,
    config: TrainerConfig,
    device: Device,
}

impl<M: ReidModel> Trainer<M> {
    /// Create new trainer. The model's part-prediction capability is read once here.
    pub fn new(model: M, criterion: LossSpec, config: TrainerConfig, device: Device) -> Result<Self> {
        config.validate()?;

        let dispatcher = ForwardDispatcher::new(model.has_part_predictions(), config.part_precision);
        let regularizer = LabelSmoothingLoss::new(config.label_smoothing);

        log::info!(
            "Trainer ready: loss={:?}, part predictions={}, fixed_bn={}",
            criterion,
            dispatcher.part_predictions(),
            config.fixed_bn
        );

        Ok(Self {
            model,
            criterion,
            dispatcher,
            regularizer,
            config,
            device,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn criterion(&self) -> &LossSpec {
        &self.criterion
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Train for one epoch over `loader`.
    ///
    /// Returns `(average_loss, average_precision)` weighted by batch size.
    pub fn train<L, O>(&mut self, epoch: usize, loader: &mut L, optimizer: &mut O) -> Result<(f64, f64)>
    where
        L: BatchDataLoader,
        O: Optimizer,
    {
        self.run_epoch(epoch, loader, None, optimizer)
    }

    /// Train for one epoch, adding a label-smoothed loss on one auxiliary batch per step.
    ///
    /// The auxiliary stream restarts whenever it runs out, so it may be shorter
    /// than the primary one.
    pub fn train_with_auxiliary<L, O>(
        &mut self,
        epoch: usize,
        loader: &mut L,
        auxiliary: &mut dyn AuxiliaryStream,
        optimizer: &mut O,
    ) -> Result<(f64, f64)>
    where
        L: BatchDataLoader,
        O: Optimizer,
    {
        self.run_epoch(epoch, loader, Some(auxiliary), optimizer)
    }

    /// Split a batch into model inputs and identity targets on the trainer's device
    fn parse_data(&self, batch: &ReidBatch) -> Result<(Tensor, Tensor)> {
        let images = batch.images.to_device(&self.device)?;
        let targets = batch.pids.to_dtype(DType::U32)?.to_device(&self.device)?;

        let n_images = images.dim(0)?;
        let n_targets = targets.dim(0)?;
        if n_images != n_targets {
            return Err(ReidError::Batch(format!(
                "{} targets for {} images",
                n_targets, n_images
            )));
        }

        Ok((images, targets))
    }

    fn auxiliary_loss(&self, batch: &ReidBatch) -> Result<Tensor> {
        let (inputs, targets) = self.parse_data(batch)?;
        let output = self.model.forward(&inputs)?;

        let logits = match &output {
            ModelOutput::Parts { part_logits, .. } => part_logits.first().ok_or_else(|| {
                ReidError::Model("part model returned no part logits".to_string())
            })?,
            ModelOutput::Embedding(logits) => logits,
        };

        Ok(self.regularizer.forward(logits, &targets)?)
    }

    fn run_epoch<L, O>(
        &mut self,
        epoch: usize,
        loader: &mut L,
        mut auxiliary: Option<&mut dyn AuxiliaryStream>,
        optimizer: &mut O,
    ) -> Result<(f64, f64)>
    where
        L: BatchDataLoader,
        O: Optimizer,
    {
        self.model.set_training(true);
        let frozen = apply_bn_freeze(&self.model, self.config.fixed_bn);
        if frozen > 0 {
            log::info!("Batch-norm fixed: {} backbone layers in eval mode", frozen);
        }

        let margin = self.criterion.margin();
        let mut meters = EpochMeters::default();
        let mut metric_meters = margin.map(|_| MetricMeters::default());

        loader.reset();
        let num_batches = loader.num_batches();
        let mut batch_idx = 0;
        let mut end = Instant::now();

        while let Some(batch) = loader.next_batch(&self.device)? {
            let aux_batch = match auxiliary.as_deref_mut() {
                Some(stream) => Some(stream.next_or_restart(&self.device)?),
                None => None,
            };
            meters.data_time.update(end.elapsed().as_secs_f64(), 1);

            let (inputs, targets) = self.parse_data(&batch)?;
            let output = self.model.forward(&inputs)?;
            let ForwardOutput {
                mut loss,
                precision,
                distances,
            } = self.dispatcher.dispatch(output, &targets, &self.criterion)?;

            if let Some(aux_batch) = &aux_batch {
                loss = (loss + self.auxiliary_loss(aux_batch)?)?;
            }

            let batch_size = targets.dim(0)?;
            let value = loss_value(&loss)?;

            if let (Some(mm), Some((dist_ap, dist_an)), Some(margin)) =
                (metric_meters.as_mut(), distances.as_ref(), margin)
            {
                mm.update(precision, dist_ap, dist_an, margin, value)?;
            }

            meters.losses.update(value, batch_size);
            meters.precisions.update(precision, batch_size);

            // Fresh gradient store each step, so nothing carries over from the last batch
            let grads = loss.backward()?;
            optimizer.step(&grads)?;

            meters.batch_time.update(end.elapsed().as_secs_f64(), 1);
            end = Instant::now();
            batch_idx += 1;

            if batch_idx % self.config.print_freq == 0 && metric_meters.is_none() {
                log::info!("{}", meters.progress_line(epoch, batch_idx, num_batches)?);
            }
        }

        log::info!("{}", meters.summary_line(epoch)?);

        if let Some(mm) = &metric_meters {
            let seconds = meters.batch_time.average()?;
            let line = match self.config.metric_report {
                MetricReport::LastBatch => mm.last_batch_line(epoch, seconds),
                MetricReport::Average => mm.average_line(epoch, seconds)?,
            };
            log::info!("{}", line);
        }

        Ok((meters.losses.average()?, meters.precisions.average()?))
    }
}
