// External imports
use anyhow::{bail, Context, Result};
use burn::module::AutodiffModule;
use burn::nn::loss::{MseLoss, Reduction};
use burn::optim::GradientsParams;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;

// Internal imports
use super::step_1_sequence_preparation::{NormalizerKind, ReaderOptions, SequenceBatch, SequenceReader};
use super::step_3_encoder_decoder_arch::{EncoderDecoder, EncoderDecoderConfig};
use crate::constants::{
    DECODER_START_VALUE, DEFAULT_SEED, DEFAULT_STEPS_TRAIN, PLATEAU_FACTOR, PLATEAU_PATIENCE,
    PLATEAU_THRESHOLD,
};
use crate::error::ForecastError;
use crate::util::model_logger::{EpochRecord, ExperimentLog};
use crate::util::named_option::named_option;
use crate::util::optimizers::{build_optimizer, ModelOptimizer, OptimizerKind};

named_option! {
    /// Training loss.
    pub enum LossKind("loss function") {
        Mse => "MSE",
        Mae => "MAE",
    }
}

/// Struct for configuring encoder-decoder training
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub model: EncoderDecoderConfig,
    pub number_steps_train: usize,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub epochs: usize,
    pub target_column: String,
    pub feature_columns: Vec<String>,
    pub loss: LossKind,
    pub optimizer: OptimizerKind,
    pub normalizer: NormalizerKind,
    pub use_scheduler: bool,
    pub validation_index: Option<usize>,
    pub test_index: Option<usize>,
    pub patience: usize,
    pub min_delta: f64,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            model: EncoderDecoderConfig::default(),
            number_steps_train: DEFAULT_STEPS_TRAIN,
            learning_rate: 0.001,
            batch_size: 32,
            epochs: 10,
            target_column: "close".to_string(),
            feature_columns: Vec::new(),
            loss: LossKind::Mse,
            optimizer: OptimizerKind::Adam,
            normalizer: NormalizerKind::Standardization,
            use_scheduler: true,
            validation_index: None,
            test_index: None,
            patience: 5,
            min_delta: 0.0001,
            seed: DEFAULT_SEED,
        }
    }
}

impl TrainingConfig {
    pub fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            target_column: self.target_column.clone(),
            feature_columns: self.feature_columns.clone(),
            steps_train: self.number_steps_train,
            steps_predict: self.model.number_steps_predict,
            validation_index: self.validation_index,
            test_index: self.test_index,
            normalizer: self.normalizer,
        }
    }

    pub fn validate(&self) -> Result<(), ForecastError> {
        self.model.validate()?;
        // the decoder consumes the single target column
        if self.model.decoder_features != 1 || self.model.output_features != 1 {
            return Err(ForecastError::configuration(format!(
                "training needs decoder_features = output_features = 1, got {} and {}",
                self.model.decoder_features, self.model.output_features
            )));
        }
        let features = self.reader_options().feature_count();
        if self.model.encoder_features != features {
            return Err(ForecastError::configuration(format!(
                "encoder_features is {} but {} feature columns are configured",
                self.model.encoder_features, features
            )));
        }
        if self.number_steps_train == 0 || self.batch_size == 0 {
            return Err(ForecastError::configuration("number_steps_train and batch_size must be positive"));
        }
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err(ForecastError::configuration(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

/// Learning-rate schedule that divides the rate when the monitored loss stops improving.
///
/// "min" mode with a relative threshold: an epoch improves when `loss < best * (1 - threshold)`.
/// After more than `patience` epochs without improvement the rate is multiplied by `factor`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReduceLrOnPlateau {
    factor: f64,
    patience: usize,
    threshold: f64,
    best: Option<f64>,
    bad_epochs: usize,
}

impl Default for ReduceLrOnPlateau {
    fn default() -> Self {
        Self::new(PLATEAU_FACTOR, PLATEAU_PATIENCE, PLATEAU_THRESHOLD)
    }
}

impl ReduceLrOnPlateau {
    pub fn new(factor: f64, patience: usize, threshold: f64) -> Self {
        Self {
            factor,
            patience,
            threshold,
            best: None,
            bad_epochs: 0,
        }
    }

    /// Returns the learning rate for the next epoch.
    pub fn step(&mut self, loss: f64, learning_rate: f64) -> f64 {
        let improved = self.best.map_or(true, |best| loss < best * (1.0 - self.threshold));
        if improved {
            self.best = Some(loss);
            self.bad_epochs = 0;
            return learning_rate;
        }

        self.bad_epochs += 1;
        if self.bad_epochs > self.patience {
            self.bad_epochs = 0;
            let reduced = learning_rate * self.factor;
            info!("Reducing learning rate from {:.3e} to {:.3e}", learning_rate, reduced);
            return reduced;
        }
        learning_rate
    }
}

/// Loss of one batch.
#[derive(Clone, Copy, Debug)]
pub struct StepOutput {
    pub loss: f64,
    /// `loss * batch_size`, summed by the epoch driver for a per-window average.
    pub weighted_loss: f64,
    pub batch_size: usize,
}

impl StepOutput {
    fn new(loss: f64, batch_size: usize) -> Self {
        Self {
            loss,
            weighted_loss: loss * batch_size as f64,
            batch_size,
        }
    }
}

/// Epoch, learning-rate and early-stopping state that survives a checkpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrainerState {
    pub epoch: usize,
    pub learning_rate: f64,
    pub scheduler: Option<ReduceLrOnPlateau>,
    /// Best monitored loss so far, `None` before the first epoch.
    #[serde(default)]
    pub best_loss: Option<f64>,
    #[serde(default)]
    pub patience_counter: usize,
    #[serde(default)]
    pub stopped_early: bool,
}

#[derive(Clone, Debug)]
pub struct TrainingSummary {
    pub epochs_run: usize,
    pub final_train_loss: f64,
    pub best_loss: f64,
    pub test_loss: Option<f64>,
    pub stopped_early: bool,
}

/// Mean loss between `[batch, steps]` predictions and targets.
pub fn compute_loss<B: Backend>(kind: LossKind, predictions: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    match kind {
        LossKind::Mse => MseLoss::new().forward(predictions, targets, Reduction::Mean),
        LossKind::Mae => (predictions - targets).abs().mean(),
    }
}

/// Decoder input for teacher forcing: targets shifted right by one step behind the start value.
pub fn decoder_inputs<B: Backend>(targets: Tensor<B, 2>) -> Tensor<B, 3> {
    let [batch_size, steps] = targets.dims();
    let start = Tensor::full([batch_size, 1], DECODER_START_VALUE, &targets.device());
    Tensor::cat(vec![start, targets], 1)
        .narrow(1, 0, steps)
        .unsqueeze_dim::<3>(2)
}

/// Seed for autoregressive decoding, `[batch_size, 1, 1]` filled with the start value.
pub fn decoder_seed<B: Backend>(batch_size: usize, device: &B::Device) -> Tensor<B, 3> {
    Tensor::full([batch_size, 1, 1], DECODER_START_VALUE, device)
}

/// # Encoder-Decoder Trainer
///
/// Owns the model, optimizer, loss and learning-rate schedule, and glues reader batches to the
/// model's two passes:
///
/// - `training_step`: teacher-forced pass, backward, optimizer step
/// - `evaluation_step`: autoregressive pass from the start value, loss only
/// - `prediction_step`: autoregressive pass, predictions with their targets
///
/// Every setting is checked in [`EncoderDecoderTrainer::new`], before the first batch.
pub struct EncoderDecoderTrainer<B: AutodiffBackend> {
    model: EncoderDecoder<B>,
    optimizer: Box<dyn ModelOptimizer<EncoderDecoder<B>, B>>,
    scheduler: Option<ReduceLrOnPlateau>,
    config: TrainingConfig,
    learning_rate: f64,
    device: B::Device,
    epoch: usize,
    best_loss: Option<f64>,
    patience_counter: usize,
    stopped_early: bool,
}

impl<B: AutodiffBackend> EncoderDecoderTrainer<B> {
    pub fn new(config: TrainingConfig, device: B::Device) -> Result<Self> {
        config.validate()?;
        let model = config.model.init::<B>(config.seed, &device)?;
        let optimizer = build_optimizer::<EncoderDecoder<B>, B>(config.optimizer);
        let scheduler = config.use_scheduler.then(ReduceLrOnPlateau::default);

        info!(
            "Built {}/{} encoder-decoder (attention: {}) with {} optimizer and {} loss",
            config.model.cell_type_encoder,
            config.model.cell_type_decoder,
            config.model.use_attention,
            config.optimizer,
            config.loss
        );

        Ok(Self {
            model,
            optimizer,
            scheduler,
            learning_rate: config.learning_rate,
            config,
            device,
            epoch: 0,
            best_loss: None,
            patience_counter: 0,
            stopped_early: false,
        })
    }

    pub fn model(&self) -> &EncoderDecoder<B> {
        &self.model
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn state(&self) -> TrainerState {
        TrainerState {
            epoch: self.epoch,
            learning_rate: self.learning_rate,
            scheduler: self.scheduler.clone(),
            best_loss: self.best_loss,
            patience_counter: self.patience_counter,
            stopped_early: self.stopped_early,
        }
    }

    pub fn save_optimizer(&self, path: &Path) -> Result<()> {
        self.optimizer.save_state(path)
    }

    /// Replaces the model and, when a path is given, the optimizer state.
    pub fn restore(self, model: EncoderDecoder<B>, optimizer_path: Option<&Path>, state: TrainerState) -> Result<Self> {
        let optimizer = match optimizer_path {
            Some(path) => self.optimizer.load_state(path, &self.device)?,
            None => self.optimizer,
        };
        let scheduler = self
            .scheduler
            .map(|fresh| state.scheduler.unwrap_or(fresh));

        Ok(Self {
            model,
            optimizer,
            scheduler,
            config: self.config,
            learning_rate: state.learning_rate,
            device: self.device,
            epoch: state.epoch,
            best_loss: state.best_loss,
            patience_counter: state.patience_counter,
            stopped_early: state.stopped_early,
        })
    }

    /// Teacher-forced pass followed by one optimizer step.
    pub fn training_step(&mut self, batch: &SequenceBatch) -> Result<StepOutput> {
        let (x_encoder, targets) = batch.to_tensors::<B>(&self.device);
        let x_decoder = decoder_inputs(targets.clone());

        let predictions = self.model.train_step(x_encoder, x_decoder)?.squeeze::<2>(2);
        let loss = compute_loss(self.config.loss, predictions, targets);
        let loss_value = loss.clone().into_scalar().elem::<f64>();
        if !loss_value.is_finite() {
            bail!("Training loss became {} at epoch {}", loss_value, self.epoch);
        }

        // Backward pass and optimizer step
        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &self.model);
        self.model = self.optimizer.step(self.learning_rate, self.model.clone(), grads);

        Ok(StepOutput::new(loss_value, batch.len()))
    }

    /// Autoregressive pass from the start value, without gradients.
    pub fn evaluation_step(&self, batch: &SequenceBatch) -> Result<StepOutput> {
        let (predictions, targets) = self.prediction_step(batch)?;
        let loss = compute_loss(self.config.loss, predictions, targets)
            .into_scalar()
            .elem::<f64>();
        Ok(StepOutput::new(loss, batch.len()))
    }

    /// Predictions `[batch, number_steps_predict]` with the matching targets.
    pub fn prediction_step(
        &self,
        batch: &SequenceBatch,
    ) -> Result<(Tensor<B::InnerBackend, 2>, Tensor<B::InnerBackend, 2>)> {
        let model = self.model.valid();
        let (x_encoder, targets) = batch.to_tensors::<B::InnerBackend>(&self.device);
        let seed = decoder_seed::<B::InnerBackend>(batch.len(), &self.device);

        let predictions = model.predict(x_encoder, seed)?.squeeze::<2>(2);
        Ok((predictions, targets))
    }

    /// Window-weighted mean loss over `batches`, `None` when there are none.
    pub fn evaluate<I: Iterator<Item = SequenceBatch>>(&self, batches: I) -> Result<Option<f64>> {
        let mut total = 0.0;
        let mut windows = 0;
        for batch in batches {
            let output = self.evaluation_step(&batch)?;
            total += output.weighted_loss;
            windows += output.batch_size;
        }
        Ok((windows > 0).then(|| total / windows as f64))
    }

    /// Epoch driver: trains until `epochs` or early stopping, then scores the test split.
    pub fn fit(&mut self, reader: &SequenceReader, log: &mut ExperimentLog) -> Result<TrainingSummary> {
        if reader.steps_predict() != self.model.number_steps_predict()
            || reader.feature_count() != self.config.model.encoder_features
        {
            bail!(
                "Reader windows ({} features, {} target steps) do not fit the model ({} features, {} steps)",
                reader.feature_count(),
                reader.steps_predict(),
                self.config.model.encoder_features,
                self.model.number_steps_predict()
            );
        }
        log.write_metadata(&self.config)?;

        let start = Instant::now();
        let batch_size = self.config.batch_size;
        let mut final_train_loss = f64::NAN;
        let mut epochs_run = 0;
        if self.epoch > 0 {
            info!("Resuming at epoch {} of {}", self.epoch, self.config.epochs);
            log.add_note(&format!("Resumed from epoch {}", self.epoch));
        }

        // the epoch budget counts epochs run before a checkpoint too
        while self.epoch < self.config.epochs && !self.stopped_early {
            self.epoch += 1;
            epochs_run += 1;

            let mut total = 0.0;
            let mut windows = 0;
            for batch in reader.train_batches(batch_size, self.config.seed.wrapping_add(self.epoch as u64)) {
                let output = self
                    .training_step(&batch)
                    .with_context(|| format!("Training step failed in epoch {}", self.epoch))?;
                debug!("Epoch {} batch loss: {:.6}", self.epoch, output.loss);
                total += output.weighted_loss;
                windows += output.batch_size;
            }
            let train_loss = total / windows.max(1) as f64;
            final_train_loss = train_loss;

            let validation_loss = match reader.validation_batches(batch_size) {
                Some(batches) => self.evaluate(batches)?,
                None => None,
            };
            let monitored = validation_loss.unwrap_or(train_loss);

            log.log_epoch(EpochRecord {
                epoch: self.epoch,
                train_loss,
                validation_loss,
                learning_rate: self.learning_rate,
            });
            match validation_loss {
                Some(v) => info!("Epoch {} - Loss: {:.6}, Validation: {:.6}", self.epoch, train_loss, v),
                None => info!("Epoch {} - Loss: {:.6}", self.epoch, train_loss),
            }

            if let Some(scheduler) = self.scheduler.as_mut() {
                self.learning_rate = scheduler.step(monitored, self.learning_rate);
            }

            // Early stopping
            let best = self.best_loss.unwrap_or(f64::INFINITY);
            if monitored < best - self.config.min_delta {
                self.best_loss = Some(monitored);
                self.patience_counter = 0;
            } else {
                self.patience_counter += 1;
                if self.config.patience > 0 && self.patience_counter >= self.config.patience {
                    info!("Early stopping triggered after {} epochs", self.epoch);
                    log.add_note(&format!("Early stopping triggered after {} epochs", self.epoch));
                    self.stopped_early = true;
                }
            }
        }

        let test_loss = match reader.test_batches(batch_size) {
            Some(batches) => self.evaluate(batches)?,
            None => None,
        };
        if let Some(loss) = test_loss {
            info!("Test loss: {:.6}", loss);
            log.set_test_loss(loss);
        }
        log.set_training_time(start.elapsed().as_secs_f64());

        Ok(TrainingSummary {
            epochs_run,
            final_train_loss,
            best_loss: self.best_loss.unwrap_or(f64::INFINITY),
            test_loss,
            stopped_early: self.stopped_early,
        })
    }
}
