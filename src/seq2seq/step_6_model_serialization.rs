// External imports
use anyhow::{bail, Context, Result};
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::{AutodiffBackend, Backend};
use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

// Internal imports
use super::step_1_sequence_preparation::FittedNormalizer;
use super::step_3_encoder_decoder_arch::EncoderDecoder;
use super::step_4_train_model::{EncoderDecoderTrainer, TrainerState, TrainingConfig};
use crate::constants::{METADATA_FILE_NAME, MODEL_FILE_NAME, OPTIMIZER_FILE_NAME};
use crate::error::ForecastError;

/// # Checkpoint Metadata
///
/// Everything besides the tensors that is needed to rebuild a run: the full training
/// configuration (which fixes the architecture), the epoch and learning-rate state, and the
/// normalizer used to scale the data.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CheckpointMetadata {
    pub run_id: String,

    pub config: TrainingConfig,

    /// Epoch counter, learning rate and scheduler state
    pub trainer: TrainerState,

    /// Scaling of the training data, needed to denormalise forecasts
    pub normalizer: Option<FittedNormalizer>,

    pub crate_version: String,

    /// RFC 3339 time of the save
    pub saved_at: String,
}

/// # Checkpoint Store
///
/// Keeps one directory per run identifier:
///
/// ```text
/// <root>/<run_id>/model.bin       model parameters
/// <root>/<run_id>/optimizer.bin   optimizer state
/// <root>/<run_id>/metadata.json   CheckpointMetadata
/// ```
///
/// Binary files are written with burn's `BinFileRecorder` at full precision.
#[derive(Clone, Debug)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_id: &str) -> Result<PathBuf> {
        if run_id.is_empty() || run_id.contains(['/', '\\']) || run_id == "." || run_id == ".." {
            bail!(ForecastError::checkpoint(format!("invalid run identifier '{}'", run_id)));
        }
        Ok(self.root.join(run_id))
    }

    /// Saves model, optimizer and metadata of `trainer` under `run_id`, replacing an earlier save.
    pub fn save<B: AutodiffBackend>(
        &self,
        run_id: &str,
        trainer: &EncoderDecoderTrainer<B>,
        normalizer: Option<&FittedNormalizer>,
    ) -> Result<PathBuf> {
        let dir = self.run_dir(run_id)?;
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;

        let model_path = dir.join(MODEL_FILE_NAME);
        trainer
            .model()
            .clone()
            .save_file::<BinFileRecorder<FullPrecisionSettings>, _>(&model_path, &Default::default())
            .with_context(|| format!("Failed to save model to {}", model_path.display()))?;
        trainer.save_optimizer(&dir.join(OPTIMIZER_FILE_NAME))?;

        let metadata = CheckpointMetadata {
            run_id: run_id.to_string(),
            config: trainer.config().clone(),
            trainer: trainer.state(),
            normalizer: normalizer.cloned(),
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
            saved_at: Utc::now().to_rfc3339(),
        };
        let metadata_path = dir.join(METADATA_FILE_NAME);
        let mut metadata_file = fs::File::create(&metadata_path)?;
        metadata_file.write_all(serde_json::to_string_pretty(&metadata)?.as_bytes())?;

        info!("Saved checkpoint '{}' at epoch {} to {}", run_id, metadata.trainer.epoch, dir.display());
        Ok(dir)
    }

    pub fn load_metadata(&self, run_id: &str) -> Result<CheckpointMetadata> {
        let path = self.run_dir(run_id)?.join(METADATA_FILE_NAME);
        if !path.exists() {
            bail!(ForecastError::checkpoint(format!(
                "no checkpoint '{}' under {}",
                run_id,
                self.root.display()
            )));
        }
        let json = fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("Invalid checkpoint metadata in {}", path.display()))
    }

    /// Rebuilds the model of `run_id` for inference.
    pub fn load_model<B: Backend>(
        &self,
        run_id: &str,
        device: &B::Device,
    ) -> Result<(EncoderDecoder<B>, CheckpointMetadata)> {
        let metadata = self.load_metadata(run_id)?;
        let model_path = self.run_dir(run_id)?.join(MODEL_FILE_NAME);

        let model = metadata
            .config
            .model
            .init::<B>(metadata.config.seed, device)?
            .load_file::<BinFileRecorder<FullPrecisionSettings>, _>(&model_path, &Default::default(), device)
            .with_context(|| format!("Failed to load model from {}", model_path.display()))?;
        Ok((model, metadata))
    }

    /// Rebuilds the trainer of `run_id` with its model, optimizer state, learning rate and epoch,
    /// ready to resume training.
    pub fn load<B: AutodiffBackend>(
        &self,
        run_id: &str,
        device: &B::Device,
    ) -> Result<(EncoderDecoderTrainer<B>, CheckpointMetadata)> {
        let (model, metadata) = self.load_model::<B>(run_id, device)?;
        let optimizer_path = self.run_dir(run_id)?.join(OPTIMIZER_FILE_NAME);

        let trainer = EncoderDecoderTrainer::<B>::new(metadata.config.clone(), device.clone())?
            .restore(model, Some(&optimizer_path), metadata.trainer.clone())
            .with_context(|| format!("Failed to restore checkpoint '{}'", run_id))?;

        info!("Loaded checkpoint '{}' at epoch {}", run_id, trainer.epoch());
        Ok((trainer, metadata))
    }

    /// Identifiers of every saved run, sorted.
    pub fn list_runs(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut runs: Vec<String> = fs::read_dir(&self.root)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().join(METADATA_FILE_NAME).exists())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        runs.sort();
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_identifier_validation() {
        let store = CheckpointStore::new("models");
        assert!(store.run_dir("run_1").is_ok());
        assert!(store.run_dir("").is_err());
        let err = store.run_dir("../escape").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ForecastError>(),
            Some(ForecastError::Checkpoint(_))
        ));
    }

    #[test]
    fn test_unknown_run_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        let err = store.load_metadata("missing").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ForecastError>(),
            Some(ForecastError::Checkpoint(_))
        ));
        assert!(store.list_runs().unwrap().is_empty());
    }
}
