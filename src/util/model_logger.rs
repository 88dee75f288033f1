use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Losses and learning rate at the end of one epoch.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub validation_loss: Option<f64>,
    pub learning_rate: f64,
}

/// Experiment record of one training run, saved as `<dir>/<run_id>_experiment.json`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ExperimentLog {
    pub run_id: String,
    pub timestamp: String,
    pub metadata: Value,
    pub epochs: Vec<EpochRecord>,
    pub test_loss: Option<f64>,
    pub training_time_seconds: Option<f64>,
    pub notes: String,
}

impl ExperimentLog {
    pub fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            metadata: Value::Null,
            epochs: Vec::new(),
            test_loss: None,
            training_time_seconds: None,
            notes: String::new(),
        }
    }

    /// Stores the run configuration as a JSON dictionary.
    pub fn write_metadata<T: Serialize>(&mut self, metadata: &T) -> Result<()> {
        self.metadata = serde_json::to_value(metadata).context("Failed to serialize experiment metadata")?;
        Ok(())
    }

    pub fn log_epoch(&mut self, record: EpochRecord) {
        self.epochs.push(record);
    }

    pub fn set_test_loss(&mut self, loss: f64) {
        self.test_loss = Some(loss);
    }

    pub fn set_training_time(&mut self, seconds: f64) {
        self.training_time_seconds = Some(seconds);
    }

    pub fn add_note(&mut self, note: &str) {
        if !self.notes.is_empty() {
            self.notes.push('\n');
        }
        self.notes.push_str(note);
    }

    /// Lowest validation loss seen so far, falling back to training loss.
    pub fn best_loss(&self) -> Option<f64> {
        self.epochs
            .iter()
            .map(|e| e.validation_loss.unwrap_or(e.train_loss))
            .reduce(f64::min)
    }

    pub fn save(&self, experiment_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(experiment_dir)?;

        let file_path = experiment_dir.join(format!("{}_experiment.json", self.run_id));
        let json = serde_json::to_string_pretty(&self)?;
        let mut file = fs::File::create(&file_path)
            .with_context(|| format!("Failed to create {}", file_path.display()))?;
        file.write_all(json.as_bytes())?;

        Ok(file_path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Run identifier derived from the current local time.
pub fn new_run_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Local::now().format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_experiment_log_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = ExperimentLog::new("run_a");
        log.write_metadata(&serde_json::json!({ "hidden_size": 10 })).unwrap();
        log.log_epoch(EpochRecord {
            epoch: 1,
            train_loss: 0.5,
            validation_loss: Some(0.7),
            learning_rate: 0.01,
        });
        log.log_epoch(EpochRecord {
            epoch: 2,
            train_loss: 0.4,
            validation_loss: Some(0.6),
            learning_rate: 0.01,
        });
        log.set_test_loss(0.65);

        let path = log.save(dir.path()).unwrap();
        assert!(path.ends_with("run_a_experiment.json"));

        let loaded = ExperimentLog::load(&path).unwrap();
        assert_eq!(loaded.metadata["hidden_size"], 10);
        assert_eq!(loaded.epochs, log.epochs);
        assert_eq!(loaded.best_loss(), Some(0.6));
        assert_eq!(loaded.test_loss, Some(0.65));
    }
}
