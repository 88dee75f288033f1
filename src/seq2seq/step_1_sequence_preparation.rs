// External imports
use burn::tensor::{backend::Backend, Tensor, TensorData};
use log::{debug, info};
use ndarray::{s, Array2, Array3, ArrayView2};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::Path;

// Internal imports
use crate::error::ForecastError;
use crate::util::named_option::named_option;

named_option! {
    /// Per-column scaling fitted on the training rows.
    pub enum NormalizerKind("normalizer") {
        Standardization => "Standardization",
        MinMax => "MinMax",
        Identity => "None",
    }
}

/// Loads a CSV file into a DataFrame
pub fn load_csv(path: &Path) -> Result<DataFrame, ForecastError> {
    if !path.exists() {
        return Err(ForecastError::data(format!("File not found: {}", path.display())));
    }
    let file = std::fs::File::open(path)
        .map_err(|e| ForecastError::data(format!("Cannot open {}: {}", path.display(), e)))?;
    let df = CsvReader::new(file).finish()?;
    info!("Loaded {} rows x {} columns from {}", df.height(), df.width(), path.display());
    Ok(df)
}

/// Copies the named columns of `df` into a `[rows, columns]` matrix, dropping rows with nulls.
pub fn extract_columns(df: &DataFrame, columns: &[String]) -> Result<Array2<f32>, ForecastError> {
    let selected = df
        .select(columns.iter().map(|c| c.as_str()))?
        .drop_nulls::<String>(None)?;
    if selected.height() < df.height() {
        debug!("Dropped {} rows with missing values", df.height() - selected.height());
    }

    let mut data = Array2::<f32>::zeros((selected.height(), columns.len()));
    for (j, name) in columns.iter().enumerate() {
        let series = selected
            .column(name)?
            .as_materialized_series()
            .cast(&DataType::Float32)?;
        for (i, value) in series.f32()?.into_iter().enumerate() {
            data[[i, j]] = value.ok_or_else(|| {
                ForecastError::data(format!("column '{}' is not numeric at row {}", name, i))
            })?;
        }
    }
    Ok(data)
}

/// Marks the rows of `df` that have a value in every named column, the rows
/// [`extract_columns`] keeps.
fn complete_rows(df: &DataFrame, columns: &[String]) -> Result<Vec<bool>, ForecastError> {
    let mut mask = vec![true; df.height()];
    for name in columns {
        let present = df.column(name)?.as_materialized_series().is_not_null();
        for (keep, value) in mask.iter_mut().zip(present.into_iter()) {
            *keep &= value.unwrap_or(false);
        }
    }
    Ok(mask)
}

/// Scaling parameters of every reader column, kept with checkpoints so that forecasts
/// can be mapped back to the original units.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FittedNormalizer {
    pub kind: NormalizerKind,
    pub columns: Vec<String>,
    pub offsets: Vec<f32>,
    pub scales: Vec<f32>,
}

impl FittedNormalizer {
    /// Fits one (offset, scale) pair per column of `rows`.
    ///
    /// Constant columns get a scale of one so they normalise to a constant instead of NaN.
    pub fn fit(kind: NormalizerKind, columns: &[String], rows: ArrayView2<f32>) -> Result<Self, ForecastError> {
        if rows.nrows() == 0 {
            return Err(ForecastError::data("cannot fit a normalizer on zero rows"));
        }
        if rows.ncols() != columns.len() {
            return Err(ForecastError::shape(format!(
                "normalizer got {} column names for {} columns",
                columns.len(),
                rows.ncols()
            )));
        }

        let mut offsets = Vec::with_capacity(columns.len());
        let mut scales = Vec::with_capacity(columns.len());
        for column in rows.columns() {
            let (offset, scale) = match kind {
                NormalizerKind::Identity => (0.0, 1.0),
                NormalizerKind::Standardization => {
                    let mean = column.mean().unwrap_or(0.0);
                    (mean, column.std(0.0))
                }
                NormalizerKind::MinMax => {
                    let min = column.iter().copied().fold(f32::INFINITY, f32::min);
                    let max = column.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                    (min, max - min)
                }
            };
            offsets.push(offset);
            scales.push(if scale.abs() < f32::EPSILON { 1.0 } else { scale });
        }

        Ok(Self {
            kind,
            columns: columns.to_vec(),
            offsets,
            scales,
        })
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Normalises `data` in place; its columns must follow `self.columns`.
    pub fn transform(&self, data: &mut Array2<f32>) -> Result<(), ForecastError> {
        if data.ncols() != self.columns.len() {
            return Err(ForecastError::shape(format!(
                "normalizer fitted on {} columns, got {}",
                self.columns.len(),
                data.ncols()
            )));
        }
        for (j, mut column) in data.columns_mut().into_iter().enumerate() {
            let (offset, scale) = (self.offsets[j], self.scales[j]);
            column.mapv_inplace(|v| (v - offset) / scale);
        }
        Ok(())
    }

    /// Maps normalised values of `column` back to the original scale.
    pub fn inverse(&self, column: &str, values: &[f32]) -> Result<Vec<f32>, ForecastError> {
        let j = self
            .column_index(column)
            .ok_or_else(|| ForecastError::data(format!("normalizer has no column '{}'", column)))?;
        Ok(values
            .iter()
            .map(|v| v * self.scales[j] + self.offsets[j])
            .collect())
    }
}

/// Reader settings.
#[derive(Clone, Debug)]
pub struct ReaderOptions {
    pub target_column: String,
    /// Encoder input columns; the target column alone when empty.
    pub feature_columns: Vec<String>,
    pub steps_train: usize,
    pub steps_predict: usize,
    /// First row of the input frame whose targets belong to the validation split.
    /// Counted before rows with nulls are dropped.
    pub validation_index: Option<usize>,
    /// First row of the input frame whose targets belong to the test split.
    pub test_index: Option<usize>,
    pub normalizer: NormalizerKind,
}

impl ReaderOptions {
    pub fn new(target_column: &str, steps_train: usize, steps_predict: usize) -> Self {
        Self {
            target_column: target_column.to_string(),
            feature_columns: Vec::new(),
            steps_train,
            steps_predict,
            validation_index: None,
            test_index: None,
            normalizer: NormalizerKind::Standardization,
        }
    }

    /// Feature columns followed by the target column when it is not already one of them.
    pub fn columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for name in self.feature_columns.iter() {
            if !columns.contains(name) {
                columns.push(name.clone());
            }
        }
        if columns.is_empty() {
            columns.push(self.target_column.clone());
        }
        if !columns.contains(&self.target_column) {
            columns.push(self.target_column.clone());
        }
        columns
    }

    /// Number of encoder input features; they lead [`ReaderOptions::columns`].
    pub fn feature_count(&self) -> usize {
        if self.feature_columns.is_empty() {
            return 1;
        }
        self.columns()
            .iter()
            .filter(|c| self.feature_columns.contains(c))
            .count()
    }
}

/// A batch of windows: encoder inputs `[batch, steps_train, features]` and
/// targets `[batch, steps_predict]`.
#[derive(Clone, Debug)]
pub struct SequenceBatch {
    pub inputs: Array3<f32>,
    pub targets: Array2<f32>,
}

impl SequenceBatch {
    pub fn len(&self) -> usize {
        self.inputs.dim().0
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_tensors<B: Backend>(&self, device: &B::Device) -> (Tensor<B, 3>, Tensor<B, 2>) {
        let (batch, steps, features) = self.inputs.dim();
        let inputs = TensorData::new(self.inputs.iter().copied().collect::<Vec<f32>>(), [batch, steps, features]);
        let (batch, horizon) = self.targets.dim();
        let targets = TensorData::new(self.targets.iter().copied().collect::<Vec<f32>>(), [batch, horizon]);
        (
            Tensor::<B, 3>::from_data(inputs, device),
            Tensor::<B, 2>::from_data(targets, device),
        )
    }
}

/// Iterator over the batches of one split. Exhaustion marks the end of an epoch.
pub struct BatchIter<'a> {
    reader: &'a SequenceReader,
    starts: Vec<usize>,
    batch_size: usize,
    position: usize,
}

impl Iterator for BatchIter<'_> {
    type Item = SequenceBatch;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.starts.len() {
            return None;
        }
        let end = (self.position + self.batch_size).min(self.starts.len());
        let batch = self.reader.batch(&self.starts[self.position..end]);
        self.position = end;
        Some(batch)
    }
}

/// # Sequence Reader
///
/// Turns a data frame into normalised sliding windows and serves them as train, validation and
/// test batches.
///
/// A window starting at row `s` uses rows `[s, s + steps_train)` as encoder input and the target
/// column over the next `steps_predict` rows as targets. Splits are assigned by the rows of the
/// targets: training targets end before `validation_index` (or `test_index`), validation targets lie
/// in `[validation_index, test_index)` and test targets in `[test_index, end)`. Inputs may reach back
/// across a split boundary. The normalizer only ever sees training rows.
pub struct SequenceReader {
    data: Array2<f32>,
    feature_indices: Vec<usize>,
    target_index: usize,
    normalizer: FittedNormalizer,
    steps_train: usize,
    steps_predict: usize,
    train_starts: Vec<usize>,
    validation_starts: Option<Vec<usize>>,
    test_starts: Option<Vec<usize>>,
}

impl SequenceReader {
    pub fn from_dataframe(df: &DataFrame, options: &ReaderOptions) -> Result<Self, ForecastError> {
        if options.steps_train == 0 || options.steps_predict == 0 {
            return Err(ForecastError::configuration("steps_train and steps_predict must be positive"));
        }

        let columns = options.columns();

        // split indices count rows of `df`; rows with nulls are dropped below
        let complete = complete_rows(df, &columns)?;
        let to_complete_rows = |index: usize| -> Result<usize, ForecastError> {
            if index > complete.len() {
                return Err(ForecastError::data(format!(
                    "split index {} is beyond the {} available rows",
                    index,
                    complete.len()
                )));
            }
            Ok(complete[..index].iter().filter(|keep| **keep).count())
        };
        let validation_index = options.validation_index.map(to_complete_rows).transpose()?;
        let test_index = options.test_index.map(to_complete_rows).transpose()?;

        let mut data = extract_columns(df, &columns)?;
        let rows = data.nrows();

        let test_end = test_index.unwrap_or(rows);
        let train_end = validation_index.unwrap_or(test_end);
        if let Some(validation) = validation_index {
            if validation > test_end {
                return Err(ForecastError::configuration(format!(
                    "validation_index {} must not exceed test_index {}",
                    validation, test_end
                )));
            }
        }
        if test_end > rows {
            return Err(ForecastError::data(format!(
                "split index {} is beyond the {} available rows",
                test_end, rows
            )));
        }

        let window = options.steps_train + options.steps_predict;
        let starts = |first_target: usize, end: usize| -> Vec<usize> {
            let first = first_target.saturating_sub(options.steps_train);
            (first..rows.saturating_sub(window - 1))
                .filter(|s| s + window <= end)
                .collect()
        };
        let train_starts = starts(0, train_end);
        if train_starts.is_empty() {
            return Err(ForecastError::data(format!(
                "{} training rows cannot hold a window of {} steps",
                train_end, window
            )));
        }
        let validation_starts = validation_index.map(|v| starts(v, test_end));
        let test_starts = test_index.map(|t| starts(t, rows));

        let normalizer = FittedNormalizer::fit(options.normalizer, &columns, data.slice(s![..train_end, ..]))?;
        normalizer.transform(&mut data)?;

        let feature_indices: Vec<usize> = (0..options.feature_count()).collect();
        let target_index = normalizer
            .column_index(&options.target_column)
            .ok_or_else(|| ForecastError::data(format!("missing target column '{}'", options.target_column)))?;

        info!(
            "Prepared {} training, {} validation and {} test windows from {} rows",
            train_starts.len(),
            validation_starts.as_ref().map_or(0, Vec::len),
            test_starts.as_ref().map_or(0, Vec::len),
            rows
        );

        Ok(Self {
            data,
            feature_indices,
            target_index,
            normalizer,
            steps_train: options.steps_train,
            steps_predict: options.steps_predict,
            train_starts,
            validation_starts,
            test_starts,
        })
    }

    pub fn normalizer(&self) -> &FittedNormalizer {
        &self.normalizer
    }

    pub fn feature_count(&self) -> usize {
        self.feature_indices.len()
    }

    pub fn steps_train(&self) -> usize {
        self.steps_train
    }

    pub fn steps_predict(&self) -> usize {
        self.steps_predict
    }

    pub fn train_windows(&self) -> usize {
        self.train_starts.len()
    }

    pub fn validation_windows(&self) -> Option<usize> {
        self.validation_starts.as_ref().map(Vec::len)
    }

    pub fn test_windows(&self) -> Option<usize> {
        self.test_starts.as_ref().map(Vec::len)
    }

    /// Shuffled training batches; the same seed gives the same order.
    pub fn train_batches(&self, batch_size: usize, seed: u64) -> BatchIter<'_> {
        let mut starts = self.train_starts.clone();
        starts.shuffle(&mut StdRng::seed_from_u64(seed));
        self.iter(starts, batch_size)
    }

    pub fn validation_batches(&self, batch_size: usize) -> Option<BatchIter<'_>> {
        self.validation_starts
            .as_ref()
            .map(|starts| self.iter(starts.clone(), batch_size))
    }

    pub fn test_batches(&self, batch_size: usize) -> Option<BatchIter<'_>> {
        self.test_starts
            .as_ref()
            .map(|starts| self.iter(starts.clone(), batch_size))
    }

    fn iter(&self, starts: Vec<usize>, batch_size: usize) -> BatchIter<'_> {
        BatchIter {
            reader: self,
            starts,
            batch_size: batch_size.max(1),
            position: 0,
        }
    }

    fn batch(&self, starts: &[usize]) -> SequenceBatch {
        let features = self.feature_indices.len();
        let mut inputs = Array3::<f32>::zeros((starts.len(), self.steps_train, features));
        let mut targets = Array2::<f32>::zeros((starts.len(), self.steps_predict));

        for (b, &start) in starts.iter().enumerate() {
            for t in 0..self.steps_train {
                for (f, &column) in self.feature_indices.iter().enumerate() {
                    inputs[[b, t, f]] = self.data[[start + t, column]];
                }
            }
            for t in 0..self.steps_predict {
                targets[[b, t]] = self.data[[start + self.steps_train + t, self.target_index]];
            }
        }
        SequenceBatch { inputs, targets }
    }
}
