// External imports
use anyhow::{Context, Result};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{Tensor, TensorData};
use log::info;
use ndarray::{s, Array2};
use polars::prelude::*;

// Internal imports
use super::step_1_sequence_preparation::{extract_columns, FittedNormalizer, ReaderOptions, SequenceReader};
use super::step_3_encoder_decoder_arch::EncoderDecoder;
use super::step_4_train_model::{decoder_seed, EncoderDecoderTrainer};

/// Forecasts `steps` values of the target column after the last row of `df`
///
/// The last `steps_train` rows are normalised with `normalizer`, run through the model from the
/// decoder start value and mapped back to the target's original scale.
pub fn forecast<B: Backend>(
    model: &EncoderDecoder<B>,
    normalizer: &FittedNormalizer,
    df: &DataFrame,
    options: &ReaderOptions,
    steps: usize,
    device: &B::Device,
) -> Result<Vec<f32>> {
    let columns = options.columns();
    if normalizer.columns != columns {
        anyhow::bail!(
            "Normalizer was fitted on {:?} but the forecast uses {:?}",
            normalizer.columns,
            columns
        );
    }

    let mut data = extract_columns(df, &columns).context("Failed to read forecast input")?;
    if data.nrows() < options.steps_train {
        anyhow::bail!(
            "Need {} rows to forecast, the data frame has {}",
            options.steps_train,
            data.nrows()
        );
    }
    normalizer.transform(&mut data)?;

    let features = options.feature_count();
    let window = data
        .slice(s![data.nrows() - options.steps_train.., ..features])
        .to_owned();
    let x_encoder = Tensor::<B, 3>::from_data(
        TensorData::new(window.iter().copied().collect::<Vec<f32>>(), [1, options.steps_train, features]),
        device,
    );

    let predictions = model
        .generate(x_encoder, decoder_seed::<B>(1, device), steps)?
        .squeeze::<2>(2);
    let denormalized = denormalize_predictions(normalizer, &options.target_column, predictions)?;
    Ok(denormalized.row(0).to_vec())
}

/// Maps `[batch, steps]` normalised predictions back to the original scale of `target_column`.
pub fn denormalize_predictions<B: Backend>(
    normalizer: &FittedNormalizer,
    target_column: &str,
    predictions: Tensor<B, 2>,
) -> Result<Array2<f32>> {
    let [batch, steps] = predictions.dims();
    let values = predictions
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("Failed to read predictions: {:?}", e))?;
    let restored = normalizer.inverse(target_column, &values)?;
    Ok(Array2::from_shape_vec((batch, steps), restored)?)
}

/// Denormalised predictions and targets over the test split, one row per window.
pub fn predict_test_split<B: AutodiffBackend>(
    trainer: &EncoderDecoderTrainer<B>,
    reader: &SequenceReader,
) -> Result<Option<(Array2<f32>, Array2<f32>)>> {
    let Some(batches) = reader.test_batches(trainer.config().batch_size) else {
        return Ok(None);
    };

    let target = &trainer.config().target_column;
    let mut predicted_rows = Vec::new();
    let mut target_rows = Vec::new();
    for batch in batches {
        let (predictions, targets) = trainer.prediction_step(&batch)?;
        predicted_rows.push(denormalize_predictions(reader.normalizer(), target, predictions)?);
        target_rows.push(denormalize_predictions(reader.normalizer(), target, targets)?);
    }
    if predicted_rows.is_empty() {
        return Ok(None);
    }

    let stack = |rows: Vec<Array2<f32>>| -> Result<Array2<f32>> {
        let views: Vec<_> = rows.iter().map(|r| r.view()).collect();
        Ok(ndarray::concatenate(ndarray::Axis(0), &views)?)
    };
    let predictions = stack(predicted_rows)?;
    info!("Predicted {} test windows", predictions.nrows());
    Ok(Some((predictions, stack(target_rows)?)))
}

/// Tabulates a forecast as `step` and `<target>_forecast` columns.
pub fn forecast_frame(target_column: &str, values: &[f32]) -> Result<DataFrame> {
    let steps: Vec<u32> = (1..=values.len() as u32).collect();
    let df = DataFrame::new(vec![
        Series::new("step".into(), steps).into_column(),
        Series::new(format!("{}_forecast", target_column).into(), values).into_column(),
    ])?;
    Ok(df)
}
