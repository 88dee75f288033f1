// External crates
use anyhow::{bail, Context, Result};
use burn::backend::{Autodiff, NdArray};
use std::env;
use std::path::PathBuf;

// Local modules
use seq2seq_forecast::constants::{CHECKPOINT_ROOT, EXPERIMENT_ROOT};
use seq2seq_forecast::seq2seq::step_1_sequence_preparation::{load_csv, SequenceReader};
use seq2seq_forecast::seq2seq::step_4_train_model::{EncoderDecoderTrainer, TrainingConfig};
use seq2seq_forecast::seq2seq::step_5_prediction::{forecast, forecast_frame};
use seq2seq_forecast::seq2seq::step_6_model_serialization::CheckpointStore;
use seq2seq_forecast::util::model_logger::{new_run_id, ExperimentLog};
use seq2seq_forecast::CellType;

type TrainBackend = Autodiff<NdArray<f32>>;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        bail!("Usage: {} <csv> <target_column> [cell_type] [attention]", args[0]);
    }
    let csv_path = PathBuf::from(&args[1]);
    let target = args[2].as_str();
    let cell_type: CellType = args.get(3).map(|s| s.as_str()).unwrap_or("LSTM").parse()?;
    let use_attention = match args.get(4).map(|s| s.to_ascii_lowercase()) {
        None => false,
        Some(flag) => matches!(flag.as_str(), "attention" | "true" | "1" | "yes"),
    };
    println!(
        "Using data: {} | target: {} | cell: {} | attention: {}",
        csv_path.display(),
        target,
        cell_type,
        use_attention
    );

    let df = load_csv(&csv_path)?;
    let rows = df.height();

    // 70/15/15 split by row
    let mut config = TrainingConfig {
        target_column: target.to_string(),
        validation_index: Some(rows * 70 / 100),
        test_index: Some(rows * 85 / 100),
        ..TrainingConfig::default()
    };
    config.model.cell_type_encoder = cell_type;
    config.model.cell_type_decoder = cell_type;
    config.model.use_attention = use_attention;

    let reader = SequenceReader::from_dataframe(&df, &config.reader_options())
        .context("Failed to prepare training windows")?;
    println!(
        "Windows: {} train | {} validation | {} test",
        reader.train_windows(),
        reader.validation_windows().unwrap_or(0),
        reader.test_windows().unwrap_or(0)
    );

    let device = Default::default();
    let run_id = new_run_id(&format!("{}_{}", target, cell_type.label().to_lowercase()));
    let mut log = ExperimentLog::new(&run_id);
    let mut trainer = EncoderDecoderTrainer::<TrainBackend>::new(config.clone(), device)?;

    let summary = trainer.fit(&reader, &mut log)?;
    println!(
        "Trained {} epochs | final train loss: {:.6} | best loss: {:.6}{}",
        summary.epochs_run,
        summary.final_train_loss,
        summary.best_loss,
        if summary.stopped_early { " (early stop)" } else { "" }
    );
    match summary.test_loss {
        Some(loss) => println!("Test loss: {:.6}", loss),
        None => println!("No test windows available"),
    }

    let store = CheckpointStore::new(CHECKPOINT_ROOT);
    let checkpoint = store.save(&run_id, &trainer, Some(reader.normalizer()))?;
    let log_path = log.save(&PathBuf::from(EXPERIMENT_ROOT))?;
    println!("Checkpoint saved at: {}", checkpoint.display());
    println!("Experiment log saved at: {}", log_path.display());

    let values = forecast(
        trainer.model(),
        reader.normalizer(),
        &df,
        &config.reader_options(),
        config.model.number_steps_predict,
        trainer.device(),
    )?;
    println!("Forecast:\n{}", forecast_frame(target, &values)?);

    Ok(())
}
