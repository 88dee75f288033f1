// Internal imports
use crate::seq2seq::step_1_sequence_preparation::SequenceReader;
use crate::seq2seq::step_2_recurrent_cell::CellType;
use crate::seq2seq::step_4_train_model::{EncoderDecoderTrainer, TrainingConfig};
use crate::seq2seq::step_5_prediction::predict_test_split;
use crate::test::test_utils::{generate_test_dataframe, small_training_config, TestAutodiffBackend};
use crate::util::model_logger::ExperimentLog;
use crate::util::optimizers::OptimizerKind;

fn predictions_of(
    trainer: &EncoderDecoderTrainer<TestAutodiffBackend>,
    reader: &SequenceReader,
) -> Vec<f32> {
    let batch = reader.test_batches(4).unwrap().next().unwrap();
    let (predictions, _) = trainer.prediction_step(&batch).unwrap();
    predictions.into_data().to_vec::<f32>().unwrap()
}

#[test]
fn test_training_reduces_loss_on_a_batch() {
    let df = generate_test_dataframe(100, 1).unwrap();
    let config = small_training_config();
    let reader = SequenceReader::from_dataframe(&df, &config.reader_options()).unwrap();
    let mut trainer = EncoderDecoderTrainer::<TestAutodiffBackend>::new(config, Default::default()).unwrap();

    let batch = reader.train_batches(16, 0).next().unwrap();
    let first = trainer.training_step(&batch).unwrap();
    let mut last = first;
    for _ in 0..30 {
        last = trainer.training_step(&batch).unwrap();
    }

    assert_eq!(first.batch_size, 16);
    assert!((first.weighted_loss - first.loss * 16.0).abs() < 1e-9);
    assert!(last.loss < first.loss, "loss went from {} to {}", first.loss, last.loss);
}

#[test]
fn test_every_optimizer_updates_the_model() {
    let df = generate_test_dataframe(100, 2).unwrap();
    for optimizer in OptimizerKind::ALL {
        let config = TrainingConfig {
            optimizer: *optimizer,
            ..small_training_config()
        };
        let reader = SequenceReader::from_dataframe(&df, &config.reader_options()).unwrap();
        let mut trainer = EncoderDecoderTrainer::<TestAutodiffBackend>::new(config, Default::default()).unwrap();

        let before = predictions_of(&trainer, &reader);
        let batch = reader.train_batches(16, 0).next().unwrap();
        let output = trainer.training_step(&batch).unwrap();
        let after = predictions_of(&trainer, &reader);

        assert!(output.loss.is_finite(), "{} produced a non-finite loss", optimizer);
        assert_ne!(before, after, "{} did not change the parameters", optimizer);
    }
}

#[test]
fn test_same_seed_same_training_losses() {
    let df = generate_test_dataframe(100, 3).unwrap();
    let config = small_training_config();
    let reader = SequenceReader::from_dataframe(&df, &config.reader_options()).unwrap();

    let losses = || {
        let mut trainer =
            EncoderDecoderTrainer::<TestAutodiffBackend>::new(config.clone(), Default::default()).unwrap();
        reader
            .train_batches(16, 9)
            .take(3)
            .map(|batch| trainer.training_step(&batch).unwrap().loss)
            .collect::<Vec<f64>>()
    };

    assert_eq!(losses(), losses());
}

#[test]
fn test_fit_logs_epochs_and_test_loss() {
    let df = generate_test_dataframe(100, 4).unwrap();
    let mut config = small_training_config();
    config.model.use_attention = true;
    config.model.cell_type_decoder = CellType::Gru;
    let reader = SequenceReader::from_dataframe(&df, &config.reader_options()).unwrap();
    let mut trainer = EncoderDecoderTrainer::<TestAutodiffBackend>::new(config, Default::default()).unwrap();
    let mut log = ExperimentLog::new("fit_test");

    let summary = trainer.fit(&reader, &mut log).unwrap();

    assert_eq!(summary.epochs_run, 2);
    assert_eq!(trainer.epoch(), 2);
    assert_eq!(log.epochs.len(), 2);
    assert!(log.epochs.iter().all(|e| e.validation_loss.is_some()));
    assert!(summary.test_loss.is_some());
    assert_eq!(log.test_loss, summary.test_loss);
    assert_eq!(log.metadata["optimizer"], "Adam");
    assert!(log.notes.is_empty());
}

#[test]
fn test_early_stopping_with_zero_learning_progress() {
    let df = generate_test_dataframe(100, 5).unwrap();
    let mut config = small_training_config();
    config.epochs = 6;
    config.patience = 1;
    // SGD with a vanishing rate leaves the monitored loss flat
    config.optimizer = OptimizerKind::Sgd;
    config.learning_rate = 1e-12;
    config.min_delta = 1.0;
    let reader = SequenceReader::from_dataframe(&df, &config.reader_options()).unwrap();
    let mut trainer = EncoderDecoderTrainer::<TestAutodiffBackend>::new(config, Default::default()).unwrap();

    let mut log = ExperimentLog::new("early");
    let summary = trainer.fit(&reader, &mut log).unwrap();
    assert!(summary.stopped_early);
    assert_eq!(summary.epochs_run, 2);
    assert!(log.notes.contains("Early stopping triggered after 2 epochs"));
}

#[test]
fn test_trainer_rejects_multi_feature_decoder() {
    let mut config = small_training_config();
    config.model.decoder_features = 2;
    config.model.output_features = 2;

    let err = EncoderDecoderTrainer::<TestAutodiffBackend>::new(config, Default::default())
        .err()
        .expect("configuration must be rejected");
    assert!(err.downcast_ref::<crate::error::ForecastError>().is_some());
}

#[test]
fn test_fit_rejects_mismatched_reader() {
    let df = generate_test_dataframe(100, 6).unwrap();
    let config = small_training_config();
    let mut other = config.clone();
    other.model.number_steps_predict = 4;
    let reader = SequenceReader::from_dataframe(&df, &other.reader_options()).unwrap();
    let mut trainer = EncoderDecoderTrainer::<TestAutodiffBackend>::new(config, Default::default()).unwrap();

    assert!(trainer.fit(&reader, &mut ExperimentLog::new("mismatch")).is_err());
}

#[test]
fn test_predict_test_split_in_original_units() {
    let df = generate_test_dataframe(100, 7).unwrap();
    let config = small_training_config();
    let reader = SequenceReader::from_dataframe(&df, &config.reader_options()).unwrap();
    let trainer = EncoderDecoderTrainer::<TestAutodiffBackend>::new(config, Default::default()).unwrap();

    let (predictions, targets) = predict_test_split(&trainer, &reader).unwrap().unwrap();
    assert_eq!(predictions.dim(), (13, 3));
    assert_eq!(targets.dim(), (13, 3));
    // targets come back on the price scale of the synthetic series
    assert!(targets.iter().all(|v| (90.0..110.0).contains(v)));
}
