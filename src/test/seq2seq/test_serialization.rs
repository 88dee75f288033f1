// Internal imports
use crate::error::ForecastError;
use crate::seq2seq::step_1_sequence_preparation::SequenceReader;
use crate::seq2seq::step_2_recurrent_cell::CellType;
use crate::seq2seq::step_4_train_model::EncoderDecoderTrainer;
use crate::seq2seq::step_5_prediction::forecast;
use crate::seq2seq::step_6_model_serialization::CheckpointStore;
use crate::test::test_utils::{
    generate_test_dataframe, small_training_config, TestAutodiffBackend, TestBackend,
};
use crate::util::model_logger::ExperimentLog;
use crate::util::optimizers::OptimizerKind;

#[test]
fn test_checkpoint_round_trip_resumes_training() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    let df = generate_test_dataframe(100, 11).unwrap();
    let mut config = small_training_config();
    config.epochs = 1;
    config.model.use_attention = true;
    let reader = SequenceReader::from_dataframe(&df, &config.reader_options()).unwrap();

    let mut trainer = EncoderDecoderTrainer::<TestAutodiffBackend>::new(config, Default::default()).unwrap();
    trainer.fit(&reader, &mut ExperimentLog::new("run")).unwrap();
    store.save("run", &trainer, Some(reader.normalizer())).unwrap();

    let (mut restored, metadata) = store.load::<TestAutodiffBackend>("run", &Default::default()).unwrap();
    assert_eq!(restored.epoch(), 1);
    assert_eq!(restored.learning_rate(), trainer.learning_rate());
    assert_eq!(metadata.normalizer.as_ref(), Some(reader.normalizer()));
    assert_eq!(metadata.config.model, trainer.config().model);

    // identical parameters
    let batch = reader.test_batches(8).unwrap().next().unwrap();
    let (expected, _) = trainer.prediction_step(&batch).unwrap();
    let (actual, _) = restored.prediction_step(&batch).unwrap();
    assert_eq!(
        expected.into_data().to_vec::<f32>().unwrap(),
        actual.into_data().to_vec::<f32>().unwrap()
    );

    // identical Adam moments: the next two updates agree
    let train_batch = reader.train_batches(16, 3).next().unwrap();
    for _ in 0..2 {
        let a = trainer.training_step(&train_batch).unwrap().loss;
        let b = restored.training_step(&train_batch).unwrap().loss;
        assert!((a - b).abs() < 1e-6, "resumed loss {} differs from {}", b, a);
    }
}

#[test]
fn test_adadelta_state_survives_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    let df = generate_test_dataframe(100, 12).unwrap();
    let mut config = small_training_config();
    config.optimizer = OptimizerKind::Adadelta;
    config.model.cell_type_encoder = CellType::Rnn;
    config.model.cell_type_decoder = CellType::Lstm;
    let reader = SequenceReader::from_dataframe(&df, &config.reader_options()).unwrap();

    let mut trainer = EncoderDecoderTrainer::<TestAutodiffBackend>::new(config, Default::default()).unwrap();
    let batch = reader.train_batches(16, 0).next().unwrap();
    trainer.training_step(&batch).unwrap();
    store.save("adadelta", &trainer, None).unwrap();

    let (mut restored, metadata) = store.load::<TestAutodiffBackend>("adadelta", &Default::default()).unwrap();
    assert!(metadata.normalizer.is_none());

    let a = trainer.training_step(&batch).unwrap().loss;
    let b = restored.training_step(&batch).unwrap().loss;
    assert!((a - b).abs() < 1e-6);
    let a = trainer.training_step(&batch).unwrap().loss;
    let b = restored.training_step(&batch).unwrap().loss;
    assert!((a - b).abs() < 1e-6);
}

#[test]
fn test_inference_model_from_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    let df = generate_test_dataframe(100, 13).unwrap();
    let config = small_training_config();
    let options = config.reader_options();
    let reader = SequenceReader::from_dataframe(&df, &options).unwrap();
    let trainer = EncoderDecoderTrainer::<TestAutodiffBackend>::new(config, Default::default()).unwrap();
    store.save("first", &trainer, Some(reader.normalizer())).unwrap();
    store.save("second", &trainer, Some(reader.normalizer())).unwrap();

    assert_eq!(store.list_runs().unwrap(), vec!["first".to_string(), "second".to_string()]);

    let device = Default::default();
    let (model, metadata) = store.load_model::<TestBackend>("first", &device).unwrap();
    let normalizer = metadata.normalizer.unwrap();

    let restored = forecast(&model, &normalizer, &df, &options, 3, &device).unwrap();
    let original = forecast(trainer.model(), reader.normalizer(), &df, &options, 3, trainer.device()).unwrap();
    for (r, o) in restored.iter().zip(original.iter()) {
        assert!((r - o).abs() < 1e-4);
    }
}

#[test]
fn test_unknown_run_id() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    let err = store
        .load::<TestAutodiffBackend>("never_saved", &Default::default())
        .err()
        .expect("unknown run must fail");
    assert!(matches!(
        err.downcast_ref::<ForecastError>(),
        Some(ForecastError::Checkpoint(_))
    ));
}

#[test]
fn test_resumed_fit_finishes_the_epoch_budget() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    let df = generate_test_dataframe(100, 14).unwrap();
    let mut config = small_training_config();
    config.epochs = 3;
    let reader = SequenceReader::from_dataframe(&df, &config.reader_options()).unwrap();

    // train two of the three epochs, then checkpoint
    let mut partial = config.clone();
    partial.epochs = 2;
    let mut trainer = EncoderDecoderTrainer::<TestAutodiffBackend>::new(partial, Default::default()).unwrap();
    trainer.fit(&reader, &mut ExperimentLog::new("resume")).unwrap();
    let state = trainer.state();
    assert_eq!(state.epoch, 2);
    assert!(state.best_loss.is_some());

    // a finished run resumes to no further epochs
    store.save("resume", &trainer, Some(reader.normalizer())).unwrap();
    let (mut restored, metadata) = store.load::<TestAutodiffBackend>("resume", &Default::default()).unwrap();
    assert_eq!(metadata.trainer.best_loss, trainer.state().best_loss);
    assert_eq!(metadata.trainer.patience_counter, trainer.state().patience_counter);
    let summary = restored.fit(&reader, &mut ExperimentLog::new("resume")).unwrap();
    assert_eq!(summary.epochs_run, 0);
    assert_eq!(restored.epoch(), 2);

    // with a three-epoch budget the resumed run trains exactly one more epoch
    let model = restored.model().clone();
    let mut resumed = EncoderDecoderTrainer::<TestAutodiffBackend>::new(config, Default::default())
        .unwrap()
        .restore(model, None, state)
        .unwrap();
    let mut log = ExperimentLog::new("resume");
    let summary = resumed.fit(&reader, &mut log).unwrap();
    assert_eq!(summary.epochs_run, 1);
    assert_eq!(resumed.epoch(), 3);
    assert_eq!(log.epochs.len(), 1);
    assert_eq!(log.epochs[0].epoch, 3);
    assert!(log.notes.contains("Resumed from epoch 2"));
}

#[test]
fn test_early_stop_survives_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    let df = generate_test_dataframe(100, 15).unwrap();
    let mut config = small_training_config();
    config.epochs = 6;
    config.patience = 1;
    config.optimizer = OptimizerKind::Sgd;
    config.learning_rate = 1e-12;
    config.min_delta = 1.0;
    let reader = SequenceReader::from_dataframe(&df, &config.reader_options()).unwrap();

    let mut trainer = EncoderDecoderTrainer::<TestAutodiffBackend>::new(config, Default::default()).unwrap();
    assert!(trainer.fit(&reader, &mut ExperimentLog::new("stopped")).unwrap().stopped_early);
    store.save("stopped", &trainer, None).unwrap();

    let (mut restored, metadata) = store.load::<TestAutodiffBackend>("stopped", &Default::default()).unwrap();
    assert!(metadata.trainer.stopped_early);
    let summary = restored.fit(&reader, &mut ExperimentLog::new("stopped")).unwrap();
    assert_eq!(summary.epochs_run, 0);
    assert!(summary.stopped_early);
    assert_eq!(restored.epoch(), 2);
}
