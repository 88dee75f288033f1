/// Test modules for the forecasting package
///
/// * `test_utils` - Seeded synthetic data frames, backends and small configurations
/// * `seq2seq` - Suites for the encoder-decoder passes, training, and checkpoints
///
/// Unit tests of individual components live next to their code.
pub mod seq2seq;
