/// # Sequence-to-Sequence Forecasting Module
///
/// Encoder-decoder networks built from LSTM, GRU or plain RNN cells, with optional concat
/// attention, that forecast a window of future values of a target column.
///
/// ## Module Structure:
///
/// 1. **step_1_sequence_preparation**: Sliding windows, normalisation and train/validation/test batches
/// 2. **step_2_recurrent_cell**: Stacked recurrent cell and the hidden-state representation
/// 3. **step_3_encoder_decoder_arch**: Encoder, attention, decoder and the encoder-decoder passes
/// 4. **step_4_train_model**: Loss, optimizer, learning-rate schedule and the epoch driver
/// 5. **step_5_prediction**: Forecasts on raw data frames and denormalisation
/// 6. **step_6_model_serialization**: Checkpoints keyed by run identifier
///
pub mod step_1_sequence_preparation;
pub mod step_2_recurrent_cell;
pub mod step_3_encoder_decoder_arch;
pub mod step_4_train_model;
pub mod step_5_prediction;
pub mod step_6_model_serialization;
