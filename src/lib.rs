pub mod constants;
pub mod error;
pub mod seq2seq;
#[cfg(test)]
pub mod test;
pub mod util {
    pub mod model_logger;
    pub mod named_option;
    pub mod optimizers;
    pub mod param_init;
}

pub use error::ForecastError;
pub use seq2seq::step_2_recurrent_cell::{CellType, RecurrentCell, RecurrentState};
pub use seq2seq::step_3_encoder_decoder_arch::{
    Attention, AttentionMethod, Decoder, EncoderDecoder, EncoderDecoderConfig, Encoder,
};
pub use seq2seq::step_4_train_model::{EncoderDecoderTrainer, LossKind, TrainingConfig};
pub use util::optimizers::OptimizerKind;
