pub mod test_encoder_decoder;
pub mod test_serialization;
pub mod test_training;
