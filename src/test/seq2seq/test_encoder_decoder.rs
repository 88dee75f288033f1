// External imports
use burn::tensor::{Distribution, Tensor};

// Internal imports
use crate::error::ForecastError;
use crate::seq2seq::step_2_recurrent_cell::CellType;
use crate::seq2seq::step_3_encoder_decoder_arch::{EncoderDecoder, EncoderDecoderConfig};
use crate::seq2seq::step_4_train_model::decoder_seed;
use crate::test::test_utils::{max_abs_diff, TestBackend};

fn config(cell_type: CellType, use_attention: bool) -> EncoderDecoderConfig {
    EncoderDecoderConfig {
        cell_type_encoder: cell_type,
        cell_type_decoder: cell_type,
        use_attention,
        ..EncoderDecoderConfig::default()
    }
}

fn inputs(batch: usize) -> (Tensor<TestBackend, 3>, Tensor<TestBackend, 3>) {
    let device = Default::default();
    // fixed values so every model sees the same batch
    let x_encoder = Tensor::<TestBackend, 3>::from_floats(
        [[[0.1], [0.4], [-0.3], [0.8], [0.2], [-0.5]]],
        &device,
    )
    .repeat_dim(0, batch);
    let x_decoder = Tensor::<TestBackend, 3>::from_floats([[[-1.0], [0.3], [0.6], [-0.2], [0.9]]], &device)
        .repeat_dim(0, batch);
    (x_encoder, x_decoder)
}

#[test]
fn test_same_seed_same_outputs() {
    let device = Default::default();
    for use_attention in [false, true] {
        let a: EncoderDecoder<TestBackend> = config(CellType::Gru, use_attention).init(42, &device).unwrap();
        let b: EncoderDecoder<TestBackend> = config(CellType::Gru, use_attention).init(42, &device).unwrap();
        let c: EncoderDecoder<TestBackend> = config(CellType::Gru, use_attention).init(43, &device).unwrap();
        let (x_encoder, x_decoder) = inputs(2);

        let out_a = a.train_step(x_encoder.clone(), x_decoder.clone()).unwrap();
        let out_b = b.train_step(x_encoder.clone(), x_decoder.clone()).unwrap();
        let out_c = c.train_step(x_encoder, x_decoder).unwrap();

        assert_eq!(max_abs_diff(out_a.clone(), out_b), 0.0);
        assert!(max_abs_diff(out_a, out_c) > 0.0);
    }
}

#[test]
fn test_every_cell_type_with_and_without_attention() {
    let device = Default::default();
    for cell_type in CellType::ALL {
        for use_attention in [false, true] {
            let model: EncoderDecoder<TestBackend> = config(*cell_type, use_attention).init(1, &device).unwrap();
            let (x_encoder, x_decoder) = inputs(3);

            let trained = model.train_step(x_encoder.clone(), x_decoder).unwrap();
            let predicted = model.predict(x_encoder, decoder_seed(3, &device)).unwrap();

            assert_eq!(trained.dims(), [3, 5, 1], "{} attention={}", cell_type, use_attention);
            assert_eq!(predicted.dims(), [3, 5, 1], "{} attention={}", cell_type, use_attention);
        }
    }
}

#[test]
fn test_predict_matches_teacher_forcing_on_own_outputs() {
    let device = Default::default();
    for use_attention in [false, true] {
        let model: EncoderDecoder<TestBackend> = config(CellType::Lstm, use_attention).init(7, &device).unwrap();
        let (x_encoder, _) = inputs(2);
        let seed = decoder_seed::<TestBackend>(2, &device);

        let predicted = model.predict(x_encoder.clone(), seed.clone()).unwrap();
        // decoder input that reproduces the closed loop: seed, then the first four predictions
        let x_decoder = Tensor::cat(vec![seed, predicted.clone().narrow(1, 0, 4)], 1);
        let forced = model.train_step(x_encoder, x_decoder).unwrap();

        assert!(
            max_abs_diff(predicted, forced) < 1e-5,
            "closed loop diverged from teacher forcing (attention={})",
            use_attention
        );
    }
}

#[test]
fn test_generate_horizon_ignores_seed_length() {
    let device = Default::default();
    let model: EncoderDecoder<TestBackend> = config(CellType::Rnn, false).init(3, &device).unwrap();
    let (x_encoder, _) = inputs(4);

    for seed_len in [1, 4] {
        let seed = Tensor::<TestBackend, 3>::random([4, seed_len, 1], Distribution::Default, &device);
        let outputs = model.generate(x_encoder.clone(), seed, 5).unwrap();
        assert_eq!(outputs.squeeze::<2>(2).dims(), [4, 5]);
    }
}

#[test]
fn test_mismatched_hidden_sizes_with_attention() {
    let device = Default::default();
    let model: EncoderDecoder<TestBackend> = EncoderDecoderConfig {
        use_attention: true,
        hidden_size_encoder: 10,
        hidden_size_decoder: 8,
        cell_type_encoder: CellType::Lstm,
        cell_type_decoder: CellType::Gru,
        ..EncoderDecoderConfig::default()
    }
    .init(5, &device)
    .unwrap();
    let (x_encoder, x_decoder) = inputs(2);

    let outputs = model.train_step(x_encoder.clone(), x_decoder).unwrap();
    assert_eq!(outputs.dims(), [2, 5, 1]);

    // a batch disagreement is reported before any computation
    let err = model
        .predict(x_encoder, decoder_seed(3, &device))
        .unwrap_err();
    assert!(matches!(err, ForecastError::ShapeMismatch(_)));
}

#[test]
fn test_wrong_encoder_width_is_shape_error() {
    let device = Default::default();
    let model: EncoderDecoder<TestBackend> = config(CellType::Gru, true).init(0, &device).unwrap();
    let x_encoder = Tensor::<TestBackend, 3>::zeros([2, 6, 3], &device);

    let err = model.predict(x_encoder, decoder_seed(2, &device)).unwrap_err();
    assert!(matches!(err, ForecastError::ShapeMismatch(_)));
}

#[test]
fn test_empty_seed_is_shape_error() {
    let device = Default::default();
    for use_attention in [false, true] {
        let model: EncoderDecoder<TestBackend> = config(CellType::Gru, use_attention).init(0, &device).unwrap();
        let (x_encoder, _) = inputs(2);
        let seed = Tensor::<TestBackend, 3>::zeros([2, 0, 1], &device);

        let err = model.generate(x_encoder.clone(), seed.clone(), 3).unwrap_err();
        assert!(matches!(err, ForecastError::ShapeMismatch(_)), "attention={}", use_attention);
        let err = model.predict(x_encoder, seed).unwrap_err();
        assert!(matches!(err, ForecastError::ShapeMismatch(_)), "attention={}", use_attention);
    }
}
