// External imports
use burn::module::{Ignored, Module, Param};
use burn::nn::Linear;
use burn::tensor::{activation, backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

// Internal imports
use super::step_2_recurrent_cell::{CellType, RecurrentCell, RecurrentState};
use crate::constants::{DEFAULT_HIDDEN_SIZE, DEFAULT_NUM_LAYERS, DEFAULT_STEPS_PREDICT};
use crate::error::{ensure_same_device, ForecastError};
use crate::util::named_option::named_option;
use crate::util::param_init::{ParamInitializer, WeightInit};

named_option! {
    /// Scoring function used by [`Attention`]. Only `concat` is implemented.
    pub enum AttentionMethod("attention method") {
        Concat => "concat",
        Dot => "dot",
        General => "general",
    }
}

/// # Encoder
///
/// Runs a [`RecurrentCell`] over the whole input window and returns the output of every
/// timestep `[batch_size, seq_len, hidden_size]` together with the final state.
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    cell: RecurrentCell<B>,
}

impl<B: Backend> Encoder<B> {
    pub fn new(
        cell_type: CellType,
        input_size: usize,
        hidden_size: usize,
        num_layers: usize,
        init: &mut ParamInitializer,
        device: &B::Device,
    ) -> Result<Self, ForecastError> {
        let cell = RecurrentCell::new(cell_type, input_size, hidden_size, num_layers, init, device)?;
        Ok(Self { cell })
    }

    pub fn forward(
        &self,
        input: Tensor<B, 3>,
        state: Option<RecurrentState<B>>,
    ) -> Result<(Tensor<B, 3>, RecurrentState<B>), ForecastError> {
        self.cell.run_sequence(input, state)
    }

    pub fn cell_type(&self) -> CellType {
        self.cell.cell_type()
    }

    pub fn hidden_size(&self) -> usize {
        self.cell.hidden_size()
    }
}

/// # Attention
///
/// Concat attention between the current decoder hidden vector and every encoder output:
///
/// `score_t = v · tanh(W [h_dec ; enc_t])`, `weights = softmax_t(score)`
///
/// The projection `W` maps `hidden_size_decoder + hidden_size_encoder` to `hidden_size_encoder`,
/// so the two hidden sizes are free to differ.
#[derive(Module, Debug)]
pub struct Attention<B: Backend> {
    attn: Linear<B>,
    v: Param<Tensor<B, 1>>,
    encoder_hidden_size: usize,
    decoder_hidden_size: usize,
}

impl<B: Backend> Attention<B> {
    pub fn new(
        method: AttentionMethod,
        encoder_hidden_size: usize,
        decoder_hidden_size: usize,
        init: &mut ParamInitializer,
        device: &B::Device,
    ) -> Result<Self, ForecastError> {
        if method != AttentionMethod::Concat {
            return Err(ForecastError::configuration(format!(
                "attention method '{}' is not implemented, only '{}' is available",
                method,
                AttentionMethod::Concat
            )));
        }
        if encoder_hidden_size == 0 || decoder_hidden_size == 0 {
            return Err(ForecastError::configuration("attention hidden sizes must be positive"));
        }

        let attn = init.linear(
            encoder_hidden_size + decoder_hidden_size,
            encoder_hidden_size,
            WeightInit::XavierUniform,
            device,
        )?;
        let v = init.normal_vector(
            encoder_hidden_size,
            1.0 / (encoder_hidden_size as f64).sqrt(),
            device,
        )?;

        Ok(Self {
            attn,
            v,
            encoder_hidden_size,
            decoder_hidden_size,
        })
    }

    /// Alignment weights of one decoding step.
    ///
    /// # Arguments
    ///
    /// * `hidden` - Top layer decoder hidden vector `[batch_size, hidden_size_decoder]`
    /// * `encoder_outputs` - `[batch_size, seq_len, hidden_size_encoder]`
    ///
    /// # Returns
    ///
    /// Weights `[batch_size, 1, seq_len]`, non-negative and summing to one over the last axis
    pub fn forward(
        &self,
        hidden: Tensor<B, 2>,
        encoder_outputs: Tensor<B, 3>,
    ) -> Result<Tensor<B, 3>, ForecastError> {
        let [batch_size, seq_len, encoder_width] = encoder_outputs.dims();
        let [hidden_batch, hidden_width] = hidden.dims();
        if encoder_width != self.encoder_hidden_size
            || hidden_width != self.decoder_hidden_size
            || hidden_batch != batch_size
        {
            return Err(ForecastError::shape(format!(
                "attention sized for decoder hidden {} and encoder outputs {}, got hidden {:?} and encoder outputs {:?}",
                self.decoder_hidden_size,
                self.encoder_hidden_size,
                hidden.dims(),
                encoder_outputs.dims()
            )));
        }
        ensure_same_device(&hidden, &encoder_outputs, "attention inputs")?;

        // [batch, seq_len, hidden_dec] next to [batch, seq_len, hidden_enc]
        let repeated = hidden.unsqueeze_dim::<3>(1).repeat_dim(1, seq_len);
        let energy = activation::tanh(self.attn.forward(Tensor::cat(vec![repeated, encoder_outputs], 2)));

        let v = self
            .v
            .val()
            .reshape([1, self.encoder_hidden_size, 1])
            .repeat_dim(0, batch_size);
        let scores = energy.matmul(v); // [batch, seq_len, 1]

        Ok(activation::softmax(scores, 1).swap_dims(1, 2))
    }

    /// Weighted sum of encoder outputs, `[batch_size, 1, hidden_size_encoder]`.
    pub fn context(&self, weights: Tensor<B, 3>, encoder_outputs: Tensor<B, 3>) -> Tensor<B, 3> {
        weights.matmul(encoder_outputs)
    }

    /// Input width of the concat projection.
    pub fn concat_width(&self) -> usize {
        self.encoder_hidden_size + self.decoder_hidden_size
    }

    pub fn projection(&self) -> &Linear<B> {
        &self.attn
    }
}

/// Chooses what the decoder consumes at each step of [`Decoder::unroll`].
pub trait DecoderFeed<B: Backend> {
    /// Input for `step`, shaped `[batch_size, seq_len, features]`. `previous` is the projected
    /// output of the last step and `state` the decoder state before this step.
    fn next_input(
        &mut self,
        step: usize,
        previous: Option<&Tensor<B, 2>>,
        state: &RecurrentState<B>,
    ) -> Result<Tensor<B, 3>, ForecastError>;
}

/// Feeds the ground-truth decoder input of each step.
pub struct TeacherForcing<B: Backend> {
    inputs: Tensor<B, 3>,
}

impl<B: Backend> TeacherForcing<B> {
    pub fn new(inputs: Tensor<B, 3>) -> Self {
        Self { inputs }
    }
}

impl<B: Backend> DecoderFeed<B> for TeacherForcing<B> {
    fn next_input(
        &mut self,
        step: usize,
        _previous: Option<&Tensor<B, 2>>,
        _state: &RecurrentState<B>,
    ) -> Result<Tensor<B, 3>, ForecastError> {
        let available = self.inputs.dims()[1];
        if step >= available {
            return Err(ForecastError::shape(format!(
                "teacher forcing needs input for step {} but only {} timesteps were given",
                step, available
            )));
        }
        Ok(self.inputs.clone().narrow(1, step, 1))
    }
}

/// Feeds the seed on the first step and the decoder's own previous output afterwards.
pub struct SelfFeeding<B: Backend> {
    seed: Option<Tensor<B, 3>>,
}

impl<B: Backend> SelfFeeding<B> {
    pub fn new(seed: Tensor<B, 3>) -> Self {
        Self { seed: Some(seed) }
    }
}

impl<B: Backend> DecoderFeed<B> for SelfFeeding<B> {
    fn next_input(
        &mut self,
        _step: usize,
        previous: Option<&Tensor<B, 2>>,
        _state: &RecurrentState<B>,
    ) -> Result<Tensor<B, 3>, ForecastError> {
        if let Some(seed) = self.seed.take() {
            return Ok(seed);
        }
        previous
            .map(|output| output.clone().unsqueeze_dim::<3>(1))
            .ok_or_else(|| ForecastError::shape("self-feeding decoder has no previous output"))
    }
}

/// Appends an attention context vector to the last timestep of another feed.
pub struct AttentionFeed<'a, B: Backend, F: DecoderFeed<B>> {
    attention: &'a Attention<B>,
    encoder_outputs: Tensor<B, 3>,
    inner: F,
}

impl<'a, B: Backend, F: DecoderFeed<B>> AttentionFeed<'a, B, F> {
    pub fn new(attention: &'a Attention<B>, encoder_outputs: Tensor<B, 3>, inner: F) -> Self {
        Self {
            attention,
            encoder_outputs,
            inner,
        }
    }
}

impl<'a, B: Backend, F: DecoderFeed<B>> DecoderFeed<B> for AttentionFeed<'a, B, F> {
    fn next_input(
        &mut self,
        step: usize,
        previous: Option<&Tensor<B, 2>>,
        state: &RecurrentState<B>,
    ) -> Result<Tensor<B, 3>, ForecastError> {
        let base = self.inner.next_input(step, previous, state)?;
        let last = base.dims()[1].checked_sub(1).ok_or_else(|| {
            ForecastError::shape(format!("decoder input {:?} has no timesteps", base.dims()))
        })?;
        let base = base.narrow(1, last, 1);

        let weights = self
            .attention
            .forward(state.last_layer_hidden(), self.encoder_outputs.clone())?;
        let context = self.attention.context(weights, self.encoder_outputs.clone());
        Ok(Tensor::cat(vec![base, context], 2))
    }
}

/// # Decoder
///
/// Recurrent cell followed by a linear projection `hidden_size -> output_size`.
///
/// Every decoding mode is a thin wrapper around [`Decoder::unroll`], which advances the cell once
/// per step on whatever the supplied [`DecoderFeed`] produces. The batched teacher-forced mode
/// is the only exception: it runs the cell over the whole input in one call because no step
/// depends on a previous output.
#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    cell: RecurrentCell<B>,
    output_layer: Linear<B>,
    number_steps_predict: usize,
    output_size: usize,
}

impl<B: Backend> Decoder<B> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cell_type: CellType,
        input_size: usize,
        hidden_size: usize,
        output_size: usize,
        num_layers: usize,
        number_steps_predict: usize,
        init: &mut ParamInitializer,
        device: &B::Device,
    ) -> Result<Self, ForecastError> {
        if output_size == 0 || number_steps_predict == 0 {
            return Err(ForecastError::configuration(format!(
                "decoder needs positive output_size and number_steps_predict (got {} and {})",
                output_size, number_steps_predict
            )));
        }
        let cell = RecurrentCell::new(cell_type, input_size, hidden_size, num_layers, init, device)?;
        let output_layer = init.linear(hidden_size, output_size, WeightInit::XavierUniform, device)?;

        Ok(Self {
            cell,
            output_layer,
            number_steps_predict,
            output_size,
        })
    }

    pub fn cell(&self) -> &RecurrentCell<B> {
        &self.cell
    }

    pub fn number_steps_predict(&self) -> usize {
        self.number_steps_predict
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    /// Batched teacher-forced decoding of `[batch_size, seq_len, input_size]`.
    ///
    /// Returns `[batch_size, seq_len, output_size]` and the final state.
    pub fn forward(
        &self,
        input: Tensor<B, 3>,
        state: RecurrentState<B>,
    ) -> Result<(Tensor<B, 3>, RecurrentState<B>), ForecastError> {
        let (output, state) = self.cell.run_sequence(input, Some(state))?;
        Ok((self.output_layer.forward(output), state))
    }

    /// One step on a single timestep that already carries its context vector.
    pub fn forward_attention(
        &self,
        input: Tensor<B, 3>,
        state: RecurrentState<B>,
    ) -> Result<(Tensor<B, 2>, RecurrentState<B>), ForecastError> {
        let (output, state) = self.cell.run_step(input, state)?;
        Ok((self.output_layer.forward(output), state))
    }

    /// Autoregressive decoding over the configured horizon.
    pub fn predict(
        &self,
        seed: Tensor<B, 3>,
        state: RecurrentState<B>,
    ) -> Result<(Tensor<B, 3>, RecurrentState<B>), ForecastError> {
        self.predict_generating(seed, state, self.number_steps_predict)
    }

    /// Autoregressive decoding over `steps` steps.
    ///
    /// The whole seed is consumed on the first step, so the number of outputs is always `steps`
    /// whatever the seed length.
    pub fn predict_generating(
        &self,
        seed: Tensor<B, 3>,
        state: RecurrentState<B>,
        steps: usize,
    ) -> Result<(Tensor<B, 3>, RecurrentState<B>), ForecastError> {
        self.unroll(state, steps, &mut SelfFeeding::new(seed))
    }

    /// Decoding loop shared by every stepwise mode.
    ///
    /// # Returns
    ///
    /// Outputs `[batch_size, steps, output_size]` and the state after the last step
    pub fn unroll<F: DecoderFeed<B>>(
        &self,
        mut state: RecurrentState<B>,
        steps: usize,
        feed: &mut F,
    ) -> Result<(Tensor<B, 3>, RecurrentState<B>), ForecastError> {
        if steps == 0 {
            return Err(ForecastError::configuration("cannot decode zero steps"));
        }

        let mut outputs: Vec<Tensor<B, 2>> = Vec::with_capacity(steps);
        for step in 0..steps {
            let input = feed.next_input(step, outputs.last(), &state)?;
            let (output, next) = self.advance(input, state)?;
            state = next;
            outputs.push(output);
        }

        Ok((Tensor::stack::<3>(outputs, 1), state))
    }

    /// Runs the cell over `input` and projects its last timestep.
    fn advance(
        &self,
        input: Tensor<B, 3>,
        state: RecurrentState<B>,
    ) -> Result<(Tensor<B, 2>, RecurrentState<B>), ForecastError> {
        let (output, state) = self.cell.run_sequence(input, Some(state))?;
        let seq_len = output.dims()[1];
        let last = output.narrow(1, seq_len - 1, 1).squeeze::<2>(1);
        Ok((self.output_layer.forward(last), state))
    }
}

/// # State Bridge
///
/// Adapts the final encoder state to the decoder cell.
///
/// When hidden sizes differ a learned `tanh(Linear(hidden_size_encoder -> hidden_size_decoder))`
/// is applied to every layer of the hidden (and cell) tensor. A (hidden, cell) pair handed to a
/// single-tensor cell keeps its hidden part; a single tensor handed to an LSTM gets a zero cell.
#[derive(Module, Debug)]
pub struct StateBridge<B: Backend> {
    hidden_map: Option<Linear<B>>,
    cell_map: Option<Linear<B>>,
    target: Ignored<CellType>,
}

impl<B: Backend> StateBridge<B> {
    /// Returns `None` when the encoder state already fits the decoder.
    pub fn between(
        source: CellType,
        source_hidden: usize,
        target: CellType,
        target_hidden: usize,
        init: &mut ParamInitializer,
        device: &B::Device,
    ) -> Result<Option<Self>, ForecastError> {
        let resize = source_hidden != target_hidden;
        if !resize && source.has_cell_state() == target.has_cell_state() {
            return Ok(None);
        }

        let (hidden_map, cell_map) = if resize {
            let hidden_map = init.linear(source_hidden, target_hidden, WeightInit::XavierUniform, device)?;
            let cell_map = if source.has_cell_state() && target.has_cell_state() {
                Some(init.linear(source_hidden, target_hidden, WeightInit::XavierUniform, device)?)
            } else {
                None
            };
            (Some(hidden_map), cell_map)
        } else {
            (None, None)
        };

        Ok(Some(Self {
            hidden_map,
            cell_map,
            target: Ignored(target),
        }))
    }

    pub fn forward(&self, state: RecurrentState<B>) -> RecurrentState<B> {
        let (hidden, cell) = match state {
            RecurrentState::Lstm { hidden, cell } => (hidden, Some(cell)),
            RecurrentState::Single(hidden) => (hidden, None),
        };
        let hidden = match &self.hidden_map {
            Some(map) => activation::tanh(map.forward(hidden)),
            None => hidden,
        };

        if !self.target.has_cell_state() {
            return RecurrentState::Single(hidden);
        }
        let cell = match (cell, &self.cell_map) {
            (Some(cell), Some(map)) => activation::tanh(map.forward(cell)),
            (Some(cell), None) => cell,
            (None, _) => hidden.zeros_like(),
        };
        RecurrentState::Lstm { hidden, cell }
    }
}

/// Architecture hyperparameters of an [`EncoderDecoder`], fixed once the model is built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncoderDecoderConfig {
    pub encoder_features: usize,
    pub decoder_features: usize,
    pub output_features: usize,
    pub number_steps_predict: usize,
    pub hidden_size_encoder: usize,
    pub hidden_size_decoder: usize,
    pub num_layers: usize,
    pub cell_type_encoder: CellType,
    pub cell_type_decoder: CellType,
    pub use_attention: bool,
    pub attention_method: AttentionMethod,
}

impl Default for EncoderDecoderConfig {
    fn default() -> Self {
        Self {
            encoder_features: 1,
            decoder_features: 1,
            output_features: 1,
            number_steps_predict: DEFAULT_STEPS_PREDICT,
            hidden_size_encoder: DEFAULT_HIDDEN_SIZE,
            hidden_size_decoder: DEFAULT_HIDDEN_SIZE,
            num_layers: DEFAULT_NUM_LAYERS,
            cell_type_encoder: CellType::Lstm,
            cell_type_decoder: CellType::Lstm,
            use_attention: false,
            attention_method: AttentionMethod::Concat,
        }
    }
}

impl EncoderDecoderConfig {
    pub fn validate(&self) -> Result<(), ForecastError> {
        let sizes = [
            ("encoder_features", self.encoder_features),
            ("decoder_features", self.decoder_features),
            ("output_features", self.output_features),
            ("number_steps_predict", self.number_steps_predict),
            ("hidden_size_encoder", self.hidden_size_encoder),
            ("hidden_size_decoder", self.hidden_size_decoder),
            ("num_layers", self.num_layers),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, value)| *value == 0) {
            return Err(ForecastError::configuration(format!("{} must be positive", name)));
        }
        // predictions are fed back as the next decoder input
        if self.decoder_features != self.output_features {
            return Err(ForecastError::configuration(format!(
                "decoder_features ({}) must equal output_features ({})",
                self.decoder_features, self.output_features
            )));
        }
        Ok(())
    }

    /// Width of the decoder cell input, including the context vector when attention is on.
    pub fn decoder_input_size(&self) -> usize {
        if self.use_attention {
            self.decoder_features + self.hidden_size_encoder
        } else {
            self.decoder_features
        }
    }

    /// Builds a model whose parameters are drawn from `seed`.
    pub fn init<B: Backend>(&self, seed: u64, device: &B::Device) -> Result<EncoderDecoder<B>, ForecastError> {
        self.validate()?;
        let mut init = ParamInitializer::new(seed);

        let encoder = Encoder::new(
            self.cell_type_encoder,
            self.encoder_features,
            self.hidden_size_encoder,
            self.num_layers,
            &mut init,
            device,
        )?;
        let decoder = Decoder::new(
            self.cell_type_decoder,
            self.decoder_input_size(),
            self.hidden_size_decoder,
            self.output_features,
            self.num_layers,
            self.number_steps_predict,
            &mut init,
            device,
        )?;
        let attention = if self.use_attention {
            Some(Attention::new(
                self.attention_method,
                self.hidden_size_encoder,
                self.hidden_size_decoder,
                &mut init,
                device,
            )?)
        } else {
            None
        };
        let bridge = StateBridge::between(
            self.cell_type_encoder,
            self.hidden_size_encoder,
            self.cell_type_decoder,
            self.hidden_size_decoder,
            &mut init,
            device,
        )?;

        Ok(EncoderDecoder {
            encoder,
            decoder,
            attention,
            bridge,
            number_steps_predict: self.number_steps_predict,
        })
    }
}

/// # EncoderDecoder
///
/// Encoder, decoder and optional attention wired into the two passes used by training and
/// inference.
///
/// ## Passes
///
/// - **train_step**: encode, then decode the ground-truth decoder input. Without attention the
///   decoder runs once over the whole input; with attention it steps `number_steps_predict` times,
///   scoring the encoder outputs against the previous decoder hidden vector at every step.
/// - **predict**: encode, then decode autoregressively from a seed, feeding each prediction back in.
///
/// Both passes return `[batch_size, number_steps_predict, output_features]`.
#[derive(Module, Debug)]
pub struct EncoderDecoder<B: Backend> {
    encoder: Encoder<B>,
    decoder: Decoder<B>,
    attention: Option<Attention<B>>,
    bridge: Option<StateBridge<B>>,
    number_steps_predict: usize,
}

impl<B: Backend> EncoderDecoder<B> {
    pub fn encoder(&self) -> &Encoder<B> {
        &self.encoder
    }

    pub fn decoder(&self) -> &Decoder<B> {
        &self.decoder
    }

    pub fn attention(&self) -> Option<&Attention<B>> {
        self.attention.as_ref()
    }

    pub fn number_steps_predict(&self) -> usize {
        self.number_steps_predict
    }

    /// Encoder outputs and the decoder's initial state.
    pub fn encode(&self, x_encoder: Tensor<B, 3>) -> Result<(Tensor<B, 3>, RecurrentState<B>), ForecastError> {
        let (outputs, state) = self.encoder.forward(x_encoder, None)?;
        let state = match &self.bridge {
            Some(bridge) => bridge.forward(state),
            None => state,
        };
        Ok((outputs, state))
    }

    /// Teacher-forced pass.
    ///
    /// # Arguments
    ///
    /// * `x_encoder` - Input window `[batch_size, seq_len, encoder_features]`
    /// * `x_decoder` - Ground-truth decoder input `[batch_size, number_steps_predict, decoder_features]`
    pub fn train_step(&self, x_encoder: Tensor<B, 3>, x_decoder: Tensor<B, 3>) -> Result<Tensor<B, 3>, ForecastError> {
        self.check_decoder_input(&x_encoder, &x_decoder, Some(self.number_steps_predict))?;
        let (encoder_outputs, state) = self.encode(x_encoder)?;

        let (outputs, _) = match &self.attention {
            None => self.decoder.forward(x_decoder, state)?,
            Some(attention) => {
                let mut feed = AttentionFeed::new(attention, encoder_outputs, TeacherForcing::new(x_decoder));
                self.decoder.unroll(state, self.number_steps_predict, &mut feed)?
            }
        };
        Ok(outputs)
    }

    /// Autoregressive pass over the configured horizon from `seed`
    /// `[batch_size, seed_len, decoder_features]`.
    pub fn predict(&self, x_encoder: Tensor<B, 3>, seed: Tensor<B, 3>) -> Result<Tensor<B, 3>, ForecastError> {
        self.generate(x_encoder, seed, self.number_steps_predict)
    }

    /// Autoregressive pass over `steps` steps.
    ///
    /// With attention only the last seed timestep is used; without it the whole seed warms up
    /// the decoder.
    pub fn generate(
        &self,
        x_encoder: Tensor<B, 3>,
        seed: Tensor<B, 3>,
        steps: usize,
    ) -> Result<Tensor<B, 3>, ForecastError> {
        self.check_decoder_input(&x_encoder, &seed, None)?;
        let (encoder_outputs, state) = self.encode(x_encoder)?;

        let (outputs, _) = match &self.attention {
            None => self.decoder.predict_generating(seed, state, steps)?,
            Some(attention) => {
                let mut feed = AttentionFeed::new(attention, encoder_outputs, SelfFeeding::new(seed));
                self.decoder.unroll(state, steps, &mut feed)?
            }
        };
        Ok(outputs)
    }

    fn check_decoder_input(
        &self,
        x_encoder: &Tensor<B, 3>,
        x_decoder: &Tensor<B, 3>,
        expected_len: Option<usize>,
    ) -> Result<(), ForecastError> {
        ensure_same_device(x_encoder, x_decoder, "encoder and decoder inputs")?;
        let [encoder_batch, _, _] = x_encoder.dims();
        let [decoder_batch, decoder_len, _] = x_decoder.dims();

        if encoder_batch != decoder_batch {
            return Err(ForecastError::shape(format!(
                "encoder input {:?} and decoder input {:?} disagree on batch size",
                x_encoder.dims(),
                x_decoder.dims()
            )));
        }
        if decoder_len == 0 {
            return Err(ForecastError::shape(format!(
                "decoder input {:?} has no timesteps",
                x_decoder.dims()
            )));
        }
        if let Some(expected) = expected_len {
            if decoder_len != expected {
                return Err(ForecastError::shape(format!(
                    "decoder input must cover {} steps, got shape {:?}",
                    expected,
                    x_decoder.dims()
                )));
            }
        }
        Ok(())
    }
}
