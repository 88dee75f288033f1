// External imports
use burn::module::{Ignored, Module};
use burn::nn::Linear;
use burn::tensor::{activation, backend::Backend, Tensor};

// Internal imports
use crate::error::{ensure_same_device, ForecastError};
use crate::util::named_option::named_option;
use crate::util::param_init::{ParamInitializer, WeightInit};

named_option! {
    /// Recurrent unit used by the encoder or the decoder.
    pub enum CellType("cell type") {
        Lstm => "LSTM",
        Gru => "GRU",
        Rnn => "RNN",
    }
}

impl CellType {
    /// Number of stacked gate blocks in the input and hidden projections.
    fn gate_count(self) -> usize {
        match self {
            CellType::Lstm => 4,
            CellType::Gru => 3,
            CellType::Rnn => 1,
        }
    }

    /// Whether the hidden state of this unit is a (hidden, cell) pair.
    pub fn has_cell_state(self) -> bool {
        matches!(self, CellType::Lstm)
    }
}

/// # Recurrent State
///
/// State threaded between recurrent calls. Every tensor is laid out as
/// `[num_layers, batch_size, hidden_size]`. LSTM carries a (hidden, cell) pair,
/// GRU and plain RNN a single hidden tensor.
#[derive(Debug, Clone)]
pub enum RecurrentState<B: Backend> {
    Lstm {
        hidden: Tensor<B, 3>,
        cell: Tensor<B, 3>,
    },
    Single(Tensor<B, 3>),
}

impl<B: Backend> RecurrentState<B> {
    /// All-zero state for the given cell type.
    pub fn zeros(
        cell_type: CellType,
        num_layers: usize,
        batch_size: usize,
        hidden_size: usize,
        device: &B::Device,
    ) -> Self {
        let shape = [num_layers, batch_size, hidden_size];
        match cell_type {
            CellType::Lstm => RecurrentState::Lstm {
                hidden: Tensor::zeros(shape, device),
                cell: Tensor::zeros(shape, device),
            },
            CellType::Gru | CellType::Rnn => RecurrentState::Single(Tensor::zeros(shape, device)),
        }
    }

    /// Hidden tensor of every layer.
    pub fn hidden(&self) -> &Tensor<B, 3> {
        match self {
            RecurrentState::Lstm { hidden, .. } => hidden,
            RecurrentState::Single(hidden) => hidden,
        }
    }

    /// Cell tensor, only present for LSTM state.
    pub fn cell(&self) -> Option<&Tensor<B, 3>> {
        match self {
            RecurrentState::Lstm { cell, .. } => Some(cell),
            RecurrentState::Single(_) => None,
        }
    }

    /// Hidden vector of the top layer, shape `[batch_size, hidden_size]`.
    pub fn last_layer_hidden(&self) -> Tensor<B, 2> {
        let hidden = self.hidden();
        let num_layers = hidden.dims()[0];
        hidden.clone().narrow(0, num_layers - 1, 1).squeeze::<2>(0)
    }

    pub fn dims(&self) -> [usize; 3] {
        self.hidden().dims()
    }

    pub fn device(&self) -> B::Device {
        self.hidden().device()
    }

    pub fn is_pair(&self) -> bool {
        matches!(self, RecurrentState::Lstm { .. })
    }

    fn describe(&self) -> String {
        match self {
            RecurrentState::Lstm { hidden, cell } => {
                format!("(hidden {:?}, cell {:?}) pair", hidden.dims(), cell.dims())
            }
            RecurrentState::Single(hidden) => format!("single tensor {:?}", hidden.dims()),
        }
    }

    fn into_layers(self) -> (Vec<Tensor<B, 2>>, Option<Vec<Tensor<B, 2>>>) {
        fn split<B: Backend>(tensor: Tensor<B, 3>) -> Vec<Tensor<B, 2>> {
            let num_layers = tensor.dims()[0];
            (0..num_layers)
                .map(|layer| tensor.clone().narrow(0, layer, 1).squeeze::<2>(0))
                .collect()
        }

        match self {
            RecurrentState::Lstm { hidden, cell } => (split(hidden), Some(split(cell))),
            RecurrentState::Single(hidden) => (split(hidden), None),
        }
    }

    fn from_layers(hidden: Vec<Tensor<B, 2>>, cell: Option<Vec<Tensor<B, 2>>>) -> Self {
        let hidden = Tensor::stack::<3>(hidden, 0);
        match cell {
            Some(cell) => RecurrentState::Lstm {
                hidden,
                cell: Tensor::stack::<3>(cell, 0),
            },
            None => RecurrentState::Single(hidden),
        }
    }
}

/// One layer of a stacked recurrent unit.
///
/// Both projections hold the gate blocks side by side:
/// LSTM `[i | f | g | o]`, GRU `[r | z | n]`, RNN `[h]`.
#[derive(Module, Debug)]
pub struct CellLayer<B: Backend> {
    input_weights: Linear<B>,
    hidden_weights: Linear<B>,
    hidden_size: usize,
}

impl<B: Backend> CellLayer<B> {
    fn gate(&self, projection: &Tensor<B, 2>, index: usize) -> Tensor<B, 2> {
        projection
            .clone()
            .narrow(1, index * self.hidden_size, self.hidden_size)
    }

    /// Advances the layer by one timestep.
    ///
    /// `x` is `[batch_size, input_size]`, `h` and `c` are `[batch_size, hidden_size]`.
    fn step(
        &self,
        cell_type: CellType,
        x: Tensor<B, 2>,
        h: Tensor<B, 2>,
        c: Option<Tensor<B, 2>>,
    ) -> (Tensor<B, 2>, Option<Tensor<B, 2>>) {
        let input_projection = self.input_weights.forward(x);
        let hidden_projection = self.hidden_weights.forward(h.clone());

        match cell_type {
            CellType::Rnn => (activation::tanh(input_projection + hidden_projection), None),
            CellType::Gru => {
                let r = activation::sigmoid(
                    self.gate(&input_projection, 0) + self.gate(&hidden_projection, 0),
                );
                let z = activation::sigmoid(
                    self.gate(&input_projection, 1) + self.gate(&hidden_projection, 1),
                );
                let n = activation::tanh(
                    self.gate(&input_projection, 2) + r * self.gate(&hidden_projection, 2),
                );
                // h' = (1 - z) * n + z * h
                (n.clone() + z * (h - n), None)
            }
            CellType::Lstm => {
                let gates = input_projection + hidden_projection;
                let i = activation::sigmoid(self.gate(&gates, 0));
                let f = activation::sigmoid(self.gate(&gates, 1));
                let g = activation::tanh(self.gate(&gates, 2));
                let o = activation::sigmoid(self.gate(&gates, 3));

                let c = match c {
                    Some(c) => f * c + i * g,
                    None => i * g,
                };
                let h = o * activation::tanh(c.clone());
                (h, Some(c))
            }
        }
    }
}

/// # Recurrent Cell
///
/// Stacked LSTM, GRU or plain RNN unit behind one contract: process a batch-first
/// sequence `[batch_size, seq_len, input_size]` from an optional initial state and return the
/// top layer output of every timestep together with the final state.
///
/// The cell type is fixed at construction. State fed back in is checked against the
/// representation and shape this cell produces, so an LSTM pair given to a GRU cell (or a
/// state of the wrong width) is reported as a shape mismatch instead of silently computing.
#[derive(Module, Debug)]
pub struct RecurrentCell<B: Backend> {
    layers: Vec<CellLayer<B>>,
    cell_type: Ignored<CellType>,
    input_size: usize,
    hidden_size: usize,
}

impl<B: Backend> RecurrentCell<B> {
    pub fn new(
        cell_type: CellType,
        input_size: usize,
        hidden_size: usize,
        num_layers: usize,
        init: &mut ParamInitializer,
        device: &B::Device,
    ) -> Result<Self, ForecastError> {
        if input_size == 0 || hidden_size == 0 || num_layers == 0 {
            return Err(ForecastError::configuration(format!(
                "{} cell needs positive sizes (input_size={}, hidden_size={}, num_layers={})",
                cell_type, input_size, hidden_size, num_layers
            )));
        }

        let gate_size = cell_type.gate_count() * hidden_size;
        let mut layers = Vec::with_capacity(num_layers);
        for layer in 0..num_layers {
            let layer_input = if layer == 0 { input_size } else { hidden_size };
            layers.push(CellLayer {
                input_weights: init.linear(layer_input, gate_size, WeightInit::XavierNormal, device)?,
                hidden_weights: init.linear(hidden_size, gate_size, WeightInit::XavierNormal, device)?,
                hidden_size,
            });
        }

        Ok(Self {
            layers,
            cell_type: Ignored(cell_type),
            input_size,
            hidden_size,
        })
    }

    pub fn cell_type(&self) -> CellType {
        *self.cell_type
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Zero state for a batch.
    pub fn zero_state(&self, batch_size: usize, device: &B::Device) -> RecurrentState<B> {
        RecurrentState::zeros(
            self.cell_type(),
            self.num_layers(),
            batch_size,
            self.hidden_size,
            device,
        )
    }

    /// Verifies that `state` has the representation and shape this cell expects.
    pub fn check_state(&self, state: &RecurrentState<B>, batch_size: usize) -> Result<(), ForecastError> {
        let expected = [self.num_layers(), batch_size, self.hidden_size];
        let pair_expected = self.cell_type().has_cell_state();
        let shapes_ok = state.dims() == expected && state.cell().map_or(true, |c| c.dims() == expected);

        if state.is_pair() != pair_expected || !shapes_ok {
            let wanted = if pair_expected { "(hidden, cell) pair" } else { "single tensor" };
            return Err(ForecastError::shape(format!(
                "{} cell expects a {} of shape {:?}, got {}",
                self.cell_type(),
                wanted,
                expected,
                state.describe()
            )));
        }
        Ok(())
    }

    /// Runs the cell over a whole sequence.
    ///
    /// # Arguments
    ///
    /// * `input` - Tensor of shape `[batch_size, seq_len, input_size]`
    /// * `state` - Initial state, zeros when `None`
    ///
    /// # Returns
    ///
    /// Top layer output `[batch_size, seq_len, hidden_size]` and the final state
    pub fn run_sequence(
        &self,
        input: Tensor<B, 3>,
        state: Option<RecurrentState<B>>,
    ) -> Result<(Tensor<B, 3>, RecurrentState<B>), ForecastError> {
        let [batch_size, seq_len, features] = input.dims();
        if features != self.input_size {
            return Err(ForecastError::shape(format!(
                "{} cell expects {} input features, got input of shape {:?}",
                self.cell_type(),
                self.input_size,
                input.dims()
            )));
        }
        if seq_len == 0 {
            return Err(ForecastError::shape("cannot run a recurrent cell over an empty sequence"));
        }

        let state = match state {
            Some(state) => {
                self.check_state(&state, batch_size)?;
                ensure_same_device(&input, state.hidden(), "recurrent input and state")?;
                state
            }
            None => self.zero_state(batch_size, &input.device()),
        };

        let cell_type = self.cell_type();
        let (mut hidden, mut cell) = state.into_layers();
        let mut outputs = Vec::with_capacity(seq_len);

        for t in 0..seq_len {
            let mut x = input.clone().narrow(1, t, 1).squeeze::<2>(1);
            for (index, layer) in self.layers.iter().enumerate() {
                let c = cell.as_ref().map(|cells| cells[index].clone());
                let (h, c) = layer.step(cell_type, x, hidden[index].clone(), c);
                if let (Some(cells), Some(c)) = (cell.as_mut(), c) {
                    cells[index] = c;
                }
                hidden[index] = h.clone();
                x = h;
            }
            outputs.push(x);
        }

        let output = Tensor::stack::<3>(outputs, 1);
        Ok((output, RecurrentState::from_layers(hidden, cell)))
    }

    /// Advances the cell by exactly one timestep.
    ///
    /// `input` must be `[batch_size, 1, input_size]`; the returned output is `[batch_size, hidden_size]`.
    pub fn run_step(
        &self,
        input: Tensor<B, 3>,
        state: RecurrentState<B>,
    ) -> Result<(Tensor<B, 2>, RecurrentState<B>), ForecastError> {
        if input.dims()[1] != 1 {
            return Err(ForecastError::shape(format!(
                "single-step input must have one timestep, got shape {:?}",
                input.dims()
            )));
        }
        let (output, state) = self.run_sequence(input, Some(state))?;
        Ok((output.squeeze::<2>(1), state))
    }
}
