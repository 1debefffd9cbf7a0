use burn::module::{Module, Param};
use burn::nn::Linear;
use burn::tensor::activation;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::init::kaiming_uniform_linear;

/// Default value added to the forget gate pre-activation
///
/// Also used by freshly initialized cells, whose gate biases are zero.
pub const DEFAULT_FORGET_BIAS: f64 = 1.0;

/// Single-layer LSTM cell
///
/// Gates are laid out in the order `[i, j, f, o]` along the output axis of
/// both maps, which matches the combined `w_gates` matrix of the reference
/// grid-cell snapshots:
/// - z = W_x @ x + b_x + W_h @ h + b_h
/// - c' = c * sigmoid(f + forget_bias) + sigmoid(i) * tanh(j)
/// - h' = tanh(c') * sigmoid(o)
#[derive(Module, Debug)]
pub struct LSTMCell<B: Backend> {
    input_size: usize,
    hidden_size: usize,
    forget_bias: f64,
    input_map: Linear<B>,     // input-to-hidden, [input_size, 4 * hidden_size]
    recurrent_map: Linear<B>, // hidden-to-hidden, [hidden_size, 4 * hidden_size]
}

impl<B: Backend> LSTMCell<B> {
    /// Create a new LSTM cell
    ///
    /// Both weight matrices are Kaiming-uniform initialized; both biases are zero.
    ///
    /// # Arguments
    /// * `input_size` - Size of the input features
    /// * `hidden_size` - Size of the hidden state
    /// * `device` - Device to create the module on
    pub fn new(input_size: usize, hidden_size: usize, device: &B::Device) -> Self {
        Self::with_rng(input_size, hidden_size, &mut StdRng::from_entropy(), device)
    }

    /// Create a new LSTM cell drawing its weights from `rng`
    pub fn with_rng<R: Rng + ?Sized>(
        input_size: usize,
        hidden_size: usize,
        rng: &mut R,
        device: &B::Device,
    ) -> Self {
        Self {
            input_size,
            hidden_size,
            forget_bias: DEFAULT_FORGET_BIAS,
            input_map: kaiming_uniform_linear(input_size, 4 * hidden_size, rng, device),
            recurrent_map: kaiming_uniform_linear(hidden_size, 4 * hidden_size, rng, device),
        }
    }

    /// Set the constant added to the forget gate (default: 1.0)
    pub fn with_forget_bias(mut self, forget_bias: f64) -> Self {
        self.forget_bias = forget_bias;
        self
    }

    /// Get the input size
    pub fn input_size(&self) -> usize {
        self.input_size
    }

    /// Get the hidden size
    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Get the forget gate bias
    pub fn forget_bias(&self) -> f64 {
        self.forget_bias
    }

    /// Input-to-hidden map
    pub fn input_map(&self) -> &Linear<B> {
        &self.input_map
    }

    /// Hidden-to-hidden map
    pub fn recurrent_map(&self) -> &Linear<B> {
        &self.recurrent_map
    }

    /// Replace the gate parameters from a combined weight matrix
    ///
    /// `w_gates` is `[input_size + hidden_size, 4 * hidden_size]`, input rows
    /// first. `b_gates` becomes the input-to-hidden bias and the
    /// hidden-to-hidden bias is reset to zero.
    pub fn set_gates(&mut self, w_gates: Tensor<B, 2>, b_gates: Tensor<B, 1>) {
        let device = w_gates.device();
        let w_input = w_gates.clone().narrow(0, 0, self.input_size);
        let w_hidden = w_gates.narrow(0, self.input_size, self.hidden_size);

        self.input_map.weight = Param::from_tensor(w_input);
        self.input_map.bias = Some(Param::from_tensor(b_gates));
        self.recurrent_map.weight = Param::from_tensor(w_hidden);
        self.recurrent_map.bias = Some(Param::from_tensor(Tensor::zeros(
            [4 * self.hidden_size],
            &device,
        )));
    }

    /// Combined `(w_gates, b_gates)` in the layout accepted by [`Self::set_gates`]
    pub fn gates(&self) -> (Tensor<B, 2>, Tensor<B, 1>) {
        let w_gates = Tensor::cat(
            vec![self.input_map.weight.val(), self.recurrent_map.weight.val()],
            0,
        );
        let b_gates = match (&self.input_map.bias, &self.recurrent_map.bias) {
            (Some(b_x), Some(b_h)) => b_x.val() + b_h.val(),
            (Some(b), None) | (None, Some(b)) => b.val(),
            (None, None) => Tensor::zeros([4 * self.hidden_size], &w_gates.device()),
        };
        (w_gates, b_gates)
    }

    /// Perform a forward pass through the LSTM cell
    ///
    /// # Arguments
    /// * `input` - Input tensor of shape `[batch_size, input_size]`
    /// * `states` - Tuple of (hidden_state, cell_state), each of shape `[batch_size, hidden_size]`
    ///
    /// # Returns
    /// Tuple of (new_hidden_state, new_cell_state)
    pub fn forward(
        &self,
        input: Tensor<B, 2>,
        states: (Tensor<B, 2>, Tensor<B, 2>),
    ) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let (hidden_state, cell_state) = states;

        let z = self.input_map.forward(input) + self.recurrent_map.forward(hidden_state);

        // Split into 4 gates
        let chunks = z.chunk(4, 1);
        let input_gate = activation::sigmoid(chunks[0].clone()); // i
        let candidate = chunks[1].clone().tanh(); // j
        let forget_gate = activation::sigmoid(chunks[2].clone().add_scalar(self.forget_bias)); // f
        let output_gate = activation::sigmoid(chunks[3].clone()); // o

        let new_cell = cell_state * forget_gate + input_gate * candidate;
        let new_hidden = new_cell.clone().tanh() * output_gate;

        (new_hidden, new_cell)
    }
}
