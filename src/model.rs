//! Grid cell network
//!
//! An LSTM integrates 3-dimensional movement inputs (translational speed and
//! the sine/cosine of angular velocity) starting from a state embedded from
//! the initial place-cell and head-direction-cell activations. Each step's
//! hidden state passes through a linear bottleneck with dropout, and two
//! linear heads read place-cell and head-direction-cell logits out of the
//! bottleneck.

use burn::config::Config;
use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Linear};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::cells::LSTMCell;
use crate::ensembles::TargetEnsemble;
use crate::error::{GridError, GridResult};
use crate::init::{trunc_normal_linear, TruncationStrategy};
use crate::snapshot::SnapshotLayout;

/// Width of each step input: speed, sin and cos of angular velocity
pub const INPUT_SIZE: usize = 3;

/// Configuration for [`GridModel`]
#[derive(Config, Debug)]
pub struct GridModelConfig {
    /// Size of the LSTM hidden and cell state
    #[config(default = 128)]
    pub nh_lstm: usize,
    /// Size of the linear layer between the LSTM output and the readouts
    #[config(default = 256)]
    pub nh_bottleneck: usize,
    /// Width of the place-cell initial condition
    #[config(default = 256)]
    pub n_pcs: usize,
    /// Width of the head-direction-cell initial condition
    #[config(default = 12)]
    pub n_hdcs: usize,
    /// Dropout rate applied to the bottleneck while training
    #[config(default = 0.5)]
    pub dropout_bottleneck: f64,
    /// Whether the bottleneck layer carries a bias (stored as its own snapshot file)
    #[config(default = false)]
    pub bottleneck_has_bias: bool,
    /// Constant added to the LSTM forget gate pre-activation
    ///
    /// Applies to freshly sampled models as well as loaded snapshots: the
    /// gate biases start at zero, so a fresh model's effective forget bias is
    /// this value, not 0. Set it to 0.0 for a plain zero-bias LSTM.
    #[config(default = 1.0)]
    pub forget_bias: f64,
    /// How truncated-normal weight draws outside ±2σ are handled
    #[config(default = "TruncationStrategy::Oversample")]
    pub truncation: TruncationStrategy,
    /// Seed for weight sampling; fresh entropy when unset
    #[config(default = "None")]
    pub seed: Option<u64>,
    /// Prefix of a pretrained snapshot to load after initialization
    #[config(default = "None")]
    pub weights_loc: Option<String>,
    /// Orientation of the 2-D arrays in the `weights_loc` snapshot
    #[config(default = "SnapshotLayout::InputMajor")]
    pub weights_layout: SnapshotLayout,
}

impl GridModelConfig {
    fn validate(&self) -> GridResult<()> {
        let widths = [
            ("nh_lstm", self.nh_lstm),
            ("nh_bottleneck", self.nh_bottleneck),
            ("n_pcs", self.n_pcs),
            ("n_hdcs", self.n_hdcs),
        ];
        if let Some((name, _)) = widths.iter().find(|(_, width)| *width == 0) {
            return Err(GridError::invalid_config(format!("{name} must be positive")));
        }
        if !(0.0..1.0).contains(&self.dropout_bottleneck) {
            return Err(GridError::invalid_config(format!(
                "dropout_bottleneck must be in [0, 1), got {}",
                self.dropout_bottleneck
            )));
        }
        Ok(())
    }

    /// Build a model whose readouts predict `target_ensembles[0]` (place
    /// cells) and `target_ensembles[1]` (head-direction cells).
    ///
    /// Weights are sampled fresh, then replaced by the snapshot at
    /// `weights_loc` if one is configured.
    pub fn init<B: Backend, E: TargetEnsemble>(
        &self,
        target_ensembles: &[E],
        device: &B::Device,
    ) -> GridResult<GridModel<B>> {
        self.validate()?;

        let (pc, hd) = match target_ensembles {
            [pc, hd, ..] => (pc, hd),
            _ => {
                return Err(GridError::invalid_config(format!(
                    "expected place-cell and head-direction ensembles, got {} ensemble(s)",
                    target_ensembles.len()
                )))
            }
        };
        for ensemble in [pc, hd] {
            if ensemble.n_cells() == 0 {
                return Err(GridError::invalid_config(format!(
                    "ensemble {} has no cells",
                    ensemble.name()
                )));
            }
        }
        let (n_pc, n_hd) = (pc.n_cells(), hd.n_cells());

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let n_init = self.n_pcs + self.n_hdcs;
        let strategy = self.truncation;

        // Truncated-normal scale follows each layer's output width
        let state_embed =
            trunc_normal_linear(n_init, self.nh_lstm, self.nh_lstm, true, strategy, &mut rng, device);
        let cell_embed =
            trunc_normal_linear(n_init, self.nh_lstm, self.nh_lstm, true, strategy, &mut rng, device);
        let lstm = LSTMCell::with_rng(INPUT_SIZE, self.nh_lstm, &mut rng, device)
            .with_forget_bias(self.forget_bias);
        let bottleneck = trunc_normal_linear(
            self.nh_lstm,
            self.nh_bottleneck,
            self.nh_bottleneck,
            self.bottleneck_has_bias,
            strategy,
            &mut rng,
            device,
        );
        let pc_logits =
            trunc_normal_linear(self.nh_bottleneck, n_pc, n_pc, true, strategy, &mut rng, device);
        let hd_logits =
            trunc_normal_linear(self.nh_bottleneck, n_hd, n_hd, true, strategy, &mut rng, device);

        let mut model = GridModel {
            state_embed,
            cell_embed,
            lstm,
            bottleneck,
            pc_logits,
            hd_logits,
            dropout: DropoutConfig::new(self.dropout_bottleneck).init(),
        };

        tracing::debug!(
            nh_lstm = self.nh_lstm,
            nh_bottleneck = self.nh_bottleneck,
            n_init,
            n_pc,
            n_hd,
            seed = ?self.seed,
            "initialized grid model"
        );

        if let Some(loc) = &self.weights_loc {
            model.load_weights(loc, self.weights_layout)?;
        }

        Ok(model)
    }
}

/// Per-step outputs of [`GridModel::forward`], stacked time-major.
#[derive(Debug, Clone)]
pub struct GridOutput<B: Backend> {
    /// `[seq_len, batch, n_hd]`
    pub logits_hd: Tensor<B, 3>,
    /// `[seq_len, batch, n_pc]`
    pub logits_pc: Tensor<B, 3>,
    /// `[seq_len, batch, nh_bottleneck]`
    pub bottleneck_acts: Tensor<B, 3>,
    /// `[seq_len, batch, nh_lstm]`
    pub rnn_states: Tensor<B, 3>,
    /// `[seq_len, batch, nh_lstm]`
    pub cell_states: Tensor<B, 3>,
}

impl<B: Backend> GridOutput<B> {
    /// Number of time steps
    pub fn seq_len(&self) -> usize {
        self.rnn_states.dims()[0]
    }

    /// Hidden and cell state after the last step, `None` for an empty sequence
    pub fn final_state(&self) -> Option<(Tensor<B, 2>, Tensor<B, 2>)> {
        let last = self.seq_len().checked_sub(1)?;
        Some((
            self.rnn_states.clone().narrow(0, last, 1).squeeze::<2>(0),
            self.cell_states.clone().narrow(0, last, 1).squeeze::<2>(0),
        ))
    }

    /// `(logits_hd, logits_pc, bottleneck_acts, rnn_states, cell_states)`
    #[allow(clippy::type_complexity)]
    pub fn into_parts(
        self,
    ) -> (
        Tensor<B, 3>,
        Tensor<B, 3>,
        Tensor<B, 3>,
        Tensor<B, 3>,
        Tensor<B, 3>,
    ) {
        (
            self.logits_hd,
            self.logits_pc,
            self.bottleneck_acts,
            self.rnn_states,
            self.cell_states,
        )
    }
}

/// LSTM grid cell model
///
/// # Type Parameters
/// * `B` - The backend type. Bottleneck dropout is only active on autodiff
///   backends; call `valid()` on an autodiff model for evaluation.
#[derive(Module, Debug)]
pub struct GridModel<B: Backend> {
    /// Initial hidden state from the concatenated initial conditions
    pub(crate) state_embed: Linear<B>,
    /// Initial cell state from the concatenated initial conditions
    pub(crate) cell_embed: Linear<B>,
    pub(crate) lstm: LSTMCell<B>,
    pub(crate) bottleneck: Linear<B>,
    pub(crate) pc_logits: Linear<B>,
    pub(crate) hd_logits: Linear<B>,
    dropout: Dropout,
}

impl<B: Backend> GridModel<B> {
    /// Width of the concatenated initial conditions
    pub fn init_size(&self) -> usize {
        self.state_embed.weight.dims()[0]
    }

    /// Size of the LSTM state
    pub fn nh_lstm(&self) -> usize {
        self.lstm.hidden_size()
    }

    /// Size of the bottleneck layer
    pub fn nh_bottleneck(&self) -> usize {
        self.bottleneck.weight.dims()[1]
    }

    /// Number of place-cell logits
    pub fn n_pc(&self) -> usize {
        self.pc_logits.weight.dims()[1]
    }

    /// Number of head-direction-cell logits
    pub fn n_hd(&self) -> usize {
        self.hd_logits.weight.dims()[1]
    }

    pub fn bottleneck_has_bias(&self) -> bool {
        self.bottleneck.bias.is_some()
    }

    pub fn state_embed(&self) -> &Linear<B> {
        &self.state_embed
    }

    pub fn cell_embed(&self) -> &Linear<B> {
        &self.cell_embed
    }

    pub fn lstm(&self) -> &LSTMCell<B> {
        &self.lstm
    }

    pub fn bottleneck(&self) -> &Linear<B> {
        &self.bottleneck
    }

    pub fn pc_logits(&self) -> &Linear<B> {
        &self.pc_logits
    }

    pub fn hd_logits(&self) -> &Linear<B> {
        &self.hd_logits
    }

    /// Sum of the L2 norms of the bottleneck and readout weights
    pub fn l2_loss(&self) -> Tensor<B, 1> {
        l2_norm(self.bottleneck.weight.val())
            + l2_norm(self.pc_logits.weight.val())
            + l2_norm(self.hd_logits.weight.val())
    }

    /// Initial `(hidden, cell)` state embedded from the initial conditions
    ///
    /// # Arguments
    /// * `initial_conds` - `([batch, n_pcs], [batch, n_hdcs])`
    pub fn initial_state(
        &self,
        initial_conds: (Tensor<B, 2>, Tensor<B, 2>),
    ) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let (pc_init, hd_init) = initial_conds;
        let init = Tensor::cat(vec![pc_init, hd_init], 1);
        let hidden = self.state_embed.forward(init.clone());
        let cell = self.cell_embed.forward(init);
        (hidden, cell)
    }

    /// Forward pass over a time-major input tensor
    ///
    /// # Arguments
    /// * `inputs` - `[seq_len, batch, 3]`
    /// * `initial_conds` - `([batch, n_pcs], [batch, n_hdcs])`
    pub fn forward(
        &self,
        inputs: Tensor<B, 3>,
        initial_conds: (Tensor<B, 2>, Tensor<B, 2>),
    ) -> GridOutput<B> {
        let seq_len = inputs.dims()[0];
        let steps = (0..seq_len)
            .map(|t| inputs.clone().narrow(0, t, 1).squeeze::<2>(0))
            .collect();
        self.forward_steps(steps, initial_conds)
    }

    /// Forward pass over a time-ordered list of `[batch, 3]` step inputs
    pub fn forward_steps(
        &self,
        steps: Vec<Tensor<B, 2>>,
        initial_conds: (Tensor<B, 2>, Tensor<B, 2>),
    ) -> GridOutput<B> {
        let batch_size = initial_conds.0.dims()[0];
        let device = initial_conds.0.device();
        let seq_len = steps.len();

        let (mut h, mut c) = self.initial_state(initial_conds);

        let mut logits_hd = Vec::with_capacity(seq_len);
        let mut logits_pc = Vec::with_capacity(seq_len);
        let mut bottleneck_acts = Vec::with_capacity(seq_len);
        let mut rnn_states = Vec::with_capacity(seq_len);
        let mut cell_states = Vec::with_capacity(seq_len);

        for step in steps {
            (h, c) = self.lstm.forward(step, (h, c));

            let acts = self.dropout.forward(self.bottleneck.forward(h.clone()));

            logits_pc.push(self.pc_logits.forward(acts.clone()));
            logits_hd.push(self.hd_logits.forward(acts.clone()));
            bottleneck_acts.push(acts);
            rnn_states.push(h.clone());
            cell_states.push(c.clone());
        }

        let stack = |steps: Vec<Tensor<B, 2>>, width: usize| -> Tensor<B, 3> {
            if steps.is_empty() {
                Tensor::zeros([0, batch_size, width], &device)
            } else {
                Tensor::stack(steps, 0)
            }
        };

        GridOutput {
            logits_hd: stack(logits_hd, self.n_hd()),
            logits_pc: stack(logits_pc, self.n_pc()),
            bottleneck_acts: stack(bottleneck_acts, self.nh_bottleneck()),
            rnn_states: stack(rnn_states, self.nh_lstm()),
            cell_states: stack(cell_states, self.nh_lstm()),
        }
    }
}

/// Euclidean (Frobenius) norm of a weight matrix
fn l2_norm<B: Backend>(weight: Tensor<B, 2>) -> Tensor<B, 1> {
    weight.powf_scalar(2.0).sum().sqrt()
}
