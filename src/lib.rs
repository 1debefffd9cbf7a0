//! # gridcells - LSTM grid cell model
//!
//! A recurrent network for path integration built on the Burn framework.
//! An LSTM integrates a sequence of 3-dimensional movement inputs and two
//! linear readouts predict place-cell and head-direction-cell activations
//! through a dropout-regularized bottleneck, the architecture in which
//! grid-like representations emerge in the bottleneck units.
//!
//! ## Features
//!
//! - **GridModel**: initial-state embedding, LSTM recurrence, bottleneck and
//!   readouts, with time-major outputs for every step
//! - **Initialization**: truncated-normal readout weights, Kaiming-uniform
//!   LSTM weights, zero biases, optional seeding
//! - **Snapshots**: load and save parameters as `.npy` files in the naming
//!   scheme of the reference trained model
//! - **L2 regularization**: norm penalty over bottleneck and readout weights
//!
//! ## Quick Start
//!
//! ```rust
//! use burn::backend::NdArray;
//! use burn::tensor::Tensor;
//! use gridcells::prelude::*;
//!
//! type Backend = NdArray<f32>;
//! let device = Default::default();
//!
//! let ensembles = [CellEnsemble::place_cells(16), CellEnsemble::head_direction_cells(4)];
//! let model = GridModelConfig::new()
//!     .with_nh_lstm(32)
//!     .with_nh_bottleneck(64)
//!     .with_n_pcs(16)
//!     .with_n_hdcs(4)
//!     .init::<Backend, _>(&ensembles, &device)
//!     .unwrap();
//!
//! // [seq_len, batch, 3]
//! let inputs = Tensor::<Backend, 3>::zeros([10, 2, 3], &device);
//! let init_pc = Tensor::<Backend, 2>::zeros([2, 16], &device);
//! let init_hd = Tensor::<Backend, 2>::zeros([2, 4], &device);
//!
//! let output = model.forward(inputs, (init_pc, init_hd));
//! assert_eq!(output.logits_pc.dims(), [10, 2, 16]);
//! assert_eq!(output.rnn_states.dims(), [10, 2, 32]);
//! ```
//!
//! ## Loading a Trained Model
//!
//! ```ignore
//! let model = GridModelConfig::new()
//!     .with_weights_loc(Some("weights/".to_string()))
//!     .init::<Backend, _>(&ensembles, &device)?;
//! ```

pub mod cells;
pub mod ensembles;
pub mod error;
pub mod init;
pub mod model;
pub mod npy;
pub mod snapshot;

pub use error::{GridError, GridResult};

pub mod prelude {
    pub use crate::cells::LSTMCell;
    pub use crate::ensembles::{CellEnsemble, TargetEnsemble};
    pub use crate::error::{GridError, GridResult};
    pub use crate::init::TruncationStrategy;
    pub use crate::model::{GridModel, GridModelConfig, GridOutput};
    pub use crate::snapshot::{ParamSlot, SnapshotLayout, WeightSnapshot};
}
