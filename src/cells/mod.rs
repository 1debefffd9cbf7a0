//! # Recurrent Cells
//!
//! Single-timestep cells driven by [`GridModel`](crate::model::GridModel),
//! which owns sequence processing and state handoff between steps.
//!
//! ## Tensor Shapes
//!
//! | Tensor | Shape | Description |
//! |--------|-------|-------------|
//! | `input` | `[batch, input_size]` | Step input (velocity components) |
//! | `hidden_state` | `[batch, hidden_size]` | Previous hidden state |
//! | `cell_state` | `[batch, hidden_size]` | Previous cell state |
//!
//! The cell returns the updated `(hidden_state, cell_state)` pair with the
//! same shapes.

pub mod lstm_cell;

pub use lstm_cell::{LSTMCell, DEFAULT_FORGET_BIAS};
