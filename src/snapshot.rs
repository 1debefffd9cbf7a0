//! Pretrained weight snapshots
//!
//! A snapshot is a set of `.npy` files sharing a location prefix, one per
//! parameter, named after the variables of the reference grid-cell model
//! (`{loc}grid_cells_core_pc_logits_w_0.npy`, ...). [`ParamSlot`] is the
//! mapping from model parameter to file; [`SnapshotLayout`] says whether
//! stored matrices are `[d_input, d_output]` (Burn's own layout, and the
//! reference files') or `[d_output, d_input]` and must be transposed.
//!
//! Loading reads and shape-checks every file before touching the model, so a
//! failed load leaves the parameters unchanged.

use std::path::PathBuf;

use burn::module::Param;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::{GridError, GridResult};
use crate::model::{GridModel, INPUT_SIZE};
use crate::npy::{read_npy_file, write_npy_file};

/// Orientation of 2-D arrays on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotLayout {
    /// `[d_input, d_output]`, no transpose needed
    InputMajor,
    /// `[d_output, d_input]`, transposed on load and save
    OutputMajor,
}

impl SnapshotLayout {
    /// Whether matrices must be transposed between disk and model
    pub fn transposes(self) -> bool {
        matches!(self, SnapshotLayout::OutputMajor)
    }

    fn orient(self, array: ArrayD<f32>) -> ArrayD<f32> {
        if self.transposes() && array.ndim() == 2 {
            array.reversed_axes()
        } else {
            array
        }
    }
}

/// A model parameter stored in a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamSlot {
    PcLogitsWeight,
    PcLogitsBias,
    HdLogitsWeight,
    HdLogitsBias,
    BottleneckWeight,
    BottleneckBias,
    StateInitWeight,
    StateInitBias,
    CellInitWeight,
    CellInitBias,
    LstmGateWeights,
    LstmGateBiases,
}

impl ParamSlot {
    pub const ALL: [ParamSlot; 12] = [
        ParamSlot::PcLogitsWeight,
        ParamSlot::PcLogitsBias,
        ParamSlot::HdLogitsWeight,
        ParamSlot::HdLogitsBias,
        ParamSlot::BottleneckWeight,
        ParamSlot::BottleneckBias,
        ParamSlot::StateInitWeight,
        ParamSlot::StateInitBias,
        ParamSlot::CellInitWeight,
        ParamSlot::CellInitBias,
        ParamSlot::LstmGateWeights,
        ParamSlot::LstmGateBiases,
    ];

    /// File name without the `.npy` extension
    pub fn file_stem(self) -> &'static str {
        match self {
            ParamSlot::PcLogitsWeight => "grid_cells_core_pc_logits_w_0",
            ParamSlot::PcLogitsBias => "grid_cells_core_pc_logits_b_0",
            ParamSlot::HdLogitsWeight => "grid_cells_core_pc_logits_1_w_0",
            ParamSlot::HdLogitsBias => "grid_cells_core_pc_logits_1_b_0",
            ParamSlot::BottleneckWeight => "grid_cells_core_bottleneck_w_0",
            ParamSlot::BottleneckBias => "grid_cells_core_bottleneck_b_0",
            ParamSlot::StateInitWeight => "grid_cell_supervised_state_init_w_0",
            ParamSlot::StateInitBias => "grid_cell_supervised_state_init_b_0",
            ParamSlot::CellInitWeight => "grid_cell_supervised_cell_init_w_0",
            ParamSlot::CellInitBias => "grid_cell_supervised_cell_init_b_0",
            ParamSlot::LstmGateWeights => "grid_cells_core_lstm_w_gates_0",
            ParamSlot::LstmGateBiases => "grid_cells_core_lstm_b_gates_0",
        }
    }

    /// Path of this slot's file under a location prefix
    ///
    /// The prefix is joined textually, so `"weights/"` selects a directory
    /// and `"weights/run1_"` a file-name prefix.
    pub fn path(self, loc: &str) -> PathBuf {
        PathBuf::from(format!("{loc}{}.npy", self.file_stem()))
    }

    /// Slots present in a model, in load order
    pub fn for_model(bottleneck_has_bias: bool) -> impl Iterator<Item = ParamSlot> {
        Self::ALL
            .into_iter()
            .filter(move |slot| bottleneck_has_bias || *slot != ParamSlot::BottleneckBias)
    }

    /// Expected shape in model (input-major) layout
    fn shape(self, dims: &ModelDims) -> Vec<usize> {
        match self {
            ParamSlot::PcLogitsWeight => vec![dims.nh_bottleneck, dims.n_pc],
            ParamSlot::PcLogitsBias => vec![dims.n_pc],
            ParamSlot::HdLogitsWeight => vec![dims.nh_bottleneck, dims.n_hd],
            ParamSlot::HdLogitsBias => vec![dims.n_hd],
            ParamSlot::BottleneckWeight => vec![dims.nh_lstm, dims.nh_bottleneck],
            ParamSlot::BottleneckBias => vec![dims.nh_bottleneck],
            ParamSlot::StateInitWeight | ParamSlot::CellInitWeight => {
                vec![dims.init_size, dims.nh_lstm]
            }
            ParamSlot::StateInitBias | ParamSlot::CellInitBias => vec![dims.nh_lstm],
            ParamSlot::LstmGateWeights => vec![INPUT_SIZE + dims.nh_lstm, 4 * dims.nh_lstm],
            ParamSlot::LstmGateBiases => vec![4 * dims.nh_lstm],
        }
    }
}

struct ModelDims {
    init_size: usize,
    nh_lstm: usize,
    nh_bottleneck: usize,
    n_pc: usize,
    n_hd: usize,
}

impl ModelDims {
    fn of<B: Backend>(model: &GridModel<B>) -> Self {
        Self {
            init_size: model.init_size(),
            nh_lstm: model.nh_lstm(),
            nh_bottleneck: model.nh_bottleneck(),
            n_pc: model.n_pc(),
            n_hd: model.n_hd(),
        }
    }
}

/// Validated parameter arrays in model layout
#[derive(Debug, Clone)]
pub struct WeightSnapshot {
    arrays: Vec<(ParamSlot, ArrayD<f32>)>,
}

impl WeightSnapshot {
    /// Read and shape-check every slot `model` needs from `loc`
    pub fn read<B: Backend>(
        loc: &str,
        layout: SnapshotLayout,
        model: &GridModel<B>,
    ) -> GridResult<Self> {
        let dims = ModelDims::of(model);
        let mut arrays = Vec::with_capacity(ParamSlot::ALL.len());

        for slot in ParamSlot::for_model(model.bottleneck_has_bias()) {
            let path = slot.path(loc);
            let array = layout.orient(read_npy_file(&path)?);
            let expected = slot.shape(&dims);
            if array.shape() != expected.as_slice() {
                return Err(GridError::shape_mismatch(
                    slot.file_stem(),
                    &expected,
                    array.shape(),
                ));
            }
            tracing::debug!(path = %path.display(), shape = ?array.shape(), "read weight array");
            arrays.push((slot, array));
        }

        Ok(Self { arrays })
    }

    /// Capture the current parameters of `model`
    pub fn from_model<B: Backend>(model: &GridModel<B>) -> GridResult<Self> {
        let (w_gates, b_gates) = model.lstm.gates();
        let mut arrays = Vec::with_capacity(ParamSlot::ALL.len());

        for slot in ParamSlot::for_model(model.bottleneck_has_bias()) {
            let array = match slot {
                ParamSlot::PcLogitsWeight => tensor_to_array(model.pc_logits.weight.val()),
                ParamSlot::PcLogitsBias => bias_to_array(&model.pc_logits, model.n_pc()),
                ParamSlot::HdLogitsWeight => tensor_to_array(model.hd_logits.weight.val()),
                ParamSlot::HdLogitsBias => bias_to_array(&model.hd_logits, model.n_hd()),
                ParamSlot::BottleneckWeight => tensor_to_array(model.bottleneck.weight.val()),
                ParamSlot::BottleneckBias => {
                    bias_to_array(&model.bottleneck, model.nh_bottleneck())
                }
                ParamSlot::StateInitWeight => tensor_to_array(model.state_embed.weight.val()),
                ParamSlot::StateInitBias => bias_to_array(&model.state_embed, model.nh_lstm()),
                ParamSlot::CellInitWeight => tensor_to_array(model.cell_embed.weight.val()),
                ParamSlot::CellInitBias => bias_to_array(&model.cell_embed, model.nh_lstm()),
                ParamSlot::LstmGateWeights => tensor_to_array(w_gates.clone()),
                ParamSlot::LstmGateBiases => tensor_to_array(b_gates.clone()),
            }?;
            arrays.push((slot, array));
        }

        Ok(Self { arrays })
    }

    /// Array stored for `slot`, in model layout
    pub fn get(&self, slot: ParamSlot) -> Option<&ArrayD<f32>> {
        self.arrays
            .iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, array)| array)
    }

    /// Number of arrays in the snapshot
    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    /// Write every array under `loc`, creating the parent directory
    pub fn write(&self, loc: &str, layout: SnapshotLayout) -> GridResult<()> {
        if let Some(parent) = ParamSlot::PcLogitsWeight.path(loc).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| GridError::io(parent, e))?;
            }
        }

        for (slot, array) in &self.arrays {
            let path = slot.path(loc);
            let stored = layout.orient(array.clone());
            write_npy_file(&path, &stored)?;
            tracing::debug!(path = %path.display(), shape = ?stored.shape(), "wrote weight array");
        }
        Ok(())
    }

    /// Assign every array to `model`
    fn apply<B: Backend>(self, model: &mut GridModel<B>) {
        let device = model.pc_logits.weight.device();
        let mut w_gates = None;
        let mut b_gates = None;

        for (slot, array) in self.arrays {
            match slot {
                ParamSlot::PcLogitsWeight => {
                    model.pc_logits.weight = Param::from_tensor(matrix(&array, &device))
                }
                ParamSlot::PcLogitsBias => {
                    model.pc_logits.bias = Some(Param::from_tensor(vector(&array, &device)))
                }
                ParamSlot::HdLogitsWeight => {
                    model.hd_logits.weight = Param::from_tensor(matrix(&array, &device))
                }
                ParamSlot::HdLogitsBias => {
                    model.hd_logits.bias = Some(Param::from_tensor(vector(&array, &device)))
                }
                ParamSlot::BottleneckWeight => {
                    model.bottleneck.weight = Param::from_tensor(matrix(&array, &device))
                }
                ParamSlot::BottleneckBias => {
                    model.bottleneck.bias = Some(Param::from_tensor(vector(&array, &device)))
                }
                ParamSlot::StateInitWeight => {
                    model.state_embed.weight = Param::from_tensor(matrix(&array, &device))
                }
                ParamSlot::StateInitBias => {
                    model.state_embed.bias = Some(Param::from_tensor(vector(&array, &device)))
                }
                ParamSlot::CellInitWeight => {
                    model.cell_embed.weight = Param::from_tensor(matrix(&array, &device))
                }
                ParamSlot::CellInitBias => {
                    model.cell_embed.bias = Some(Param::from_tensor(vector(&array, &device)))
                }
                ParamSlot::LstmGateWeights => w_gates = Some(matrix(&array, &device)),
                ParamSlot::LstmGateBiases => b_gates = Some(vector(&array, &device)),
            }
        }

        if let (Some(w_gates), Some(b_gates)) = (w_gates, b_gates) {
            model.lstm.set_gates(w_gates, b_gates);
        }
    }
}

impl<B: Backend> GridModel<B> {
    /// Replace all parameters with the snapshot stored under `loc`
    ///
    /// Fails without modifying the model if any file is missing, unreadable
    /// or of the wrong shape.
    pub fn load_weights(&mut self, loc: &str, layout: SnapshotLayout) -> GridResult<()> {
        let snapshot = WeightSnapshot::read(loc, layout, self)?;
        let count = snapshot.len();
        snapshot.apply(self);
        tracing::info!(loc, ?layout, arrays = count, "loaded pretrained weights");
        Ok(())
    }

    /// Write all parameters under `loc` in the snapshot naming scheme
    pub fn save_weights(&self, loc: &str, layout: SnapshotLayout) -> GridResult<()> {
        let snapshot = WeightSnapshot::from_model(self)?;
        snapshot.write(loc, layout)?;
        tracing::info!(loc, ?layout, arrays = snapshot.len(), "saved weights");
        Ok(())
    }
}

fn matrix<B: Backend>(array: &ArrayD<f32>, device: &B::Device) -> Tensor<B, 2> {
    let shape = [array.shape()[0], array.shape()[1]];
    let data: Vec<f32> = array.iter().copied().collect();
    Tensor::<B, 1>::from_floats(data.as_slice(), device).reshape(shape)
}

fn vector<B: Backend>(array: &ArrayD<f32>, device: &B::Device) -> Tensor<B, 1> {
    let data: Vec<f32> = array.iter().copied().collect();
    Tensor::<B, 1>::from_floats(data.as_slice(), device)
}

fn tensor_to_array<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> GridResult<ArrayD<f32>> {
    let dims = tensor.dims().to_vec();
    let data: Vec<f32> = tensor.into_data().iter::<f32>().collect();
    let len = data.len();
    ArrayD::from_shape_vec(IxDyn(&dims), data)
        .map_err(|_| GridError::shape_mismatch("tensor data", &dims, &[len]))
}

fn bias_to_array<B: Backend>(linear: &burn::nn::Linear<B>, width: usize) -> GridResult<ArrayD<f32>> {
    match &linear.bias {
        Some(bias) => tensor_to_array(bias.val()),
        None => Ok(ArrayD::zeros(IxDyn(&[width]))),
    }
}
