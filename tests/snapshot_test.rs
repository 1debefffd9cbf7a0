//! Tests for loading and saving pretrained weight snapshots

use burn::backend::NdArray;
use burn::tensor::{Distribution, Tensor};
use gridcells::npy::{read_npy_file, write_npy_file};
use gridcells::prelude::*;
use ndarray::{ArrayD, IxDyn};
use tempfile::TempDir;

type Backend = NdArray<f32>;

fn config() -> GridModelConfig {
    GridModelConfig::new()
        .with_nh_lstm(8)
        .with_nh_bottleneck(6)
        .with_n_pcs(4)
        .with_n_hdcs(2)
}

fn ensembles() -> [CellEnsemble; 2] {
    [
        CellEnsemble::place_cells(4),
        CellEnsemble::head_direction_cells(2),
    ]
}

fn new_model(seed: u64) -> GridModel<Backend> {
    config()
        .with_seed(Some(seed))
        .init::<Backend, _>(&ensembles(), &Default::default())
        .unwrap()
}

fn loc(dir: &TempDir) -> String {
    format!("{}/", dir.path().display())
}

fn max_diff<const D: usize>(a: Tensor<Backend, D>, b: Tensor<Backend, D>) -> f32 {
    (a - b).abs().max().into_scalar()
}

/// Compare every parameter of two models through their snapshots
fn assert_same_params(a: &GridModel<Backend>, b: &GridModel<Backend>) {
    let snap_a = WeightSnapshot::from_model(a).unwrap();
    let snap_b = WeightSnapshot::from_model(b).unwrap();
    assert_eq!(snap_a.len(), snap_b.len());
    for slot in ParamSlot::ALL {
        assert_eq!(snap_a.get(slot), snap_b.get(slot), "{slot:?} differs");
    }
}

fn sample_run(model: &GridModel<Backend>) -> Tensor<Backend, 3> {
    let device = Default::default();
    let inputs = Tensor::<Backend, 3>::full([3, 2, 3], 0.25, &device);
    let init_pc = Tensor::<Backend, 2>::full([2, 4], 0.5, &device);
    let init_hd = Tensor::<Backend, 2>::full([2, 2], -0.5, &device);
    model.forward(inputs, (init_pc, init_hd)).logits_pc
}

#[test]
fn test_save_writes_every_slot() {
    let dir = TempDir::new().unwrap();
    let model = new_model(1);
    model.save_weights(&loc(&dir), SnapshotLayout::InputMajor).unwrap();

    for slot in ParamSlot::for_model(false) {
        assert!(slot.path(&loc(&dir)).exists(), "{} missing", slot.file_stem());
    }
    assert!(!ParamSlot::BottleneckBias.path(&loc(&dir)).exists());

    let gates = read_npy_file(&ParamSlot::LstmGateWeights.path(&loc(&dir))).unwrap();
    assert_eq!(gates.shape(), &[3 + 8, 4 * 8]);
}

#[test]
fn test_save_then_load_reproduces_model() {
    let dir = TempDir::new().unwrap();
    let source = new_model(1);
    source.save_weights(&loc(&dir), SnapshotLayout::InputMajor).unwrap();

    let mut target = new_model(2);
    assert!(max_diff(sample_run(&source), sample_run(&target)) > 0.0);

    target.load_weights(&loc(&dir), SnapshotLayout::InputMajor).unwrap();
    assert_same_params(&source, &target);
    assert!(max_diff(sample_run(&source), sample_run(&target)) < 1e-6);
}

#[test]
fn test_load_is_idempotent() {
    let dir = TempDir::new().unwrap();
    new_model(1)
        .save_weights(&loc(&dir), SnapshotLayout::InputMajor)
        .unwrap();

    let mut first = new_model(2);
    first.load_weights(&loc(&dir), SnapshotLayout::InputMajor).unwrap();
    let mut second = new_model(3);
    second.load_weights(&loc(&dir), SnapshotLayout::InputMajor).unwrap();
    second.load_weights(&loc(&dir), SnapshotLayout::InputMajor).unwrap();

    assert_same_params(&first, &second);
}

#[test]
fn test_config_weights_loc_loads_on_init() {
    let dir = TempDir::new().unwrap();
    let source = new_model(1);
    source.save_weights(&loc(&dir), SnapshotLayout::InputMajor).unwrap();

    let loaded = config()
        .with_seed(Some(99))
        .with_weights_loc(Some(loc(&dir)))
        .init::<Backend, _>(&ensembles(), &Default::default())
        .unwrap();

    assert_same_params(&source, &loaded);
}

#[test]
fn test_file_name_prefix() {
    let dir = TempDir::new().unwrap();
    let prefix = format!("{}/nested/run1_", dir.path().display());
    let source = new_model(1);
    source.save_weights(&prefix, SnapshotLayout::InputMajor).unwrap();

    assert!(dir
        .path()
        .join("nested/run1_grid_cells_core_pc_logits_w_0.npy")
        .exists());

    let mut target = new_model(2);
    target.load_weights(&prefix, SnapshotLayout::InputMajor).unwrap();
    assert_same_params(&source, &target);
}

#[test]
fn test_output_major_files_are_transposed() {
    let dir = TempDir::new().unwrap();
    let source = new_model(1);
    source.save_weights(&loc(&dir), SnapshotLayout::OutputMajor).unwrap();

    let stored = read_npy_file(&ParamSlot::PcLogitsWeight.path(&loc(&dir))).unwrap();
    assert_eq!(stored.shape(), &[4, 6]);
    let bias = read_npy_file(&ParamSlot::PcLogitsBias.path(&loc(&dir))).unwrap();
    assert_eq!(bias.shape(), &[4]);

    let mut target = new_model(2);
    target.load_weights(&loc(&dir), SnapshotLayout::OutputMajor).unwrap();
    assert_same_params(&source, &target);

    // reading output-major files as input-major is a shape error
    let mut wrong = new_model(3);
    let err = wrong
        .load_weights(&loc(&dir), SnapshotLayout::InputMajor)
        .unwrap_err();
    assert!(matches!(err, GridError::ShapeMismatch { .. }));
}

#[test]
fn test_bottleneck_bias_round_trip() {
    let dir = TempDir::new().unwrap();
    let device = Default::default();
    let with_bias = config().with_bottleneck_has_bias(true);

    let source = with_bias
        .clone()
        .with_seed(Some(1))
        .init::<Backend, _>(&ensembles(), &device)
        .unwrap();
    source.save_weights(&loc(&dir), SnapshotLayout::InputMajor).unwrap();
    assert!(ParamSlot::BottleneckBias.path(&loc(&dir)).exists());

    let mut target = with_bias
        .with_seed(Some(2))
        .init::<Backend, _>(&ensembles(), &device)
        .unwrap();
    target.load_weights(&loc(&dir), SnapshotLayout::InputMajor).unwrap();
    assert_same_params(&source, &target);
}

#[test]
fn test_reference_style_arrays_load() {
    // hand-written arrays: zero weights, known biases
    let dir = TempDir::new().unwrap();
    let mut model = new_model(1);
    model.save_weights(&loc(&dir), SnapshotLayout::InputMajor).unwrap();

    let pc_bias = ArrayD::from_shape_vec(IxDyn(&[4]), vec![1.0f32, 2.0, 3.0, 4.0]).unwrap();
    write_npy_file(&ParamSlot::PcLogitsBias.path(&loc(&dir)), &pc_bias).unwrap();
    let zeros = ArrayD::<f32>::zeros(IxDyn(&[6, 4]));
    write_npy_file(&ParamSlot::PcLogitsWeight.path(&loc(&dir)), &zeros).unwrap();

    model.load_weights(&loc(&dir), SnapshotLayout::InputMajor).unwrap();

    // zero readout weights: place-cell logits equal the bias at every step
    let logits = sample_run(&model);
    let expected = Tensor::<Backend, 1>::from_floats([1.0, 2.0, 3.0, 4.0], &Default::default())
        .reshape([1, 1, 4])
        .expand([3, 2, 4]);
    assert!(max_diff(logits, expected) < 1e-6);
}

#[test]
fn test_lstm_gate_bias_moves_to_input_map() {
    let dir = TempDir::new().unwrap();
    let mut model = new_model(1);
    model.save_weights(&loc(&dir), SnapshotLayout::InputMajor).unwrap();

    let b_gates = ArrayD::from_shape_vec(IxDyn(&[32]), (0..32).map(|i| i as f32).collect()).unwrap();
    write_npy_file(&ParamSlot::LstmGateBiases.path(&loc(&dir)), &b_gates).unwrap();
    model.load_weights(&loc(&dir), SnapshotLayout::InputMajor).unwrap();

    let device = Default::default();
    let expected = Tensor::<Backend, 1>::from_floats(b_gates.as_slice().unwrap(), &device);
    let input_bias = model.lstm().input_map().bias.as_ref().unwrap().val();
    let recurrent_bias = model.lstm().recurrent_map().bias.as_ref().unwrap().val();
    assert_eq!(max_diff(input_bias, expected), 0.0);
    assert_eq!(recurrent_bias.abs().sum().into_scalar(), 0.0);
}

#[test]
fn test_missing_file_fails_without_partial_load() {
    let dir = TempDir::new().unwrap();
    new_model(1)
        .save_weights(&loc(&dir), SnapshotLayout::InputMajor)
        .unwrap();
    std::fs::remove_file(ParamSlot::LstmGateBiases.path(&loc(&dir))).unwrap();

    let mut model = new_model(2);
    let before = new_model(2);
    let err = model
        .load_weights(&loc(&dir), SnapshotLayout::InputMajor)
        .unwrap_err();

    assert!(err.is_not_found(), "unexpected error: {err}");
    assert!(err.to_string().contains("grid_cells_core_lstm_b_gates_0.npy"));
    assert_same_params(&before, &model);
}

#[test]
fn test_wrong_shape_fails_without_partial_load() {
    let dir = TempDir::new().unwrap();
    new_model(1)
        .save_weights(&loc(&dir), SnapshotLayout::InputMajor)
        .unwrap();
    let bad = ArrayD::<f32>::zeros(IxDyn(&[8, 7]));
    write_npy_file(&ParamSlot::BottleneckWeight.path(&loc(&dir)), &bad).unwrap();

    let mut model = new_model(2);
    let before = new_model(2);
    let err = model
        .load_weights(&loc(&dir), SnapshotLayout::InputMajor)
        .unwrap_err();

    match err {
        GridError::ShapeMismatch {
            name,
            expected,
            got,
        } => {
            assert_eq!(name, "grid_cells_core_bottleneck_w_0");
            assert_eq!(expected, vec![8, 6]);
            assert_eq!(got, vec![8, 7]);
        }
        other => panic!("expected shape mismatch, got {other}"),
    }
    assert_same_params(&before, &model);
}

#[test]
fn test_corrupt_file_reports_path() {
    let dir = TempDir::new().unwrap();
    new_model(1)
        .save_weights(&loc(&dir), SnapshotLayout::InputMajor)
        .unwrap();
    let path = ParamSlot::HdLogitsWeight.path(&loc(&dir));
    std::fs::write(&path, b"not an array").unwrap();

    let mut model = new_model(2);
    let err = model
        .load_weights(&loc(&dir), SnapshotLayout::InputMajor)
        .unwrap_err();
    assert!(matches!(&err, GridError::Npy { path: p, .. } if *p == path));
}

#[test]
fn test_oversized_header_fails_without_partial_load() {
    let dir = TempDir::new().unwrap();
    new_model(1)
        .save_weights(&loc(&dir), SnapshotLayout::InputMajor)
        .unwrap();
    let path = ParamSlot::LstmGateBiases.path(&loc(&dir));
    let dict = "{'descr': '<f4', 'fortran_order': False, 'shape': (1099511627776,), }\n";
    let mut bytes = b"\x93NUMPY\x01\x00".to_vec();
    bytes.extend_from_slice(&(dict.len() as u16).to_le_bytes());
    bytes.extend_from_slice(dict.as_bytes());
    bytes.extend_from_slice(&[0; 32]);
    std::fs::write(&path, bytes).unwrap();

    let mut model = new_model(2);
    let before = new_model(2);
    let err = model
        .load_weights(&loc(&dir), SnapshotLayout::InputMajor)
        .unwrap_err();
    assert!(matches!(&err, GridError::Npy { path: p, .. } if *p == path), "{err}");
    assert_same_params(&before, &model);
}

#[test]
fn test_init_with_missing_snapshot_fails() {
    let dir = TempDir::new().unwrap();
    let result = config()
        .with_weights_loc(Some(loc(&dir)))
        .init::<Backend, _>(&ensembles(), &Default::default());

    assert!(matches!(result, Err(ref e) if e.is_not_found()));
}

#[test]
fn test_random_inputs_after_load() {
    let dir = TempDir::new().unwrap();
    let source = new_model(7);
    source.save_weights(&loc(&dir), SnapshotLayout::OutputMajor).unwrap();
    let mut target = new_model(8);
    target.load_weights(&loc(&dir), SnapshotLayout::OutputMajor).unwrap();

    let device = Default::default();
    let inputs = Tensor::<Backend, 3>::random([7, 3, 3], Distribution::Normal(0.0, 1.0), &device);
    let init_pc = Tensor::<Backend, 2>::random([3, 4], Distribution::Uniform(0.0, 1.0), &device);
    let init_hd = Tensor::<Backend, 2>::random([3, 2], Distribution::Uniform(0.0, 1.0), &device);

    let a = source.forward(inputs.clone(), (init_pc.clone(), init_hd.clone()));
    let b = target.forward(inputs, (init_pc, init_hd));
    assert!(max_diff(a.logits_hd, b.logits_hd) < 1e-5);
    assert!(max_diff(a.cell_states, b.cell_states) < 1e-5);
}
