//! Target ensembles: the cell populations the model predicts.

use serde::{Deserialize, Serialize};

/// A population of output cells read out from the bottleneck
pub trait TargetEnsemble {
    /// Number of cells (logits) in this ensemble
    fn n_cells(&self) -> usize;

    /// Human readable name used in logs and errors
    fn name(&self) -> &str {
        "ensemble"
    }
}

/// Plain ensemble description: a name and a cell count
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellEnsemble {
    name: String,
    n_cells: usize,
}

impl CellEnsemble {
    pub fn new(name: impl Into<String>, n_cells: usize) -> Self {
        Self {
            name: name.into(),
            n_cells,
        }
    }

    /// Place-cell ensemble with `n_cells` cells
    pub fn place_cells(n_cells: usize) -> Self {
        Self::new("place_cells", n_cells)
    }

    /// Head-direction-cell ensemble with `n_cells` cells
    pub fn head_direction_cells(n_cells: usize) -> Self {
        Self::new("head_direction_cells", n_cells)
    }
}

impl TargetEnsemble for CellEnsemble {
    fn n_cells(&self) -> usize {
        self.n_cells
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<T: TargetEnsemble + ?Sized> TargetEnsemble for &T {
    fn n_cells(&self) -> usize {
        (**self).n_cells()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<T: TargetEnsemble + ?Sized> TargetEnsemble for Box<T> {
    fn n_cells(&self) -> usize {
        (**self).n_cells()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
