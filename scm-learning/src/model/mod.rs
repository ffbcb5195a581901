//! The structural model seam.
//!
//! The orchestrator only talks to a model through [`StructuralModel`]. Forward
//! methods take `&mut self` because a model may record its inputs for the
//! following [`StructuralModel::backward`] call; graph extraction goes through
//! the same differentiable path, so it is `&mut` as well.

pub mod linear;

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::ScmResult;
use crate::graph::binarize_stack;
use crate::optim::ParamGroup;

pub use linear::LinearScm;

/// How per-sample graphs are reduced to one continuous graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphMode {
    #[default]
    Mean,
    Max,
}

/// A do-intervention on a single node.
#[derive(Debug, Clone, PartialEq)]
pub struct Intervention {
    pub index: usize,
    /// One value per sample, or a single value applied to every sample.
    pub values: Array1<f64>,
}

impl Intervention {
    pub fn new(index: usize, values: Array1<f64>) -> Self {
        Self { index, values }
    }

    /// Value applied to sample `row`.
    pub fn value_for(&self, row: usize) -> f64 {
        if self.values.len() == 1 {
            self.values[0]
        } else {
            self.values[row]
        }
    }
}

/// A learnable structural causal model mapping samples to exogenous noise and
/// back.
pub trait StructuralModel: Send {
    fn total_nodes(&self) -> usize;

    /// Fix an auxiliary `nodes × nodes` mask, e.g. the true graph.
    fn set_special_mask(&mut self, mask: Array2<f64>);

    fn special_mask(&self) -> Option<&Array2<f64>>;

    /// Continuous causal graph aggregated over the batch.
    fn aggregated_causal_graph(
        &mut self,
        samples: ArrayView2<'_, f64>,
        mode: GraphMode,
    ) -> ScmResult<Array2<f64>>;

    /// Binary graphs for every threshold, stacked on the last axis
    /// (`nodes × nodes × thresholds`).
    fn threshold_causal_graph(
        &mut self,
        samples: ArrayView2<'_, f64>,
        thresholds: &Array1<f64>,
    ) -> ScmResult<Array3<f64>> {
        let graph = self.aggregated_causal_graph(samples, GraphMode::Mean)?;
        Ok(binarize_stack(graph.view(), thresholds))
    }

    /// Abduction: infer the noise that generated `samples`.
    fn sample_to_noise(&mut self, samples: ArrayView2<'_, f64>) -> ScmResult<Array2<f64>>;

    /// Generation: push noise through the structural equations.
    fn noise_to_sample(&mut self, noise: ArrayView2<'_, f64>) -> ScmResult<Array2<f64>>;

    /// Counterfactual outcome of `factual` under `intervention`, in raw space.
    ///
    /// `mean`/`std` map raw values into the model's space. When `noise` is
    /// `None` the model abducts it from `factual` itself.
    fn ite_prediction(
        &mut self,
        factual: ArrayView2<'_, f64>,
        mean: ArrayView1<'_, f64>,
        std: ArrayView1<'_, f64>,
        intervention: &Intervention,
        noise: Option<ArrayView2<'_, f64>>,
    ) -> ScmResult<Array2<f64>>;

    /// Accumulate parameter gradients given `∂loss/∂noise` of the last
    /// [`Self::sample_to_noise`] call.
    fn backward(&mut self, grad_noise: ArrayView2<'_, f64>) -> ScmResult<()>;

    fn zero_grad(&mut self);

    /// Parameters in a fixed order, for the optimizer.
    fn param_groups(&mut self) -> Vec<ParamGroup<'_>>;
}
