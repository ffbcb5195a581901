//! Reference linear SCM: `x = x·W + n`.
//!
//! `W` is restricted to the special mask (or to all off-diagonal entries when
//! no mask is set). The continuous causal graph is `|W|`.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{GraphMode, Intervention, StructuralModel};
use crate::error::{ScmError, ScmResult};
use crate::graph::ensure_square;
use crate::optim::ParamGroup;

/// Linear structural model with additive noise.
#[derive(Debug, Clone)]
pub struct LinearScm {
    nodes: usize,
    weights: Array2<f64>,
    weights_grad: Array2<f64>,
    special_mask: Option<Array2<f64>>,
    last_input: Option<Array2<f64>>,
}

impl LinearScm {
    /// Weights start uniformly in `[-0.05, 0.05)`.
    pub fn new(nodes: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let weights = Array2::from_shape_fn((nodes, nodes), |_| rng.gen_range(-0.05..0.05));
        Self {
            nodes,
            weights,
            weights_grad: Array2::zeros((nodes, nodes)),
            special_mask: None,
            last_input: None,
        }
    }

    /// Fixed weights, mostly for tests and simulation.
    pub fn with_weights(weights: Array2<f64>) -> ScmResult<Self> {
        let nodes = weights.nrows();
        ensure_square("weights", weights.view(), nodes)?;
        Ok(Self {
            nodes,
            weights_grad: Array2::zeros((nodes, nodes)),
            weights,
            special_mask: None,
            last_input: None,
        })
    }

    /// Support of the weights: the special mask without self-loops.
    fn support(&self) -> Array2<f64> {
        let mut support = match &self.special_mask {
            Some(mask) => mask.mapv(|m| if m != 0.0 { 1.0 } else { 0.0 }),
            None => Array2::ones((self.nodes, self.nodes)),
        };
        support.diag_mut().fill(0.0);
        support
    }

    /// Weights actually used by the structural equations.
    pub fn effective_weights(&self) -> Array2<f64> {
        &self.weights * &self.support()
    }

    fn check_width(&self, what: &str, x: ArrayView2<'_, f64>) -> ScmResult<()> {
        if x.ncols() != self.nodes {
            return Err(ScmError::shape(what, &[x.nrows(), self.nodes], &[x.nrows(), x.ncols()]));
        }
        Ok(())
    }

    /// Solve `x = x·W + n`, optionally clamping one node after every sweep.
    /// `nodes` sweeps are exact when `W` is acyclic.
    fn propagate(
        &self,
        weights: &Array2<f64>,
        noise: ArrayView2<'_, f64>,
        clamp: Option<&dyn Fn(&mut Array2<f64>)>,
    ) -> Array2<f64> {
        let mut x = noise.to_owned();
        if let Some(clamp) = clamp {
            clamp(&mut x);
        }
        for _ in 0..self.nodes {
            x = x.dot(weights) + &noise;
            if let Some(clamp) = clamp {
                clamp(&mut x);
            }
        }
        x
    }
}

impl StructuralModel for LinearScm {
    fn total_nodes(&self) -> usize {
        self.nodes
    }

    fn set_special_mask(&mut self, mask: Array2<f64>) {
        self.special_mask = Some(mask);
    }

    fn special_mask(&self) -> Option<&Array2<f64>> {
        self.special_mask.as_ref()
    }

    fn aggregated_causal_graph(
        &mut self,
        samples: ArrayView2<'_, f64>,
        _mode: GraphMode,
    ) -> ScmResult<Array2<f64>> {
        // The Jacobian of a linear model is the same for every sample, so
        // both reductions agree.
        self.check_width("samples", samples)?;
        Ok(self.effective_weights().mapv(f64::abs))
    }

    fn sample_to_noise(&mut self, samples: ArrayView2<'_, f64>) -> ScmResult<Array2<f64>> {
        self.check_width("samples", samples)?;
        let noise = &samples - &samples.dot(&self.effective_weights());
        self.last_input = Some(samples.to_owned());
        Ok(noise)
    }

    fn noise_to_sample(&mut self, noise: ArrayView2<'_, f64>) -> ScmResult<Array2<f64>> {
        self.check_width("noise", noise)?;
        Ok(self.propagate(&self.effective_weights(), noise, None))
    }

    fn ite_prediction(
        &mut self,
        factual: ArrayView2<'_, f64>,
        mean: ArrayView1<'_, f64>,
        std: ArrayView1<'_, f64>,
        intervention: &Intervention,
        noise: Option<ArrayView2<'_, f64>>,
    ) -> ScmResult<Array2<f64>> {
        self.check_width("factual", factual)?;
        let k = intervention.index;
        if k >= self.nodes {
            return Err(ScmError::invalid_input(format!(
                "intervention index {k} out of range for {} nodes",
                self.nodes
            )));
        }
        let batch = factual.nrows();
        if intervention.values.len() != 1 && intervention.values.len() != batch {
            return Err(ScmError::shape(
                "intervention values",
                &[batch],
                &[intervention.values.len()],
            ));
        }

        let factual_std = (&factual - &mean) / &std;
        let weights = self.effective_weights();
        let noise = match noise {
            Some(n) => {
                self.check_width("noise", n)?;
                n.to_owned()
            }
            None => &factual_std - &factual_std.dot(&weights),
        };

        // do(x_k = v): the intervened node ignores its parents
        let mut cut = weights;
        cut.column_mut(k).fill(0.0);
        let (mean_k, std_k) = (mean[k], std[k]);
        let clamp = |x: &mut Array2<f64>| {
            for (row, mut sample) in x.axis_iter_mut(Axis(0)).enumerate() {
                sample[k] = (intervention.value_for(row) - mean_k) / std_k;
            }
        };
        let cf_std = self.propagate(&cut, noise.view(), Some(&clamp));
        Ok(cf_std * &std + &mean)
    }

    fn backward(&mut self, grad_noise: ArrayView2<'_, f64>) -> ScmResult<()> {
        let input = self
            .last_input
            .as_ref()
            .ok_or_else(|| ScmError::model("backward called before sample_to_noise"))?;
        if input.dim() != grad_noise.dim() {
            let (r, c) = input.dim();
            let (gr, gc) = grad_noise.dim();
            return Err(ScmError::shape("noise gradient", &[r, c], &[gr, gc]));
        }
        // n = x - x·(W ⊙ M)  =>  ∂L/∂W = -(xᵀ·g) ⊙ M
        let grad = -input.t().dot(&grad_noise) * &self.support();
        self.weights_grad += &grad;
        Ok(())
    }

    fn zero_grad(&mut self) {
        self.weights_grad.fill(0.0);
    }

    fn param_groups(&mut self) -> Vec<ParamGroup<'_>> {
        match (self.weights.as_slice_mut(), self.weights_grad.as_slice()) {
            (Some(values), Some(grads)) => vec![ParamGroup::new("linear.weights", values, grads)],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, array};

    fn chain_model() -> LinearScm {
        // 0 -> 1 (0.5), 1 -> 2 (2.0)
        let w = array![[0.0, 0.5, 0.0], [0.0, 0.0, 2.0], [0.0, 0.0, 0.0]];
        LinearScm::with_weights(w).unwrap()
    }

    #[test]
    fn test_noise_round_trip() {
        let mut model = chain_model();
        let n = array![[1.0, 0.0, 0.0], [0.5, -1.0, 2.0]];
        let x = model.noise_to_sample(n.view()).unwrap();
        assert_eq!(x.row(0), array![1.0, 0.5, 1.0]);
        let n_back = model.sample_to_noise(x.view()).unwrap();
        assert!((&n_back - &n).iter().all(|d| d.abs() < 1e-12));
    }

    #[test]
    fn test_mask_restricts_weights() {
        let mut model = LinearScm::new(3, 7);
        let mut mask = Array2::zeros((3, 3));
        mask[[0, 1]] = 1.0;
        model.set_special_mask(mask);
        let g = model
            .aggregated_causal_graph(Array2::zeros((1, 3)).view(), GraphMode::Mean)
            .unwrap();
        assert_eq!(crate::graph::edge_count(g.view()), 1);
        assert_eq!(g[[1, 0]], 0.0);
    }

    #[test]
    fn test_intervention_cuts_parents() {
        let mut model = chain_model();
        let factual = array![[1.0, 0.5, 1.0]];
        let mean = Array1::zeros(3);
        let std = Array1::ones(3);
        let cf = model
            .ite_prediction(
                factual.view(),
                mean.view(),
                std.view(),
                &Intervention::new(1, array![3.0]),
                None,
            )
            .unwrap();
        // node 0 untouched, node 1 clamped, node 2 = 2 * 3 + 0
        assert!((cf[[0, 0]] - 1.0).abs() < 1e-12);
        assert!((cf[[0, 1]] - 3.0).abs() < 1e-12);
        assert!((cf[[0, 2]] - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_intervention_uses_given_noise() {
        let mut model = chain_model();
        let factual = array![[1.0, 0.5, 1.0]];
        let noise = array![[0.0, 0.0, 1.0]];
        let mean = Array1::zeros(3);
        let std = Array1::ones(3);
        let cf = model
            .ite_prediction(
                factual.view(),
                mean.view(),
                std.view(),
                &Intervention::new(1, array![1.0]),
                Some(noise.view()),
            )
            .unwrap();
        assert!((cf[[0, 2]] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_backward_requires_forward() {
        let mut model = chain_model();
        assert!(model.backward(Array2::zeros((1, 3)).view()).is_err());
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let mut model = chain_model();
        let x = array![[1.0, 2.0, -1.0], [0.5, 0.0, 1.5]];
        let loss = |m: &mut LinearScm| {
            let n = m.sample_to_noise(x.view()).unwrap();
            n.mapv(|v| v * v).mean().unwrap()
        };

        let n = model.sample_to_noise(x.view()).unwrap();
        let grad_noise = &n * (2.0 / n.len() as f64);
        model.backward(grad_noise.view()).unwrap();
        let analytic = model.weights_grad[[0, 1]];

        let eps = 1e-6;
        let mut plus = model.clone();
        plus.weights[[0, 1]] += eps;
        let mut minus = model.clone();
        minus.weights[[0, 1]] -= eps;
        let numeric = (loss(&mut plus) - loss(&mut minus)) / (2.0 * eps);
        assert!((analytic - numeric).abs() < 1e-6);
    }
}
