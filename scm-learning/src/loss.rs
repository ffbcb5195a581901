//! Noise objectives: fixed mean-squared error or a learnable Gaussian
//! likelihood.
//!
//! Both compare predicted noise against a target (zero for the training
//! objective) over `batch × nodes` arrays.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use std::f64::consts::PI;

use crate::error::{ScmError, ScmResult};
use crate::optim::ParamGroup;

/// Gaussian negative log-likelihood with one learnable log-scale per node.
#[derive(Debug, Clone, PartialEq)]
pub struct LearnableGaussianLlh {
    log_scale: Array1<f64>,
    log_scale_grad: Array1<f64>,
}

impl LearnableGaussianLlh {
    pub fn new(max_seq_length: usize) -> Self {
        Self {
            log_scale: Array1::zeros(max_seq_length),
            log_scale_grad: Array1::zeros(max_seq_length),
        }
    }

    pub fn log_scale(&self) -> &Array1<f64> {
        &self.log_scale
    }

    fn scales(&self, width: usize) -> ScmResult<Array1<f64>> {
        if width > self.log_scale.len() {
            return Err(ScmError::shape(
                "loss input width",
                &[self.log_scale.len()],
                &[width],
            ));
        }
        Ok(self
            .log_scale
            .slice(ndarray::s![..width])
            .mapv(f64::exp))
    }

    fn compute(&self, predicted: ArrayView2<'_, f64>, target: ArrayView2<'_, f64>) -> ScmResult<f64> {
        let sigma = self.scales(predicted.ncols())?;
        let log_sigma = sigma.mapv(f64::ln);
        let z = (&predicted - &target) / &sigma;
        let nll = z.mapv(|z| 0.5 * z * z) + &log_sigma + 0.5 * (2.0 * PI).ln();
        Ok(nll.mean().unwrap_or(f64::NAN))
    }

    fn gradient(
        &self,
        predicted: ArrayView2<'_, f64>,
        target: ArrayView2<'_, f64>,
    ) -> ScmResult<Array2<f64>> {
        let sigma = self.scales(predicted.ncols())?;
        let n = predicted.len().max(1) as f64;
        Ok((&predicted - &target) / &sigma.mapv(|s| s * s) / n)
    }

    fn backward(&mut self, predicted: ArrayView2<'_, f64>, target: ArrayView2<'_, f64>) -> ScmResult<()> {
        let width = predicted.ncols();
        let sigma = self.scales(width)?;
        let n = predicted.len().max(1) as f64;
        let z2 = ((&predicted - &target) / &sigma).mapv(|z| z * z);
        // d/d log σ_j of (z²/2 + log σ_j) = 1 - z²
        let grad = z2.mapv(|z2| 1.0 - z2).sum_axis(Axis(0)) / n;
        let mut slot = self.log_scale_grad.slice_mut(ndarray::s![..width]);
        slot += &grad;
        Ok(())
    }
}

/// Loss applied to predicted noise.
#[derive(Debug, Clone, PartialEq)]
pub enum LossObjective {
    Mse,
    LearnableGaussian(LearnableGaussianLlh),
}

impl LossObjective {
    /// `learnable` selects the Gaussian likelihood sized for `total_nodes`.
    pub fn new(learnable: bool, total_nodes: usize) -> Self {
        if learnable {
            Self::LearnableGaussian(LearnableGaussianLlh::new(total_nodes))
        } else {
            Self::Mse
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Mse => "mse",
            Self::LearnableGaussian(_) => "learnable_gaussian_llh",
        }
    }

    /// Scalar divergence between prediction and target.
    pub fn compute(&self, predicted: ArrayView2<'_, f64>, target: ArrayView2<'_, f64>) -> ScmResult<f64> {
        ensure_same_shape(predicted, target)?;
        match self {
            Self::Mse => Ok((&predicted - &target)
                .mapv(|d| d * d)
                .mean()
                .unwrap_or(f64::NAN)),
            Self::LearnableGaussian(llh) => llh.compute(predicted, target),
        }
    }

    /// Gradient of [`Self::compute`] with respect to `predicted`.
    pub fn gradient(
        &self,
        predicted: ArrayView2<'_, f64>,
        target: ArrayView2<'_, f64>,
    ) -> ScmResult<Array2<f64>> {
        ensure_same_shape(predicted, target)?;
        match self {
            Self::Mse => {
                let n = predicted.len().max(1) as f64;
                Ok((&predicted - &target) * (2.0 / n))
            }
            Self::LearnableGaussian(llh) => llh.gradient(predicted, target),
        }
    }

    /// Accumulate gradients of the loss's own parameters.
    pub fn backward(&mut self, predicted: ArrayView2<'_, f64>, target: ArrayView2<'_, f64>) -> ScmResult<()> {
        ensure_same_shape(predicted, target)?;
        match self {
            Self::Mse => Ok(()),
            Self::LearnableGaussian(llh) => llh.backward(predicted, target),
        }
    }

    pub fn zero_grad(&mut self) {
        if let Self::LearnableGaussian(llh) = self {
            llh.log_scale_grad.fill(0.0);
        }
    }

    /// Learnable parameters, empty for the fixed loss.
    pub fn param_groups(&mut self) -> Vec<ParamGroup<'_>> {
        match self {
            Self::Mse => Vec::new(),
            Self::LearnableGaussian(llh) => {
                match (llh.log_scale.as_slice_mut(), llh.log_scale_grad.as_slice()) {
                    (Some(values), Some(grads)) => {
                        vec![ParamGroup::new("loss.log_scale", values, grads)]
                    }
                    _ => Vec::new(),
                }
            }
        }
    }
}

fn ensure_same_shape(predicted: ArrayView2<'_, f64>, target: ArrayView2<'_, f64>) -> ScmResult<()> {
    if predicted.dim() != target.dim() {
        let (pr, pc) = predicted.dim();
        let (tr, tc) = target.dim();
        return Err(ScmError::shape("loss target", &[pr, pc], &[tr, tc]));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_mse_against_zero() {
        let loss = LossObjective::new(false, 2);
        let pred = array![[1.0, -1.0], [2.0, 0.0]];
        let zero = Array2::zeros((2, 2));
        assert_eq!(loss.compute(pred.view(), zero.view()).unwrap(), 6.0 / 4.0);
        assert_eq!(loss.name(), "mse");
    }

    #[test]
    fn test_mse_gradient() {
        let loss = LossObjective::Mse;
        let pred = array![[1.0, -1.0]];
        let zero = Array2::zeros((1, 2));
        assert_eq!(
            loss.gradient(pred.view(), zero.view()).unwrap(),
            array![[1.0, -1.0]]
        );
    }

    #[test]
    fn test_gaussian_at_unit_scale() {
        let loss = LossObjective::new(true, 3);
        let pred = array![[0.0, 0.0, 0.0]];
        let zero = Array2::zeros((1, 3));
        let value = loss.compute(pred.view(), zero.view()).unwrap();
        assert!((value - 0.5 * (2.0 * PI).ln()).abs() < 1e-12);
    }

    #[test]
    fn test_gaussian_scale_gradient_sign() {
        let mut loss = LossObjective::new(true, 2);
        // residuals larger than the unit scale push log σ up (negative gradient)
        let pred = array![[3.0, 3.0], [-3.0, -3.0]];
        let zero = Array2::zeros((2, 2));
        loss.backward(pred.view(), zero.view()).unwrap();
        let groups = loss.param_groups();
        assert_eq!(groups.len(), 1);
        assert!(groups[0].grads.iter().all(|g| *g < 0.0));
    }

    #[test]
    fn test_gaussian_rejects_wide_input() {
        let loss = LossObjective::new(true, 2);
        let pred = Array2::zeros((1, 3));
        assert!(loss.compute(pred.view(), pred.view()).is_err());
    }

    #[test]
    fn test_shape_mismatch() {
        let loss = LossObjective::Mse;
        let pred = Array2::zeros((2, 2));
        let target = Array2::zeros((1, 2));
        assert!(loss.compute(pred.view(), target.view()).is_err());
    }

    #[test]
    fn test_mse_has_no_parameters() {
        let mut loss = LossObjective::Mse;
        assert!(loss.param_groups().is_empty());
    }
}
