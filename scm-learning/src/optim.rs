//! AdamW optimizer with decoupled weight decay.

use serde::{Deserialize, Serialize};

use crate::error::{ScmError, ScmResult};

/// A flat parameter buffer with its gradient.
#[derive(Debug)]
pub struct ParamGroup<'a> {
    pub name: &'static str,
    pub values: &'a mut [f64],
    pub grads: &'a [f64],
}

impl<'a> ParamGroup<'a> {
    pub fn new(name: &'static str, values: &'a mut [f64], grads: &'a [f64]) -> Self {
        Self {
            name,
            values,
            grads,
        }
    }
}

/// AdamW hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdamWConfig {
    pub lr: f64,
    pub weight_decay: f64,
    pub betas: (f64, f64),
    pub eps: f64,
}

impl AdamWConfig {
    /// Momentum coefficients and epsilon used for SCM training.
    pub fn new(lr: f64, weight_decay: f64) -> Self {
        Self {
            lr,
            weight_decay,
            betas: (0.95, 0.98),
            eps: 1e-9,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MomentState {
    step: u64,
    first: Vec<f64>,
    second: Vec<f64>,
}

/// AdamW optimizer. Moment state is kept per parameter group position, so the
/// caller must pass groups in the same order on every step.
#[derive(Debug, Clone)]
pub struct AdamW {
    config: AdamWConfig,
    state: Vec<MomentState>,
}

impl AdamW {
    pub fn new(config: AdamWConfig) -> Self {
        Self {
            config,
            state: Vec::new(),
        }
    }

    pub fn config(&self) -> &AdamWConfig {
        &self.config
    }

    /// Apply one update to every group.
    pub fn step(&mut self, groups: Vec<ParamGroup<'_>>) -> ScmResult<()> {
        if self.state.len() < groups.len() {
            self.state.resize_with(groups.len(), MomentState::default);
        }
        let AdamWConfig {
            lr,
            weight_decay,
            betas: (beta1, beta2),
            eps,
        } = self.config;

        for (group, state) in groups.into_iter().zip(self.state.iter_mut()) {
            if group.values.len() != group.grads.len() {
                return Err(ScmError::training(format!(
                    "parameter group '{}' has {} values but {} gradients",
                    group.name,
                    group.values.len(),
                    group.grads.len()
                )));
            }
            if state.first.len() != group.values.len() {
                state.first = vec![0.0; group.values.len()];
                state.second = vec![0.0; group.values.len()];
                state.step = 0;
            }
            state.step += 1;
            let bias1 = 1.0 - beta1.powi(state.step as i32);
            let bias2 = 1.0 - beta2.powi(state.step as i32);

            for (i, (p, &g)) in group.values.iter_mut().zip(group.grads.iter()).enumerate() {
                *p -= lr * weight_decay * *p;
                state.first[i] = beta1 * state.first[i] + (1.0 - beta1) * g;
                state.second[i] = beta2 * state.second[i] + (1.0 - beta2) * g * g;
                let m_hat = state.first[i] / bias1;
                let v_hat = state.second[i] / bias2;
                *p -= lr * m_hat / (v_hat.sqrt() + eps);
            }
        }
        Ok(())
    }
}
