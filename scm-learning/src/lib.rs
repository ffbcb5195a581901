//! # scm-learning: supervised structural causal model learning
//!
//! Trains a learnable structural causal model whose causal graph is known and
//! evaluates it on three axes:
//!
//! 1. **Graph recovery**: adjacency and orientation F1 at a fixed threshold,
//!    the best F1 over a threshold sweep, and areas under the
//!    precision-recall-gain and ROC curves
//! 2. **Noise recovery**: RMSE between abducted and true exogenous noise,
//!    and between generated and observed samples
//! 3. **Counterfactuals**: RMSE of interventional predictions with oracle and
//!    abducted noise, in raw and standardized units
//!
//! A [`ScmLearningTask`] is bound to a [`TensorDataModule`] once, yielding a
//! [`ScmLearningTrueGraph`]; the [`Trainer`] then drives its steps.

// Foundation
pub mod config;
pub mod error;

// Data
pub mod data;
pub mod graph;

// Model & objective
pub mod loss;
pub mod model;
pub mod optim;

// Evaluation
pub mod metrics;
pub mod resource;

// Orchestration
pub mod task;
pub mod training;

// Re-exports
pub use config::{EvalConfig, ScmConfig, ScmLearningConfig, TrainerConfig, load_config};
pub use data::{Batch, DataFile, DataSource, TensorDataModule, TensorDataset};
pub use error::{ScmError, ScmResult};
pub use graph::ThresholdSweep;
pub use loss::LossObjective;
pub use metrics::{EpochSummary, LogOptions, MetricLogger};
pub use model::{GraphMode, Intervention, LinearScm, StructuralModel};
pub use optim::{AdamW, AdamWConfig};
pub use task::{CounterfactualReport, ScmLearningTask, ScmLearningTrueGraph, TrainingOutput};
pub use training::{RunHistory, RunStatus, Trainer};
