//! Configuration types for the scm-learning crate.
//!
//! Uses `figment` for layered configuration: defaults -> user file -> explicit
//! file -> environment -> overrides.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::graph::ThresholdSweep;

/// Top-level configuration for a supervised SCM learning run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScmConfig {
    /// Model and optimizer hyperparameters of the task.
    #[serde(default)]
    pub task: ScmLearningConfig,
    /// Graph evaluation settings.
    #[serde(default)]
    pub evaluation: EvalConfig,
    /// Epoch loop settings.
    #[serde(default)]
    pub trainer: TrainerConfig,
}

/// Mask applied to the cross-attention layers of the structural model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskType {
    #[default]
    None,
    Diag,
}

/// Attention flavour of the cross-attention layers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttnType {
    #[default]
    Causal,
    Standard,
}

/// Cost used to score query/key pairs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostType {
    #[default]
    DotProduct,
    L2,
}

/// Constructor parameters of the task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScmLearningConfig {
    /// Learning rate for the optimizer.
    #[serde(default = "default_lr")]
    pub lr: f64,
    /// Decoupled weight decay for the optimizer.
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f64,
    /// Embedding dimension of the transformer model.
    #[serde(default = "default_d_model")]
    pub d_model: usize,
    /// Number of self-attention heads.
    #[serde(default = "default_num_heads")]
    pub num_heads: usize,
    /// Dimension of the attention keys.
    #[serde(default = "default_dim_key")]
    pub dim_key: usize,
    /// Hidden dimension of the feedforward layers.
    #[serde(default = "default_d_feedforward")]
    pub d_feedforward: usize,
    /// Number of nodes in the graph.
    #[serde(default = "default_total_nodes")]
    pub total_nodes: usize,
    /// Number of self-attention layers.
    #[serde(default = "default_total_layers")]
    pub total_layers: usize,
    #[serde(default)]
    pub dropout_prob: f64,
    #[serde(default)]
    pub mask_type: MaskType,
    #[serde(default)]
    pub attn_type: AttnType,
    #[serde(default)]
    pub cost_type: CostType,
    /// Use the learnable Gaussian likelihood instead of the fixed MSE.
    #[serde(default)]
    pub learnable_loss: bool,
    /// Reduce logged scalars across workers.
    #[serde(default)]
    pub distributed: bool,
}

impl Default for ScmLearningConfig {
    fn default() -> Self {
        Self {
            lr: default_lr(),
            weight_decay: default_weight_decay(),
            d_model: default_d_model(),
            num_heads: default_num_heads(),
            dim_key: default_dim_key(),
            d_feedforward: default_d_feedforward(),
            total_nodes: default_total_nodes(),
            total_layers: default_total_layers(),
            dropout_prob: 0.0,
            mask_type: MaskType::default(),
            attn_type: AttnType::default(),
            cost_type: CostType::default(),
            learnable_loss: false,
            distributed: false,
        }
    }
}

fn default_lr() -> f64 {
    1e-4
}

fn default_weight_decay() -> f64 {
    1e-10
}

fn default_d_model() -> usize {
    64
}

fn default_num_heads() -> usize {
    1
}

fn default_dim_key() -> usize {
    32
}

fn default_d_feedforward() -> usize {
    128
}

fn default_total_nodes() -> usize {
    10
}

fn default_total_layers() -> usize {
    1
}

/// Graph evaluation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Cut point for the single predicted graph.
    #[serde(default = "default_threshold")]
    pub default_threshold: f64,
    /// Sweep used for the best-F1 and AUC metrics.
    #[serde(default)]
    pub sweep: ThresholdSweep,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            default_threshold: default_threshold(),
            sweep: ThresholdSweep::default(),
        }
    }
}

fn default_threshold() -> f64 {
    0.1
}

/// Epoch loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    #[serde(default = "default_max_epochs")]
    pub max_epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Key watched by early stopping.
    #[serde(default = "default_monitor")]
    pub monitor: String,
    /// Epochs without improvement before stopping. `0` disables early stopping.
    #[serde(default = "default_patience")]
    pub early_stopping_patience: usize,
    #[serde(default = "default_min_delta")]
    pub min_delta: f64,
    /// Enable NaN and loss-spike detection on `train_loss`.
    #[serde(default = "default_true")]
    pub anomaly_detection: bool,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            max_epochs: default_max_epochs(),
            batch_size: default_batch_size(),
            monitor: default_monitor(),
            early_stopping_patience: default_patience(),
            min_delta: default_min_delta(),
            anomaly_detection: true,
            seed: default_seed(),
        }
    }
}

fn default_max_epochs() -> usize {
    50
}

fn default_batch_size() -> usize {
    256
}

fn default_monitor() -> String {
    "val_loss".to_string()
}

fn default_patience() -> usize {
    5
}

fn default_min_delta() -> f64 {
    1e-6
}

fn default_true() -> bool {
    true
}

fn default_seed() -> u64 {
    42
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `SCM_`, nested with `__`)
/// 3. Explicit config file
/// 4. User config (`~/.config/scm-learning/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    config_path: Option<&Path>,
    overrides: Option<&ScmConfig>,
) -> Result<ScmConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(ScmConfig::default()));

    if let Some(dirs) = directories::ProjectDirs::from("org", "fip", "scm-learning") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }

    // SCM_TASK__LR, SCM_TRAINER__MAX_EPOCHS, ...
    figment = figment.merge(Env::prefixed("SCM_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}
