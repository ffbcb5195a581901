//! Training loop, callbacks and run history.

pub mod callbacks;
pub mod history;
pub mod trainer;

pub use callbacks::{
    AnomalyDetectionCallback, CallbackAction, EarlyStoppingCallback, TrainingCallback,
};
pub use history::{EpochRecord, RunHistory, RunStatus};
pub use trainer::Trainer;
