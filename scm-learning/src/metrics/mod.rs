//! Graph-quality, regression and curve metrics, plus the epoch scalar log.

pub mod curves;
pub mod graph;
pub mod logger;
pub mod regression;

pub use curves::{CurvePoints, GainCurve, auc_precision_recall_gain, auc_recall_fallout, gain};
pub use graph::{
    adjacency_f1, adjacency_precision_recall, orientation_f1, orientation_fallout_recall,
    orientation_precision_recall,
};
pub use logger::{EpochSummary, LocalReducer, LogOptions, MetricLogger, MetricReducer};
pub use regression::{column_std, mean_row_rmse};
