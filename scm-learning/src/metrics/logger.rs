//! Per-epoch scalar logging.
//!
//! Steps log named scalars; the trainer closes each epoch with
//! [`MetricLogger::end_epoch`], which reduces the epoch-level entries to
//! batch-size weighted means and clears them.

use std::collections::BTreeMap;
use std::fmt::Write as _;

/// How a scalar should be aggregated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogOptions {
    /// Show the value in the progress line.
    pub prog_bar: bool,
    /// Keep the latest value for the current step.
    pub on_step: bool,
    /// Accumulate into the epoch mean.
    pub on_epoch: bool,
    /// Reduce across workers at epoch end.
    pub sync_dist: bool,
    /// Weight of this value in the epoch mean. `None` counts as 1.
    pub batch_size: Option<usize>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self::epoch()
    }
}

impl LogOptions {
    /// Epoch-level, shown on the progress bar.
    pub fn epoch() -> Self {
        Self {
            prog_bar: true,
            on_step: false,
            on_epoch: true,
            sync_dist: false,
            batch_size: None,
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn sync_dist(mut self, sync_dist: bool) -> Self {
        self.sync_dist = sync_dist;
        self
    }
}

/// Cross-worker reduction of a weighted sum.
pub trait MetricReducer: Send + Sync {
    /// Return the `(weighted_sum, total_weight)` summed over all workers.
    fn all_reduce(&self, key: &str, weighted_sum: f64, weight: f64) -> (f64, f64);
}

/// Single-process reducer: returns its input.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalReducer;

impl MetricReducer for LocalReducer {
    fn all_reduce(&self, _key: &str, weighted_sum: f64, weight: f64) -> (f64, f64) {
        (weighted_sum, weight)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    weighted_sum: f64,
    weight: f64,
    sync_dist: bool,
    prog_bar: bool,
}

impl Accumulator {
    fn mean(&self) -> f64 {
        if self.weight == 0.0 {
            f64::NAN
        } else {
            self.weighted_sum / self.weight
        }
    }
}

/// Reduced values of one epoch, keyed by metric name.
pub type EpochSummary = BTreeMap<String, f64>;

/// Scalar log owned by the trainer.
pub struct MetricLogger {
    epoch: BTreeMap<String, Accumulator>,
    step: BTreeMap<String, f64>,
    reducer: Box<dyn MetricReducer>,
}

impl Default for MetricLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MetricLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricLogger")
            .field("epoch", &self.epoch)
            .field("step", &self.step)
            .finish_non_exhaustive()
    }
}

impl MetricLogger {
    pub fn new() -> Self {
        Self::with_reducer(Box::new(LocalReducer))
    }

    pub fn with_reducer(reducer: Box<dyn MetricReducer>) -> Self {
        Self {
            epoch: BTreeMap::new(),
            step: BTreeMap::new(),
            reducer,
        }
    }

    /// Record a scalar.
    pub fn log(&mut self, key: impl Into<String>, value: f64, opts: LogOptions) {
        let key = key.into();
        tracing::trace!(key = %key, value, "log");
        if opts.on_step {
            self.step.insert(key.clone(), value);
        }
        if opts.on_epoch {
            let weight = opts.batch_size.unwrap_or(1) as f64;
            let acc = self.epoch.entry(key).or_default();
            acc.weighted_sum += value * weight;
            acc.weight += weight;
            acc.sync_dist |= opts.sync_dist;
            acc.prog_bar |= opts.prog_bar;
        }
    }

    /// Running epoch mean of a key, before cross-worker reduction.
    pub fn current(&self, key: &str) -> Option<f64> {
        self.epoch.get(key).map(Accumulator::mean)
    }

    /// Latest step value of a key.
    pub fn step_value(&self, key: &str) -> Option<f64> {
        self.step.get(key).copied()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.epoch.contains_key(key) || self.step.contains_key(key)
    }

    /// Keys logged so far in this epoch.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.epoch.keys().map(String::as_str)
    }

    /// One-line rendering of the progress-bar entries.
    pub fn progress_line(&self) -> String {
        let mut line = String::new();
        for (key, acc) in self.epoch.iter().filter(|(_, acc)| acc.prog_bar) {
            if !line.is_empty() {
                line.push_str(", ");
            }
            let _ = write!(line, "{key}={:.4}", acc.mean());
        }
        line
    }

    /// Reduce the epoch entries and start a new epoch.
    pub fn end_epoch(&mut self) -> EpochSummary {
        let epoch = std::mem::take(&mut self.epoch);
        self.step.clear();
        epoch
            .into_iter()
            .map(|(key, acc)| {
                let value = if acc.sync_dist {
                    let (sum, weight) = self.reducer.all_reduce(&key, acc.weighted_sum, acc.weight);
                    Accumulator {
                        weighted_sum: sum,
                        weight,
                        ..acc
                    }
                    .mean()
                } else {
                    acc.mean()
                };
                (key, value)
            })
            .collect()
    }

    /// Drop everything logged in the current epoch.
    pub fn reset(&mut self) {
        self.epoch.clear();
        self.step.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_epoch_mean() {
        let mut logger = MetricLogger::new();
        logger.log("loss", 1.0, LogOptions::epoch().batch_size(1));
        logger.log("loss", 4.0, LogOptions::epoch().batch_size(3));
        assert_eq!(logger.current("loss"), Some(13.0 / 4.0));

        let summary = logger.end_epoch();
        assert_eq!(summary["loss"], 13.0 / 4.0);
        assert!(!logger.contains("loss"));
    }

    #[test]
    fn test_unweighted_entries_count_once() {
        let mut logger = MetricLogger::new();
        logger.log("auc", 0.2, LogOptions::epoch());
        logger.log("auc", 0.4, LogOptions::epoch());
        assert!((logger.end_epoch()["auc"] - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_step_values() {
        let mut logger = MetricLogger::new();
        let opts = LogOptions {
            on_step: true,
            on_epoch: false,
            ..LogOptions::epoch()
        };
        logger.log("lr", 0.1, opts);
        logger.log("lr", 0.2, opts);
        assert_eq!(logger.step_value("lr"), Some(0.2));
        assert_eq!(logger.current("lr"), None);
    }

    struct DoublingReducer;

    impl MetricReducer for DoublingReducer {
        // Two identical workers, except the second saw a value of 3.0 per sample
        fn all_reduce(&self, _key: &str, weighted_sum: f64, weight: f64) -> (f64, f64) {
            (weighted_sum + 3.0 * weight, weight * 2.0)
        }
    }

    #[test]
    fn test_sync_dist_uses_reducer() {
        let mut logger = MetricLogger::with_reducer(Box::new(DoublingReducer));
        logger.log("synced", 1.0, LogOptions::epoch().batch_size(2).sync_dist(true));
        logger.log("local", 1.0, LogOptions::epoch().batch_size(2));
        let summary = logger.end_epoch();
        assert_eq!(summary["synced"], 2.0);
        assert_eq!(summary["local"], 1.0);
    }

    #[test]
    fn test_progress_line() {
        let mut logger = MetricLogger::new();
        logger.log("a", 0.5, LogOptions::epoch());
        logger.log(
            "hidden",
            1.0,
            LogOptions {
                prog_bar: false,
                ..LogOptions::epoch()
            },
        );
        assert_eq!(logger.progress_line(), "a=0.5000");
    }
}
