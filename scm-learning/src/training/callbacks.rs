//! Epoch-end callbacks: early stopping and anomaly detection.

use serde::{Deserialize, Serialize};

use crate::metrics::EpochSummary;

/// Action a callback can request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    /// Stop training, with a reason for the run history.
    Stop(String),
}

/// Trait for training callbacks.
pub trait TrainingCallback: Send {
    fn name(&self) -> &'static str;

    /// Called at the end of each epoch with the reduced epoch summary.
    fn on_epoch_end(&mut self, epoch: usize, summary: &EpochSummary) -> CallbackAction;
}

/// Stop when the monitored key has not improved for `patience` epochs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarlyStoppingCallback {
    pub monitor: String,
    pub patience: usize,
    pub min_delta: f64,
    #[serde(skip)]
    counter: usize,
    #[serde(skip)]
    best: Option<f64>,
}

impl EarlyStoppingCallback {
    pub fn new(monitor: impl Into<String>, patience: usize, min_delta: f64) -> Self {
        Self {
            monitor: monitor.into(),
            patience,
            min_delta,
            counter: 0,
            best: None,
        }
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    fn observe(&mut self, value: f64) -> CallbackAction {
        match self.best {
            Some(best) if value >= best - self.min_delta => {
                self.counter += 1;
                if self.counter >= self.patience {
                    CallbackAction::Stop(format!(
                        "{} did not improve for {} epochs (best {best:.6})",
                        self.monitor, self.counter
                    ))
                } else {
                    CallbackAction::Continue
                }
            }
            _ => {
                self.best = Some(value);
                self.counter = 0;
                CallbackAction::Continue
            }
        }
    }
}

impl TrainingCallback for EarlyStoppingCallback {
    fn name(&self) -> &'static str {
        "early_stopping"
    }

    fn on_epoch_end(&mut self, _epoch: usize, summary: &EpochSummary) -> CallbackAction {
        // runs without validation data have nothing to monitor
        match summary.get(&self.monitor) {
            Some(&value) if !value.is_nan() => self.observe(value),
            _ => CallbackAction::Continue,
        }
    }
}

/// Stop on a NaN/infinite loss or a spike above `threshold` times the
/// recent mean.
#[derive(Debug, Clone)]
pub struct AnomalyDetectionCallback {
    pub monitor: String,
    pub threshold: f64,
    window: Vec<f64>,
    window_size: usize,
}

impl AnomalyDetectionCallback {
    pub fn new(monitor: impl Into<String>, threshold: f64, window_size: usize) -> Self {
        Self {
            monitor: monitor.into(),
            threshold,
            window: Vec::new(),
            window_size,
        }
    }

    fn observe(&mut self, loss: f64) -> CallbackAction {
        if !loss.is_finite() {
            return CallbackAction::Stop(format!("{} is {loss}", self.monitor));
        }

        self.window.push(loss);
        if self.window.len() > self.window_size {
            self.window.remove(0);
        }

        // a spike only makes sense against a positive baseline
        if self.window.len() >= 3 {
            let mean = self.window.iter().sum::<f64>() / self.window.len() as f64;
            if mean > 0.0 && loss > mean * self.threshold {
                return CallbackAction::Stop(format!(
                    "{} spiked to {loss:.6} (window mean {mean:.6})",
                    self.monitor
                ));
            }
        }

        CallbackAction::Continue
    }
}

impl TrainingCallback for AnomalyDetectionCallback {
    fn name(&self) -> &'static str {
        "anomaly_detection"
    }

    fn on_epoch_end(&mut self, _epoch: usize, summary: &EpochSummary) -> CallbackAction {
        match summary.get(&self.monitor) {
            Some(&loss) => self.observe(loss),
            None => CallbackAction::Continue,
        }
    }
}
