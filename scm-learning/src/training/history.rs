//! Run history: per-epoch summaries and final test metrics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::ScmResult;
use crate::metrics::EpochSummary;

/// Lifecycle of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    /// Ended early by a callback.
    Stopped,
    Failed,
}

/// Reduced scalars of one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunHistory {
    pub id: String,
    pub name: String,
    pub status: RunStatus,
    /// Key used to pick the best epoch.
    pub monitor: String,
    pub epochs: Vec<EpochRecord>,
    #[serde(default)]
    pub test_metrics: BTreeMap<String, f64>,
    pub best_epoch: Option<usize>,
    pub best_value: Option<f64>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    /// Resolved configuration of the run.
    #[serde(default)]
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunHistory {
    pub fn new(name: &str, monitor: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            status: RunStatus::Running,
            monitor: monitor.to_string(),
            epochs: Vec::new(),
            test_metrics: BTreeMap::new(),
            best_epoch: None,
            best_value: None,
            stop_reason: None,
            config: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_config<T: Serialize>(mut self, config: &T) -> ScmResult<Self> {
        self.config = serde_json::to_value(config)?;
        Ok(self)
    }

    /// Append an epoch and update the best epoch on the monitored key.
    pub fn record_epoch(&mut self, epoch: usize, summary: &EpochSummary) {
        if let Some(&value) = summary.get(&self.monitor)
            && !value.is_nan()
            && self.best_value.is_none_or(|best| value < best)
        {
            self.best_value = Some(value);
            self.best_epoch = Some(epoch);
        }
        self.epochs.push(EpochRecord {
            epoch,
            metrics: summary.clone(),
        });
        self.updated_at = Utc::now();
    }

    pub fn record_test(&mut self, summary: EpochSummary) {
        self.test_metrics = summary;
        self.updated_at = Utc::now();
    }

    pub fn finish(&mut self, status: RunStatus, stop_reason: Option<String>) {
        self.status = status;
        self.stop_reason = stop_reason;
        self.updated_at = Utc::now();
    }

    pub fn last_epoch(&self) -> Option<&EpochRecord> {
        self.epochs.last()
    }

    /// Values of `key` over the recorded epochs, skipping epochs without it.
    pub fn series(&self, key: &str) -> Vec<f64> {
        self.epochs
            .iter()
            .filter_map(|e| e.metrics.get(key).copied())
            .collect()
    }

    pub fn load(path: &Path) -> ScmResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> ScmResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn summary(pairs: &[(&str, f64)]) -> EpochSummary {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_best_epoch() {
        let mut history = RunHistory::new("run", "val_loss");
        history.record_epoch(0, &summary(&[("val_loss", 0.6), ("train_loss", 0.7)]));
        history.record_epoch(1, &summary(&[("val_loss", 0.4)]));
        history.record_epoch(2, &summary(&[("val_loss", 0.5)]));
        assert_eq!(history.best_epoch, Some(1));
        assert_eq!(history.best_value, Some(0.4));
        assert_eq!(history.series("train_loss"), vec![0.7]);
    }

    #[test]
    fn test_nan_is_never_best() {
        let mut history = RunHistory::new("run", "val_loss");
        history.record_epoch(0, &summary(&[("val_loss", f64::NAN)]));
        assert_eq!(history.best_epoch, None);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");

        let mut history = RunHistory::new("run", "val_loss");
        history.record_epoch(0, &summary(&[("val_loss", 0.25)]));
        history.record_test(summary(&[("test_loss", 0.5)]));
        history.finish(RunStatus::Completed, None);
        history.save(&path).unwrap();

        let loaded = RunHistory::load(&path).unwrap();
        assert_eq!(loaded, history);
        assert!(!path.with_extension("tmp").exists());
    }
}
