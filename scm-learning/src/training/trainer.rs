//! Epoch loop around a bound task.

use tracing::{debug, info, warn};

use super::callbacks::{
    AnomalyDetectionCallback, CallbackAction, EarlyStoppingCallback, TrainingCallback,
};
use super::history::{RunHistory, RunStatus};
use crate::config::TrainerConfig;
use crate::data::{Batch, TensorDataModule};
use crate::error::{ScmError, ScmResult};
use crate::metrics::{EpochSummary, MetricLogger};
use crate::model::StructuralModel;
use crate::task::ScmLearningTrueGraph;

/// Loss-spike factor of the default anomaly detector.
const ANOMALY_THRESHOLD: f64 = 3.0;
const ANOMALY_WINDOW: usize = 5;

/// Runs training, validation and test loops and owns the metric logger.
pub struct Trainer {
    config: TrainerConfig,
    logger: MetricLogger,
    callbacks: Vec<Box<dyn TrainingCallback>>,
}

impl Trainer {
    /// Trainer with the callbacks enabled in `config`.
    pub fn new(config: TrainerConfig) -> Self {
        let mut callbacks: Vec<Box<dyn TrainingCallback>> = Vec::new();
        if config.early_stopping_patience > 0 {
            callbacks.push(Box::new(EarlyStoppingCallback::new(
                config.monitor.clone(),
                config.early_stopping_patience,
                config.min_delta,
            )));
        }
        if config.anomaly_detection {
            callbacks.push(Box::new(AnomalyDetectionCallback::new(
                "train_loss",
                ANOMALY_THRESHOLD,
                ANOMALY_WINDOW,
            )));
        }
        Self {
            config,
            logger: MetricLogger::new(),
            callbacks,
        }
    }

    /// Replace the logger, e.g. to install a cross-worker reducer.
    pub fn with_logger(mut self, logger: MetricLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_callback(mut self, callback: Box<dyn TrainingCallback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn logger(&self) -> &MetricLogger {
        &self.logger
    }

    /// Train for up to `max_epochs`, validating after every epoch.
    pub fn fit<M: StructuralModel>(
        &mut self,
        task: &mut ScmLearningTrueGraph<M>,
        data: &TensorDataModule,
        history: &mut RunHistory,
    ) -> ScmResult<()> {
        let train_batches = data.train_batches()?;
        if train_batches.is_empty() {
            return Err(ScmError::training("no training samples"));
        }
        let val_batches = data.val_batches()?;
        let mut optimizer = task.configure_optimizers();
        info!(
            max_epochs = self.config.max_epochs,
            train_batches = train_batches.len(),
            val_batches = val_batches.len(),
            "starting training"
        );

        for epoch in 0..self.config.max_epochs {
            for batch in &train_batches {
                let output = task.training_step(&mut self.logger, batch)?;
                task.backward(&output)?;
                task.optimizer_step(&mut optimizer)?;
            }
            for batch in &val_batches {
                task.validation_step(&mut self.logger, batch)?;
            }

            debug!(epoch, progress = %self.logger.progress_line(), "epoch metrics");
            let summary = self.logger.end_epoch();
            info!(
                epoch,
                train_loss = summary.get("train_loss").copied(),
                val_loss = summary.get("val_loss").copied(),
                "epoch finished"
            );
            history.record_epoch(epoch, &summary);

            for callback in &mut self.callbacks {
                if let CallbackAction::Stop(reason) = callback.on_epoch_end(epoch, &summary) {
                    warn!(callback = callback.name(), epoch, %reason, "stopping training");
                    history.finish(RunStatus::Stopped, Some(reason));
                    return Ok(());
                }
            }
        }

        history.finish(RunStatus::Completed, None);
        Ok(())
    }

    /// Run every test batch: observational batches on dataloader 0, then
    /// counterfactual batches on dataloader 1.
    pub fn test<M: StructuralModel>(
        &mut self,
        task: &mut ScmLearningTrueGraph<M>,
        data: &TensorDataModule,
    ) -> ScmResult<EpochSummary> {
        self.logger.reset();
        let batches = data
            .test_batches()?
            .into_iter()
            .map(Batch::Observational)
            .chain(
                data.counterfactual_batches()
                    .into_iter()
                    .map(Batch::Counterfactual),
            );
        for batch in batches {
            task.test_step(&mut self.logger, &batch)?;
        }
        let summary = self.logger.end_epoch();
        info!(metrics = summary.len(), "test finished");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScmLearningConfig;
    use crate::data::{CounterfactualSet, TensorDataset};
    use crate::model::LinearScm;
    use crate::task::ScmLearningTask;
    use ndarray::{Array2, array};

    struct StopAt(usize);

    impl TrainingCallback for StopAt {
        fn name(&self) -> &'static str {
            "stop_at"
        }

        fn on_epoch_end(&mut self, epoch: usize, _summary: &EpochSummary) -> CallbackAction {
            if epoch + 1 >= self.0 {
                CallbackAction::Stop("requested".into())
            } else {
                CallbackAction::Continue
            }
        }
    }

    fn module() -> TensorDataModule {
        let noise = Array2::from_shape_fn((8, 2), |(i, j)| ((i * 3 + j * 5) % 7) as f64 - 3.0);
        let mut samples = noise.clone();
        for mut row in samples.rows_mut() {
            row[1] += 0.8 * row[0];
        }
        let ds = TensorDataset::new(samples.clone(), noise.clone())
            .unwrap()
            .with_true_graph(array![[0.0, 1.0], [0.0, 0.0]])
            .unwrap();
        let mut module = TensorDataModule::new(ds.clone(), false);
        module.val_data = Some(ds.clone());
        module.test_data = Some(ds);
        module.counterfactual_data.push(CounterfactualSet {
            factual: samples.slice(ndarray::s![..2, ..]).to_owned(),
            factual_noise: noise.slice(ndarray::s![..2, ..]).to_owned(),
            counterfactual: samples.slice(ndarray::s![..2, ..]).to_owned(),
            intervention_index: 0,
            intervention_values: samples.slice(ndarray::s![..2, 0]).to_owned(),
        });
        module.batch_size = 4;
        module
    }

    fn task(data: &TensorDataModule) -> ScmLearningTrueGraph<LinearScm> {
        let config = ScmLearningConfig {
            total_nodes: 2,
            lr: 1e-2,
            ..ScmLearningConfig::default()
        };
        ScmLearningTask::new(config, LinearScm::new(2, 3))
            .unwrap()
            .bind(data)
            .unwrap()
    }

    fn trainer(max_epochs: usize) -> Trainer {
        Trainer::new(TrainerConfig {
            max_epochs,
            early_stopping_patience: 0,
            anomaly_detection: false,
            ..TrainerConfig::default()
        })
    }

    #[test]
    fn test_fit_records_every_epoch() {
        let data = module();
        let mut task = task(&data);
        let mut history = RunHistory::new("fit", "val_loss");
        trainer(3).fit(&mut task, &data, &mut history).unwrap();

        assert_eq!(history.status, RunStatus::Completed);
        assert_eq!(history.epochs.len(), 3);
        let first = &history.epochs[0].metrics;
        for key in ["train_loss", "val_loss", "val_rmse_noise_loss_std", "train_adj_f1_best"] {
            assert!(first.contains_key(key), "missing {key}");
        }
        let val = history.series("val_loss");
        assert!(val[2] < val[0], "val_loss did not decrease: {val:?}");
    }

    #[test]
    fn test_callback_stops_run() {
        let data = module();
        let mut task = task(&data);
        let mut history = RunHistory::new("stop", "val_loss");
        trainer(10)
            .with_callback(Box::new(StopAt(2)))
            .fit(&mut task, &data, &mut history)
            .unwrap();
        assert_eq!(history.status, RunStatus::Stopped);
        assert_eq!(history.epochs.len(), 2);
        assert_eq!(history.stop_reason.as_deref(), Some("requested"));
    }

    #[test]
    fn test_runs_both_dataloaders() {
        let data = module();
        let mut task = task(&data);
        let summary = trainer(1).test(&mut task, &data).unwrap();
        for key in [
            "test_loss",
            "target_test_loss",
            "test_rmse_generation_loss_std",
            "test_rmse_cf_loss",
            "test_rmse_cf_loss_std_fake_noise",
            "test_adj_f1_pred",
        ] {
            assert!(summary.contains_key(key), "missing {key}");
        }
    }

    #[test]
    fn test_empty_training_split() {
        let ds = TensorDataset::new(Array2::zeros((0, 2)), Array2::zeros((0, 2)))
            .unwrap()
            .with_true_graph(array![[0.0, 1.0], [0.0, 0.0]])
            .unwrap();
        let data = TensorDataModule::new(ds, false);
        let mut task = task(&data);
        let mut history = RunHistory::new("empty", "val_loss");
        assert!(matches!(
            trainer(1).fit(&mut task, &data, &mut history),
            Err(ScmError::Training(_))
        ));
    }
}
