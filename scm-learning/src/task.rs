//! Supervised SCM learning with a known true graph.
//!
//! [`ScmLearningTask`] is built from a configuration and a model, then bound
//! once to a data source, which yields the ready [`ScmLearningTrueGraph`]. The
//! bound task runs the training, validation and test steps and writes its
//! scalars to a [`MetricLogger`] owned by the caller.

use ndarray::{Array1, Array2, ArrayView2};
use tracing::{debug, info};

use crate::config::{EvalConfig, ScmLearningConfig};
use crate::data::{Batch, CounterfactualBatch, DataSource, ObservationalBatch};
use crate::error::{ScmError, ScmResult};
use crate::graph::{binarize, ensure_square, unbind_last};
use crate::loss::LossObjective;
use crate::metrics::{
    CurvePoints, LogOptions, MetricLogger, adjacency_f1, auc_precision_recall_gain,
    auc_recall_fallout, column_std, curves::pos_ratio, mean_row_rmse, orientation_f1,
};
use crate::model::{GraphMode, StructuralModel};
use crate::optim::{AdamW, AdamWConfig};
use crate::resource::ResourceSampler;

/// Key of the memory gauge logged by the training step.
pub const MEMORY_KEY: &str = "Memory Info in GiB";

/// Result of a training step, kept for the backward pass.
#[derive(Debug, Clone)]
pub struct TrainingOutput {
    pub loss: f64,
    pub predicted_noise: Array2<f64>,
    /// `∂loss/∂predicted_noise`
    pub grad_noise: Array2<f64>,
}

/// Scalars of an observational test step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObservationalReport {
    pub loss: f64,
    pub target_loss: f64,
    pub rmse_noise: f64,
    pub rmse_generation: f64,
}

/// Scalars of a counterfactual test step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CounterfactualReport {
    pub rmse_cf: f64,
    pub rmse_cf_fake_noise: f64,
    pub rmse_cf_std: f64,
    pub rmse_cf_std_fake_noise: f64,
}

/// Outcome of [`ScmLearningTrueGraph::test_step`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TestReport {
    Observational(ObservationalReport),
    Counterfactual(CounterfactualReport),
}

fn optimizer_for(config: &ScmLearningConfig) -> AdamW {
    AdamW::new(AdamWConfig::new(config.lr, config.weight_decay))
}

/// A task that has not been bound to data yet.
pub struct ScmLearningTask<M> {
    config: ScmLearningConfig,
    eval: EvalConfig,
    model: M,
    loss: LossObjective,
    resource_sampler: Option<Box<dyn ResourceSampler>>,
}

impl<M: StructuralModel> ScmLearningTask<M> {
    pub fn new(config: ScmLearningConfig, model: M) -> ScmResult<Self> {
        if model.total_nodes() != config.total_nodes {
            return Err(ScmError::Config(format!(
                "model has {} nodes but total_nodes is {}",
                model.total_nodes(),
                config.total_nodes
            )));
        }
        let loss = LossObjective::new(config.learnable_loss, config.total_nodes);
        Ok(Self {
            config,
            eval: EvalConfig::default(),
            model,
            loss,
            resource_sampler: None,
        })
    }

    pub fn with_eval_config(mut self, eval: EvalConfig) -> Self {
        self.eval = eval;
        self
    }

    /// Enable the memory gauge of the training step.
    pub fn with_resource_sampler(mut self, sampler: Box<dyn ResourceSampler>) -> Self {
        self.resource_sampler = Some(sampler);
        self
    }

    pub fn configure_optimizers(&self) -> AdamW {
        optimizer_for(&self.config)
    }

    /// Read the normalization statistics and the true graph from `source` and
    /// install the graph as the model's special mask.
    pub fn bind(self, source: &dyn DataSource) -> ScmResult<ScmLearningTrueGraph<M>> {
        let module = source
            .as_tensor_module()
            .ok_or_else(|| ScmError::IncompatibleDataSource {
                found: source.kind().to_string(),
            })?;

        let train = &module.train_data;
        let true_graph = train
            .true_graph
            .clone()
            .ok_or(ScmError::MissingTrueGraph)?;
        let nodes = self.config.total_nodes;
        ensure_square("true graph", true_graph.view(), nodes)?;
        if train.nodes() != nodes {
            return Err(ScmError::shape(
                "training samples",
                &[train.len(), nodes],
                &[train.len(), train.nodes()],
            ));
        }

        let Self {
            config,
            eval,
            mut model,
            loss,
            resource_sampler,
        } = self;
        model.set_special_mask(true_graph.clone());
        info!(
            source = source.kind(),
            nodes,
            edges = crate::graph::edge_count(true_graph.view()),
            standardize = module.standardize,
            loss = loss.name(),
            "task bound to data source"
        );

        Ok(ScmLearningTrueGraph {
            config,
            eval,
            model,
            loss,
            resource_sampler,
            standardize: module.standardize,
            mean_data: train.mean_data.clone(),
            std_data: train.std_data.clone(),
            true_graph,
        })
    }
}

/// A task bound to its data: statistics and true graph are fixed.
pub struct ScmLearningTrueGraph<M> {
    config: ScmLearningConfig,
    eval: EvalConfig,
    model: M,
    loss: LossObjective,
    resource_sampler: Option<Box<dyn ResourceSampler>>,
    standardize: bool,
    mean_data: Array1<f64>,
    std_data: Array1<f64>,
    true_graph: Array2<f64>,
}

impl<M: StructuralModel> ScmLearningTrueGraph<M> {
    pub fn config(&self) -> &ScmLearningConfig {
        &self.config
    }

    pub fn eval_config(&self) -> &EvalConfig {
        &self.eval
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn loss(&self) -> &LossObjective {
        &self.loss
    }

    pub fn true_graph(&self) -> &Array2<f64> {
        &self.true_graph
    }

    pub fn standardize(&self) -> bool {
        self.standardize
    }

    pub fn mean_data(&self) -> &Array1<f64> {
        &self.mean_data
    }

    pub fn std_data(&self) -> &Array1<f64> {
        &self.std_data
    }

    pub fn configure_optimizers(&self) -> AdamW {
        optimizer_for(&self.config)
    }

    fn epoch_opts(&self, batch_size: usize) -> LogOptions {
        LogOptions::epoch().batch_size(batch_size)
    }

    fn synced_opts(&self, batch_size: usize) -> LogOptions {
        self.epoch_opts(batch_size)
            .sync_dist(self.config.distributed)
    }

    /// Binary graph predicted from `samples` at `threshold`.
    pub fn predict_graph(
        &mut self,
        samples: ArrayView2<'_, f64>,
        threshold: f64,
        mode: GraphMode,
    ) -> ScmResult<Array2<f64>> {
        let continuous = self.model.aggregated_causal_graph(samples, mode)?;
        Ok(binarize(continuous.view(), threshold))
    }

    fn check_batch(&self, batch: &ObservationalBatch) -> ScmResult<()> {
        let nodes = self.config.total_nodes;
        ensure_square("batch true graph", batch.true_graph.view(), nodes)?;
        let rows = batch.samples.nrows();
        for (what, array) in [("batch samples", &batch.samples), ("batch noise", &batch.noise)] {
            if array.dim() != (rows, nodes) {
                return Err(ScmError::shape(
                    what,
                    &[rows, nodes],
                    &[array.nrows(), array.ncols()],
                ));
            }
        }
        Ok(())
    }

    /// Log F1 scores at the default threshold and the best F1 over the sweep.
    /// Returns the swept graphs for [`Self::log_pr_and_roc`].
    ///
    /// The logged `*_best` values take the maximum over the sweep members and
    /// the default threshold, so they may come from the fixed operating point
    /// rather than from a swept graph.
    pub fn log_graph_metrics(
        &mut self,
        logger: &mut MetricLogger,
        samples: ArrayView2<'_, f64>,
        true_graph: ArrayView2<'_, f64>,
        tag: &str,
    ) -> ScmResult<Vec<Array2<f64>>> {
        let batch_size = samples.nrows();
        let opts = self.epoch_opts(batch_size);
        ensure_square("true graph", true_graph, self.config.total_nodes)?;

        let graph_pred = self.predict_graph(samples, self.eval.default_threshold, GraphMode::Mean)?;
        let adj_f1_pred = adjacency_f1(true_graph, graph_pred.view())?;
        let orient_f1_pred = orientation_f1(true_graph, graph_pred.view())?;
        logger.log(format!("{tag}_adj_f1_pred"), adj_f1_pred, opts);
        logger.log(format!("{tag}_orient_f1_pred"), orient_f1_pred, opts);

        let thresholds = self.eval.sweep.thresholds();
        let stacked = self.model.threshold_causal_graph(samples, &thresholds)?;
        let graphs = unbind_last(stacked.view());

        // The fixed operating point competes with the sweep, so best >= pred
        // holds even when the default threshold falls between sweep members.
        let (mut adj_f1_best, mut orient_f1_best) = (adj_f1_pred, orient_f1_pred);
        for graph in &graphs {
            adj_f1_best = adj_f1_best.max(adjacency_f1(true_graph, graph.view())?);
            orient_f1_best = orient_f1_best.max(orientation_f1(true_graph, graph.view())?);
        }
        logger.log(format!("{tag}_adj_f1_best"), adj_f1_best, opts);
        logger.log(format!("{tag}_orient_f1_best"), orient_f1_best, opts);

        Ok(graphs)
    }

    /// Log the areas under the precision-recall-gain and ROC curves traced by
    /// the swept graphs.
    pub fn log_pr_and_roc(
        &self,
        logger: &mut MetricLogger,
        true_graph: ArrayView2<'_, f64>,
        graphs: &[Array2<f64>],
        tag: &str,
    ) -> ScmResult<()> {
        let points = CurvePoints::from_graphs(true_graph, graphs.iter().map(|g| g.view()))?;
        let pi = pos_ratio(true_graph);

        match auc_precision_recall_gain(&points.precision, &points.recall, pi) {
            Some(auc) => logger.log(format!("{tag}_auc_precision_recall"), auc, LogOptions::epoch()),
            None => info!(tag, "No indices found for precision recall"),
        }

        if let Some(auc) = auc_recall_fallout(&points.fallout, &points.roc_recall) {
            logger.log(format!("{tag}_auc_recall_fallout"), auc, LogOptions::epoch());
        }
        Ok(())
    }

    fn zero_target(predicted: &Array2<f64>) -> Array2<f64> {
        Array2::zeros(predicted.raw_dim())
    }

    /// Loss of the true noise scale against zero: the value a model matching
    /// the true noise would reach.
    fn target_loss(&self, noise: ArrayView2<'_, f64>) -> ScmResult<f64> {
        let std_true_noise = column_std(noise);
        self.loss
            .compute(std_true_noise.view(), Self::zero_target(&std_true_noise).view())
    }

    pub fn training_step(
        &mut self,
        logger: &mut MetricLogger,
        batch: &ObservationalBatch,
    ) -> ScmResult<TrainingOutput> {
        self.check_batch(batch)?;
        let batch_size = batch.batch_size();
        let opts = self.synced_opts(batch_size);

        let n_hat = self.model.sample_to_noise(batch.samples.view())?;
        let zeros = Self::zero_target(&n_hat);
        let train_loss = self.loss.compute(n_hat.view(), zeros.view())?;
        let grad_noise = self.loss.gradient(n_hat.view(), zeros.view())?;
        logger.log("train_loss", train_loss, opts);

        let target_train_loss = self.target_loss(batch.noise.view())?;
        logger.log("target_train_loss", target_train_loss, opts);

        self.log_graph_metrics(
            logger,
            batch.samples.view(),
            batch.true_graph.view(),
            "train",
        )?;

        if let Some(info) = self
            .resource_sampler
            .as_mut()
            .and_then(|sampler| sampler.memory_info())
        {
            logger.log(MEMORY_KEY, info.used_gib(), opts);
        }

        debug!(train_loss, batch_size, "training step");
        Ok(TrainingOutput {
            loss: train_loss,
            predicted_noise: n_hat,
            grad_noise,
        })
    }

    /// Accumulate gradients for the model and, when learnable, the loss.
    pub fn backward(&mut self, output: &TrainingOutput) -> ScmResult<()> {
        self.model.backward(output.grad_noise.view())?;
        let zeros = Self::zero_target(&output.predicted_noise);
        self.loss
            .backward(output.predicted_noise.view(), zeros.view())
    }

    /// Apply the accumulated gradients and clear them.
    pub fn optimizer_step(&mut self, optimizer: &mut AdamW) -> ScmResult<()> {
        let mut groups = self.model.param_groups();
        groups.extend(self.loss.param_groups());
        optimizer.step(groups)?;
        self.model.zero_grad();
        self.loss.zero_grad();
        Ok(())
    }

    pub fn validation_step(
        &mut self,
        logger: &mut MetricLogger,
        batch: &ObservationalBatch,
    ) -> ScmResult<()> {
        self.check_batch(batch)?;
        let batch_size = batch.batch_size();
        let opts = self.epoch_opts(batch_size);

        let n_hat = self.model.sample_to_noise(batch.samples.view())?;
        let val_loss = self
            .loss
            .compute(n_hat.view(), Self::zero_target(&n_hat).view())?;
        logger.log("val_loss", val_loss, opts);

        let rmse_noise = mean_row_rmse(batch.noise.view(), n_hat.view());
        logger.log("val_rmse_noise_loss_std", rmse_noise, opts);

        self.log_graph_metrics(logger, batch.samples.view(), batch.true_graph.view(), "val")?;
        debug!(val_loss, batch_size, "validation step");
        Ok(())
    }

    /// Dispatch on the dataloader: observational (0) or counterfactual (1).
    pub fn test_step(&mut self, logger: &mut MetricLogger, batch: &Batch) -> ScmResult<TestReport> {
        match batch {
            Batch::Observational(b) => self.test_step_obs(logger, b).map(TestReport::Observational),
            Batch::Counterfactual(b) => self
                .test_step_cf(logger, b)
                .map(TestReport::Counterfactual),
        }
    }

    pub fn test_step_obs(
        &mut self,
        logger: &mut MetricLogger,
        batch: &ObservationalBatch,
    ) -> ScmResult<ObservationalReport> {
        self.check_batch(batch)?;
        let batch_size = batch.batch_size();
        let opts = self.epoch_opts(batch_size);

        let n_hat = self.model.sample_to_noise(batch.samples.view())?;
        let test_loss = self
            .loss
            .compute(n_hat.view(), Self::zero_target(&n_hat).view())?;
        logger.log("test_loss", test_loss, opts);

        let target_loss = self.target_loss(batch.noise.view())?;
        logger.log("target_test_loss", target_loss, opts);

        let rmse_noise = mean_row_rmse(batch.noise.view(), n_hat.view());
        logger.log("test_rmse_noise_loss_std", rmse_noise, opts);

        let x_hat = self.model.noise_to_sample(batch.noise.view())?;
        let rmse_generation = mean_row_rmse(batch.samples.view(), x_hat.view());
        logger.log("test_rmse_generation_loss_std", rmse_generation, opts);

        let graphs =
            self.log_graph_metrics(logger, batch.samples.view(), batch.true_graph.view(), "test")?;
        self.log_pr_and_roc(logger, batch.true_graph.view(), &graphs, "test")?;

        Ok(ObservationalReport {
            loss: test_loss,
            target_loss,
            rmse_noise,
            rmse_generation,
        })
    }

    pub fn test_step_cf(
        &mut self,
        logger: &mut MetricLogger,
        batch: &CounterfactualBatch,
    ) -> ScmResult<CounterfactualReport> {
        let batch_size = batch.batch_size();
        let opts = self.synced_opts(batch_size);

        // Without standardization the identity transform stands in for the
        // cached statistics, in every formula below.
        let (mean, std) = if self.standardize {
            (self.mean_data.clone(), self.std_data.clone())
        } else {
            (
                Array1::zeros(self.mean_data.raw_dim()),
                Array1::ones(self.std_data.raw_dim()),
            )
        };
        let oracle_noise = if self.standardize {
            &batch.factual_noise / &std
        } else {
            batch.factual_noise.clone()
        };

        let cf_pred_fake_noise = self.model.ite_prediction(
            batch.factual.view(),
            mean.view(),
            std.view(),
            &batch.intervention,
            None,
        )?;
        let cf_pred = self.model.ite_prediction(
            batch.factual.view(),
            mean.view(),
            std.view(),
            &batch.intervention,
            Some(oracle_noise.view()),
        )?;

        let standardized = |x: &Array2<f64>| (x - &mean) / &std;
        let cf_std = standardized(&batch.counterfactual);
        let cf_pred_std = standardized(&cf_pred);
        let cf_pred_fake_noise_std = standardized(&cf_pred_fake_noise);

        let report = CounterfactualReport {
            rmse_cf: mean_row_rmse(cf_pred.view(), batch.counterfactual.view()),
            rmse_cf_fake_noise: mean_row_rmse(cf_pred_fake_noise.view(), batch.counterfactual.view()),
            rmse_cf_std: mean_row_rmse(cf_pred_std.view(), cf_std.view()),
            rmse_cf_std_fake_noise: mean_row_rmse(cf_pred_fake_noise_std.view(), cf_std.view()),
        };

        logger.log("test_rmse_cf_loss", report.rmse_cf, opts);
        logger.log("test_rmse_cf_loss_fake_noise", report.rmse_cf_fake_noise, opts);
        logger.log("test_rmse_cf_loss_std", report.rmse_cf_std, opts);
        logger.log(
            "test_rmse_cf_loss_std_fake_noise",
            report.rmse_cf_std_fake_noise,
            opts,
        );
        debug!(
            intervention = batch.intervention.index,
            rmse_cf = report.rmse_cf,
            "counterfactual test step"
        );
        Ok(report)
    }
}
