//! Data source abstraction and the in-memory tensor data module.

use ndarray::{Array1, Array2, Axis};

use super::batch::{CounterfactualBatch, ObservationalBatch};
use crate::error::{ScmError, ScmResult};
use crate::graph::ensure_square;
use crate::model::Intervention;

/// Anything the trainer can hand to a task at bind time.
pub trait DataSource: Send + Sync {
    /// Human-readable kind, used in error messages.
    fn kind(&self) -> &'static str;

    /// Downcast to the tensor data module the task requires.
    fn as_tensor_module(&self) -> Option<&TensorDataModule> {
        None
    }
}

/// Samples and noise of one split, with the statistics of the training data.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorDataset {
    /// `rows × nodes`
    pub samples: Array2<f64>,
    /// `rows × nodes`
    pub noise: Array2<f64>,
    /// Per-feature mean used for standardization.
    pub mean_data: Array1<f64>,
    /// Per-feature standard deviation used for standardization.
    pub std_data: Array1<f64>,
    pub true_graph: Option<Array2<f64>>,
}

impl TensorDataset {
    pub fn new(samples: Array2<f64>, noise: Array2<f64>) -> ScmResult<Self> {
        if samples.dim() != noise.dim() {
            let (r, c) = samples.dim();
            let (nr, nc) = noise.dim();
            return Err(ScmError::shape("noise", &[r, c], &[nr, nc]));
        }
        let nodes = samples.ncols();
        Ok(Self {
            samples,
            noise,
            mean_data: Array1::zeros(nodes),
            std_data: Array1::ones(nodes),
            true_graph: None,
        })
    }

    pub fn with_stats(mut self, mean_data: Array1<f64>, std_data: Array1<f64>) -> ScmResult<Self> {
        let nodes = self.nodes();
        if mean_data.len() != nodes || std_data.len() != nodes {
            return Err(ScmError::shape(
                "mean/std",
                &[nodes, nodes],
                &[mean_data.len(), std_data.len()],
            ));
        }
        if std_data.iter().any(|s| *s <= 0.0) {
            return Err(ScmError::dataset("std_data must be strictly positive"));
        }
        self.mean_data = mean_data;
        self.std_data = std_data;
        Ok(self)
    }

    pub fn with_true_graph(mut self, true_graph: Array2<f64>) -> ScmResult<Self> {
        ensure_square("true graph", true_graph.view(), self.nodes())?;
        self.true_graph = Some(true_graph);
        Ok(self)
    }

    pub fn nodes(&self) -> usize {
        self.samples.ncols()
    }

    pub fn len(&self) -> usize {
        self.samples.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.nrows() == 0
    }

    /// Consecutive batches of at most `batch_size` rows, each carrying
    /// `true_graph`. A `batch_size` of zero yields one batch.
    pub fn batches(&self, batch_size: usize, true_graph: &Array2<f64>) -> Vec<ObservationalBatch> {
        let size = effective_batch_size(batch_size, self.len());
        self.samples
            .axis_chunks_iter(Axis(0), size)
            .zip(self.noise.axis_chunks_iter(Axis(0), size))
            .map(|(samples, noise)| ObservationalBatch {
                samples: samples.to_owned(),
                noise: noise.to_owned(),
                true_graph: true_graph.clone(),
            })
            .collect()
    }
}

fn effective_batch_size(batch_size: usize, rows: usize) -> usize {
    if batch_size == 0 { rows.max(1) } else { batch_size }
}

/// Factual/counterfactual pairs for a single intervened node.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterfactualSet {
    pub factual: Array2<f64>,
    pub factual_noise: Array2<f64>,
    pub counterfactual: Array2<f64>,
    pub intervention_index: usize,
    /// One value per row, or a single shared value.
    pub intervention_values: Array1<f64>,
}

impl CounterfactualSet {
    pub fn validate(&self, nodes: usize) -> ScmResult<()> {
        let rows = self.factual.nrows();
        for (what, arr) in [
            ("factual", &self.factual),
            ("factual noise", &self.factual_noise),
            ("counterfactual", &self.counterfactual),
        ] {
            if arr.dim() != (rows, nodes) {
                let (r, c) = arr.dim();
                return Err(ScmError::shape(what, &[rows, nodes], &[r, c]));
            }
        }
        if self.intervention_index >= nodes {
            return Err(ScmError::dataset(format!(
                "intervention index {} out of range for {nodes} nodes",
                self.intervention_index
            )));
        }
        let values = self.intervention_values.len();
        if values != 1 && values != rows {
            return Err(ScmError::shape("intervention values", &[rows], &[values]));
        }
        Ok(())
    }

    pub fn batches(&self, batch_size: usize) -> Vec<CounterfactualBatch> {
        let rows = self.factual.nrows();
        let size = effective_batch_size(batch_size, rows);
        let shared = self.intervention_values.len() == 1;
        (0..rows)
            .step_by(size)
            .map(|start| {
                let end = (start + size).min(rows);
                let values = if shared {
                    self.intervention_values.clone()
                } else {
                    self.intervention_values
                        .slice(ndarray::s![start..end])
                        .to_owned()
                };
                CounterfactualBatch {
                    factual: self.factual.slice(ndarray::s![start..end, ..]).to_owned(),
                    factual_noise: self
                        .factual_noise
                        .slice(ndarray::s![start..end, ..])
                        .to_owned(),
                    counterfactual: self
                        .counterfactual
                        .slice(ndarray::s![start..end, ..])
                        .to_owned(),
                    intervention: Intervention::new(self.intervention_index, values),
                }
            })
            .collect()
    }
}

/// In-memory data module: train/val/test splits plus counterfactual sets.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorDataModule {
    /// Whether samples are standardized with the training statistics.
    pub standardize: bool,
    pub train_data: TensorDataset,
    pub val_data: Option<TensorDataset>,
    pub test_data: Option<TensorDataset>,
    pub counterfactual_data: Vec<CounterfactualSet>,
    pub batch_size: usize,
}

impl TensorDataModule {
    pub fn new(train_data: TensorDataset, standardize: bool) -> Self {
        Self {
            standardize,
            train_data,
            val_data: None,
            test_data: None,
            counterfactual_data: Vec::new(),
            batch_size: 0,
        }
    }

    pub fn nodes(&self) -> usize {
        self.train_data.nodes()
    }

    fn true_graph(&self) -> ScmResult<&Array2<f64>> {
        self.train_data
            .true_graph
            .as_ref()
            .ok_or(ScmError::MissingTrueGraph)
    }

    pub fn train_batches(&self) -> ScmResult<Vec<ObservationalBatch>> {
        Ok(self.train_data.batches(self.batch_size, self.true_graph()?))
    }

    pub fn val_batches(&self) -> ScmResult<Vec<ObservationalBatch>> {
        let graph = self.true_graph()?;
        Ok(self
            .val_data
            .as_ref()
            .map(|d| d.batches(self.batch_size, graph))
            .unwrap_or_default())
    }

    pub fn test_batches(&self) -> ScmResult<Vec<ObservationalBatch>> {
        let graph = self.true_graph()?;
        Ok(self
            .test_data
            .as_ref()
            .map(|d| d.batches(self.batch_size, graph))
            .unwrap_or_default())
    }

    pub fn counterfactual_batches(&self) -> Vec<CounterfactualBatch> {
        self.counterfactual_data
            .iter()
            .flat_map(|set| set.batches(self.batch_size))
            .collect()
    }
}

impl DataSource for TensorDataModule {
    fn kind(&self) -> &'static str {
        "TensorDataModule"
    }

    fn as_tensor_module(&self) -> Option<&TensorDataModule> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn dataset(rows: usize) -> TensorDataset {
        let samples = Array2::from_shape_fn((rows, 2), |(i, j)| (i * 2 + j) as f64);
        TensorDataset::new(samples.clone(), samples)
            .unwrap()
            .with_true_graph(array![[0.0, 1.0], [0.0, 0.0]])
            .unwrap()
    }

    #[test]
    fn test_batches_cover_all_rows() {
        let mut module = TensorDataModule::new(dataset(5), false);
        module.batch_size = 2;
        let batches = module.train_batches().unwrap();
        assert_eq!(
            batches.iter().map(|b| b.batch_size()).collect::<Vec<_>>(),
            vec![2, 2, 1]
        );
        assert_eq!(batches[2].samples, array![[8.0, 9.0]]);
    }

    #[test]
    fn test_zero_batch_size_is_one_batch() {
        let module = TensorDataModule::new(dataset(5), false);
        assert_eq!(module.train_batches().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_true_graph() {
        let samples = Array2::zeros((2, 2));
        let ds = TensorDataset::new(samples.clone(), samples).unwrap();
        let module = TensorDataModule::new(ds, false);
        assert!(matches!(
            module.train_batches(),
            Err(ScmError::MissingTrueGraph)
        ));
    }

    #[test]
    fn test_stats_must_be_positive() {
        let ds = dataset(2);
        assert!(
            ds.with_stats(array![0.0, 0.0], array![1.0, 0.0])
                .is_err()
        );
    }

    #[test]
    fn test_counterfactual_batches_split_values() {
        let set = CounterfactualSet {
            factual: Array2::zeros((3, 2)),
            factual_noise: Array2::zeros((3, 2)),
            counterfactual: Array2::zeros((3, 2)),
            intervention_index: 1,
            intervention_values: array![1.0, 2.0, 3.0],
        };
        set.validate(2).unwrap();
        let batches = set.batches(2);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].intervention.values, array![3.0]);
        assert_eq!(batches[1].intervention.index, 1);
    }

    #[test]
    fn test_counterfactual_validation() {
        let set = CounterfactualSet {
            factual: Array2::zeros((3, 2)),
            factual_noise: Array2::zeros((3, 2)),
            counterfactual: Array2::zeros((2, 2)),
            intervention_index: 0,
            intervention_values: array![1.0],
        };
        assert!(set.validate(2).is_err());
    }
}
