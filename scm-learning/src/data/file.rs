//! JSON dataset format.
//!
//! Matrices are stored as arrays of rows so files stay readable and easy to
//! produce from other tools.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::source::{CounterfactualSet, TensorDataModule, TensorDataset};
use crate::error::{ScmError, ScmResult};

pub type Rows = Vec<Vec<f64>>;

/// Samples and noise of one observational split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitFile {
    pub samples: Rows,
    pub noise: Rows,
}

/// One intervention with its factual and counterfactual rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterfactualFile {
    pub intervention_index: usize,
    pub intervention_values: Vec<f64>,
    pub factual: Rows,
    pub factual_noise: Rows,
    pub counterfactual: Rows,
}

/// On-disk dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataFile {
    #[serde(default)]
    pub standardize: bool,
    pub true_graph: Option<Rows>,
    #[serde(default)]
    pub mean_data: Option<Vec<f64>>,
    #[serde(default)]
    pub std_data: Option<Vec<f64>>,
    pub train: SplitFile,
    #[serde(default)]
    pub val: Option<SplitFile>,
    #[serde(default)]
    pub test: Option<SplitFile>,
    #[serde(default)]
    pub counterfactual: Vec<CounterfactualFile>,
}

pub fn rows_to_array(what: &str, rows: &Rows) -> ScmResult<Array2<f64>> {
    let ncols = rows.first().map(Vec::len).unwrap_or(0);
    if let Some(bad) = rows.iter().find(|r| r.len() != ncols) {
        return Err(ScmError::shape(what, &[ncols], &[bad.len()]));
    }
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((rows.len(), ncols), flat)
        .map_err(|e| ScmError::dataset(format!("{what}: {e}")))
}

pub fn array_to_rows(array: &Array2<f64>) -> Rows {
    array.outer_iter().map(|row| row.to_vec()).collect()
}

impl DataFile {
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

    fn split(&self, split: &SplitFile, name: &str) -> ScmResult<TensorDataset> {
        let samples = rows_to_array(&format!("{name}.samples"), &split.samples)?;
        let noise = rows_to_array(&format!("{name}.noise"), &split.noise)?;
        let nodes = samples.ncols();
        let mut dataset = TensorDataset::new(samples, noise)?;

        match (&self.mean_data, &self.std_data) {
            (Some(mean), Some(std)) => {
                dataset = dataset.with_stats(Array1::from(mean.clone()), Array1::from(std.clone()))?;
            }
            (None, None) if self.standardize => {
                return Err(ScmError::dataset(
                    "standardize is set but mean_data/std_data are missing",
                ));
            }
            (None, None) => {}
            _ => {
                return Err(ScmError::dataset(
                    "mean_data and std_data must be given together",
                ));
            }
        }

        if let Some(graph) = &self.true_graph {
            let graph = rows_to_array("true_graph", graph)?;
            if graph.dim() != (nodes, nodes) {
                let (r, c) = graph.dim();
                return Err(ScmError::shape("true_graph", &[nodes, nodes], &[r, c]));
            }
            dataset = dataset.with_true_graph(graph)?;
        }
        Ok(dataset)
    }

    /// Build the in-memory module, validating every shape.
    pub fn into_module(self, batch_size: usize) -> ScmResult<TensorDataModule> {
        let train = self.split(&self.train, "train")?;
        let nodes = train.nodes();
        let mut module = TensorDataModule::new(train, self.standardize);
        module.batch_size = batch_size;
        module.val_data = self
            .val
            .as_ref()
            .map(|s| self.split(s, "val"))
            .transpose()?;
        module.test_data = self
            .test
            .as_ref()
            .map(|s| self.split(s, "test"))
            .transpose()?;

        for (i, cf) in self.counterfactual.iter().enumerate() {
            let set = CounterfactualSet {
                factual: rows_to_array(&format!("counterfactual[{i}].factual"), &cf.factual)?,
                factual_noise: rows_to_array(
                    &format!("counterfactual[{i}].factual_noise"),
                    &cf.factual_noise,
                )?,
                counterfactual: rows_to_array(
                    &format!("counterfactual[{i}].counterfactual"),
                    &cf.counterfactual,
                )?,
                intervention_index: cf.intervention_index,
                intervention_values: Array1::from(cf.intervention_values.clone()),
            };
            set.validate(nodes)?;
            module.counterfactual_data.push(set);
        }
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn file() -> DataFile {
        DataFile {
            standardize: false,
            true_graph: Some(vec![vec![0.0, 1.0], vec![0.0, 0.0]]),
            mean_data: None,
            std_data: None,
            train: SplitFile {
                samples: vec![vec![1.0, 2.0], vec![3.0, 4.0]],
                noise: vec![vec![1.0, 1.0], vec![3.0, 1.0]],
            },
            val: None,
            test: None,
            counterfactual: vec![CounterfactualFile {
                intervention_index: 0,
                intervention_values: vec![5.0],
                factual: vec![vec![1.0, 2.0]],
                factual_noise: vec![vec![1.0, 1.0]],
                counterfactual: vec![vec![5.0, 6.0]],
            }],
        }
    }

    #[test]
    fn test_into_module() {
        let module = file().into_module(1).unwrap();
        assert_eq!(module.nodes(), 2);
        assert_eq!(module.train_data.samples, array![[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(module.train_data.std_data, array![1.0, 1.0]);
        assert_eq!(module.train_batches().unwrap().len(), 2);
        assert_eq!(module.counterfactual_batches().len(), 1);
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let mut f = file();
        f.train.samples[1].push(9.0);
        assert!(f.into_module(0).is_err());
    }

    #[test]
    fn test_standardize_requires_stats() {
        let mut f = file();
        f.standardize = true;
        assert!(matches!(f.into_module(0), Err(ScmError::Dataset(_))));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        file().save(&path).unwrap();
        let loaded = DataFile::load(&path).unwrap();
        assert_eq!(loaded.counterfactual[0].counterfactual, vec![vec![5.0, 6.0]]);
    }

    #[test]
    fn test_array_rows() {
        let a = array![[1.0, 2.0], [3.0, 4.0]];
        assert_eq!(rows_to_array("a", &array_to_rows(&a)).unwrap(), a);
    }
}
