//! Batches handed to the task's step methods.

use ndarray::Array2;

use crate::model::Intervention;

/// Observational samples with the noise that generated them.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationalBatch {
    /// `batch × nodes`
    pub samples: Array2<f64>,
    /// `batch × nodes`
    pub noise: Array2<f64>,
    /// `nodes × nodes`
    pub true_graph: Array2<f64>,
}

impl ObservationalBatch {
    pub fn batch_size(&self) -> usize {
        self.samples.nrows()
    }
}

/// Factual samples, their noise, and the known outcome of one intervention.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterfactualBatch {
    pub factual: Array2<f64>,
    pub factual_noise: Array2<f64>,
    pub counterfactual: Array2<f64>,
    pub intervention: Intervention,
}

impl CounterfactualBatch {
    pub fn batch_size(&self) -> usize {
        self.factual.nrows()
    }
}

/// A test batch, tagged by the dataloader it comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum Batch {
    Observational(ObservationalBatch),
    Counterfactual(CounterfactualBatch),
}

impl Batch {
    /// `0` for observational, `1` for counterfactual batches.
    pub fn dataloader_idx(&self) -> usize {
        match self {
            Self::Observational(_) => 0,
            Self::Counterfactual(_) => 1,
        }
    }

    pub fn batch_size(&self) -> usize {
        match self {
            Self::Observational(b) => b.batch_size(),
            Self::Counterfactual(b) => b.batch_size(),
        }
    }
}
