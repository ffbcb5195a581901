//! Data sources, datasets and batches.

pub mod batch;
pub mod file;
pub mod source;

pub use batch::{Batch, CounterfactualBatch, ObservationalBatch};
pub use file::{DataFile, array_to_rows, rows_to_array};
pub use source::{CounterfactualSet, DataSource, TensorDataModule, TensorDataset};
