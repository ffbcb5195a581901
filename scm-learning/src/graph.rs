//! Causal graph helpers: binarization and threshold sweeps.
//!
//! A graph is a square `Array2<f64>` over `total_nodes × total_nodes` where a
//! non-zero entry `(i, j)` means `i` causally influences `j`.

use ndarray::{Array1, Array2, Array3, ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{ScmError, ScmResult};

/// Linearly spaced cut points used to turn a continuous graph into a family of
/// binary graphs. Both ends are included.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSweep {
    #[serde(default = "default_start")]
    pub start: f64,
    #[serde(default = "default_end")]
    pub end: f64,
    #[serde(default = "default_steps")]
    pub steps: usize,
}

impl Default for ThresholdSweep {
    fn default() -> Self {
        Self {
            start: default_start(),
            end: default_end(),
            steps: default_steps(),
        }
    }
}

fn default_start() -> f64 {
    0.001
}

fn default_end() -> f64 {
    1.0
}

fn default_steps() -> usize {
    100
}

impl ThresholdSweep {
    pub fn new(start: f64, end: f64, steps: usize) -> Self {
        Self { start, end, steps }
    }

    /// The ordered cut points.
    pub fn thresholds(&self) -> Array1<f64> {
        match self.steps {
            0 => Array1::zeros(0),
            1 => Array1::from_elem(1, self.start),
            n => Array1::linspace(self.start, self.end, n),
        }
    }
}

/// Binarize a continuous graph: an edge is kept when its weight is strictly
/// above `threshold`.
pub fn binarize(graph: ArrayView2<'_, f64>, threshold: f64) -> Array2<f64> {
    graph.mapv(|w| if w > threshold { 1.0 } else { 0.0 })
}

/// Binarize a continuous graph at every threshold, stacking the results on the
/// last axis (`nodes × nodes × thresholds`).
pub fn binarize_stack(graph: ArrayView2<'_, f64>, thresholds: &Array1<f64>) -> Array3<f64> {
    let (rows, cols) = graph.dim();
    let mut stacked = Array3::zeros((rows, cols, thresholds.len()));
    for (mut slice, &t) in stacked.axis_iter_mut(Axis(2)).zip(thresholds.iter()) {
        slice.assign(&binarize(graph, t));
    }
    stacked
}

/// Split a stacked family back into one graph per threshold.
pub fn unbind_last(stacked: ArrayView3<'_, f64>) -> Vec<Array2<f64>> {
    stacked
        .axis_iter(Axis(2))
        .map(|graph| graph.to_owned())
        .collect()
}

/// Number of directed off-diagonal edges.
pub fn edge_count(graph: ArrayView2<'_, f64>) -> usize {
    graph
        .indexed_iter()
        .filter(|((i, j), w)| i != j && **w != 0.0)
        .count()
}

/// Fail unless `graph` is `nodes × nodes`.
pub fn ensure_square(what: &str, graph: ArrayView2<'_, f64>, nodes: usize) -> ScmResult<()> {
    let (rows, cols) = graph.dim();
    if rows != nodes || cols != nodes {
        return Err(ScmError::shape(what, &[nodes, nodes], &[rows, cols]));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_default_sweep() {
        let t = ThresholdSweep::default().thresholds();
        assert_eq!(t.len(), 100);
        assert!((t[0] - 0.001).abs() < 1e-12);
        assert!((t[99] - 1.0).abs() < 1e-12);
        assert!(t.windows(2).into_iter().all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_binarize_is_strict() {
        let g = array![[0.0, 0.1], [0.2, 0.05]];
        assert_eq!(binarize(g.view(), 0.1), array![[0.0, 0.0], [1.0, 0.0]]);
    }

    #[test]
    fn test_stack_and_unbind() {
        let g = array![[0.0, 0.5], [0.3, 0.0]];
        let thresholds = array![0.1, 0.4, 0.9];
        let stacked = binarize_stack(g.view(), &thresholds);
        assert_eq!(stacked.dim(), (2, 2, 3));

        let graphs = unbind_last(stacked.view());
        assert_eq!(graphs.len(), 3);
        assert_eq!(edge_count(graphs[0].view()), 2);
        assert_eq!(edge_count(graphs[1].view()), 1);
        assert_eq!(edge_count(graphs[2].view()), 0);
    }

    #[test]
    fn test_edge_count_ignores_diagonal() {
        let g = array![[1.0, 1.0], [0.0, 1.0]];
        assert_eq!(edge_count(g.view()), 1);
    }

    #[test]
    fn test_ensure_square() {
        let g = Array2::<f64>::zeros((3, 2));
        assert!(ensure_square("graph", g.view(), 3).is_err());
        assert!(ensure_square("graph", Array2::<f64>::zeros((3, 3)).view(), 3).is_ok());
    }
}
