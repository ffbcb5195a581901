//! Structural metrics between a true and a predicted causal graph.
//!
//! Both graphs are compared entry by entry over the full `n × n` matrix, where
//! a non-zero `(i, j)` means `i` causes `j`. Orientation metrics count a
//! predicted entry as correct when the same entry is set in the true graph.
//! Adjacency metrics ignore direction: a predicted `(i, j)` also covers a true
//! `(j, i)` that the prediction does not already contain.

use ndarray::ArrayView2;

use crate::error::{ScmError, ScmResult};

/// Ratio that treats `0 / 0` as zero.
fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

fn f1(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct EntryCounts {
    /// Predicted entries also set in the true graph.
    oriented: usize,
    /// Predicted entries that cover a true edge in either direction.
    adjacent: usize,
    predicted: usize,
    actual: usize,
    false_positive: usize,
    actual_negative: usize,
}

fn count_entries(
    true_graph: ArrayView2<'_, f64>,
    pred_graph: ArrayView2<'_, f64>,
) -> ScmResult<EntryCounts> {
    let (rows, cols) = true_graph.dim();
    if rows != cols {
        return Err(ScmError::shape("true graph", &[rows, rows], &[rows, cols]));
    }
    if pred_graph.dim() != (rows, cols) {
        let (pr, pc) = pred_graph.dim();
        return Err(ScmError::shape("predicted graph", &[rows, cols], &[pr, pc]));
    }

    let mut counts = EntryCounts::default();
    for ((i, j), &t) in true_graph.indexed_iter() {
        let t = t != 0.0;
        let p = pred_graph[[i, j]] != 0.0;
        if p {
            counts.predicted += 1;
            if t {
                counts.oriented += 1;
                counts.adjacent += 1;
            } else if true_graph[[j, i]] != 0.0 && pred_graph[[j, i]] == 0.0 {
                counts.adjacent += 1;
            }
        }
        if t {
            counts.actual += 1;
        } else {
            counts.actual_negative += 1;
            if p {
                counts.false_positive += 1;
            }
        }
    }
    Ok(counts)
}

/// Adjacency `(precision, recall)`, ignoring edge direction.
pub fn adjacency_precision_recall(
    true_graph: ArrayView2<'_, f64>,
    pred_graph: ArrayView2<'_, f64>,
) -> ScmResult<(f64, f64)> {
    let c = count_entries(true_graph, pred_graph)?;
    Ok((ratio(c.adjacent, c.predicted), ratio(c.adjacent, c.actual)))
}

/// F1 score of the undirected skeletons.
pub fn adjacency_f1(
    true_graph: ArrayView2<'_, f64>,
    pred_graph: ArrayView2<'_, f64>,
) -> ScmResult<f64> {
    let (precision, recall) = adjacency_precision_recall(true_graph, pred_graph)?;
    Ok(f1(precision, recall))
}

/// Orientation `(precision, recall)`: `|T ∧ P| / |P|` and `|T ∧ P| / |T|`.
pub fn orientation_precision_recall(
    true_graph: ArrayView2<'_, f64>,
    pred_graph: ArrayView2<'_, f64>,
) -> ScmResult<(f64, f64)> {
    let c = count_entries(true_graph, pred_graph)?;
    Ok((ratio(c.oriented, c.predicted), ratio(c.oriented, c.actual)))
}

/// F1 score requiring the correct edge direction.
pub fn orientation_f1(
    true_graph: ArrayView2<'_, f64>,
    pred_graph: ArrayView2<'_, f64>,
) -> ScmResult<f64> {
    let (precision, recall) = orientation_precision_recall(true_graph, pred_graph)?;
    Ok(f1(precision, recall))
}

/// Orientation `(fallout, recall)`, where fallout `|¬T ∧ P| / |¬T|` is the
/// share of absent true entries that the prediction sets.
pub fn orientation_fallout_recall(
    true_graph: ArrayView2<'_, f64>,
    pred_graph: ArrayView2<'_, f64>,
) -> ScmResult<(f64, f64)> {
    let c = count_entries(true_graph, pred_graph)?;
    Ok((
        ratio(c.false_positive, c.actual_negative),
        ratio(c.oriented, c.actual),
    ))
}
