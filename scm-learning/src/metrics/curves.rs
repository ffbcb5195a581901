//! Threshold-independent curve summaries: area under the precision-recall-gain
//! curve and area under the ROC (recall vs fallout) curve.

use std::cmp::Ordering;

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use super::graph::{orientation_fallout_recall, orientation_precision_recall};
use crate::error::ScmResult;

/// A gain curve is integrated only when the number of kept points reaches
/// this value.
pub const MIN_VALID_POINTS: f64 = 0.5;

/// Precision/recall and fallout/recall pairs, one entry per binarized graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurvePoints {
    pub precision: Vec<f64>,
    pub recall: Vec<f64>,
    pub fallout: Vec<f64>,
    pub roc_recall: Vec<f64>,
}

impl CurvePoints {
    /// Evaluate every graph of a threshold family against the true graph.
    pub fn from_graphs<'a, I>(true_graph: ArrayView2<'_, f64>, graphs: I) -> ScmResult<Self>
    where
        I: IntoIterator<Item = ArrayView2<'a, f64>>,
    {
        let mut points = Self::default();
        for graph in graphs {
            let (precision, recall) = orientation_precision_recall(true_graph, graph)?;
            let (fallout, roc_recall) = orientation_fallout_recall(true_graph, graph)?;
            points.precision.push(precision);
            points.recall.push(recall);
            points.fallout.push(fallout);
            points.roc_recall.push(roc_recall);
        }
        Ok(points)
    }

    pub fn len(&self) -> usize {
        self.precision.len()
    }

    pub fn is_empty(&self) -> bool {
        self.precision.is_empty()
    }
}

/// Share of positive entries in the true graph, `sum(graph) / n²`.
pub fn pos_ratio(true_graph: ArrayView2<'_, f64>) -> f64 {
    let n = true_graph.nrows();
    true_graph.sum() / (n * n) as f64
}

/// Base-rate corrected gain, `(v - π) / ((1 - π) · v)`.
///
/// No guard is applied: `v = 0` gives `±inf` or NaN, which the curve filter
/// drops. With `π = 0` the gain is `1` for any positive `v`.
pub fn gain(value: f64, pos_ratio: f64) -> f64 {
    (value - pos_ratio) / ((1.0 - pos_ratio) * value)
}

/// Stable ascending argsort under [`f64::total_cmp`].
pub fn argsort(values: &[f64]) -> Vec<usize> {
    argsort_by(values, |_, _| Ordering::Equal)
}

/// Stable ascending argsort of `keys`, with equal keys ordered by `tie`.
pub fn argsort_by(keys: &[f64], tie: impl Fn(usize, usize) -> Ordering) -> Vec<usize> {
    let mut index: Vec<usize> = (0..keys.len()).collect();
    index.sort_by(|&a, &b| keys[a].total_cmp(&keys[b]).then_with(|| tie(a, b)));
    index
}

/// Trapezoidal integral of `y` over `x`, in the order given.
pub fn trapezoid(y: &[f64], x: &[f64]) -> f64 {
    debug_assert_eq!(y.len(), x.len());
    y.windows(2)
        .zip(x.windows(2))
        .map(|(yw, xw)| (xw[1] - xw[0]) * (yw[0] + yw[1]) / 2.0)
        .sum()
}

fn in_unit_interval(v: f64) -> bool {
    (0.0..=1.0).contains(&v)
}

/// Points of the precision-recall-gain curve that survive filtering, sorted by
/// recall gain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GainCurve {
    pub recall_gain: Vec<f64>,
    pub precision_gain: Vec<f64>,
}

impl GainCurve {
    /// Gain-transform, sort by recall gain and keep the points where both
    /// gains lie in `[0, 1]`. Points sharing a recall gain are ordered by
    /// descending precision gain.
    ///
    /// Slices of different lengths do not describe a curve and give an empty
    /// one.
    pub fn build(precision: &[f64], recall: &[f64], pos_ratio: f64) -> Self {
        let mut curve = Self::default();
        if precision.len() != recall.len() {
            return curve;
        }
        let precision_gain: Vec<f64> = precision.iter().map(|&p| gain(p, pos_ratio)).collect();
        let recall_gain: Vec<f64> = recall.iter().map(|&r| gain(r, pos_ratio)).collect();

        let order = argsort_by(&recall_gain, |a, b| {
            precision_gain[b].total_cmp(&precision_gain[a])
        });
        for i in order {
            let (rg, pg) = (recall_gain[i], precision_gain[i]);
            if in_unit_interval(rg) && in_unit_interval(pg) {
                curve.recall_gain.push(rg);
                curve.precision_gain.push(pg);
            }
        }
        curve
    }

    pub fn len(&self) -> usize {
        self.recall_gain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recall_gain.is_empty()
    }

    /// Area under the padded curve, or `None` when too few points were kept.
    ///
    /// The curve is padded with `(0, first precision gain)` and `(1, 0)`.
    pub fn auc(&self) -> Option<f64> {
        if (self.len() as f64) < MIN_VALID_POINTS {
            return None;
        }
        let first_precision = self.precision_gain[0];

        let mut x = Vec::with_capacity(self.len() + 2);
        x.push(0.0);
        x.extend_from_slice(&self.recall_gain);
        x.push(1.0);

        let mut y = Vec::with_capacity(self.len() + 2);
        y.push(first_precision);
        y.extend_from_slice(&self.precision_gain);
        y.push(0.0);

        Some(trapezoid(&y, &x))
    }
}

/// Area under the precision-recall-gain curve.
pub fn auc_precision_recall_gain(precision: &[f64], recall: &[f64], pos_ratio: f64) -> Option<f64> {
    GainCurve::build(precision, recall, pos_ratio).auc()
}

/// Area under the recall-vs-fallout curve.
///
/// Points are sorted by fallout, then recall, and padded with `(0, 0)` and
/// `(1, 1)`. Returns `None` when every fallout is zero or the slices differ in
/// length.
pub fn auc_recall_fallout(fallout: &[f64], recall: &[f64]) -> Option<f64> {
    if fallout.len() != recall.len() {
        return None;
    }
    let order = argsort_by(fallout, |a, b| recall[a].total_cmp(&recall[b]));
    let fallout_sorted: Vec<f64> = order.iter().map(|&i| fallout[i]).collect();
    let recall_sorted: Vec<f64> = order.iter().map(|&i| recall[i]).collect();

    if fallout_sorted.iter().sum::<f64>() <= 0.0 {
        return None;
    }

    let mut x = Vec::with_capacity(fallout_sorted.len() + 2);
    x.push(0.0);
    x.extend(fallout_sorted);
    x.push(1.0);

    let mut y = Vec::with_capacity(recall_sorted.len() + 2);
    y.push(0.0);
    y.extend(recall_sorted);
    y.push(1.0);

    Some(trapezoid(&y, &x))
}
