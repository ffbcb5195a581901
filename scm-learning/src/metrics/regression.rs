//! Sample-wise regression metrics over `batch × features` arrays.

use ndarray::{Array2, ArrayView2, Axis};

/// Root-mean-square error of each row, averaged over the batch:
/// `mean_b sqrt(mean_d (a - b)²)`.
pub fn mean_row_rmse(a: ArrayView2<'_, f64>, b: ArrayView2<'_, f64>) -> f64 {
    let diff = &a - &b;
    let per_sample = diff
        .mapv(|d| d * d)
        .mean_axis(Axis(1))
        .map(|mse| mse.mapv(f64::sqrt));
    per_sample
        .and_then(|rmse| rmse.mean())
        .unwrap_or(f64::NAN)
}

/// Unbiased standard deviation over the batch axis, kept as a `1 × features`
/// row.
pub fn column_std(x: ArrayView2<'_, f64>) -> Array2<f64> {
    x.std_axis(Axis(0), 1.0).insert_axis(Axis(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_mean_row_rmse() {
        let a = array![[1.0, 1.0], [0.0, 0.0]];
        let b = array![[0.0, 0.0], [0.0, 2.0]];
        // row 0: sqrt(1) = 1, row 1: sqrt(4 / 2)
        let expected = (1.0 + 2.0_f64.sqrt()) / 2.0;
        assert!((mean_row_rmse(a.view(), b.view()) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_identical_inputs() {
        let a = array![[0.3, -1.2, 4.0]];
        assert_eq!(mean_row_rmse(a.view(), a.view()), 0.0);
    }

    #[test]
    fn test_column_std_is_unbiased() {
        let x = array![[1.0, 0.0], [3.0, 0.0]];
        let std = column_std(x.view());
        assert_eq!(std.dim(), (1, 2));
        assert!((std[[0, 0]] - 2.0_f64.sqrt()).abs() < 1e-12);
        assert_eq!(std[[0, 1]], 0.0);
    }
}
