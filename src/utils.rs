//! Distance helpers

use ndarray::{Array1, Array2, Axis};

use crate::error::{NnError, Result};

fn check_same_shape(x: &Array2<f64>, y: &Array2<f64>) -> Result<()> {
    if x.dim() != y.dim() {
        return Err(NnError::shape("distance", x.shape(), y.shape()));
    }
    Ok(())
}

/// Column-wise Euclidean distance: `sqrt(sum((x - y)^2, axis 0))`
pub fn euclidean(x: &Array2<f64>, y: &Array2<f64>) -> Result<Array1<f64>> {
    check_same_shape(x, y)?;
    let diff = x - y;
    Ok(diff.mapv(|d| d * d).sum_axis(Axis(0)).mapv(f64::sqrt))
}

/// Elementwise absolute difference
pub fn manhattan(x: &Array2<f64>, y: &Array2<f64>) -> Result<Array2<f64>> {
    check_same_shape(x, y)?;
    Ok((x - y).mapv(f64::abs))
}
