use nalgebra::{DMatrix, DVector};
use ordered_float::OrderedFloat;
use crate::error::{MapError, Result};

/// Fitted principal component model.
#[derive(Clone, Debug)]
pub struct PcaModel {
    /// column means removed before the decomposition
    pub mean: DVector<f64>,
    /// `[n_components x n_features]`, one unit-length loading vector per row
    pub components: DMatrix<f64>,
    pub explained_variance: Vec<f64>,
    pub explained_variance_ratio: Vec<f64>,
}

impl PcaModel {
    /// Projects rows of `data` onto the components after removing the fitted mean.
    pub fn transform(&self, data: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        if data.ncols() != self.mean.len() {
            return Err(MapError::ShapeMismatch {
                context: "pca feature count",
                expected: self.mean.len(),
                actual: data.ncols(),
            });
        }
        let centered = center(data, &self.mean);
        Ok(centered * self.components.transpose())
    }
}

/// Column means of `data`; zero-row input gives zeros.
pub fn column_means(data: &DMatrix<f64>) -> DVector<f64> {
    if data.nrows() == 0 {
        return DVector::zeros(data.ncols());
    }
    DVector::from_iterator(data.ncols(), data.column_iter().map(|c| c.mean()))
}

fn center(data: &DMatrix<f64>, mean: &DVector<f64>) -> DMatrix<f64> {
    let mut centered = data.clone();
    for (mut col, m) in centered.column_iter_mut().zip(mean.iter()) {
        col.add_scalar_mut(-m);
    }
    centered
}

/// Principal component analysis by singular value decomposition.
///
/// The data is mean-centered but not variance-scaled. Each component's sign is
/// fixed so that its largest-magnitude loading is positive.
///
/// # Errors
///
/// * `EmptyDataset` - no rows
/// * `InvalidParameter` - `n_components` is zero or exceeds `min(n_rows, n_features)`
pub fn fit(data: &DMatrix<f64>, n_components: usize) -> Result<PcaModel> {
    let (n, p) = data.shape();
    if n == 0 || p == 0 {
        return Err(MapError::EmptyDataset);
    }
    if n_components == 0 || n_components > n.min(p) {
        return Err(MapError::InvalidParameter {
            name: "n_components",
            reason: format!("must be between 1 and {}, got {}", n.min(p), n_components),
        });
    }

    let mean = column_means(data);
    let centered = center(data, &mean);
    let svd = centered.svd(false, true);
    let v_t = svd.v_t.ok_or(MapError::NotReady("right singular vectors"))?;
    let singular = svd.singular_values;

    let mut order: Vec<usize> = (0..singular.len()).collect();
    order.sort_by_key(|&i| (std::cmp::Reverse(OrderedFloat(singular[i])), i));

    let dof = (n.max(2) - 1) as f64;
    let total_variance: f64 = singular.iter().map(|s| s * s / dof).sum();

    let mut components = DMatrix::<f64>::zeros(n_components, p);
    let mut explained_variance = Vec::with_capacity(n_components);
    for (row, &i) in order.iter().take(n_components).enumerate() {
        let loading = v_t.row(i);
        let pivot = loading
            .iter()
            .copied()
            .max_by_key(|v| OrderedFloat(v.abs()))
            .unwrap_or(0.0);
        let sign = if pivot < 0.0 { -1.0 } else { 1.0 };
        for c in 0..p {
            components[(row, c)] = sign * loading[c];
        }
        explained_variance.push(singular[i] * singular[i] / dof);
    }

    let explained_variance_ratio = explained_variance
        .iter()
        .map(|v| if total_variance > 0.0 { v / total_variance } else { 0.0 })
        .collect();

    Ok(PcaModel { mean, components, explained_variance, explained_variance_ratio })
}
