use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use crate::error::{MapError, Result};

const EPSILON: f64 = 1e-10;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NmfParams {
    pub n_components: usize,
    pub max_iter: usize,
    /// stop once the relative drop of the reconstruction error falls below this
    pub tol: f64,
    pub seed: u64,
}

impl NmfParams {
    pub fn new(n_components: usize) -> Self {
        NmfParams { n_components, ..Default::default() }
    }
}

impl Default for NmfParams {
    fn default() -> Self {
        NmfParams { n_components: 4, max_iter: 200, tol: 1e-4, seed: 0 }
    }
}

/// `data ≈ scores * components`, both factors non-negative.
#[derive(Clone, Debug)]
pub struct NmfModel {
    /// `[n_components x n_features]`
    pub components: DMatrix<f64>,
    /// `[n_rows x n_components]`
    pub scores: DMatrix<f64>,
    pub reconstruction_error: f64,
    pub n_iter: usize,
}

/// First negative entry of `data` in row-major order, as a `NonNegativity` error.
pub fn check_non_negative(data: &DMatrix<f64>) -> Result<()> {
    for row in 0..data.nrows() {
        for col in 0..data.ncols() {
            let value = data[(row, col)];
            if value < 0.0 || value.is_nan() {
                return Err(MapError::NonNegativity { row, col, value });
            }
        }
    }
    Ok(())
}

/// Non-negative matrix factorization with Lee–Seung multiplicative updates
/// on the Frobenius loss.
///
/// Input is validated up front, so a negative value never reaches the
/// update loop.
pub fn fit(data: &DMatrix<f64>, params: &NmfParams) -> Result<NmfModel> {
    let (n, p) = data.shape();
    if n == 0 || p == 0 {
        return Err(MapError::EmptyDataset);
    }
    if params.n_components == 0 {
        return Err(MapError::InvalidParameter {
            name: "n_components",
            reason: "must be positive".to_string(),
        });
    }
    check_non_negative(data)?;

    let k = params.n_components;
    let scale = (data.mean() / k as f64).sqrt();
    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut w = DMatrix::from_fn(n, k, |_, _| scale * rng.gen::<f64>());
    let mut h = DMatrix::from_fn(k, p, |_, _| scale * rng.gen::<f64>());

    let initial_error = (data - &w * &h).norm();
    let mut previous_error = initial_error;
    let mut n_iter = 0;

    for iter in 0..params.max_iter {
        n_iter = iter + 1;

        let numerator = w.transpose() * data;
        let denominator = w.transpose() * &w * &h;
        h.zip_zip_apply(&numerator, &denominator, |v, num, den| *v *= num / (den + EPSILON));

        let numerator = data * h.transpose();
        let denominator = &w * (&h * h.transpose());
        w.zip_zip_apply(&numerator, &denominator, |v, num, den| *v *= num / (den + EPSILON));

        if iter % 10 == 9 {
            let error = (data - &w * &h).norm();
            if initial_error > 0.0 && (previous_error - error) / initial_error < params.tol {
                break;
            }
            previous_error = error;
        }
    }

    let reconstruction_error = (data - &w * &h).norm();
    log::debug!("nmf: {} iterations, reconstruction error {:.6}", n_iter, reconstruction_error);
    Ok(NmfModel { components: h, scores: w, reconstruction_error, n_iter })
}
