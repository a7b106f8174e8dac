//! Uniform Manifold Approximation and Projection.
//!
//! Builds a fuzzy k-nearest-neighbor graph in the input space and lays it out
//! in `n_components` dimensions by stochastic gradient descent with negative
//! sampling. Every random draw comes from one `StdRng` seeded with
//! `UmapParams::seed`, so identical input gives identical output.

use std::collections::BTreeMap;
use nalgebra::{DMatrix, Matrix2, Vector2};
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use crate::algorithm::distance::Metric;
use crate::error::{MapError, Result};

const SMOOTH_K_TOLERANCE: f64 = 1e-5;
const MIN_K_DIST_SCALE: f64 = 1e-3;
const GRADIENT_CLIP: f64 = 4.0;
// rows per distance block; bounds the block of the Gram matrix held at once
const GRAM_BLOCK_ROWS: usize = 256;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UmapParams {
    pub n_neighbors: usize,
    /// clamped to [0, 1] before fitting
    pub min_dist: f64,
    pub n_components: usize,
    pub metric: Metric,
    pub spread: f64,
    /// defaults to 500 epochs for up to 10000 rows and 200 above
    pub n_epochs: Option<usize>,
    pub learning_rate: f64,
    pub negative_sample_rate: usize,
    pub seed: u64,
}

impl Default for UmapParams {
    fn default() -> Self {
        UmapParams {
            n_neighbors: 15,
            min_dist: 0.1,
            n_components: 2,
            metric: Metric::Euclidean,
            spread: 1.0,
            n_epochs: None,
            learning_rate: 1.0,
            negative_sample_rate: 5,
            seed: 0,
        }
    }
}

impl UmapParams {
    fn validate(&self) -> Result<()> {
        if self.n_neighbors == 0 {
            return Err(MapError::InvalidParameter {
                name: "n_neighbors",
                reason: "must be positive".to_string(),
            });
        }
        if self.n_components == 0 {
            return Err(MapError::InvalidParameter {
                name: "n_components",
                reason: "must be positive".to_string(),
            });
        }
        if !(self.spread > 0.0) {
            return Err(MapError::InvalidParameter {
                name: "spread",
                reason: format!("must be positive, got {}", self.spread),
            });
        }
        if !self.min_dist.is_finite() {
            return Err(MapError::InvalidParameter {
                name: "min_dist",
                reason: "must be finite".to_string(),
            });
        }
        Ok(())
    }
}

type Neighbors = (Vec<Vec<usize>>, Vec<Vec<f64>>);

/// Indices and distances of the `k` nearest rows of every row, self first.
///
/// Euclidean and correlation distances come from blocked matrix products;
/// Manhattan has no inner-product form and compares rows pairwise.
fn nearest_neighbors(data: &DMatrix<f64>, k: usize, metric: Metric) -> Neighbors {
    match metric {
        Metric::Manhattan => pairwise_neighbors(data, k, metric),
        Metric::Euclidean | Metric::Correlation => gram_neighbors(data, k, metric),
    }
}

/// The `k` smallest candidates, ordered by distance, then self, then index.
fn top_k(mut candidates: Vec<(OrderedFloat<f64>, bool, usize)>, k: usize) -> (Vec<usize>, Vec<f64>) {
    if k == 0 {
        return (Vec::new(), Vec::new());
    }
    if k < candidates.len() {
        candidates.select_nth_unstable(k - 1);
        candidates.truncate(k);
    }
    candidates.sort_unstable();
    candidates.into_iter().map(|(d, _, j)| (j, d.into_inner())).unzip()
}

fn pairwise_neighbors(data: &DMatrix<f64>, k: usize, metric: Metric) -> Neighbors {
    let points: Vec<Vec<f64>> = data.row_iter().map(|r| r.iter().copied().collect()).collect();
    let rows: Vec<(Vec<usize>, Vec<f64>)> = (0..points.len())
        .into_par_iter()
        .map(|i| {
            let candidates = points
                .iter()
                .enumerate()
                .map(|(j, p)| (OrderedFloat(metric.distance(&points[i], p)), j != i, j))
                .collect();
            top_k(candidates, k)
        })
        .collect();
    rows.into_iter().unzip()
}

fn gram_neighbors(data: &DMatrix<f64>, k: usize, metric: Metric) -> Neighbors {
    let n = data.nrows();
    let mut prepared = data.clone();
    let mut flat = vec![false; n];
    if metric == Metric::Correlation {
        for (i, mut row) in prepared.row_iter_mut().enumerate() {
            let mean = row.mean();
            row.add_scalar_mut(-mean);
            let norm = row.norm();
            if norm == 0.0 {
                flat[i] = true;
            } else {
                row.unscale_mut(norm);
            }
        }
    }
    let sq_norms: Vec<f64> = prepared.row_iter().map(|r| r.norm_squared()).collect();
    let transposed = prepared.transpose();

    let starts: Vec<usize> = (0..n).step_by(GRAM_BLOCK_ROWS).collect();
    let blocks: Vec<Vec<(Vec<usize>, Vec<f64>)>> = starts
        .into_par_iter()
        .map(|start| {
            let len = GRAM_BLOCK_ROWS.min(n - start);
            let gram = prepared.rows(start, len) * &transposed;
            (0..len)
                .map(|r| {
                    let i = start + r;
                    let candidates = (0..n)
                        .map(|j| {
                            let d = if i == j {
                                0.0
                            } else if metric == Metric::Correlation {
                                if flat[i] && flat[j] { 0.0 } else { (1.0 - gram[(r, j)]).clamp(0.0, 2.0) }
                            } else {
                                (sq_norms[i] + sq_norms[j] - 2.0 * gram[(r, j)]).max(0.0).sqrt()
                            };
                            (OrderedFloat(d), j != i, j)
                        })
                        .collect();
                    top_k(candidates, k)
                })
                .collect()
        })
        .collect();
    blocks.into_iter().flatten().unzip()
}

/// Per-row `(rho, sigma)` so that the membership strengths of the `k` neighbors sum to `log2(k)`.
fn smooth_knn_dist(distances: &[Vec<f64>], k: usize) -> Vec<(f64, f64)> {
    let target = (k as f64).log2();
    let total: f64 = distances.iter().flatten().sum();
    let count = distances.iter().map(|d| d.len()).sum::<usize>().max(1);
    let mean_all = total / count as f64;

    distances
        .iter()
        .map(|row| {
            let rho = row.iter().copied().find(|&d| d > 0.0).unwrap_or(0.0);

            let mut lo = 0.0;
            let mut hi = f64::INFINITY;
            let mut mid = 1.0;
            for _ in 0..64 {
                let psum: f64 = row
                    .iter()
                    .skip(1)
                    .map(|&d| {
                        let d = d - rho;
                        if d > 0.0 { (-d / mid).exp() } else { 1.0 }
                    })
                    .sum();
                if (psum - target).abs() < SMOOTH_K_TOLERANCE {
                    break;
                }
                if psum > target {
                    hi = mid;
                    mid = (lo + hi) / 2.0;
                } else {
                    lo = mid;
                    mid = if hi.is_infinite() { mid * 2.0 } else { (lo + hi) / 2.0 };
                }
            }

            let floor = if rho > 0.0 {
                MIN_K_DIST_SCALE * row.iter().sum::<f64>() / row.len().max(1) as f64
            } else {
                MIN_K_DIST_SCALE * mean_all
            };
            (rho, mid.max(floor))
        })
        .collect()
}

/// Symmetric fuzzy graph as directed edges `(head, tail, weight)` in a fixed order.
fn fuzzy_graph(indices: &[Vec<usize>], distances: &[Vec<f64>], k: usize) -> Vec<(usize, usize, f64)> {
    let sigmas = smooth_knn_dist(distances, k);

    let mut directed: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    for (i, (row_idx, row_dist)) in indices.iter().zip(distances).enumerate() {
        let (rho, sigma) = sigmas[i];
        for (&j, &d) in row_idx.iter().zip(row_dist) {
            if j == i {
                continue;
            }
            let w = if d - rho <= 0.0 || sigma == 0.0 {
                1.0
            } else {
                (-(d - rho) / sigma).exp()
            };
            directed.insert((i, j), w);
        }
    }

    // fuzzy union: w(i,j) + w(j,i) - w(i,j) * w(j,i)
    let mut symmetric: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    for (&(i, j), &a) in &directed {
        let b = directed.get(&(j, i)).copied().unwrap_or(0.0);
        let w = a + b - a * b;
        symmetric.insert((i, j), w);
        symmetric.insert((j, i), w);
    }

    symmetric
        .into_iter()
        .filter(|&(_, w)| w > 0.0)
        .map(|((i, j), w)| (i, j, w))
        .collect()
}

/// Fits `1 / (1 + a * x^(2b))` to the target curve defined by `spread` and `min_dist`.
///
/// Levenberg–Marquardt on 300 samples of `[0, 3 * spread]`.
pub fn find_ab_params(spread: f64, min_dist: f64) -> (f64, f64) {
    let n = 300;
    let xs: Vec<f64> = (0..n).map(|i| 3.0 * spread * i as f64 / (n - 1) as f64).collect();
    let ys: Vec<f64> = xs
        .iter()
        .map(|&x| if x < min_dist { 1.0 } else { (-(x - min_dist) / spread).exp() })
        .collect();

    let cost = |a: f64, b: f64| -> f64 {
        xs.iter()
            .zip(&ys)
            .map(|(&x, &y)| {
                let f = 1.0 / (1.0 + a * x.powf(2.0 * b));
                (f - y) * (f - y)
            })
            .sum()
    };

    let (mut a, mut b) = (1.0, 1.0);
    let mut lambda = 1e-3;
    let mut current = cost(a, b);
    for _ in 0..500 {
        let mut jtj = Matrix2::<f64>::zeros();
        let mut jtr = Vector2::<f64>::zeros();
        for (&x, &y) in xs.iter().zip(&ys) {
            if x <= 0.0 {
                continue;
            }
            let u = x.powf(2.0 * b);
            let denom = (1.0 + a * u) * (1.0 + a * u);
            let f = 1.0 / (1.0 + a * u);
            let grad = Vector2::new(-u / denom, -a * u * 2.0 * x.ln() / denom);
            jtj += grad * grad.transpose();
            jtr += grad * (f - y);
        }

        let mut damped = jtj;
        damped[(0, 0)] *= 1.0 + lambda;
        damped[(1, 1)] *= 1.0 + lambda;
        let step = match damped.try_inverse() {
            Some(inv) => inv * jtr,
            None => break,
        };

        let (na, nb) = (a - step[0], b - step[1]);
        if na > 0.0 && nb > 0.0 {
            let candidate = cost(na, nb);
            if candidate < current {
                let converged = (current - candidate).abs() < 1e-14;
                a = na;
                b = nb;
                current = candidate;
                lambda /= 10.0;
                if converged {
                    break;
                }
                continue;
            }
        }
        lambda *= 10.0;
        if lambda > 1e12 {
            break;
        }
    }
    (a, b)
}

fn clip(v: f64) -> f64 {
    v.clamp(-GRADIENT_CLIP, GRADIENT_CLIP)
}

/// Embeds the rows of `data` into `params.n_components` dimensions.
///
/// Zero rows give a zero-row embedding and a single row sits at the origin.
pub fn fit_transform(data: &DMatrix<f64>, params: &UmapParams) -> Result<DMatrix<f64>> {
    params.validate()?;
    let n = data.nrows();
    let dim = params.n_components;
    if n <= 1 {
        return Ok(DMatrix::zeros(n, dim));
    }

    let min_dist = params.min_dist.clamp(0.0, 1.0);
    let k = params.n_neighbors.min(n);
    log::debug!("umap: building {}-nearest-neighbor graph over {} rows", k, n);
    let (indices, distances) = nearest_neighbors(data, k, params.metric);
    let mut edges = fuzzy_graph(&indices, &distances, k);

    let n_epochs = params.n_epochs.unwrap_or(if n <= 10_000 { 500 } else { 200 }).max(1);
    let max_w = edges.iter().map(|e| e.2).fold(0.0, f64::max);
    edges.retain(|e| e.2 >= max_w / n_epochs as f64);

    let (a, b) = find_ab_params(params.spread, min_dist);
    log::debug!("umap: {} edges, a = {:.4}, b = {:.4}, {} epochs", edges.len(), a, b, n_epochs);

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut embedding: Vec<f64> = (0..n * dim).map(|_| rng.gen_range(-10.0..10.0)).collect();

    let epochs_per_sample: Vec<f64> = edges.iter().map(|e| max_w / e.2).collect();
    let neg_rate = params.negative_sample_rate.max(1) as f64;
    let epochs_per_negative: Vec<f64> = epochs_per_sample.iter().map(|e| e / neg_rate).collect();
    let mut next_sample = epochs_per_sample.clone();
    let mut next_negative = epochs_per_negative.clone();

    let mut current = vec![0.0; dim];
    let mut other = vec![0.0; dim];
    for epoch in 0..n_epochs {
        let alpha = params.learning_rate * (1.0 - epoch as f64 / n_epochs as f64);
        let e = epoch as f64;

        for (edge, &(head, tail, _)) in edges.iter().enumerate() {
            if next_sample[edge] > e {
                continue;
            }

            current.copy_from_slice(&embedding[head * dim..(head + 1) * dim]);
            other.copy_from_slice(&embedding[tail * dim..(tail + 1) * dim]);
            let dist_sq: f64 = current.iter().zip(&other).map(|(x, y)| (x - y) * (x - y)).sum();
            let coeff = if dist_sq > 0.0 {
                -2.0 * a * b * dist_sq.powf(b - 1.0) / (a * dist_sq.powf(b) + 1.0)
            } else {
                0.0
            };
            for d in 0..dim {
                let grad = clip(coeff * (current[d] - other[d]));
                current[d] += grad * alpha;
                other[d] -= grad * alpha;
            }
            embedding[tail * dim..(tail + 1) * dim].copy_from_slice(&other);
            next_sample[edge] += epochs_per_sample[edge];

            let n_neg = ((e - next_negative[edge]) / epochs_per_negative[edge]).floor().max(0.0) as usize;
            for _ in 0..n_neg {
                let sample = rng.gen_range(0..n);
                if sample == head {
                    continue;
                }
                let neg = &embedding[sample * dim..(sample + 1) * dim];
                let dist_sq: f64 = current.iter().zip(neg).map(|(x, y)| (x - y) * (x - y)).sum();
                let coeff = if dist_sq > 0.0 {
                    2.0 * b / ((0.001 + dist_sq) * (a * dist_sq.powf(b) + 1.0))
                } else {
                    0.0
                };
                for d in 0..dim {
                    let grad = if coeff > 0.0 { clip(coeff * (current[d] - neg[d])) } else { GRADIENT_CLIP };
                    current[d] += grad * alpha;
                }
            }
            next_negative[edge] += n_neg as f64 * epochs_per_negative[edge];
            embedding[head * dim..(head + 1) * dim].copy_from_slice(&current);
        }
    }

    Ok(DMatrix::from_row_slice(n, dim, &embedding))
}
