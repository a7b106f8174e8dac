use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use crate::error::{MapError, Result};

/// Parameters for k-means clustering.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KMeansParams {
    pub n_clusters: usize,
    /// independent k-means++ restarts, the lowest inertia wins
    pub n_init: usize,
    pub max_iter: usize,
    /// convergence threshold relative to the mean feature variance
    pub tol: f64,
    pub seed: u64,
}

impl KMeansParams {
    pub fn new(n_clusters: usize) -> Self {
        KMeansParams { n_clusters, ..Default::default() }
    }
}

impl Default for KMeansParams {
    fn default() -> Self {
        KMeansParams {
            n_clusters: 3,
            n_init: 10,
            max_iter: 300,
            tol: 1e-4,
            seed: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct KMeansResult {
    pub labels: Vec<usize>,
    pub centroids: DMatrix<f64>,
    pub inertia: f64,
    pub n_iter: usize,
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest_centroid(point: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (k, c) in centroids.iter().enumerate() {
        let d = squared_distance(point, c);
        if d < best.1 {
            best = (k, d);
        }
    }
    best
}

fn assign(points: &[Vec<f64>], centroids: &[Vec<f64>]) -> Vec<(usize, f64)> {
    points.par_iter().map(|p| nearest_centroid(p, centroids)).collect()
}

fn kmeans_plus_plus(points: &[Vec<f64>], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let n = points.len();
    let mut centroids = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0..n)].clone());

    let mut closest: Vec<f64> = points.iter().map(|p| squared_distance(p, &centroids[0])).collect();
    while centroids.len() < k {
        let total: f64 = closest.iter().sum();
        let next = if total > 0.0 {
            let target = rng.gen::<f64>() * total;
            let mut acc = 0.0;
            let mut pick = n - 1;
            for (i, d) in closest.iter().enumerate() {
                acc += d;
                if acc > target {
                    pick = i;
                    break;
                }
            }
            pick
        } else {
            // every point coincides with a chosen center
            rng.gen_range(0..n)
        };
        centroids.push(points[next].clone());
        for (c, p) in closest.iter_mut().zip(points) {
            *c = c.min(squared_distance(p, &points[next]));
        }
    }
    centroids
}

fn single_run(points: &[Vec<f64>], params: &KMeansParams, tol: f64, rng: &mut StdRng) -> KMeansResult {
    let k = params.n_clusters;
    let dim = points[0].len();
    let mut centroids = kmeans_plus_plus(points, k, rng);
    let mut n_iter = 0;

    for iter in 0..params.max_iter.max(1) {
        n_iter = iter + 1;
        let assignment = assign(points, &centroids);

        let mut sums = vec![vec![0.0; dim]; k];
        let mut counts = vec![0usize; k];
        for (p, &(label, _)) in points.iter().zip(&assignment) {
            counts[label] += 1;
            for (s, v) in sums[label].iter_mut().zip(p) {
                *s += v;
            }
        }

        // relocate empty clusters onto the points worst served by their centroid
        let mut far: Vec<usize> = (0..points.len()).collect();
        far.sort_by(|&a, &b| assignment[b].1.total_cmp(&assignment[a].1).then(a.cmp(&b)));
        let mut far = far.into_iter();

        let mut shift = 0.0;
        let mut updated = Vec::with_capacity(k);
        for label in 0..k {
            let next = if counts[label] > 0 {
                sums[label].iter().map(|s| s / counts[label] as f64).collect()
            } else {
                match far.next() {
                    Some(i) => points[i].clone(),
                    None => centroids[label].clone(),
                }
            };
            shift += squared_distance(&next, &centroids[label]);
            updated.push(next);
        }
        centroids = updated;

        if shift <= tol {
            break;
        }
    }

    let assignment = assign(points, &centroids);
    let inertia = assignment.iter().map(|&(_, d)| d).sum();
    let labels = assignment.into_iter().map(|(l, _)| l).collect();

    let centroids = DMatrix::from_fn(k, dim, |r, c| centroids[r][c]);
    KMeansResult { labels, centroids, inertia, n_iter }
}

/// Lloyd's k-means with k-means++ seeding over the rows of `data`.
///
/// Deterministic for a given `params.seed`: restarts draw from one seeded
/// generator in sequence and the first restart wins an inertia tie.
///
/// # Errors
///
/// * `InvalidParameter` - `n_clusters` or `n_init` is zero
/// * `InsufficientData` - more clusters than rows
pub fn kmeans(data: &DMatrix<f64>, params: &KMeansParams) -> Result<KMeansResult> {
    let n = data.nrows();
    if params.n_clusters == 0 {
        return Err(MapError::InvalidParameter {
            name: "n_clusters",
            reason: "must be at least 1".to_string(),
        });
    }
    if params.n_init == 0 {
        return Err(MapError::InvalidParameter {
            name: "n_init",
            reason: "must be at least 1".to_string(),
        });
    }
    if params.n_clusters > n {
        return Err(MapError::InsufficientData { requested: params.n_clusters, available: n });
    }

    let points: Vec<Vec<f64>> = data.row_iter().map(|r| r.iter().copied().collect()).collect();

    let mean_variance = if data.ncols() > 0 {
        data.column_iter()
            .map(|c| {
                let mean = c.mean();
                c.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n as f64
            })
            .sum::<f64>()
            / data.ncols() as f64
    } else {
        0.0
    };
    let tol = params.tol * mean_variance;

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut best: Option<KMeansResult> = None;
    for _ in 0..params.n_init {
        let run = single_run(&points, params, tol, &mut rng);
        if best.as_ref().map_or(true, |b| run.inertia < b.inertia) {
            best = Some(run);
        }
    }
    best.ok_or(MapError::NotReady("k-means result"))
}
