use std::fmt;

use kiddo::float::distance::SquaredEuclidean;
use kiddo::float::kdtree::KdTree;
use nalgebra::DMatrix;
use crate::error::{MapError, Result};

// bucket size
const B: usize = 256;

type Tree = KdTree<f64, u64, 2, B, u32>;

/// One-nearest-neighbor lookup over 2D points, backed by a kd-tree.
///
/// Used to map a click on the embedding scatter plot to the closest spectrum.
/// Distances are Euclidean and ties resolve to the lowest point index.
#[derive(Clone, Default)]
pub struct NearestNeighborLocator {
    points: Vec<[f64; 2]>,
    tree: Option<Tree>,
}

impl fmt::Debug for NearestNeighborLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NearestNeighborLocator")
            .field("points", &self.points.len())
            .field("fitted", &self.tree.is_some())
            .finish()
    }
}

fn check_finite(name: &'static str, mut values: &mut dyn Iterator<Item = f64>) -> Result<()> {
    if (&mut values).any(|v| !v.is_finite()) {
        return Err(MapError::InvalidParameter {
            name,
            reason: "coordinates must be finite".to_string(),
        });
    }
    Ok(())
}

impl NearestNeighborLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the index over the rows of an `[n x 2]` matrix.
    ///
    /// On any error the locator is left unfit.
    pub fn fit(&mut self, points: &DMatrix<f64>) -> Result<()> {
        self.points.clear();
        self.tree = None;

        if points.ncols() != 2 {
            return Err(MapError::ShapeMismatch {
                context: "locator point dimension",
                expected: 2,
                actual: points.ncols(),
            });
        }
        if points.nrows() == 0 {
            return Err(MapError::EmptyPointSet);
        }
        check_finite("points", &mut points.iter().copied())?;

        log::debug!("training nearest-neighbor index on {} points", points.nrows());
        let pts: Vec<[f64; 2]> = points.row_iter().map(|r| [r[0], r[1]]).collect();
        let mut tree = Tree::with_capacity(pts.len());
        for (i, p) in pts.iter().enumerate() {
            tree.add(p, i as u64);
        }

        self.points = pts;
        self.tree = Some(tree);
        Ok(())
    }

    pub fn is_fitted(&self) -> bool {
        self.tree.is_some()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Coordinates of point `index` as fitted.
    pub fn point(&self, index: usize) -> Option<(f64, f64)> {
        self.points.get(index).map(|p| (p[0], p[1]))
    }

    /// Index of the point closest to `(x, y)`.
    ///
    /// # Errors
    ///
    /// * `NotFitted` - no points fitted yet
    /// * `InvalidParameter` - `x` or `y` is NaN or infinite
    pub fn query_nearest(&self, x: f64, y: f64) -> Result<usize> {
        let tree = self.tree.as_ref().ok_or(MapError::NotFitted)?;
        check_finite("query", &mut [x, y].into_iter())?;

        let query = [x, y];
        // widen the candidate list until it holds every point at the minimum distance
        let mut qty = 8.min(self.points.len());
        loop {
            let neighbours = tree.nearest_n::<SquaredEuclidean>(&query, qty);
            let best = neighbours
                .first()
                .map(|n| n.distance)
                .ok_or(MapError::NotFitted)?;
            let tied: Vec<u64> = neighbours
                .iter()
                .filter(|n| n.distance == best)
                .map(|n| n.item)
                .collect();
            if tied.len() < neighbours.len() || qty >= self.points.len() {
                return tied
                    .into_iter()
                    .min()
                    .map(|i| i as usize)
                    .ok_or(MapError::NotFitted);
            }
            qty = (qty * 2).min(self.points.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordered_float::OrderedFloat;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn brute_force(points: &DMatrix<f64>, x: f64, y: f64) -> usize {
        (0..points.nrows())
            .min_by_key(|&i| {
                let d2 = (points[(i, 0)] - x).powi(2) + (points[(i, 1)] - y).powi(2);
                (OrderedFloat(d2), i)
            })
            .unwrap()
    }

    #[test]
    fn test_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(3);
        let points = DMatrix::from_fn(200, 2, |_, _| rng.gen_range(-5.0..5.0));
        let mut locator = NearestNeighborLocator::new();
        locator.fit(&points).unwrap();
        for _ in 0..100 {
            let (x, y) = (rng.gen_range(-6.0..6.0), rng.gen_range(-6.0..6.0));
            assert_eq!(locator.query_nearest(x, y).unwrap(), brute_force(&points, x, y));
        }
    }

    #[test]
    fn test_ties_pick_lowest_index() {
        let points = DMatrix::from_row_slice(4, 2, &[
            1.0, 0.0,
            -1.0, 0.0,
            0.0, 1.0,
            1.0, 0.0,
        ]);
        let mut locator = NearestNeighborLocator::new();
        locator.fit(&points).unwrap();
        assert_eq!(locator.query_nearest(0.0, 0.0).unwrap(), 0);
        assert_eq!(locator.query_nearest(1.0, 0.0).unwrap(), 0);
        assert_eq!(locator.point(2), Some((0.0, 1.0)));
    }

    #[test]
    fn test_unfit_locator() {
        let mut locator = NearestNeighborLocator::new();
        assert!(matches!(locator.query_nearest(0.0, 0.0), Err(MapError::NotFitted)));

        locator.fit(&DMatrix::from_row_slice(1, 2, &[0.0, 0.0])).unwrap();
        assert!(locator.is_fitted());
        assert!(matches!(locator.fit(&DMatrix::zeros(0, 2)), Err(MapError::EmptyPointSet)));
        assert!(!locator.is_fitted());
        assert!(matches!(locator.query_nearest(0.0, 0.0), Err(MapError::NotFitted)));
    }

    #[test]
    fn test_non_finite_query_rejected() {
        let mut locator = NearestNeighborLocator::new();
        locator.fit(&DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 1.0, 1.0])).unwrap();
        assert!(matches!(locator.query_nearest(f64::NAN, 0.0), Err(MapError::InvalidParameter { .. })));
        assert!(matches!(locator.query_nearest(0.0, f64::INFINITY), Err(MapError::InvalidParameter { .. })));
        assert_eq!(locator.query_nearest(0.9, 0.8).unwrap(), 1);
    }

    #[test]
    fn test_many_duplicates_pick_lowest_index() {
        let mut points = DMatrix::from_element(40, 2, 2.0);
        points[(0, 0)] = 10.0;
        let mut locator = NearestNeighborLocator::new();
        locator.fit(&points).unwrap();
        assert_eq!(locator.query_nearest(2.0, 2.0).unwrap(), 1);
        assert_eq!(locator.query_nearest(9.0, 2.0).unwrap(), 0);
    }
}
