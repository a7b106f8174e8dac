use nalgebra::{DMatrix, Scalar};
use rustc_hash::FxHashMap;
use crate::error::{MapError, Result};

/// Pixel coordinate `(row, col)` on a map grid.
pub type Rc = (usize, usize);

/// Bidirectional mapping between map pixels and spectrum indices.
///
/// A map is *dense* when every grid cell carries a spectrum and *sparse*
/// otherwise. The mapping is built once when a map is opened and is shared
/// read-only afterwards.
#[derive(Clone, Debug)]
pub struct IndexMap {
    rows: usize,
    cols: usize,
    rc2ind: FxHashMap<Rc, usize>,
    ind2rc: FxHashMap<usize, Rc>,
    dense: bool,
}

impl IndexMap {
    /// Builds the map and its inverse.
    ///
    /// # Arguments
    ///
    /// * `rows` - number of grid rows
    /// * `cols` - number of grid columns
    /// * `rc2ind` - coordinate to spectrum index mapping supplied by the map reader
    ///
    /// # Errors
    ///
    /// `InconsistentIndex` if two coordinates share a spectrum index,
    /// `CoordinateOutOfBounds` if a coordinate lies outside the grid.
    pub fn build(rows: usize, cols: usize, rc2ind: FxHashMap<Rc, usize>) -> Result<Self> {
        let mut ind2rc: FxHashMap<usize, Rc> = FxHashMap::default();
        ind2rc.reserve(rc2ind.len());

        // iterate in coordinate order so the reported duplicate pair is stable
        let mut coords: Vec<(&Rc, &usize)> = rc2ind.iter().collect();
        coords.sort_unstable();

        for (&coord, &index) in coords {
            if coord.0 >= rows || coord.1 >= cols {
                return Err(MapError::CoordinateOutOfBounds { coord, rows, cols });
            }
            if let Some(&first) = ind2rc.get(&index) {
                return Err(MapError::InconsistentIndex { index, first, second: coord });
            }
            ind2rc.insert(index, coord);
        }

        let dense = rc2ind.len() == rows * cols;
        Ok(IndexMap { rows, cols, rc2ind, ind2rc, dense })
    }

    /// Dense map whose spectra are stored row-major, `index = row * cols + col`.
    pub fn dense_row_major(rows: usize, cols: usize) -> Self {
        let mut rc2ind = FxHashMap::default();
        let mut ind2rc = FxHashMap::default();
        for r in 0..rows {
            for c in 0..cols {
                rc2ind.insert((r, c), r * cols + c);
                ind2rc.insert(r * cols + c, (r, c));
            }
        }
        IndexMap { rows, cols, rc2ind, ind2rc, dense: true }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn is_dense(&self) -> bool {
        self.dense
    }

    /// Number of spectra carried by the map.
    pub fn len(&self) -> usize {
        self.rc2ind.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rc2ind.is_empty()
    }

    pub fn index_of(&self, coord: Rc) -> Option<usize> {
        self.rc2ind.get(&coord).copied()
    }

    pub fn coordinate_of(&self, index: usize) -> Option<Rc> {
        self.ind2rc.get(&index).copied()
    }

    pub fn contains(&self, coord: Rc) -> bool {
        self.rc2ind.contains_key(&coord)
    }

    pub fn rc2ind(&self) -> &FxHashMap<Rc, usize> {
        &self.rc2ind
    }

    pub fn ind2rc(&self) -> &FxHashMap<usize, Rc> {
        &self.ind2rc
    }

    /// All coordinates that may be selected, in row-major order.
    ///
    /// Dense maps yield every grid cell, sparse maps only the cells with a spectrum.
    pub fn full_map(&self) -> Vec<Rc> {
        if self.dense {
            (0..self.rows)
                .flat_map(|r| (0..self.cols).map(move |c| (r, c)))
                .collect()
        } else {
            let mut coords: Vec<Rc> = self.rc2ind.keys().copied().collect();
            coords.sort_unstable();
            coords
        }
    }

    /// Every spectrum index of the map, ascending.
    pub fn all_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.ind2rc.keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    /// Looks up the spectrum index of each coordinate, preserving input order.
    ///
    /// Sparse maps silently drop coordinates without a spectrum. Dense maps
    /// guarantee completeness, so a miss there is a `MissingCoordinate` error.
    pub fn resolve_indices(&self, coords: &[Rc]) -> Result<Vec<usize>> {
        let mut indices = Vec::with_capacity(coords.len());
        for coord in coords {
            match self.rc2ind.get(coord) {
                Some(&index) => indices.push(index),
                None if self.dense => return Err(MapError::MissingCoordinate(*coord)),
                None => {}
            }
        }
        Ok(indices)
    }

    /// Places `values` on a `rows x cols` image filled with `fill`, flipped
    /// vertically for display: map row 0 ends up as the last image row.
    pub fn display_image<T: Scalar>(
        &self,
        fill: T,
        values: impl IntoIterator<Item = (Rc, T)>,
    ) -> Result<DMatrix<T>> {
        let mut image = DMatrix::from_element(self.rows, self.cols, fill);
        for ((r, c), value) in values {
            if r >= self.rows || c >= self.cols {
                return Err(MapError::CoordinateOutOfBounds { coord: (r, c), rows: self.rows, cols: self.cols });
            }
            image[(self.rows - 1 - r, c)] = value;
        }
        Ok(image)
    }
}
