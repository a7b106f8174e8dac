use bincode::{Decode, Encode};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use crate::data::index_map::{IndexMap, Rc};
use crate::data::spectra::{MapSpectra, SpectraSource};
use crate::error::{MapError, Result};

/// Closed polygon in image coordinates, `x` along columns and `y` along map rows.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize, Encode, Decode)]
pub struct PolygonRoi {
    pub vertices: Vec<(f64, f64)>,
}

impl Default for PolygonRoi {
    /// 10 x 10 square anchored at the origin.
    fn default() -> Self {
        PolygonRoi::square(0.0, 0.0, 10.0)
    }
}

impl PolygonRoi {
    pub fn new(vertices: Vec<(f64, f64)>) -> Self {
        PolygonRoi { vertices }
    }

    pub fn square(x: f64, y: f64, size: f64) -> Self {
        PolygonRoi {
            vertices: vec![(x, y), (x + size, y), (x + size, y + size), (x, y + size)],
        }
    }

    pub fn translate(&mut self, dx: f64, dy: f64) {
        for v in self.vertices.iter_mut() {
            v.0 += dx;
            v.1 += dy;
        }
    }

    /// Even-odd point in polygon test.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let n = self.vertices.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (xi, yi) = self.vertices[i];
            let (xj, yj) = self.vertices[j];
            if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    /// Grid pixels whose centre falls inside the polygon, row-major.
    pub fn enclosed_pixels(&self, rows: usize, cols: usize) -> Vec<Rc> {
        (0..rows)
            .flat_map(|r| (0..cols).map(move |c| (r, c)))
            .filter(|&(r, c)| self.contains(c as f64 + 0.5, r as f64 + 0.5))
            .collect()
    }
}

/// Selects pixels whose intensity at a fixed band exceeds a threshold.
///
/// The default band is the amide II region at 1550 cm-1.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize, Encode, Decode)]
pub struct ThresholdMask {
    pub wavenumber: f64,
    pub threshold: f64,
}

impl Default for ThresholdMask {
    fn default() -> Self {
        ThresholdMask { wavenumber: 1550.0, threshold: 0.0 }
    }
}

impl ThresholdMask {
    pub fn new(wavenumber: f64, threshold: f64) -> Self {
        ThresholdMask { wavenumber, threshold }
    }

    /// Coordinates of every spectrum above the threshold, sorted.
    ///
    /// # Errors
    ///
    /// `IndexOutOfRange` if the index map references a spectrum `spectra` lacks.
    pub fn select(&self, spectra: &MapSpectra, index_map: &IndexMap) -> Result<Vec<Rc>> {
        let channel = spectra.channel_of(self.wavenumber)?;
        let mut coords = Vec::new();
        for (&coord, &index) in index_map.rc2ind() {
            let value = spectra.value(index, channel).ok_or(MapError::IndexOutOfRange {
                index,
                len: spectra.n_spectra(),
            })?;
            if value > self.threshold {
                coords.push(coord);
            }
        }
        coords.sort_unstable();
        Ok(coords)
    }

    /// Display-oriented boolean image of `select`.
    pub fn image(&self, spectra: &MapSpectra, index_map: &IndexMap) -> Result<DMatrix<bool>> {
        let coords = self.select(spectra, index_map)?;
        index_map.display_image(false, coords.into_iter().map(|rc| (rc, true)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains() {
        let roi = PolygonRoi::square(1.0, 1.0, 2.0);
        assert!(roi.contains(2.0, 2.0));
        assert!(!roi.contains(0.5, 2.0));
        assert!(!roi.contains(2.0, 3.5));

        let triangle = PolygonRoi::new(vec![(0.0, 0.0), (4.0, 0.0), (0.0, 4.0)]);
        assert!(triangle.contains(1.0, 1.0));
        assert!(!triangle.contains(3.0, 3.0));
        assert!(!PolygonRoi::new(vec![(0.0, 0.0), (1.0, 1.0)]).contains(0.5, 0.5));
    }

    #[test]
    fn test_default_roi_covers_small_map() {
        let roi = PolygonRoi::default();
        assert_eq!(roi.enclosed_pixels(4, 4).len(), 16);
        assert_eq!(roi.enclosed_pixels(12, 12).len(), 100);
    }

    #[test]
    fn test_enclosed_pixels_after_translate() {
        let mut roi = PolygonRoi::square(0.0, 0.0, 2.0);
        roi.translate(1.0, 0.0);
        assert_eq!(roi.enclosed_pixels(4, 4), vec![(0, 1), (0, 2), (1, 1), (1, 2)]);
    }

    #[test]
    fn test_threshold_mask() {
        let index_map = IndexMap::dense_row_major(2, 2);
        let spectra = MapSpectra::new(
            vec![1500.0, 1548.0, 1600.0],
            vec![
                vec![9.0, -1.0, 9.0],
                vec![0.0, 0.5, 0.0],
                vec![0.0, 0.0, 0.0],
                vec![0.0, 2.0, 0.0],
            ],
        )
        .unwrap();

        let mask = ThresholdMask::default();
        assert_eq!(mask.select(&spectra, &index_map).unwrap(), vec![(0, 1), (1, 1)]);

        let image = mask.image(&spectra, &index_map).unwrap();
        assert!(image[(1, 1)] && image[(0, 1)]);
        assert!(!image[(1, 0)] && !image[(0, 0)]);

        let strict = ThresholdMask::new(1550.0, 1.0);
        assert_eq!(strict.select(&spectra, &index_map).unwrap(), vec![(1, 1)]);
    }

    #[test]
    fn test_threshold_mask_missing_spectrum() {
        let index_map = IndexMap::dense_row_major(2, 2);
        let spectra = MapSpectra::new(vec![1550.0], vec![vec![1.0]]).unwrap();
        assert!(matches!(
            ThresholdMask::default().select(&spectra, &index_map),
            Err(MapError::IndexOutOfRange { len: 1, .. })
        ));
    }
}
