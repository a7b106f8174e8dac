use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use nalgebra::DMatrix;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use crate::data::index_map::{IndexMap, Rc};
use crate::error::{MapError, Result};

pub type PixelSet = FxHashSet<Rc>;

/// Source of a pixel restriction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Selector {
    /// polygon region drawn on the image
    Roi,
    /// threshold ("auto ROI") mask
    Mask,
}

impl Selector {
    pub const ALL: [Selector; 2] = [Selector::Roi, Selector::Mask];

    pub fn name(&self) -> &'static str {
        match self {
            Selector::Roi => "ROI",
            Selector::Mask => "Mask",
        }
    }
}

impl Display for Selector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Selector {
    type Err = MapError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ROI" => Ok(Selector::Roi),
            "Mask" => Ok(Selector::Mask),
            other => Err(MapError::UnknownSelector(other.to_string())),
        }
    }
}

/// Outcome of resolving a `SelectionSet`.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
    /// `rows x cols`, flipped vertically for display, `true` where selected
    pub mask: DMatrix<bool>,
    /// selected spectrum indices, ascending
    pub indices: Vec<usize>,
    /// coordinate of each entry of `indices`
    pub pixels: Vec<Rc>,
    /// no selector restricts the map
    pub unrestricted: bool,
    dense: bool,
}

impl Resolution {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn mask_count(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    /// Pixel list to hand to per-map consumers, `None` meaning "the whole map".
    ///
    /// Only an unrestricted dense map resolves to `None`; an unrestricted sparse
    /// map still lists its pixels since it cannot be reshaped onto the grid.
    pub fn pixel_selection(&self) -> Option<&[Rc]> {
        if self.unrestricted && self.dense {
            None
        } else {
            Some(&self.pixels)
        }
    }
}

/// Named pixel selectors of one map and the rules that combine them.
///
/// A selector holding `None` does not restrict the map. The resolved selection
/// is the intersection of every non-`None` selector; with ROI inversion on, the
/// ROI contributes its complement within the valid pixels instead. The stored
/// ROI itself is never rewritten by inversion.
#[derive(Clone, Debug)]
pub struct SelectionSet {
    index_map: Arc<IndexMap>,
    selectors: BTreeMap<Selector, Option<PixelSet>>,
    roi_inverted: bool,
}

impl SelectionSet {
    pub fn new(index_map: Arc<IndexMap>) -> Self {
        let selectors = Selector::ALL.iter().map(|&s| (s, None)).collect();
        SelectionSet { index_map, selectors, roi_inverted: false }
    }

    pub fn index_map(&self) -> &Arc<IndexMap> {
        &self.index_map
    }

    /// Stores or clears a selector; duplicate coordinates collapse.
    pub fn set_selector(&mut self, selector: Selector, coords: Option<Vec<Rc>>) {
        let pixels = coords.map(|c| c.into_iter().collect::<PixelSet>());
        self.selectors.insert(selector, pixels);
    }

    /// `set_selector` addressed by the selector's display name (`"ROI"`, `"Mask"`).
    pub fn set_selector_by_name(&mut self, name: &str, coords: Option<Vec<Rc>>) -> Result<()> {
        let selector: Selector = name.parse()?;
        self.set_selector(selector, coords);
        Ok(())
    }

    pub fn selector(&self, selector: Selector) -> Option<&PixelSet> {
        self.selectors.get(&selector).and_then(|s| s.as_ref())
    }

    pub fn set_inversion(&mut self, inverted: bool) {
        self.roi_inverted = inverted;
    }

    pub fn is_inverted(&self) -> bool {
        self.roi_inverted
    }

    /// Every pixel that can be selected on this map.
    pub fn full_map(&self) -> PixelSet {
        self.index_map.full_map().into_iter().collect()
    }

    fn effective(&self, selector: Selector, pixels: &PixelSet) -> PixelSet {
        if selector == Selector::Roi && self.roi_inverted {
            self.full_map().difference(pixels).copied().collect()
        } else {
            pixels.clone()
        }
    }

    /// Combines the selectors into a mask image and a sorted index array.
    ///
    /// # Errors
    ///
    /// `MissingCoordinate` when a selector names a pixel outside a dense map.
    pub fn resolve(&self) -> Result<Resolution> {
        let map = &self.index_map;
        let dense = map.is_dense();

        let active: Vec<PixelSet> = self
            .selectors
            .iter()
            .filter_map(|(&s, pixels)| pixels.as_ref().map(|p| self.effective(s, p)))
            .collect();

        if active.is_empty() {
            let indices = map.all_indices();
            let pixels: Vec<Rc> = indices.iter().filter_map(|&i| map.coordinate_of(i)).collect();
            let mask = if dense {
                DMatrix::from_element(map.rows(), map.cols(), true)
            } else {
                map.display_image(false, pixels.iter().map(|&rc| (rc, true)))?
            };
            return Ok(Resolution { mask, indices, pixels, unrestricted: true, dense });
        }

        let mut selected = active
            .into_iter()
            .reduce(|acc, next| acc.intersection(&next).copied().collect())
            .unwrap_or_default();
        if !dense {
            selected.retain(|rc| map.contains(*rc));
        }

        let coords: Vec<Rc> = selected.into_iter().collect();
        let indices = map.resolve_indices(&coords)?;
        let mut pairs: Vec<(usize, Rc)> = indices.into_iter().zip(coords).collect();
        pairs.sort_unstable();

        let mask = map.display_image(false, pairs.iter().map(|&(_, rc)| (rc, true)))?;
        let (indices, pixels) = pairs.into_iter().unzip();
        Ok(Resolution { mask, indices, pixels, unrestricted: false, dense })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    fn dense_4x4() -> SelectionSet {
        SelectionSet::new(Arc::new(IndexMap::dense_row_major(4, 4)))
    }

    fn sparse_3x3() -> SelectionSet {
        let mut rc2ind = FxHashMap::default();
        rc2ind.insert((0, 0), 0);
        rc2ind.insert((1, 1), 1);
        rc2ind.insert((2, 2), 2);
        rc2ind.insert((2, 0), 3);
        SelectionSet::new(Arc::new(IndexMap::build(3, 3, rc2ind).unwrap()))
    }

    fn top_left() -> Vec<Rc> {
        vec![(0, 0), (0, 1), (1, 0), (1, 1)]
    }

    #[test]
    fn test_unrestricted_dense() {
        let resolution = dense_4x4().resolve().unwrap();
        assert!(resolution.unrestricted);
        assert_eq!(resolution.indices, (0..16).collect::<Vec<_>>());
        assert_eq!(resolution.mask_count(), 16);
        assert!(resolution.pixel_selection().is_none());
    }

    #[test]
    fn test_unrestricted_sparse() {
        let resolution = sparse_3x3().resolve().unwrap();
        assert!(resolution.unrestricted);
        assert_eq!(resolution.indices, vec![0, 1, 2, 3]);
        assert_eq!(resolution.mask_count(), 4);
        // map row 2 is display row 0
        assert!(resolution.mask[(0, 0)] && resolution.mask[(0, 2)]);
        assert_eq!(resolution.pixel_selection().map(|p| p.len()), Some(4));
    }

    #[test]
    fn test_roi_block() {
        let mut selection = dense_4x4();
        selection.set_selector(Selector::Roi, Some(top_left()));
        let resolution = selection.resolve().unwrap();
        assert!(!resolution.unrestricted);
        assert_eq!(resolution.indices, vec![0, 1, 4, 5]);
        assert_eq!(resolution.pixels, top_left());
        assert_eq!(resolution.mask_count(), 4);
        assert!(resolution.mask[(3, 0)] && resolution.mask[(2, 1)]);
        assert!(!resolution.mask[(0, 0)]);
    }

    #[test]
    fn test_intersection_is_commutative() {
        let mask: Vec<Rc> = vec![(0, 1), (1, 1), (2, 2), (3, 3)];

        let mut a = dense_4x4();
        a.set_selector(Selector::Roi, Some(top_left()));
        a.set_selector(Selector::Mask, Some(mask.clone()));

        let mut b = dense_4x4();
        b.set_selector(Selector::Mask, Some(mask));
        b.set_selector(Selector::Roi, Some(top_left()));

        let ra = a.resolve().unwrap();
        assert_eq!(ra.indices, vec![1, 5]);
        assert_eq!(ra, b.resolve().unwrap());
    }

    #[test]
    fn test_inversion_leaves_roi_untouched() {
        let mut selection = dense_4x4();
        selection.set_selector(Selector::Roi, Some(top_left()));
        let plain = selection.resolve().unwrap();

        selection.set_inversion(true);
        let inverted = selection.resolve().unwrap();
        assert_eq!(inverted.len(), 12);
        assert!(!inverted.indices.contains(&0));
        assert_eq!(selection.selector(Selector::Roi).map(|s| s.len()), Some(4));

        selection.set_inversion(false);
        assert_eq!(selection.resolve().unwrap(), plain);
    }

    #[test]
    fn test_inversion_without_roi_is_noop() {
        let mut selection = dense_4x4();
        selection.set_inversion(true);
        assert!(selection.resolve().unwrap().unrestricted);
    }

    #[test]
    fn test_empty_selection() {
        let mut selection = dense_4x4();
        selection.set_selector(Selector::Roi, Some(vec![]));
        let resolution = selection.resolve().unwrap();
        assert!(resolution.is_empty());
        assert_eq!(resolution.mask_count(), 0);
        assert_eq!(resolution.pixel_selection(), Some(&[][..]));
    }

    #[test]
    fn test_sparse_drops_pixels_without_spectra() {
        let mut selection = sparse_3x3();
        selection.set_selector(Selector::Roi, Some(vec![(0, 0), (0, 1), (1, 1)]));
        let resolution = selection.resolve().unwrap();
        assert_eq!(resolution.indices, vec![0, 1]);

        selection.set_inversion(true);
        assert_eq!(selection.resolve().unwrap().indices, vec![2, 3]);
    }

    #[test]
    fn test_selector_names() {
        let mut selection = dense_4x4();
        selection.set_selector_by_name("Mask", Some(vec![(3, 3)])).unwrap();
        assert_eq!(selection.resolve().unwrap().indices, vec![15]);
        assert!(matches!(
            selection.set_selector_by_name("Lasso", None),
            Err(MapError::UnknownSelector(name)) if name == "Lasso"
        ));
    }

    #[test]
    fn test_out_of_grid_pixel_in_dense_map() {
        let mut selection = dense_4x4();
        selection.set_selector(Selector::Roi, Some(vec![(9, 9)]));
        assert!(matches!(selection.resolve(), Err(MapError::MissingCoordinate((9, 9)))));
    }
}
