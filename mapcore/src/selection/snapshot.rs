use std::fs;
use std::path::Path;
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use crate::data::spectra::MapSpectra;
use crate::error::{MapError, Result};
use crate::selection::roi::{PolygonRoi, ThresholdMask};
use crate::selection::selection_set::{SelectionSet, Selector};

/// Persistable selection state of one map: the ROI polygon, the threshold
/// mask settings, which of them is active and the inversion flag.
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize, Encode, Decode)]
pub struct RoiSnapshot {
    pub roi_enabled: bool,
    pub mask_enabled: bool,
    pub roi: PolygonRoi,
    pub threshold: ThresholdMask,
    pub inverted: bool,
}

impl RoiSnapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| MapError::Persistence(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (snapshot, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| MapError::Persistence(e.to_string()))?;
        Ok(snapshot)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Installs the snapshot into `selection`, recomputing the pixel sets
    /// from the polygon and the mask against `spectra`.
    pub fn apply(&self, selection: &mut SelectionSet, spectra: &MapSpectra) -> Result<()> {
        let index_map = selection.index_map().clone();
        let roi = if self.roi_enabled {
            Some(self.roi.enclosed_pixels(index_map.rows(), index_map.cols()))
        } else {
            None
        };
        let mask = if self.mask_enabled {
            Some(self.threshold.select(spectra, &index_map)?)
        } else {
            None
        };
        selection.set_selector(Selector::Roi, roi);
        selection.set_selector(Selector::Mask, mask);
        selection.set_inversion(self.inverted);
        log::debug!("Applied ROI snapshot (roi: {}, mask: {}, inverted: {})", self.roi_enabled, self.mask_enabled, self.inverted);
        Ok(())
    }

    /// Snapshot of the flags currently set on `selection`, with the given shapes.
    pub fn capture(selection: &SelectionSet, roi: PolygonRoi, threshold: ThresholdMask) -> Self {
        RoiSnapshot {
            roi_enabled: selection.selector(Selector::Roi).is_some(),
            mask_enabled: selection.selector(Selector::Mask).is_some(),
            roi,
            threshold,
            inverted: selection.is_inverted(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use super::*;
    use crate::data::index_map::IndexMap;

    fn snapshot() -> RoiSnapshot {
        RoiSnapshot {
            roi_enabled: true,
            mask_enabled: false,
            roi: PolygonRoi::square(0.0, 0.0, 2.0),
            threshold: ThresholdMask::new(1650.0, 0.25),
            inverted: true,
        }
    }

    #[test]
    fn test_bytes_round_trip() {
        let original = snapshot();
        let restored = RoiSnapshot::from_bytes(&original.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_corrupt_bytes() {
        let result = RoiSnapshot::from_bytes(&[0xff, 0xff]);
        assert!(matches!(result, Err(MapError::Persistence(_))));
    }

    #[test]
    fn test_file_round_trip() {
        let path = std::env::temp_dir().join(format!("roi_snapshot_{}.bin", std::process::id()));
        snapshot().save(&path).unwrap();
        assert_eq!(RoiSnapshot::load(&path).unwrap(), snapshot());
        fs::remove_file(&path).unwrap();
        assert!(matches!(RoiSnapshot::load(&path), Err(MapError::Io(_))));
    }

    #[test]
    fn test_apply_and_capture() {
        let _ = env_logger::builder().is_test(true).try_init();
        let index_map = Arc::new(IndexMap::dense_row_major(4, 4));
        let spectra = MapSpectra::new(vec![1550.0], vec![vec![1.0]; 16]).unwrap();
        let mut selection = SelectionSet::new(index_map);

        let snap = snapshot();
        snap.apply(&mut selection, &spectra).unwrap();
        assert!(selection.is_inverted());
        assert_eq!(selection.resolve().unwrap().len(), 12);

        let captured = RoiSnapshot::capture(&selection, snap.roi.clone(), snap.threshold);
        assert_eq!(captured, snap);
    }
}
