use std::sync::Arc;
use nalgebra::DVector;
use crate::algorithm::window::nearest_index;
use crate::error::{MapError, Result};

/// Anything that hands out spectra by spectrum index, one row per spectrum.
pub trait SpectraSource: Sync {
    fn n_spectra(&self) -> usize;
    fn n_channels(&self) -> usize;
    fn spectrum(&self, index: usize) -> Option<&[f64]>;

    /// Intensity of spectrum `index` at `channel`.
    fn value(&self, index: usize, channel: usize) -> Option<f64> {
        self.spectrum(index).and_then(|s| s.get(channel).copied())
    }
}

/// Spectra of one map together with their wavenumber (or energy) axis.
///
/// Uses Arc<Vec<T>> so sessions can share the data without copying it.
#[derive(Clone, Debug)]
pub struct MapSpectra {
    pub wavenumbers: Arc<Vec<f64>>,
    spectra: Arc<Vec<Vec<f64>>>,
}

impl MapSpectra {
    /// Constructs a new `MapSpectra`.
    ///
    /// # Arguments
    ///
    /// * `wavenumbers` - axis shared by every spectrum
    /// * `spectra` - one intensity vector per spectrum index
    ///
    /// # Errors
    ///
    /// `EmptyAxis` for an empty axis, `ShapeMismatch` if any spectrum length
    /// differs from the axis length.
    pub fn new(wavenumbers: Vec<f64>, spectra: Vec<Vec<f64>>) -> Result<Self> {
        if wavenumbers.is_empty() {
            return Err(MapError::EmptyAxis);
        }
        if let Some(bad) = spectra.iter().find(|s| s.len() != wavenumbers.len()) {
            return Err(MapError::ShapeMismatch {
                context: "spectrum length",
                expected: wavenumbers.len(),
                actual: bad.len(),
            });
        }
        Ok(MapSpectra {
            wavenumbers: Arc::new(wavenumbers),
            spectra: Arc::new(spectra),
        })
    }

    pub fn wavenumbers(&self) -> &[f64] {
        &self.wavenumbers
    }

    /// Channel whose wavenumber is closest to `value`.
    pub fn channel_of(&self, value: f64) -> Result<usize> {
        nearest_index(value, &self.wavenumbers)
    }

    /// Mean spectrum over `indices`; the zero vector when `indices` is empty.
    pub fn mean_spectrum(&self, indices: &[usize]) -> Result<DVector<f64>> {
        let n_channels = self.wavenumbers.len();
        let mut acc = DVector::<f64>::zeros(n_channels);
        if indices.is_empty() {
            return Ok(acc);
        }
        for &index in indices {
            let spectrum = self.spectrum(index).ok_or(MapError::IndexOutOfRange {
                index,
                len: self.spectra.len(),
            })?;
            for (a, v) in acc.iter_mut().zip(spectrum) {
                *a += v;
            }
        }
        acc /= indices.len() as f64;
        Ok(acc)
    }
}

impl SpectraSource for MapSpectra {
    fn n_spectra(&self) -> usize {
        self.spectra.len()
    }

    fn n_channels(&self) -> usize {
        self.wavenumbers.len()
    }

    fn spectrum(&self, index: usize) -> Option<&[f64]> {
        self.spectra.get(index).map(|s| s.as_slice())
    }
}

impl SpectraSource for Vec<Vec<f64>> {
    fn n_spectra(&self) -> usize {
        self.len()
    }

    fn n_channels(&self) -> usize {
        self.first().map(|s| s.len()).unwrap_or(0)
    }

    fn spectrum(&self, index: usize) -> Option<&[f64]> {
        self.get(index).map(|s| s.as_slice())
    }
}
