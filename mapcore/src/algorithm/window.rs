use itertools::Itertools;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use crate::error::{MapError, Result};

/// Index of the axis value closest to `value`; ties resolve to the lower index.
pub fn nearest_index(value: f64, axis: &[f64]) -> Result<usize> {
    axis.iter()
        .enumerate()
        .min_by_key(|(i, v)| (OrderedFloat((*v - value).abs()), *i))
        .map(|(i, _)| i)
        .ok_or(MapError::EmptyAxis)
}

/// Union of inclusive channel ranges picked from a wavenumber axis.
///
/// Built from user text such as `"400, 1000, 2000, 2500"`: every number is
/// snapped to its nearest channel, the channels are sorted and consumed in
/// pairs, each pair forming one inclusive range.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WavenumberWindow {
    ranges: Vec<(usize, usize)>,
}

impl WavenumberWindow {
    /// Parses a comma-separated list of wavenumbers against `axis`.
    ///
    /// # Errors
    ///
    /// * `UnparseableWindow` - a token is not a number, or the text holds no numbers
    /// * `OddWindowCount` - the values do not come in pairs
    /// * `EmptyAxis` - the axis has no channels
    pub fn parse(text: &str, axis: &[f64]) -> Result<Self> {
        if axis.is_empty() {
            return Err(MapError::EmptyAxis);
        }

        let mut channels = Vec::new();
        for token in text.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let value: f64 = token
                .parse()
                .map_err(|_| MapError::UnparseableWindow(token.to_string()))?;
            if !value.is_finite() {
                return Err(MapError::UnparseableWindow(token.to_string()));
            }
            channels.push(nearest_index(value, axis)?);
        }

        if channels.is_empty() {
            return Err(MapError::UnparseableWindow(text.to_string()));
        }
        if channels.len() % 2 != 0 {
            return Err(MapError::OddWindowCount(channels.len()));
        }

        let ranges: Vec<(usize, usize)> = channels.into_iter().sorted().tuples().collect();
        Ok(WavenumberWindow { ranges })
    }

    /// The whole axis as a single range.
    pub fn full(n_channels: usize) -> Result<Self> {
        if n_channels == 0 {
            return Err(MapError::EmptyAxis);
        }
        Ok(WavenumberWindow { ranges: vec![(0, n_channels - 1)] })
    }

    pub fn ranges(&self) -> &[(usize, usize)] {
        &self.ranges
    }

    /// Concatenation of all ranges in sorted order. Overlapping ranges repeat channels.
    pub fn selected_channels(&self) -> Vec<usize> {
        self.ranges.iter().flat_map(|&(lo, hi)| lo..=hi).collect()
    }

    pub fn len(&self) -> usize {
        self.ranges.iter().map(|&(lo, hi)| hi - lo + 1).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn selected_wavenumbers(&self, axis: &[f64]) -> Vec<f64> {
        self.selected_channels()
            .into_iter()
            .filter_map(|i| axis.get(i).copied())
            .collect()
    }

    /// Largest channel referenced by the window.
    pub fn max_channel(&self) -> Option<usize> {
        self.ranges.iter().map(|&(_, hi)| hi).max()
    }
}
