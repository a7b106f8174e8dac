// mapflow/src/factorization.rs

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;

use mapcore::algorithm::nmf::{self, NmfParams};
use mapcore::algorithm::pca;
use mapcore::data::index_map::{IndexMap, Rc};
use mapcore::data::spectra::{MapSpectra, SpectraSource};
use mapcore::{MapError, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::config::FactorMethod;

/// One map entering a factorization.
#[derive(Clone, Debug)]
pub struct FactorInput<'a> {
    pub spectra: &'a MapSpectra,
    pub index_map: Arc<IndexMap>,
    /// `None` takes every spectrum of the map
    pub selection: Option<&'a [Rc]>,
}

/// Where a row of the stacked dataset came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowOrigin {
    pub map: usize,
    pub coord: Rc,
    pub spectrum: usize,
}

/// Spectra of several maps stacked into one matrix.
#[derive(Clone, Debug)]
pub struct AssembledDataset {
    pub data: DMatrix<f64>,
    pub wavenumbers: Vec<f64>,
    /// row `data_row_split[i]..data_row_split[i + 1]` belongs to map `i`
    pub data_row_split: Vec<usize>,
    pub row_origins: Vec<RowOrigin>,
    index_maps: Vec<Arc<IndexMap>>,
}

impl AssembledDataset {
    pub fn n_maps(&self) -> usize {
        self.index_maps.len()
    }

    pub fn rows_of_map(&self, map: usize) -> Result<std::ops::Range<usize>> {
        if map >= self.n_maps() {
            return Err(MapError::IndexOutOfRange { index: map, len: self.n_maps() });
        }
        Ok(self.data_row_split[map]..self.data_row_split[map + 1])
    }

    /// Map index of every row, for grouping rows in pair plots.
    pub fn group_labels(&self) -> Vec<usize> {
        self.row_origins.iter().map(|o| o.map).collect()
    }
}

fn map_rows(map: usize, input: &FactorInput) -> Result<Vec<RowOrigin>> {
    let index_map = &input.index_map;
    match input.selection {
        None => index_map
            .all_indices()
            .into_iter()
            .map(|spectrum| {
                let coord = index_map
                    .coordinate_of(spectrum)
                    .ok_or(MapError::IndexOutOfRange { index: spectrum, len: index_map.len() })?;
                Ok(RowOrigin { map, coord, spectrum })
            })
            .collect(),
        Some(coords) => {
            let mut rows = Vec::with_capacity(coords.len());
            for &coord in coords {
                match index_map.index_of(coord) {
                    Some(spectrum) => rows.push(RowOrigin { map, coord, spectrum }),
                    None if index_map.is_dense() => return Err(MapError::MissingCoordinate(coord)),
                    None => {}
                }
            }
            Ok(rows)
        }
    }
}

/// Stacks the selected spectra of every map.
///
/// A map without selection contributes all its spectra in index order, a map
/// with one contributes the selected pixels in selection order.
///
/// # Errors
///
/// * `ShapeMismatch` - the maps do not share the wavenumber axis length
/// * `MissingCoordinate` - a selected pixel has no spectrum in a dense map
pub fn assemble_dataset(inputs: &[FactorInput]) -> Result<AssembledDataset> {
    let wavenumbers: Vec<f64> = inputs
        .first()
        .map(|i| i.spectra.wavenumbers().to_vec())
        .unwrap_or_default();
    let n_channels = wavenumbers.len();

    let mut row_origins = Vec::new();
    let mut data_row_split = vec![0];
    for (map, input) in inputs.iter().enumerate() {
        if input.spectra.n_channels() != n_channels {
            return Err(MapError::ShapeMismatch {
                context: "wavenumber axis length",
                expected: n_channels,
                actual: input.spectra.n_channels(),
            });
        }
        row_origins.extend(map_rows(map, input)?);
        data_row_split.push(row_origins.len());
    }

    let mut data = DMatrix::<f64>::zeros(row_origins.len(), n_channels);
    for (row, origin) in row_origins.iter().enumerate() {
        let spectra = inputs[origin.map].spectra;
        let spectrum = spectra.spectrum(origin.spectrum).ok_or(MapError::IndexOutOfRange {
            index: origin.spectrum,
            len: spectra.n_spectra(),
        })?;
        for (col, &value) in spectrum.iter().enumerate() {
            data[(row, col)] = value;
        }
    }

    Ok(AssembledDataset {
        data,
        wavenumbers,
        data_row_split,
        row_origins,
        index_maps: inputs.iter().map(|i| i.index_map.clone()).collect(),
    })
}

#[derive(Clone, Debug)]
pub struct FactorizationResult {
    pub method: FactorMethod,
    /// `[n_components x n_wavenumbers]`
    pub components: DMatrix<f64>,
    /// `[n_rows x n_components]`
    pub scores: DMatrix<f64>,
    /// PCA only
    pub explained_variance_ratio: Option<Vec<f64>>,
    /// NMF only
    pub reconstruction_error: Option<f64>,
}

/// Serialized form of a factorization, written by "Save results".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FactorizationExport {
    pub method: FactorMethod,
    pub wavenumbers: Vec<f64>,
    pub components: Vec<Vec<f64>>,
    pub scores: Vec<Vec<f64>>,
    pub explained_variance_ratio: Option<Vec<f64>>,
    pub data_row_split: Vec<usize>,
    pub row_origins: Vec<RowOrigin>,
}

fn rows_of(matrix: &DMatrix<f64>) -> Vec<Vec<f64>> {
    matrix.row_iter().map(|r| r.iter().copied().collect()).collect()
}

/// PCA/NMF decomposition across all open maps.
#[derive(Clone, Debug, Default)]
pub struct FactorizationPipeline {
    dataset: Option<AssembledDataset>,
    result: Option<FactorizationResult>,
}

impl FactorizationPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dataset(&self) -> Option<&AssembledDataset> {
        self.dataset.as_ref()
    }

    pub fn result(&self) -> Option<&FactorizationResult> {
        self.result.as_ref()
    }

    /// Rebuilds the stacked dataset; any earlier result is dropped.
    pub fn assemble(&mut self, inputs: &[FactorInput]) -> Result<&AssembledDataset> {
        let dataset = assemble_dataset(inputs)?;
        self.result = None;
        Ok(self.dataset.insert(dataset))
    }

    /// Factorizes the stacked dataset.
    ///
    /// PCA works on mean-centered data. NMF input is checked for negative
    /// values before the factorizer runs.
    ///
    /// # Errors
    ///
    /// * `NotReady` - nothing assembled
    /// * `EmptyDataset` - no rows or no wavenumbers; the previous result is cleared
    /// * `NonNegativity` - negative input to NMF; the previous result is kept
    pub fn factorize(&mut self, method: FactorMethod, n_components: usize) -> Result<&FactorizationResult> {
        let dataset = self.dataset.as_ref().ok_or(MapError::NotReady("dataset"))?;
        let data = &dataset.data;
        if data.nrows() == 0 || data.ncols() == 0 {
            log::warn!("The data matrix is empty. No {} factorization is computed.", method);
            self.result = None;
            return Err(MapError::EmptyDataset);
        }

        log::info!("Computing {} with {} components on a {}x{} data matrix.", method, n_components, data.nrows(), data.ncols());
        let result = match method {
            FactorMethod::Pca => {
                let model = pca::fit(data, n_components)?;
                let scores = model.transform(data)?;
                FactorizationResult {
                    method,
                    components: model.components,
                    scores,
                    explained_variance_ratio: Some(model.explained_variance_ratio),
                    reconstruction_error: None,
                }
            }
            FactorMethod::Nmf => {
                nmf::check_non_negative(data)?;
                let model = nmf::fit(data, &NmfParams::new(n_components))?;
                log::debug!("NMF converged after {} iterations, error {:.4e}", model.n_iter, model.reconstruction_error);
                FactorizationResult {
                    method,
                    components: model.components,
                    scores: model.scores,
                    explained_variance_ratio: None,
                    reconstruction_error: Some(model.reconstruction_error),
                }
            }
        };
        Ok(self.result.insert(result))
    }

    /// Score image of `component` for map `map`, in display orientation.
    ///
    /// Pixels outside the map's selection stay zero.
    pub fn project_back(&self, component: usize, map: usize) -> Result<DMatrix<f64>> {
        let dataset = self.dataset.as_ref().ok_or(MapError::NotReady("dataset"))?;
        let result = self.result.as_ref().ok_or(MapError::NotReady("factorization"))?;
        if component >= result.scores.ncols() {
            return Err(MapError::IndexOutOfRange { index: component, len: result.scores.ncols() });
        }
        let rows = dataset.rows_of_map(map)?;
        let values = rows.map(|row| (dataset.row_origins[row].coord, result.scores[(row, component)]));
        dataset.index_maps[map].display_image(0.0, values)
    }

    pub fn export(&self) -> Result<FactorizationExport> {
        let dataset = self.dataset.as_ref().ok_or(MapError::NotReady("dataset"))?;
        let result = self.result.as_ref().ok_or(MapError::NotReady("factorization"))?;
        Ok(FactorizationExport {
            method: result.method,
            wavenumbers: dataset.wavenumbers.clone(),
            components: rows_of(&result.components),
            scores: rows_of(&result.scores),
            explained_variance_ratio: result.explained_variance_ratio.clone(),
            data_row_split: dataset.data_row_split.clone(),
            row_origins: dataset.row_origins.clone(),
        })
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.export()?)?)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let export = self.export()?;
        let f = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(f, &export)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    fn dense_map(rows: usize, cols: usize, offset: f64) -> (MapSpectra, Arc<IndexMap>) {
        let n = rows * cols;
        let spectra = (0..n)
            .map(|i| vec![offset + i as f64, 2.0 * (offset + i as f64), 1.0, (i % 3) as f64])
            .collect();
        let spectra = MapSpectra::new(vec![1000.0, 1500.0, 2000.0, 2500.0], spectra).unwrap();
        (spectra, Arc::new(IndexMap::dense_row_major(rows, cols)))
    }

    #[test]
    fn test_assemble_rows_and_split() {
        let (a, a_map) = dense_map(2, 2, 0.0);
        let (b, b_map) = dense_map(3, 2, 100.0);
        let roi: Vec<Rc> = vec![(2, 1), (0, 0)];
        let inputs = vec![
            FactorInput { spectra: &a, index_map: a_map, selection: None },
            FactorInput { spectra: &b, index_map: b_map, selection: Some(&roi) },
        ];
        let dataset = assemble_dataset(&inputs).unwrap();
        assert_eq!(dataset.data.shape(), (6, 4));
        assert_eq!(dataset.data_row_split, vec![0, 4, 6]);
        assert_eq!(dataset.rows_of_map(1).unwrap(), 4..6);
        assert_eq!(dataset.group_labels(), vec![0, 0, 0, 0, 1, 1]);
        // selection order is kept
        assert_eq!(dataset.row_origins[4], RowOrigin { map: 1, coord: (2, 1), spectrum: 5 });
        assert_eq!(dataset.data[(4, 0)], 105.0);
        assert_eq!(dataset.data[(5, 0)], 100.0);
        assert!(dataset.rows_of_map(2).is_err());
    }

    #[test]
    fn test_sparse_selection_drops_empty_pixels() {
        let mut rc2ind = FxHashMap::default();
        rc2ind.insert((0, 0), 0);
        rc2ind.insert((1, 1), 1);
        let index_map = Arc::new(IndexMap::build(2, 2, rc2ind).unwrap());
        let spectra = MapSpectra::new(vec![1.0, 2.0], vec![vec![1.0, 1.0], vec![2.0, 2.0]]).unwrap();
        let roi: Vec<Rc> = vec![(0, 1), (1, 1)];
        let inputs = [FactorInput { spectra: &spectra, index_map, selection: Some(&roi) }];
        let dataset = assemble_dataset(&inputs).unwrap();
        assert_eq!(dataset.data.nrows(), 1);
        assert_eq!(dataset.row_origins[0].spectrum, 1);
    }

    #[test]
    fn test_axis_length_mismatch() {
        let (a, a_map) = dense_map(2, 2, 0.0);
        let b = MapSpectra::new(vec![1.0, 2.0], vec![vec![0.0, 0.0]; 4]).unwrap();
        let inputs = [
            FactorInput { spectra: &a, index_map: a_map.clone(), selection: None },
            FactorInput { spectra: &b, index_map: a_map, selection: None },
        ];
        let err = assemble_dataset(&inputs).unwrap_err();
        assert!(matches!(err, MapError::ShapeMismatch { expected: 4, actual: 2, .. }));
        assert_eq!(err.kind(), mapcore::ErrorKind::Consistency);
    }

    #[test]
    fn test_pca_scores_are_centered() {
        let (a, a_map) = dense_map(3, 3, 0.0);
        let mut pipeline = FactorizationPipeline::new();
        pipeline.assemble(&[FactorInput { spectra: &a, index_map: a_map, selection: None }]).unwrap();
        let result = pipeline.factorize(FactorMethod::Pca, 2).unwrap();
        assert_eq!(result.components.shape(), (2, 4));
        assert_eq!(result.scores.shape(), (9, 2));
        assert!(result.scores.column(0).mean().abs() < 1e-9);
        let ratio = result.explained_variance_ratio.as_ref().unwrap();
        assert!(ratio[0] >= ratio[1]);
    }

    #[test]
    fn test_nmf_rejects_negative_and_keeps_result() {
        let (a, a_map) = dense_map(2, 2, 0.0);
        let mut pipeline = FactorizationPipeline::new();
        pipeline.assemble(&[FactorInput { spectra: &a, index_map: a_map.clone(), selection: None }]).unwrap();
        pipeline.factorize(FactorMethod::Nmf, 2).unwrap();
        assert!(pipeline.result().unwrap().reconstruction_error.is_some());

        let (negative, _) = dense_map(2, 2, -10.0);
        let before = pipeline.result().map(|r| r.scores.clone());
        let mut other = pipeline.clone();
        other.assemble(&[FactorInput { spectra: &negative, index_map: a_map, selection: None }]).unwrap();
        assert!(matches!(other.factorize(FactorMethod::Nmf, 2), Err(MapError::NonNegativity { .. })));
        assert!(other.result().is_none());
        assert_eq!(pipeline.result().map(|r| r.scores.clone()), before);

        // a failed NMF on valid data leaves the prior result in place
        assert!(pipeline.factorize(FactorMethod::Nmf, 0).is_err());
        assert_eq!(pipeline.result().map(|r| r.scores.clone()), before);
    }

    #[test]
    fn test_empty_dataset_clears_result() {
        let (a, a_map) = dense_map(2, 2, 0.0);
        let mut pipeline = FactorizationPipeline::new();
        pipeline.assemble(&[FactorInput { spectra: &a, index_map: a_map.clone(), selection: None }]).unwrap();
        pipeline.factorize(FactorMethod::Pca, 1).unwrap();

        let empty: Vec<Rc> = vec![];
        pipeline.dataset = Some(assemble_dataset(&[FactorInput { spectra: &a, index_map: a_map, selection: Some(&empty) }]).unwrap());
        assert!(matches!(pipeline.factorize(FactorMethod::Pca, 1), Err(MapError::EmptyDataset)));
        assert!(pipeline.result().is_none());
        assert!(matches!(FactorizationPipeline::new().factorize(FactorMethod::Nmf, 2), Err(MapError::NotReady(_))));
    }

    #[test]
    fn test_project_back() {
        let (a, a_map) = dense_map(2, 3, 1.0);
        let (b, b_map) = dense_map(2, 2, 1.0);
        let roi: Vec<Rc> = vec![(0, 1)];
        let mut pipeline = FactorizationPipeline::new();
        pipeline
            .assemble(&[
                FactorInput { spectra: &a, index_map: a_map, selection: None },
                FactorInput { spectra: &b, index_map: b_map, selection: Some(&roi) },
            ])
            .unwrap();
        pipeline.factorize(FactorMethod::Nmf, 2).unwrap();
        let scores = pipeline.result().unwrap().scores.clone();

        // full map: flipped reshape of the map's score column
        let full = pipeline.project_back(1, 0).unwrap();
        assert_eq!(full.shape(), (2, 3));
        assert_eq!(full[(1, 0)], scores[(0, 1)]);
        assert_eq!(full[(0, 2)], scores[(5, 1)]);

        // restricted map: only the selected pixel is set
        let restricted = pipeline.project_back(0, 1).unwrap();
        assert_eq!(restricted[(1, 1)], scores[(6, 0)]);
        assert_eq!(restricted.iter().filter(|&&v| v != 0.0).count(), usize::from(scores[(6, 0)] != 0.0));

        assert!(matches!(pipeline.project_back(2, 0), Err(MapError::IndexOutOfRange { index: 2, len: 2 })));
        assert!(pipeline.project_back(0, 2).is_err());
    }

    #[test]
    fn test_json_export() {
        let (a, a_map) = dense_map(2, 2, 0.0);
        let mut pipeline = FactorizationPipeline::new();
        assert!(pipeline.to_json_string().is_err());
        pipeline.assemble(&[FactorInput { spectra: &a, index_map: a_map, selection: None }]).unwrap();
        pipeline.factorize(FactorMethod::Pca, 2).unwrap();

        let text = pipeline.to_json_string().unwrap();
        let export: FactorizationExport = serde_json::from_str(&text).unwrap();
        assert_eq!(export.method, FactorMethod::Pca);
        assert_eq!(export.components.len(), 2);
        assert_eq!(export.scores.len(), 4);
        assert_eq!(export.data_row_split, vec![0, 4]);
        assert_eq!(export.row_origins[3].coord, (1, 1));
    }
}
