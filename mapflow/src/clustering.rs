// mapflow/src/clustering.rs

use std::sync::Arc;

use mapcore::algorithm::colormap::viridis_lut;
use mapcore::algorithm::kmeans::{kmeans, KMeansParams};
use mapcore::algorithm::nearest::NearestNeighborLocator;
use mapcore::algorithm::umap;
use mapcore::algorithm::window::WavenumberWindow;
use mapcore::data::index_map::IndexMap;
use mapcore::data::spectra::SpectraSource;
use mapcore::{MapError, Result};
use nalgebra::DMatrix;
use rustc_hash::FxHashMap;

use crate::config::EmbeddingConfig;

/// Progress of a clustering session. Later stages imply the earlier ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Idle,
    DatasetReady,
    EmbeddingReady,
    ClustersReady,
}

/// Result of one k-means run and everything derived from it.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterOutputs {
    pub n_clusters: usize,
    /// cluster id per dataset row
    pub labels: Vec<usize>,
    /// `[n_clusters x n_selected_wavenumbers]`; zero rows for empty clusters
    pub mean_spectra: DMatrix<f64>,
    /// `[n_clusters x 3]`, RGB in 0–255
    pub color_lut: DMatrix<f64>,
}

/// Two embedding columns plotted against each other, with per-point colors.
#[derive(Clone, Debug, PartialEq)]
pub struct ScatterData {
    /// zero-based embedding columns
    pub columns: (usize, usize),
    /// `[n_rows x 2]`
    pub points: DMatrix<f64>,
    pub colors: Vec<[f64; 3]>,
}

/// Dataset -> embedding -> clusters, for the active map.
///
/// Every stage keeps the previous stage's output; a failed step never
/// mutates state, so the last valid result stays visible.
#[derive(Clone, Debug)]
pub struct ClusteringPipeline {
    wavenumbers: Arc<Vec<f64>>,
    window: WavenumberWindow,
    /// dataset row -> spectrum index
    spectrum_indices: Vec<usize>,
    row_of: FxHashMap<usize, usize>,
    dataset: Option<DMatrix<f64>>,
    embedding: Option<DMatrix<f64>>,
    clusters: Option<ClusterOutputs>,
    scatter: Option<ScatterData>,
    locator: NearestNeighborLocator,
}

impl ClusteringPipeline {
    /// Pipeline over `wavenumbers`, initially windowed to the whole axis.
    pub fn new(wavenumbers: Arc<Vec<f64>>) -> Result<Self> {
        let window = WavenumberWindow::full(wavenumbers.len())?;
        Ok(ClusteringPipeline {
            wavenumbers,
            window,
            spectrum_indices: Vec::new(),
            row_of: FxHashMap::default(),
            dataset: None,
            embedding: None,
            clusters: None,
            scatter: None,
            locator: NearestNeighborLocator::new(),
        })
    }

    pub fn stage(&self) -> Stage {
        if self.clusters.is_some() {
            Stage::ClustersReady
        } else if self.embedding.is_some() {
            Stage::EmbeddingReady
        } else if self.dataset.is_some() {
            Stage::DatasetReady
        } else {
            Stage::Idle
        }
    }

    pub fn window(&self) -> &WavenumberWindow {
        &self.window
    }

    /// Wavenumbers of the dataset columns.
    pub fn wavenumbers_select(&self) -> Vec<f64> {
        self.window.selected_wavenumbers(&self.wavenumbers)
    }

    pub fn dataset(&self) -> Option<&DMatrix<f64>> {
        self.dataset.as_ref()
    }

    pub fn embedding(&self) -> Option<&DMatrix<f64>> {
        self.embedding.as_ref()
    }

    pub fn clusters(&self) -> Option<&ClusterOutputs> {
        self.clusters.as_ref()
    }

    pub fn labels(&self) -> Option<&[usize]> {
        self.clusters.as_ref().map(|c| c.labels.as_slice())
    }

    pub fn scatter(&self) -> Option<&ScatterData> {
        self.scatter.as_ref()
    }

    pub fn n_rows(&self) -> usize {
        self.spectrum_indices.len()
    }

    pub fn spectrum_of_row(&self, row: usize) -> Option<usize> {
        self.spectrum_indices.get(row).copied()
    }

    pub fn row_of_spectrum(&self, spectrum: usize) -> Option<usize> {
        self.row_of.get(&spectrum).copied()
    }

    fn invalidate_from(&mut self, stage: Stage) {
        if stage <= Stage::DatasetReady {
            self.dataset = None;
        }
        if stage <= Stage::EmbeddingReady {
            self.embedding = None;
        }
        self.clusters = None;
        self.scatter = None;
        self.locator = NearestNeighborLocator::new();
    }

    /// Replaces the wavenumber window from user text such as `"400, 1000, 2000, 2500"`.
    ///
    /// On success every stage is dropped and the dataset must be rebuilt. On
    /// error nothing changes.
    pub fn set_wavenumber_window(&mut self, text: &str) -> Result<()> {
        let window = WavenumberWindow::parse(text, &self.wavenumbers)?;
        self.window = window;
        self.invalidate_from(Stage::DatasetReady);
        Ok(())
    }

    /// Stacks the windowed spectra of `indices`, one row each, in the given order.
    ///
    /// An empty `indices` gives a valid zero-row dataset.
    ///
    /// # Errors
    ///
    /// * `ShapeMismatch` - the spectra do not match the wavenumber axis
    /// * `IndexOutOfRange` - an index has no spectrum
    pub fn build_dataset<S: SpectraSource + ?Sized>(&mut self, spectra: &S, indices: &[usize]) -> Result<()> {
        let n_channels = self.wavenumbers.len();
        let rows: Vec<&[f64]> = indices
            .iter()
            .map(|&i| {
                let spectrum = spectra
                    .spectrum(i)
                    .ok_or(MapError::IndexOutOfRange { index: i, len: spectra.n_spectra() })?;
                if spectrum.len() != n_channels {
                    return Err(MapError::ShapeMismatch {
                        context: "spectrum channel count",
                        expected: n_channels,
                        actual: spectrum.len(),
                    });
                }
                Ok(spectrum)
            })
            .collect::<Result<_>>()?;

        let channels = self.window.selected_channels();
        let dataset = DMatrix::from_fn(rows.len(), channels.len(), |r, c| rows[r][channels[c]]);

        self.invalidate_from(Stage::DatasetReady);
        self.row_of = indices.iter().enumerate().map(|(row, &i)| (i, row)).collect();
        self.spectrum_indices = indices.to_vec();
        log::debug!("Clustering dataset: {} spectra x {} wavenumbers", dataset.nrows(), dataset.ncols());
        self.dataset = Some(dataset);
        Ok(())
    }

    /// Embeds the dataset; clusters computed on the old embedding are dropped.
    ///
    /// # Errors
    ///
    /// * `NotReady` - no dataset
    /// * `NotImplemented` - PCA embedding; the previous embedding is kept
    pub fn compute_embedding(&mut self, config: &EmbeddingConfig) -> Result<()> {
        let dataset = self.dataset.as_ref().ok_or(MapError::NotReady("dataset"))?;
        log::info!("Compute embedding.");
        let embedding = match config {
            EmbeddingConfig::Umap(c) => umap::fit_transform(dataset, &c.to_params())?,
            EmbeddingConfig::Pca(_) => return Err(MapError::NotImplemented("PCA embedding")),
        };
        self.invalidate_from(Stage::ClustersReady);
        self.embedding = Some(embedding);
        Ok(())
    }

    /// Runs k-means on the embedding and derives mean spectra and colors.
    ///
    /// # Errors
    ///
    /// * `NotReady` - no embedding
    /// * `InsufficientData` - more clusters than spectra; prior labels are kept
    pub fn compute_clusters(&mut self, n_clusters: usize) -> Result<()> {
        let embedding = self.embedding.as_ref().ok_or(MapError::NotReady("embedding"))?;
        let dataset = self.dataset.as_ref().ok_or(MapError::NotReady("dataset"))?;
        log::info!("Compute clusters.");

        let result = kmeans(embedding, &KMeansParams::new(n_clusters))?;

        let n_channels = dataset.ncols();
        let mut mean_spectra = DMatrix::<f64>::zeros(n_clusters, n_channels);
        let mut counts = vec![0usize; n_clusters];
        for (row, &label) in result.labels.iter().enumerate() {
            counts[label] += 1;
            let mut target = mean_spectra.row_mut(label);
            target += dataset.row(row);
        }
        for (k, &count) in counts.iter().enumerate() {
            if count > 0 {
                mean_spectra.row_mut(k).unscale_mut(count as f64);
            } else {
                log::warn!("cluster {} received no spectra, mean spectrum set to zero", k);
            }
        }

        self.clusters = Some(ClusterOutputs {
            n_clusters,
            labels: result.labels,
            mean_spectra,
            color_lut: viridis_lut(n_clusters),
        });
        self.scatter = None;
        self.locator = NearestNeighborLocator::new();
        Ok(())
    }

    /// Cluster id of dataset row `row`.
    pub fn cluster_of_spectrum(&self, row: usize) -> Result<usize> {
        let labels = self.labels().ok_or(MapError::NotReady("clusters"))?;
        labels
            .get(row)
            .copied()
            .ok_or(MapError::IndexOutOfRange { index: row, len: labels.len() })
    }

    /// Mean spectrum of the cluster `row` belongs to.
    pub fn cluster_mean_of_row(&self, row: usize) -> Result<(usize, Vec<f64>)> {
        let label = self.cluster_of_spectrum(row)?;
        let clusters = self.clusters.as_ref().ok_or(MapError::NotReady("clusters"))?;
        Ok((label, clusters.mean_spectra.row(label).iter().copied().collect()))
    }

    /// Label image in display orientation; `None` where no clustered spectrum sits.
    pub fn cluster_image(&self, index_map: &IndexMap) -> Result<DMatrix<Option<u32>>> {
        let labels = self.labels().ok_or(MapError::NotReady("clusters"))?;
        let mut values = Vec::with_capacity(labels.len());
        for (&spectrum, &label) in self.spectrum_indices.iter().zip(labels) {
            let coord = index_map
                .coordinate_of(spectrum)
                .ok_or(MapError::IndexOutOfRange { index: spectrum, len: index_map.len() })?;
            values.push((coord, Some(label as u32)));
        }
        index_map.display_image(None, values)
    }

    /// Projects the embedding onto two columns, colors the points by cluster
    /// and refits the nearest-neighbor locator on them.
    ///
    /// # Errors
    ///
    /// * `NotReady` - no clusters
    /// * `InvalidParameter` - a column is outside the embedding
    /// * `EmptyPointSet` - the dataset has no rows
    pub fn update_scatter(&mut self, x_col: usize, y_col: usize) -> Result<&ScatterData> {
        let clusters = self.clusters.as_ref().ok_or(MapError::NotReady("clusters"))?;
        let embedding = self.embedding.as_ref().ok_or(MapError::NotReady("embedding"))?;
        for (name, col) in [("x_component", x_col), ("y_component", y_col)] {
            if col >= embedding.ncols() {
                return Err(MapError::InvalidParameter {
                    name,
                    reason: format!("column {} outside a {}-component embedding", col, embedding.ncols()),
                });
            }
        }

        let points = DMatrix::from_fn(embedding.nrows(), 2, |r, c| {
            embedding[(r, if c == 0 { x_col } else { y_col })]
        });
        let colors = clusters
            .labels
            .iter()
            .map(|&l| [clusters.color_lut[(l, 0)], clusters.color_lut[(l, 1)], clusters.color_lut[(l, 2)]])
            .collect();

        log::info!("Training nearest-neighbor index on {} scatter points.", points.nrows());
        let mut locator = NearestNeighborLocator::new();
        locator.fit(&points)?;
        self.locator = locator;
        Ok(self.scatter.insert(ScatterData { columns: (x_col, y_col), points, colors }))
    }

    /// Dataset row closest to a click on the scatter plot.
    pub fn nearest_row(&self, x: f64, y: f64) -> Result<usize> {
        self.locator.query_nearest(x, y)
    }

    /// Scatter position of dataset row `row`.
    pub fn scatter_point(&self, row: usize) -> Option<(f64, f64)> {
        self.locator.point(row)
    }
}
