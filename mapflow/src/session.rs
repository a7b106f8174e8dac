// mapflow/src/session.rs

use std::sync::Arc;

use mapcore::data::index_map::{IndexMap, Rc};
use mapcore::data::spectra::{MapSpectra, SpectraSource};
use mapcore::selection::roi::{PolygonRoi, ThresholdMask};
use mapcore::selection::selection_set::{Resolution, SelectionSet, Selector};
use mapcore::selection::snapshot::RoiSnapshot;
use mapcore::{MapError, Result};
use nalgebra::{DMatrix, DVector};

use crate::clustering::ClusteringPipeline;
use crate::config::{AnalysisConfig, ClusterParam, ClusteringParams, Recompute};
use crate::factorization::{FactorInput, FactorizationPipeline, FactorizationResult};

/// Everything known about one open map.
///
/// Created when the map is opened and dropped when it is closed. Selection
/// changes are applied to a copy first and committed only once they resolve,
/// so a failed update leaves the session as it was.
#[derive(Clone, Debug)]
pub struct Session {
    name: String,
    index_map: Arc<IndexMap>,
    spectra: MapSpectra,
    selection: SelectionSet,
    resolution: Resolution,
    roi: PolygonRoi,
    threshold: ThresholdMask,
    params: ClusteringParams,
    clustering: ClusteringPipeline,
}

impl Session {
    /// Opens a map and builds its first clustering dataset over every spectrum.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if the spectrum count differs from the index map,
    /// `IndexOutOfRange` if the index map references a missing spectrum.
    pub fn open(name: &str, index_map: IndexMap, spectra: MapSpectra, params: ClusteringParams) -> Result<Self> {
        if spectra.n_spectra() != index_map.len() {
            return Err(MapError::ShapeMismatch {
                context: "spectrum count",
                expected: index_map.len(),
                actual: spectra.n_spectra(),
            });
        }
        if let Some(&last) = index_map.all_indices().last() {
            if last >= spectra.n_spectra() {
                return Err(MapError::IndexOutOfRange { index: last, len: spectra.n_spectra() });
            }
        }

        let index_map = Arc::new(index_map);
        let selection = SelectionSet::new(index_map.clone());
        let resolution = selection.resolve()?;
        let mut clustering = ClusteringPipeline::new(spectra.wavenumbers.clone())?;
        if let Err(e) = clustering.set_wavenumber_window(&params.wavenumber_range) {
            log::warn!("{}: keeping the full wavenumber range ({})", name, e);
        }
        clustering.build_dataset(&spectra, &resolution.indices)?;
        log::info!(
            "Opened map {} ({}x{}, {} spectra, {})",
            name,
            index_map.rows(),
            index_map.cols(),
            index_map.len(),
            if index_map.is_dense() { "dense" } else { "sparse" }
        );

        Ok(Session {
            name: name.to_string(),
            index_map,
            spectra,
            selection,
            resolution,
            roi: PolygonRoi::default(),
            threshold: ThresholdMask::default(),
            params,
            clustering,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index_map(&self) -> &Arc<IndexMap> {
        &self.index_map
    }

    pub fn spectra(&self) -> &MapSpectra {
        &self.spectra
    }

    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    pub fn roi(&self) -> &PolygonRoi {
        &self.roi
    }

    pub fn threshold(&self) -> &ThresholdMask {
        &self.threshold
    }

    pub fn params(&self) -> &ClusteringParams {
        &self.params
    }

    pub fn clustering(&self) -> &ClusteringPipeline {
        &self.clustering
    }

    fn commit(&mut self, selection: SelectionSet) -> Result<()> {
        let resolution = selection.resolve()?;
        let mut clustering = self.clustering.clone();
        clustering.build_dataset(&self.spectra, &resolution.indices)?;
        log::debug!("{}: {} of {} spectra selected", self.name, resolution.len(), self.index_map.len());
        self.selection = selection;
        self.resolution = resolution;
        self.clustering = clustering;
        Ok(())
    }

    /// Sets or clears a selector with explicit pixel coordinates.
    pub fn set_selector(&mut self, selector: Selector, coords: Option<Vec<Rc>>) -> Result<&Resolution> {
        let mut selection = self.selection.clone();
        selection.set_selector(selector, coords);
        self.commit(selection)?;
        Ok(&self.resolution)
    }

    /// Shows (`Some`) or hides (`None`) the ROI polygon.
    pub fn set_roi(&mut self, roi: Option<PolygonRoi>) -> Result<&Resolution> {
        let mut selection = self.selection.clone();
        let coords = roi
            .as_ref()
            .map(|r| r.enclosed_pixels(self.index_map.rows(), self.index_map.cols()));
        selection.set_selector(Selector::Roi, coords);
        self.commit(selection)?;
        if let Some(roi) = roi {
            self.roi = roi;
        }
        Ok(&self.resolution)
    }

    /// Turns the threshold mask on with `mask`, or off with `None`.
    pub fn set_mask(&mut self, mask: Option<ThresholdMask>) -> Result<&Resolution> {
        let mut selection = self.selection.clone();
        let coords = match &mask {
            Some(m) => Some(m.select(&self.spectra, &self.index_map)?),
            None => None,
        };
        selection.set_selector(Selector::Mask, coords);
        self.commit(selection)?;
        if let Some(mask) = mask {
            self.threshold = mask;
        }
        Ok(&self.resolution)
    }

    pub fn set_inversion(&mut self, inverted: bool) -> Result<&Resolution> {
        let mut selection = self.selection.clone();
        selection.set_inversion(inverted);
        self.commit(selection)?;
        Ok(&self.resolution)
    }

    /// Mean spectrum over the current selection.
    pub fn roi_mean_spectrum(&self) -> Result<DVector<f64>> {
        self.spectra.mean_spectrum(&self.resolution.indices)
    }

    /// Display image of the auto-ROI threshold mask.
    pub fn mask_image(&self) -> Result<DMatrix<bool>> {
        self.threshold.image(&self.spectra, &self.index_map)
    }

    pub fn snapshot(&self) -> RoiSnapshot {
        RoiSnapshot::capture(&self.selection, self.roi.clone(), self.threshold)
    }

    pub fn restore(&mut self, snapshot: &RoiSnapshot) -> Result<&Resolution> {
        let mut selection = self.selection.clone();
        snapshot.apply(&mut selection, &self.spectra)?;
        self.commit(selection)?;
        self.roi = snapshot.roi.clone();
        self.threshold = snapshot.threshold;
        Ok(&self.resolution)
    }

    /// Applies a new wavenumber range and rebuilds the dataset.
    pub fn set_wavenumber_window(&mut self, text: &str) -> Result<()> {
        let mut clustering = self.clustering.clone();
        clustering.set_wavenumber_window(text)?;
        clustering.build_dataset(&self.spectra, &self.resolution.indices)?;
        self.clustering = clustering;
        self.params.wavenumber_range = text.to_string();
        Ok(())
    }

    /// Embedding, clustering and scatter, in that order.
    ///
    /// The wavenumber range is re-read from the parameters first. Everything
    /// runs on a copy of the pipeline, so a failure at any step keeps the
    /// previous embedding, clusters and scatter.
    pub fn compute_embedding(&mut self) -> Result<()> {
        let mut clustering = self.clustering.clone();
        clustering.set_wavenumber_window(&self.params.wavenumber_range)?;
        clustering.build_dataset(&self.spectra, &self.resolution.indices)?;
        clustering.compute_embedding(&self.params.embedding)?;
        cluster_and_scatter(&mut clustering, &self.params)?;
        self.clustering = clustering;
        Ok(())
    }

    /// Clusters the current embedding and redraws the scatter plot.
    pub fn compute_clusters(&mut self) -> Result<()> {
        let mut clustering = self.clustering.clone();
        cluster_and_scatter(&mut clustering, &self.params)?;
        self.clustering = clustering;
        Ok(())
    }

    pub fn update_scatter(&mut self) -> Result<()> {
        let mut clustering = self.clustering.clone();
        scatter(&mut clustering, &self.params)?;
        self.clustering = clustering;
        Ok(())
    }

    /// Applies `update` to the clustering parameters and runs whatever the
    /// changed parameter requires. Returns the work that was done.
    ///
    /// The new parameters are kept only if that work succeeds.
    pub fn change_param(&mut self, param: ClusterParam, update: impl FnOnce(&mut ClusteringParams)) -> Result<Recompute> {
        let previous = self.params.clone();
        update(&mut self.params);
        if param == ClusterParam::Components {
            let n = self.params.embedding.n_components().max(1);
            self.params.x_component = self.params.x_component.clamp(1, n);
            self.params.y_component = self.params.y_component.clamp(1, n);
        }
        let route = param.route();
        let outcome = match route {
            Recompute::Embedding => self.compute_embedding(),
            Recompute::Clusters if self.clustering.embedding().is_some() => self.compute_clusters(),
            Recompute::Scatter if self.clustering.clusters().is_some() => self.update_scatter(),
            _ => return Ok(Recompute::Nothing),
        };
        match outcome {
            Ok(()) => Ok(route),
            Err(e) => {
                self.params = previous;
                Err(e)
            }
        }
    }
}

fn cluster_and_scatter(clustering: &mut ClusteringPipeline, params: &ClusteringParams) -> Result<()> {
    clustering.compute_clusters(params.n_clusters)?;
    scatter(clustering, params)
}

fn scatter(clustering: &mut ClusteringPipeline, params: &ClusteringParams) -> Result<()> {
    let n_components = clustering
        .embedding()
        .map(|e| e.ncols())
        .ok_or(MapError::NotReady("embedding"))?;
    let (x, y) = params.scatter_columns(n_components)?;
    clustering.update_scatter(x, y)?;
    Ok(())
}

/// Open maps, the active one, and the analyses that span all of them.
#[derive(Debug, Default)]
pub struct Workspace {
    sessions: Vec<Session>,
    active: Option<usize>,
    config: AnalysisConfig,
    factorization: FactorizationPipeline,
}

impl Workspace {
    pub fn new(config: AnalysisConfig) -> Self {
        Workspace { config, ..Default::default() }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut AnalysisConfig {
        &mut self.config
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// Opens a map, makes it active and returns its position.
    pub fn open_map(&mut self, name: &str, index_map: IndexMap, spectra: MapSpectra) -> Result<usize> {
        let session = Session::open(name, index_map, spectra, self.config.clustering.clone())?;
        self.sessions.push(session);
        let index = self.sessions.len() - 1;
        self.active = Some(index);
        Ok(index)
    }

    /// Closes a map. The active map stays active; closing it activates its neighbor.
    pub fn close_map(&mut self, index: usize) -> Result<Session> {
        if index >= self.sessions.len() {
            return Err(MapError::IndexOutOfRange { index, len: self.sessions.len() });
        }
        let session = self.sessions.remove(index);
        self.active = match self.active {
            _ if self.sessions.is_empty() => None,
            Some(a) if a > index => Some(a - 1),
            Some(a) if a == index => Some(index.min(self.sessions.len() - 1)),
            other => other,
        };
        self.factorization = FactorizationPipeline::new();
        log::info!("Closed map {}", session.name());
        Ok(session)
    }

    pub fn set_active(&mut self, index: usize) -> Result<()> {
        if index >= self.sessions.len() {
            return Err(MapError::IndexOutOfRange { index, len: self.sessions.len() });
        }
        self.active = Some(index);
        Ok(())
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn active(&self) -> Result<&Session> {
        self.active
            .and_then(|i| self.sessions.get(i))
            .ok_or(MapError::NotReady("open map"))
    }

    pub fn active_mut(&mut self) -> Result<&mut Session> {
        self.active
            .and_then(|i| self.sessions.get_mut(i))
            .ok_or(MapError::NotReady("open map"))
    }

    pub fn session(&self, index: usize) -> Option<&Session> {
        self.sessions.get(index)
    }

    pub fn factorization(&self) -> &FactorizationPipeline {
        &self.factorization
    }

    /// Factorizes the selected spectra of every open map with the configured method.
    ///
    /// The stacked dataset and its result replace the previous ones together.
    /// An empty stack clears the previous result; any other failure keeps it.
    pub fn factorize(&mut self) -> Result<&FactorizationResult> {
        let inputs: Vec<FactorInput> = self
            .sessions
            .iter()
            .map(|s| FactorInput {
                spectra: s.spectra(),
                index_map: s.index_map().clone(),
                selection: s.resolution().pixel_selection(),
            })
            .collect();
        let params = &self.config.factorization;
        let mut pipeline = FactorizationPipeline::new();
        pipeline.assemble(&inputs)?;
        match pipeline.factorize(params.method, params.n_components) {
            Ok(_) => {}
            Err(MapError::EmptyDataset) => {
                self.factorization = pipeline;
                return Err(MapError::EmptyDataset);
            }
            Err(e) => return Err(e),
        }
        self.factorization = pipeline;
        self.factorization.result().ok_or(MapError::NotReady("factorization"))
    }

    /// Score image of a 1-based component on one map.
    pub fn component_image(&self, component: usize, map: usize) -> Result<DMatrix<f64>> {
        if component == 0 {
            return Err(MapError::InvalidParameter {
                name: "component",
                reason: "components are numbered from 1".to_string(),
            });
        }
        self.factorization.project_back(component - 1, map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::Stage;
    use crate::config::{EmbeddingConfig, EmbeddingMethod, FactorMethod, UmapConfig};
    use rustc_hash::FxHashMap;

    /// 4x4 dense map; the left half carries a band at 1550, the right half at 3000.
    fn two_region_map() -> (IndexMap, MapSpectra) {
        let axis = vec![1000.0, 1550.0, 2000.0, 3000.0];
        let spectra = (0..16)
            .map(|i| {
                let col = i % 4;
                let j = i as f64 * 0.01;
                if col < 2 {
                    vec![0.1 + j, 5.0 + j, 0.2, 0.1]
                } else {
                    vec![0.1, 0.0, 0.2 + j, 5.0 + j]
                }
            })
            .collect();
        (IndexMap::dense_row_major(4, 4), MapSpectra::new(axis, spectra).unwrap())
    }

    fn params() -> ClusteringParams {
        ClusteringParams {
            embedding: EmbeddingConfig::Umap(UmapConfig { n_components: 2, n_neighbors: 5, ..UmapConfig::default() }),
            wavenumber_range: "1000, 3000".to_string(),
            n_clusters: 2,
            ..ClusteringParams::default()
        }
    }

    fn session() -> Session {
        let (index_map, spectra) = two_region_map();
        Session::open("left-right", index_map, spectra, params()).unwrap()
    }

    #[test]
    fn test_open_validates_counts() {
        let (index_map, _) = two_region_map();
        let spectra = MapSpectra::new(vec![1.0], vec![vec![0.0]; 3]).unwrap();
        let result = Session::open("short", index_map, spectra, params());
        assert!(matches!(result, Err(MapError::ShapeMismatch { expected: 16, actual: 3, .. })));
    }

    #[test]
    fn test_open_builds_full_dataset() {
        let session = session();
        assert!(session.resolution().unrestricted);
        assert_eq!(session.clustering().dataset().map(|d| d.shape()), Some((16, 4)));
    }

    #[test]
    fn test_bad_default_range_falls_back_to_full_axis() {
        let (index_map, spectra) = two_region_map();
        let params = ClusteringParams { wavenumber_range: "1000".to_string(), ..params() };
        let session = Session::open("odd", index_map, spectra, params).unwrap();
        assert_eq!(session.clustering().window().ranges(), &[(0, 3)]);
    }

    #[test]
    fn test_roi_and_mask_drive_dataset() {
        let mut session = session();
        let resolution = session.set_roi(Some(PolygonRoi::square(0.0, 0.0, 2.0))).unwrap();
        assert_eq!(resolution.indices, vec![0, 1, 4, 5]);
        assert_eq!(session.clustering().dataset().map(|d| d.nrows()), Some(4));

        session.set_roi(Some(PolygonRoi::square(1.0, 0.0, 2.0))).unwrap();
        let resolution = session.set_mask(Some(ThresholdMask::default())).unwrap();
        assert_eq!(resolution.indices, vec![1, 5]);

        let resolution = session.set_inversion(true).unwrap();
        assert_eq!(resolution.indices, vec![0, 4, 8, 9, 12, 13]);

        session.set_roi(None).unwrap();
        assert_eq!(session.resolution().len(), 8);
        assert_eq!(session.roi(), &PolygonRoi::square(1.0, 0.0, 2.0));
    }

    #[test]
    fn test_failed_selection_leaves_state() {
        let mut session = session();
        session.set_selector(Selector::Roi, Some(vec![(0, 0)])).unwrap();
        let before = session.resolution().clone();
        let result = session.set_selector(Selector::Roi, Some(vec![(7, 7)]));
        assert!(matches!(result, Err(MapError::MissingCoordinate((7, 7)))));
        assert_eq!(session.resolution(), &before);
        assert!(session.selection().selector(Selector::Roi).unwrap().contains(&(0, 0)));
        assert_eq!(session.clustering().dataset().map(|d| d.nrows()), Some(1));
    }

    #[test]
    fn test_roi_mean_spectrum() {
        let mut session = session();
        session.set_selector(Selector::Roi, Some(vec![(0, 0), (0, 1)])).unwrap();
        let mean = session.roi_mean_spectrum().unwrap();
        assert!((mean[1] - 5.005).abs() < 1e-12);
    }

    #[test]
    fn test_snapshot_restore() {
        let mut session = session();
        session.set_roi(Some(PolygonRoi::square(0.0, 0.0, 2.0))).unwrap();
        session.set_inversion(true).unwrap();
        let snapshot = session.snapshot();
        let expected = session.resolution().clone();

        let mut fresh = self::session();
        let bytes = snapshot.to_bytes().unwrap();
        fresh.restore(&RoiSnapshot::from_bytes(&bytes).unwrap()).unwrap();
        assert_eq!(fresh.resolution(), &expected);
        assert_eq!(fresh.roi(), session.roi());
    }

    #[test]
    fn test_full_clustering_run() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut session = session();
        session.compute_embedding().unwrap();
        let clustering = session.clustering();
        let labels = clustering.labels().unwrap();
        assert_eq!(labels.len(), 16);
        // left and right halves separate
        assert!(labels.iter().enumerate().all(|(i, &l)| (l == labels[0]) == (i % 4 < 2)));
        assert_eq!(clustering.scatter().map(|s| s.points.nrows()), Some(16));
    }

    #[test]
    fn test_param_routing() {
        let mut session = session();
        assert_eq!(session.change_param(ClusterParam::Clusters, |p| p.n_clusters = 3).unwrap(), Recompute::Nothing);

        let route = session.change_param(ClusterParam::Components, |p| p.embedding.set_n_components(3)).unwrap();
        assert_eq!(route, Recompute::Embedding);
        assert_eq!(session.clustering().embedding().map(|e| e.ncols()), Some(3));
        assert_eq!(session.clustering().clusters().map(|c| c.n_clusters), Some(3));

        let route = session.change_param(ClusterParam::YComponent, |p| p.y_component = 3).unwrap();
        assert_eq!(route, Recompute::Scatter);
        assert_eq!(session.clustering().scatter().map(|s| s.columns), Some((0, 2)));

        // shrinking the embedding pulls the scatter axes back into range
        session.change_param(ClusterParam::Components, |p| p.embedding.set_n_components(2)).unwrap();
        assert_eq!(session.params().y_component, 2);

        let invalid = session.change_param(ClusterParam::Clusters, |p| p.n_clusters = 40);
        assert!(matches!(invalid, Err(MapError::InsufficientData { .. })));
        assert_eq!(session.clustering().clusters().map(|c| c.n_clusters), Some(3));
        assert_eq!(session.params().n_clusters, 3);

        // a rejected value does not leak into later recomputes
        session.change_param(ClusterParam::Components, |p| p.embedding.set_n_components(3)).unwrap();
        assert_eq!(session.clustering().clusters().map(|c| c.n_clusters), Some(3));
    }

    #[test]
    fn test_failed_embedding_keeps_results() {
        let mut session = session();
        session.compute_embedding().unwrap();
        let embedding = session.clustering().embedding().cloned();
        let labels = session.clustering().labels().map(|l| l.to_vec());

        let route = session
            .change_param(ClusterParam::Embedding, |p| p.embedding.switch_to(EmbeddingMethod::Pca))
            .unwrap();
        assert_eq!(route, Recompute::Nothing);
        assert!(matches!(session.compute_embedding(), Err(MapError::NotImplemented(_))));
        assert_eq!(session.clustering().stage(), Stage::ClustersReady);
        assert_eq!(session.clustering().embedding().cloned(), embedding);
        assert_eq!(session.clustering().labels().map(|l| l.to_vec()), labels);
        assert!(session.clustering().scatter().is_some());

        session.change_param(ClusterParam::Embedding, |p| p.embedding.switch_to(EmbeddingMethod::Umap)).unwrap();
        session.change_param(ClusterParam::WavenumberRange, |p| p.wavenumber_range = "1000".to_string()).unwrap();
        assert!(matches!(session.compute_embedding(), Err(MapError::OddWindowCount(_))));
        assert_eq!(session.clustering().embedding().cloned(), embedding);
        assert_eq!(session.clustering().window().len(), 4);
    }

    #[test]
    fn test_workspace_lifecycle() {
        let mut workspace = Workspace::new(AnalysisConfig::default());
        assert!(matches!(workspace.active(), Err(MapError::NotReady(_))));

        for name in ["a", "b", "c"] {
            let (index_map, spectra) = two_region_map();
            workspace.open_map(name, index_map, spectra).unwrap();
        }
        assert_eq!(workspace.active().unwrap().name(), "c");

        workspace.set_active(0).unwrap();
        workspace.active_mut().unwrap().set_inversion(true).unwrap();
        workspace.close_map(1).unwrap();
        assert_eq!(workspace.active().unwrap().name(), "a");
        // other maps keep their own state
        assert!(!workspace.session(1).unwrap().selection().is_inverted());

        workspace.close_map(0).unwrap();
        assert_eq!(workspace.active().unwrap().name(), "c");
        workspace.close_map(0).unwrap();
        assert!(workspace.is_empty());
        assert!(workspace.active_index().is_none());
        assert!(workspace.set_active(0).is_err());
    }

    #[test]
    fn test_workspace_factorization() {
        let mut workspace = Workspace::new(AnalysisConfig::default());
        let (index_map, spectra) = two_region_map();
        workspace.open_map("full", index_map, spectra).unwrap();

        let mut rc2ind = FxHashMap::default();
        rc2ind.insert((0, 0), 0);
        rc2ind.insert((1, 2), 1);
        let sparse = IndexMap::build(2, 3, rc2ind).unwrap();
        let spectra = MapSpectra::new(vec![1000.0, 1550.0, 2000.0, 3000.0], vec![vec![1.0, 2.0, 0.0, 0.0], vec![0.0, 0.0, 2.0, 1.0]]).unwrap();
        workspace.open_map("sparse", sparse, spectra).unwrap();
        workspace
            .active_mut()
            .unwrap()
            .set_selector(Selector::Roi, Some(vec![(1, 2), (1, 1)]))
            .unwrap();

        workspace.config_mut().factorization.n_components = 2;
        let result = workspace.factorize().unwrap();
        assert_eq!(result.method, FactorMethod::Nmf);
        assert_eq!(result.scores.shape(), (17, 2));
        assert_eq!(workspace.factorization().dataset().map(|d| d.data_row_split.clone()), Some(vec![0, 16, 17]));

        let image = workspace.component_image(1, 1).unwrap();
        assert_eq!(image.shape(), (2, 3));
        assert_eq!(image[(0, 0)], 0.0);
        assert!(workspace.component_image(0, 1).is_err());
    }

    #[test]
    fn test_failed_factorization_keeps_result() {
        let mut workspace = Workspace::new(AnalysisConfig::default());
        let (index_map, spectra) = two_region_map();
        workspace.open_map("full", index_map, spectra).unwrap();
        workspace.config_mut().factorization.n_components = 2;
        workspace.factorize().unwrap();

        let spectra = MapSpectra::new(vec![1000.0, 1550.0, 2000.0, 3000.0], vec![vec![-1.0, 0.0, 0.0, 0.0]]).unwrap();
        workspace.open_map("negative", IndexMap::dense_row_major(1, 1), spectra).unwrap();
        assert!(matches!(workspace.factorize(), Err(MapError::NonNegativity { .. })));
        let kept = workspace.factorization();
        assert_eq!(kept.result().map(|r| r.scores.shape()), Some((16, 2)));
        assert_eq!(kept.dataset().map(|d| d.data_row_split.clone()), Some(vec![0, 16]));
        assert!(workspace.component_image(1, 0).is_ok());
    }

    #[test]
    fn test_empty_factorization_clears_result() {
        let mut workspace = Workspace::new(AnalysisConfig::default());
        let (index_map, spectra) = two_region_map();
        workspace.open_map("full", index_map, spectra).unwrap();
        workspace.config_mut().factorization.n_components = 2;
        workspace.factorize().unwrap();

        workspace.active_mut().unwrap().set_selector(Selector::Roi, Some(vec![])).unwrap();
        assert!(matches!(workspace.factorize(), Err(MapError::EmptyDataset)));
        assert!(workspace.factorization().result().is_none());
    }
}
