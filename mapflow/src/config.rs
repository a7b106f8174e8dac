// mapflow/src/config.rs

use std::fmt::{self, Display, Formatter};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::str::FromStr;

use mapcore::algorithm::distance::Metric;
use mapcore::algorithm::umap::UmapParams;
use mapcore::algorithm::window::nearest_index;
use mapcore::selection::roi::ThresholdMask;
use mapcore::{MapError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Embedding
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmbeddingMethod {
    #[serde(rename = "UMAP")]
    Umap,
    #[serde(rename = "PCA")]
    Pca,
}

/// Row normalization applied before a PCA embedding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Normalization {
    #[default]
    L2,
    L1,
    #[serde(rename = "None")]
    Off,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UmapConfig {
    pub n_components: usize,
    pub n_neighbors: usize,
    pub min_dist: f64,
    pub metric: Metric,
}

impl Default for UmapConfig {
    fn default() -> Self {
        Self {
            n_components: 3,
            n_neighbors: 15,
            min_dist: 0.1,
            metric: Metric::Euclidean,
        }
    }
}

impl UmapConfig {
    /// Fit parameters with the fixed seed 0.
    pub fn to_params(&self) -> UmapParams {
        UmapParams {
            n_neighbors: self.n_neighbors,
            min_dist: self.min_dist.clamp(0.0, 1.0),
            n_components: self.n_components,
            metric: self.metric,
            seed: 0,
            ..UmapParams::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcaEmbeddingConfig {
    pub n_components: usize,
    pub normalization: Normalization,
}

impl Default for PcaEmbeddingConfig {
    fn default() -> Self {
        Self { n_components: 3, normalization: Normalization::L2 }
    }
}

/// Embedding settings, one variant per method carrying only its own fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum EmbeddingConfig {
    #[serde(rename = "UMAP")]
    Umap(UmapConfig),
    #[serde(rename = "PCA")]
    Pca(PcaEmbeddingConfig),
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig::Umap(UmapConfig::default())
    }
}

impl EmbeddingConfig {
    pub fn method(&self) -> EmbeddingMethod {
        match self {
            EmbeddingConfig::Umap(_) => EmbeddingMethod::Umap,
            EmbeddingConfig::Pca(_) => EmbeddingMethod::Pca,
        }
    }

    pub fn n_components(&self) -> usize {
        match self {
            EmbeddingConfig::Umap(c) => c.n_components,
            EmbeddingConfig::Pca(c) => c.n_components,
        }
    }

    pub fn set_n_components(&mut self, n_components: usize) {
        match self {
            EmbeddingConfig::Umap(c) => c.n_components = n_components,
            EmbeddingConfig::Pca(c) => c.n_components = n_components,
        }
    }

    /// Switches method, carrying the component count over to the new variant.
    pub fn switch_to(&mut self, method: EmbeddingMethod) {
        if self.method() == method {
            return;
        }
        let n_components = self.n_components();
        *self = match method {
            EmbeddingMethod::Umap => EmbeddingConfig::Umap(UmapConfig { n_components, ..UmapConfig::default() }),
            EmbeddingMethod::Pca => EmbeddingConfig::Pca(PcaEmbeddingConfig { n_components, ..PcaEmbeddingConfig::default() }),
        };
    }
}

/// Clustering fields shown for `method`, in display order.
pub fn embedding_visible_fields(method: EmbeddingMethod) -> &'static [&'static str] {
    match method {
        EmbeddingMethod::Umap => &[
            "Embedding", "Components", "Neighbors", "Min Dist", "Metric",
            "Wavenumber Range", "Clusters", "X Component", "Y Component",
        ],
        EmbeddingMethod::Pca => &[
            "Embedding", "Components", "Normalization",
            "Wavenumber Range", "Clusters", "X Component", "Y Component",
        ],
    }
}

// ---------------------------------------------------------------------------
// Clustering
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringParams {
    pub embedding: EmbeddingConfig,
    pub wavenumber_range: String,
    pub n_clusters: usize,
    /// 1-based embedding column shown on the scatter x axis
    pub x_component: usize,
    /// 1-based embedding column shown on the scatter y axis
    pub y_component: usize,
}

impl Default for ClusteringParams {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig::default(),
            wavenumber_range: "400, 4000".to_string(),
            n_clusters: 3,
            x_component: 1,
            y_component: 2,
        }
    }
}

impl ClusteringParams {
    /// Zero-based embedding columns for the scatter plot.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` unless both components lie in `1..=n_components`.
    pub fn scatter_columns(&self, n_components: usize) -> Result<(usize, usize)> {
        for (name, value) in [("x_component", self.x_component), ("y_component", self.y_component)] {
            if value == 0 || value > n_components {
                return Err(MapError::InvalidParameter {
                    name,
                    reason: format!("must be between 1 and {}, got {}", n_components, value),
                });
            }
        }
        Ok((self.x_component - 1, self.y_component - 1))
    }
}

/// Clustering parameter that changed in the parameter panel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClusterParam {
    Embedding,
    Components,
    Neighbors,
    MinDist,
    Metric,
    Normalization,
    WavenumberRange,
    Clusters,
    XComponent,
    YComponent,
}

/// Work triggered by a parameter change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Recompute {
    /// embedding, then clusters and scatter
    Embedding,
    /// clusters and scatter on the existing embedding
    Clusters,
    Scatter,
    /// picked up by the next explicit compute
    Nothing,
}

impl ClusterParam {
    pub fn route(&self) -> Recompute {
        match self {
            ClusterParam::Components => Recompute::Embedding,
            ClusterParam::Clusters => Recompute::Clusters,
            ClusterParam::XComponent | ClusterParam::YComponent => Recompute::Scatter,
            _ => Recompute::Nothing,
        }
    }
}

impl FromStr for ClusterParam {
    type Err = MapError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "Embedding" => ClusterParam::Embedding,
            "Components" => ClusterParam::Components,
            "Neighbors" => ClusterParam::Neighbors,
            "Min Dist" => ClusterParam::MinDist,
            "Metric" => ClusterParam::Metric,
            "Normalization" => ClusterParam::Normalization,
            "Wavenumber Range" => ClusterParam::WavenumberRange,
            "Clusters" => ClusterParam::Clusters,
            "X Component" => ClusterParam::XComponent,
            "Y Component" => ClusterParam::YComponent,
            other => {
                return Err(MapError::InvalidParameter {
                    name: "parameter",
                    reason: format!("unknown clustering parameter '{}'", other),
                })
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Factorization
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FactorMethod {
    #[serde(rename = "PCA")]
    Pca,
    #[default]
    #[serde(rename = "NMF")]
    Nmf,
}

impl Display for FactorMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FactorMethod::Pca => write!(f, "PCA"),
            FactorMethod::Nmf => write!(f, "NMF"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorizationParams {
    pub method: FactorMethod,
    pub n_components: usize,
    /// 1-based component shown in each of the four score-map panels
    pub map_components: [usize; 4],
}

impl Default for FactorizationParams {
    fn default() -> Self {
        Self {
            method: FactorMethod::Nmf,
            n_components: 4,
            map_components: [1, 2, 3, 4],
        }
    }
}

// ---------------------------------------------------------------------------
// XAS normalization (parameters only, the math is external)
// ---------------------------------------------------------------------------

/// Inclusive energy range written as `"low : high"`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyRange {
    pub low: f64,
    pub high: f64,
}

const NUMBER: &str = r"[-+]?[0-9]*\.?[0-9]+(?:[eE][-+]?[0-9]+)?";

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| MapError::InvalidParameter { name: "pattern", reason: e.to_string() })
}

impl EnergyRange {
    pub fn parse(field: &'static str, text: &str) -> Result<Self> {
        let unparseable = || MapError::UnparseableParameter { field, text: text.to_string() };
        let pattern = compile(&format!(r"^\s*({NUMBER})\s*:\s*({NUMBER})\s*$"))?;
        let caps = pattern.captures(text).ok_or_else(unparseable)?;
        let low: f64 = caps[1].parse().map_err(|_| unparseable())?;
        let high: f64 = caps[2].parse().map_err(|_| unparseable())?;
        Ok(EnergyRange { low, high })
    }

    /// `0.0 : 0.0` leaves the range to the normalization backend.
    pub fn is_auto(&self) -> bool {
        self.low == 0.0 && self.high == 0.0
    }
}

impl Display for EnergyRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} : {:?}", self.low, self.high)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolynomialType {
    Constant,
    #[default]
    Linear,
    Quadratic,
    Cubic,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolynomialConfig {
    pub polynomial_type: PolynomialType,
    pub e0: f64,
    pub edge_step: f64,
    pub y_offset: f64,
    pub pre_edge_range: EnergyRange,
    pub norm_range: EnergyRange,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MbackConfig {
    pub e0: f64,
    /// 0 to 3
    pub victoreen_order: u8,
    pub pre_edge_range: EnergyRange,
    pub norm_range: EnergyRange,
}

impl MbackConfig {
    pub fn validate(&self) -> Result<()> {
        if self.victoreen_order > 3 {
            return Err(MapError::InvalidParameter {
                name: "victoreen_order",
                reason: format!("must be between 0 and 3, got {}", self.victoreen_order),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizationMethod {
    Polynomial,
    Mback,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum NormalizationConfig {
    Polynomial(PolynomialConfig),
    Mback(MbackConfig),
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        NormalizationConfig::Polynomial(PolynomialConfig::default())
    }
}

impl NormalizationConfig {
    pub fn method(&self) -> NormalizationMethod {
        match self {
            NormalizationConfig::Polynomial(_) => NormalizationMethod::Polynomial,
            NormalizationConfig::Mback(_) => NormalizationMethod::Mback,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            NormalizationConfig::Polynomial(_) => Ok(()),
            NormalizationConfig::Mback(c) => c.validate(),
        }
    }
}

pub fn normalization_visible_fields(method: NormalizationMethod) -> &'static [&'static str] {
    match method {
        NormalizationMethod::Polynomial => &[
            "Normalization method", "Polynomial type", "E0", "Edge step", "Y offset",
            "Pre-edge range", "Normalization range",
        ],
        NormalizationMethod::Mback => &[
            "Normalization method", "E0", "Victoreen order", "Pre-edge range", "Normalization range",
        ],
    }
}

// ---------------------------------------------------------------------------
// Baseline correction (parameters only, the fitting is external)
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpMethod {
    #[default]
    Linear,
    Quadratic,
    Cubic,
}

impl InterpMethod {
    /// Fewest anchor points that determine a baseline of this kind.
    pub fn min_anchors(&self) -> usize {
        match self {
            InterpMethod::Linear => 2,
            InterpMethod::Quadratic => 3,
            InterpMethod::Cubic => 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RubberbandConfig {
    pub anchors: String,
    pub interp: InterpMethod,
}

impl Default for RubberbandConfig {
    fn default() -> Self {
        Self { anchors: "400, 4000".to_string(), interp: InterpMethod::Linear }
    }
}

impl RubberbandConfig {
    /// Anchor channels snapped onto `axis`, sorted.
    ///
    /// # Errors
    ///
    /// `UnparseableParameter` for a non-numeric anchor, `InvalidParameter` when
    /// there are fewer anchors than the interpolation needs.
    pub fn anchor_channels(&self, axis: &[f64]) -> Result<Vec<usize>> {
        let mut channels = Vec::new();
        for token in self.anchors.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let value: f64 = token.parse().map_err(|_| MapError::UnparseableParameter {
                field: "anchor points",
                text: token.to_string(),
            })?;
            channels.push(nearest_index(value, axis)?);
        }
        channels.sort_unstable();

        let needed = self.interp.min_anchors();
        if channels.len() < needed {
            return Err(MapError::InvalidParameter {
                name: "anchor points",
                reason: format!("{:?} baseline needs at least {} anchor points, got {}", self.interp, needed, channels.len()),
            });
        }
        Ok(channels)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmscConfig {
    pub fitting_regions: String,
}

impl Default for EmscConfig {
    fn default() -> Self {
        Self { fitting_regions: "[(650, 750),(1780, 2680),(3680, 4000)]".to_string() }
    }
}

impl EmscConfig {
    /// Parses `"[(lo, hi), ...]"` into wavenumber pairs.
    pub fn regions(&self) -> Result<Vec<(f64, f64)>> {
        let unparseable = || MapError::UnparseableParameter {
            field: "fitting regions",
            text: self.fitting_regions.clone(),
        };
        let pattern = compile(r"\(\s*([^,()\s]+)\s*,\s*([^,()\s]+)\s*\)")?;
        let mut regions = Vec::new();
        for caps in pattern.captures_iter(&self.fitting_regions) {
            let lo: f64 = caps[1].parse().map_err(|_| unparseable())?;
            let hi: f64 = caps[2].parse().map_err(|_| unparseable())?;
            regions.push((lo.min(hi), lo.max(hi)));
        }
        if regions.is_empty() {
            return Err(unparseable());
        }
        Ok(regions)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BaselineMethod {
    Rubberband,
    #[serde(rename = "Kohler_EMSC")]
    KohlerEmsc,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum BaselineConfig {
    Rubberband(RubberbandConfig),
    #[serde(rename = "Kohler_EMSC")]
    KohlerEmsc(EmscConfig),
}

impl Default for BaselineConfig {
    fn default() -> Self {
        BaselineConfig::KohlerEmsc(EmscConfig::default())
    }
}

impl BaselineConfig {
    pub fn method(&self) -> BaselineMethod {
        match self {
            BaselineConfig::Rubberband(_) => BaselineMethod::Rubberband,
            BaselineConfig::KohlerEmsc(_) => BaselineMethod::KohlerEmsc,
        }
    }

    /// Checks the fields of the active method against `axis`.
    pub fn validate(&self, axis: &[f64]) -> Result<()> {
        match self {
            BaselineConfig::Rubberband(c) => c.anchor_channels(axis).map(|_| ()),
            BaselineConfig::KohlerEmsc(c) => c.regions().map(|_| ()),
        }
    }
}

pub fn baseline_visible_fields(method: BaselineMethod) -> &'static [&'static str] {
    match method {
        BaselineMethod::Rubberband => &["Preprocess method", "Anchor points", "Interp method"],
        BaselineMethod::KohlerEmsc => &["Preprocess method", "Fitting regions"],
    }
}

// ---------------------------------------------------------------------------
// Whole configuration
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub clustering: ClusteringParams,
    pub factorization: FactorizationParams,
    pub normalization: NormalizationConfig,
    pub baseline: BaselineConfig,
    pub auto_roi: ThresholdMask,
}

impl AnalysisConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let f = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(f)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let f = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(f, self)?;
        Ok(())
    }
}
