// error module
pub mod error;

// data module
pub mod data {
    pub mod index_map;
    pub mod spectra;
}

// selection module
pub mod selection {
    pub mod selection_set;
    pub mod roi;
    pub mod snapshot;
}

// algorithm module
pub mod algorithm {
    pub mod distance;
    pub mod window;
    pub mod colormap;
    pub mod kmeans;
    pub mod umap;
    pub mod pca;
    pub mod nmf;
    pub mod nearest;
}

pub use error::{ErrorKind, MapError, Result};
