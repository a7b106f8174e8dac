use thiserror::Error;
use crate::data::index_map::Rc;

pub type Result<T> = std::result::Result<T, MapError>;

/// Broad classes of failure, used by callers to decide how to report an error.
///
/// `Configuration` and `Data` errors come from user parameters or from the
/// current selection and are always recoverable. `Consistency` errors point at
/// malformed upstream input (a corrupt map file or a bug) and are reported
/// separately.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Data,
    Consistency,
    Io,
}

#[derive(Error, Debug)]
pub enum MapError {
    #[error("spectrum index {index} is assigned to both {first:?} and {second:?}")]
    InconsistentIndex { index: usize, first: Rc, second: Rc },
    #[error("coordinate {0:?} has no spectrum in a dense map")]
    MissingCoordinate(Rc),
    #[error("coordinate {coord:?} lies outside the {rows}x{cols} grid")]
    CoordinateOutOfBounds { coord: Rc, rows: usize, cols: usize },
    #[error("unknown selector '{0}', expected 'ROI' or 'Mask'")]
    UnknownSelector(String),
    #[error("wavenumber range values must be in pairs, got {0} values")]
    OddWindowCount(usize),
    #[error("could not parse '{0}' as a wavenumber")]
    UnparseableWindow(String),
    #[error("could not parse parameter '{field}': '{text}'")]
    UnparseableParameter { field: &'static str, text: String },
    #[error("wavenumber axis is empty")]
    EmptyAxis,
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("requested {requested} clusters but only {available} spectra are available")]
    InsufficientData { requested: usize, available: usize },
    #[error("the data matrix is empty")]
    EmptyDataset,
    #[error("index {index} is out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("cannot fit a nearest-neighbor index on an empty point set")]
    EmptyPointSet,
    #[error("nearest-neighbor index has not been fitted")]
    NotFitted,
    #[error("negative value {value} at row {row}, column {col}; NMF requires non-negative input")]
    NonNegativity { row: usize, col: usize, value: f64 },
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),
    #[error("{0} is not available yet")]
    NotReady(&'static str),
    #[error("shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch { context: &'static str, expected: usize, actual: usize },
    #[error("snapshot encoding failed: {0}")]
    Persistence(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl MapError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MapError::OddWindowCount(_)
            | MapError::UnparseableWindow(_)
            | MapError::UnparseableParameter { .. }
            | MapError::UnknownSelector(_)
            | MapError::InvalidParameter { .. }
            | MapError::NotImplemented(_)
            | MapError::Json(_) => ErrorKind::Configuration,
            MapError::InsufficientData { .. }
            | MapError::EmptyDataset
            | MapError::EmptyPointSet
            | MapError::NotFitted
            | MapError::NotReady(_)
            | MapError::NonNegativity { .. }
            | MapError::IndexOutOfRange { .. } => ErrorKind::Data,
            MapError::InconsistentIndex { .. }
            | MapError::MissingCoordinate(_)
            | MapError::CoordinateOutOfBounds { .. }
            | MapError::EmptyAxis
            | MapError::ShapeMismatch { .. } => ErrorKind::Consistency,
            MapError::Persistence(_) | MapError::Io(_) => ErrorKind::Io,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Configuration | ErrorKind::Data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_taxonomy() {
        assert_eq!(MapError::OddWindowCount(3).kind(), ErrorKind::Configuration);
        assert_eq!(MapError::EmptyDataset.kind(), ErrorKind::Data);
        assert_eq!(
            MapError::InconsistentIndex { index: 1, first: (0, 0), second: (0, 1) }.kind(),
            ErrorKind::Consistency
        );
        assert!(MapError::InsufficientData { requested: 4, available: 2 }.is_recoverable());
        assert!(!MapError::MissingCoordinate((2, 2)).is_recoverable());
    }
}
