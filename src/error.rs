use crate::{detector::DetectorError, source::SourceError, table::TableError};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Error in the `detector` module")]
    Detector(#[from] DetectorError),
    #[error("Error in the `source` module")]
    Source(#[from] SourceError),
    #[error("Error in the `table` module")]
    Table(#[from] TableError),
    #[error("PEDESTAL_DATA env var")]
    Env(#[from] std::env::VarError),
    #[error(transparent)]
    Shape(#[from] ShapeMismatch),
}
pub type Result<T> = std::result::Result<T, Error>;

/// An array does not have the dimensions it is expected to have
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("shape mismatch: expected {expected}, found {found:?}")]
pub struct ShapeMismatch {
    pub expected: String,
    pub found: Vec<usize>,
}
impl ShapeMismatch {
    pub fn new<S: Into<String>>(expected: S, found: &[usize]) -> Self {
        Self {
            expected: expected.into(),
            found: found.to_vec(),
        }
    }
}
