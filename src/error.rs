use thiserror::Error;

#[derive(Error, Debug)]
pub enum DietError {
    #[error("Data not loaded: {0}")]
    NotLoaded(String),

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation: {0}")]
    Validation(String),

    #[error("Duplicate index: {0}")]
    DuplicateIndex(String),

    #[error("InvalidData: {0}")]
    InvalidData(String),
}
