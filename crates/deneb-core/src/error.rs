use thiserror::Error;

#[derive(Error, Debug)]
pub enum DenebError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid frame container: {0}")]
    InvalidContainer(String),

    #[error("Invalid image dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Input error: {0}")]
    Input(String),

    #[error("Incompatible frame geometry: {path}: {got} (expected {expected})")]
    IncompatibleGeometry {
        path: String,
        got: String,
        expected: String,
    },

    #[error("Required header keyword '{keyword}' missing or invalid in {path}")]
    MissingKeyword { keyword: String, path: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Numeric degeneracy: {0}")]
    Degenerate(String),

    #[error("Memory budget exceeded: need {required} bytes, limit {limit} bytes")]
    ResourceLimit { required: usize, limit: usize },

    #[error("Integration cancelled")]
    Cancelled,

    #[error("Image format error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("No enabled input frames")]
    EmptySequence,
}

pub type Result<T> = std::result::Result<T, DenebError>;
