//! Error types for pairnet

use thiserror::Error;

/// Failures while loading the base digits or building paired splits.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{file}: expected unsigned byte data with {expected} dimensions, got magic {magic:#010x}")]
    BadMagic {
        file: String,
        expected: u32,
        magic: u32,
    },

    #[error("image count {images} does not match label count {labels}")]
    CountMismatch { images: usize, labels: usize },

    #[error("requested {requested} digits but only {available} are available")]
    NotEnoughDigits { requested: usize, available: usize },

    #[error("images must be 28x28, got {rows}x{cols}")]
    ImageSize { rows: u32, cols: u32 },

    #[error("{file}: expected {expected} bytes of data, found {got}")]
    Truncated {
        file: String,
        expected: usize,
        got: usize,
    },

    #[error("label {label} at index {index} is not a digit")]
    BadLabel { index: usize, label: u8 },

    #[error("validation fraction must lie in (0, 1), got {0}")]
    ValidationFraction(f32),

    #[error("{0} split is empty")]
    EmptySplit(&'static str),

    #[error("{inputs} input columns of {rows} rows for {classes} class pairs")]
    PairShape {
        rows: usize,
        inputs: usize,
        classes: usize,
    },
}

/// Malformed grid-search requests, rejected before any run starts.
#[derive(Error, Debug, PartialEq)]
pub enum GridError {
    #[error("family {family} expects {expected} hyperparameter axes, got {got}")]
    AxisCount {
        family: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("hyperparameter axis {0} is empty")]
    EmptyAxis(String),

    #[error("seed list is empty")]
    NoSeeds,

    #[error("epoch count must be positive")]
    NoEpochs,

    #[error("{value} is not a valid value for {axis}")]
    InvalidValue { axis: String, value: f32 },
}

#[derive(Error, Debug)]
pub enum PlotError {
    #[error("Rendering failed: {0}")]
    Render(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to access config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error(transparent)]
    Plot(#[from] PlotError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
