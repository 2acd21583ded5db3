use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The backing file is missing, unreadable, or vanished after `open`.
    #[error("Resource unavailable: {}: {source}", path.display())]
    ResourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Header unreadable, field-count mismatch, or a record that fails to parse.
    #[error("Malformed data: {0}")]
    MalformedData(String),

    #[error("{0} method not implemented")]
    Unsupported(&'static str),

    #[error("Unsupported query {query:?}: only `SELECT * FROM csv` is implemented")]
    UnsupportedQuery { query: String },

    #[error("{0} is closed")]
    Closed(&'static str),

    #[error("Destination holds {actual} values, expected {expected}")]
    DestinationMismatch { expected: usize, actual: usize },

    #[error("Unknown driver: {0}")]
    UnknownDriver(String),

    #[error("Driver already registered: {0}")]
    DuplicateDriver(String),

    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
