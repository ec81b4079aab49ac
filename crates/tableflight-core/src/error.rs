use arrow::datatypes::SchemaRef;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("Schema mismatch at batch {index}: expected [{expected}], found [{found}]")]
    SchemaMismatch {
        index: usize,
        expected: SchemaRef,
        found: SchemaRef,
    },

    #[error("Stream produced no record batches")]
    EmptyStream,

    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),
}

impl From<serde_json::Error> for TableError {
    fn from(err: serde_json::Error) -> Self {
        TableError::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TableError>;
