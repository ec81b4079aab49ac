//! Error types for Flight client operations

use arrow::datatypes::SchemaRef;
use tableflight_core::TableError;
use thiserror::Error;

/// Errors that can occur while talking to a Flight service
#[derive(Debug, Error)]
pub enum FlightError {
    /// Address is malformed or the service cannot be reached
    #[error("Connection error: {address}: {reason}")]
    ConnectionError { address: String, reason: String },

    /// A call failed in transport or was rejected by the service
    #[error("RPC error in {rpc}: {status}")]
    RpcError {
        rpc: &'static str,
        status: tonic::Status,
    },

    /// The selected flight advertises no endpoints
    #[error("Flight has no endpoints")]
    NoEndpointError,

    /// The selected endpoint carries no ticket
    #[error("Endpoint has no ticket")]
    MissingTicketError,

    /// A batch or schema frame changed the stream's schema
    #[error("Schema mismatch at batch {index}: expected [{expected}], found [{found}]")]
    SchemaMismatchError {
        index: usize,
        expected: SchemaRef,
        found: SchemaRef,
    },

    /// The channel was closed before or during the call
    #[error("Channel is closed")]
    ConnectionClosedError,

    /// No record batch arrived where at least one was required
    #[error("Stream produced no record batches")]
    EmptyStreamError,

    /// Malformed Flight payload
    #[error("Flight decode error: {0}")]
    DecodeError(arrow_flight::error::FlightError),

    /// Arrow error
    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),

    /// Configuration error
    #[error("Config error: {0}")]
    ConfigError(String),
}

impl FlightError {
    /// gRPC status of a failed call, if any
    pub fn status(&self) -> Option<&tonic::Status> {
        match self {
            FlightError::RpcError { status, .. } => Some(status),
            _ => None,
        }
    }
}

impl From<TableError> for FlightError {
    fn from(err: TableError) -> Self {
        match err {
            TableError::SchemaMismatch {
                index,
                expected,
                found,
            } => FlightError::SchemaMismatchError {
                index,
                expected,
                found,
            },
            TableError::EmptyStream => FlightError::EmptyStreamError,
            TableError::InvalidAddress { address, reason } => {
                FlightError::ConnectionError { address, reason }
            }
            TableError::ArrowError(e) => FlightError::ArrowError(e),
            TableError::ConfigError(msg) => FlightError::ConfigError(msg),
            TableError::IoError(e) => FlightError::ConfigError(e.to_string()),
        }
    }
}

/// Errors raised below the Flight decoder travel through it boxed as
/// `ExternalError`; unwrap them back into their original variant.
impl From<arrow_flight::error::FlightError> for FlightError {
    fn from(err: arrow_flight::error::FlightError) -> Self {
        match err {
            arrow_flight::error::FlightError::ExternalError(inner) => {
                match inner.downcast::<FlightError>() {
                    Ok(ours) => *ours,
                    Err(other) => FlightError::DecodeError(
                        arrow_flight::error::FlightError::ExternalError(other),
                    ),
                }
            }
            arrow_flight::error::FlightError::Arrow(e) => FlightError::ArrowError(e),
            other => FlightError::DecodeError(other),
        }
    }
}

impl From<FlightError> for arrow_flight::error::FlightError {
    fn from(err: FlightError) -> Self {
        arrow_flight::error::FlightError::ExternalError(Box::new(err))
    }
}
