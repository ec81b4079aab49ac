//! Arrow Flight client for tableflight
//!
//! Discovers the flights a remote Flight service advertises and retrieves
//! a flight's record batches as an in-memory [`Table`].
//!
//! # Components
//!
//! - **Channel**: gRPC connection with unary and server-streaming calls
//! - **Directory**: lazy `ListFlights` listing
//! - **Ticket**: endpoint selection policy and ticket resolution
//! - **Reader**: `DoGet` stream of schema-checked record batches
//! - **Client**: the facade combining all of the above
//!
//! # Example
//!
//! ```ignore
//! use tableflight_client::{first_ticket, FlightClient};
//!
//! let client = FlightClient::connect("grpc+tcp://[::1]:50051").await?;
//! let flights = client.list_flights(None).await?.collect_all().await?;
//!
//! if let Some(flight) = flights.first() {
//!     let table = client.fetch_table(first_ticket(flight)?).await?;
//!     println!("{} rows", table.num_rows());
//! }
//! ```

pub mod channel;
pub mod client;
pub mod directory;
pub mod error;
pub mod reader;
pub mod ticket;

pub use channel::{FlightChannel, FrameStream};
pub use client::{fetch_table, list_flights, FlightClient};
pub use directory::{criteria, describe_descriptor, FlightListing};
pub use error::FlightError;
pub use reader::{do_get, ReaderState, RecordBatchReader};
pub use tableflight_core::{ClientConfig, ServiceAddress, Table, TableAssembler};
pub use ticket::{
    endpoint_ticket, first_ticket, select_ticket, EndpointSelector, FirstEndpoint, SelectByIndex,
};

/// Result type for Flight operations
pub type Result<T> = std::result::Result<T, FlightError>;
