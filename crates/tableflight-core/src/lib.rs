pub mod address;
pub mod config;
pub mod error;
pub mod table;

pub use address::ServiceAddress;
pub use config::ClientConfig;
pub use error::{Result, TableError};
pub use table::{Table, TableAssembler};
