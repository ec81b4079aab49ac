//! Client configuration
//!
//! Connection and retrieval settings for a Flight client, loadable from a
//! JSON file. Every field has a default so partial files are accepted.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::address::ServiceAddress;
use crate::error::Result;

/// Configuration for connecting to a Flight service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Flight location, e.g. `grpc+tcp://localhost:50051`
    pub address: String,
    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Per-call timeout in seconds (no limit when unset)
    pub request_timeout_secs: Option<u64>,
    /// TCP keepalive interval in seconds
    pub tcp_keepalive_secs: Option<u64>,
    /// Largest accepted gRPC message in bytes
    pub max_message_size: usize,
    /// Fail retrievals that produce no record batches
    pub require_non_empty: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "grpc+tcp://localhost:50051".to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: None,
            tcp_keepalive_secs: Some(60),
            max_message_size: 64 * 1024 * 1024, // 64 MB
            require_non_empty: false,
        }
    }
}

impl ClientConfig {
    /// Create a config for the given address with default settings
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    /// Create a config for a service on the local host
    pub fn local(port: u16) -> Self {
        Self::new(format!("grpc+tcp://127.0.0.1:{}", port))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(contents: &str) -> Result<Self> {
        let config: ClientConfig = serde_json::from_str(contents)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Set the service address
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Set the per-call timeout
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout_secs = timeout.map(|t| t.as_secs().max(1));
        self
    }

    /// Set the maximum decoded message size
    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    /// Require at least one record batch per retrieval
    pub fn with_require_non_empty(mut self, require: bool) -> Self {
        self.require_non_empty = require;
        self
    }

    /// Parse and validate the configured address
    pub fn service_address(&self) -> Result<ServiceAddress> {
        ServiceAddress::parse(&self.address)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn tcp_keepalive(&self) -> Option<Duration> {
        self.tcp_keepalive_secs.map(Duration::from_secs)
    }
}
