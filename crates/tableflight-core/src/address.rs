//! Flight service addresses
//!
//! Flight locations are written as URIs such as `grpc+tcp://[::1]:50051`.
//! Only plaintext transports are accepted; the gRPC channel is always
//! dialed through an `http://` URI.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::{Host, Url};

use crate::error::{Result, TableError};

const PLAINTEXT_SCHEMES: &[&str] = &["grpc+tcp", "grpc", "http"];
const TLS_SCHEMES: &[&str] = &["grpc+tls", "https"];

/// Host and port of a remote Flight service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceAddress {
    host: String,
    port: u16,
}

impl ServiceAddress {
    /// Parse an address from a Flight location URI or a bare `host:port`
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| TableError::InvalidAddress {
            address: input.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid("address is empty"));
        }

        // a bare authority would otherwise parse as `scheme:path`
        let url = if trimmed.contains("://") {
            Url::parse(trimmed)
        } else {
            Url::parse(&format!("grpc+tcp://{}", trimmed))
        }
        .map_err(|e| invalid(&e.to_string()))?;

        let scheme = url.scheme();
        if TLS_SCHEMES.contains(&scheme) {
            return Err(invalid("TLS transports are not supported"));
        }
        if !PLAINTEXT_SCHEMES.contains(&scheme) {
            return Err(invalid(&format!("unsupported scheme '{}'", scheme)));
        }

        if !url.username().is_empty() || url.password().is_some() {
            return Err(invalid("user info is not allowed"));
        }
        if !matches!(url.path(), "" | "/") {
            return Err(invalid("paths are not allowed"));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(invalid("query and fragment are not allowed"));
        }

        let host = match url.host() {
            Some(Host::Ipv6(ip)) => format!("[{}]", ip),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_ascii_lowercase(),
            _ => return Err(invalid("missing host")),
        };

        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid("missing port"))?;
        if port == 0 {
            return Err(invalid("port must be non-zero"));
        }

        Ok(Self { host, port })
    }

    /// Host part, IPv6 literals keep their brackets
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// URI handed to the gRPC transport
    pub fn uri(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "grpc+tcp://{}:{}", self.host, self.port)
    }
}

impl FromStr for ServiceAddress {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ServiceAddress {
    type Error = TableError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ServiceAddress> for String {
    fn from(address: ServiceAddress) -> Self {
        address.to_string()
    }
}
