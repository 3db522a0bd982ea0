//! Producer endpoint addressing

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// One producer address as reported by a discovery service.
///
/// Immutable once discovered. The canonical registry key is the
/// `"host:port"` form produced by [`Endpoint::key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Broadcast hostname or IP of the producer
    pub host: String,
    /// TCP port the producer listens on
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint from its parts
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Canonical `"host:port"` registry key
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s.rsplit_once(':').ok_or_else(|| {
            ClientError::Configuration(format!("endpoint {:?} is not host:port", s))
        })?;
        if host.is_empty() {
            return Err(ClientError::Configuration(format!(
                "endpoint {:?} has an empty host",
                s
            )));
        }
        let port = port.parse().map_err(|_| {
            ClientError::Configuration(format!("endpoint {:?} has an invalid port", s))
        })?;
        Ok(Endpoint::new(host, port))
    }
}
