use anyhow::{anyhow, Context, Result};
use std::fmt;

use super::id::Id;

/// A reference to a node on the ring.
///
/// Identity is the ring identifier alone; the endpoint fields exist so the
/// node can be contacted. Two references with the same identifier are the
/// same node regardless of how the endpoint string is spelled.
#[derive(Debug, Clone)]
pub struct NodeRef {
    pub id: Id,
    pub address: String,
    pub port: u16,
}

impl NodeRef {
    /// Derives a node reference from its stable endpoint. The identifier is
    /// the digest of `"address:port"`, so it survives restarts.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        let address = address.into();
        let id = Id::digest(format!("{}:{}", address, port).as_bytes());
        NodeRef { id, address, port }
    }

    /// Parses an ASCII `"host:port"` endpoint as carried in wire frames.
    pub fn parse(endpoint: &str) -> Result<Self> {
        let (host, port) = endpoint
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("endpoint '{}' is not host:port", endpoint))?;
        if host.is_empty() {
            return Err(anyhow!("endpoint '{}' has an empty host", endpoint));
        }
        let port: u16 = port
            .parse()
            .with_context(|| format!("endpoint '{}' has an invalid port", endpoint))?;
        Ok(NodeRef::new(host, port))
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for NodeRef {}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} [{}..]", self.address, self.port, self.id.short_hex())
    }
}
