use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::protocol::{self, OpCode, Request, Response, Status};
use crate::ring::{Id, NodeRef};

/// Timeouts for one peer RPC. Connects are bounded tighter than I/O so a
/// dead peer is detected quickly, while a slow-but-alive peer still gets a
/// full response window.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            connect_timeout: Duration::from_secs(1),
            io_timeout: Duration::from_secs(5),
        }
    }
}

/// Transport-level failures of a single RPC. Every variant is the sentinel
/// the caller feeds into the failure detector.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),
    #[error("request to {0} timed out")]
    RequestTimeout(String),
    #[error("transport failure with {0}: {1}")]
    Transport(String, std::io::Error),
    #[error("malformed reply from {0}: {1}")]
    Malformed(String, String),
    #[error("peer {0} answered {1:?}")]
    Remote(String, Status),
}

pub type NetResult<T> = Result<T, NetError>;

/// Issues ring and data RPCs against peer endpoints.
///
/// Each call opens a fresh connection, sends exactly one request, reads
/// exactly one response, and drops the socket. No pooling: connections are
/// cheap next to the RPC round-trip, and a stale pooled socket would
/// outlive the timeouts that bound failure detection.
#[derive(Debug, Clone, Default)]
pub struct PeerClient {
    config: ClientConfig,
}

impl PeerClient {
    pub fn new(config: ClientConfig) -> Self {
        PeerClient { config }
    }

    /// One raw RPC: connect, send `request`, read one response. The typed
    /// wrappers below are built on this; it is public for callers that need
    /// to see statuses like `REDIRECT` themselves (e.g. the client tool).
    pub async fn call(&self, endpoint: &str, request: Request) -> NetResult<Response> {
        let connect = timeout(self.config.connect_timeout, TcpStream::connect(endpoint))
            .await
            .map_err(|_| NetError::ConnectTimeout(endpoint.to_string()))?
            .map_err(|e| NetError::Transport(endpoint.to_string(), e))?;

        let mut stream = connect;
        let exchange = async {
            protocol::write_request(&mut stream, &request)
                .await
                .map_err(|e| NetError::Transport(endpoint.to_string(), e))?;
            match protocol::read_response(&mut stream).await {
                Ok(response) => Ok(response),
                Err(protocol::ProtocolError::Io(e)) => {
                    Err(NetError::Transport(endpoint.to_string(), e))
                }
                Err(e) => Err(NetError::Malformed(endpoint.to_string(), e.to_string())),
            }
        };

        timeout(self.config.io_timeout, exchange)
            .await
            .map_err(|_| NetError::RequestTimeout(endpoint.to_string()))?
    }

    fn parse_node(&self, endpoint: &str, value: &[u8]) -> NetResult<NodeRef> {
        let text = std::str::from_utf8(value)
            .map_err(|_| NetError::Malformed(endpoint.to_string(), "non-ascii endpoint".into()))?;
        NodeRef::parse(text).map_err(|e| NetError::Malformed(endpoint.to_string(), e.to_string()))
    }

    // --- Ring RPCs ---

    /// Asks `peer` to resolve the successor of `id`.
    pub async fn find_successor(&self, peer: &NodeRef, id: &Id) -> NetResult<NodeRef> {
        let endpoint = peer.endpoint();
        let request = Request::new(OpCode::FindSuccessor, id.as_bytes().to_vec(), Vec::new());
        let response = self.call(&endpoint, request).await?;
        match response.status {
            Status::Success => self.parse_node(&endpoint, &response.value),
            status => Err(NetError::Remote(endpoint, status)),
        }
    }

    /// `None` when the peer has no predecessor yet.
    pub async fn get_predecessor(&self, peer: &NodeRef) -> NetResult<Option<NodeRef>> {
        let endpoint = peer.endpoint();
        let response = self
            .call(&endpoint, Request::control(OpCode::GetPredecessor, Vec::new()))
            .await?;
        match response.status {
            Status::Success => Ok(Some(self.parse_node(&endpoint, &response.value)?)),
            Status::KeyNotFound => Ok(None),
            status => Err(NetError::Remote(endpoint, status)),
        }
    }

    pub async fn get_successor(&self, peer: &NodeRef) -> NetResult<NodeRef> {
        let endpoint = peer.endpoint();
        let response = self
            .call(&endpoint, Request::control(OpCode::GetSuccessor, Vec::new()))
            .await?;
        match response.status {
            Status::Success => self.parse_node(&endpoint, &response.value),
            status => Err(NetError::Remote(endpoint, status)),
        }
    }

    /// The peer's successor list, used to rebuild ours one hop behind it.
    pub async fn successor_list(&self, peer: &NodeRef) -> NetResult<Vec<NodeRef>> {
        let endpoint = peer.endpoint();
        let response = self
            .call(&endpoint, Request::control(OpCode::Stabilize, Vec::new()))
            .await?;
        if response.status != Status::Success {
            return Err(NetError::Remote(endpoint, response.status));
        }

        let text = std::str::from_utf8(&response.value)
            .map_err(|_| NetError::Malformed(endpoint.clone(), "non-ascii list".into()))?;
        let mut nodes = Vec::new();
        for part in text.split(',').filter(|part| !part.is_empty()) {
            nodes.push(
                NodeRef::parse(part)
                    .map_err(|e| NetError::Malformed(endpoint.clone(), e.to_string()))?,
            );
        }
        Ok(nodes)
    }

    /// Tells `peer` that `about` believes it precedes them.
    pub async fn notify(&self, peer: &NodeRef, about: &NodeRef) -> NetResult<()> {
        let endpoint = peer.endpoint();
        let request = Request::control(OpCode::Notify, about.endpoint().into_bytes());
        let response = self.call(&endpoint, request).await?;
        match response.status {
            Status::Success => Ok(()),
            status => Err(NetError::Remote(endpoint, status)),
        }
    }

    /// Liveness probe: any well-formed reply counts as alive.
    pub async fn ping(&self, endpoint: &str) -> NetResult<()> {
        let response = self
            .call(endpoint, Request::control(OpCode::Ping, Vec::new()))
            .await?;
        match response.status {
            Status::Success => Ok(()),
            status => Err(NetError::Remote(endpoint.to_string(), status)),
        }
    }

    /// Asks a seed node for the successor of `joiner`'s position.
    pub async fn join(&self, seed: &NodeRef, joiner: &NodeRef) -> NetResult<NodeRef> {
        let endpoint = seed.endpoint();
        let request = Request::control(OpCode::Join, joiner.endpoint().into_bytes());
        let response = self.call(&endpoint, request).await?;
        match response.status {
            Status::Success => self.parse_node(&endpoint, &response.value),
            status => Err(NetError::Remote(endpoint, status)),
        }
    }

    pub async fn node_info(&self, endpoint: &str) -> NetResult<NodeRef> {
        let response = self
            .call(endpoint, Request::control(OpCode::NodeInfo, Vec::new()))
            .await?;
        match response.status {
            Status::Success => self.parse_node(endpoint, &response.value),
            status => Err(NetError::Remote(endpoint.to_string(), status)),
        }
    }

    // --- Data RPCs ---

    /// Client-grade put, subject to the peer's ownership check.
    pub async fn put(&self, peer: &NodeRef, key: &str, value: &[u8]) -> NetResult<()> {
        let endpoint = peer.endpoint();
        let request = Request::new(OpCode::Put, key.as_bytes().to_vec(), value.to_vec());
        let response = self.call(&endpoint, request).await?;
        match response.status {
            Status::Success => Ok(()),
            status => Err(NetError::Remote(endpoint, status)),
        }
    }

    /// Client-grade get; `None` when the key does not exist on the peer.
    pub async fn get(&self, peer: &NodeRef, key: &str) -> NetResult<Option<Vec<u8>>> {
        let endpoint = peer.endpoint();
        let request = Request::new(OpCode::Get, key.as_bytes().to_vec(), Vec::new());
        let response = self.call(&endpoint, request).await?;
        match response.status {
            Status::Success => Ok(Some(response.value)),
            Status::KeyNotFound => Ok(None),
            status => Err(NetError::Remote(endpoint, status)),
        }
    }

    /// Client-grade delete; `false` when the key was absent.
    pub async fn delete(&self, peer: &NodeRef, key: &str) -> NetResult<bool> {
        let endpoint = peer.endpoint();
        let request = Request::new(OpCode::Delete, key.as_bytes().to_vec(), Vec::new());
        let response = self.call(&endpoint, request).await?;
        match response.status {
            Status::Success => Ok(true),
            Status::KeyNotFound => Ok(false),
            status => Err(NetError::Remote(endpoint, status)),
        }
    }

    /// Replica put: stored by the peer without an ownership check.
    pub async fn replicate_put(&self, peer: &NodeRef, key: &str, value: &[u8]) -> NetResult<()> {
        let endpoint = peer.endpoint();
        let request = Request::new(OpCode::Replicate, key.as_bytes().to_vec(), value.to_vec());
        let response = self.call(&endpoint, request).await?;
        match response.status {
            Status::Success => Ok(()),
            status => Err(NetError::Remote(endpoint, status)),
        }
    }

    /// Replica delete; absence on the replica is not an error.
    pub async fn replicate_delete(&self, peer: &NodeRef, key: &str) -> NetResult<bool> {
        let endpoint = peer.endpoint();
        let request = Request::new(OpCode::ReplicateDelete, key.as_bytes().to_vec(), Vec::new());
        let response = self.call(&endpoint, request).await?;
        match response.status {
            Status::Success => Ok(true),
            Status::KeyNotFound => Ok(false),
            status => Err(NetError::Remote(endpoint, status)),
        }
    }
}
