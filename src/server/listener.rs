use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, Semaphore};

use super::dispatch::dispatch;
use crate::net::protocol::{self, ProtocolError, Response};
use crate::node::OverlayNode;

/// Default size of the connection worker pool.
pub const DEFAULT_WORKERS: usize = 8;

/// TCP acceptor serving the node's wire protocol.
///
/// Connections are accepted eagerly but handled by at most `workers`
/// concurrent tasks; the surplus waits on the semaphore (and behind it, the
/// OS accept backlog). One request is outstanding per connection at a time,
/// which is what gives clients their per-connection ordering.
pub struct KvServer {
    node: Arc<OverlayNode>,
    workers: Arc<Semaphore>,
    shutdown: Notify,
    running: AtomicBool,
}

impl KvServer {
    pub fn new(node: Arc<OverlayNode>, workers: usize) -> Arc<Self> {
        Arc::new(KvServer {
            node,
            workers: Arc::new(Semaphore::new(workers.max(1))),
            shutdown: Notify::new(),
            running: AtomicBool::new(false),
        })
    }

    /// Serves `listener` until [`KvServer::shutdown`] is called.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("listening on {}", addr);

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::warn!("accept failed: {}", e);
                            continue;
                        }
                    };

                    let Ok(permit) = self.workers.clone().acquire_owned().await else {
                        break;
                    };
                    let node = self.node.clone();
                    tokio::spawn(async move {
                        handle_connection(node, stream).await;
                        drop(permit);
                    });
                    tracing::trace!("accepted connection from {}", peer);
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::info!("server on {} stopped", addr);
        Ok(())
    }

    pub fn shutdown(&self) {
        // notify_one stores a permit, so a shutdown issued before serve()
        // reaches its select is not lost.
        self.shutdown.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Serves one connection: requests strictly in order, one response each.
/// A malformed frame gets an ERROR reply and the connection is dropped.
async fn handle_connection(node: Arc<OverlayNode>, mut stream: TcpStream) {
    loop {
        match protocol::read_request(&mut stream).await {
            Ok(None) => break,
            Ok(Some(request)) => {
                let response = dispatch(&node, request).await;
                if protocol::write_response(&mut stream, &response).await.is_err() {
                    break;
                }
            }
            Err(ProtocolError::Io(e)) => {
                tracing::debug!("connection dropped: {}", e);
                break;
            }
            Err(e) => {
                tracing::debug!("malformed frame: {}", e);
                let _ = protocol::write_response(&mut stream, &Response::error()).await;
                break;
            }
        }
    }
}
