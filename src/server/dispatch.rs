use std::sync::Arc;

use crate::net::{OpCode, Request, Response};
use crate::node::OverlayNode;
use crate::ring::{Id, NodeRef};

fn node_value(value: &[u8]) -> Option<NodeRef> {
    let text = std::str::from_utf8(value).ok()?;
    NodeRef::parse(text).ok()
}

/// Answers one decoded request. Overlay RPCs are a single routing-state
/// read; data operations go through the ownership check first.
pub async fn dispatch(node: &Arc<OverlayNode>, request: Request) -> Response {
    match request.opcode {
        OpCode::Ping => Response::ok(),

        OpCode::NodeInfo => Response::success(node.local().endpoint().into_bytes()),

        OpCode::FindSuccessor => match Id::from_slice(&request.key) {
            Some(id) => {
                let successor = node.find_successor(&id).await;
                Response::success(successor.endpoint().into_bytes())
            }
            None => Response::error(),
        },

        OpCode::GetPredecessor => match node.predecessor() {
            Some(predecessor) => Response::success(predecessor.endpoint().into_bytes()),
            None => Response::not_found(),
        },

        OpCode::GetSuccessor => Response::success(node.successor().endpoint().into_bytes()),

        OpCode::Stabilize => {
            let list = node
                .successor_list()
                .iter()
                .map(|succ| succ.endpoint())
                .collect::<Vec<_>>()
                .join(",");
            Response::success(list.into_bytes())
        }

        OpCode::Notify => match node_value(&request.value) {
            Some(candidate) => {
                node.notify(candidate);
                Response::ok()
            }
            None => Response::error(),
        },

        OpCode::Join => match node_value(&request.value) {
            Some(joiner) => {
                let successor = node.find_successor(&joiner.id).await;
                Response::success(successor.endpoint().into_bytes())
            }
            None => Response::error(),
        },

        OpCode::Replicate => match String::from_utf8(request.key) {
            Ok(key) => {
                node.apply_replica_put(&key, request.value);
                Response::ok()
            }
            Err(_) => Response::error(),
        },

        OpCode::ReplicateDelete => match String::from_utf8(request.key) {
            Ok(key) => {
                if node.apply_replica_delete(&key) {
                    Response::ok()
                } else {
                    Response::not_found()
                }
            }
            Err(_) => Response::error(),
        },

        OpCode::Get | OpCode::Put | OpCode::Delete => dispatch_data(node, request).await,
    }
}

async fn dispatch_data(node: &Arc<OverlayNode>, request: Request) -> Response {
    let key = match String::from_utf8(request.key) {
        Ok(key) => key,
        Err(_) => return Response::error(),
    };

    // A freshly joined node is not a correct owner of anything until its
    // first stabilize round; send the client to the seed meanwhile.
    if !node.is_linked() {
        return match node.seed() {
            Some(seed) => Response::redirect(&seed.endpoint()),
            None => Response::error(),
        };
    }

    let kid = Id::digest(key.as_bytes());
    if !node.owns(&kid) {
        let responsible = node.find_successor(&kid).await;
        if &responsible != node.local() {
            return Response::redirect(&responsible.endpoint());
        }
        // Ownership swung back to us while resolving; serve locally.
    }

    match request.opcode {
        OpCode::Get => match node.get(&key).await {
            Some(value) => Response::success(value),
            None => Response::not_found(),
        },
        OpCode::Put => match node.put(&key, request.value).await {
            Ok(()) => Response::ok(),
            Err(e) => {
                tracing::warn!("put '{}' failed: {}", key, e);
                Response::error()
            }
        },
        OpCode::Delete => {
            if node.delete(&key).await {
                Response::ok()
            } else {
                Response::not_found()
            }
        }
        _ => Response::error(),
    }
}
