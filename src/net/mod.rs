//! Network Module
//!
//! The binary wire protocol spoken between nodes (and by clients), plus the
//! peer client that issues one RPC per short-lived connection.
//!
//! ## Wire format
//! Frames are length-prefixed with big-endian `u32` fields:
//!
//! ```text
//! request:  opcode(1) | key_len(4) | key | value_len(4) | value
//! response: status(1) | value_len(4) | value
//! ```
//!
//! Node references travel in the value field as ASCII `"host:port"`; the
//! receiver re-derives the ring identifier from the endpoint digest, so
//! identifiers themselves never need to be trusted off the wire (the one
//! exception is `FIND_SUCCESSOR`, whose key field is a raw 20-byte target).

pub mod client;
pub mod protocol;

pub use client::{ClientConfig, NetError, PeerClient};
pub use protocol::{OpCode, ProtocolError, Request, Response, Status};
