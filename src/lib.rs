//! Distributed Key-Value Store Library
//!
//! This library crate defines the core modules of a distributed key-value
//! store built on a Chord-style consistent-hashing overlay. It serves as the
//! foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! The system is composed of several loosely coupled subsystems:
//!
//! - **`ring`**: Identifier arithmetic on the 160-bit ring and node identity.
//!   Pure functions; everything else is built on top of them.
//! - **`storage`**: The thread-safe in-memory byte store holding the keys a
//!   node owns (and the replicas it carries for its predecessors).
//! - **`routing`**: Per-node routing state (predecessor, successor list,
//!   finger table) guarded by a single lock.
//! - **`net`**: The length-prefixed binary wire protocol and the short-lived
//!   per-request peer client with bounded timeouts.
//! - **`failure`**: Ping-driven failure detector tracking per-peer health.
//! - **`replication`**: Successor replication: synchronous fan-out writes,
//!   replica reads, re-replication after node loss, optional async queue.
//! - **`node`**: The overlay node composing all of the above: lifecycle,
//!   lookups, the three maintenance protocols, and the data operations.
//! - **`server`**: TCP front door: bounded worker pool and the request
//!   dispatcher that decides between local service and redirect.

pub mod failure;
pub mod net;
pub mod node;
pub mod replication;
pub mod ring;
pub mod routing;
pub mod server;
pub mod storage;
