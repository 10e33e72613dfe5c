//! Replication Module
//!
//! Pushes writes and deletes out to the successor nodes that carry replica
//! copies, and pulls from them when the primary's local lookup misses.
//!
//! The engine is deliberately passive: it never inspects routing state. The
//! overlay node computes the replica target set (the first `R - 1` distinct
//! successors) and passes it into every call, which keeps the dependency
//! one-way and the engine testable against plain endpoint lists.
//!
//! ## Modes
//! - **Synchronous** (default): a write succeeds only if every attempted
//!   replica acknowledged it; the caller rolls its local write back
//!   otherwise.
//! - **Asynchronous**: writes are acknowledged once enqueued on a bounded
//!   FIFO queue drained by a worker task, with bounded retries. Faster, but
//!   a crash can lose acknowledged-but-unreplicated writes.

pub mod engine;

pub use engine::{ReplicationConfig, ReplicationEngine};
