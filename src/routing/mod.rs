//! Routing State Module
//!
//! The per-node view of the ring: the predecessor, the successor list, and
//! the finger table, all guarded by one lock.
//!
//! ## Locking discipline
//! The lock is held only for in-memory reads and writes, never across
//! network I/O. Callers that need to combine routing state with RPCs follow
//! a capture-release pattern: snapshot the references they need, release,
//! talk to the network, then retake the lock to commit, re-validating that
//! the precondition still holds, since the state may have moved underneath
//! them in the meantime.

pub mod table;

pub use table::{RoutingTable, FINGER_TABLE_SIZE, SUCCESSOR_LIST_LEN};
