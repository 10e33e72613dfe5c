//! Identifier Ring Module
//!
//! Arithmetic on the 160-bit identifier circle and the node identity derived
//! from it. Every routing and ownership decision in the system reduces to the
//! three primitives defined here: unsigned ordering of identifiers, modular
//! addition of powers of two (finger starts), and half-open arc membership
//! with wraparound.
//!
//! Keeping the arithmetic separate from the routing structures makes both
//! independently testable; the arc predicate in particular concentrates the
//! wraparound and inclusivity rules in one place.

pub mod id;
pub mod node;

pub use id::{in_arc, Id, ID_BITS, ID_BYTES};
pub use node::NodeRef;

#[cfg(test)]
mod tests;
