//! Failure Detection Module
//!
//! Tracks the health of every peer this node talks to, keyed by endpoint.
//! The maintenance loop drives periodic pings through [`FailureDetector::probe`];
//! the peer client reports the outcome of its regular RPCs through the
//! direct `mark_responsive` / `mark_failed` overrides.
//!
//! A peer escalates through `suspected` (half the failure threshold) to
//! `failed` (full threshold) on consecutive missed probes, and a single
//! successful contact resets it completely. Failed entries linger in the
//! status map until the cleanup age passes so that flapping peers are not
//! forgotten between probe rounds, but they must never be handed out as
//! routing or replica targets; that purge is the overlay node's job.

pub mod detector;

pub use detector::{DetectorConfig, FailureDetector, PeerStatus};

#[cfg(test)]
mod tests;
