use parking_lot::Mutex;

use crate::ring::{in_arc, Id, NodeRef, ID_BITS};

/// Number of clockwise neighbors cached per node. The list doubles as the
/// replica target pool, so it must be at least the replication factor.
pub const SUCCESSOR_LIST_LEN: usize = 8;
/// One finger per identifier bit.
pub const FINGER_TABLE_SIZE: usize = ID_BITS;

struct Inner {
    predecessor: Option<NodeRef>,
    /// Always exactly [`SUCCESSOR_LIST_LEN`] entries; slot 0 is the
    /// immediate clockwise neighbor and is never empty (alone = self).
    successors: Vec<NodeRef>,
    /// Always exactly [`FINGER_TABLE_SIZE`] entries. Entries may be stale;
    /// they only accelerate lookups, correctness never depends on them.
    fingers: Vec<NodeRef>,
    next_finger: usize,
}

/// All mutable routing state of a node behind a single lock.
///
/// Every accessor returns owned copies; nothing borrowed escapes the lock.
pub struct RoutingTable {
    local: NodeRef,
    inner: Mutex<Inner>,
}

impl RoutingTable {
    pub fn new(local: NodeRef) -> Self {
        let inner = Inner {
            predecessor: None,
            successors: vec![local.clone(); SUCCESSOR_LIST_LEN],
            fingers: vec![local.clone(); FINGER_TABLE_SIZE],
            next_finger: 0,
        };
        RoutingTable {
            local,
            inner: Mutex::new(inner),
        }
    }

    pub fn local(&self) -> &NodeRef {
        &self.local
    }

    pub fn successor(&self) -> NodeRef {
        self.inner.lock().successors[0].clone()
    }

    pub fn predecessor(&self) -> Option<NodeRef> {
        self.inner.lock().predecessor.clone()
    }

    pub fn successor_list(&self) -> Vec<NodeRef> {
        self.inner.lock().successors.clone()
    }

    /// Whether this node is responsible for `id`: the identifier lies in the
    /// arc `(predecessor, self]`, or no predecessor is known yet and the
    /// node claims the whole ring.
    pub fn owns(&self, id: &Id) -> bool {
        let inner = self.inner.lock();
        match &inner.predecessor {
            None => true,
            Some(pred) => in_arc(id, &pred.id, &self.local.id, true),
        }
    }

    /// Highest finger strictly between this node and `id`, or self when the
    /// whole table points elsewhere. Pure table scan; no I/O.
    pub fn closest_preceding(&self, id: &Id) -> NodeRef {
        let inner = self.inner.lock();
        for finger in inner.fingers.iter().rev() {
            if finger != &self.local && in_arc(&finger.id, &self.local.id, id, false) {
                return finger.clone();
            }
        }
        self.local.clone()
    }

    /// The first `factor - 1` distinct successors other than self: the
    /// nodes a locally owned key must be copied to.
    pub fn replica_targets(&self, factor: usize) -> Vec<NodeRef> {
        let inner = self.inner.lock();
        let mut targets: Vec<NodeRef> = Vec::new();
        for succ in &inner.successors {
            if targets.len() + 1 >= factor {
                break;
            }
            if succ == &self.local || targets.contains(succ) {
                continue;
            }
            targets.push(succ.clone());
        }
        targets
    }

    /// Distinct peers worth health-checking: every successor plus the
    /// predecessor, self excluded.
    pub fn known_peers(&self) -> Vec<NodeRef> {
        let inner = self.inner.lock();
        let mut peers: Vec<NodeRef> = Vec::new();
        for succ in &inner.successors {
            if succ != &self.local && !peers.contains(succ) {
                peers.push(succ.clone());
            }
        }
        if let Some(pred) = &inner.predecessor {
            if pred != &self.local && !peers.contains(pred) {
                peers.push(pred.clone());
            }
        }
        peers
    }

    /// Single-node state: no predecessor, everything points at self.
    pub fn reset_single(&self) {
        let mut inner = self.inner.lock();
        inner.predecessor = None;
        inner.successors = vec![self.local.clone(); SUCCESSOR_LIST_LEN];
        inner.fingers = vec![self.local.clone(); FINGER_TABLE_SIZE];
    }

    /// Bootstrap state for a joining node: successor and all fingers point
    /// at the seed until the first stabilize round links us properly.
    pub fn seed_from(&self, seed: NodeRef) {
        let mut inner = self.inner.lock();
        inner.predecessor = None;
        inner.successors = vec![self.local.clone(); SUCCESSOR_LIST_LEN];
        inner.successors[0] = seed.clone();
        inner.fingers = vec![seed; FINGER_TABLE_SIZE];
    }

    pub fn set_successor(&self, node: NodeRef) {
        self.inner.lock().successors[0] = node;
    }

    /// Commits a new immediate successor only if the slot still holds the
    /// value observed before the RPC that discovered the replacement.
    pub fn set_successor_if(&self, observed: &NodeRef, node: NodeRef) -> bool {
        let mut inner = self.inner.lock();
        if &inner.successors[0] == observed {
            inner.successors[0] = node;
            true
        } else {
            false
        }
    }

    /// Rebuilds the successor list from the immediate successor's own list,
    /// shifted by one. Skipped when the head no longer matches, which means
    /// stabilize lost a race with a concurrent topology change.
    pub fn adopt_successor_list(&self, head: &NodeRef, list: Vec<NodeRef>) -> bool {
        let mut inner = self.inner.lock();
        if &inner.successors[0] != head {
            return false;
        }

        let mut merged: Vec<NodeRef> = vec![head.clone()];
        for node in list {
            if merged.len() >= SUCCESSOR_LIST_LEN {
                break;
            }
            if !merged.contains(&node) {
                merged.push(node);
            }
        }
        while merged.len() < SUCCESSOR_LIST_LEN {
            merged.push(self.local.clone());
        }
        inner.successors = merged;
        true
    }

    /// Outcome of an inbound notify. `Updated` carries the displaced
    /// predecessor so the caller can migrate the keys that moved.
    pub fn note_predecessor(&self, candidate: &NodeRef) -> Option<Option<NodeRef>> {
        if candidate == &self.local {
            return None;
        }
        let mut inner = self.inner.lock();
        let accept = match &inner.predecessor {
            None => true,
            Some(pred) => in_arc(&candidate.id, &pred.id, &self.local.id, false),
        };
        if accept {
            let old = inner.predecessor.replace(candidate.clone());
            Some(old)
        } else {
            None
        }
    }

    /// Purges a failed node from every routing structure: the successor
    /// list is shifted left (tail refilled by the caller once a replacement
    /// is known), the predecessor is cleared for stabilize to repair, and
    /// fingers fall back to the surviving immediate successor.
    ///
    /// Returns `true` when the node was present in the successor list.
    pub fn remove_failed(&self, failed: &NodeRef) -> bool {
        let mut inner = self.inner.lock();

        let mut was_successor = false;
        if let Some(pos) = inner.successors.iter().position(|succ| succ == failed) {
            was_successor = true;
            inner.successors.remove(pos);
            let filler = self.local.clone();
            inner.successors.push(filler);
        }

        if inner.predecessor.as_ref() == Some(failed) {
            inner.predecessor = None;
        }

        let fallback = inner.successors[0].clone();
        for finger in inner.fingers.iter_mut() {
            if finger == failed {
                *finger = fallback.clone();
            }
        }

        was_successor
    }

    /// Installs a freshly resolved node into the last successor slot after
    /// a failure shifted the list.
    pub fn set_successor_tail(&self, node: NodeRef) {
        let mut inner = self.inner.lock();
        let last = inner.successors.len() - 1;
        inner.successors[last] = node;
    }

    /// Advances the round-robin finger pointer and returns the index to
    /// refresh together with its arc start `self + 2^index`.
    pub fn advance_finger(&self) -> (usize, Id) {
        let mut inner = self.inner.lock();
        inner.next_finger = (inner.next_finger + 1) % FINGER_TABLE_SIZE;
        let index = inner.next_finger;
        (index, self.local.id.add_pow2(index))
    }

    pub fn set_finger(&self, index: usize, node: NodeRef) {
        let mut inner = self.inner.lock();
        if index < inner.fingers.len() {
            inner.fingers[index] = node;
        }
    }

    #[cfg(test)]
    pub fn finger(&self, index: usize) -> NodeRef {
        self.inner.lock().fingers[index].clone()
    }
}
