use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::failure::{DetectorConfig, FailureDetector};
use crate::net::{ClientConfig, NetError, PeerClient};
use crate::replication::{ReplicationConfig, ReplicationEngine};
use crate::ring::{in_arc, Id, NodeRef};
use crate::routing::RoutingTable;
use crate::storage::LocalStore;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub stabilize_interval: Duration,
    pub fix_fingers_interval: Duration,
    pub failure_check_interval: Duration,
    pub client: ClientConfig,
    pub detector: DetectorConfig,
    pub replication: ReplicationConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            stabilize_interval: Duration::from_secs(1),
            fix_fingers_interval: Duration::from_millis(500),
            failure_check_interval: Duration::from_secs(2),
            client: ClientConfig::default(),
            detector: DetectorConfig::default(),
            replication: ReplicationConfig::default(),
        }
    }
}

/// A single participant in the ring.
///
/// Owns the arc of keys between its predecessor and itself, replicates them
/// to its successors, and routes everything else.
pub struct OverlayNode {
    routing: RoutingTable,
    store: LocalStore,
    client: PeerClient,
    detector: FailureDetector,
    replication: Arc<ReplicationEngine>,
    config: NodeConfig,

    /// Seed endpoint handed to `join`; data requests arriving before the
    /// first stabilize round are redirected there.
    seed: Mutex<Option<NodeRef>>,
    /// Set once the node is correctly linked into the ring (immediately for
    /// a fresh ring, after the first completed stabilize for a join).
    linked: AtomicBool,
    running: AtomicBool,
    shutdown: Notify,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl OverlayNode {
    pub fn new(address: &str, port: u16, config: NodeConfig) -> Arc<Self> {
        let local = NodeRef::new(address, port);
        let client = PeerClient::new(config.client.clone());
        let detector = FailureDetector::new(config.detector.clone(), client.clone());
        let replication = ReplicationEngine::new(config.replication.clone(), client.clone());

        Arc::new(OverlayNode {
            routing: RoutingTable::new(local),
            store: LocalStore::new(),
            client,
            detector,
            replication,
            config,
            seed: Mutex::new(None),
            linked: AtomicBool::new(false),
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn local(&self) -> &NodeRef {
        self.routing.local()
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    #[cfg(test)]
    pub(crate) fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    pub fn successor(&self) -> NodeRef {
        self.routing.successor()
    }

    pub fn predecessor(&self) -> Option<NodeRef> {
        self.routing.predecessor()
    }

    pub fn successor_list(&self) -> Vec<NodeRef> {
        self.routing.successor_list()
    }

    pub fn owns(&self, id: &Id) -> bool {
        self.routing.owns(id)
    }

    pub fn is_linked(&self) -> bool {
        self.linked.load(Ordering::SeqCst)
    }

    pub fn seed(&self) -> Option<NodeRef> {
        self.seed.lock().clone()
    }

    /// Feeds the outcome of a peer RPC into the failure detector. A remote
    /// status reply still proves the peer is alive; only transport-level
    /// failures count against it.
    fn observe<T>(&self, peer: &NodeRef, result: &Result<T, NetError>) {
        match result {
            Ok(_) | Err(NetError::Remote(_, _)) => {
                self.detector.mark_responsive(&peer.endpoint())
            }
            Err(_) => self.detector.mark_failed(&peer.endpoint()),
        }
    }

    fn replica_targets(&self) -> Vec<NodeRef> {
        self.routing
            .replica_targets(self.replication.replication_factor())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Starts a brand-new ring with this node as its only member.
    pub fn create(&self) {
        self.routing.reset_single();
        *self.seed.lock() = None;
        self.linked.store(true, Ordering::SeqCst);
        tracing::info!("created new ring as {}", self.local());
    }

    /// Joins the ring that `seed` belongs to. The node is not fully linked
    /// until the first stabilize round completes; until then data requests
    /// are redirected to the seed.
    pub async fn join(&self, seed: NodeRef) -> Result<()> {
        if &seed == self.local() {
            self.create();
            return Ok(());
        }

        self.linked.store(false, Ordering::SeqCst);
        self.routing.seed_from(seed.clone());
        *self.seed.lock() = Some(seed.clone());

        // Ask the seed who our successor actually is; falling back to the
        // seed itself just means stabilize has one more hop to repair.
        match self.client.join(&seed, self.local()).await {
            Ok(successor) => {
                if &successor != self.local() {
                    self.routing.set_successor(successor.clone());
                }
                tracing::info!(
                    "{} joined via {} with successor {}",
                    self.local(),
                    seed,
                    successor
                );
            }
            Err(e) => {
                tracing::warn!(
                    "join lookup via {} failed ({}), keeping seed as successor",
                    seed,
                    e
                );
            }
        }

        Ok(())
    }

    /// Leaves the ring: keys are handed to the successor best-effort, then
    /// the node resets to a single-node ring. A failed transfer loses the
    /// keys, which is no worse than a crash.
    pub async fn leave(&self) {
        self.stop_maintenance().await;

        let successor = self.routing.successor();
        if &successor != self.local() {
            let entries = self.store.snapshot_where(|_| true);
            tracing::info!(
                "{} leaving, transferring {} keys to {}",
                self.local(),
                entries.len(),
                successor
            );

            let mut moved = 0;
            for (key, value) in entries {
                match self.client.replicate_put(&successor, &key, &value).await {
                    Ok(()) => {
                        self.store.delete(&key);
                        moved += 1;
                    }
                    Err(e) => {
                        tracing::warn!("key '{}' not transferred: {}", key, e);
                    }
                }
            }
            tracing::info!("transferred {} keys on leave", moved);
        }

        self.routing.reset_single();
        *self.seed.lock() = None;
        self.linked.store(true, Ordering::SeqCst);
    }

    /// Spawns the three maintenance loops. Idempotent.
    pub fn start_maintenance(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut tasks = self.tasks.lock();

        let node = self.clone();
        tasks.push(tokio::spawn(async move { node.stabilize_loop().await }));
        let node = self.clone();
        tasks.push(tokio::spawn(async move { node.fix_fingers_loop().await }));
        let node = self.clone();
        tasks.push(tokio::spawn(async move { node.failure_check_loop().await }));

        tracing::info!("maintenance started for {}", self.local());
    }

    /// Cooperative stop: clears the running flag, wakes every sleeping
    /// loop, and waits for them to exit. An in-flight RPC is allowed to
    /// finish or time out first.
    pub async fn stop_maintenance(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.notify_waiters();

        let handles: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        tracing::info!("maintenance stopped for {}", self.local());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Interruptible inter-round sleep; `true` when shutdown was signalled.
    async fn pause(&self, interval: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(interval) => false,
            _ = self.shutdown.notified() => true,
        }
    }

    async fn stabilize_loop(&self) {
        tracing::debug!("stabilize loop started");
        while self.running.load(Ordering::SeqCst) {
            self.stabilize().await;
            if self.pause(self.config.stabilize_interval).await {
                break;
            }
        }
        tracing::debug!("stabilize loop stopped");
    }

    async fn fix_fingers_loop(&self) {
        tracing::debug!("fix-fingers loop started");
        while self.running.load(Ordering::SeqCst) {
            self.fix_fingers().await;
            if self.pause(self.config.fix_fingers_interval).await {
                break;
            }
        }
        tracing::debug!("fix-fingers loop stopped");
    }

    async fn failure_check_loop(&self) {
        tracing::debug!("failure-check loop started");
        while self.running.load(Ordering::SeqCst) {
            self.check_failures().await;
            if self.pause(self.config.failure_check_interval).await {
                break;
            }
        }
        tracing::debug!("failure-check loop stopped");
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Resolves the node responsible for `id`.
    ///
    /// Local answers are preferred: our own arc, then the immediate
    /// successor's. Otherwise the query hops to the closest preceding
    /// finger; a transport failure on that hop degrades to the successor,
    /// which is always a correct (if slow) route.
    pub async fn find_successor(&self, id: &Id) -> NodeRef {
        if self.routing.owns(id) {
            return self.local().clone();
        }

        let successor = self.routing.successor();
        if in_arc(id, &self.local().id, &successor.id, true) {
            return successor;
        }

        let closest = self.routing.closest_preceding(id);
        if &closest == self.local() {
            return successor;
        }

        let result = self.client.find_successor(&closest, id).await;
        self.observe(&closest, &result);
        match result {
            Ok(node) => node,
            Err(e) => {
                tracing::debug!("lookup via {} failed ({}), using successor", closest, e);
                successor
            }
        }
    }

    // ------------------------------------------------------------------
    // Maintenance protocols
    // ------------------------------------------------------------------

    /// One stabilize round: adopt a closer successor if one appeared,
    /// notify the successor of our existence, and inherit its successor
    /// list shifted by one.
    pub async fn stabilize(&self) {
        let observed = self.routing.successor();
        if &observed == self.local() {
            // Alone, or the first node of a growing ring. A self-successor
            // can never be tightened by asking it for its predecessor, so
            // the only way to learn of a second node is the predecessor an
            // inbound notify installed; adopt it and let the next rounds
            // tighten from there.
            if let Some(pred) = self.routing.predecessor() {
                if &pred != self.local() && self.routing.set_successor_if(&observed, pred.clone())
                {
                    tracing::info!("adopted predecessor {} as first successor", pred);
                }
            }
            self.linked.store(true, Ordering::SeqCst);
            return;
        }

        let mut successor = observed.clone();
        let pred_result = self.client.get_predecessor(&successor).await;
        self.observe(&successor, &pred_result);
        match pred_result {
            Ok(Some(between)) => {
                if &between != self.local()
                    && in_arc(&between.id, &self.local().id, &successor.id, false)
                    && self.routing.set_successor_if(&observed, between.clone())
                {
                    tracing::debug!("successor tightened to {}", between);
                    successor = between;
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::debug!("stabilize: {} unreachable: {}", successor, e);
                return;
            }
        }

        let notify_result = self.client.notify(&successor, self.local()).await;
        self.observe(&successor, &notify_result);
        if notify_result.is_err() {
            return;
        }

        // Inherit the successor's list one hop behind it, so that L covers
        // us even after multiple simultaneous failures.
        match self.client.successor_list(&successor).await {
            Ok(list) => {
                let trimmed: Vec<NodeRef> = list
                    .into_iter()
                    .filter(|node| node != &successor)
                    .collect();
                self.routing.adopt_successor_list(&successor, trimmed);
            }
            Err(e) => {
                tracing::debug!("successor list fetch from {} failed: {}", successor, e);
            }
        }

        self.linked.store(true, Ordering::SeqCst);
    }

    /// Inbound notify: `candidate` believes it is our predecessor. When it
    /// wins the arc test, the keys that now belong to it are migrated by a
    /// background task, outside the routing lock.
    pub fn notify(self: &Arc<Self>, candidate: NodeRef) {
        match self.routing.note_predecessor(&candidate) {
            None => {}
            Some(old) => {
                tracing::info!(
                    "{} adopted predecessor {} (was {:?})",
                    self.local(),
                    candidate,
                    old.as_ref().map(|node| node.endpoint())
                );
                let node = self.clone();
                tokio::spawn(async move {
                    node.migrate_keys_to(candidate).await;
                });
            }
        }
    }

    /// Hands over every stored key that the new predecessor now owns.
    /// Failures leave keys in place; a later notify round retries.
    async fn migrate_keys_to(&self, new_owner: NodeRef) {
        let local_id = self.local().id;
        let moved_arc = self.store.snapshot_where(|key| {
            let kid = Id::digest(key.as_bytes());
            !in_arc(&kid, &new_owner.id, &local_id, true)
        });
        if moved_arc.is_empty() {
            return;
        }

        let mut moved = 0;
        for (key, value) in &moved_arc {
            match self.client.replicate_put(&new_owner, key, value).await {
                Ok(()) => {
                    self.store.delete(key);
                    moved += 1;
                }
                Err(e) => {
                    tracing::warn!("migration of '{}' to {} failed: {}", key, new_owner, e);
                    break;
                }
            }
        }
        tracing::info!(
            "migrated {}/{} keys to predecessor {}",
            moved,
            moved_arc.len(),
            new_owner
        );
    }

    /// One fix-fingers round: refresh a single table entry.
    pub async fn fix_fingers(&self) {
        let (index, start) = self.routing.advance_finger();
        let node = self.find_successor(&start).await;
        self.routing.set_finger(index, node);
    }

    /// One failure-check round: probe the predecessor and all distinct
    /// successors, react to confirmed failures, then age out stale status
    /// entries.
    pub async fn check_failures(&self) {
        let peers = self.routing.known_peers();

        let mut failed = Vec::new();
        for peer in peers {
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            self.detector.probe(&peer).await;
            if self.detector.is_failed(&peer.endpoint()) {
                failed.push(peer);
            }
        }

        for peer in failed {
            self.handle_node_failure(&peer).await;
        }

        self.detector.cleanup();
    }

    /// Reaction to a confirmed peer failure: purge it from routing state,
    /// refill the successor list, and push fresh replicas of owned keys.
    pub async fn handle_node_failure(&self, failed: &NodeRef) {
        tracing::info!("{} handling failure of {}", self.local(), failed);

        let was_successor = self.routing.remove_failed(failed);
        if was_successor {
            let replacement = self.find_successor(&self.local().id).await;
            self.routing.set_successor_tail(replacement);
        }

        // Keys we own may have lost one replica; push them at the refreshed
        // target set. Replica copies held for other primaries are left
        // alone; their new primary re-pushes on its next write.
        let owned = self
            .store
            .snapshot_where(|key| self.routing.owns(&Id::digest(key.as_bytes())));
        if owned.is_empty() {
            return;
        }
        let new_targets = self.replica_targets();
        self.replication
            .handle_replica_loss(failed, &new_targets, &owned)
            .await;
    }

    // ------------------------------------------------------------------
    // Data operations
    // ------------------------------------------------------------------

    /// Stores `key = value` on the ring.
    ///
    /// As the owner: write locally, then replicate synchronously. If any
    /// replica refuses, the local write is rolled back and the error
    /// surfaces. As a non-owner: forward to the responsible node.
    pub async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let kid = Id::digest(key.as_bytes());

        if self.routing.owns(&kid) {
            self.store.put(key, value.clone());
            let targets = self.replica_targets();
            if let Err(e) = self.replication.replicate_put(key, &value, &targets).await {
                self.store.delete(key);
                bail!("write of '{}' not durable, rolled back: {}", key, e);
            }
            return Ok(());
        }

        let responsible = self.find_successor(&kid).await;
        if &responsible == self.local() {
            bail!("no responsible node found for '{}'", key);
        }
        let result = self.client.put(&responsible, key, &value).await;
        self.observe(&responsible, &result);
        result.with_context(|| format!("forwarded put of '{}' to {}", key, responsible))
    }

    /// Reads `key` from the ring. As owner, the local store is
    /// authoritative with replicas as a fallback; otherwise forwarded.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let kid = Id::digest(key.as_bytes());

        if self.routing.owns(&kid) {
            if let Some(value) = self.store.get(key) {
                return Some(value);
            }
            let targets = self.replica_targets();
            if targets.is_empty() {
                return None;
            }
            return self.replication.get_from_replicas(key, &targets).await;
        }

        let responsible = self.find_successor(&kid).await;
        if &responsible == self.local() {
            return None;
        }
        let result = self.client.get(&responsible, key).await;
        self.observe(&responsible, &result);
        match result {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("forwarded get of '{}' failed: {}", key, e);
                None
            }
        }
    }

    /// Deletes `key` from the ring; `true` when the key existed.
    ///
    /// The local delete is authoritative: replica deletes that fail are
    /// logged but do not undo the operation. A stale replica serves at
    /// worst an outdated read until the next repair.
    pub async fn delete(&self, key: &str) -> bool {
        let kid = Id::digest(key.as_bytes());

        if self.routing.owns(&kid) {
            let targets = self.replica_targets();

            let mut existed = self.store.delete(key);
            if !existed && !targets.is_empty() {
                // Not here, but a replica may still hold it (e.g. after a
                // takeover before migration finished).
                existed = self
                    .replication
                    .get_from_replicas(key, &targets)
                    .await
                    .is_some();
            }
            if !existed {
                return false;
            }

            if let Err(e) = self.replication.replicate_delete(key, &targets).await {
                tracing::warn!(
                    "delete of '{}' incomplete on replicas (local delete stands): {}",
                    key,
                    e
                );
            }
            return true;
        }

        let responsible = self.find_successor(&kid).await;
        if &responsible == self.local() {
            return false;
        }
        let result = self.client.delete(&responsible, key).await;
        self.observe(&responsible, &result);
        match result {
            Ok(existed) => existed,
            Err(e) => {
                tracing::warn!("forwarded delete of '{}' failed: {}", key, e);
                false
            }
        }
    }

    /// Replica put pushed by a primary: applied directly, no ownership
    /// check and no further replication.
    pub fn apply_replica_put(&self, key: &str, value: Vec<u8>) {
        self.store.put(key, value);
    }

    /// Replica delete pushed by a primary.
    pub fn apply_replica_delete(&self, key: &str) -> bool {
        self.store.delete(key)
    }
}
