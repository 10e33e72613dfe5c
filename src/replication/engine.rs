use anyhow::{bail, Result};
use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::net::PeerClient;
use crate::ring::NodeRef;

/// Depth of the async replication queue. Writes beyond this back up the
/// producer rather than growing without bound.
const QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Total copies of every key, the primary included.
    pub replication_factor: usize,
    /// Budget for one synchronous fan-out round.
    pub sync_timeout: Duration,
    /// Retries per queued task in async mode.
    pub max_retries: u32,
    /// Acknowledge writes on enqueue instead of on replica acceptance.
    pub async_mode: bool,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        ReplicationConfig {
            replication_factor: 3,
            sync_timeout: Duration::from_secs(5),
            max_retries: 3,
            async_mode: false,
        }
    }
}

enum TaskKind {
    Put { value: Vec<u8> },
    Delete,
}

struct ReplicaTask {
    kind: TaskKind,
    key: String,
    targets: Vec<NodeRef>,
    attempt: u32,
}

/// Fans data operations out to replica targets.
pub struct ReplicationEngine {
    config: ReplicationConfig,
    client: PeerClient,
    /// When each key was last pushed to its replicas.
    timestamps: DashMap<String, Instant>,
    queue: Option<mpsc::Sender<ReplicaTask>>,
}

impl ReplicationEngine {
    pub fn new(config: ReplicationConfig, client: PeerClient) -> Arc<Self> {
        let (tx, rx) = if config.async_mode {
            let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let engine = Arc::new(ReplicationEngine {
            config,
            client,
            timestamps: DashMap::new(),
            queue: tx,
        });

        if let Some(rx) = rx {
            let worker = engine.clone();
            tokio::spawn(async move {
                worker.worker_loop(rx).await;
            });
        }

        engine
    }

    pub fn replication_factor(&self) -> usize {
        self.config.replication_factor
    }

    /// How many targets one write actually fans out to.
    fn fanout(&self, targets: &[NodeRef]) -> usize {
        targets
            .len()
            .min(self.config.replication_factor.saturating_sub(1))
    }

    /// Pushes `key = value` to the replica targets.
    ///
    /// Synchronous mode succeeds only if every attempted replica accepted
    /// the write; the caller is expected to undo its local put on error.
    /// Async mode succeeds once the task is queued.
    pub async fn replicate_put(
        &self,
        key: &str,
        value: &[u8],
        targets: &[NodeRef],
    ) -> Result<()> {
        if let Some(queue) = &self.queue {
            let task = ReplicaTask {
                kind: TaskKind::Put {
                    value: value.to_vec(),
                },
                key: key.to_string(),
                targets: targets.to_vec(),
                attempt: 0,
            };
            if queue.send(task).await.is_err() {
                bail!("replication worker is gone");
            }
            self.timestamps.insert(key.to_string(), Instant::now());
            return Ok(());
        }

        let wanted = self.fanout(targets);
        let fan_out = async {
            let mut acknowledged = 0;
            for target in targets.iter().take(wanted) {
                match self.client.replicate_put(target, key, value).await {
                    Ok(()) => acknowledged += 1,
                    Err(e) => {
                        tracing::warn!("replica put of '{}' to {} failed: {}", key, target, e);
                    }
                }
            }
            acknowledged
        };
        let acknowledged = tokio::time::timeout(self.config.sync_timeout, fan_out)
            .await
            .unwrap_or(0);
        self.timestamps.insert(key.to_string(), Instant::now());

        if acknowledged != wanted {
            bail!(
                "replicated '{}' to {}/{} targets",
                key,
                acknowledged,
                wanted
            );
        }
        Ok(())
    }

    /// Removes `key` from the replica targets; same success rule as
    /// [`Self::replicate_put`].
    pub async fn replicate_delete(&self, key: &str, targets: &[NodeRef]) -> Result<()> {
        if let Some(queue) = &self.queue {
            let task = ReplicaTask {
                kind: TaskKind::Delete,
                key: key.to_string(),
                targets: targets.to_vec(),
                attempt: 0,
            };
            if queue.send(task).await.is_err() {
                bail!("replication worker is gone");
            }
            self.timestamps.remove(key);
            return Ok(());
        }

        let wanted = self.fanout(targets);
        let fan_out = async {
            let mut acknowledged = 0;
            for target in targets.iter().take(wanted) {
                match self.client.replicate_delete(target, key).await {
                    Ok(_) => acknowledged += 1,
                    Err(e) => {
                        tracing::warn!("replica delete of '{}' on {} failed: {}", key, target, e);
                    }
                }
            }
            acknowledged
        };
        let acknowledged = tokio::time::timeout(self.config.sync_timeout, fan_out)
            .await
            .unwrap_or(0);
        self.timestamps.remove(key);

        if acknowledged != wanted {
            bail!(
                "delete of '{}' reached {}/{} replicas",
                key,
                acknowledged,
                wanted
            );
        }
        Ok(())
    }

    /// Read fallback: first replica that returns a value wins. Used when
    /// the primary's local lookup misses.
    pub async fn get_from_replicas(&self, key: &str, targets: &[NodeRef]) -> Option<Vec<u8>> {
        for target in targets {
            match self.client.get(target, key).await {
                Ok(Some(value)) => return Some(value),
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!("replica read of '{}' from {} failed: {}", key, target, e);
                }
            }
        }
        None
    }

    /// Re-homes the given keys after `failed` dropped out of their replica
    /// set: each key is pushed to the first live entry of `new_targets`.
    /// Returns the number of keys that found a new home; the rest are
    /// logged and left for the next maintenance round.
    pub async fn handle_replica_loss(
        &self,
        failed: &NodeRef,
        new_targets: &[NodeRef],
        keys: &[(String, Vec<u8>)],
    ) -> usize {
        let mut rehomed = 0;
        for (key, value) in keys {
            let mut placed = false;
            for target in new_targets {
                if target == failed {
                    continue;
                }
                match self.client.replicate_put(target, key, value).await {
                    Ok(()) => {
                        self.timestamps.insert(key.clone(), Instant::now());
                        placed = true;
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(
                            "re-replication of '{}' to {} failed: {}",
                            key,
                            target,
                            e
                        );
                    }
                }
            }
            if placed {
                rehomed += 1;
            } else {
                tracing::warn!("could not re-replicate '{}' anywhere", key);
            }
        }

        tracing::info!(
            "re-replicated {}/{} keys after losing {}",
            rehomed,
            keys.len(),
            failed
        );
        rehomed
    }

    /// Number of keys with a recorded replication push.
    pub fn tracked_keys(&self) -> usize {
        self.timestamps.len()
    }

    async fn worker_loop(self: Arc<Self>, mut rx: mpsc::Receiver<ReplicaTask>) {
        tracing::debug!("async replication worker started");

        while let Some(mut task) = rx.recv().await {
            let done = self.apply(&task).await;
            if done {
                continue;
            }

            task.attempt += 1;
            if task.attempt >= self.config.max_retries {
                tracing::error!(
                    "replication of '{}' abandoned after {} attempts",
                    task.key,
                    task.attempt
                );
                continue;
            }

            let backoff =
                Duration::from_millis(100 * task.attempt as u64 + rand::thread_rng().gen_range(0..50));
            tracing::warn!(
                "replication of '{}' failed, retry {}/{} in {:?}",
                task.key,
                task.attempt,
                self.config.max_retries,
                backoff
            );
            tokio::time::sleep(backoff).await;

            // try_send: blocking here would wedge the only consumer of the
            // queue when it is full.
            if let Some(queue) = &self.queue {
                if queue.try_send(task).is_err() {
                    tracing::error!("replication queue full, dropping retry");
                }
            }
        }

        tracing::debug!("async replication worker stopped");
    }

    async fn apply(&self, task: &ReplicaTask) -> bool {
        let wanted = self.fanout(&task.targets);
        let mut acknowledged = 0;
        for target in task.targets.iter().take(wanted) {
            let outcome = match &task.kind {
                TaskKind::Put { value } => {
                    self.client.replicate_put(target, &task.key, value).await
                }
                TaskKind::Delete => self
                    .client
                    .replicate_delete(target, &task.key)
                    .await
                    .map(|_| ()),
            };
            if outcome.is_ok() {
                acknowledged += 1;
            }
        }
        acknowledged == wanted
    }
}
