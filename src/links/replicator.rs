use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::debug;

use crate::config::{str_param, uint_param, Params, Value};
use crate::connector::Connector;
use crate::error::{ConfigError, StageError};
use crate::hash::{fnv1a64, jump_hash};
use crate::message::{Message, Status};
use crate::registry::BuildContext;
use crate::stage::{Stage, StageKind};

const DEFAULT_REPLICAS: usize = 3;
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(50);
const INTAKE_CAPACITY: usize = 1024;

/// Sharding link: picks `replicas` of the downstreams per message with a
/// deterministic, stable-under-append hashing scheme, then fans out to the
/// chosen subset.
///
/// Params: `replicas` (default 3), `hash_key` (metadata key holding the
/// byte-typed shard key; empty selects the payload), `n_buckets` (reserved
/// for future ring sharding, parsed and kept).
pub struct Replicator {
    name: String,
    connector: Connector,
    replicas: usize,
    hash_key: String,
    #[allow(dead_code)]
    n_buckets: u32,
    timeout: Duration,
    nworkers: usize,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Replicator {
    pub fn build(
        name: &str,
        params: &Params,
        ctx: &BuildContext,
    ) -> Result<Arc<dyn Stage>, ConfigError> {
        let replicas = uint_param(params, name, "replicas")?.unwrap_or(DEFAULT_REPLICAS as u64);
        let hash_key = str_param(params, name, "hash_key")?.unwrap_or("").to_string();
        let n_buckets = uint_param(params, name, "n_buckets")?.unwrap_or(u64::from(u32::MAX));
        Ok(Arc::new(Replicator {
            name: name.to_string(),
            connector: Connector::new(name, INTAKE_CAPACITY),
            replicas: replicas as usize,
            hash_key,
            n_buckets: n_buckets as u32,
            timeout: DEFAULT_TIMEOUT,
            nworkers: ctx.system.maxprocs,
            tasks: Mutex::new(Vec::new()),
        }))
    }
}

#[async_trait]
impl Stage for Replicator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Link
    }

    fn connector(&self) -> &Connector {
        &self.connector
    }

    async fn start(&self) -> Result<(), StageError> {
        if self.connector.mark_started() {
            return Ok(());
        }
        let peers: Vec<Arc<dyn Stage>> = self
            .connector
            .peers()
            .into_iter()
            .map(|p| p.stage)
            .collect();
        debug!(
            stage = %self.name,
            targets = peers.len(),
            replicas = self.replicas,
            "replicator starting"
        );

        let mut tasks = self.tasks.lock().expect("replicator task list poisoned");
        for _ in 0..self.nworkers {
            let rx = self.connector.intake();
            let peers = peers.clone();
            let replicas = self.replicas;
            let hash_key = self.hash_key.clone();
            let timeout = self.timeout;
            let name = self.name.clone();
            tasks.push(tokio::spawn(async move {
                while let Ok(msg) = rx.recv_async().await {
                    let key = if hash_key.is_empty() {
                        Some(msg.payload().clone())
                    } else {
                        match msg.meta(&hash_key) {
                            Some(Value::Bytes(b)) => Some(Bytes::copy_from_slice(b)),
                            _ => None,
                        }
                    };
                    let Some(key) = key else {
                        debug!(stage = %name, key = %hash_key, "shard key missing or not bytes");
                        msg.complete(Status::Invalid);
                        continue;
                    };
                    replicate(msg, &key, &peers, replicas, timeout).await;
                }
            }));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), StageError> {
        if self.connector.mark_stopped() {
            return Ok(());
        }
        self.connector.close_intake();
        let tasks =
            std::mem::take(&mut *self.tasks.lock().expect("replicator task list poisoned"));
        for task in tasks {
            let _ = task.await;
        }
        Ok(())
    }
}

/// Fan a message out to the `replicas` targets selected for `key` and
/// terminate it.
///
/// An async message is acked `Done` once every handoff has returned. A sync
/// message is acked `Done` when all chosen replicas have completed within
/// the deadline, `TimedOut` otherwise; the replica statuses themselves are
/// not inspected.
async fn replicate(
    msg: Message,
    key: &[u8],
    peers: &[Arc<dyn Stage>],
    replicas: usize,
    timeout: Duration,
) {
    let deadline = Instant::now() + timeout;

    let Some(chosen) = select_indices(key, peers.len(), replicas) else {
        msg.complete(Status::Invalid);
        return;
    };

    let sync = msg.is_sync();
    let mut branches = JoinSet::new();
    for ix in chosen {
        let peer = Arc::clone(&peers[ix]);
        let (copy, wait) = msg.copy();
        branches.spawn(async move {
            if peer.receive(copy).await.is_ok() && sync {
                let _ = wait.wait().await;
            }
        });
    }

    if !sync {
        while branches.join_next().await.is_some() {}
        msg.complete(Status::Done);
        return;
    }

    let joined = tokio::time::timeout_at(deadline, async {
        while branches.join_next().await.is_some() {}
    })
    .await;

    match joined {
        Ok(()) => msg.complete(Status::Done),
        Err(_) => msg.complete(Status::TimedOut),
    };
}

/// Pick `replicas` distinct indices from `[0, n)` for `key`.
///
/// Each round jump-hashes the running key over the shrinking pool, swaps the
/// pick with the last slot to remove it without reallocation, and advances
/// the key with an xorshift* step. Deterministic for a given `(key, n)`;
/// appending a target relocates only the keys jump hash assigns to the new
/// slot. Returns `None` when `replicas > n`.
pub(crate) fn select_indices(key: &[u8], n: usize, replicas: usize) -> Option<Vec<usize>> {
    if replicas > n {
        return None;
    }

    let mut pool: Vec<usize> = (0..n).collect();
    let mut h = fnv1a64(key);
    let mut picked = Vec::with_capacity(replicas);
    for _ in 0..replicas {
        let j = jump_hash(h, pool.len() as i32) as usize;
        picked.push(pool[j]);
        let last = pool.len() - 1;
        pool[j] = pool[last];
        pool.truncate(last);

        h ^= h >> 12;
        h ^= h << 25;
        h ^= h >> 27;
        h = h.wrapping_mul(2_685_821_657_736_338_717);
    }
    Some(picked)
}
