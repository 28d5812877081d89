use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::debug;

use crate::config::{int_param, uint_param, Params};
use crate::connector::Connector;
use crate::error::{ConfigError, StageError};
use crate::message::{Message, Status};
use crate::registry::BuildContext;
use crate::stage::{Stage, StageKind};

const DEFAULT_TIMEOUT_MS: u64 = 50;
const INTAKE_CAPACITY: usize = 1024;

/// Broadcast link: forwards an independent copy of every message to each
/// active downstream and aggregates the outcome.
///
/// Params: `timeout_ms` (overall ack deadline, default 50) and `active_mask`
/// (64-bit participation mask, default all-ones; target `i` participates iff
/// bit `i` is set).
pub struct Demux {
    name: String,
    connector: Connector,
    timeout: Duration,
    active_mask: u64,
    nworkers: usize,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Demux {
    pub fn build(
        name: &str,
        params: &Params,
        ctx: &BuildContext,
    ) -> Result<Arc<dyn Stage>, ConfigError> {
        let timeout_ms = uint_param(params, name, "timeout_ms")?.unwrap_or(DEFAULT_TIMEOUT_MS);
        // The mask is a raw bit pattern; negative integers supply the high
        // bit (-1 == all-ones).
        let active_mask = int_param(params, name, "active_mask")?
            .map(|i| i as u64)
            .unwrap_or(u64::MAX);
        Ok(Arc::new(Demux {
            name: name.to_string(),
            connector: Connector::new(name, INTAKE_CAPACITY),
            timeout: Duration::from_millis(timeout_ms),
            active_mask,
            nworkers: ctx.system.maxprocs,
            tasks: Mutex::new(Vec::new()),
        }))
    }
}

#[async_trait]
impl Stage for Demux {
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
        debug!(stage = %self.name, targets = peers.len(), "demux starting");

        let mut tasks = self.tasks.lock().expect("demux task list poisoned");
        for _ in 0..self.nworkers {
            let rx = self.connector.intake();
            let peers = peers.clone();
            let mask = self.active_mask;
            let timeout = self.timeout;
            tasks.push(tokio::spawn(async move {
                while let Ok(msg) = rx.recv_async().await {
                    demultiplex(msg, mask, &peers, timeout).await;
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
        let tasks = std::mem::take(&mut *self.tasks.lock().expect("demux task list poisoned"));
        for task in tasks {
            let _ = task.await;
        }
        Ok(())
    }
}

/// Copy `msg` to every active downstream and terminate it with the
/// aggregate outcome.
///
/// The deadline covers both the send phase and the ack joins. An async
/// message is acked `Done` once every handoff has returned; a sync message
/// joins its children's completions and resolves to `Done` (all children
/// `Done`), `PartialSend` (some), `Failed` (none), or `TimedOut` (deadline
/// hit first; late child acks land in dropped slots and disappear).
pub(crate) async fn demultiplex(
    msg: Message,
    active: u64,
    peers: &[Arc<dyn Stage>],
    timeout: Duration,
) {
    let deadline = Instant::now() + timeout;

    let participants: Vec<Arc<dyn Stage>> = peers
        .iter()
        .take(64)
        .enumerate()
        .filter(|(i, _)| (active >> i) & 1 == 1)
        .map(|(_, p)| Arc::clone(p))
        .collect();

    if participants.is_empty() {
        msg.complete(Status::Done);
        return;
    }

    let total = participants.len();
    let sync = msg.is_sync();

    let mut branches = JoinSet::new();
    for peer in participants {
        let (copy, wait) = msg.copy();
        branches.spawn(async move {
            match peer.receive(copy).await {
                Ok(()) if sync => wait.wait().await,
                Ok(()) => Status::Done,
                Err(_) => Status::Failed,
            }
        });
    }

    if !sync {
        // Send phase only; success is assumed at dispatch.
        while branches.join_next().await.is_some() {}
        msg.complete(Status::Done);
        return;
    }

    let mut succ = 0usize;
    let joined = tokio::time::timeout_at(deadline, async {
        while let Some(res) = branches.join_next().await {
            if matches!(res, Ok(Status::Done)) {
                succ += 1;
            }
        }
    })
    .await;

    let status = match joined {
        Err(_) => Status::TimedOut,
        Ok(()) if succ == total => Status::Done,
        Ok(()) if succ == 0 => Status::Failed,
        Ok(()) => Status::PartialSend,
    };
    msg.complete(status);
}
