use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::{uint_param, Params};
use crate::connector::Connector;
use crate::error::{ConfigError, StageError};
use crate::message::{AckSlot, Message, Status};
use crate::registry::BuildContext;
use crate::stage::{Stage, StageKind};

const DEFAULT_CAPACITY: usize = 65536;
const DEFAULT_MAX_ATTEMPTS: u32 = 16;

/// One redelivery unit on the buffer queue: the retained message, how many
/// attempts it has consumed, and the originator's parked completion slot.
struct Attempt {
    msg: Message,
    attempt: u32,
    parent: AckSlot,
}

type SharedSender = Arc<Mutex<Option<flume::Sender<Attempt>>>>;

/// Bounded intermediate that decouples a fast upstream from a slower
/// downstream and redelivers non-terminal failures.
///
/// On intake the originator's completion slot is parked; each attempt hands
/// the downstream a copy carrying a fresh slot. A successful attempt (or
/// exhaustion of `max_attempts`) writes the final attempt's status into the
/// parked slot, so the originator sees exactly one ack. A full intake queue
/// blocks `receive`, pushing backpressure upstream.
///
/// Params: `capacity` (queue depth, default 65536) and `max_attempts`
/// (default 16).
pub struct Buffer {
    name: String,
    connector: Connector,
    queue_tx: SharedSender,
    queue_rx: flume::Receiver<Attempt>,
    max_attempts: u32,
    nworkers: usize,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Buffer {
    pub fn build(
        name: &str,
        params: &Params,
        ctx: &BuildContext,
    ) -> Result<Arc<dyn Stage>, ConfigError> {
        let capacity =
            uint_param(params, name, "capacity")?.unwrap_or(DEFAULT_CAPACITY as u64) as usize;
        let max_attempts = uint_param(params, name, "max_attempts")?
            .unwrap_or(u64::from(DEFAULT_MAX_ATTEMPTS)) as u32;
        let (queue_tx, queue_rx) = flume::bounded(capacity);
        Ok(Arc::new(Buffer {
            name: name.to_string(),
            connector: Connector::new(name, capacity),
            queue_tx: Arc::new(Mutex::new(Some(queue_tx))),
            queue_rx,
            max_attempts,
            nworkers: ctx.system.maxprocs,
            tasks: Mutex::new(Vec::new()),
        }))
    }
}

/// Grab a transient sender handle, or `None` once the queue is closed.
///
/// Workers never hold a long-lived sender: that would keep the channel
/// connected across `stop` and the drain would never finish.
fn checkout(tx: &SharedSender) -> Option<flume::Sender<Attempt>> {
    tx.lock().expect("buffer queue lock poisoned").clone()
}

#[async_trait]
impl Stage for Buffer {
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
        let peer = self
            .connector
            .peers()
            .first()
            .map(|p| Arc::clone(&p.stage))
            .ok_or_else(|| StageError::DownstreamRequired(self.name.clone()))?;
        debug!(stage = %self.name, max_attempts = self.max_attempts, "buffer starting");

        let mut tasks = self.tasks.lock().expect("buffer task list poisoned");
        for _ in 0..self.nworkers {
            let rx = self.queue_rx.clone();
            let peer = Arc::clone(&peer);
            let max_attempts = self.max_attempts;
            let requeue = Arc::clone(&self.queue_tx);
            tasks.push(tokio::spawn(async move {
                while let Ok(Attempt {
                    msg,
                    attempt,
                    parent,
                }) = rx.recv_async().await
                {
                    let (delivery, wait) = msg.copy();
                    let status = match peer.receive(delivery).await {
                        Ok(()) => wait.wait().await,
                        Err(_) => Status::Failed,
                    };

                    if status.is_success() || attempt >= max_attempts {
                        parent.complete(status);
                        continue;
                    }

                    // Redeliver at the tail of the queue. When the queue is
                    // already closed the last attempt's status stands.
                    match checkout(&requeue) {
                        Some(tx) => {
                            let item = Attempt {
                                msg,
                                attempt: attempt + 1,
                                parent,
                            };
                            if let Err(flume::SendError(item)) = tx.send_async(item).await {
                                item.parent.complete(status);
                            }
                        }
                        None => {
                            parent.complete(status);
                        }
                    }
                }
            }));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), StageError> {
        if self.connector.mark_stopped() {
            return Ok(());
        }
        self.queue_tx.lock().expect("buffer queue lock poisoned").take();
        self.connector.close_intake();
        let tasks = std::mem::take(&mut *self.tasks.lock().expect("buffer task list poisoned"));
        for task in tasks {
            let _ = task.await;
        }
        Ok(())
    }

    async fn receive(&self, mut msg: Message) -> Result<(), StageError> {
        let parent = msg.swap_ack(AckSlot::detached());
        let Some(tx) = checkout(&self.queue_tx) else {
            parent.complete(Status::Failed);
            return Err(StageError::Closed(self.name.clone()));
        };

        let item = Attempt {
            msg,
            attempt: 1,
            parent,
        };
        if let Err(flume::SendError(item)) = tx.send_async(item).await {
            item.parent.complete(Status::Failed);
            return Err(StageError::Closed(self.name.clone()));
        }
        Ok(())
    }
}
