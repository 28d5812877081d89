use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::StageError;
use crate::message::{Message, Status};
use crate::stage::{Cmd, Stage};

/// A registered downstream peer plus the handoff-worker hint supplied at
/// [`Stage::connect`] time.
#[derive(Clone)]
pub struct Peer {
    pub nthreads: usize,
    pub stage: Arc<dyn Stage>,
}

/// Shared plumbing embedded in every stage: the bounded intake channel its
/// workers drain, the list of downstream peers, and command dispatch.
///
/// The intake is a bounded MPMC channel; cloning [`intake`](Connector::intake)
/// hands each worker task its own receiver handle. The peer list is fixed
/// once the pipeline starts, so hot paths take a snapshot instead of holding
/// the lock.
pub struct Connector {
    name: String,
    tx: Mutex<Option<flume::Sender<Message>>>,
    rx: flume::Receiver<Message>,
    peers: Mutex<Vec<Peer>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl Connector {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let (tx, rx) = flume::bounded(capacity);
        Connector {
            name: name.into(),
            tx: Mutex::new(Some(tx)),
            rx,
            peers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a message onto the intake, blocking while the queue is full.
    ///
    /// Once the intake is closed the message is terminated with
    /// `Status::Failed` (this side owns it now) and `StageError::Closed` is
    /// returned.
    pub async fn push(&self, msg: Message) -> Result<(), StageError> {
        let tx = self.tx.lock().expect("connector lock poisoned").clone();
        match tx {
            Some(tx) => match tx.send_async(msg).await {
                Ok(()) => Ok(()),
                Err(flume::SendError(msg)) => {
                    msg.complete(Status::Failed);
                    Err(StageError::Closed(self.name.clone()))
                }
            },
            None => {
                msg.complete(Status::Failed);
                Err(StageError::Closed(self.name.clone()))
            }
        }
    }

    /// A receiver handle onto the intake; one clone per worker task.
    pub fn intake(&self) -> flume::Receiver<Message> {
        self.rx.clone()
    }

    /// Drop the send side. Workers drain whatever is queued, then their
    /// `recv` fails and they exit.
    pub fn close_intake(&self) {
        self.tx.lock().expect("connector lock poisoned").take();
    }

    pub fn add_peer(&self, nthreads: usize, stage: Arc<dyn Stage>) {
        self.peers
            .lock()
            .expect("connector lock poisoned")
            .push(Peer { nthreads, stage });
    }

    /// Snapshot of the downstream peers.
    pub fn peers(&self) -> Vec<Peer> {
        self.peers.lock().expect("connector lock poisoned").clone()
    }

    /// Mark the stage started; returns `true` if it already was.
    pub fn mark_started(&self) -> bool {
        self.started.swap(true, Ordering::AcqRel)
    }

    /// Mark the stage stopped; returns `true` if it already was.
    pub fn mark_stopped(&self) -> bool {
        self.stopped.swap(true, Ordering::AcqRel)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Forward a command to every registered downstream, aborting on the
    /// first error.
    pub async fn propagate(&self, cmd: &Cmd) -> Result<(), StageError> {
        for peer in self.peers() {
            peer.stage.exec_cmd(cmd).await?;
        }
        Ok(())
    }
}
