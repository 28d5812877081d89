use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::config::Value;

/// Terminal (or partial) outcome of a message's trip through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Every delivery succeeded.
    Done,
    /// Some fan-out branches succeeded, some did not.
    PartialSend,
    /// No delivery succeeded.
    Failed,
    /// The deadline expired before all completions arrived.
    TimedOut,
    /// Dropped by a rate-limiting stage.
    Throttled,
    /// The message could not be processed as configured.
    Invalid,
    /// No route exists for the message.
    Unroutable,
}

impl Status {
    /// `Done` and `PartialSend` are successful outcomes for retry logic;
    /// everything else is eligible for redelivery.
    pub fn is_success(self) -> bool {
        matches!(self, Status::Done | Status::PartialSend)
    }
}

struct AckShared {
    claimed: AtomicBool,
    tx: Mutex<Option<oneshot::Sender<Status>>>,
}

/// Write side of a message's one-shot completion signal.
///
/// The slot is claimed with a compare-and-swap, so exactly one
/// [`complete`](AckSlot::complete) call ever delivers a status; later calls
/// are dropped.
#[derive(Clone)]
pub struct AckSlot {
    shared: Arc<AckShared>,
}

/// Read side of a completion signal, held by the message originator or its
/// designee. Consumed by [`wait`](AckWait::wait).
pub struct AckWait {
    rx: oneshot::Receiver<Status>,
}

impl AckSlot {
    /// Create a connected slot/wait pair.
    pub fn pair() -> (AckSlot, AckWait) {
        let (tx, rx) = oneshot::channel();
        let slot = AckSlot {
            shared: Arc::new(AckShared {
                claimed: AtomicBool::new(false),
                tx: Mutex::new(Some(tx)),
            }),
        };
        (slot, AckWait { rx })
    }

    /// Create a slot with no waiter. Completions are absorbed silently.
    pub fn detached() -> AckSlot {
        let (slot, _) = AckSlot::pair();
        slot
    }

    /// Write `status` into the slot. Returns `true` if this call claimed the
    /// slot, `false` if it was already completed.
    pub fn complete(&self, status: Status) -> bool {
        if self.shared.claimed.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(tx) = self.shared.tx.lock().expect("ack slot lock poisoned").take() {
            // The waiter may be gone (async message, or a fan-out parent that
            // already timed out); the late status is dropped on the floor.
            let _ = tx.send(status);
        }
        true
    }

    /// Whether the slot has been written.
    pub fn is_completed(&self) -> bool {
        self.shared.claimed.load(Ordering::Acquire)
    }
}

impl AckWait {
    /// Wait for the completion status.
    ///
    /// If every write handle is dropped without a completion (a worker was
    /// cancelled mid-flight), the message is considered `Failed`.
    pub async fn wait(self) -> Status {
        self.rx.await.unwrap_or(Status::Failed)
    }
}

/// The envelope that travels through the pipeline: an opaque payload, string
/// keyed metadata, a sync flag, and a one-shot completion signal.
///
/// Each message is exclusively owned by the stage currently processing it;
/// handing it to a downstream [`Stage::receive`](crate::Stage::receive)
/// transfers ownership. Fan-out links aggregate over the [`AckWait`] handles
/// returned by [`copy`](Message::copy) while holding the parent's slot.
pub struct Message {
    payload: Bytes,
    meta: HashMap<String, Value>,
    sync: bool,
    ack: AckSlot,
}

impl Message {
    /// Create a synchronous message: the returned [`AckWait`] resolves once
    /// the pipeline terminates the message.
    pub fn new_sync(payload: impl Into<Bytes>) -> (Message, AckWait) {
        let (ack, wait) = AckSlot::pair();
        (
            Message {
                payload: payload.into(),
                meta: HashMap::new(),
                sync: true,
                ack,
            },
            wait,
        )
    }

    /// Create an asynchronous (fire-and-forget) message.
    pub fn new_async(payload: impl Into<Bytes>) -> Message {
        Message {
            payload: payload.into(),
            meta: HashMap::new(),
            sync: false,
            ack: AckSlot::detached(),
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Replace the payload wholesale. Reserved for codec-like stages.
    pub fn set_payload(&mut self, payload: impl Into<Bytes>) {
        self.payload = payload.into();
    }

    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.meta.get(key)
    }

    pub fn set_meta(&mut self, key: impl Into<String>, value: Value) {
        self.meta.insert(key.into(), value);
    }

    /// Whether the originator awaits the completion signal.
    pub fn is_sync(&self) -> bool {
        self.sync
    }

    /// Produce a sibling envelope with an independent completion signal.
    /// Payload, metadata, and the sync flag carry over; the payload clone is
    /// a cheap reference-count bump.
    pub fn copy(&self) -> (Message, AckWait) {
        let (ack, wait) = AckSlot::pair();
        (
            Message {
                payload: self.payload.clone(),
                meta: self.meta.clone(),
                sync: self.sync,
                ack,
            },
            wait,
        )
    }

    /// Terminate the message. Returns `false` if it was already terminated.
    pub fn complete(&self, status: Status) -> bool {
        self.ack.complete(status)
    }

    /// Swap a different completion slot onto the message, returning the one
    /// it carried. Used by the buffer link to park the originator's slot
    /// across redelivery attempts.
    pub fn swap_ack(&mut self, slot: AckSlot) -> AckSlot {
        std::mem::replace(&mut self.ack, slot)
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("payload_len", &self.payload.len())
            .field("meta_keys", &self.meta.len())
            .field("sync", &self.sync)
            .finish()
    }
}
