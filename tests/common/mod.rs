#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::task::JoinHandle;

use flowline::{
    ConfigError, Connector, Message, Params, Registry, Stage, StageError, StageKind, Status,
};

/// How a [`CaptureSink`] acknowledges the messages it records.
#[derive(Clone)]
pub enum AckMode {
    /// Ack everything `Done`.
    Done,
    /// Ack everything `Failed`.
    Failed,
    /// Fail the first `n` receives, then ack `Done`.
    FailFirst(u32),
    /// Sleep before acking `Done` (from a spawned task, like a slow sink
    /// worker would).
    DelayDone(Duration),
    /// Never ack; park the message for the test to complete by hand.
    Hold,
}

/// Test sink that records every payload it receives and acks according to
/// its [`AckMode`].
pub struct CaptureSink {
    name: String,
    connector: Connector,
    mode: AckMode,
    fail_remaining: AtomicU32,
    received: Arc<Mutex<Vec<Bytes>>>,
    held: Arc<Mutex<Vec<Message>>>,
}

impl CaptureSink {
    pub fn new(name: &str, mode: AckMode) -> Arc<CaptureSink> {
        let fail_remaining = match &mode {
            AckMode::FailFirst(n) => *n,
            _ => 0,
        };
        Arc::new(CaptureSink {
            name: name.to_string(),
            connector: Connector::new(name, 16),
            mode,
            fail_remaining: AtomicU32::new(fail_remaining),
            received: Arc::new(Mutex::new(Vec::new())),
            held: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Payloads in the order this sink received them.
    pub fn received(&self) -> Vec<Bytes> {
        self.received.lock().unwrap().clone()
    }

    pub fn received_count(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    /// Take the messages parked by [`AckMode::Hold`].
    pub fn take_held(&self) -> Vec<Message> {
        std::mem::take(&mut *self.held.lock().unwrap())
    }
}

#[async_trait]
impl Stage for CaptureSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Sink
    }

    fn connector(&self) -> &Connector {
        &self.connector
    }

    async fn start(&self) -> Result<(), StageError> {
        self.connector.mark_started();
        Ok(())
    }

    async fn stop(&self) -> Result<(), StageError> {
        self.connector.mark_stopped();
        Ok(())
    }

    async fn receive(&self, msg: Message) -> Result<(), StageError> {
        if self.connector.is_stopped() {
            msg.complete(Status::Failed);
            return Err(StageError::Closed(self.name.clone()));
        }
        self.received.lock().unwrap().push(msg.payload().clone());
        match &self.mode {
            AckMode::Done => {
                msg.complete(Status::Done);
            }
            AckMode::Failed => {
                msg.complete(Status::Failed);
            }
            AckMode::FailFirst(_) => {
                let failing = self
                    .fail_remaining
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                    .is_ok();
                msg.complete(if failing { Status::Failed } else { Status::Done });
            }
            AckMode::DelayDone(delay) => {
                let delay = *delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    msg.complete(Status::Done);
                });
            }
            AckMode::Hold => {
                self.held.lock().unwrap().push(msg);
            }
        }
        Ok(())
    }

    fn connect(&self, _nthreads: usize, _peer: Arc<dyn Stage>) -> Result<(), StageError> {
        Err(StageError::Unroutable(self.name.clone()))
    }
}

/// Test receiver: whatever is pushed into it is forwarded, in order, to its
/// first downstream.
pub struct Injector {
    name: String,
    connector: Connector,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Injector {
    pub fn new(name: &str) -> Arc<Injector> {
        Arc::new(Injector {
            name: name.to_string(),
            connector: Connector::new(name, 16),
            tasks: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Stage for Injector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Receiver
    }

    fn connector(&self) -> &Connector {
        &self.connector
    }

    async fn start(&self) -> Result<(), StageError> {
        if self.connector.mark_started() {
            return Ok(());
        }
        let peer = self.connector.peers().first().map(|p| Arc::clone(&p.stage));
        let rx = self.connector.intake();
        let task = tokio::spawn(async move {
            while let Ok(msg) = rx.recv_async().await {
                match &peer {
                    Some(peer) => {
                        let _ = peer.receive(msg).await;
                    }
                    None => {
                        msg.complete(Status::Failed);
                    }
                }
            }
        });
        self.tasks.lock().unwrap().push(task);
        Ok(())
    }

    async fn stop(&self) -> Result<(), StageError> {
        if self.connector.mark_stopped() {
            return Ok(());
        }
        self.connector.close_intake();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
        for task in tasks {
            let _ = task.await;
        }
        Ok(())
    }
}

/// Register test-only modules on top of the builtin registry:
/// `receiver.inject` and `sink.capture` (ack mode from the `ack` param,
/// default `done`).
pub fn test_registry(sinks: Arc<Mutex<Vec<Arc<CaptureSink>>>>) -> Registry {
    let mut registry = Registry::with_defaults();
    registry.register(
        "receiver.inject",
        Box::new(|name, _params: &Params, _ctx| Ok(Injector::new(name) as Arc<dyn Stage>)),
    );
    registry.register(
        "sink.capture",
        Box::new(move |name, params: &Params, _ctx| {
            let mode = match params.get("ack").and_then(|v| v.as_str()) {
                None | Some("done") => AckMode::Done,
                Some("failed") => AckMode::Failed,
                Some(_) => {
                    return Err(ConfigError::BadParam {
                        component: name.to_string(),
                        key: "ack".to_string(),
                        expected: "\"done\" or \"failed\"",
                    })
                }
            };
            let sink = CaptureSink::new(name, mode);
            sinks.lock().unwrap().push(Arc::clone(&sink));
            Ok(sink as Arc<dyn Stage>)
        }),
    );
    registry
}

/// Find a capture sink by name in the list collected by [`test_registry`].
pub fn sink_by_name(sinks: &Arc<Mutex<Vec<Arc<CaptureSink>>>>, name: &str) -> Arc<CaptureSink> {
    sinks
        .lock()
        .unwrap()
        .iter()
        .find(|s| s.name() == name)
        .cloned()
        .unwrap_or_else(|| panic!("no capture sink named {name:?}"))
}
