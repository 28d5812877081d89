use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::connector::Connector;
use crate::error::StageError;
use crate::message::Message;

/// Where a stage sits in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// Entry point: only outputs (in-degree 0).
    Receiver,
    /// Intermediate: both inputs and outputs.
    Link,
    /// Terminal: only inputs (out-degree 0).
    Sink,
}

/// A command dispatched to stages: lifecycle commands are walked over the
/// topology by the driver, opaque commands ripple downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cmd {
    Start,
    Stop,
    /// Opaque user command; the core forwards it without interpretation.
    Custom(String),
}

/// Direction in which a command traverses the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdPropagation {
    /// Sinks first, receivers last. Used for `Start` so every downstream is
    /// ready before an upstream emits.
    BottomUp,
    /// Receivers first, sinks last. Used for `Stop` so no new messages enter
    /// while downstreams drain.
    TopDown,
}

/// The uniform contract implemented by every receiver, link, and sink.
///
/// Lifecycle ordering is owned by the topology driver, which may replay a
/// walk; `start` and `stop` must therefore be idempotent. Opaque commands
/// instead ripple downstream through each stage's connector.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Unique name within the pipeline.
    fn name(&self) -> &str;

    fn kind(&self) -> StageKind;

    /// The stage's shared intake/peer plumbing.
    fn connector(&self) -> &Connector;

    /// Spawn the stage's worker tasks and return immediately. Idempotent.
    async fn start(&self) -> Result<(), StageError>;

    /// Close the intake, wait for workers to drain, then return. After
    /// `stop`, `receive` fails cleanly with [`StageError::Closed`].
    async fn stop(&self) -> Result<(), StageError>;

    /// Transfer ownership of a message into the stage. May block briefly on
    /// the bounded intake queue (backpressure). On rejection the message has
    /// already been terminated with `Status::Failed` and an error is
    /// returned to the caller.
    async fn receive(&self, msg: Message) -> Result<(), StageError> {
        self.connector().push(msg).await
    }

    /// Register a downstream peer, with a hint for how many handoff workers
    /// to dedicate to it. Called once per downstream, before `start`. Sinks
    /// refuse with [`StageError::Unroutable`].
    fn connect(&self, nthreads: usize, peer: Arc<dyn Stage>) -> Result<(), StageError> {
        self.connector().add_peer(nthreads, peer);
        Ok(())
    }

    /// Dispatch a command. Lifecycle commands act locally only: the driver
    /// visits every stage in propagation order, and a `Stop` forwarded
    /// through connectors could reach a shared sink while a sibling branch
    /// is still draining into it. Opaque commands are forwarded to every
    /// registered downstream.
    async fn exec_cmd(&self, cmd: &Cmd) -> Result<(), StageError> {
        match cmd {
            Cmd::Start => self.start().await,
            Cmd::Stop => self.stop().await,
            Cmd::Custom(_) => self.connector().propagate(cmd).await,
        }
    }
}

impl fmt::Debug for dyn Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}
