use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Params;
use crate::connector::Connector;
use crate::error::{ConfigError, StageError};
use crate::message::{Message, Status};
use crate::registry::BuildContext;
use crate::stage::{Stage, StageKind};

/// Sink that accepts every message and immediately acks it `Done`.
pub struct Null {
    name: String,
    connector: Connector,
}

impl Null {
    pub fn build(
        name: &str,
        _params: &Params,
        _ctx: &BuildContext,
    ) -> Result<Arc<dyn Stage>, ConfigError> {
        Ok(Arc::new(Null {
            name: name.to_string(),
            connector: Connector::new(name, 1),
        }))
    }
}

#[async_trait]
impl Stage for Null {
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
        msg.complete(Status::Done);
        Ok(())
    }

    fn connect(&self, _nthreads: usize, _peer: Arc<dyn Stage>) -> Result<(), StageError> {
        Err(StageError::Unroutable(self.name.clone()))
    }
}
