use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::{str_param, Params};
use crate::connector::Connector;
use crate::error::{ConfigError, StageError};
use crate::message::Status;
use crate::registry::BuildContext;
use crate::stage::{Stage, StageKind};

const INTAKE_CAPACITY: usize = 1024;

/// Terminal sink that appends each payload plus a newline to its output and
/// acks `Done` on a flushed write, `Failed` otherwise.
///
/// The `out` param is required: `"STDOUT"`, `"STDERR"`, or a file path
/// opened in append mode. A single writer task preserves intake order.
pub struct Dumper {
    name: String,
    out: String,
    connector: Connector,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Dumper {
    pub fn build(
        name: &str,
        params: &Params,
        _ctx: &BuildContext,
    ) -> Result<Arc<dyn Stage>, ConfigError> {
        let out = str_param(params, name, "out")?.ok_or_else(|| ConfigError::MissingParam {
            component: name.to_string(),
            key: "out".to_string(),
        })?;
        Ok(Arc::new(Dumper {
            name: name.to_string(),
            out: out.to_string(),
            connector: Connector::new(name, INTAKE_CAPACITY),
            task: Mutex::new(None),
        }))
    }

    async fn open_writer(&self) -> std::io::Result<Box<dyn AsyncWrite + Send + Unpin>> {
        Ok(match self.out.as_str() {
            "STDOUT" => Box::new(tokio::io::stdout()),
            "STDERR" => Box::new(tokio::io::stderr()),
            path => Box::new(
                tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await?,
            ),
        })
    }
}

#[async_trait]
impl Stage for Dumper {
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
        if self.connector.mark_started() {
            return Ok(());
        }
        let mut writer = self.open_writer().await?;
        info!(stage = %self.name, out = %self.out, "dumper starting");

        let rx = self.connector.intake();
        let name = self.name.clone();
        let task = tokio::spawn(async move {
            while let Ok(msg) = rx.recv_async().await {
                let status = match write_line(&mut writer, msg.payload()).await {
                    Ok(()) => Status::Done,
                    Err(err) => {
                        error!(stage = %name, error = %err, "write failed");
                        Status::Failed
                    }
                };
                msg.complete(status);
            }
        });
        *self.task.lock().expect("dumper task lock poisoned") = Some(task);
        Ok(())
    }

    async fn stop(&self) -> Result<(), StageError> {
        if self.connector.mark_stopped() {
            return Ok(());
        }
        self.connector.close_intake();
        let task = self.task.lock().expect("dumper task lock poisoned").take();
        if let Some(task) = task {
            let _ = task.await;
        }
        Ok(())
    }

    fn connect(&self, _nthreads: usize, _peer: Arc<dyn Stage>) -> Result<(), StageError> {
        Err(StageError::Unroutable(self.name.clone()))
    }
}

async fn write_line(
    writer: &mut Box<dyn AsyncWrite + Send + Unpin>,
    payload: &[u8],
) -> std::io::Result<()> {
    writer.write_all(payload).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
