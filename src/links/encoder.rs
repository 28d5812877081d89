use std::io::Write;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
use flate2::Compression;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::{int_param, str_param, Params};
use crate::connector::Connector;
use crate::error::{ConfigError, StageError};
use crate::message::Status;
use crate::registry::BuildContext;
use crate::stage::{Stage, StageKind};

const INTAKE_CAPACITY: usize = 1024;

type CoderFn = Arc<dyn Fn(&[u8]) -> std::io::Result<Vec<u8>> + Send + Sync>;

/// Codec link: replaces each message's payload with its encoded form and
/// forwards it to the single downstream.
///
/// Params: `codec` (required: `gzip`, `zlib`, `deflate`, or `zstd`) and an
/// optional integer `level`. An unknown codec fails the build; a per-message
/// encode error acks that message `Failed` and the stage keeps running.
pub struct Encoder {
    name: String,
    connector: Connector,
    coder: CoderFn,
    nworkers: usize,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Encoder {
    pub fn build(
        name: &str,
        params: &Params,
        ctx: &BuildContext,
    ) -> Result<Arc<dyn Stage>, ConfigError> {
        let codec = str_param(params, name, "codec")?.ok_or_else(|| ConfigError::MissingParam {
            component: name.to_string(),
            key: "codec".to_string(),
        })?;
        let level = int_param(params, name, "level")?;
        let coder = make_coder(codec, level).ok_or_else(|| ConfigError::BadParam {
            component: name.to_string(),
            key: "codec".to_string(),
            expected: "one of gzip, zlib, deflate, zstd",
        })?;
        Ok(Arc::new(Encoder {
            name: name.to_string(),
            connector: Connector::new(name, INTAKE_CAPACITY),
            coder,
            nworkers: ctx.system.maxprocs,
            tasks: Mutex::new(Vec::new()),
        }))
    }
}

fn flate_level(level: Option<i64>) -> Compression {
    match level {
        Some(l) if (0..=9).contains(&l) => Compression::new(l as u32),
        _ => Compression::default(),
    }
}

fn make_coder(codec: &str, level: Option<i64>) -> Option<CoderFn> {
    match codec {
        "gzip" => {
            let lvl = flate_level(level);
            Some(Arc::new(move |data| {
                let mut enc = GzEncoder::new(Vec::new(), lvl);
                enc.write_all(data)?;
                enc.finish()
            }))
        }
        "zlib" => {
            let lvl = flate_level(level);
            Some(Arc::new(move |data| {
                let mut enc = ZlibEncoder::new(Vec::new(), lvl);
                enc.write_all(data)?;
                enc.finish()
            }))
        }
        "deflate" => {
            let lvl = flate_level(level);
            Some(Arc::new(move |data| {
                let mut enc = DeflateEncoder::new(Vec::new(), lvl);
                enc.write_all(data)?;
                enc.finish()
            }))
        }
        "zstd" => {
            // Level 0 maps to the zstd library default.
            let lvl = level.unwrap_or(0) as i32;
            Some(Arc::new(move |data| zstd::stream::encode_all(data, lvl)))
        }
        _ => None,
    }
}

#[async_trait]
impl Stage for Encoder {
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
        debug!(stage = %self.name, "encoder starting");

        let mut tasks = self.tasks.lock().expect("encoder task list poisoned");
        for _ in 0..self.nworkers {
            let rx = self.connector.intake();
            let peer = Arc::clone(&peer);
            let coder = Arc::clone(&self.coder);
            let name = self.name.clone();
            tasks.push(tokio::spawn(async move {
                while let Ok(mut msg) = rx.recv_async().await {
                    match coder(msg.payload()) {
                        Ok(encoded) => {
                            msg.set_payload(encoded);
                            // On rejection the downstream has already
                            // terminated the message with Failed.
                            let _ = peer.receive(msg).await;
                        }
                        Err(err) => {
                            warn!(stage = %name, error = %err, "encode failed");
                            msg.complete(Status::Failed);
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
        self.connector.close_intake();
        let tasks = std::mem::take(&mut *self.tasks.lock().expect("encoder task list poisoned"));
        for task in tasks {
            let _ = task.await;
        }
        Ok(())
    }
}
