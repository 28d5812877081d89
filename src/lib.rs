pub mod config;
pub mod connector;
pub mod error;
pub mod hash;
pub mod links;
pub mod message;
pub mod pipeline;
pub mod registry;
pub mod sinks;
pub mod stage;
pub mod topology;

pub use config::{ComponentConfig, Params, PipelineBlock, PipelineConfig, SystemConfig, Value};
pub use connector::{Connector, Peer};
pub use error::{ConfigError, PipelineError, Result, StageError};
pub use links::buffer::Buffer;
pub use links::demux::Demux;
pub use links::encoder::Encoder;
pub use links::replicator::Replicator;
pub use message::{AckSlot, AckWait, Message, Status};
pub use pipeline::Pipeline;
pub use registry::{BuildContext, Constructor, Registry};
pub use sinks::{Dumper, Null};
pub use stage::{Cmd, CmdPropagation, Stage, StageKind};
pub use topology::Topology;
