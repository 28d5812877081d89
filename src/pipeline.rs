use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;

use tracing::info;

use crate::config::PipelineConfig;
use crate::error::{ConfigError, PipelineError};
use crate::registry::{BuildContext, Registry};
use crate::stage::{Cmd, CmdPropagation, Stage, StageKind};
use crate::topology::Topology;

/// A built pipeline: the instantiated stages, the validated topology over
/// them, and the system settings the build applied.
///
/// Built once from declarative config, started bottom-up, stopped top-down;
/// the topology never changes after construction.
pub struct Pipeline {
    config: PipelineConfig,
    stages: HashMap<String, Arc<dyn Stage>>,
    topology: Topology,
}

impl Pipeline {
    /// Build a pipeline from config against a constructor registry.
    ///
    /// Existence and wiring are validated separately: every component must
    /// name a known module, every `connect` must name a built component, a
    /// receiver must keep in-degree 0, a sink out-degree 0, and the
    /// resulting graph must be acyclic. Any violation fails the build;
    /// nothing is started.
    pub fn build(cfg: &PipelineConfig, registry: &Registry) -> Result<Pipeline, PipelineError> {
        let ctx = BuildContext {
            system: cfg.system.clone(),
        };

        // Components section: existence.
        let mut stages: HashMap<String, Arc<dyn Stage>> = HashMap::new();
        let components: BTreeMap<_, _> = cfg.components.iter().collect();
        for (name, comp) in components {
            let stage = registry.build(&comp.module, name, &comp.params, &ctx)?;
            stages.insert(name.clone(), stage);
        }

        // Pipeline section: wiring.
        let wiring: BTreeMap<_, _> = cfg.pipeline.iter().collect();
        for (name, block) in &wiring {
            let source =
                stages
                    .get(name.as_str())
                    .ok_or_else(|| ConfigError::UndefinedComponent {
                        component: (*name).clone(),
                    })?;
            for target in &block.connect {
                let peer = stages
                    .get(target)
                    .ok_or_else(|| ConfigError::UnknownTarget {
                        component: (*name).clone(),
                        target: target.clone(),
                    })?;
                if peer.kind() == StageKind::Receiver {
                    return Err(ConfigError::BadConnect {
                        from: (*name).clone(),
                        to: target.clone(),
                        reason: "receivers do not accept inbound connections".to_string(),
                    }
                    .into());
                }
                info!(from = %name, to = %target, "connecting");
                source
                    .connect(cfg.system.maxprocs, Arc::clone(peer))
                    .map_err(|err| ConfigError::BadConnect {
                        from: (*name).clone(),
                        to: target.clone(),
                        reason: err.to_string(),
                    })?;
            }
        }

        // Topology: reject cycles before anything runs.
        let mut topology = Topology::new();
        let mut names: Vec<&String> = stages.keys().collect();
        names.sort_unstable();
        for name in names {
            topology.add_node(name)?;
        }
        for (name, block) in &wiring {
            for target in &block.connect {
                topology.connect(name, target)?;
            }
        }
        topology.sort()?;

        Ok(Pipeline {
            config: cfg.clone(),
            stages,
            topology,
        })
    }

    /// Walk the topology and apply `cmd` to every stage.
    pub async fn exec_cmd(
        &self,
        cmd: &Cmd,
        propagation: CmdPropagation,
    ) -> Result<(), PipelineError> {
        let mut order = self.topology.sort()?;
        if propagation == CmdPropagation::BottomUp {
            order.reverse();
        }
        for name in order {
            self.stages[&name].exec_cmd(cmd).await?;
        }
        Ok(())
    }

    /// Start every stage, sinks first, so downstreams are ready before any
    /// upstream emits.
    pub async fn start(&self) -> Result<(), PipelineError> {
        info!(stages = self.stages.len(), "pipeline starting");
        self.exec_cmd(&Cmd::Start, CmdPropagation::BottomUp).await
    }

    /// Stop every stage, receivers first, so downstreams drain what is
    /// already in flight.
    pub async fn stop(&self) -> Result<(), PipelineError> {
        info!("pipeline stopping");
        self.exec_cmd(&Cmd::Stop, CmdPropagation::TopDown).await
    }

    /// Serialize the topology as a DOT digraph: every stage, then every
    /// `from -> to` edge, in deterministic order.
    pub fn explain(&self) -> String {
        let mut out = String::from("digraph pipeline {\n");
        let mut names: Vec<&String> = self.topology.nodes().iter().collect();
        names.sort_unstable();
        for name in names {
            let _ = writeln!(out, "  {name:?};");
        }
        for (from, to) in self.topology.edge_list() {
            let _ = writeln!(out, "  {from:?} -> {to:?};");
        }
        out.push_str("}\n");
        out
    }

    /// Look up a built stage by name.
    pub fn stage(&self, name: &str) -> Option<Arc<dyn Stage>> {
        self.stages.get(name).cloned()
    }

    /// The declarative config this pipeline was built from.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }
}
