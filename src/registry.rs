use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{Params, SystemConfig};
use crate::error::ConfigError;
use crate::links::buffer::Buffer;
use crate::links::demux::Demux;
use crate::links::encoder::Encoder;
use crate::links::replicator::Replicator;
use crate::sinks::{Dumper, Null};
use crate::stage::Stage;

/// Build-time environment handed to every constructor.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    pub system: SystemConfig,
}

/// A component constructor: `(name, params, context) -> stage`.
pub type Constructor =
    Box<dyn Fn(&str, &Params, &BuildContext) -> Result<Arc<dyn Stage>, ConfigError> + Send + Sync>;

/// Maps module names (`link.buffer`, `sink.dumper`, ...) to constructors.
///
/// Extension points (plugins, application-defined receivers and sinks)
/// register additional constructors before the pipeline is built; the core
/// only ever consults the map.
pub struct Registry {
    builders: HashMap<String, Constructor>,
}

impl Registry {
    /// An empty registry with no modules.
    pub fn empty() -> Self {
        Registry {
            builders: HashMap::new(),
        }
    }

    /// A registry preloaded with the built-in links and sinks.
    pub fn with_defaults() -> Self {
        let mut reg = Registry::empty();
        reg.register("link.demux", Box::new(Demux::build));
        reg.register("link.replicator", Box::new(Replicator::build));
        reg.register("link.buffer", Box::new(Buffer::build));
        reg.register("link.encoder", Box::new(Encoder::build));
        reg.register("sink.dumper", Box::new(Dumper::build));
        reg.register("sink.null", Box::new(Null::build));
        reg
    }

    pub fn register(&mut self, module: &str, constructor: Constructor) {
        self.builders.insert(module.to_string(), constructor);
    }

    /// Instantiate component `name` from `module`.
    pub fn build(
        &self,
        module: &str,
        name: &str,
        params: &Params,
        ctx: &BuildContext,
    ) -> Result<Arc<dyn Stage>, ConfigError> {
        let builder = self
            .builders
            .get(module)
            .ok_or_else(|| ConfigError::UnknownModule {
                component: name.to_string(),
                module: module.to_string(),
            })?;
        builder(name, params, ctx)
    }

    pub fn contains(&self, module: &str) -> bool {
        self.builders.contains_key(module)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_builtin_modules() {
        let reg = Registry::with_defaults();
        for module in [
            "link.demux",
            "link.replicator",
            "link.buffer",
            "link.encoder",
            "sink.dumper",
            "sink.null",
        ] {
            assert!(reg.contains(module), "missing builtin {module}");
        }
    }

    #[test]
    fn unknown_module_is_rejected() {
        let reg = Registry::with_defaults();
        let err = reg
            .build("link.nope", "x", &Params::new(), &BuildContext::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownModule { .. }));
    }
}
