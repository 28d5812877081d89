/// Errors from configuration parsing and build-time validation.
///
/// Every variant is structural: it prevents the pipeline from starting and
/// is never produced for an individual message.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown module {module:?} requested by component {component:?}")]
    UnknownModule { component: String, module: String },
    #[error("duplicate declaration of component {0:?}")]
    DuplicateComponent(String),
    #[error("component {component:?} mentioned in the pipeline section but never defined in the components section")]
    UndefinedComponent { component: String },
    #[error("component {component:?} declares a connection to undefined component {target:?}")]
    UnknownTarget { component: String, target: String },
    #[error("cannot connect {from:?} to {to:?}: {reason}")]
    BadConnect {
        from: String,
        to: String,
        reason: String,
    },
    #[error("edge references unknown node {0:?}")]
    UnknownNode(String),
    #[error("cycle detected in pipeline topology involving: {}", .0.join(", "))]
    Cycle(Vec<String>),
    #[error("component {component:?}: param {key:?} must be {expected}")]
    BadParam {
        component: String,
        key: String,
        expected: &'static str,
    },
    #[error("component {component:?} is missing required param {key:?}")]
    MissingParam { component: String, key: String },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced by a running stage.
///
/// These are per-call failures: the caller terminates the affected message
/// (usually with `Status::Failed`) and the pipeline keeps running.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("stage {0:?} is stopped and no longer accepts messages")]
    Closed(String),
    #[error("sink {0:?} does not accept downstream connections")]
    Unroutable(String),
    #[error("stage {0:?} requires a downstream connection before start")]
    DownstreamRequired(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level pipeline error.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("stage error: {0}")]
    Stage(#[from] StageError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, PipelineError>;
