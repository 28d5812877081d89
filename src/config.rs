use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A configuration value: the tagged union accepted in component params and
/// message metadata.
///
/// Deserialization is untagged, so JSON configs read naturally
/// (`"capacity": 1024`, `"out": "STDOUT"`). `Bytes` is never produced from
/// JSON (arrays parse as `List`); it is set programmatically, e.g. by
/// receivers attaching binary metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Byte-typed values only; strings and lists do not coerce.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// Component parameters: unique keys, opaque values.
pub type Params = HashMap<String, Value>;

/// Fetch an integer param, failing with `BadParam` on a type mismatch.
pub fn int_param(params: &Params, component: &str, key: &str) -> Result<Option<i64>, ConfigError> {
    match params.get(key) {
        None => Ok(None),
        Some(v) => v.as_int().map(Some).ok_or_else(|| ConfigError::BadParam {
            component: component.to_string(),
            key: key.to_string(),
            expected: "an integer",
        }),
    }
}

/// Fetch a string param, failing with `BadParam` on a type mismatch.
pub fn str_param<'p>(
    params: &'p Params,
    component: &str,
    key: &str,
) -> Result<Option<&'p str>, ConfigError> {
    match params.get(key) {
        None => Ok(None),
        Some(v) => v.as_str().map(Some).ok_or_else(|| ConfigError::BadParam {
            component: component.to_string(),
            key: key.to_string(),
            expected: "a string",
        }),
    }
}

/// Fetch an unsigned integer param, rejecting negatives.
pub fn uint_param(
    params: &Params,
    component: &str,
    key: &str,
) -> Result<Option<u64>, ConfigError> {
    match int_param(params, component, key)? {
        None => Ok(None),
        Some(i) if i >= 0 => Ok(Some(i as u64)),
        Some(_) => Err(ConfigError::BadParam {
            component: component.to_string(),
            key: key.to_string(),
            expected: "a non-negative integer",
        }),
    }
}

/// Declarative description of one component: which module builds it and with
/// which params. `plugin`/`constructor` are reserved for registry extension
/// points that load constructors from elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub module: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub plugin: Option<String>,
    #[serde(default)]
    pub constructor: Option<String>,
}

/// Wiring for one component: the names of its downstream peers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineBlock {
    #[serde(default)]
    pub connect: Vec<String>,
}

/// System-wide settings applied at build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Worker parallelism for stages that fan work out over a pool
    /// (buffer redelivery, outbound forwarding). Defaults to the number of
    /// hardware threads.
    #[serde(default = "default_maxprocs")]
    pub maxprocs: usize,
}

fn default_maxprocs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Default for SystemConfig {
    fn default() -> Self {
        SystemConfig {
            maxprocs: default_maxprocs(),
        }
    }
}

/// The full declarative pipeline description: existence (`components`),
/// wiring (`pipeline`), and system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub components: HashMap<String, ComponentConfig>,
    pub pipeline: HashMap<String, PipelineBlock>,
    #[serde(default)]
    pub system: SystemConfig,
}

impl PipelineConfig {
    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
