use std::collections::{BTreeSet, HashMap};

use crate::error::ConfigError;

/// The pipeline graph: stage names as nodes, "forwards messages to" as
/// directed edges. Immutable once the pipeline is built.
#[derive(Debug, Default)]
pub struct Topology {
    names: Vec<String>,
    index: HashMap<String, usize>,
    edges: Vec<Vec<usize>>,
}

impl Topology {
    pub fn new() -> Self {
        Topology::default()
    }

    /// Add a node. Duplicate names are a configuration error.
    pub fn add_node(&mut self, name: &str) -> Result<(), ConfigError> {
        if self.index.contains_key(name) {
            return Err(ConfigError::DuplicateComponent(name.to_string()));
        }
        self.index.insert(name.to_string(), self.names.len());
        self.names.push(name.to_string());
        self.edges.push(Vec::new());
        Ok(())
    }

    /// Add a `from -> to` edge. Both endpoints must already be nodes.
    pub fn connect(&mut self, from: &str, to: &str) -> Result<(), ConfigError> {
        let f = *self
            .index
            .get(from)
            .ok_or_else(|| ConfigError::UnknownNode(from.to_string()))?;
        let t = *self
            .index
            .get(to)
            .ok_or_else(|| ConfigError::UnknownNode(to.to_string()))?;
        self.edges[f].push(t);
        Ok(())
    }

    pub fn nodes(&self) -> &[String] {
        &self.names
    }

    /// All edges as `(from, to)` name pairs, sorted for deterministic output.
    pub fn edge_list(&self) -> Vec<(&str, &str)> {
        let mut out: Vec<(&str, &str)> = Vec::new();
        for (f, tos) in self.edges.iter().enumerate() {
            for &t in tos {
                out.push((self.names[f].as_str(), self.names[t].as_str()));
            }
        }
        out.sort_unstable();
        out
    }

    /// Deterministic topological order, upstream before downstream
    /// (receivers first, sinks last). Ties break on node name.
    ///
    /// Fails with [`ConfigError::Cycle`] naming the nodes left on the cycle.
    pub fn sort(&self) -> Result<Vec<String>, ConfigError> {
        let n = self.names.len();
        let mut indegree = vec![0usize; n];
        for targets in &self.edges {
            for &t in targets {
                indegree[t] += 1;
            }
        }

        let mut ready: BTreeSet<&str> = (0..n)
            .filter(|&i| indegree[i] == 0)
            .map(|i| self.names[i].as_str())
            .collect();

        let mut order = Vec::with_capacity(n);
        while let Some(name) = ready.pop_first() {
            let i = self.index[name];
            order.push(name.to_string());
            for &t in &self.edges[i] {
                indegree[t] -= 1;
                if indegree[t] == 0 {
                    ready.insert(self.names[t].as_str());
                }
            }
        }

        if order.len() < n {
            let mut stuck: Vec<String> = (0..n)
                .filter(|&i| indegree[i] > 0)
                .map(|i| self.names[i].clone())
                .collect();
            stuck.sort_unstable();
            return Err(ConfigError::Cycle(stuck));
        }
        Ok(order)
    }
}
