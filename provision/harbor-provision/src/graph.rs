//! Resource graph store
//!
//! Holds declared infrastructure resources and their dependency edges.
//! The graph is kept acyclic at all times: a declaration that would close
//! a cycle is rejected and leaves the graph untouched.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::error::GraphError;

/// Kinds of infrastructure resource the pipeline knows how to converge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Network,
    Registry,
    Database,
    ComputeService,
    Secret,
}

impl ResourceKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Registry => "registry",
            Self::Database => "database",
            Self::ComputeService => "compute-service",
            Self::Secret => "secret",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle state of a resource inside the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceState {
    Declared,
    Applying,
    Applied,
    Failed,
    Destroyed,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Declared => "declared",
            Self::Applying => "applying",
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// Optional external commands run when a resource is applied or destroyed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHooks {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub apply: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destroy: Vec<String>,
}

/// A named infrastructure unit
#[derive(Debug, Clone)]
pub struct Resource {
    pub name: String,
    pub kind: ResourceKind,
    pub depends_on: Vec<String>,
    /// Free-form attributes handed to the driver
    pub config: BTreeMap<String, serde_json::Value>,
    /// Environment variable name -> secret name, injected as references
    pub secrets: BTreeMap<String, String>,
    /// Registry name of a `secret` resource, defaults to the resource name
    pub secret_name: Option<String>,
    /// Environment variable holding the initial value of a `secret` resource
    pub value_env: Option<String>,
    pub hooks: ResourceHooks,
    state: ResourceState,
}

impl Resource {
    pub fn new(name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            depends_on: Vec::new(),
            config: BTreeMap::new(),
            secrets: BTreeMap::new(),
            secret_name: None,
            value_env: None,
            hooks: ResourceHooks::default(),
            state: ResourceState::Declared,
        }
    }

    /// Builder: add a dependency
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    /// Builder: set a config attribute
    pub fn with_config(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Builder: inject a secret reference under an environment variable name
    pub fn with_secret(mut self, env: impl Into<String>, secret: impl Into<String>) -> Self {
        self.secrets.insert(env.into(), secret.into());
        self
    }

    /// Builder: store the secret under a hierarchical registry name
    pub fn with_secret_name(mut self, name: impl Into<String>) -> Self {
        self.secret_name = Some(name.into());
        self
    }

    /// Builder: read the initial secret value from this environment variable
    pub fn with_value_env(mut self, env: impl Into<String>) -> Self {
        self.value_env = Some(env.into());
        self
    }

    /// Builder: set hooks
    pub fn with_hooks(mut self, hooks: ResourceHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    /// Name under which a `secret` resource lives in the secret registry
    pub fn registry_name(&self) -> &str {
        self.secret_name.as_deref().unwrap_or(&self.name)
    }
}

/// Declared resources in declaration order plus a name index
#[derive(Debug, Default, Clone)]
pub struct ResourceGraph {
    resources: Vec<Resource>,
    index: HashMap<String, usize>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Resources in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    /// Register a resource and its dependency edges.
    ///
    /// Dependencies may name resources that are declared later. Fails with
    /// `Cycle` if any edge would close a cycle; the graph is unchanged on error.
    pub fn declare(&mut self, resource: Resource) -> Result<(), GraphError> {
        if self.index.contains_key(&resource.name) {
            return Err(GraphError::Duplicate {
                name: resource.name,
            });
        }

        for dependency in &resource.depends_on {
            if let Some(path) = self.cycle_path(&resource.name, dependency) {
                return Err(GraphError::Cycle {
                    resource: resource.name.clone(),
                    dependency: dependency.clone(),
                    path,
                });
            }
        }

        let mut resource = resource;
        resource.state = ResourceState::Declared;
        dedup_preserving_order(&mut resource.depends_on);

        self.index
            .insert(resource.name.clone(), self.resources.len());
        self.resources.push(resource);
        Ok(())
    }

    /// Add a single dependency edge between two declared resources
    pub fn declare_dependency(&mut self, resource: &str, dependency: &str) -> Result<(), GraphError> {
        let idx = self.position(resource)?;
        if self.resources[idx].depends_on.iter().any(|d| d == dependency) {
            return Ok(());
        }
        if let Some(path) = self.cycle_path(resource, dependency) {
            return Err(GraphError::Cycle {
                resource: resource.to_string(),
                dependency: dependency.to_string(),
                path,
            });
        }
        self.resources[idx].depends_on.push(dependency.to_string());
        Ok(())
    }

    /// Current definition and state of a resource
    pub fn get(&self, name: &str) -> Result<&Resource, GraphError> {
        self.position(name).map(|idx| &self.resources[idx])
    }

    /// Topologically sorted resources, dependencies first.
    ///
    /// Among resources whose dependencies are all placed, the one declared
    /// first wins, so the order is deterministic.
    pub fn resolve_order(&self) -> Result<Vec<&Resource>, GraphError> {
        let mut remaining: Vec<usize> = Vec::with_capacity(self.resources.len());
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.resources.len()];

        for (idx, resource) in self.resources.iter().enumerate() {
            let mut count = 0;
            for dependency in &resource.depends_on {
                let dep_idx = self.index.get(dependency).copied().ok_or_else(|| {
                    GraphError::UnknownDependency {
                        resource: resource.name.clone(),
                        dependency: dependency.clone(),
                    }
                })?;
                dependents[dep_idx].push(idx);
                count += 1;
            }
            remaining.push(count);
        }

        let mut ready: BTreeSet<usize> = remaining
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(idx, _)| idx)
            .collect();

        let mut order = Vec::with_capacity(self.resources.len());
        while let Some(idx) = ready.pop_first() {
            order.push(&self.resources[idx]);
            for &dependent in &dependents[idx] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        // declare() keeps the graph acyclic, so every resource is placed
        debug_assert_eq!(order.len(), self.resources.len());
        Ok(order)
    }

    /// Move a resource to a new state, enforcing the lifecycle rules
    pub(crate) fn transition(&mut self, name: &str, to: ResourceState) -> Result<(), GraphError> {
        let idx = self.position(name)?;
        let from = self.resources[idx].state;

        let invalid = |reason: Option<String>| GraphError::InvalidTransition {
            resource: name.to_string(),
            from,
            to,
            reason,
        };

        match (from, to) {
            (ResourceState::Applying, ResourceState::Applied | ResourceState::Failed) => {}
            (ResourceState::Applying, _) => return Err(invalid(None)),
            (_, ResourceState::Applying | ResourceState::Applied) => {
                if let Some(pending) = self.first_unapplied_dependency(idx) {
                    return Err(invalid(Some(format!("dependency {} is not applied", pending))));
                }
            }
            (_, ResourceState::Destroyed | ResourceState::Failed) => {}
            (_, ResourceState::Declared) => return Err(invalid(None)),
        }

        self.resources[idx].state = to;
        Ok(())
    }

    fn position(&self, name: &str) -> Result<usize, GraphError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::NotFound {
                name: name.to_string(),
            })
    }

    fn first_unapplied_dependency(&self, idx: usize) -> Option<&str> {
        self.resources[idx]
            .depends_on
            .iter()
            .find(|dep| {
                self.index
                    .get(dep.as_str())
                    .map(|&d| self.resources[d].state != ResourceState::Applied)
                    .unwrap_or(true)
            })
            .map(|s| s.as_str())
    }

    /// If adding `resource -> dependency` closes a cycle, return it as a path
    /// starting and ending at `resource`.
    fn cycle_path(&self, resource: &str, dependency: &str) -> Option<Vec<String>> {
        if resource == dependency {
            return Some(vec![resource.to_string(), dependency.to_string()]);
        }

        // Depth-first search from the dependency along existing edges
        let mut stack: Vec<(String, Vec<String>)> =
            vec![(dependency.to_string(), vec![resource.to_string(), dependency.to_string()])];
        let mut visited: BTreeSet<String> = BTreeSet::new();

        while let Some((current, path)) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            let Some(&idx) = self.index.get(&current) else {
                continue;
            };
            for next in &self.resources[idx].depends_on {
                let mut next_path = path.clone();
                next_path.push(next.clone());
                if next == resource {
                    return Some(next_path);
                }
                stack.push((next.clone(), next_path));
            }
        }

        None
    }
}

fn dedup_preserving_order(items: &mut Vec<String>) {
    let mut seen = BTreeSet::new();
    items.retain(|item| seen.insert(item.clone()));
}
