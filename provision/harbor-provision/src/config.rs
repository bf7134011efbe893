//! Resource definitions
//!
//! The YAML file that declares infrastructure for `harbor provision`:
//!
//! ```yaml
//! resources:
//!   - name: network
//!     kind: network
//!   - name: database
//!     kind: database
//!     depends_on: [network]
//!     config:
//!       engine: postgres
//!   - name: database-url
//!     kind: secret
//!     secret_name: app/database-url
//!     value_env: DATABASE_URL
//!   - name: api
//!     kind: compute-service
//!     secrets:
//!       DATABASE_URL: app/database-url
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use crate::error::{DefinitionError, GraphError};
use crate::graph::{Resource, ResourceGraph, ResourceHooks, ResourceKind};
use crate::validation::{validate_env_name, validate_resource_name, validate_secret_name};

/// Top-level resource definitions file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceDefinitions {
    #[serde(default)]
    pub resources: Vec<ResourceDefinition>,
}

/// One declared resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub name: String,

    pub kind: ResourceKind,

    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Free-form attributes handed to the driver
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,

    /// Environment variable name -> secret name
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,

    /// Registry name for `secret` resources (defaults to `name`)
    #[serde(default)]
    pub secret_name: Option<String>,

    /// Environment variable with the initial value of a `secret` resource
    #[serde(default)]
    pub value_env: Option<String>,

    /// Hook command run on apply
    #[serde(default)]
    pub apply: Vec<String>,

    /// Hook command run on destroy
    #[serde(default)]
    pub destroy: Vec<String>,
}

impl ResourceDefinition {
    fn registry_name(&self) -> &str {
        self.secret_name.as_deref().unwrap_or(&self.name)
    }
}

impl ResourceDefinitions {
    /// Load and validate definitions from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DefinitionError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| DefinitionError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let definitions: Self =
            serde_yaml::from_str(&content).map_err(|e| DefinitionError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        definitions.validate()?;
        Ok(definitions)
    }

    /// Parse definitions from a YAML string without validating them
    pub fn from_yaml(content: &str) -> Result<Self, DefinitionError> {
        serde_yaml::from_str(content).map_err(|e| DefinitionError::Parse {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })
    }

    /// Check names and references, reporting every problem at once
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let mut problems = Vec::new();
        let mut seen = HashSet::new();
        let declared: HashSet<&str> = self.resources.iter().map(|r| r.name.as_str()).collect();

        for resource in &self.resources {
            if let Err(e) = validate_resource_name(&resource.name, "resource name") {
                problems.push(e.to_string());
            }

            if !seen.insert(resource.name.as_str()) {
                problems.push(format!("resource {} is declared more than once", resource.name));
            }

            for dependency in &resource.depends_on {
                if !declared.contains(dependency.as_str()) {
                    problems.push(format!(
                        "resource {} depends on undeclared resource {}",
                        resource.name, dependency
                    ));
                }
            }

            for (env, secret) in &resource.secrets {
                if let Err(e) = validate_env_name(env, "secret environment variable") {
                    problems.push(format!("resource {}: {}", resource.name, e));
                }
                if let Err(e) = validate_secret_name(secret) {
                    problems.push(format!("resource {}: {}", resource.name, e));
                }
            }

            if resource.kind == ResourceKind::Secret {
                if let Err(e) = validate_secret_name(resource.registry_name()) {
                    problems.push(format!("resource {}: {}", resource.name, e));
                }
                if let Some(env) = &resource.value_env {
                    if let Err(e) = validate_env_name(env, "value_env") {
                        problems.push(format!("resource {}: {}", resource.name, e));
                    }
                }
            } else if resource.secret_name.is_some() || resource.value_env.is_some() {
                problems.push(format!(
                    "resource {}: secret_name and value_env are only valid for secret resources",
                    resource.name
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(DefinitionError::Invalid { problems })
        }
    }

    /// Build the resource graph.
    ///
    /// A resource that injects a secret also depends on the `secret`
    /// resource that creates it, if one is declared.
    pub fn into_graph(self) -> Result<ResourceGraph, GraphError> {
        let secret_owners: HashMap<String, String> = self
            .resources
            .iter()
            .filter(|r| r.kind == ResourceKind::Secret)
            .map(|r| (r.registry_name().to_string(), r.name.clone()))
            .collect();

        let mut graph = ResourceGraph::new();

        for definition in self.resources {
            let mut resource = Resource::new(&definition.name, definition.kind).with_hooks(
                ResourceHooks {
                    apply: definition.apply,
                    destroy: definition.destroy,
                },
            );
            resource.depends_on = definition.depends_on;
            resource.config = definition.config;
            resource.secret_name = definition.secret_name;
            resource.value_env = definition.value_env;

            for (env, secret) in definition.secrets {
                if let Some(owner) = secret_owners.get(&secret) {
                    if owner != &resource.name {
                        resource.depends_on.push(owner.clone());
                    }
                }
                resource.secrets.insert(env, secret);
            }

            graph.declare(resource)?;
        }

        Ok(graph)
    }
}
