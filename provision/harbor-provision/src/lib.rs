//! harbor-provision
//!
//! Dependency-ordered, idempotent provisioning of infrastructure resources
//! and the versioned secret registry they draw credentials from.

pub mod config;
pub mod driver;
pub mod error;
pub mod graph;
pub mod provisioner;
pub mod secrets;
pub mod validation;

pub use config::{ResourceDefinition, ResourceDefinitions};
pub use driver::{ApplyRequest, LiveState, LocalStateDriver, ResourceDriver};
pub use error::{DefinitionError, DriverError, GraphError, ProvisionError, SecretError};
pub use graph::{Resource, ResourceGraph, ResourceHooks, ResourceKind, ResourceState};
pub use provisioner::{ApplyReport, DestroyReport, PlanAction, PlannedChange, Provisioner};
pub use secrets::{FileSecretRegistry, SecretRef, SecretRegistry, SecretSelector, SecretValue};
