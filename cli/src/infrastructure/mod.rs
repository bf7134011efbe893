//! Infrastructure layer - external I/O adapters
//!
//! This module contains all code that interacts with external systems:
//! - Container registries (via skopeo)
//! - Image builds (via docker)
//! - Kubernetes API and migration Jobs
//! - Local release store
//! - Release Tracker

pub mod builder;
pub mod kubernetes;
pub mod registry;
pub mod release_store;
pub mod release_tracker;

// Re-export commonly used types
pub use builder::DockerBuilder;
pub use kubernetes::{KubectlJobExecutor, KubernetesPlatform};
pub use registry::{RegistryCredentials, SkopeoRegistry};
pub use release_store::ReleaseStore;
pub use release_tracker::ReleaseTracker;
