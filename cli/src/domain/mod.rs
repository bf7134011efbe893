//! Domain layer - pure business logic
//!
//! This module contains business logic with no external I/O.
//! Types and functions here can be unit tested without mocking.

pub mod artifact;
pub mod migration;
pub mod release;
pub mod service;

// Re-export commonly used types
pub use artifact::{derive_revision, Artifact, ImageRef};
pub use migration::MigrationResult;
pub use release::{
    HealthSample, Release, ReleaseState, RollbackTarget, ServiceStatus, Stage,
    StageStatus,
};
pub use service::{HealthStatus, ServiceRevision};
