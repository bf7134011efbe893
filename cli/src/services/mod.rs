//! Services layer - orchestration logic
//!
//! This module coordinates between domain logic and infrastructure.
//! Services talk to the outside world only through injected trait objects,
//! so every one of them can be driven by in-memory fakes in tests.

pub mod migration_service;
pub mod publisher;
pub mod release_service;
pub mod rollout_service;

// Re-export commonly used types
pub use migration_service::{DatabaseConnection, MigrationRunner};
pub use publisher::ImagePublisher;
pub use release_service::{DeployTarget, MigrationStage, ReleaseOrchestrator, ReleaseRequest};
