//! Rollout service - updates compute services and verifies their health
//!
//! The compute platform is an injected dependency: harbor only needs to
//! say "run image X with N tasks" and to ask "how many tasks are running
//! and healthy". Health verification polls at a fixed interval until the
//! healthy count reaches the desired count or the budget runs out.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::domain::HealthSample;
use crate::error::{PlatformError, ServiceFailure};

/// Where a service runs on the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTarget {
    pub service: String,
    pub deployment: String,
    pub container: String,
}

impl From<&ServiceConfig> for ServiceTarget {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            service: config.name.clone(),
            deployment: config.deployment().to_string(),
            container: config.container().to_string(),
        }
    }
}

/// Running and healthy task counts for a service's newest revision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceHealth {
    pub desired: u32,
    pub running: u32,
    pub healthy: u32,
}

/// Compute platform control API
#[async_trait]
pub trait ComputePlatform: Send + Sync {
    /// Roll the service to `image` with `desired_count` tasks
    async fn update_service(
        &self,
        target: &ServiceTarget,
        image: &str,
        desired_count: u32,
    ) -> Result<(), PlatformError>;

    /// Task counts for the service's newest revision
    async fn service_health(&self, target: &ServiceTarget) -> Result<ServiceHealth, PlatformError>;
}

/// Polls a service until it is healthy or the budget runs out
#[derive(Debug, Clone)]
pub struct HealthVerifier {
    timeout: Duration,
    interval: Duration,
    max_errors: u32,
}

/// Result of verifying one service, with every poll recorded
#[derive(Debug, Clone)]
pub struct Verification {
    pub result: Result<ServiceHealth, ServiceFailure>,
    pub samples: Vec<HealthSample>,
}

impl HealthVerifier {
    pub fn new(timeout: Duration, interval: Duration, max_errors: u32) -> Self {
        Self {
            timeout,
            interval,
            max_errors,
        }
    }

    pub async fn verify(
        &self,
        platform: &Arc<dyn ComputePlatform>,
        target: &ServiceTarget,
        desired_count: u32,
    ) -> Verification {
        let start = Instant::now();
        let mut samples = Vec::new();
        let mut consecutive_errors = 0;
        let mut last = ServiceHealth {
            desired: desired_count,
            running: 0,
            healthy: 0,
        };

        loop {
            match platform.service_health(target).await {
                Ok(health) => {
                    consecutive_errors = 0;
                    last = health;
                    samples.push(HealthSample {
                        at: Utc::now(),
                        desired: desired_count,
                        running: health.running,
                        healthy: health.healthy,
                        error: None,
                    });
                    debug!(
                        service = %target.service,
                        "{}/{} healthy ({} running)",
                        health.healthy,
                        desired_count,
                        health.running
                    );

                    if health.healthy >= desired_count {
                        info!(service = %target.service, "Service healthy");
                        return Verification {
                            result: Ok(health),
                            samples,
                        };
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(service = %target.service, error = %e, "Health check error");
                    samples.push(HealthSample {
                        at: Utc::now(),
                        desired: desired_count,
                        running: last.running,
                        healthy: last.healthy,
                        error: Some(e.to_string()),
                    });

                    if consecutive_errors >= self.max_errors.max(1) {
                        return Verification {
                            result: Err(ServiceFailure::HealthCheckFailed {
                                cause: format!(
                                    "{} consecutive errors, last: {}",
                                    consecutive_errors, e
                                ),
                            }),
                            samples,
                        };
                    }
                }
            }

            if start.elapsed() + self.interval > self.timeout {
                return Verification {
                    result: Err(ServiceFailure::HealthTimeout {
                        healthy: last.healthy,
                        desired: desired_count,
                        waited_secs: start.elapsed().as_secs(),
                    }),
                    samples,
                };
            }

            tokio::time::sleep(self.interval).await;
        }
    }
}
