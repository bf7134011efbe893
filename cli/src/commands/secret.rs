//! Secret registry administration.
//!
//! Values are read from the environment so they never appear in shell
//! history or process listings, and are never printed back.

use anyhow::{Context, Result};
use tracing::info;

use harbor_provision::{FileSecretRegistry, SecretRef, SecretRegistry, SecretValue};

use crate::config::DeployConfig;
use crate::error::ConfigError;
use crate::ui;

fn open(config: &DeployConfig) -> Result<FileSecretRegistry> {
    FileSecretRegistry::open(config.secrets_path()).context("Failed to open secret registry")
}

/// Store the value of `from_env` as a new version of `name`
pub async fn put(config: &DeployConfig, name: &str, from_env: &str) -> Result<SecretRef> {
    let value = std::env::var(from_env)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::InvalidValue {
            field: "--from-env".to_string(),
            value: format!("{} is not set or empty", from_env),
        })?;

    let reference = open(config)?.put(name, SecretValue::new(value)).await?;
    info!(secret = %reference, "Stored secret version");
    ui::print_success(&format!("Stored {}", reference));
    Ok(reference)
}

/// Print the latest version of `name`
pub async fn show(config: &DeployConfig, name: &str) -> Result<SecretRef> {
    let reference = open(config)?.latest(name).await?;
    ui::print_field("Secret", &reference.name);
    ui::print_field("Latest", &format!("v{}", reference.version));
    Ok(reference)
}
