//! CLI definitions for harbor
//!
//! This module contains all CLI argument parsing structures using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "harbor",
    version,
    about = "Provisioning and release orchestration for containerized services",
    long_about = "Converges declared infrastructure in dependency order and rolls out\nnew revisions through publish, migrate, deploy and verify stages."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to harbor.yaml
    #[arg(short, long, global = true, env = "HARBOR_CONFIG", default_value = "harbor.yaml")]
    pub config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Converge declared infrastructure resources
    Provision {
        #[command(subcommand)]
        command: ProvisionCommands,
    },

    /// Start and inspect releases
    Release {
        #[command(subcommand)]
        command: ReleaseCommands,
    },

    /// Administer the secret registry
    Secret {
        #[command(subcommand)]
        command: SecretCommands,
    },
}

#[derive(Subcommand)]
pub enum ProvisionCommands {
    /// Show what apply would change, without changing anything
    Plan {
        /// Plan a destroy instead of an apply
        #[arg(long)]
        destroy: bool,
    },

    /// Create or update every resource, dependencies first
    Apply,

    /// Destroy every resource, dependents first
    Destroy,
}

#[derive(Subcommand)]
pub enum ReleaseCommands {
    /// Publish, migrate, deploy and verify a set of services
    Start {
        /// Services to release (comma-separated or repeated)
        #[arg(long, value_delimiter = ',', required = true)]
        services: Vec<String>,

        /// Revision id (defaults to the commit SHA)
        #[arg(long)]
        revision: Option<String>,

        /// Source commit SHA that triggered the release
        #[arg(long, env = "RELEASE_GIT_SHA")]
        commit: Option<String>,

        /// Registry token (or set GHCR_TOKEN env var)
        #[arg(long, env = "GHCR_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },

    /// Show a release: stages, services, health history, migration logs
    Status {
        /// Release id (or a unique prefix)
        release_id: String,

        /// Print the raw release record as JSON
        #[arg(long)]
        json: bool,
    },

    /// List recent releases
    List {
        /// Maximum number of releases to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Cancel a release at its next stage boundary
    Cancel {
        /// Release id (or a unique prefix)
        release_id: String,

        /// Mark the release failed now (for releases whose process is gone)
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
pub enum SecretCommands {
    /// Store a new version of a secret
    Put {
        /// Hierarchical secret name (e.g. shop/prod/database-url)
        name: String,

        /// Environment variable holding the value
        #[arg(long)]
        from_env: String,
    },

    /// Show the latest version of a secret (never the value)
    Show {
        name: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_release_start_parses_service_list() {
        let cli = Cli::try_parse_from([
            "harbor",
            "release",
            "start",
            "--services=api,web",
            "--revision=abc123",
        ])
        .unwrap();

        match cli.command {
            Commands::Release {
                command: ReleaseCommands::Start {
                    services, revision, ..
                },
            } => {
                assert_eq!(services, vec!["api", "web"]);
                assert_eq!(revision.as_deref(), Some("abc123"));
            }
            _ => panic!("expected release start"),
        }
    }

    #[test]
    fn test_config_flag_is_global() {
        let cli = Cli::try_parse_from(["harbor", "provision", "plan", "-c", "deploy/harbor.yaml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("deploy/harbor.yaml"));
        assert!(matches!(
            cli.command,
            Commands::Provision {
                command: ProvisionCommands::Plan { destroy: false }
            }
        ));
    }

    #[test]
    fn test_release_start_requires_services() {
        assert!(Cli::try_parse_from(["harbor", "release", "start", "--revision=abc"]).is_err());
    }
}
