//! Database migration configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::parse_duration;
use crate::error::ConfigError;

/// How the one-off migration task runs during a release
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Service whose image carries the migration payload
    pub service: String,

    /// Command run inside that image (e.g. ["bin/rails", "db:migrate"])
    pub command: Vec<String>,

    /// Secret holding the database connection string (`name` or `name@vN`)
    pub database_secret: String,

    /// Environment variable the connection string is exposed as
    #[serde(default = "default_env_var")]
    pub env_var: String,

    /// Wall-clock ceiling for the task (default: 15m)
    #[serde(default = "default_timeout")]
    pub timeout: String,
}

fn default_env_var() -> String {
    "DATABASE_URL".to_string()
}

fn default_timeout() -> String {
    "15m".to_string()
}

impl MigrationConfig {
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration("migration.timeout", &self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let yaml = r#"
service: api
command: ["bin/rails", "db:migrate"]
database_secret: shop/database-url
"#;
        let config: MigrationConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.env_var, "DATABASE_URL");
        assert_eq!(config.timeout().unwrap(), Duration::from_secs(15 * 60));
    }
}
