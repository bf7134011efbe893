//! Migration domain types

use serde::{Deserialize, Serialize};

/// Outcome of one migration task run.
///
/// `logs` never contain secret values; the runner redacts them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationResult {
    pub success: bool,
    pub duration_secs: f64,
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub logs: String,
}

impl MigrationResult {
    pub fn succeeded(duration_secs: f64, logs: impl Into<String>) -> Self {
        Self {
            success: true,
            duration_secs,
            exit_code: Some(0),
            timed_out: false,
            logs: logs.into(),
        }
    }

    pub fn failed(duration_secs: f64, exit_code: Option<i32>, logs: impl Into<String>) -> Self {
        Self {
            success: false,
            duration_secs,
            exit_code,
            timed_out: false,
            logs: logs.into(),
        }
    }

    pub fn timed_out(duration_secs: f64, logs: impl Into<String>) -> Self {
        Self {
            success: false,
            duration_secs,
            exit_code: None,
            timed_out: true,
            logs: logs.into(),
        }
    }

    /// One-line description for summaries
    pub fn summary(&self) -> String {
        if self.success {
            format!("migration succeeded in {:.1}s", self.duration_secs)
        } else if self.timed_out {
            format!("migration timed out after {:.0}s", self.duration_secs)
        } else {
            match self.exit_code {
                Some(code) => format!("migration exited with code {}", code),
                None => "migration failed".to_string(),
            }
        }
    }
}

/// Replace every occurrence of each secret with `[REDACTED]`
pub fn redact(text: &str, secrets: &[&str]) -> String {
    let mut redacted = text.to_string();
    for secret in secrets.iter().filter(|s| !s.is_empty()) {
        redacted = redacted.replace(secret, "[REDACTED]");
    }
    redacted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact() {
        let logs = "connecting to postgres://app:hunter2@db/shop\nok";
        let redacted = redact(logs, &["postgres://app:hunter2@db/shop"]);
        assert_eq!(redacted, "connecting to [REDACTED]\nok");
        assert_eq!(redact("nothing", &[""]), "nothing");
    }

    #[test]
    fn test_summary() {
        assert_eq!(
            MigrationResult::failed(1.0, Some(3), "").summary(),
            "migration exited with code 3"
        );
        assert_eq!(
            MigrationResult::timed_out(900.0, "").summary(),
            "migration timed out after 900s"
        );
    }

    #[test]
    fn test_result_compares_with_fractional_duration() {
        let result = MigrationResult::succeeded(1.25, "applied 3 migrations");
        let stored: MigrationResult =
            serde_json::from_str(&serde_json::to_string(&result).unwrap()).unwrap();
        assert_eq!(stored, result);
        assert_ne!(stored, MigrationResult::succeeded(1.5, "applied 3 migrations"));
    }
}
