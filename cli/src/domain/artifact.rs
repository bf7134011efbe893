//! Artifact domain types
//!
//! An artifact is the immutable image published for one service at one
//! source revision. `(service, revision_id)` is its identity; the registry
//! tag is the revision id, so republishing the same pair finds the existing
//! image instead of overwriting it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::OrchestratorError;

/// Longest tag a container registry accepts
pub const REVISION_MAX_LENGTH: usize = 128;

/// Length a full 40-character commit SHA is shortened to
pub const SHORT_SHA_LENGTH: usize = 12;

/// `repository:tag` address of an image in a registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// A published, immutable build output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub service: String,
    pub revision_id: String,
    pub image: ImageRef,
    /// Content digest reported by the registry (e.g. "sha256:...")
    pub digest: String,
    pub published_at: DateTime<Utc>,
    /// True if the artifact already existed and nothing was built
    #[serde(default)]
    pub reused: bool,
}

impl Artifact {
    /// Pinned reference used when updating compute services
    pub fn pinned_ref(&self) -> String {
        if self.digest.is_empty() {
            self.image.to_string()
        } else {
            format!("{}@{}", self.image, self.digest)
        }
    }
}

/// Derive the revision id for a release.
///
/// An explicit `revision` wins; otherwise the commit SHA is used, with a
/// full 40-character hex SHA shortened to its first 12 characters. The
/// result is lower-cased and must be a valid registry tag.
pub fn derive_revision(
    revision: Option<&str>,
    commit_sha: Option<&str>,
) -> Result<String, OrchestratorError> {
    let candidate = match (revision, commit_sha) {
        (Some(revision), _) => revision.trim().to_lowercase(),
        (None, Some(sha)) => {
            let sha = sha.trim().to_lowercase();
            if sha.len() == 40 && sha.chars().all(|c| c.is_ascii_hexdigit()) {
                sha[..SHORT_SHA_LENGTH].to_string()
            } else {
                sha
            }
        }
        (None, None) => {
            return Err(OrchestratorError::InvalidRevision {
                revision: String::new(),
                reason: "either --revision or --commit is required".to_string(),
            })
        }
    };

    validate_revision(&candidate)?;
    Ok(candidate)
}

/// Check that a revision id is usable as an image tag
pub fn validate_revision(revision: &str) -> Result<(), OrchestratorError> {
    let invalid = |reason: &str| OrchestratorError::InvalidRevision {
        revision: revision.to_string(),
        reason: reason.to_string(),
    };

    if revision.is_empty() {
        return Err(invalid("cannot be empty"));
    }
    if revision.len() > REVISION_MAX_LENGTH {
        return Err(invalid("exceeds 128 characters"));
    }
    if !revision
        .chars()
        .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase() || matches!(c, '.' | '_' | '-'))
    {
        return Err(invalid("allowed characters are 0-9, a-z, '.', '_' and '-'"));
    }
    if revision.starts_with(|c: char| c == '.' || c == '-') {
        return Err(invalid("must start with a letter, digit or '_'"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_sha_is_shortened() {
        let revision =
            derive_revision(None, Some("ABC123DEF4567890ABC123DEF4567890ABC123DE")).unwrap();
        assert_eq!(revision, "abc123def456");
    }

    #[test]
    fn test_short_sha_used_as_is() {
        assert_eq!(derive_revision(None, Some("abc123")).unwrap(), "abc123");
    }

    #[test]
    fn test_explicit_revision_wins() {
        let revision = derive_revision(
            Some("v1.4.0"),
            Some("abc123def4567890abc123def4567890abc123de"),
        )
        .unwrap();
        assert_eq!(revision, "v1.4.0");
    }

    #[test]
    fn test_invalid_revisions() {
        assert!(derive_revision(None, None).is_err());
        assert!(derive_revision(Some(""), None).is_err());
        assert!(derive_revision(Some("feature/login"), None).is_err());
        assert!(derive_revision(Some("-rc1"), None).is_err());
        assert!(derive_revision(Some(&"a".repeat(129)), None).is_err());
    }

    #[test]
    fn test_pinned_ref() {
        let artifact = Artifact {
            service: "api".into(),
            revision_id: "abc123".into(),
            image: ImageRef::new("ghcr.io/org/shop/api", "abc123"),
            digest: "sha256:deadbeef".into(),
            published_at: Utc::now(),
            reused: false,
        };
        assert_eq!(
            artifact.pinned_ref(),
            "ghcr.io/org/shop/api:abc123@sha256:deadbeef"
        );
    }
}
