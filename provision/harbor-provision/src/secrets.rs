//! Secret registry
//!
//! A versioned key/value store for sensitive configuration. Every `put`
//! creates a new version and old versions stay readable. Other components
//! only ever carry a [`SecretRef`]; values are resolved at the last moment
//! and are redacted from every `Debug`/`Display` rendering.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::SecretError;
use crate::validation::validate_secret_name;

/// Opaque handle to one version of a secret
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SecretRef {
    pub name: String,
    pub version: u32,
}

impl SecretRef {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}", self.name, self.version)
    }
}

/// A secret name with an optional pinned version (`name` or `name@vN`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSelector {
    pub name: String,
    pub version: Option<u32>,
}

impl SecretSelector {
    pub fn parse(reference: &str) -> Result<Self, SecretError> {
        let invalid = || SecretError::InvalidReference {
            reference: reference.to_string(),
        };

        let (name, version) = match reference.rsplit_once('@') {
            Some((name, version)) => {
                let digits = version.strip_prefix('v').ok_or_else(invalid)?;
                let version: u32 = digits.parse().map_err(|_| invalid())?;
                if version == 0 {
                    return Err(invalid());
                }
                (name, Some(version))
            }
            None => (reference, None),
        };

        validate_secret_name(name).map_err(|e| SecretError::InvalidName {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            name: name.to_string(),
            version,
        })
    }
}

impl fmt::Display for SecretSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(v) => write!(f, "{}@v{}", self.name, v),
            None => f.write_str(&self.name),
        }
    }
}

/// A secret value. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the raw value; callers must not log it
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue([REDACTED])")
    }
}

impl fmt::Display for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Versioned secret store
#[async_trait]
pub trait SecretRegistry: Send + Sync {
    /// Store a new version of `name`
    async fn put(&self, name: &str, value: SecretValue) -> Result<SecretRef, SecretError>;

    /// Read the value behind a reference
    async fn resolve(&self, reference: &SecretRef) -> Result<SecretValue, SecretError>;

    /// Reference to the newest version of `name`
    async fn latest(&self, name: &str) -> Result<SecretRef, SecretError>;

    /// Resolve `name` or `name@vN` to a concrete reference
    async fn select(&self, selector: &SecretSelector) -> Result<SecretRef, SecretError> {
        match selector.version {
            Some(version) => {
                let reference = SecretRef::new(&selector.name, version);
                // Existence check only; the value is dropped immediately
                self.resolve(&reference).await?;
                Ok(reference)
            }
            None => self.latest(&selector.name).await,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct StoredVersion {
    value: String,
    created_at: DateTime<Utc>,
}

#[derive(Default, Serialize, Deserialize)]
struct SecretFile {
    #[serde(default)]
    secrets: BTreeMap<String, Vec<StoredVersion>>,
}

/// Secret registry backed by a JSON file (or nothing, for tests)
pub struct FileSecretRegistry {
    path: Option<PathBuf>,
    entries: RwLock<BTreeMap<String, Vec<StoredVersion>>>,
}

impl FileSecretRegistry {
    /// Registry that lives only in memory
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Open (or lazily create) a registry file
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SecretError> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                SecretError::Storage(format!("failed to read {}: {}", path.display(), e))
            })?;
            let file: SecretFile = serde_json::from_str(&content).map_err(|e| {
                SecretError::Storage(format!("failed to parse {}: {}", path.display(), e))
            })?;
            file.secrets
        } else {
            BTreeMap::new()
        };

        debug!(path = %path.display(), secrets = entries.len(), "Opened secret registry");

        Ok(Self {
            path: Some(path),
            entries: RwLock::new(entries),
        })
    }

    async fn persist(&self, entries: &BTreeMap<String, Vec<StoredVersion>>) -> Result<(), SecretError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let file = SecretFile {
            secrets: entries.clone(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| SecretError::Storage(format!("failed to serialize secrets: {}", e)))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                SecretError::Storage(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| SecretError::Storage(format!("failed to write {}: {}", tmp.display(), e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| {
                    SecretError::Storage(format!("failed to restrict {}: {}", tmp.display(), e))
                })?;
        }

        tokio::fs::rename(&tmp, path).await.map_err(|e| {
            SecretError::Storage(format!("failed to replace {}: {}", path.display(), e))
        })
    }
}

#[async_trait]
impl SecretRegistry for FileSecretRegistry {
    async fn put(&self, name: &str, value: SecretValue) -> Result<SecretRef, SecretError> {
        validate_secret_name(name).map_err(|e| SecretError::InvalidName {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        let mut entries = self.entries.write().await;
        let versions = entries.entry(name.to_string()).or_default();
        versions.push(StoredVersion {
            value: value.0,
            created_at: Utc::now(),
        });
        let reference = SecretRef::new(name, versions.len() as u32);

        if let Err(e) = self.persist(&entries).await {
            // Keep memory and disk consistent
            if let Some(versions) = entries.get_mut(name) {
                versions.pop();
                if versions.is_empty() {
                    entries.remove(name);
                }
            }
            return Err(e);
        }

        info!(secret = %reference, "Stored secret version");
        Ok(reference)
    }

    async fn resolve(&self, reference: &SecretRef) -> Result<SecretValue, SecretError> {
        let entries = self.entries.read().await;
        reference
            .version
            .checked_sub(1)
            .and_then(|idx| entries.get(&reference.name)?.get(idx as usize))
            .map(|stored| SecretValue(stored.value.clone()))
            .ok_or_else(|| SecretError::NotFound {
                name: reference.name.clone(),
                version: Some(reference.version),
            })
    }

    async fn latest(&self, name: &str) -> Result<SecretRef, SecretError> {
        let entries = self.entries.read().await;
        entries
            .get(name)
            .filter(|versions| !versions.is_empty())
            .map(|versions| SecretRef::new(name, versions.len() as u32))
            .ok_or_else(|| SecretError::NotFound {
                name: name.to_string(),
                version: None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_creates_new_versions() {
        let registry = FileSecretRegistry::in_memory();
        let v1 = registry
            .put("app/db", SecretValue::new("postgres://one"))
            .await
            .unwrap();
        let v2 = registry
            .put("app/db", SecretValue::new("postgres://two"))
            .await
            .unwrap();

        assert_eq!(v1, SecretRef::new("app/db", 1));
        assert_eq!(v2, SecretRef::new("app/db", 2));
        assert_eq!(registry.latest("app/db").await.unwrap(), v2);

        // Old versions remain readable
        assert_eq!(
            registry.resolve(&v1).await.unwrap().expose(),
            "postgres://one"
        );
        assert_eq!(
            registry.resolve(&v2).await.unwrap().expose(),
            "postgres://two"
        );
    }

    #[tokio::test]
    async fn test_resolve_missing_secret() {
        let registry = FileSecretRegistry::in_memory();
        registry
            .put("app/db", SecretValue::new("x"))
            .await
            .unwrap();

        let err = registry
            .resolve(&SecretRef::new("app/db", 2))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SecretError::NotFound {
                name: "app/db".to_string(),
                version: Some(2)
            }
        );

        assert!(registry.resolve(&SecretRef::new("app/db", 0)).await.is_err());
        assert!(registry.latest("app/other").await.is_err());
    }

    #[test]
    fn test_invalid_name_rejected() {
        let registry = FileSecretRegistry::in_memory();
        let err = tokio_test::block_on(registry.put("app//db", SecretValue::new("x"))).unwrap_err();
        assert!(matches!(err, SecretError::InvalidName { .. }));
    }

    #[tokio::test]
    async fn test_file_registry_persists_versions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.json");

        {
            let registry = FileSecretRegistry::open(&path).unwrap();
            registry
                .put("app/key", SecretValue::new("first"))
                .await
                .unwrap();
            registry
                .put("app/key", SecretValue::new("second"))
                .await
                .unwrap();
        }

        let reopened = FileSecretRegistry::open(&path).unwrap();
        let latest = reopened.latest("app/key").await.unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(
            reopened
                .resolve(&SecretRef::new("app/key", 1))
                .await
                .unwrap()
                .expose(),
            "first"
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_select_pinned_and_latest() {
        let registry = FileSecretRegistry::in_memory();
        registry.put("app/db", SecretValue::new("a")).await.unwrap();
        registry.put("app/db", SecretValue::new("b")).await.unwrap();

        let latest = registry
            .select(&SecretSelector::parse("app/db").unwrap())
            .await
            .unwrap();
        assert_eq!(latest.version, 2);

        let pinned = registry
            .select(&SecretSelector::parse("app/db@v1").unwrap())
            .await
            .unwrap();
        assert_eq!(pinned.version, 1);

        assert!(registry
            .select(&SecretSelector::parse("app/db@v3").unwrap())
            .await
            .is_err());
    }

    #[test]
    fn test_selector_parsing() {
        assert_eq!(
            SecretSelector::parse("app/db@v4").unwrap(),
            SecretSelector {
                name: "app/db".to_string(),
                version: Some(4)
            }
        );
        assert!(SecretSelector::parse("app/db@4").is_err());
        assert!(SecretSelector::parse("app/db@v0").is_err());
        assert!(SecretSelector::parse("app/db@vx").is_err());
    }

    #[test]
    fn test_secret_value_is_redacted() {
        let value = SecretValue::new("hunter2");
        assert_eq!(format!("{}", value), "[REDACTED]");
        assert!(!format!("{:?}", value).contains("hunter2"));
        assert_eq!(SecretRef::new("app/db", 3).to_string(), "app/db@v3");
    }
}
