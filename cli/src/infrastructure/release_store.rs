//! Release store - JSON records under the state directory
//!
//! Layout:
//!
//! ```text
//! {state_dir}/releases/{id}.json     one record per release
//! {state_dir}/releases/{id}.cancel   operator cancel request
//! {state_dir}/revisions.json         active ServiceRevision per service
//! ```
//!
//! `release cancel` runs in a different process from the orchestrator, so
//! it never rewrites the record: it only drops the `.cancel` marker, which
//! the orchestrator only reads. Writes go to a uniquely named temporary
//! file first and are renamed into place, so a crash never leaves a
//! half-written record behind and concurrent writers never collide.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{Release, ServiceRevision};
use crate::error::StoreError;

pub struct ReleaseStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl ReleaseStore {
    /// Open (and create if needed) the store under `state_dir`
    pub async fn open(state_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = state_dir.into();
        let releases = root.join("releases");
        tokio::fs::create_dir_all(&releases)
            .await
            .map_err(|e| io_error(&releases, e))?;
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    fn release_path(&self, id: &Uuid) -> PathBuf {
        self.root.join("releases").join(format!("{}.json", id))
    }

    fn cancel_path(&self, id: &Uuid) -> PathBuf {
        self.root.join("releases").join(format!("{}.cancel", id))
    }

    fn revisions_path(&self) -> PathBuf {
        self.root.join("revisions.json")
    }

    /// Persist a release record.
    ///
    /// Cancel requests live in their own marker file, so saving a stale
    /// in-memory copy never clears an operator's cancel.
    pub async fn save(&self, release: &Release) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        write_json(&self.release_path(&release.id), release).await?;
        debug!(release_id = %release.id, state = %release.state, "Saved release");
        Ok(())
    }

    pub async fn get(&self, id: &Uuid) -> Result<Option<Release>, StoreError> {
        let _guard = self.lock.lock().await;
        self.load(&self.release_path(id)).await
    }

    /// Read a record with any cancel marker applied
    async fn load(&self, path: &Path) -> Result<Option<Release>, StoreError> {
        let Some(mut release) = read_json::<Release>(path).await? else {
            return Ok(None);
        };
        if self.has_cancel_marker(&release.id).await? {
            release.cancel_requested = true;
        }
        Ok(Some(release))
    }

    async fn has_cancel_marker(&self, id: &Uuid) -> Result<bool, StoreError> {
        let path = self.cancel_path(id);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_error(&path, e))
    }

    /// Find a release by full id or unique id prefix
    pub async fn find(&self, id: &str) -> Result<Option<Release>, StoreError> {
        if let Ok(uuid) = Uuid::parse_str(id) {
            return self.get(&uuid).await;
        }
        let prefix = id.to_ascii_lowercase();
        let mut matches: Vec<Release> = self
            .list()
            .await?
            .into_iter()
            .filter(|r| r.id.to_string().starts_with(&prefix))
            .collect();
        if prefix.is_empty() || matches.len() != 1 {
            return Ok(None);
        }
        Ok(matches.pop())
    }

    /// All releases, newest first
    pub async fn list(&self) -> Result<Vec<Release>, StoreError> {
        let _guard = self.lock.lock().await;
        let dir = self.root.join("releases");
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?;

        let mut releases = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&dir, e))? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(release) = self.load(&path).await? {
                releases.push(release);
            }
        }

        releases.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(releases)
    }

    /// Mark a release for cancellation at its next stage boundary.
    ///
    /// Returns the record as the orchestrator will see it, or `None` if no
    /// such release exists. The record itself is left untouched.
    pub async fn request_cancel(&self, id: &Uuid) -> Result<Option<Release>, StoreError> {
        let _guard = self.lock.lock().await;
        let Some(mut release) = self.load(&self.release_path(id)).await? else {
            return Ok(None);
        };
        if !release.state.is_terminal() {
            let marker = self.cancel_path(id);
            tokio::fs::write(&marker, chrono::Utc::now().to_rfc3339())
                .await
                .map_err(|e| io_error(&marker, e))?;
            release.cancel_requested = true;
        }
        Ok(Some(release))
    }

    pub async fn cancel_requested(&self, id: &Uuid) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().await;
        self.has_cancel_marker(id).await
    }

    /// Active revision per service
    pub async fn revisions(&self) -> Result<BTreeMap<String, ServiceRevision>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(read_json(&self.revisions_path()).await?.unwrap_or_default())
    }

    pub async fn record_revision(&self, revision: ServiceRevision) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let path = self.revisions_path();
        let mut revisions: BTreeMap<String, ServiceRevision> =
            read_json(&path).await?.unwrap_or_default();
        revisions.insert(revision.service.clone(), revision);
        write_json(&path, &revisions).await
    }
}

fn io_error(path: &Path, e: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error(path, e)),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| StoreError::Corrupt {
            path: path.display().to_string(),
            message: e.to_string(),
        })
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| StoreError::Corrupt {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|e| io_error(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| io_error(path, e))
}
