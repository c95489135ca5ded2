//! Directory-backed session store.
//!
//! Each session is one JSON file, `<dir>/<session_id>.json`, holding the
//! version counter and the serialized session. Saves go through a temporary
//! file and a rename so readers never see a partial write.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use adaptest_core::error::CatError;
use adaptest_core::traits::{SessionStore, StoredSession};

/// Session store writing one JSON file per session.
#[derive(Debug)]
pub struct FileSessionStore {
    dir: PathBuf,
    /// Serializes version check and write within this process.
    write_lock: Mutex<()>,
}

impl FileSessionStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, CatError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| store_error(&dir, e))?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &str) -> Result<PathBuf, CatError> {
        let valid = !session_id.is_empty()
            && session_id
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
        if !valid {
            return Err(CatError::Store(format!(
                "session id {session_id:?} is not usable as a file name"
            )));
        }
        Ok(self.dir.join(format!("{session_id}.json")))
    }

    async fn read(&self, path: &Path) -> Result<Option<StoredSession>, CatError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(store_error(path, e)),
        }
    }
}

fn store_error(path: &Path, err: std::io::Error) -> CatError {
    CatError::Store(format!("{}: {err}", path.display()))
}

#[async_trait]
impl SessionStore for FileSessionStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self, session_id: &str) -> Result<Option<StoredSession>, CatError> {
        let path = self.path_for(session_id)?;
        self.read(&path).await
    }

    async fn save(
        &self,
        session_id: &str,
        blob: Value,
        expected_version: Option<u64>,
    ) -> Result<u64, CatError> {
        let path = self.path_for(session_id)?;
        let _guard = self.write_lock.lock().await;

        let found = self.read(&path).await?.map(|stored| stored.version);
        if found != expected_version {
            return Err(CatError::VersionConflict {
                session_id: session_id.to_string(),
                expected: expected_version,
                found,
            });
        }

        let version = found.unwrap_or(0) + 1;
        let bytes = serde_json::to_vec_pretty(&StoredSession { version, blob })?;
        let tmp = self
            .dir
            .join(format!(".{session_id}.{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| store_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| store_error(&path, e))?;

        tracing::debug!(session = %session_id, version, "session saved");
        Ok(version)
    }

    async fn delete(&self, session_id: &str) -> Result<bool, CatError> {
        let path = self.path_for(session_id)?;
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(store_error(&path, e)),
        }
    }
}
