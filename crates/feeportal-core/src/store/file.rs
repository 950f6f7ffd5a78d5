// # File Store
//
// File-based implementation of PersistentStore with crash recovery.
//
// ## Layout
//
// One JSON document per slot inside a directory:
//
// ```text
// <dir>/students.json         current collection
// <dir>/students.backup       previous good collection
// <dir>/currentUser.json      session record (absent when logged out)
// ```
//
// ## Crash Recovery
//
// - Atomic writes: write to `<slot>.tmp`, then rename over `<slot>.json`
// - Corruption detection: every slot must hold valid JSON
// - Backup: the previous document is copied to `<slot>.backup` before each write
// - Recovery: a corrupted slot is restored from its backup on load

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::Error;
use crate::traits::PersistentStore;

/// File-based store with crash recovery
///
/// Slot values must be JSON documents; anything else is treated as
/// corruption on load.
///
/// # Example
///
/// ```rust,no_run
/// use feeportal_core::store::FileStore;
/// use feeportal_core::traits::PersistentStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileStore::new("/var/lib/feeportal").await?;
///     store.save("students", b"[]".to_vec()).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    // Serializes writers so two saves never share a temp file
    write_lock: Arc<Mutex<()>>,
}

impl FileStore {
    /// Open a file store rooted at `dir`, creating the directory if needed
    pub async fn new<P: AsRef<Path>>(dir: P) -> Result<Self, Error> {
        let dir = dir.as_ref().to_path_buf();

        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(&dir).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create store directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        Ok(Self {
            dir,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Directory holding the slot files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn slot_path(&self, key: &str) -> Result<PathBuf, Error> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::persistence(format!("Invalid slot name: {key:?}")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }

    fn temp_path(path: &Path) -> PathBuf {
        path.with_extension("tmp")
    }

    fn backup_path(path: &Path) -> PathBuf {
        path.with_extension("backup")
    }

    /// Read one slot file and check it holds JSON
    async fn read_slot(path: &Path) -> Result<Option<Vec<u8>>, Error> {
        if !path.exists() {
            return Ok(None);
        }

        let bytes = fs::read(path).await.map_err(|e| {
            Error::persistence(format!("Failed to read {}: {}", path.display(), e))
        })?;

        serde_json::from_slice::<serde::de::IgnoredAny>(&bytes)?;
        Ok(Some(bytes))
    }

    /// Load a slot, falling back to its backup if the main file is corrupted
    async fn load_with_recovery(path: &Path) -> Result<Option<Vec<u8>>, Error> {
        match Self::read_slot(path).await {
            Ok(value) => Ok(value),
            Err(Error::Json(e)) => {
                tracing::warn!(
                    "Slot {} appears corrupted: {}. Attempting recovery from backup.",
                    path.display(),
                    e
                );

                let backup_path = Self::backup_path(path);
                match Self::read_slot(&backup_path).await {
                    Ok(Some(bytes)) => {
                        tracing::info!("Recovered {} from backup", path.display());
                        if let Err(restore_err) = fs::copy(&backup_path, path).await {
                            tracing::error!(
                                "Failed to restore {} from backup: {}",
                                path.display(),
                                restore_err
                            );
                        }
                        Ok(Some(bytes))
                    }
                    Ok(None) => {
                        tracing::warn!("No backup for {}. Treating slot as empty.", path.display());
                        Ok(None)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup for {} also unusable: {}. Treating slot as empty.",
                            path.display(),
                            backup_err
                        );
                        Ok(None)
                    }
                }
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl PersistentStore for FileStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let path = self.slot_path(key)?;
        Self::load_with_recovery(&path).await
    }

    async fn save(&self, key: &str, value: Vec<u8>) -> Result<(), Error> {
        let path = self.slot_path(key)?;
        let _guard = self.write_lock.lock().await;

        let temp_path = Self::temp_path(&path);
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::persistence(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            file.write_all(&value).await.map_err(|e| {
                Error::persistence(format!(
                    "Failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            file.flush().await.map_err(|e| {
                Error::persistence(format!(
                    "Failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if path.exists() {
            if let Err(e) = fs::copy(&path, Self::backup_path(&path)).await {
                tracing::warn!("Failed to create backup of {}: {}", path.display(), e);
            }
        }

        fs::rename(&temp_path, &path).await.map_err(|e| {
            Error::persistence(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                path.display(),
                e
            ))
        })?;

        tracing::trace!("Slot written: {}", path.display());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        let path = self.slot_path(key)?;
        let _guard = self.write_lock.lock().await;

        for target in [path.clone(), Self::backup_path(&path)] {
            match fs::remove_file(&target).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(Error::persistence(format!(
                        "Failed to remove {}: {}",
                        target.display(),
                        e
                    )));
                }
            }
        }
        Ok(())
    }
}
