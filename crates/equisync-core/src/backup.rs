//! Remote copies of whole market database files.

use std::fs;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup i/o failed for '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("backup of '{name}' failed after {attempts} attempts: {last}")]
    Exhausted {
        name: String,
        attempts: u32,
        last: String,
    },
}

type BackupFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BackupError>> + Send + 'a>>;

/// Object store holding one blob per market database.
pub trait BackupStore: Send + Sync {
    /// `None` when no copy exists yet.
    fn download<'a>(&'a self, name: &'a str) -> BackupFuture<'a, Option<Vec<u8>>>;

    fn upload<'a>(&'a self, name: &'a str, bytes: &'a [u8]) -> BackupFuture<'a, ()>;
}

/// Backup store on a mounted directory.
#[derive(Debug, Clone)]
pub struct DirectoryBackup {
    root: PathBuf,
}

impl DirectoryBackup {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl BackupStore for DirectoryBackup {
    fn download<'a>(&'a self, name: &'a str) -> BackupFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move {
            match tokio::fs::read(self.root.join(name)).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
                Err(source) => Err(BackupError::Io {
                    name: name.to_string(),
                    source,
                }),
            }
        })
    }

    fn upload<'a>(&'a self, name: &'a str, bytes: &'a [u8]) -> BackupFuture<'a, ()> {
        Box::pin(async move {
            let io = |source: std::io::Error| BackupError::Io {
                name: name.to_string(),
                source,
            };
            tokio::fs::create_dir_all(&self.root).await.map_err(io)?;
            let staging = self.root.join(format!(".{name}.partial"));
            tokio::fs::write(&staging, bytes).await.map_err(io)?;
            tokio::fs::rename(&staging, self.root.join(name))
                .await
                .map_err(io)
        })
    }
}

/// Run `operation` up to `attempts` times with a fixed `delay` between tries.
pub async fn with_retry<T, F, Fut>(
    name: &str,
    attempts: u32,
    delay: Duration,
    mut operation: F,
) -> Result<T, BackupError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackupError>>,
{
    let attempts = attempts.max(1);
    let mut last = String::new();
    for attempt in 1..=attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                tracing::warn!(name, attempt, attempts, %error, "backup attempt failed");
                last = error.to_string();
            }
        }
        if attempt < attempts && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    Err(BackupError::Exhausted {
        name: name.to_string(),
        attempts,
        last,
    })
}

/// Copy a backup over `path` when no local database exists yet.
pub async fn restore_if_missing(
    store: &dyn BackupStore,
    name: &str,
    path: &Path,
    attempts: u32,
    delay: Duration,
) -> Result<bool, BackupError> {
    if path.exists() {
        return Ok(false);
    }
    let Some(bytes) = with_retry(name, attempts, delay, || store.download(name)).await? else {
        return Ok(false);
    };

    let io = |source: std::io::Error| BackupError::Io {
        name: name.to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io)?;
    }
    fs::write(path, &bytes).map_err(io)?;
    tracing::info!(name, bytes = bytes.len(), "restored database from backup");
    Ok(true)
}
