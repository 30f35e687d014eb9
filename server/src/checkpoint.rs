//! Durable checkpoint of the current window start.
//!
//! The checkpoint file holds a single line in the engine's checkpoint format
//! and is replaced wholesale on every save (write to a temp file, then
//! rename). A missing, truncated or otherwise unreadable file on startup is
//! not an error: the loop falls back to its configured start time.

use std::future::Future;
use std::path::PathBuf;

use driftwatch_engine::checkpoint::{format_checkpoint, parse_checkpoint};
use driftwatch_engine::Timestamp;

use crate::error::{AppError, Result};

/// Where the loop records its progress.
pub trait Checkpoint: Send + Sync {
    fn save(&self, start: Timestamp) -> impl Future<Output = Result<()>> + Send;
}

/// Checkpoint stored in a plain file.
#[derive(Debug, Clone)]
pub struct FileCheckpoint {
    path: PathBuf,
}

impl FileCheckpoint {
    /// Open the checkpoint at `path`.
    ///
    /// Returns the window start stored there, if it can be resumed. Fails
    /// when the location is not writable.
    pub async fn open(path: impl Into<PathBuf>) -> Result<(Self, Option<Timestamp>)> {
        let checkpoint = Self { path: path.into() };
        let resumed = checkpoint.load().await;

        let probe = checkpoint.temp_path();
        let written = tokio::fs::write(&probe, b"").await;
        let _ = tokio::fs::remove_file(&probe).await;
        written.map_err(|source| AppError::Checkpoint {
            path: checkpoint.path.clone(),
            source,
        })?;

        tracing::info!(path = %checkpoint.path.display(), "Opened checkpoint");
        Ok((checkpoint, resumed))
    }

    async fn load(&self) -> Option<Timestamp> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Unreadable checkpoint, ignoring"
                );
                return None;
            }
        };

        match parse_checkpoint(&text) {
            Ok(start) => {
                tracing::info!(start = %format_checkpoint(start), "Resuming from checkpoint");
                Some(start)
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Corrupt checkpoint, ignoring"
                );
                None
            }
        }
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.path
            .with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()))
    }
}

impl Checkpoint for FileCheckpoint {
    async fn save(&self, start: Timestamp) -> Result<()> {
        let temp = self.temp_path();
        tokio::fs::write(&temp, format_checkpoint(start)).await?;
        if let Err(e) = tokio::fs::rename(&temp, &self.path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }
}
