//! Where divergences are reported for human review.

use std::future::Future;
use std::path::{Path, PathBuf};

use driftwatch_engine::checkpoint::format_checkpoint;
use driftwatch_engine::Divergence;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::Result;

/// Receives every divergence the reconciler finds.
pub trait DiffSink: Send + Sync {
    fn record(&self, divergence: &Divergence) -> impl Future<Output = ()> + Send;
}

/// One line of the JSONL diff log.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DiffLine<'a> {
    id: i64,
    reloaded: bool,
    fields: &'a [String],
    local: &'a driftwatch_engine::LocalRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    cloud: Option<&'a driftwatch_engine::CloudRecord>,
}

/// Logs divergences through tracing and, optionally, to a JSONL file.
#[derive(Debug)]
pub struct DiffLog {
    file: Option<(PathBuf, Mutex<tokio::fs::File>)>,
}

impl DiffLog {
    /// Tracing only.
    pub fn tracing_only() -> Self {
        Self { file: None }
    }

    /// Tracing plus one JSON object per line appended to `path`.
    pub async fn with_file(path: &Path) -> Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            file: Some((path.to_path_buf(), Mutex::new(file))),
        })
    }

    async fn append(&self, divergence: &Divergence) {
        let Some((path, file)) = &self.file else {
            return;
        };

        let line = DiffLine {
            id: divergence.id(),
            reloaded: divergence.was_reloaded(),
            fields: &divergence.fields,
            local: &divergence.local,
            cloud: divergence.cloud.as_ref(),
        };
        let mut bytes = match serde_json::to_vec(&line) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(id = divergence.id(), error = %e, "Failed to encode diff line");
                return;
            }
        };
        bytes.push(b'\n');

        let mut file = file.lock().await;
        let written = match file.write_all(&bytes).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            tracing::error!(path = %path.display(), error = %e, "Failed to append diff line");
        }
    }
}

impl DiffSink for DiffLog {
    async fn record(&self, divergence: &Divergence) {
        let local = &divergence.local;
        match &divergence.cloud {
            Some(cloud) => tracing::warn!(
                id = local.id,
                reloaded = divergence.was_reloaded(),
                fields = ?divergence.fields,
                local_modified = %format_checkpoint(local.modified_at),
                cloud_modified = %format_checkpoint(cloud.modified_at),
                local = %local.payload,
                cloud = %cloud.payload,
                "Cloud record differs from local"
            ),
            None => tracing::warn!(
                id = local.id,
                reloaded = divergence.was_reloaded(),
                local_modified = %format_checkpoint(local.modified_at),
                local = %local.payload,
                "Cloud record missing"
            ),
        }
        self.append(divergence).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use driftwatch_engine::{CloudRecord, LocalRecord, Progress, WindowComparison};
    use serde_json::json;

    fn divergence() -> Divergence {
        let t = |s| Utc.timestamp_opt(s, 0).unwrap();
        let compared = WindowComparison::load(vec![LocalRecord::new(
            9,
            json!({"name": "A"}),
            t(100),
        )])
        .compare_bulk(vec![CloudRecord::new(9, json!({"name": "B"}), t(200), 4)]);
        match compared.finish() {
            Progress::Resolved(resolved) => resolved.divergences()[0].clone(),
            Progress::PendingResolution(_) => panic!("expected a bulk mismatch"),
        }
    }

    #[tokio::test]
    async fn jsonl_log_appends_one_line_per_divergence() {
        let dir = std::env::temp_dir().join(format!("driftwatch-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("diff.jsonl");

        let log = DiffLog::with_file(&path).await.unwrap();
        let d = divergence();
        log.record(&d).await;
        log.record(&d).await;

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["id"], 9);
        assert_eq!(parsed["reloaded"], false);
        assert_eq!(parsed["fields"], json!(["name"]));
        assert_eq!(parsed["cloud"]["revision"], 4);
    }

    #[tokio::test]
    async fn tracing_only_log_writes_nothing() {
        let log = DiffLog::tracing_only();
        log.record(&divergence()).await;
        assert!(log.file.is_none());
    }
}
