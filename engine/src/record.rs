//! Record types read from the local and cloud stores.

use crate::{RecordId, Revision, Timestamp};
use serde::{Deserialize, Serialize};

/// A record read from the authoritative local store.
///
/// Immutable snapshot for the window it was loaded in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalRecord {
    /// Unique identifier, shared with the cloud copy
    pub id: RecordId,
    /// Record fields (JSON object)
    pub payload: serde_json::Value,
    /// Last modification time in the local store
    pub modified_at: Timestamp,
}

impl LocalRecord {
    /// Create a new local record.
    pub fn new(id: RecordId, payload: serde_json::Value, modified_at: Timestamp) -> Self {
        Self {
            id,
            payload,
            modified_at,
        }
    }
}

/// A record read from the replicated cloud store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudRecord {
    /// Unique identifier, shared with the local copy
    pub id: RecordId,
    /// Record fields (JSON object)
    pub payload: serde_json::Value,
    /// Last modification time in the cloud store
    pub modified_at: Timestamp,
    /// Cloud-side revision, bumped by every repair write
    pub revision: Revision,
}

impl CloudRecord {
    /// Create a new cloud record.
    pub fn new(
        id: RecordId,
        payload: serde_json::Value,
        modified_at: Timestamp,
        revision: Revision,
    ) -> Self {
        Self {
            id,
            payload,
            modified_at,
            revision,
        }
    }

    /// Build the cloud record that overwrites `original` with the local values.
    ///
    /// Payload and modification time come from `local`. The revision is the
    /// one that was read: the original's when the cloud record exists, zero
    /// when it has to be inserted. The store assigns the written revision.
    pub fn repaired_from(local: &LocalRecord, original: Option<&CloudRecord>) -> Self {
        Self {
            id: local.id,
            payload: local.payload.clone(),
            modified_at: local.modified_at,
            revision: original.map(|c| c.revision).unwrap_or(0),
        }
    }
}
