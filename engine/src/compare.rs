//! Comparison of a cloud record against its local source.
//!
//! The local store is ground truth. A cloud record can only ever be
//! classified as matching, mismatching, or (on the bulk pass) pending: its
//! snapshot predates the local change or is missing, so it may simply not
//! have replicated yet.
//!
//! # Rules
//!
//! | cloud                        | bulk pass  | reload pass          |
//! |------------------------------|------------|----------------------|
//! | absent                       | `Pending`  | `Mismatch`           |
//! | `modified_at < local`        | `Pending`  | payload comparison   |
//! | `modified_at >= local`       | payload comparison | payload comparison |
//!
//! Payload comparison is field by field and ignores timestamps and the cloud
//! revision.

use crate::{CloudRecord, LocalRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Name reported for a payload that is not a JSON object.
const WHOLE_PAYLOAD: &str = "$";

/// Which comparison pass is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Pass {
    /// First pass against a miss-tolerant bulk snapshot
    Bulk,
    /// Second pass against a fresh, authoritative reload
    Reload,
}

/// Outcome of comparing one record on any pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Comparison {
    Match,
    Mismatch,
    /// Inconclusive until the cloud record is reloaded (bulk pass only)
    Pending,
}

/// Outcome of comparing one record on the reload pass.
///
/// No `Pending` variant: once a record has been reloaded it is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Verdict {
    Match,
    Mismatch,
}

impl From<Verdict> for Comparison {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Match => Comparison::Match,
            Verdict::Mismatch => Comparison::Mismatch,
        }
    }
}

/// Compare `cloud` (or its absence) against `local` on the given pass.
pub fn compare(cloud: Option<&CloudRecord>, local: &LocalRecord, pass: Pass) -> Comparison {
    match pass {
        Pass::Bulk => compare_bulk(cloud, local),
        Pass::Reload => compare_reload(cloud, local).into(),
    }
}

/// Bulk-pass comparison. Missing or stale cloud records are `Pending`.
pub fn compare_bulk(cloud: Option<&CloudRecord>, local: &LocalRecord) -> Comparison {
    match cloud {
        None => Comparison::Pending,
        Some(cloud) if cloud.modified_at < local.modified_at => Comparison::Pending,
        Some(cloud) => payload_verdict(cloud, local).into(),
    }
}

/// Reload-pass comparison. The reloaded record is taken as authoritative.
pub fn compare_reload(cloud: Option<&CloudRecord>, local: &LocalRecord) -> Verdict {
    match cloud {
        None => Verdict::Mismatch,
        Some(cloud) => payload_verdict(cloud, local),
    }
}

fn payload_verdict(cloud: &CloudRecord, local: &LocalRecord) -> Verdict {
    if diff_fields(&cloud.payload, &local.payload).is_empty() {
        Verdict::Match
    } else {
        Verdict::Mismatch
    }
}

/// Names of the payload fields whose values differ, in sorted order.
///
/// A field present on only one side counts as differing. Payloads that are
/// not both JSON objects are compared as whole values and reported as `$`.
pub fn diff_fields(cloud: &serde_json::Value, local: &serde_json::Value) -> Vec<String> {
    match (cloud.as_object(), local.as_object()) {
        (Some(cloud), Some(local)) => {
            let keys: BTreeSet<&String> = cloud.keys().chain(local.keys()).collect();
            keys.into_iter()
                .filter(|key| cloud.get(*key) != local.get(*key))
                .cloned()
                .collect()
        }
        _ if cloud == local => Vec::new(),
        _ => vec![WHOLE_PAYLOAD.to_string()],
    }
}
