//! Two-phase comparison of one window.
//!
//! ```text
//! Loaded --compare_bulk--> BulkCompared --finish--> Resolved
//!                                           \
//!                                            --> PendingResolution --resolve--> Resolved
//! ```
//!
//! Each state only exposes the operations legal at that point, so the
//! `Pending` outcome cannot leak past the bulk pass: [`PendingResolution`]
//! compares with [`compare_reload`], whose result type has no pending case.
//! Fetching cloud data between the states is the caller's job.

use crate::compare::{compare_bulk, compare_reload, diff_fields, Comparison, Pass, Verdict};
use crate::{CloudRecord, LocalRecord, RecordId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// A permanent divergence between a local record and its cloud copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Divergence {
    pub local: LocalRecord,
    /// `None` when the cloud has no record with this id
    pub cloud: Option<CloudRecord>,
    /// Differing payload fields (empty when `cloud` is absent)
    pub fields: Vec<String>,
    /// Pass on which the divergence was detected
    pub pass: Pass,
}

impl Divergence {
    fn new(local: LocalRecord, cloud: Option<CloudRecord>, pass: Pass) -> Self {
        let fields = cloud
            .as_ref()
            .map(|c| diff_fields(&c.payload, &local.payload))
            .unwrap_or_default();
        Self {
            local,
            cloud,
            fields,
            pass,
        }
    }

    pub fn id(&self) -> RecordId {
        self.local.id
    }

    /// Whether the cloud record was reloaded before being judged.
    pub fn was_reloaded(&self) -> bool {
        self.pass == Pass::Reload
    }

    /// The cloud record that overwrites the divergent one.
    pub fn repair(&self) -> CloudRecord {
        CloudRecord::repaired_from(&self.local, self.cloud.as_ref())
    }
}

/// Entry point of the state machine.
pub struct WindowComparison;

impl WindowComparison {
    /// Start comparing the local records of one window.
    pub fn load(locals: Vec<LocalRecord>) -> Loaded {
        Loaded { locals }
    }
}

/// Local records loaded, nothing compared yet.
#[derive(Debug, Clone)]
pub struct Loaded {
    locals: Vec<LocalRecord>,
}

impl Loaded {
    /// Ids to bulk-load from the cloud, in local order without duplicates.
    pub fn ids(&self) -> Vec<RecordId> {
        unique_ids(&self.locals)
    }

    pub fn len(&self) -> usize {
        self.locals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locals.is_empty()
    }

    /// Run the bulk pass against whatever the cloud returned.
    ///
    /// Ids missing from `cloud` are treated as absent.
    pub fn compare_bulk(self, cloud: impl IntoIterator<Item = CloudRecord>) -> BulkCompared {
        let by_id = index(cloud);
        let total = self.locals.len();
        let mut matched = 0;
        let mut divergences = Vec::new();
        let mut pending = Vec::new();

        for local in self.locals {
            let cloud = by_id.get(&local.id);
            match compare_bulk(cloud, &local) {
                Comparison::Match => matched += 1,
                Comparison::Mismatch => {
                    divergences.push(Divergence::new(local, cloud.cloned(), Pass::Bulk))
                }
                Comparison::Pending => pending.push(local),
            }
        }

        BulkCompared {
            total,
            matched,
            divergences,
            pending,
        }
    }
}

/// Bulk pass done; mismatches are final, pending records await a reload.
#[derive(Debug, Clone)]
pub struct BulkCompared {
    total: usize,
    matched: usize,
    divergences: Vec<Divergence>,
    pending: Vec<LocalRecord>,
}

impl BulkCompared {
    /// Mismatches found on the bulk pass.
    pub fn divergences(&self) -> &[Divergence] {
        &self.divergences
    }

    /// Ids whose bulk result was inconclusive.
    pub fn pending_ids(&self) -> Vec<RecordId> {
        unique_ids(&self.pending)
    }

    /// Move on: resolved outright if nothing is pending.
    pub fn finish(self) -> Progress {
        if self.pending.is_empty() {
            Progress::Resolved(Resolved {
                total: self.total,
                matched: self.matched,
                pending: 0,
                divergences: self.divergences,
            })
        } else {
            Progress::PendingResolution(PendingResolution { inner: self })
        }
    }
}

/// Where a window goes after the bulk pass.
#[derive(Debug, Clone)]
pub enum Progress {
    Resolved(Resolved),
    PendingResolution(PendingResolution),
}

/// Waiting for the pending ids to be reloaded from the cloud.
#[derive(Debug, Clone)]
pub struct PendingResolution {
    inner: BulkCompared,
}

impl PendingResolution {
    /// Ids to reload. Never empty.
    pub fn ids(&self) -> Vec<RecordId> {
        self.inner.pending_ids()
    }

    /// Pending records, counting a duplicated id once per record.
    pub fn len(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.pending.is_empty()
    }

    /// Judge every pending record against its reloaded cloud copy.
    ///
    /// A pending id missing from `reloaded` is a mismatch.
    pub fn resolve(self, reloaded: impl IntoIterator<Item = CloudRecord>) -> Resolved {
        let by_id = index(reloaded);
        let BulkCompared {
            total,
            mut matched,
            mut divergences,
            pending,
        } = self.inner;
        let pending_count = pending.len();

        for local in pending {
            let cloud = by_id.get(&local.id);
            match compare_reload(cloud, &local) {
                Verdict::Match => matched += 1,
                Verdict::Mismatch => {
                    divergences.push(Divergence::new(local, cloud.cloned(), Pass::Reload))
                }
            }
        }

        Resolved {
            total,
            matched,
            pending: pending_count,
            divergences,
        }
    }
}

/// Every record of the window has a final verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    total: usize,
    matched: usize,
    pending: usize,
    divergences: Vec<Divergence>,
}

impl Resolved {
    /// Number of local records compared.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn matched(&self) -> usize {
        self.matched
    }

    /// Records that needed the reload pass.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// All divergences, bulk pass first.
    pub fn divergences(&self) -> &[Divergence] {
        &self.divergences
    }

    /// Divergences found on one pass.
    pub fn divergences_in(&self, pass: Pass) -> impl Iterator<Item = &Divergence> {
        self.divergences.iter().filter(move |d| d.pass == pass)
    }
}

fn index(records: impl IntoIterator<Item = CloudRecord>) -> HashMap<RecordId, CloudRecord> {
    records.into_iter().map(|r| (r.id, r)).collect()
}

fn unique_ids(records: &[LocalRecord]) -> Vec<RecordId> {
    let mut seen = BTreeSet::new();
    records
        .iter()
        .map(|r| r.id)
        .filter(|id| seen.insert(*id))
        .collect()
}
