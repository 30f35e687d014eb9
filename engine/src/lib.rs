//! # Driftwatch Engine
//!
//! Deterministic core of a local-to-cloud consistency checker.
//!
//! A local store is the source of truth and a cloud store is a replica that
//! converges with bounded propagation delay. This crate holds the logic that
//! decides, for one time window of local records, which cloud records match,
//! which are wrong, and which are merely not replicated yet.
//!
//! ## Design Principles
//!
//! - **No IO**: Engine has no knowledge of databases, files or clocks
//! - **Deterministic**: Same inputs always produce same outputs
//! - **Testable**: Pure logic, no mocks needed
//!
//! ## Core Concepts
//!
//! ### Windows
//!
//! Local data is walked forward in fixed-width [`Window`]s. A window only
//! advances after it was compared successfully, and its start time is what
//! gets checkpointed (see [`checkpoint`]).
//!
//! ### Comparison
//!
//! [`compare`] classifies a `(cloud, local)` pair for a given [`Pass`]:
//! - On the [`Pass::Bulk`] pass a stale or missing cloud record is
//!   [`Comparison::Pending`], since it may simply not have replicated yet
//! - On the [`Pass::Reload`] pass the cloud record is authoritative and the
//!   result is always [`Verdict::Match`] or [`Verdict::Mismatch`]
//!
//! ### Two-phase window comparison
//!
//! [`WindowComparison`] is a small state machine:
//! `Loaded -> BulkCompared -> (Resolved | PendingResolution) -> Resolved`.
//! The caller fetches cloud data between the states.
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use driftwatch_engine::{CloudRecord, LocalRecord, Progress, WindowComparison};
//! use serde_json::json;
//!
//! let t = |s| Utc.timestamp_opt(s, 0).unwrap();
//! let local = vec![LocalRecord::new(1, json!({"name": "A"}), t(100))];
//!
//! // Bulk pass: cloud copy is older than local, so the result is inconclusive
//! let bulk = vec![CloudRecord::new(1, json!({"name": "A"}), t(50), 1)];
//! let compared = WindowComparison::load(local).compare_bulk(bulk);
//! assert_eq!(compared.pending_ids(), vec![1]);
//!
//! // Reload pass: fresh cloud copy resolves it
//! let pending = match compared.finish() {
//!     Progress::PendingResolution(p) => p,
//!     Progress::Resolved(_) => unreachable!(),
//! };
//! let reloaded = vec![CloudRecord::new(1, json!({"name": "A"}), t(150), 2)];
//! let resolved = pending.resolve(reloaded);
//! assert!(resolved.divergences().is_empty());
//! ```

pub mod batch;
pub mod checkpoint;
pub mod compare;
pub mod error;
pub mod phase;
pub mod record;
pub mod window;

// Re-export main types at crate root
pub use batch::BatchPlan;
pub use compare::{compare, compare_bulk, compare_reload, diff_fields, Comparison, Pass, Verdict};
pub use error::Error;
pub use phase::{
    BulkCompared, Divergence, Loaded, PendingResolution, Progress, Resolved, WindowComparison,
};
pub use record::{CloudRecord, LocalRecord};
pub use window::{ConsistencyDelay, Window};

/// Type aliases for clarity
pub type RecordId = i64;
pub type Timestamp = chrono::DateTime<chrono::Utc>;
pub type Revision = i64;
