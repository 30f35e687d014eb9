//! Two-phase comparison of one window against the cloud.
//!
//! Drives the engine's [`WindowComparison`] state machine: bulk load through
//! the [`BatchLoader`], bulk pass, then an authoritative reload of only the
//! pending ids. Divergences are reported as soon as they are final and, when
//! repair is enabled, overwritten in the cloud on a best-effort basis.

use driftwatch_engine::{Divergence, LocalRecord, Pass, Progress, WindowComparison};
use serde::Serialize;

use crate::clock::Clock;
use crate::error::Result;
use crate::loader::BatchLoader;
use crate::sink::DiffSink;
use crate::store::CloudStore;

/// Counters for one window attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowReport {
    pub total: usize,
    pub matched: usize,
    pub pending: usize,
    pub mismatched: usize,
    pub repaired: usize,
    pub repair_failed: usize,
}

/// Compares windows of local records against the cloud.
pub struct WindowReconciler<'a, C, S, T> {
    cloud: &'a C,
    sink: &'a S,
    clock: &'a T,
    loader: BatchLoader,
    fix: bool,
}

impl<'a, C: CloudStore, S: DiffSink, T: Clock> WindowReconciler<'a, C, S, T> {
    pub fn new(cloud: &'a C, sink: &'a S, clock: &'a T, loader: BatchLoader, fix: bool) -> Self {
        Self {
            cloud,
            sink,
            clock,
            loader,
            fix,
        }
    }

    /// Compare one window.
    ///
    /// `report` is updated as work completes, so it also reflects what was
    /// reported before a failure. Only the pending reload can fail.
    pub async fn reconcile(
        &self,
        locals: Vec<LocalRecord>,
        report: &mut WindowReport,
    ) -> Result<()> {
        let loaded = WindowComparison::load(locals);
        report.total = loaded.len();

        let cloud = self.loader.load(self.cloud, self.clock, &loaded.ids()).await;
        let compared = loaded.compare_bulk(cloud);
        for divergence in compared.divergences() {
            self.handle(divergence, report).await;
        }

        let resolved = match compared.finish() {
            Progress::Resolved(resolved) => resolved,
            Progress::PendingResolution(pending) => {
                let ids = pending.ids();
                report.pending = pending.len();
                tracing::debug!(
                    pending = pending.len(),
                    ids = ids.len(),
                    "Reloading pending cloud records"
                );

                let reloaded = self.cloud.get(&ids).await?;
                let resolved = pending.resolve(reloaded);
                for divergence in resolved.divergences_in(Pass::Reload) {
                    self.handle(divergence, report).await;
                }
                resolved
            }
        };

        report.matched = resolved.matched();
        Ok(())
    }

    async fn handle(&self, divergence: &Divergence, report: &mut WindowReport) {
        report.mismatched += 1;
        self.sink.record(divergence).await;

        if !self.fix {
            return;
        }
        let repair = divergence.repair();
        match self.cloud.put(&repair, divergence.cloud.as_ref()).await {
            Ok(()) => {
                report.repaired += 1;
                tracing::info!(id = repair.id, "Repaired cloud record");
            }
            Err(e) => {
                report.repair_failed += 1;
                tracing::error!(id = repair.id, error = %e, "Failed to repair cloud record");
            }
        }
    }
}
