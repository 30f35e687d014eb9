//! Miss-tolerant bulk loading of cloud records.

use std::time::Duration;

use driftwatch_engine::{BatchPlan, CloudRecord, Error as EngineError, RecordId};
use futures::stream::{self, StreamExt};

use crate::clock::Clock;
use crate::store::CloudStore;

/// Batches in flight at once unless configured otherwise.
pub const DEFAULT_CONCURRENCY: usize = 4;

const BACKOFF_BASE: Duration = Duration::from_millis(100);
const BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Loads cloud records in bounded batches.
///
/// A batch call that fails outright is retried as a whole, up to `retry`
/// extra attempts with exponential backoff in between; after that its ids
/// count as misses. Ids the store does not return are misses too. Loading
/// never fails.
#[derive(Debug, Clone, Copy)]
pub struct BatchLoader {
    batch_size: usize,
    retry: u32,
    concurrency: usize,
}

impl BatchLoader {
    pub fn new(batch_size: usize, retry: u32) -> Result<Self, EngineError> {
        if batch_size == 0 {
            return Err(EngineError::InvalidBatchSize);
        }
        Ok(Self {
            batch_size,
            retry,
            concurrency: DEFAULT_CONCURRENCY,
        })
    }

    /// Cap the number of batch reads in flight; at least one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Fetch every record that could be found for `ids`.
    pub async fn load<C, T>(&self, cloud: &C, clock: &T, ids: &[RecordId]) -> Vec<CloudRecord>
    where
        C: CloudStore,
        T: Clock,
    {
        let plan = match BatchPlan::new(ids, self.batch_size) {
            Ok(plan) => plan,
            Err(_) => return Vec::new(),
        };

        let batches = plan.batches();
        let found: Vec<CloudRecord> = stream::iter(batches.iter())
            .map(|batch| self.load_batch(cloud, clock, batch))
            .buffer_unordered(self.concurrency)
            .flat_map(stream::iter)
            .collect()
            .await;

        tracing::debug!(
            requested = ids.len(),
            batches = batches.len(),
            found = found.len(),
            "Bulk loaded cloud records"
        );
        found
    }

    async fn load_batch<C, T>(&self, cloud: &C, clock: &T, batch: &[RecordId]) -> Vec<CloudRecord>
    where
        C: CloudStore,
        T: Clock,
    {
        let attempts = self.retry.saturating_add(1);
        for attempt in 1..=attempts {
            match cloud.batch_get(batch).await {
                Ok(records) => return records,
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt,
                        attempts = attempts,
                        batch_len = batch.len(),
                        error = %e,
                        "Cloud batch read failed"
                    );
                }
            }
            if attempt < attempts {
                let delay = backoff(attempt);
                tracing::debug!(
                    attempt = attempt,
                    backoff_ms = delay.as_millis() as u64,
                    "Retrying cloud batch read"
                );
                clock.sleep(delay).await;
            }
        }

        tracing::error!(
            first_id = ?batch.first(),
            batch_len = batch.len(),
            "Cloud batch read gave up, treating batch as missing"
        );
        Vec::new()
    }
}

/// Wait before retry number `attempt` (1-based): doubles from
/// `BACKOFF_BASE`, capped at `BACKOFF_MAX`.
fn backoff(attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    BACKOFF_BASE.saturating_mul(factor).min(BACKOFF_MAX)
}
