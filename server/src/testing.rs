//! In-memory stores and a virtual clock for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{TimeDelta, TimeZone, Utc};
use driftwatch_engine::{CloudRecord, Divergence, LocalRecord, RecordId, Timestamp, Window};
use serde_json::json;

use crate::checkpoint::Checkpoint;
use crate::clock::Clock;
use crate::error::{AppError, Result};
use crate::sink::DiffSink;
use crate::store::{CloudStore, LocalStore};

pub fn ts(secs: i64) -> Timestamp {
    Utc.timestamp_opt(secs, 0).unwrap()
}

pub fn local_record(id: RecordId, modified: i64, field: &str) -> LocalRecord {
    LocalRecord::new(id, json!({"field": field}), ts(modified))
}

pub fn cloud_record(id: RecordId, modified: i64, field: &str) -> CloudRecord {
    CloudRecord::new(id, json!({"field": field}), ts(modified), 1)
}

fn injected(what: &str) -> AppError {
    AppError::Io(std::io::Error::other(what.to_string()))
}

/// Take one unit from a failure budget, returning whether to fail.
fn consume(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Debug, Default)]
pub struct MemoryLocal {
    records: Vec<LocalRecord>,
    failures: AtomicU32,
    ranges: Mutex<Vec<Window>>,
}

impl MemoryLocal {
    pub fn with_records(records: impl IntoIterator<Item = LocalRecord>) -> Self {
        Self {
            records: records.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn fail_ranges(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Windows successfully read, in order.
    pub fn ranges(&self) -> Vec<Window> {
        self.ranges.lock().unwrap().clone()
    }
}

impl LocalStore for MemoryLocal {
    async fn range(&self, window: &Window) -> Result<Vec<LocalRecord>> {
        if consume(&self.failures) {
            return Err(injected("local range unavailable"));
        }
        self.ranges.lock().unwrap().push(*window);
        let mut records: Vec<_> = self
            .records
            .iter()
            .filter(|r| window.contains(r.modified_at))
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.modified_at, r.id));
        Ok(records)
    }
}

/// Cloud store with a lagging replica (bulk reads) and a primary
/// (reloads and repairs).
#[derive(Debug, Default)]
pub struct MemoryCloud {
    replica: Mutex<HashMap<RecordId, CloudRecord>>,
    primary: Mutex<HashMap<RecordId, CloudRecord>>,
    batch_calls: AtomicU32,
    batch_failures: AtomicU32,
    get_calls: AtomicU32,
    get_failures: AtomicU32,
    put_failures: AtomicU32,
    puts: Mutex<Vec<(CloudRecord, Option<CloudRecord>)>>,
}

impl MemoryCloud {
    pub fn with_records(records: impl IntoIterator<Item = CloudRecord>) -> Self {
        let map: HashMap<_, _> = records.into_iter().map(|r| (r.id, r)).collect();
        Self {
            replica: Mutex::new(map.clone()),
            primary: Mutex::new(map),
            ..Self::default()
        }
    }

    /// Change the primary only, as if the replica had not caught up yet.
    pub fn set_primary(&self, record: CloudRecord) {
        self.primary.lock().unwrap().insert(record.id, record);
    }

    pub fn fail_batch_calls(&self, n: u32) {
        self.batch_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_gets(&self, n: u32) {
        self.get_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_puts(&self, n: u32) {
        self.put_failures.store(n, Ordering::SeqCst);
    }

    pub fn batch_calls(&self) -> u32 {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> u32 {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn puts(&self) -> Vec<(CloudRecord, Option<CloudRecord>)> {
        self.puts.lock().unwrap().clone()
    }

    pub fn primary(&self, id: RecordId) -> Option<CloudRecord> {
        self.primary.lock().unwrap().get(&id).cloned()
    }

    fn read(map: &Mutex<HashMap<RecordId, CloudRecord>>, ids: &[RecordId]) -> Vec<CloudRecord> {
        let map = map.lock().unwrap();
        ids.iter().filter_map(|id| map.get(id).cloned()).collect()
    }
}

impl CloudStore for MemoryCloud {
    async fn batch_get(&self, ids: &[RecordId]) -> Result<Vec<CloudRecord>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if consume(&self.batch_failures) {
            return Err(injected("cloud batch unavailable"));
        }
        Ok(Self::read(&self.replica, ids))
    }

    async fn get(&self, ids: &[RecordId]) -> Result<Vec<CloudRecord>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if consume(&self.get_failures) {
            return Err(injected("cloud get unavailable"));
        }
        Ok(Self::read(&self.primary, ids))
    }

    async fn put(&self, record: &CloudRecord, original: Option<&CloudRecord>) -> Result<()> {
        if consume(&self.put_failures) {
            return Err(injected("cloud put rejected"));
        }
        self.puts
            .lock()
            .unwrap()
            .push((record.clone(), original.cloned()));
        // Upsert on the primary whatever its current revision; the replica
        // catches up on its own.
        let mut primary = self.primary.lock().unwrap();
        let revision = primary.get(&record.id).map_or(1, |current| current.revision + 1);
        let mut written = record.clone();
        written.revision = revision;
        primary.insert(written.id, written);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    divergences: Mutex<Vec<Divergence>>,
}

impl RecordingSink {
    pub fn divergences(&self) -> Vec<Divergence> {
        self.divergences.lock().unwrap().clone()
    }
}

impl DiffSink for RecordingSink {
    async fn record(&self, divergence: &Divergence) {
        self.divergences.lock().unwrap().push(divergence.clone());
    }
}

#[derive(Debug, Default)]
pub struct MemoryCheckpoint {
    saves: Mutex<Vec<Timestamp>>,
    failures: AtomicU32,
}

impl MemoryCheckpoint {
    pub fn fail_saves(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Successfully saved window starts, in order.
    pub fn saves(&self) -> Vec<Timestamp> {
        self.saves.lock().unwrap().clone()
    }
}

impl Checkpoint for MemoryCheckpoint {
    async fn save(&self, start: Timestamp) -> Result<()> {
        if consume(&self.failures) {
            return Err(injected("checkpoint write failed"));
        }
        self.saves.lock().unwrap().push(start);
        Ok(())
    }
}

/// Virtual clock: sleeping advances "now" instantly and is recorded.
#[derive(Debug)]
pub struct FakeClock {
    now: Mutex<Timestamp>,
    sleeps: Mutex<Vec<Duration>>,
}

impl FakeClock {
    pub fn at(now: Timestamp) -> Self {
        Self {
            now: Mutex::new(now),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        let delta = TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX);
        let mut now = self.now.lock().unwrap();
        *now += delta;
    }
}
