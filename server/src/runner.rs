//! The reconciliation loop.
//!
//! Walks the time axis one window per successful iteration:
//!
//! 1. Wait the loop interval
//! 2. Advance the window, but only if the previous iteration succeeded
//! 3. Checkpoint the window start
//! 4. Stop once the window starts after the configured end time
//! 5. If the window is still inside the replication lag budget, sleep out
//!    the remainder and retry the same window on the next tick
//! 6. Load local records, 7. compare them, 8. mark success
//!
//! Any store failure skips to the next tick with the window unchanged, so
//! every window is eventually compared successfully exactly once.

use std::path::PathBuf;
use std::time::Duration;

use driftwatch_engine::checkpoint::format_checkpoint;
use driftwatch_engine::{ConsistencyDelay, Timestamp, Window};
use serde::Serialize;
use tokio::sync::watch;

use crate::checkpoint::Checkpoint;
use crate::clock::{wait, Clock, Shutdown};
use crate::config::ReconcileConfig;
use crate::error::Result;
use crate::loader::BatchLoader;
use crate::reconciler::{WindowReconciler, WindowReport};
use crate::sink::DiffSink;
use crate::store::{CloudStore, LocalStore};

/// Progress and counters of one loop, owned by the loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopState {
    pub window: Window,
    /// Local records in the last loaded window
    pub range_count: usize,
    pub total_count: u64,
    pub diff_count: u64,
    pub pending_count: u64,
    pub repaired_count: u64,
    pub repair_failed_count: u64,
    pub windows_completed: u64,
    pub consecutive_failures: u64,
    pub sleeping: bool,
    pub sleeping_secs: i64,
    pub sleep_from: Option<Timestamp>,
    pub finished: bool,
    pub checkpoint_path: PathBuf,
    /// Set by a successful iteration, consumed by the next one
    #[serde(skip)]
    advance: bool,
}

impl LoopState {
    pub fn new(window: Window, checkpoint_path: PathBuf) -> Self {
        Self {
            window,
            range_count: 0,
            total_count: 0,
            diff_count: 0,
            pending_count: 0,
            repaired_count: 0,
            repair_failed_count: 0,
            windows_completed: 0,
            consecutive_failures: 0,
            sleeping: false,
            sleeping_secs: 0,
            sleep_from: None,
            finished: false,
            checkpoint_path,
            advance: false,
        }
    }

    fn absorb(&mut self, report: &WindowReport) {
        self.diff_count += report.mismatched as u64;
        self.pending_count += report.pending as u64;
        self.repaired_count += report.repaired as u64;
        self.repair_failed_count += report.repair_failed as u64;
    }

    fn fail(&mut self) {
        self.consecutive_failures += 1;
    }

    fn succeed(&mut self) {
        self.advance = true;
        self.windows_completed += 1;
        self.consecutive_failures = 0;
    }

    fn wake(&mut self) {
        self.sleeping = false;
        self.sleeping_secs = 0;
        self.sleep_from = None;
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// The window passed the configured end time
    Finished,
    /// Shutdown was requested
    Shutdown,
}

enum Tick {
    Continue,
    Finished,
    Shutdown,
}

/// One reconciliation loop over a local/cloud pair.
pub struct ReconcileLoop<L, C, S, K, T> {
    local: L,
    cloud: C,
    sink: S,
    checkpoint: K,
    clock: T,
    config: ReconcileConfig,
    loader: BatchLoader,
    delay: ConsistencyDelay,
    status: watch::Sender<LoopState>,
}

impl<L, C, S, K, T> ReconcileLoop<L, C, S, K, T>
where
    L: LocalStore,
    C: CloudStore,
    S: DiffSink,
    K: Checkpoint,
    T: Clock,
{
    /// Build a loop starting at `start`.
    ///
    /// Returns the loop and a receiver that observes its state.
    pub fn new(
        local: L,
        cloud: C,
        sink: S,
        checkpoint: K,
        clock: T,
        config: ReconcileConfig,
        start: Timestamp,
    ) -> Result<(Self, watch::Receiver<LoopState>)> {
        let window = Window::new(start, config.step)?;
        let loader = BatchLoader::new(config.batch_size, config.batch_retry)?
            .with_concurrency(config.batch_concurrency);
        let delay = ConsistencyDelay::new(config.delay);
        let (status, rx) = watch::channel(LoopState::new(window, config.checkpoint_path.clone()));

        Ok((
            Self {
                local,
                cloud,
                sink,
                checkpoint,
                clock,
                config,
                loader,
                delay,
                status,
            },
            rx,
        ))
    }

    /// Run until the end time is passed or shutdown is requested.
    pub async fn run(&self, mut shutdown: Shutdown) -> Exit {
        let mut state = self.status.borrow().clone();
        tracing::info!(
            start = %format_checkpoint(state.window.start),
            step_secs = self.config.step.num_seconds(),
            delay_secs = self.delay.duration().num_seconds(),
            fix = self.config.fix,
            "Reconciliation loop started"
        );

        loop {
            if !wait(&self.clock, &mut shutdown, self.config.loop_interval).await {
                tracing::info!("Reconciliation loop stopped by shutdown");
                return Exit::Shutdown;
            }

            let tick = self.tick(&mut state, &mut shutdown).await;
            self.publish(&state);

            match tick {
                Tick::Continue => {}
                Tick::Finished => return Exit::Finished,
                Tick::Shutdown => {
                    tracing::info!("Reconciliation loop stopped by shutdown");
                    return Exit::Shutdown;
                }
            }
        }
    }

    async fn tick(&self, state: &mut LoopState, shutdown: &mut Shutdown) -> Tick {
        state.wake();

        if std::mem::take(&mut state.advance) {
            state.window = state.window.advance();
        }
        let window = state.window;
        let start = format_checkpoint(window.start);

        if let Err(e) = self.checkpoint.save(window.start).await {
            tracing::error!(start = %start, error = %e, "Failed to write checkpoint");
            state.fail();
            return Tick::Continue;
        }

        if self.config.debug {
            tracing::info!(start = %start, end = %format_checkpoint(window.end), "Window");
        }

        if let Some(end_time) = self.config.end_time {
            if window.starts_after(end_time) {
                tracing::info!(
                    start = %start,
                    end_time = %format_checkpoint(end_time),
                    "Window starts after end time, all data compared"
                );
                state.finished = true;
                return Tick::Finished;
            }
        }

        let now = self.clock.now();
        if let Some(remaining) = self.delay.remaining(&window, now) {
            tracing::info!(
                start = %start,
                elapsed_secs = (now - window.start).num_seconds(),
                sleep_secs = remaining.num_seconds(),
                "Window is inside the replication delay, sleeping"
            );
            state.sleeping = true;
            state.sleeping_secs = remaining.num_seconds();
            state.sleep_from = Some(now);
            self.publish(state);

            let duration = remaining.to_std().unwrap_or(Duration::ZERO);
            let completed = wait(&self.clock, shutdown, duration).await;
            state.wake();
            return if completed {
                Tick::Continue
            } else {
                Tick::Shutdown
            };
        }

        let locals = match self.local.range(&window).await {
            Ok(locals) => locals,
            Err(e) => {
                tracing::warn!(start = %start, error = %e, "Failed to load local records");
                state.fail();
                return Tick::Continue;
            }
        };
        state.range_count = locals.len();
        state.total_count += locals.len() as u64;

        let reconciler = WindowReconciler::new(
            &self.cloud,
            &self.sink,
            &self.clock,
            self.loader,
            self.config.fix,
        );
        let mut report = WindowReport::default();
        let result = reconciler.reconcile(locals, &mut report).await;
        state.absorb(&report);

        if let Err(e) = result {
            tracing::warn!(start = %start, error = %e, "Window comparison failed, will retry");
            state.fail();
            return Tick::Continue;
        }

        state.succeed();
        tracing::info!(
            start = %start,
            records = report.total,
            pending = report.pending,
            mismatched = report.mismatched,
            repaired = report.repaired,
            diff_total = state.diff_count,
            "Window compared"
        );
        Tick::Continue
    }

    fn publish(&self, state: &LoopState) {
        self.status.send_replace(state.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::shutdown_channel;
    use crate::testing::{
        cloud_record, local_record, ts, FakeClock, MemoryCheckpoint, MemoryCloud, MemoryLocal,
        RecordingSink,
    };
    use chrono::TimeDelta;

    const STEP: i64 = 60;

    fn config(end_time: Option<i64>, delay: i64) -> ReconcileConfig {
        ReconcileConfig {
            start_time: ts(0),
            end_time: end_time.map(ts),
            step: TimeDelta::seconds(STEP),
            loop_interval: Duration::from_secs(1),
            delay: TimeDelta::seconds(delay),
            batch_size: 2,
            batch_retry: 1,
            batch_concurrency: 2,
            fix: false,
            debug: true,
            checkpoint_path: "offset".into(),
        }
    }

    type TestLoop = ReconcileLoop<
        MemoryLocal,
        MemoryCloud,
        RecordingSink,
        MemoryCheckpoint,
        FakeClock,
    >;

    fn build(
        local: MemoryLocal,
        cloud: MemoryCloud,
        config: ReconcileConfig,
        now: i64,
    ) -> (TestLoop, watch::Receiver<LoopState>) {
        ReconcileLoop::new(
            local,
            cloud,
            RecordingSink::default(),
            MemoryCheckpoint::default(),
            FakeClock::at(ts(now)),
            config,
            ts(0),
        )
        .unwrap()
    }

    fn starts(windows: &[Window]) -> Vec<i64> {
        windows.iter().map(|w| w.start.timestamp()).collect()
    }

    #[tokio::test]
    async fn stops_after_end_time() {
        let (l, status) = build(
            MemoryLocal::default(),
            MemoryCloud::default(),
            config(Some(120), 0),
            10_000,
        );
        let (_trigger, shutdown) = shutdown_channel();

        assert_eq!(l.run(shutdown).await, Exit::Finished);

        // Windows at 0, 60, 120 are compared; 180 is past the end time
        assert_eq!(starts(&l.local.ranges()), vec![0, 60, 120]);
        let saves: Vec<_> = l.checkpoint.saves().iter().map(|t| t.timestamp()).collect();
        assert_eq!(saves, vec![0, 60, 120, 180]);

        let state = status.borrow().clone();
        assert!(state.finished);
        assert_eq!(state.windows_completed, 3);
    }

    #[tokio::test]
    async fn failed_window_is_retried_in_place() {
        let local = MemoryLocal::default();
        local.fail_ranges(2);
        let (l, _) = build(local, MemoryCloud::default(), config(Some(60), 0), 10_000);
        let (_trigger, shutdown) = shutdown_channel();

        l.run(shutdown).await;

        let saves: Vec<_> = l.checkpoint.saves().iter().map(|t| t.timestamp()).collect();
        assert_eq!(saves, vec![0, 0, 0, 60, 120]);
        assert_eq!(starts(&l.local.ranges()), vec![0, 60]);
    }

    #[tokio::test]
    async fn checkpoint_failure_skips_the_tick() {
        let (l, _) = build(
            MemoryLocal::default(),
            MemoryCloud::default(),
            config(Some(0), 0),
            10_000,
        );
        l.checkpoint.fail_saves(1);
        let (_trigger, shutdown) = shutdown_channel();

        l.run(shutdown).await;

        let saves: Vec<_> = l.checkpoint.saves().iter().map(|t| t.timestamp()).collect();
        assert_eq!(saves, vec![0, 60]);
        assert_eq!(starts(&l.local.ranges()), vec![0]);
    }

    #[tokio::test]
    async fn reload_failure_retries_the_same_window() {
        let local = MemoryLocal::with_records(vec![local_record(1, 10, "A")]);
        let cloud = MemoryCloud::with_records(vec![cloud_record(1, 5, "A")]);
        cloud.fail_gets(1);
        let (l, status) = build(local, cloud, config(Some(0), 0), 10_000);
        let (_trigger, shutdown) = shutdown_channel();

        l.run(shutdown).await;

        assert_eq!(starts(&l.local.ranges()), vec![0, 0]);
        assert_eq!(l.cloud.get_calls(), 2);
        let state = status.borrow().clone();
        assert_eq!(state.total_count, 2);
        assert_eq!(state.diff_count, 0);
        assert_eq!(state.windows_completed, 1);
    }

    #[tokio::test]
    async fn young_window_waits_out_the_delay() {
        // Now is 100s after the window start, delay is 300s
        let (l, _) = build(
            MemoryLocal::default(),
            MemoryCloud::default(),
            config(Some(0), 300),
            100,
        );
        let (_trigger, shutdown) = shutdown_channel();

        l.run(shutdown).await;

        let sleeps = l.clock.sleeps();
        assert_eq!(sleeps[0], Duration::from_secs(1));
        assert_eq!(sleeps[1], Duration::from_secs(199));
        assert_eq!(sleeps[2], Duration::from_secs(1));
        // Same window retried after the delay, not advanced
        assert_eq!(starts(&l.local.ranges()), vec![0]);
        let saves: Vec<_> = l.checkpoint.saves().iter().map(|t| t.timestamp()).collect();
        assert_eq!(saves, vec![0, 0, 60]);
    }

    #[tokio::test]
    async fn mismatches_are_counted() {
        let local = MemoryLocal::with_records(vec![
            local_record(1, 10, "A"),
            local_record(2, 20, "A"),
            local_record(3, 70, "A"),
        ]);
        let cloud = MemoryCloud::with_records(vec![
            cloud_record(1, 10, "A"),
            cloud_record(2, 30, "B"),
        ]);
        let (l, status) = build(local, cloud, config(Some(60), 0), 10_000);
        let (_trigger, shutdown) = shutdown_channel();

        l.run(shutdown).await;

        let state = status.borrow().clone();
        assert_eq!(state.total_count, 3);
        assert_eq!(state.diff_count, 2);
        assert_eq!(state.pending_count, 1);
        assert_eq!(l.sink.divergences().len(), 2);
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let (l, _) = build(
            MemoryLocal::default(),
            MemoryCloud::default(),
            config(None, 0),
            10_000,
        );
        let (trigger, shutdown) = shutdown_channel();
        trigger.trigger();

        assert_eq!(l.run(shutdown).await, Exit::Shutdown);
        assert!(l.checkpoint.saves().is_empty());
    }

    #[tokio::test]
    async fn checkpoint_never_moves_backwards() {
        let local = MemoryLocal::default();
        local.fail_ranges(1);
        let (l, _) = build(local, MemoryCloud::default(), config(Some(240), 0), 10_000);
        l.checkpoint.fail_saves(1);
        let (_trigger, shutdown) = shutdown_channel();

        l.run(shutdown).await;

        let saves = l.checkpoint.saves();
        assert!(saves.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(saves.last().map(|t| t.timestamp()), Some(300));
    }
}
