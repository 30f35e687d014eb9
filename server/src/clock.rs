//! Wall clock and timed waits.
//!
//! The loop never reads the time or sleeps directly; it goes through
//! [`Clock`] so tests can drive it with virtual time.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use driftwatch_engine::Timestamp;
use tokio::sync::watch;

/// Source of "now" and of sleeps.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Real time, backed by tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Receiving half of the shutdown signal.
///
/// Cheap to clone; every clone observes the same signal.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Sending half of the shutdown signal.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Create a connected shutdown trigger and signal.
pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl Shutdown {
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested.
    pub async fn requested(&mut self) {
        // A dropped trigger counts as a request
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

/// Sleep for `duration` unless shutdown is requested first.
///
/// Returns `false` when the wait was cut short by shutdown.
pub async fn wait<C: Clock>(clock: &C, shutdown: &mut Shutdown, duration: Duration) -> bool {
    if shutdown.is_requested() {
        return false;
    }
    let slept = tokio::select! {
        _ = clock.sleep(duration) => true,
        _ = shutdown.requested() => false,
    };
    slept && !shutdown.is_requested()
}
