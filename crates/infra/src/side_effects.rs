//! Supervisor for post-commit side effects.
//!
//! Side effects run as independent tokio tasks after the unit of work has
//! committed. Their failures are counted and logged, never returned to the
//! caller, and never retried.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Side-effect counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SideEffectStats {
    pub spawned: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub panicked: u64,
}

/// Handle to the running side effects. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct SideEffectSupervisor {
    tasks: Arc<Mutex<JoinSet<()>>>,
    stats: Arc<Mutex<SideEffectStats>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Counters stay meaningful after a panic elsewhere.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SideEffectSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `effect` in the background. Must be called from a tokio runtime.
    pub fn spawn<F>(&self, name: &'static str, effect: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let stats = Arc::clone(&self.stats);
        let mut tasks = lock(&self.tasks);

        // Reap finished tasks so the set does not grow without bound.
        while let Some(finished) = tasks.try_join_next() {
            record_join(&self.stats, finished);
        }

        lock(&stats).spawned += 1;
        tasks.spawn(async move {
            match effect.await {
                Ok(()) => {
                    debug!(side_effect = name, "side effect completed");
                    lock(&stats).succeeded += 1;
                }
                Err(e) => {
                    warn!(side_effect = name, error = %format!("{e:#}"), "side effect failed");
                    lock(&stats).failed += 1;
                }
            }
        });
    }

    /// Wait for every side effect spawned so far.
    pub async fn drain(&self) {
        let mut tasks = std::mem::take(&mut *lock(&self.tasks));
        while let Some(finished) = tasks.join_next().await {
            record_join(&self.stats, finished);
        }
    }

    pub fn stats(&self) -> SideEffectStats {
        *lock(&self.stats)
    }
}

fn record_join(stats: &Mutex<SideEffectStats>, finished: Result<(), tokio::task::JoinError>) {
    if let Err(e) = finished {
        if e.is_panic() {
            warn!(error = %e, "side effect panicked");
            lock(stats).panicked += 1;
        }
    }
}
