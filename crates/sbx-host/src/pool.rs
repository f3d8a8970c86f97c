use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sbx_launch::LaunchConfig;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::error::HostError;
use crate::handle::WorkerHandle;

/// Bounds on a [`WorkerPool`]: how many workers it may have started at
/// once, and how long a freshly spawned worker has to send `Ready`.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub capacity: usize,
    pub ready_deadline: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 4,
            ready_deadline: Duration::from_secs(10),
        }
    }
}

struct Shared {
    idle: Mutex<VecDeque<WorkerHandle>>,
    started: Mutex<usize>,
    notify: Notify,
    closed: AtomicBool,
    config: PoolConfig,
    launch: LaunchConfig,
}

/// A bounded pool of sandboxed worker processes. `acquire` hands out
/// exclusive ownership of a [`WorkerHandle`] to its caller, spawning a new
/// worker if the pool hasn't yet reached `capacity` and none are idle;
/// `release` returns a still-live handle to the idle queue for reuse.
///
/// Equivalent to a bounded MPMC channel of live workers: a mutex-guarded
/// ring buffer plus a condvar-like wakeup does the same job without an
/// extra channel type, and lets `release` filter out a dead handle before
/// it ever reaches the queue rather than having every `acquire` re-check
/// liveness on the way out.
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    pub fn new(launch: LaunchConfig, config: PoolConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                idle: Mutex::new(VecDeque::new()),
                started: Mutex::new(0),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
                config,
                launch,
            }),
        }
    }

    /// Hands out an idle worker if one is available and alive, otherwise
    /// spawns a new one if under capacity, otherwise waits for either to
    /// become true. Returns `PoolClosed` immediately (or upon waking, if
    /// `close` ran while waiting) once the pool has been closed, or
    /// `Cancelled` once `cancellation` fires while waiting.
    pub async fn acquire(&self, cancellation: CancellationToken) -> Result<WorkerHandle, HostError> {
        loop {
            if cancellation.is_cancelled() {
                return Err(HostError::Cancelled);
            }
            if self.shared.closed.load(Ordering::SeqCst) {
                return Err(HostError::PoolClosed);
            }

            // Registered before the condition checks below: a `notify_waiters`
            // landing between a failed check and `.notified()` being
            // constructed would otherwise be missed by this waiter.
            let notified = self.shared.notify.notified();

            {
                let mut idle = self.shared.idle.lock().await;
                if let Some(handle) = idle.pop_front() {
                    // `release` is the only path that pushes a handle into
                    // this queue, and it already filters out dead ones; a
                    // handle sitting here is exclusively pool-owned, so
                    // nothing can mark it dead between that push and this
                    // pop.
                    debug_assert!(!handle.is_dead(), "idle queue must never hold a dead handle");
                    return Ok(handle);
                }
            }

            {
                let mut started = self.shared.started.lock().await;
                if *started < self.shared.config.capacity {
                    *started += 1;
                    drop(started);
                    let spawn_result = tokio::select! {
                        _ = cancellation.cancelled() => {
                            // Dropping this branch's `WorkerHandle::spawn` future
                            // drops its in-progress `Child` (`kill_on_drop(true)`
                            // reaps it), so the slot this reserved is genuinely
                            // free again — not just logically released.
                            let mut started = self.shared.started.lock().await;
                            *started = started.saturating_sub(1);
                            drop(started);
                            self.shared.notify.notify_waiters();
                            return Err(HostError::Cancelled);
                        }
                        result = WorkerHandle::spawn(&self.shared.launch, self.shared.config.ready_deadline) => result,
                    };
                    match spawn_result {
                        Ok(handle) => return Ok(handle),
                        Err(e) => {
                            let mut started = self.shared.started.lock().await;
                            *started = started.saturating_sub(1);
                            drop(started);
                            self.shared.notify.notify_waiters();
                            return Err(e);
                        }
                    }
                }
            }

            tokio::select! {
                _ = cancellation.cancelled() => return Err(HostError::Cancelled),
                _ = notified => {}
            }
        }
    }

    /// Returns a handle to the idle queue if it's still alive; drops it
    /// (and frees its capacity slot) otherwise. Always wakes pending
    /// `acquire` callers, since either outcome may let one proceed.
    ///
    /// The `closed` check happens while holding the idle-queue lock, the
    /// same lock `close()` holds while draining it: that makes the two
    /// methods agree on a single before-or-after ordering for "did this
    /// handle get returned before or after close()'s drain", so a release
    /// racing a concurrent close() can never push a handle into the idle
    /// queue after close() has already finished draining it.
    pub async fn release(&self, handle: WorkerHandle) {
        let mut idle = self.shared.idle.lock().await;
        if self.shared.closed.load(Ordering::SeqCst) || handle.is_dead() {
            drop(idle);
            let mut started = self.shared.started.lock().await;
            *started = started.saturating_sub(1);
        } else {
            idle.push_back(handle);
        }
        self.shared.notify.notify_waiters();
    }

    /// Idempotent. Marks the pool closed, closes every currently idle
    /// worker, and wakes every pending `acquire` so it observes `PoolClosed`
    /// rather than hanging. Workers already checked out to callers are
    /// closed as they're returned via `release`.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut idle = self.shared.idle.lock().await;
        while let Some(mut handle) = idle.pop_front() {
            handle.close();
        }
        self.shared.notify.notify_waiters();
    }

    pub async fn started(&self) -> usize {
        *self.shared.started.lock().await
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
