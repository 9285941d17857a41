//! Small runtime helpers shared by the engines: poison-tolerant lock
//! access, start/stop bookkeeping and ticker-driven background tasks.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Running flag of an engine, expressed as the token its tasks watch.
#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    token: Mutex<Option<CancellationToken>>,
}

impl Lifecycle {
    /// Mark the engine running and hand out the token for its tasks.
    /// `None` when it already runs.
    pub(crate) fn begin(&self) -> Option<CancellationToken> {
        let mut slot = lock(&self.token);
        if slot.is_some() {
            return None;
        }
        let token = CancellationToken::new();
        *slot = Some(token.clone());
        Some(token)
    }

    /// Cancel every task started under the current token. `false` when not running.
    pub(crate) fn end(&self) -> bool {
        match lock(&self.token).take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        lock(&self.token).is_some()
    }

    /// A token for one unit of work: a child of the running token so that
    /// stopping the engine cancels it, or a detached one when stopped.
    pub(crate) fn child(&self) -> CancellationToken {
        lock(&self.token)
            .as_ref()
            .map_or_else(CancellationToken::new, CancellationToken::child_token)
    }
}

/// Run `tick` every `period` until `cancel` fires. The first tick happens
/// one period after the call.
pub(crate) fn spawn_periodic<F, Fut>(
    task: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => tick().await,
            }
        }
        tracing::debug!(task, "periodic task stopped");
    })
}

/// Sleep for `duration` unless `cancel` fires first. Returns `false` when cancelled.
pub(crate) async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}
