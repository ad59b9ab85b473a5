//! Deadline-bound, cancellable sysfs I/O
//!
//! Blocking filesystem calls run on `spawn_blocking` and are raced against a
//! per-attempt deadline and a [`Cancellation`] signal. Every attempt holds a
//! permit from one shared semaphore, which bounds how many sysfs operations
//! are in flight across all zones.
//!
//! # Orphaned calls
//!
//! A blocking read or write cannot be interrupted. When the deadline or the
//! cancellation wins the race, the caller gets `ReadTimeout`/`WriteTimeout`
//! or `OperationCanceled` right away, but the blocking call keeps running in
//! the background until the kernel returns. It keeps its semaphore permit
//! until then, so stuck attributes still count against the concurrency
//! bound.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tracing::debug;

use crate::data::IoConfig;
use crate::error::{Result, ThermalError};
use crate::hw::sysfs::SysfsIo;

struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cloneable cancellation signal shared by a zone task and its I/O
#[derive(Clone)]
pub struct Cancellation {
    inner: Arc<CancelInner>,
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cancellation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cancellation")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Cancellation {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signal every clone; idempotent
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent cancel is not missed
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Sleep unless cancelled first
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancelled() => Err(ThermalError::OperationCanceled),
        }
    }
}

/// Attempts, spacing and per-attempt deadline of one I/O operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &IoConfig) -> Self {
        Self {
            retry_count: config.retry_count,
            retry_delay: config.retry_delay(),
            timeout: config.timeout(),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&IoConfig::default())
    }
}

/// Run `op` up to `retry_count + 1` times
///
/// Attempts are separated by a cancellable `retry_delay`. Cancellation and
/// errors that cannot succeed on a second try (see
/// [`ThermalError::is_retryable`]) are returned as is; otherwise the last
/// failure is wrapped in `RetryExhausted`.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &Cancellation,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts();
    let mut attempt = 0;
    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(ThermalError::OperationCanceled);
        }
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= attempts => {
                return Err(ThermalError::RetryExhausted {
                    attempts,
                    source: Box::new(e),
                });
            }
            Err(e) => {
                debug!(attempt, attempts, error = %e, "I/O attempt failed, retrying");
            }
        }
        cancel.sleep(policy.retry_delay).await?;
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Read,
    Write,
}

impl Direction {
    fn timeout_error(self, path: PathBuf, timeout: Duration) -> ThermalError {
        match self {
            Direction::Read => ThermalError::ReadTimeout { path, timeout },
            Direction::Write => ThermalError::WriteTimeout { path, timeout },
        }
    }

    fn failure(self, path: PathBuf, reason: String) -> ThermalError {
        match self {
            Direction::Read => ThermalError::read(path, reason),
            Direction::Write => ThermalError::write(path, reason),
        }
    }
}

/// Filesystem handle plus the shared concurrency limiter
#[derive(Clone)]
pub struct IoContext {
    fs: Arc<dyn SysfsIo>,
    limiter: Arc<Semaphore>,
}

impl IoContext {
    pub fn new(fs: Arc<dyn SysfsIo>, max_concurrent: usize) -> Self {
        Self {
            fs,
            limiter: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn fs(&self) -> &Arc<dyn SysfsIo> {
        &self.fs
    }

    /// Permits currently free
    pub fn available_permits(&self) -> usize {
        self.limiter.available_permits()
    }

    /// One read attempt bounded by `timeout`
    pub async fn read_once(
        &self,
        path: &Path,
        timeout: Duration,
        cancel: &Cancellation,
    ) -> Result<String> {
        let target = path.to_path_buf();
        self.race(path, Direction::Read, timeout, cancel, move |fs| {
            fs.read_to_string(&target)
        })
        .await
    }

    /// One write attempt bounded by `timeout`
    pub async fn write_once(
        &self,
        path: &Path,
        contents: &str,
        timeout: Duration,
        cancel: &Cancellation,
    ) -> Result<()> {
        let target = path.to_path_buf();
        let contents = contents.to_string();
        self.race(path, Direction::Write, timeout, cancel, move |fs| {
            fs.write(&target, &contents)
        })
        .await
    }

    /// Write with the full retry discipline
    pub async fn write_retried(
        &self,
        path: &Path,
        contents: &str,
        policy: &RetryPolicy,
        cancel: &Cancellation,
    ) -> Result<()> {
        with_retry(policy, cancel, |_| {
            self.write_once(path, contents, policy.timeout, cancel)
        })
        .await
    }

    async fn race<T, F>(
        &self,
        path: &Path,
        direction: Direction,
        timeout: Duration,
        cancel: &Cancellation,
        op: F,
    ) -> Result<T>
    where
        F: FnOnce(&dyn SysfsIo) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let fs = Arc::clone(&self.fs);
        let limiter = Arc::clone(&self.limiter);
        let attempt = async move {
            let permit = limiter
                .acquire_owned()
                .await
                .map_err(|_| ThermalError::OperationCanceled)?;
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                op(fs.as_ref())
            })
            .await
            .map_err(|e| direction.failure(path.to_path_buf(), format!("I/O task failed: {}", e)))?
        };

        tokio::select! {
            result = attempt => result,
            _ = tokio::time::sleep(timeout) => Err(direction.timeout_error(path.to_path_buf(), timeout)),
            _ = cancel.cancelled() => Err(ThermalError::OperationCanceled),
        }
    }
}
