//! Bounded, rate-limited worker pool.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error};

use crate::error::{Result, SyncError};

/// Runs one task per item with at most `concurrency` tasks in flight.
///
/// Items are dispatched in windows of `concurrency`; a window starts no
/// sooner than `dispatch_interval` after the previous one, which bounds the
/// request rate against the distributor. The first task error aborts every
/// outstanding task and is returned.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    concurrency: usize,
    dispatch_interval: Duration,
}

impl WorkerPool {
    /// Create a pool. A concurrency of zero is treated as one.
    pub fn new(concurrency: usize, dispatch_interval: Duration) -> Self {
        Self {
            concurrency: concurrency.max(1),
            dispatch_interval,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `task` for every item. Returns the number of completed tasks.
    pub async fn run<T, F, Fut>(&self, items: Vec<T>, mut task: F) -> Result<usize>
    where
        T: Send + 'static,
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        let mut ticker = interval(self.dispatch_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut completed = 0usize;

        let mut items = items.into_iter().peekable();
        let mut window = 0usize;
        while items.peek().is_some() {
            // Wait for the next dispatch window, settling finished tasks meanwhile.
            loop {
                tokio::select! {
                    _ = ticker.tick() => break,
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        settle(joined, &mut tasks)?;
                        completed += 1;
                    }
                }
            }
            window += 1;
            debug!(window, in_flight = tasks.len(), "Dispatching window");

            for item in items.by_ref().take(self.concurrency) {
                let permit = loop {
                    tokio::select! {
                        permit = Arc::clone(&semaphore).acquire_owned() => {
                            break permit.map_err(|e| SyncError::WorkerPanicked(e.to_string()))?;
                        }
                        Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                            settle(joined, &mut tasks)?;
                            completed += 1;
                        }
                    }
                };
                let fut = task(item);
                tasks.spawn(async move {
                    let _permit = permit;
                    fut.await
                });
            }
        }

        while let Some(joined) = tasks.join_next().await {
            settle(joined, &mut tasks)?;
            completed += 1;
        }
        Ok(completed)
    }
}

fn settle(
    joined: std::result::Result<Result<()>, JoinError>,
    tasks: &mut JoinSet<Result<()>>,
) -> Result<()> {
    let failure = match joined {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(e)) => e,
        Err(e) if e.is_panic() => SyncError::WorkerPanicked(e.to_string()),
        Err(e) => SyncError::WorkerPanicked(format!("task cancelled: {e}")),
    };
    error!(error = %failure, outstanding = tasks.len(), "Sync task failed, aborting outstanding tasks");
    tasks.abort_all();
    Err(failure)
}
