//! 🧵 Workers: the backbone of s3cat, the unsung heroes, the ones who actually
//! download the tiny files while the AssemblyJob takes all the credit.
//!
//! 🚀 The RetryingExecutor is a tiny factory floor:
//!
//! ```text
//!   items ──▶ async_channel (the queue) ──▶ worker 1 ─┐
//!                                      ├──▶ worker 2 ─┼──▶ Vec<R> per worker ──▶ merged
//!                                      └──▶ worker N ─┘
//! ```
//!
//! - at most `worker_count` operations in flight; the rest wait in the channel
//! - each item gets `max_attempts` tries (3 unless someone says otherwise)
//! - one item running out of tries sinks the whole batch. Silently dropping a
//!   part would let the commit stitch together an object with a hole in it,
//!   and nobody wants a JSON file with amnesia.
//! - results come back in whatever order the workers finished. Callers that
//!   care about order carry their own sort key. 🦆

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_channel::Receiver;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ConcatError;

/// 📜 Attempts per item when nobody configures otherwise.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// 🏗️ A background worker, that does work. duh.
///
/// The trait that all workers must implement, like a social contract
/// but enforced by the compiler instead of polite society.
pub trait Worker {
    type Output;

    /// 🚀 Start the worker. Returns a JoinHandle because we trust
    /// but verify. Mostly verify.
    fn start(self) -> JoinHandle<Self::Output>;
}

/// 🔁 How stubborn to be about one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Linear backoff: attempt `n` waits `n * backoff` before trying again.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// 🔁 Run `operation` until it succeeds, fails for a non-transient reason,
    /// or runs out of attempts. Exhaustion promotes the last error to permanent.
    pub async fn run<R, F, Fut>(
        &self,
        label: &(dyn Debug + Sync),
        mut operation: F,
    ) -> Result<R, ConcatError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, ConcatError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    warn!(
                        "🔁 attempt {}/{} for {:?} failed, trying again: {}",
                        attempt, max_attempts, label, err
                    );
                    if !self.backoff.is_zero() {
                        tokio::time::sleep(self.backoff * attempt).await;
                    }
                    attempt += 1;
                }
                Err(err) => {
                    warn!(
                        "🪦 giving up on {:?} after {} attempt(s): {}",
                        label, attempt, err
                    );
                    return Err(err.exhausted());
                }
            }
        }
    }
}

/// 🏭 Bounded worker pool with per-item retry and fail-the-batch semantics.
#[derive(Debug, Clone, Copy)]
pub struct RetryingExecutor {
    worker_count: usize,
    policy: RetryPolicy,
}

impl RetryingExecutor {
    /// 🏗️ Zero workers would wait forever, so that's a configuration error.
    pub fn new(worker_count: usize) -> Result<Self, ConcatError> {
        if worker_count == 0 {
            return Err(ConcatError::Configuration(
                "worker count must be at least 1. Zero workers is a very relaxed factory".to_string(),
            ));
        }
        Ok(Self {
            worker_count,
            policy: RetryPolicy::default(),
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// 🚀 Push every item through `operation` with at most `worker_count` in flight.
    ///
    /// Returns every result, in completion order, or the first permanent failure.
    /// After a failure the queue is closed: in-flight items finish, queued ones
    /// never start, and all workers are joined before this returns.
    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, operation: F) -> Result<Vec<R>, ConcatError>
    where
        T: Clone + Debug + Send + Sync + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ConcatError>> + Send + 'static,
    {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        // 📬 Fill the queue up front and close the sending side: workers drain until empty.
        let (tx, rx) = async_channel::bounded(items.len());
        let total = items.len();
        for item in items {
            // the channel is sized for every item and nobody has closed it yet
            tx.try_send(item).map_err(|e| {
                ConcatError::Configuration(format!("work queue refused an item: {e}"))
            })?;
        }
        drop(tx);

        let operation = Arc::new(operation);
        let spawned = self.worker_count.min(total);
        debug!("🧵 starting {} worker(s) for {} item(s)", spawned, total);

        let handles: Vec<JoinHandle<Result<Vec<R>, ConcatError>>> = (0..spawned)
            .map(|worker_id| {
                RetryWorker {
                    worker_id,
                    rx: rx.clone(),
                    operation: Arc::clone(&operation),
                    policy: self.policy,
                }
                .start()
            })
            .collect();

        let mut results = Vec::with_capacity(total);
        let mut first_failure: Option<ConcatError> = None;
        for joined in futures::future::join_all(handles).await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(join_err) => Err(ConcatError::permanent("worker", "", join_err)),
            };
            match outcome {
                Ok(mut worker_results) => results.append(&mut worker_results),
                Err(err) => {
                    if first_failure.is_none() {
                        first_failure = Some(err);
                    }
                }
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(results),
        }
    }
}

/// 👷 One worker: pulls items off the shared queue until it's empty or closed.
struct RetryWorker<T, F> {
    worker_id: usize,
    rx: Receiver<T>,
    operation: Arc<F>,
    policy: RetryPolicy,
}

impl<T, R, F, Fut> Worker for RetryWorker<T, F>
where
    T: Clone + Debug + Send + Sync + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, ConcatError>> + Send + 'static,
{
    type Output = Result<Vec<R>, ConcatError>;

    fn start(self) -> JoinHandle<Self::Output> {
        tokio::spawn(async move {
            let mut results = Vec::new();
            while let Ok(item) = self.rx.recv().await {
                let outcome = self
                    .policy
                    .run(&item, || (self.operation)(item.clone()))
                    .await;
                match outcome {
                    Ok(result) => results.push(result),
                    Err(err) => {
                        // 💀 closed channels still hand out what's queued, so empty it too
                        self.rx.close();
                        while self.rx.try_recv().is_ok() {}
                        debug!("💀 worker {} stopping after a permanent failure", self.worker_id);
                        return Err(err);
                    }
                }
            }
            debug!("🏁 worker {} drained the queue", self.worker_id);
            Ok(results)
        })
    }
}
