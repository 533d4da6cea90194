use std::{
    collections::HashMap,
    fmt::Debug,
    future::Future,
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    sync::{oneshot, Mutex},
    task::JoinHandle,
};
use tracing::debug;

use super::{boxed_operation, invoke, Operation};
use crate::error::{ConfigError, CoordinatorError};

type ResultSlot<T> = oneshot::Sender<Result<T, CoordinatorError>>;

struct Sequence {
    generation: u64,
    task: JoinHandle<()>,
}

struct Inner<K, A, T> {
    attempts: u32,
    delay: Duration,
    operation: Operation<A, T>,
    sequences: Mutex<HashMap<K, Sequence>>,
    next_generation: AtomicU64,
}

/// Runs an operation a fixed number of times per call; a newer call for the
/// same key aborts the running sequence.
///
/// The caller gets the first successful attempt's value, or the last attempt's
/// error. Remaining attempts still run after a success. A superseded caller
/// gets [`CoordinatorError::Cancelled`].
pub struct RetryWithReset<K, A, T> {
    inner: Arc<Inner<K, A, T>>,
}

impl<K, A, T> Clone for RetryWithReset<K, A, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, A, T> RetryWithReset<K, A, T>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    A: Clone + Send + 'static,
    T: Send + 'static,
{
    pub fn new<F, Fut>(attempts: u32, delay: Duration, operation: F) -> Result<Self, ConfigError>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        if attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        Ok(Self {
            inner: Arc::new(Inner {
                attempts,
                delay,
                operation: boxed_operation(operation),
                sequences: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
            }),
        })
    }

    pub async fn call(&self, key: K, args: A) -> Result<T, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut sequences = self.inner.sequences.lock().await;
            let previous = sequences.remove(&key).map(|sequence| {
                debug!(?key, "superseding running retry sequence");
                sequence.task.abort();
                sequence.task
            });
            let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
            let task = tokio::spawn(Arc::clone(&self.inner).run_sequence(
                key.clone(),
                generation,
                args,
                tx,
                previous,
            ));
            sequences.insert(key, Sequence { generation, task });
        }
        // The slot is dropped unanswered only when the sequence was aborted.
        rx.await.unwrap_or(Err(CoordinatorError::Cancelled))
    }

    /// Number of keys with a sequence still running.
    pub async fn active_keys(&self) -> usize {
        self.inner.sequences.lock().await.len()
    }
}

impl<K, A, T> Inner<K, A, T>
where
    K: Eq + Hash + Debug,
    A: Clone,
{
    async fn run_sequence(
        self: Arc<Self>,
        key: K,
        generation: u64,
        args: A,
        slot: ResultSlot<T>,
        previous: Option<JoinHandle<()>>,
    ) {
        if let Some(previous) = previous {
            // Aborted tasks resolve once fully dropped; attempts never overlap.
            let _ = previous.await;
        }

        let mut slot = Some(slot);
        for attempt in 1..=self.attempts {
            match invoke(&self.operation, args.clone()).await {
                Ok(value) => {
                    if let Some(slot) = slot.take() {
                        let _ = slot.send(Ok(value));
                    }
                }
                Err(err) => {
                    debug!(?key, attempt, error = %format!("{err:#}"), "retry attempt failed");
                    if attempt == self.attempts {
                        if let Some(slot) = slot.take() {
                            let _ = slot.send(Err(CoordinatorError::failed(err)));
                        }
                    }
                }
            }
            if attempt < self.attempts {
                tokio::time::sleep(self.delay).await;
            }
        }

        let mut sequences = self.sequences.lock().await;
        if sequences
            .get(&key)
            .is_some_and(|sequence| sequence.generation == generation)
        {
            sequences.remove(&key);
        }
    }
}

#[cfg(test)]
#[path = "tests/retry_tests.rs"]
mod tests;
