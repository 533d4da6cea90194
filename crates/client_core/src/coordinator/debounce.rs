use std::{
    collections::{hash_map::Entry, HashMap},
    fmt::Debug,
    future::Future,
    hash::Hash,
    sync::Arc,
    time::Duration,
};

use futures::FutureExt;
use tokio::{
    sync::{oneshot, Mutex},
    time::{sleep_until, Instant},
};
use tracing::{debug, error};

use super::{boxed_operation, invoke, Operation};
use crate::error::CoordinatorError;

type Waiter<T> = oneshot::Sender<Result<T, CoordinatorError>>;

/// Longest spacing honoured between executions; larger values are clamped.
const MAX_MIN_DELAY: Duration = Duration::from_secs(60 * 60 * 24 * 365);

struct KeyState<A, T> {
    latest: Option<A>,
    waiters: Vec<Waiter<T>>,
    next_allowed: Option<Instant>,
}

enum Step<A, T> {
    Run {
        args: A,
        waiters: Vec<Waiter<T>>,
        not_before: Option<Instant>,
    },
    Done,
}

struct Inner<K, A, T> {
    min_delay: Duration,
    operation: Operation<A, T>,
    /// A key has an entry exactly while its worker task is alive.
    states: Mutex<HashMap<K, KeyState<A, T>>>,
}

/// Coalesces calls per key into spaced, non-overlapping executions.
///
/// Every caller waiting when an execution starts receives that execution's
/// outcome; the arguments of the most recent caller are used. Calls that
/// arrive while an execution is pending or in flight are coalesced into one
/// follow-up execution, started at least `min_delay` after the previous one
/// finished. Once no caller is waiting the key is forgotten, so the next call
/// runs right away.
pub struct Debouncer<K, A, T> {
    inner: Arc<Inner<K, A, T>>,
}

impl<K, A, T> Clone for Debouncer<K, A, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, A, T> Debouncer<K, A, T>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    A: Send + 'static,
    T: Clone + Send + 'static,
{
    pub fn new<F, Fut>(min_delay: Duration, operation: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                min_delay: min_delay.min(MAX_MIN_DELAY),
                operation: boxed_operation(operation),
                states: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub async fn call(&self, key: K, args: A) -> Result<T, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut states = self.inner.states.lock().await;
            match states.entry(key.clone()) {
                Entry::Occupied(mut entry) => {
                    let state = entry.get_mut();
                    state.latest = Some(args);
                    state.waiters.push(tx);
                }
                Entry::Vacant(entry) => {
                    entry.insert(KeyState {
                        latest: Some(args),
                        waiters: vec![tx],
                        next_allowed: None,
                    });
                    tokio::spawn(Arc::clone(&self.inner).supervise(key));
                }
            }
        }
        rx.await.unwrap_or(Err(CoordinatorError::WorkerLost))
    }

    /// Number of keys that currently have a live worker.
    pub async fn active_keys(&self) -> usize {
        self.inner.states.lock().await.len()
    }
}

impl<K, A, T> Inner<K, A, T>
where
    K: Eq + Hash + Clone + Debug,
    T: Clone,
{
    /// Runs the worker and forgets the key if it dies, failing its waiters.
    async fn supervise(self: Arc<Self>, key: K) {
        let worker = std::panic::AssertUnwindSafe(Arc::clone(&self).work(key.clone()));
        if let Err(panic) = worker.catch_unwind().await {
            error!(
                ?key,
                panic = %crate::types::panic_message(panic.as_ref()),
                "debounce worker stopped"
            );
            self.states.lock().await.remove(&key);
        }
    }

    async fn work(self: Arc<Self>, key: K) {
        loop {
            match self.next_step(&key).await {
                Step::Done => return,
                Step::Run {
                    args,
                    waiters,
                    not_before,
                } => {
                    if let Some(at) = not_before {
                        sleep_until(at).await;
                    }
                    debug!(?key, waiters = waiters.len(), "running debounced operation");
                    let outcome = invoke(&self.operation, args)
                        .await
                        .map_err(CoordinatorError::failed);
                    for waiter in waiters {
                        let _ = waiter.send(outcome.clone());
                    }

                    let mut states = self.states.lock().await;
                    let Some(state) = states.get_mut(&key) else {
                        return;
                    };
                    if state.waiters.is_empty() {
                        states.remove(&key);
                        return;
                    }
                    state.next_allowed = Instant::now().checked_add(self.min_delay);
                }
            }
        }
    }

    async fn next_step(&self, key: &K) -> Step<A, T> {
        let mut states = self.states.lock().await;
        let Some(state) = states.get_mut(key) else {
            return Step::Done;
        };

        if !state.waiters.is_empty() {
            if let Some(args) = state.latest.take() {
                return Step::Run {
                    args,
                    waiters: std::mem::take(&mut state.waiters),
                    not_before: state.next_allowed,
                };
            }
        }

        states.remove(key);
        Step::Done
    }
}

#[cfg(test)]
#[path = "tests/debounce_tests.rs"]
mod tests;
