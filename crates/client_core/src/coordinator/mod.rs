//! Keyed call coordination for outbound operations.
//!
//! Both coordinators own their per-key state tables and drop a key's entry as
//! soon as nothing waits on it and no worker runs for it.

mod debounce;
mod retry;

use std::{future::Future, sync::Arc};

use futures::{future::BoxFuture, FutureExt};

pub use debounce::Debouncer;
pub use retry::RetryWithReset;

pub type OperationFuture<T> = BoxFuture<'static, anyhow::Result<T>>;
type Operation<A, T> = Arc<dyn Fn(A) -> OperationFuture<T> + Send + Sync>;

fn boxed_operation<A, T, F, Fut>(operation: F) -> Operation<A, T>
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Arc::new(move |args| operation(args).boxed())
}

/// Runs one invocation, turning a panic into an ordinary failure.
async fn invoke<A, T>(operation: &Operation<A, T>, args: A) -> anyhow::Result<T> {
    match std::panic::AssertUnwindSafe(operation(args))
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(panic) => Err(anyhow::anyhow!(
            "operation panicked: {}",
            crate::types::panic_message(panic.as_ref())
        )),
    }
}
