use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::sleep;

struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fails until `succeed_from` attempts have been made, counting every attempt.
fn flaky(
    succeed_from: usize,
) -> (RetryWithReset<&'static str, u32, usize>, Arc<AtomicUsize>) {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let retry = RetryWithReset::new(3, Duration::from_millis(10), move |_args: u32| {
        let counter = Arc::clone(&counter);
        async move {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt >= succeed_from {
                Ok(attempt)
            } else {
                Err(anyhow::anyhow!("attempt {attempt} failed"))
            }
        }
    })
    .expect("valid config");
    (retry, attempts)
}

#[test]
fn zero_attempts_is_rejected() {
    let result = RetryWithReset::<(), (), ()>::new(0, Duration::ZERO, |_args: ()| async { Ok(()) });
    assert!(matches!(result, Err(ConfigError::ZeroAttempts)));
}

#[tokio::test(start_paused = true)]
async fn succeeds_after_two_failures() {
    let (retry, attempts) = flaky(3);
    assert_eq!(retry.call("k", 0).await.expect("third attempt succeeds"), 3);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn reports_last_error_when_every_attempt_fails() {
    let (retry, attempts) = flaky(usize::MAX);
    let err = retry.call("k", 0).await.expect_err("all fail");
    assert_eq!(err.to_string(), "attempt 3 failed");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn remaining_attempts_run_after_first_success() {
    let (retry, attempts) = flaky(1);
    assert_eq!(retry.call("k", 0).await.expect("first attempt"), 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 1, "caller resolves early");

    sleep(Duration::from_millis(50)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(retry.active_keys().await, 0);
}

#[tokio::test(start_paused = true)]
async fn newer_call_cancels_running_sequence() {
    let log: Arc<std::sync::Mutex<Vec<u32>>> = Arc::default();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let retry = {
        let log = Arc::clone(&log);
        let in_flight = Arc::clone(&in_flight);
        let peak = Arc::clone(&peak);
        RetryWithReset::new(3, Duration::from_millis(10), move |args: u32| {
            let log = Arc::clone(&log);
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                log.lock().expect("log").push(args);
                let _guard = InFlight::enter(&in_flight, &peak);
                sleep(Duration::from_millis(50)).await;
                Err::<(), _>(anyhow::anyhow!("no ack for {args}"))
            }
        })
        .expect("valid config")
    };

    let first = tokio::spawn({
        let retry = retry.clone();
        async move { retry.call("preset", 1).await }
    });
    sleep(Duration::from_millis(20)).await;
    let second = retry.call("preset", 2).await;

    let first = first.await.expect("join");
    assert!(matches!(first, Err(ref err) if err.is_cancelled()), "{first:?}");
    assert!(matches!(second, Err(CoordinatorError::Failed(_))));

    let log = log.lock().expect("log");
    assert_eq!(log.iter().filter(|args| **args == 1).count(), 1);
    assert_eq!(log.iter().filter(|args| **args == 2).count(), 3);
    // The aborted attempt is torn down before the new one starts.
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn keys_do_not_cancel_each_other() {
    let (retry, attempts) = flaky(1);
    let (a, b) = tokio::join!(retry.call("a", 0), retry.call("b", 0));
    assert!(a.is_ok());
    assert!(b.is_ok());
    sleep(Duration::from_millis(50)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 6);
}
