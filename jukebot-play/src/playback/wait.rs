//! Interruptible, adjustable countdown used to delay preparation start

use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Countdown whose remaining time can be rewritten by any task while the
/// owner sleeps on it.
///
/// A single slot holds the latest requested wait; [`WaitTask::run`] drains
/// it and sleeps toward the resulting deadline, re-reading the slot every
/// time it is woken. Supplying a new value reschedules the deadline in
/// place; supplying zero ends the wait; cancellation aborts it. A wake
/// without a pending value leaves the current deadline untouched, so stray
/// wakeups never cut a wait short.
#[derive(Debug)]
pub struct WaitTask {
    requested: Mutex<Option<Duration>>,
    wake: Notify,
}

impl WaitTask {
    pub fn new(initial: Duration) -> Self {
        Self {
            requested: Mutex::new(Some(initial)),
            wake: Notify::new(),
        }
    }

    /// Overwrite the remaining wait and wake the sleeper so it re-reads.
    /// Callable from any task, any number of times, while waiting.
    pub fn update_wait_time(&self, wait: Duration) {
        *self.requested.lock().unwrap() = Some(wait);
        self.wake.notify_one();
    }

    /// Force the sleeper to re-check; it exits unless a new wait was
    /// supplied in the meantime.
    pub fn cancel_current_wait(&self) {
        self.update_wait_time(Duration::ZERO);
    }

    fn take_request(&self) -> Option<Duration> {
        self.requested.lock().unwrap().take()
    }

    /// Sleep until the countdown is spent.
    ///
    /// Returns `Ok(())` once the scheduled wait elapses (immediately for a
    /// zero wait) and `Err(Aborted)` as soon as `cancel` fires, regardless
    /// of how much wait was scheduled.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        let mut deadline = match self.take_request() {
            Some(wait) if !wait.is_zero() => Instant::now() + wait,
            _ => return finished(cancel),
        };
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Aborted),
                _ = tokio::time::sleep_until(deadline) => return finished(cancel),
                _ = self.wake.notified() => match self.take_request() {
                    Some(wait) if wait.is_zero() => return finished(cancel),
                    Some(wait) => deadline = Instant::now() + wait,
                    None => {}
                },
            }
        }
    }
}

fn finished(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Aborted)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::timeout;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn zero_wait_returns_immediately() {
        let wait = WaitTask::new(Duration::ZERO);
        let cancel = CancellationToken::new();
        timeout(Duration::from_secs(1), wait.run(&cancel))
            .await
            .expect("must not block")
            .expect("zero wait is not an abort");
    }

    #[tokio::test]
    async fn cancellation_returns_in_bounded_time() {
        let wait = Arc::new(WaitTask::new(HOUR));
        let cancel = CancellationToken::new();
        let handle = {
            let wait = Arc::clone(&wait);
            let cancel = cancel.clone();
            tokio::spawn(async move { wait.run(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = timeout(Duration::from_secs(1), handle)
            .await
            .expect("cancellation must unblock the wait")
            .unwrap();
        assert!(matches!(result, Err(Error::Aborted)));
    }

    #[tokio::test]
    async fn cancel_current_wait_ends_a_long_wait() {
        let wait = Arc::new(WaitTask::new(HOUR));
        let cancel = CancellationToken::new();
        let handle = {
            let wait = Arc::clone(&wait);
            let cancel = cancel.clone();
            tokio::spawn(async move { wait.run(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        wait.cancel_current_wait();

        timeout(Duration::from_secs(1), handle)
            .await
            .expect("zeroing the wait must unblock it")
            .unwrap()
            .expect("a zeroed wait completes normally");
    }

    #[tokio::test]
    async fn update_shrinks_a_long_wait() {
        let wait = Arc::new(WaitTask::new(HOUR));
        let cancel = CancellationToken::new();
        let handle = {
            let wait = Arc::clone(&wait);
            let cancel = cancel.clone();
            tokio::spawn(async move { wait.run(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        wait.update_wait_time(Duration::from_millis(10));

        timeout(Duration::from_secs(1), handle)
            .await
            .expect("shrunk wait must elapse promptly")
            .unwrap()
            .expect("an elapsed wait completes normally");
    }

    #[tokio::test]
    async fn update_before_run_is_observed() {
        let wait = WaitTask::new(HOUR);
        wait.update_wait_time(Duration::from_millis(10));
        let cancel = CancellationToken::new();

        timeout(Duration::from_secs(1), wait.run(&cancel))
            .await
            .expect("updated wait must elapse promptly")
            .expect("an elapsed wait completes normally");
    }
}
