//! Bounded retry and polling primitives
//!
//! Every wait in the driver goes through one of these helpers so that no
//! loop can run without an upper bound.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// Exponential backoff with a fractional growth factor
#[derive(Debug, Clone)]
pub struct Backoff {
    base_delay: Duration,
    factor: f64,
    max_delay: Duration,
    max_attempts: u32,
    current_attempt: u32,
}

impl Backoff {
    /// Create a new backoff starting at `base_delay`, multiplied by `factor`
    /// after each attempt.
    pub fn new(base_delay: Duration, factor: f64, max_attempts: u32) -> Self {
        Backoff {
            base_delay,
            factor,
            max_delay: Duration::from_secs(60),
            max_attempts,
            current_attempt: 0,
        }
    }

    /// Backoff used while waiting for a FUSE process to exit
    pub fn process_exit(max_attempts: u32) -> Self {
        Backoff::new(Duration::from_millis(100), 1.5, max_attempts)
    }

    /// Get the next delay, or None if max attempts reached
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.current_attempt >= self.max_attempts {
            return None;
        }

        // Whole milliseconds, truncated
        let scale = self.factor.powi(self.current_attempt as i32);
        let delay = Duration::from_millis((self.base_delay.as_millis() as f64 * scale) as u64);
        self.current_attempt += 1;

        Some(delay.min(self.max_delay))
    }

    /// Number of delays handed out so far
    pub fn attempts(&self) -> u32 {
        self.current_attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Reset the backoff
    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

/// Sleep for `delay` unless the token fires first.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = sleep(delay) => Ok(()),
    }
}

/// Poll `check` every `interval` until it returns `true`.
///
/// Fails with the error built by `on_timeout` once `timeout` has elapsed,
/// or with [`Error::Cancelled`] when the token fires.
pub async fn poll_until<F, Fut, T>(
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
    mut check: F,
    on_timeout: T,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
    T: FnOnce() -> Error,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check().await? {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(on_timeout());
        }
        sleep_or_cancel(interval, cancel).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_growth() {
        let mut backoff = Backoff::process_exit(3);

        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(150)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(225)));
        assert!(backoff.next_delay().is_none());
        assert_eq!(backoff.attempts(), 3);
    }

    #[test]
    fn test_backoff_caps_delay() {
        let mut backoff = Backoff::new(Duration::from_secs(40), 2.0, 3);
        backoff.next_delay();
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(60)));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(40)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let cancel = CancellationToken::new();

        poll_until(
            Duration::from_millis(10),
            Duration::from_secs(1),
            &cancel,
            || {
                let counter = counter.clone();
                async move { Ok(counter.fetch_add(1, Ordering::SeqCst) >= 2) }
            },
            || Error::internal("unexpected timeout"),
        )
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_times_out() {
        let cancel = CancellationToken::new();
        let result = poll_until(
            Duration::from_millis(10),
            Duration::from_millis(100),
            &cancel,
            || async { Ok(false) },
            || Error::Internal("timeout".to_string()),
        )
        .await;

        assert!(matches!(result, Err(Error::Internal(msg)) if msg == "timeout"));
    }

    #[tokio::test]
    async fn test_poll_until_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = poll_until(
            Duration::from_secs(5),
            Duration::from_secs(60),
            &cancel,
            || async { Ok(false) },
            || Error::Internal("timeout".to_string()),
        )
        .await;

        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
