//! Cancellable sleeping for the poll loop.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// A timer whose sleeps end early, and cleanly, on cancellation.
#[derive(Debug, Clone)]
pub struct CancellableTimer {
    token: CancellationToken,
}

impl CancellableTimer {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Sleep for `duration`. Returns false if cancelled first.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Drive `fut` unless cancelled first; `None` on cancellation.
    pub async fn run<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            output = fut => Some(output),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_elapses() {
        let timer = CancellableTimer::new(CancellationToken::new());
        let start = tokio::time::Instant::now();
        assert!(timer.sleep(Duration::from_secs(60)).await);
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let token = CancellationToken::new();
        let timer = CancellableTimer::new(token.clone());
        let start = tokio::time::Instant::now();

        let sleeper = tokio::spawn(async move { timer.sleep(Duration::from_secs(300)).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();

        assert!(!sleeper.await.unwrap());
        assert!(start.elapsed() < Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_run_after_cancel() {
        let token = CancellationToken::new();
        token.cancel();
        let timer = CancellableTimer::new(token);
        assert_eq!(timer.run(async { 1 }).await, None);
        assert!(timer.is_cancelled());
    }
}
