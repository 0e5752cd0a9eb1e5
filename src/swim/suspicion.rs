//! Per-suspect timeout with logarithmic contraction as independent peers
//! confirm the suspicion (Lifeguard-style suspicion timer). A spawned task
//! driven by a `tokio::sync::watch` channel rather than a condvar.

use std::time::Duration;

use tokio::sync::watch;

/// Computes the suspicion timeout for `confirmations` independent peers
/// having corroborated the verdict, contracting logarithmically from `max`
/// (zero confirmations) toward `min` (at `expected_confirmations` or more).
///
/// `timeout = max - (max - min) * ln(confirmations + 1) / ln(expected + 1)`,
/// floored at `min`.
pub fn suspicion_timeout(min: Duration, max: Duration, expected_confirmations: usize, confirmations: usize) -> Duration {
    if expected_confirmations == 0 || confirmations == 0 {
        return max;
    }
    let frac = ((confirmations as f64 + 1.0).ln()) / ((expected_confirmations as f64 + 1.0).ln());
    let span = max.as_secs_f64() - min.as_secs_f64();
    let scaled = max.as_secs_f64() - span * frac.min(1.0);
    Duration::from_secs_f64(scaled.max(min.as_secs_f64()))
}

/// A running suspicion timer for one node. Each additional confirmation
/// (`confirm`) re-evaluates the remaining wait; when it elapses without the
/// node being refuted, `on_timeout` fires exactly once.
pub struct SuspicionTimer {
    confirm_tx: watch::Sender<usize>,
}

impl SuspicionTimer {
    pub fn spawn<F>(min: Duration, max: Duration, expected_confirmations: usize, on_timeout: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let (confirm_tx, mut confirm_rx) = watch::channel(0usize);
        tokio::spawn(async move {
            let start = tokio::time::Instant::now();
            loop {
                let confirmations = *confirm_rx.borrow();
                let timeout = suspicion_timeout(min, max, expected_confirmations, confirmations);
                let deadline = start + timeout;
                let now = tokio::time::Instant::now();
                if now >= deadline {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => break,
                    changed = confirm_rx.changed() => {
                        if changed.is_err() {
                            // Sender dropped: the suspicion was refuted elsewhere.
                            return;
                        }
                    }
                }
            }
            on_timeout();
        });
        Self { confirm_tx }
    }

    /// Record one more independent confirmation, which may shorten the
    /// remaining wait.
    pub fn confirm(&self, confirmations: usize) {
        let _ = self.confirm_tx.send(confirmations);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_confirmations_uses_max_timeout() {
        assert_eq!(suspicion_timeout(Duration::from_secs(1), Duration::from_secs(10), 3, 0), Duration::from_secs(10));
    }

    #[test]
    fn full_confirmations_approaches_min_timeout() {
        let t = suspicion_timeout(Duration::from_secs(1), Duration::from_secs(10), 3, 3);
        assert!(t <= Duration::from_secs(2));
        assert!(t >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_after_max_timeout_with_no_confirmations() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(1);
        let _timer = SuspicionTimer::spawn(Duration::from_millis(50), Duration::from_millis(200), 3, move || {
            let _ = tx.try_send(());
        });
        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn confirmations_contract_the_timeout() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(1);
        let timer = SuspicionTimer::spawn(Duration::from_millis(50), Duration::from_millis(500), 3, move || {
            let _ = tx.try_send(());
        });
        timer.confirm(3);
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(rx.recv().await.is_some());
    }
}
