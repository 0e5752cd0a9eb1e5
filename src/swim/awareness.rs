//! Local health score used to scale probe timeouts under load: a clamped
//! counter adapted to SWIM's awareness score from the Lifeguard
//! extensions.

use std::sync::atomic::{AtomicI64, Ordering};

/// A bounded `[0, max]` health score: 0 is perfectly healthy, `max` means
/// this node's own probes/replies are currently unreliable enough that
/// timeouts should be stretched to avoid false suspicions under load.
pub struct Awareness {
    score: AtomicI64,
    max: i64,
}

impl Awareness {
    pub fn new(max: usize) -> Self {
        Self { score: AtomicI64::new(0), max: max as i64 }
    }

    /// Apply a delta (positive worsens, negative improves), clamped to
    /// `[0, max]`.
    pub fn apply_delta(&self, delta: i64) {
        let _ = self
            .score
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| {
                Some((s + delta).clamp(0, self.max))
            });
    }

    pub fn score(&self) -> i64 {
        self.score.load(Ordering::SeqCst)
    }

    /// Scale a base duration by the current score: `effective = base * (1 +
    /// awareness)`, so a fully healthy node (score 0) uses exactly `base`
    /// and each additional point of unhealthiness stretches it by another
    /// full `base`.
    pub fn scale_timeout(&self, base: std::time::Duration) -> std::time::Duration {
        let score = self.score();
        base.mul_f64(1.0 + score as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn score_clamps_to_bounds() {
        let a = Awareness::new(8);
        for _ in 0..20 {
            a.apply_delta(1);
        }
        assert_eq!(a.score(), 8);
        for _ in 0..20 {
            a.apply_delta(-1);
        }
        assert_eq!(a.score(), 0);
    }

    #[test]
    fn healthy_score_does_not_stretch_timeout() {
        let a = Awareness::new(8);
        assert_eq!(a.scale_timeout(Duration::from_millis(500)), Duration::from_millis(500));
    }

    #[test]
    fn unhealthy_score_stretches_timeout() {
        let a = Awareness::new(8);
        a.apply_delta(8);
        assert!(a.scale_timeout(Duration::from_millis(500)) > Duration::from_millis(500));
    }
}
