//! Circuit breaker for model warmup.
//!
//! After a failed warmup, further attempts are suppressed for a cooldown
//! window so a broken collaborator is not hammered on every recording start.

use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct WarmupBreaker {
    cooldown: Duration,
    last_failure: Option<Instant>,
}

impl WarmupBreaker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_failure: None,
        }
    }

    /// Whether a warmup attempt is currently allowed.
    pub fn should_attempt(&self, now: Instant) -> bool {
        match self.last_failure {
            Some(failed_at) => now.duration_since(failed_at) >= self.cooldown,
            None => true,
        }
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.last_failure = Some(now);
    }

    pub fn record_success(&mut self) {
        self.last_failure = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_first_attempt() {
        let breaker = WarmupBreaker::new(Duration::from_secs(300));
        assert!(breaker.should_attempt(Instant::now()));
    }

    #[test]
    fn test_suppresses_during_cooldown() {
        let mut breaker = WarmupBreaker::new(Duration::from_secs(300));
        let t0 = Instant::now();
        breaker.record_failure(t0);

        assert!(!breaker.should_attempt(t0 + Duration::from_secs(1)));
        assert!(!breaker.should_attempt(t0 + Duration::from_secs(299)));
        assert!(breaker.should_attempt(t0 + Duration::from_secs(300)));
    }

    #[test]
    fn test_success_resets() {
        let mut breaker = WarmupBreaker::new(Duration::from_secs(300));
        let t0 = Instant::now();
        breaker.record_failure(t0);
        breaker.record_success();
        assert!(breaker.should_attempt(t0 + Duration::from_secs(1)));
    }
}
