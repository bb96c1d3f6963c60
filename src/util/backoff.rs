use rand::Rng;
use std::time::Duration;

/// Exponential retry schedule used for REST requests.
///
/// Attempt `k` (1-based) waits `random() * base_delay * 2^k` before it is dispatched again.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    /// Total number of attempts, the first one included.
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts: max_attempts.max(1),
        }
    }
}

/// Tracks attempts made for one logical request.
#[derive(Debug)]
pub struct RetryState {
    policy: RetryPolicy,
    attempts: u32,
    last_error: Option<String>,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Registers that an attempt is about to be dispatched.
    pub fn begin_attempt(&mut self) {
        self.attempts += 1;
    }

    pub fn record_failure(&mut self, reason: impl Into<String>) {
        self.last_error = Some(reason.into());
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.policy.max_attempts
    }

    pub fn next_delay(&self) -> Duration {
        self.next_delay_with_rng(&mut rand::thread_rng())
    }

    fn next_delay_with_rng<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let exp = 2u32.saturating_pow(self.attempts.min(16));
        let ceiling = self.policy.base_delay.saturating_mul(exp);
        ceiling.mul_f64(rng.gen_range(0.0..1.0))
    }
}

/// Delay before reconnect attempt `attempt` of a realtime socket:
/// `random() * min(max_interval, (2^attempt - 1) seconds)`.
pub fn reconnect_interval(attempt: u32, max_interval: Duration) -> Duration {
    reconnect_interval_with_rng(attempt, max_interval, &mut rand::thread_rng())
}

fn reconnect_interval_with_rng<R: Rng + ?Sized>(
    attempt: u32,
    max_interval: Duration,
    rng: &mut R,
) -> Duration {
    let exp_secs = 2u64.saturating_pow(attempt.min(32)).saturating_sub(1);
    let ceiling = Duration::from_secs(exp_secs).min(max_interval);
    ceiling.mul_f64(rng.gen_range(0.0..1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn allows_exactly_max_attempts() {
        let mut state = RetryState::new(RetryPolicy::new(Duration::from_millis(125), 3));
        let mut dispatched = 0;
        loop {
            state.begin_attempt();
            dispatched += 1;
            if !state.can_retry() {
                break;
            }
        }
        assert_eq!(dispatched, 3);
        assert_eq!(state.attempts(), 3);
    }

    #[test]
    fn delay_is_bounded_by_exponential_ceiling() {
        let mut state = RetryState::new(RetryPolicy::new(Duration::from_millis(125), 5));
        let mut rng = StdRng::seed_from_u64(3);
        for attempt in 1..=4u32 {
            state.begin_attempt();
            let delay = state.next_delay_with_rng(&mut rng);
            assert!(delay < Duration::from_millis(125 * 2u64.pow(attempt)));
        }
    }

    #[test]
    fn zero_base_delay_never_waits() {
        let mut state = RetryState::new(RetryPolicy::new(Duration::ZERO, 5));
        state.begin_attempt();
        assert_eq!(state.next_delay(), Duration::ZERO);
    }

    #[test]
    fn reconnect_interval_is_capped() {
        let mut rng = StdRng::seed_from_u64(11);
        for attempt in 0..40 {
            let delay = reconnect_interval_with_rng(attempt, Duration::from_secs(30), &mut rng);
            assert!(delay <= Duration::from_secs(30));
        }
        assert_eq!(
            reconnect_interval_with_rng(0, Duration::from_secs(30), &mut rng),
            Duration::ZERO
        );
    }
}
