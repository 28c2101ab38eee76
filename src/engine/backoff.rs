use std::time::Duration;

/// How the acquisition loop paces reconnect attempts.
///
/// The default is a fixed 100 ms pause before every re-open, with no limit on
/// attempts. Raising `max_backoff` above `initial_backoff` turns it into an
/// exponential backoff that resets after the next successful read.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Re-run endpoint resolution after this many consecutive failed
    /// re-opens. 0 keeps the cached endpoint forever.
    pub rediscover_after: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(100),
            multiplier: 2.0,
            rediscover_after: 0,
        }
    }
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_backoff: delay,
            max_backoff: delay,
            ..Self::default()
        }
    }

    pub fn exponential(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial_backoff: initial,
            max_backoff: max.max(initial),
            multiplier: multiplier.max(1.0),
            ..Self::default()
        }
    }

    pub fn with_rediscovery(mut self, after_failures: u32) -> Self {
        self.rediscover_after = after_failures;
        self
    }

    pub(crate) fn backoff(&self) -> Backoff {
        Backoff {
            current: self.initial_backoff,
            policy: self.clone(),
        }
    }
}

/// Delay sequence for one run of consecutive failures
#[derive(Debug)]
pub(crate) struct Backoff {
    policy: ReconnectPolicy,
    current: Duration,
}

impl Backoff {
    /// Current delay; the next one grows by the multiplier, saturating at
    /// `max_backoff` when the product is not representable.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let factor = self.policy.multiplier.max(1.0);
        let grown = Duration::try_from_secs_f64(self.current.as_secs_f64() * factor)
            .unwrap_or(self.policy.max_backoff);
        self.current = grown.min(self.policy.max_backoff).max(self.policy.initial_backoff);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.policy.initial_backoff;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn default_is_fixed_short_sleep() {
        let mut backoff = ReconnectPolicy::default().backoff();
        for _ in 0..5 {
            assert_eq!(backoff.next_delay(), ms(100));
        }
    }

    #[test]
    fn exponential_grows_to_cap_and_resets() {
        let mut backoff = ReconnectPolicy::exponential(ms(100), ms(500), 2.0).backoff();
        let delays: Vec<_> = (0..5).map(|_| backoff.next_delay()).collect();
        assert_eq!(delays, vec![ms(100), ms(200), ms(400), ms(500), ms(500)]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), ms(100));
    }

    #[test]
    fn exponential_clamps_bad_inputs() {
        let policy = ReconnectPolicy::exponential(ms(200), ms(50), 0.5);
        assert_eq!(policy.max_backoff, ms(200));
        assert_eq!(policy.multiplier, 1.0);
    }

    #[test]
    fn huge_multipliers_saturate_at_the_cap() {
        for multiplier in [f64::INFINITY, 1e30, f64::MAX] {
            let mut backoff = ReconnectPolicy::exponential(ms(10), ms(50), multiplier).backoff();
            let delays: Vec<_> = (0..4).map(|_| backoff.next_delay()).collect();
            assert_eq!(delays, vec![ms(10), ms(50), ms(50), ms(50)], "{multiplier}");
        }
    }

    #[test]
    fn nan_multiplier_stays_fixed() {
        let policy = ReconnectPolicy {
            multiplier: f64::NAN,
            ..ReconnectPolicy::exponential(ms(10), ms(50), 2.0)
        };
        let mut backoff = policy.backoff();
        assert_eq!(backoff.next_delay(), ms(10));
        assert_eq!(backoff.next_delay(), ms(10));
    }
}
