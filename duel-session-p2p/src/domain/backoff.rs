use instant::Duration;

/// Capped exponential delay between reconnect attempts
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: u32,
    next: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: u32) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            multiplier: multiplier.max(1),
            next: initial,
        }
    }

    /// Delay before the next attempt; grows until the cap
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self
            .next
            .checked_mul(self.multiplier)
            .unwrap_or(self.max)
            .min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_until_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10), 2);
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
    }

    #[test]
    fn test_reset_starts_over() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1), 3);
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_initial_above_cap_is_clamped() {
        let mut backoff = Backoff::new(Duration::from_secs(30), Duration::from_secs(10), 2);
        assert_eq!(backoff.next_delay(), Duration::from_secs(10));
    }
}
