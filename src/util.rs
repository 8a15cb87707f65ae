use anyhow::anyhow;
use rand::Rng;
use std::{fmt::Display, time::Duration};

pub(crate) trait AttachContext<T> {
    fn attach_context<C>(self, context: C) -> anyhow::Result<T>
    where
        C: Display + Send + Sync + 'static;
    fn attach_with_context<C, F>(self, f: F) -> anyhow::Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> AttachContext<T> for Result<T, E>
where
    E: std::error::Error + Into<anyhow::Error>,
{
    fn attach_context<C>(self, context: C) -> anyhow::Result<T>
    where
        C: Display + Send + Sync + 'static,
    {
        self.map_err(move |e| anyhow!(e).context(context))
    }
    fn attach_with_context<C, F>(self, f: F) -> anyhow::Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(move |e| anyhow!(e).context(f()))
    }
}

/// Exponential backoff between `min` and `max`.
///
/// The multiplier is derived so that `steps` consecutive failures reach `max`.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    min: Duration,
    max: Duration,
    multiplier: f64,
    current: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration, steps: u16) -> Self {
        let max = max.max(min);
        let multiplier = if min.is_zero() || steps == 0 {
            1.0
        } else {
            (max.as_secs_f64() / min.as_secs_f64()).powf(1.0 / f64::from(steps))
        };
        Self {
            min,
            max,
            multiplier,
            current: min,
        }
    }

    /// Delay before the next attempt, without jitter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.multiplier)
            .map_or(self.max, |next| next.min(self.max));
        delay
    }

    /// Delay before the next attempt, with up to 50ms of random jitter.
    pub fn next_jittered(&mut self) -> Duration {
        self.next_delay()
            .saturating_add(Duration::from_millis(rand::thread_rng().gen_range(0..50)))
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_reaches_max_after_steps() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(16), 4);
        let delays: Vec<_> = (0..6).map(|_| backoff.next_delay().as_secs_f64()).collect();
        let expected = [1.0, 2.0, 4.0, 8.0, 16.0, 16.0];
        for (delay, expected) in delays.iter().zip(expected.iter()) {
            assert!((delay - expected).abs() < 1e-6, "{} != {}", delay, expected);
        }
    }

    #[test]
    fn backoff_saturates_at_huge_max() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::MAX, 1);
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::MAX);
        assert_eq!(backoff.next_jittered(), Duration::MAX);
        assert_eq!(backoff.next_jittered(), Duration::MAX);
    }

    #[test]
    fn backoff_reset_starts_over() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(10), 3);
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn jitter_is_bounded() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(1), 1);
        for _ in 0..20 {
            let delay = backoff.next_jittered();
            assert!(delay >= Duration::from_secs(1));
            assert!(delay < Duration::from_millis(1050));
        }
    }

    #[test]
    fn context_is_attached() {
        let r: Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        let err = r.attach_context("reading config").unwrap_err();
        assert_eq!(err.to_string(), "reading config");
        assert_eq!(err.root_cause().to_string(), "boom");
    }
}
