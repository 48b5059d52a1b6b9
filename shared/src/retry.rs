//! Exponential backoff with jitter, used by `log_fetcher` to absorb
//! transient backend errors without hammering the node.
//!
//! Grounded in the `Backoff`/`retry_with_backoff` split from
//! `strata_common::retry`, adapted to async sleeps and given jitter as
//! required by spec section 4.1.

use rand::Rng;
use std::time::Duration;

/// Computes the delay before retry attempt `attempt` (0-indexed), bounded by
/// `max_delay` and jittered by +/-25% to avoid synchronized retries across
/// chains.
pub fn backoff_delay(attempt: u32, base_delay: Duration, max_delay: Duration) -> Duration {
    let exponential = base_delay.saturating_mul(1 << attempt.min(16));
    let capped = exponential.min(max_delay);
    jitter(capped)
}

fn jitter(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.75..1.25);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}

/// Whether a backend error should be retried or surfaced immediately.
/// Mirrors the "distinguish retriable from fatal" requirement of spec
/// section 4.1: rate limits, range-too-wide, too-many-results, timeouts and
/// network errors are retriable; auth and malformed-request errors are not.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Retriable {
    Yes,
    No,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_caps() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(10);
        for attempt in 0..20 {
            let delay = backoff_delay(attempt, base, max);
            // jitter can push slightly above max, bound generously.
            assert!(delay <= max + max / 2, "attempt {attempt} delay {delay:?}");
        }
    }

    #[test]
    fn delay_is_jittered() {
        let base = Duration::from_millis(1000);
        let max = Duration::from_secs(60);
        let samples: Vec<_> = (0..10).map(|_| backoff_delay(3, base, max)).collect();
        assert!(samples.iter().any(|d| *d != samples[0]));
    }
}
