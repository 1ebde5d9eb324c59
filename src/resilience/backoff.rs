//! Exponential backoff with jitter, shared by the resilience envelope's
//! retrying HTTP client and the task queue's nack/reschedule path.

use std::time::Duration;

/// `delay = base * 2^(attempt-1) * (1 + U(-jitter, +jitter))`, floored at one
/// unit of `base`. `attempt` is 1-indexed (the first retry is attempt 1).
/// Deterministic when `jitter == 0.0`.
pub fn compute(base: Duration, attempt: u32, jitter: f64) -> Duration {
    let attempt = attempt.max(1);
    let exponent = attempt - 1;
    let multiplier = 2f64.powi(exponent.min(32) as i32);
    let nominal = base.as_secs_f64() * multiplier;

    let jitter = jitter.clamp(0.0, 1.0);
    let factor = if jitter == 0.0 {
        1.0
    } else {
        1.0 + rand::random_range(-jitter..=jitter)
    };

    let seconds = (nominal * factor).max(base.as_secs_f64().min(nominal));
    Duration::from_secs_f64(seconds.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_jitter_is_deterministic_and_doubles() {
        let base = Duration::from_secs(1);
        let d1 = compute(base, 1, 0.0);
        let d2 = compute(base, 2, 0.0);
        let d3 = compute(base, 3, 0.0);
        assert_eq!(d1, Duration::from_secs(1));
        assert_eq!(d2, Duration::from_secs(2));
        assert_eq!(d3, Duration::from_secs(4));
        assert_eq!(d2.as_secs_f64(), d1.as_secs_f64() * 2.0);
        assert_eq!(d3.as_secs_f64(), d2.as_secs_f64() * 2.0);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let base = Duration::from_secs(10);
        for _ in 0..200 {
            let d = compute(base, 1, 0.25);
            assert!(d.as_secs_f64() >= 7.5 && d.as_secs_f64() <= 12.5, "{:?}", d);
        }
    }

    #[test]
    fn attempt_zero_treated_as_one() {
        assert_eq!(compute(Duration::from_secs(1), 0, 0.0), compute(Duration::from_secs(1), 1, 0.0));
    }
}
