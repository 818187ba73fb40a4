// ── Backoff calculation ──────────────────────────────────────────────

use std::time::Duration;

use crate::config::ReconnectPolicy;

/// Exponential backoff with jitter.
///
/// `delay = clamp(base * multiplier^(attempt-1) * (1 + jitter), base, max)`
///
/// Random jitter desynchronizes clients that lost the stream at the
/// same moment. Clamping after jitter keeps every delay in
/// `[base_delay, max_delay]`.
pub fn calculate_reconnection_delay(attempt: u32, policy: &ReconnectPolicy) -> Duration {
    delay_with_jitter(attempt, policy, rand::random::<f64>())
}

/// Deterministic core of [`calculate_reconnection_delay`]; `sample` is
/// a uniform draw from `[0, 1)`.
pub(crate) fn delay_with_jitter(attempt: u32, policy: &ReconnectPolicy, sample: f64) -> Duration {
    let base = policy.base_delay.as_secs_f64();
    let max = policy.max_delay.as_secs_f64().max(base);
    let exp = i32::try_from(attempt.max(1) - 1).unwrap_or(i32::MAX);

    let raw = base * policy.multiplier.max(1.0).powi(exp);
    let jittered = raw * (1.0 + sample.clamp(0.0, 1.0) * policy.jitter.max(0.0));
    let clamped = if jittered.is_finite() {
        jittered.clamp(base, max)
    } else {
        max
    };
    Duration::from_secs_f64(clamped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_waits_base_delay() {
        let policy = ReconnectPolicy::default();
        assert_eq!(delay_with_jitter(1, &policy, 0.0), Duration::from_secs(5));
        assert_eq!(delay_with_jitter(1, &policy, 0.5), Duration::from_secs_f64(5.25));
    }

    #[test]
    fn backoff_increases_exponentially() {
        let policy = ReconnectPolicy::default();
        let d1 = delay_with_jitter(1, &policy, 0.0);
        let d2 = delay_with_jitter(2, &policy, 0.0);
        let d3 = delay_with_jitter(3, &policy, 0.0);
        assert_eq!(d2, d1 * 2);
        assert_eq!(d3, d1 * 4);
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let policy = ReconnectPolicy::default();
        assert_eq!(delay_with_jitter(10, &policy, 0.99), Duration::from_secs(300));
        assert_eq!(delay_with_jitter(u32::MAX, &policy, 0.5), Duration::from_secs(300));
    }

    #[test]
    fn every_delay_stays_within_bounds() {
        let policy = ReconnectPolicy::default();
        for attempt in 1..=64 {
            let d = calculate_reconnection_delay(attempt, &policy);
            assert!(d >= policy.base_delay, "attempt {attempt}: {d:?}");
            assert!(d <= policy.max_delay, "attempt {attempt}: {d:?}");
        }
    }

    #[test]
    fn attempt_zero_is_treated_as_first() {
        let policy = ReconnectPolicy::default();
        assert_eq!(delay_with_jitter(0, &policy, 0.0), policy.base_delay);
    }
}
