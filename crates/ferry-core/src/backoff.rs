//! Retry-delay computation shared by the executor's error path (§4.3) and
//! its infinite-retry ack loop. Two distinct policies live here because they
//! serve different purposes: job backoff spaces out *business* retries,
//! while ack backoff spaces out *acknowledgement* retries against a
//! struggling database and must never give up.

use chrono::Duration;

/// Default exponential-with-jitter backoff for job retries: `2^attempt`
/// seconds, capped at one hour, with up to 10% jitter so a thundering herd
/// of jobs that failed together doesn't retry in lockstep.
pub fn exponential_with_jitter(attempt: i32) -> Duration {
    let base_secs = 2i64.saturating_pow(attempt.clamp(0, 20) as u32).min(3600);
    let jitter_secs = (base_secs as f64 * 0.1 * fastrand::f64()) as i64;
    Duration::seconds(base_secs + jitter_secs)
}

/// Linear backoff for the executor's ack-retry loop (§4.3 step 5): the ack
/// must never give up, so it backs off linearly rather than exponentially,
/// keeping retries frequent even after many failures, capped at 30s so a
/// long outage doesn't silently stop trying to ack for hours.
pub fn ack_retry_delay(attempt: u32) -> std::time::Duration {
    let secs = (attempt as u64).saturating_mul(1).min(30).max(1);
    std::time::Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_is_capped() {
        let delay = exponential_with_jitter(30);
        assert!(delay.num_seconds() <= 3960); // 3600 + 10% jitter headroom
    }

    #[test]
    fn exponential_backoff_grows() {
        assert!(exponential_with_jitter(1).num_seconds() < exponential_with_jitter(5).num_seconds());
    }

    #[test]
    fn ack_retry_delay_is_bounded() {
        assert_eq!(ack_retry_delay(0), std::time::Duration::from_secs(1));
        assert_eq!(ack_retry_delay(100), std::time::Duration::from_secs(30));
    }
}
