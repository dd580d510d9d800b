use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Full-jitter exponential backoff: sleep for a random duration in
/// `[0, min(cap, base * 2^attempt)]`. Used by the RPC connection pool's
/// retry loop and by reconcilers computing a requeue-after delay for
/// transient failures (spec.md §5, "Backpressure").
pub fn full_jitter(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let base_ms = base.as_millis() as u64;
    let cap_ms = cap.as_millis() as u64;
    let pow = if attempt >= 63 { u64::MAX } else { 1u64 << attempt };
    let exp_ms = base_ms.saturating_mul(pow);
    let upper = exp_ms.min(cap_ms).max(1);
    let jitter_ms = rand::random_range(0..=upper);
    Duration::from_millis(jitter_ms)
}

/// Linear backoff as used by the RPC client's per-operation retry
/// (spec.md §4.1: `RetryDelay * attempt`).
pub fn linear(delay: Duration, attempt: u32) -> Duration {
    delay.saturating_mul(attempt.max(1))
}

/// Requeue delay clamped to the documented baseline/cap for transient
/// failures (spec.md §5: "30 s baseline up to 5 minutes").
pub fn capped_requeue_delay(attempt: u32) -> Duration {
    full_jitter(Duration::from_secs(30), Duration::from_secs(300), attempt)
}

pub async fn sleep_cancellable(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_jitter_never_exceeds_cap() {
        let cap = Duration::from_secs(300);
        for attempt in 0..20 {
            let d = full_jitter(Duration::from_secs(30), cap, attempt);
            assert!(d <= cap);
        }
    }

    #[test]
    fn linear_backoff_scales_with_attempt() {
        let delay = Duration::from_millis(100);
        assert_eq!(linear(delay, 1), Duration::from_millis(100));
        assert_eq!(linear(delay, 3), Duration::from_millis(300));
    }
}
