//! Escalating re-request backoff after a rejected activation

use chrono::{DateTime, Duration, Utc};

/// Cooldown in minutes, indexed by `min(rejection_count - 1, len - 1)`.
pub const COOLDOWN_MINUTES: [i64; 8] = [5, 15, 30, 60, 180, 420, 720, 1440];

/// Cooldown that applies after the `rejection_count`-th rejection.
pub fn cooldown_for(rejection_count: i32) -> Duration {
    if rejection_count <= 0 {
        return Duration::zero();
    }
    let index = ((rejection_count - 1) as usize).min(COOLDOWN_MINUTES.len() - 1);
    Duration::minutes(COOLDOWN_MINUTES[index])
}

/// Whether a provider may submit a new activation request at `now`.
pub fn can_request_again(
    rejected_at: Option<DateTime<Utc>>,
    rejection_count: i32,
    now: DateTime<Utc>,
) -> bool {
    cooldown_remaining(rejected_at, rejection_count, now).is_none()
}

/// Time left before another request is allowed, `None` once it is.
pub fn cooldown_remaining(
    rejected_at: Option<DateTime<Utc>>,
    rejection_count: i32,
    now: DateTime<Utc>,
) -> Option<Duration> {
    let rejected_at = rejected_at?;
    if rejection_count <= 0 {
        return None;
    }
    let ready_at = rejected_at + cooldown_for(rejection_count);
    if now >= ready_at {
        None
    } else {
        Some(ready_at - now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_table() {
        assert_eq!(cooldown_for(0), Duration::zero());
        assert_eq!(cooldown_for(1), Duration::minutes(5));
        assert_eq!(cooldown_for(3), Duration::minutes(30));
        assert_eq!(cooldown_for(5), Duration::minutes(180));
        assert_eq!(cooldown_for(8), Duration::minutes(1440));
        assert_eq!(cooldown_for(10), Duration::minutes(1440));
        assert_eq!(cooldown_for(1000), Duration::hours(24));
    }

    #[test]
    fn test_never_rejected_can_request() {
        let now = Utc::now();
        assert!(can_request_again(None, 0, now));
        assert!(can_request_again(None, 4, now));
        assert!(can_request_again(Some(now), 0, now));
    }

    #[test]
    fn test_cooldown_boundaries() {
        let rejected_at = Utc::now();
        for (count, minutes) in [(1, 5), (3, 30), (10, 1440)] {
            let ready = rejected_at + Duration::minutes(minutes);
            assert!(!can_request_again(Some(rejected_at), count, rejected_at));
            assert!(!can_request_again(
                Some(rejected_at),
                count,
                ready - Duration::seconds(1)
            ));
            assert!(can_request_again(Some(rejected_at), count, ready));
            assert!(can_request_again(
                Some(rejected_at),
                count,
                ready + Duration::minutes(1)
            ));
        }
    }

    #[test]
    fn test_remaining_duration() {
        let rejected_at = Utc::now();
        let now = rejected_at + Duration::minutes(10);
        assert_eq!(
            cooldown_remaining(Some(rejected_at), 2, now),
            Some(Duration::minutes(5))
        );
        assert_eq!(cooldown_remaining(Some(rejected_at), 1, now), None);
    }
}
