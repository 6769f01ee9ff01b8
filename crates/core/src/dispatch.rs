//! Retry policy for dispatch messages.
//!
//! A message that fails to hand off (no capacity, worker unreachable) is made
//! invisible for `2^attempt` seconds, capped at [`MAX_BACKOFF_SECS`], and
//! redelivered with `attempt + 1`. The delivery that would reach the ceiling
//! instead goes to the dead-letter queue.

/// Total delivery attempts before a message is dead-lettered.
pub const MAX_DISPATCH_ATTEMPTS: i32 = 5;

/// Upper bound on the redelivery delay.
pub const MAX_BACKOFF_SECS: i64 = 60;

/// Redelivery delay after a failed attempt.
pub fn backoff_secs(attempt: i32, cap_secs: i64) -> i64 {
    let exp = attempt.clamp(0, 30) as u32;
    2i64.pow(exp).min(cap_secs)
}

/// What to do with a message whose delivery just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Make the message visible again after `delay_secs` with the new counter.
    Redeliver { next_attempt: i32, delay_secs: i64 },
    /// Retry budget spent; publish to the DLQ and fail the job.
    DeadLetter { attempts: i32 },
}

/// Decide the fate of a message after delivery `attempt` (0-based) failed.
pub fn decide(attempt: i32, max_attempts: i32, backoff_cap_secs: i64) -> RetryDecision {
    let attempts_made = attempt + 1;
    if attempts_made >= max_attempts {
        RetryDecision::DeadLetter {
            attempts: attempts_made,
        }
    } else {
        RetryDecision::Redeliver {
            next_attempt: attempts_made,
            delay_secs: backoff_secs(attempts_made, backoff_cap_secs),
        }
    }
}
