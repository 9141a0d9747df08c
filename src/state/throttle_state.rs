use std::time::Duration;
use tokio::time::Instant;

/// Tracks when an API may next be called
///
/// One instance is shared by every caller of a throttled client, so a
/// `Retry-After` seen by one request delays all of them.
#[derive(Debug, Clone, Default)]
pub struct ThrottleState {
    /// Earliest instant at which the next request may be sent
    pub next_call_at: Option<Instant>,

    /// Number of times the API pushed the next-call mark back
    pub pushback_count: u64,
}

impl ThrottleState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calculates the time until the next request can be made
    ///
    /// Returns None if a request can be made now, or the duration to wait otherwise.
    pub fn time_until_next_call(&self, now: Instant) -> Option<Duration> {
        match self.next_call_at {
            Some(at) if at > now => Some(at - now),
            _ => None,
        }
    }

    /// Records that the API asked callers to wait `wait` from `now`
    ///
    /// The mark only moves forward; a shorter wait never shortens an
    /// earlier, longer one.
    pub fn push_back(&mut self, now: Instant, wait: Duration) {
        let candidate = now + wait;
        self.next_call_at = Some(match self.next_call_at {
            Some(existing) if existing > candidate => existing,
            _ => candidate,
        });
        self.pushback_count += 1;
    }

    /// Checks if callers are currently being held back
    pub fn is_blocked(&self, now: Instant) -> bool {
        self.time_until_next_call(now).is_some()
    }
}
