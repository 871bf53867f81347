use std::time::Duration;
use tokio::time::Instant;

/// One-shot deadline. Starting it again replaces the previous deadline, so a `Timer` is
/// never armed twice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    pub fn start(&mut self, now: Instant, after: Duration) {
        self.deadline = Some(now + after);
    }

    /// Disarm. Returns whether the timer was armed.
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn expired(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(deadline) if now >= deadline)
    }

    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }
}

/// Sleep until `deadline`, or forever when there is none
pub async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Earliest of several optional deadlines
pub fn earliest(deadlines: impl IntoIterator<Item = Option<Instant>>) -> Option<Instant> {
    deadlines.into_iter().flatten().min()
}

/// Whole seconds left, rounded up
pub fn ceil_secs(duration: Duration) -> u64 {
    let millis = duration.as_millis();
    millis.div_ceil(1000) as u64
}
