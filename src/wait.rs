use crate::timer::{ceil_secs, earliest, Timer};
use std::time::Duration;
use tokio::time::Instant;

const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitState {
    /// No upload has started since the last reset
    Idle,
    Pending,
    Done { download_url: String },
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitEvent {
    Countdown(u64),
    Done { download_url: String },
    Failed,
}

/// Wait for the result produced after an upload. The realtime completion and the timeout
/// race; whichever is handled first disarms both timers.
pub struct UploadWait {
    timeout: Duration,
    state: WaitState,
    countdown: Timer,
    expiry: Timer,
}

impl UploadWait {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            state: WaitState::Idle,
            countdown: Timer::default(),
            expiry: Timer::default(),
        }
    }

    pub fn state(&self) -> &WaitState {
        &self.state
    }

    /// Begin waiting. Restarting replaces any timers already armed.
    pub fn start(&mut self, now: Instant) -> WaitEvent {
        self.state = WaitState::Pending;
        self.expiry.start(now, self.timeout);
        self.countdown.start(now, COUNTDOWN_TICK);
        WaitEvent::Countdown(ceil_secs(self.timeout))
    }

    /// Result arrived. Ignored once the wait has already finished either way.
    pub fn complete(&mut self, download_url: &str) -> Option<WaitEvent> {
        match self.state {
            WaitState::Idle | WaitState::Pending => {
                self.clear();
                self.state = WaitState::Done {
                    download_url: download_url.to_string(),
                };
                Some(WaitEvent::Done {
                    download_url: download_url.to_string(),
                })
            }
            WaitState::Done { .. } | WaitState::Failed => {
                tracing::debug!("Result ignored, wait already finished");
                None
            }
        }
    }

    pub fn on_expire(&mut self, now: Instant) -> Option<WaitEvent> {
        if self.state != WaitState::Pending {
            return None;
        }

        if self.expiry.expired(now) {
            self.clear();
            self.state = WaitState::Failed;
            tracing::warn!("No result within {:?}", self.timeout);
            return Some(WaitEvent::Failed);
        }

        if let Some(tick_at) = self.countdown.deadline().filter(|at| now >= *at) {
            self.countdown.start(tick_at, COUNTDOWN_TICK);
            return Some(WaitEvent::Countdown(self.remaining_secs(tick_at)));
        }

        None
    }

    /// Disarm both timers. Safe to call any number of times.
    pub fn clear(&mut self) -> bool {
        let countdown = self.countdown.cancel();
        let expiry = self.expiry.cancel();
        countdown || expiry
    }

    /// Clear timers and forget the outcome
    pub fn reset(&mut self) {
        self.clear();
        self.state = WaitState::Idle;
    }

    pub fn remaining_secs(&self, now: Instant) -> u64 {
        self.expiry.remaining(now).map(ceil_secs).unwrap_or(0)
    }

    pub fn deadline(&self) -> Option<Instant> {
        earliest([self.countdown.deadline(), self.expiry.deadline()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fire_until(wait: &mut UploadWait, until: Instant) -> Vec<WaitEvent> {
        let mut events = Vec::new();
        while let Some(deadline) = wait.deadline() {
            if deadline > until {
                break;
            }
            events.extend(wait.on_expire(deadline));
        }
        events
    }

    #[test]
    fn timeout_without_result_fails() {
        let t0 = Instant::now();
        let mut wait = UploadWait::new(Duration::from_secs(60));

        assert_eq!(wait.start(t0), WaitEvent::Countdown(60));
        let events = fire_until(&mut wait, t0 + Duration::from_secs(61));

        assert_eq!(events.len(), 60);
        assert_eq!(events[0], WaitEvent::Countdown(59));
        assert_eq!(events[58], WaitEvent::Countdown(1));
        assert_eq!(events.last(), Some(&WaitEvent::Failed));
        assert_eq!(wait.state(), &WaitState::Failed);
        assert_eq!(wait.deadline(), None);
    }

    #[test]
    fn result_before_timeout_wins() {
        let t0 = Instant::now();
        let mut wait = UploadWait::new(Duration::from_secs(60));
        wait.start(t0);

        let done = wait.complete("https://cdn.example.com/out.jpg");
        assert_eq!(
            done,
            Some(WaitEvent::Done {
                download_url: "https://cdn.example.com/out.jpg".to_string()
            })
        );
        assert_eq!(wait.on_expire(t0 + Duration::from_secs(61)), None);
        assert!(matches!(wait.state(), WaitState::Done { .. }));
    }

    #[test]
    fn result_after_timeout_is_ignored() {
        let t0 = Instant::now();
        let mut wait = UploadWait::new(Duration::from_secs(1));
        wait.start(t0);

        assert_eq!(
            wait.on_expire(t0 + Duration::from_secs(2)),
            Some(WaitEvent::Failed)
        );
        assert_eq!(wait.complete("https://late.example.com/x.jpg"), None);
        assert_eq!(wait.state(), &WaitState::Failed);
    }

    #[test]
    fn late_tick_keeps_the_schedule() {
        let t0 = Instant::now();
        let mut wait = UploadWait::new(Duration::from_secs(60));
        wait.start(t0);

        assert_eq!(
            wait.on_expire(t0 + Duration::from_millis(1500)),
            Some(WaitEvent::Countdown(59))
        );
        assert_eq!(wait.deadline(), Some(t0 + Duration::from_secs(2)));
    }

    #[test]
    fn clear_twice_is_harmless() {
        let mut wait = UploadWait::new(Duration::from_secs(60));
        wait.start(Instant::now());

        assert!(wait.clear());
        assert!(!wait.clear());
        assert_eq!(wait.state(), &WaitState::Pending);
    }

    #[test]
    fn restart_keeps_single_timers() {
        let t0 = Instant::now();
        let mut wait = UploadWait::new(Duration::from_secs(60));
        wait.start(t0);
        wait.start(t0 + Duration::from_secs(30));

        assert_eq!(wait.remaining_secs(t0 + Duration::from_secs(30)), 60);
        // a late wakeup catches up one tick at a time from the restart
        assert!(matches!(
            wait.on_expire(t0 + Duration::from_secs(61)),
            Some(WaitEvent::Countdown(59))
        ));
        assert_eq!(wait.deadline(), Some(t0 + Duration::from_secs(32)));
        assert_eq!(wait.state(), &WaitState::Pending);
    }

    #[test]
    fn reset_returns_to_idle() {
        let mut wait = UploadWait::new(Duration::from_secs(60));
        wait.start(Instant::now());
        wait.reset();

        assert_eq!(wait.state(), &WaitState::Idle);
        assert_eq!(wait.deadline(), None);
    }
}
