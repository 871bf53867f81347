use crate::config::GameConfig;
use crate::error::GateError;
use crate::timer::{ceil_secs, earliest, Timer};
use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expression {
    pub icon: &'static str,
    pub label: &'static str,
}

pub const EXPRESSIONS: [Expression; 6] = [
    Expression {
        icon: "😄",
        label: "big smile",
    },
    Expression {
        icon: "😮",
        label: "surprised",
    },
    Expression {
        icon: "😢",
        label: "sad",
    },
    Expression {
        icon: "😠",
        label: "angry",
    },
    Expression {
        icon: "😜",
        label: "silly",
    },
    Expression {
        icon: "😎",
        label: "cool",
    },
];

const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    Spinning { shown: usize },
    Selected { choice: usize },
    WindowOpen { choice: usize },
    Captured { choice: usize },
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateEvent {
    /// An option flashed during the spin
    Spinning(Expression),
    Selected(Expression),
    WindowOpened {
        expression: Expression,
        seconds: u64,
    },
    Countdown(u64),
    TimedOut,
    /// Capture accepted inside the window
    Captured(Expression),
}

/// "Guess the expression" gate: idle -> spinning -> selected -> window open ->
/// captured | timed out. Capture is accepted only while the window is open.
pub struct ExpressionGate {
    spin: Duration,
    tick: Duration,
    reveal: Duration,
    window: Duration,
    state: GateState,
    /// End of the current phase
    phase: Timer,
    /// Spin flicker while spinning, countdown ticks while the window is open
    tick_timer: Timer,
}

impl ExpressionGate {
    pub fn new(config: &GameConfig) -> Self {
        Self {
            spin: config.spin(),
            tick: config.tick(),
            reveal: config.reveal(),
            window: config.window(),
            state: GateState::Idle,
            phase: Timer::default(),
            tick_timer: Timer::default(),
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        matches!(
            self.state,
            GateState::Spinning { .. } | GateState::Selected { .. }
        )
    }

    /// Roll a new expression. Ignored while a spin is already running.
    pub fn start<R: Rng + ?Sized>(&mut self, now: Instant, rng: &mut R) -> Option<GateEvent> {
        if self.is_busy() {
            tracing::debug!("Roll ignored, spin in progress");
            return None;
        }

        let shown = pick(rng);
        self.state = GateState::Spinning { shown };
        self.phase.start(now, self.spin);
        self.tick_timer.start(now, self.tick);
        Some(GateEvent::Spinning(EXPRESSIONS[shown]))
    }

    /// Drop back to idle, disarming everything
    pub fn cancel(&mut self) {
        self.phase.cancel();
        self.tick_timer.cancel();
        self.state = GateState::Idle;
    }

    pub fn deadline(&self) -> Option<Instant> {
        earliest([self.phase.deadline(), self.tick_timer.deadline()])
    }

    /// Advance for whichever timer has come due. The next phase or tick is timed from
    /// the deadline that fired, so a late call does not stretch the schedule.
    pub fn on_expire<R: Rng + ?Sized>(&mut self, now: Instant, rng: &mut R) -> Option<GateEvent> {
        let phase_at = self.phase.deadline().unwrap_or(now);
        let tick_at = self.tick_timer.deadline().unwrap_or(now);

        match self.state {
            GateState::Spinning { .. } if self.phase.expired(now) => {
                let choice = pick(rng);
                self.tick_timer.cancel();
                self.phase.start(phase_at, self.reveal);
                self.state = GateState::Selected { choice };
                tracing::info!("Expression selected: {}", EXPRESSIONS[choice].label);
                Some(GateEvent::Selected(EXPRESSIONS[choice]))
            }
            GateState::Spinning { .. } if self.tick_timer.expired(now) => {
                let shown = pick(rng);
                self.tick_timer.start(tick_at, self.tick);
                self.state = GateState::Spinning { shown };
                Some(GateEvent::Spinning(EXPRESSIONS[shown]))
            }
            GateState::Selected { choice } if self.phase.expired(now) => {
                self.phase.start(phase_at, self.window);
                self.tick_timer.start(phase_at, COUNTDOWN_TICK);
                self.state = GateState::WindowOpen { choice };
                Some(GateEvent::WindowOpened {
                    expression: EXPRESSIONS[choice],
                    seconds: ceil_secs(self.window),
                })
            }
            GateState::WindowOpen { .. } if self.phase.expired(now) => {
                self.phase.cancel();
                self.tick_timer.cancel();
                self.state = GateState::TimedOut;
                tracing::info!("Capture window closed");
                Some(GateEvent::TimedOut)
            }
            GateState::WindowOpen { .. } if self.tick_timer.expired(now) => {
                self.tick_timer.start(tick_at, COUNTDOWN_TICK);
                let left = self.phase.remaining(tick_at).map(ceil_secs).unwrap_or(0);
                Some(GateEvent::Countdown(left))
            }
            _ => None,
        }
    }

    /// Accept a capture if the window is open at `now`. A rejection leaves the gate untouched.
    pub fn try_capture(&mut self, now: Instant) -> Result<Expression, GateError> {
        match self.state {
            GateState::WindowOpen { choice } if !self.phase.expired(now) => {
                self.phase.cancel();
                self.tick_timer.cancel();
                self.state = GateState::Captured { choice };
                Ok(EXPRESSIONS[choice])
            }
            GateState::WindowOpen { .. } | GateState::TimedOut => Err(GateError::WindowClosed),
            GateState::Spinning { .. } | GateState::Selected { .. } => {
                Err(GateError::StillSpinning)
            }
            GateState::Idle | GateState::Captured { .. } => Err(GateError::NotRolled),
        }
    }
}

fn pick<R: Rng + ?Sized>(rng: &mut R) -> usize {
    rng.gen_range(0..EXPRESSIONS.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn config() -> GameConfig {
        GameConfig {
            enabled: true,
            spin_ms: 3000,
            tick_ms: 100,
            reveal_ms: 1000,
            window_ms: 5000,
        }
    }

    /// Fire timers in order until `until`, collecting events
    fn run_until(
        gate: &mut ExpressionGate,
        rng: &mut StdRng,
        until: Instant,
    ) -> Vec<GateEvent> {
        let mut events = Vec::new();
        while let Some(deadline) = gate.deadline() {
            if deadline > until {
                break;
            }
            events.extend(gate.on_expire(deadline, rng));
        }
        events
    }

    #[test]
    fn spin_selects_then_opens_window() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut gate = ExpressionGate::new(&config());
        let t0 = Instant::now();

        assert!(matches!(gate.start(t0, &mut rng), Some(GateEvent::Spinning(_))));

        let events = run_until(&mut gate, &mut rng, t0 + Duration::from_millis(3000));
        let flickers = events
            .iter()
            .filter(|e| matches!(e, GateEvent::Spinning(_)))
            .count();
        assert!(flickers >= 28, "only {flickers} flickers");
        assert!(matches!(events.last(), Some(GateEvent::Selected(_))));
        assert!(matches!(gate.state(), GateState::Selected { .. }));

        let events = run_until(&mut gate, &mut rng, t0 + Duration::from_millis(4000));
        assert!(matches!(
            events.as_slice(),
            [GateEvent::WindowOpened { seconds: 5, .. }]
        ));
        assert!(gate.try_capture(t0 + Duration::from_millis(4500)).is_ok());
        assert!(matches!(gate.state(), GateState::Captured { .. }));
        assert_eq!(gate.deadline(), None);
    }

    #[test]
    fn reroll_while_spinning_is_ignored() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut gate = ExpressionGate::new(&config());
        let t0 = Instant::now();

        gate.start(t0, &mut rng);
        let deadline = gate.phase.deadline();

        assert_eq!(gate.start(t0 + Duration::from_millis(500), &mut rng), None);
        assert_eq!(gate.phase.deadline(), deadline);
        assert!(matches!(
            gate.try_capture(t0 + Duration::from_millis(500)),
            Err(GateError::StillSpinning)
        ));
    }

    #[test]
    fn window_expiry_requires_reroll() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut gate = ExpressionGate::new(&config());
        let t0 = Instant::now();

        gate.start(t0, &mut rng);
        let events = run_until(&mut gate, &mut rng, t0 + Duration::from_secs(10));

        let countdown: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                GateEvent::Countdown(left) => Some(*left),
                _ => None,
            })
            .collect();
        assert_eq!(countdown, vec![4, 3, 2, 1]);
        assert_eq!(events.last(), Some(&GateEvent::TimedOut));
        assert_eq!(gate.state(), GateState::TimedOut);
        assert!(matches!(
            gate.try_capture(t0 + Duration::from_secs(10)),
            Err(GateError::WindowClosed)
        ));

        assert!(gate.start(t0 + Duration::from_secs(11), &mut rng).is_some());
    }

    #[test]
    fn late_capture_is_rejected_without_mutation() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut gate = ExpressionGate::new(&config());
        let t0 = Instant::now();

        gate.start(t0, &mut rng);
        // spin and reveal only; the window deadline has not been processed yet
        run_until(&mut gate, &mut rng, t0 + Duration::from_millis(4000));
        let state = gate.state();
        let deadline = gate.phase.deadline().unwrap();

        assert!(matches!(
            gate.try_capture(deadline + Duration::from_millis(1)),
            Err(GateError::WindowClosed)
        ));
        assert_eq!(gate.state(), state);
        assert_eq!(gate.phase.deadline(), Some(deadline));
    }

    #[test]
    fn late_wakeup_does_not_stretch_the_window() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut gate = ExpressionGate::new(&config());
        let t0 = Instant::now();
        gate.start(t0, &mut rng);

        // woken 400ms after the spin ended
        let event = gate.on_expire(t0 + Duration::from_millis(3400), &mut rng);
        assert!(matches!(event, Some(GateEvent::Selected(_))));
        assert_eq!(gate.deadline(), Some(t0 + Duration::from_millis(4000)));

        let event = gate.on_expire(t0 + Duration::from_millis(4700), &mut rng);
        assert!(matches!(event, Some(GateEvent::WindowOpened { .. })));
        assert_eq!(gate.phase.deadline(), Some(t0 + Duration::from_millis(9000)));
        assert_eq!(gate.deadline(), Some(t0 + Duration::from_millis(5000)));
        assert!(matches!(
            gate.try_capture(t0 + Duration::from_millis(9100)),
            Err(GateError::WindowClosed)
        ));
    }

    #[test]
    fn capture_without_roll_is_rejected() {
        let mut gate = ExpressionGate::new(&config());
        assert!(matches!(
            gate.try_capture(Instant::now()),
            Err(GateError::NotRolled)
        ));
    }
}
