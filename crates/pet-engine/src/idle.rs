//! Idle behavior state machine.
//!
//! A small Markov chain keeps the character moving when nothing else drives it: it dwells in
//! each state for a randomly drawn duration, then picks a successor from a fixed transition
//! table. While in `HeadShake` it sways the head; while in `Blink` it closes and reopens the
//! eyes. `Idle` writes nothing, so relaxation brings the pose back to rest.

use std::f64::consts::{PI, TAU};

use pet_types::MotionSource;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::blend::LiveParameters;
use crate::config::ParameterNames;

/// Blend factor toward the per-tick target.
const FOLLOW: f32 = 0.2;
/// Head sway period.
const SWAY_CYCLE_MS: f64 = 3000.0;
const SWAY_X_DEG: f64 = 5.0;
const SWAY_Z_DEG: f64 = 3.0;
/// Head angles closer than this to their target are left alone.
const SWAY_DEADBAND: f32 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleState {
    Idle,
    Blink,
    HeadShake,
}

impl IdleState {
    /// Dwell time range in milliseconds.
    pub fn duration_range_ms(self) -> (f64, f64) {
        match self {
            IdleState::HeadShake => (3000.0, 6000.0),
            IdleState::Blink => (400.0, 600.0),
            IdleState::Idle => (1000.0, 3000.0),
        }
    }

    /// Outgoing edges in evaluation order. Each row sums to 1.
    pub fn transitions(self) -> &'static [(IdleState, f64)] {
        match self {
            IdleState::HeadShake => &[(IdleState::HeadShake, 0.3), (IdleState::Blink, 0.7)],
            IdleState::Blink => &[
                (IdleState::HeadShake, 0.3),
                (IdleState::Blink, 0.1),
                (IdleState::Idle, 0.6),
            ],
            IdleState::Idle => &[
                (IdleState::HeadShake, 0.1),
                (IdleState::Blink, 0.4),
                (IdleState::Idle, 0.5),
            ],
        }
    }
}

/// Pick the successor of `from` for a uniform draw `u` in `[0, 1)`.
///
/// Walks the edges in table order and returns the first state whose cumulative probability
/// exceeds `u`. Mass not covered by the table is a self-transition.
pub fn next_state(from: IdleState, u: f64) -> IdleState {
    let mut cumulative = 0.0;
    for &(to, p) in from.transitions() {
        cumulative += p;
        if u < cumulative {
            return to;
        }
    }
    from
}

/// Idle behavior machine. Time is passed in as milliseconds on the host clock.
#[derive(Debug)]
pub struct IdleMotion {
    state: IdleState,
    entered_ms: f64,
    duration_ms: f64,
    rng: StdRng,
}

impl IdleMotion {
    /// Start in `Idle` at `now_ms`, seeded from entropy.
    pub fn new(now_ms: f64) -> Self {
        Self::with_rng(StdRng::from_entropy(), now_ms)
    }

    /// Start in `Idle` at `now_ms` with a reproducible RNG.
    pub fn with_seed(seed: u64, now_ms: f64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), now_ms)
    }

    fn with_rng(rng: StdRng, now_ms: f64) -> Self {
        let mut machine = Self {
            state: IdleState::Idle,
            entered_ms: now_ms,
            duration_ms: 0.0,
            rng,
        };
        machine.enter(IdleState::Idle, now_ms);
        machine
    }

    pub fn state(&self) -> IdleState {
        self.state
    }

    /// Dwell time drawn when the current state was entered.
    pub fn duration_ms(&self) -> f64 {
        self.duration_ms
    }

    pub fn entered_ms(&self) -> f64 {
        self.entered_ms
    }

    /// Re-evaluate the transition once the dwell time has elapsed.
    ///
    /// Returns the newly entered state (possibly the same one) when a transition happened.
    pub fn advance(&mut self, now_ms: f64) -> Option<IdleState> {
        if now_ms - self.entered_ms <= self.duration_ms {
            return None;
        }
        let u: f64 = self.rng.r#gen();
        let to = next_state(self.state, u);
        tracing::debug!(from = ?self.state, to = ?to, "idle transition");
        self.enter(to, now_ms);
        Some(to)
    }

    /// Write this tick's head/eye targets for the current state.
    pub fn apply(&self, now_ms: f64, live: &mut LiveParameters, names: &ParameterNames) {
        match self.state {
            IdleState::HeadShake => {
                let phase = now_ms / SWAY_CYCLE_MS * TAU;
                let x = (phase.sin() * SWAY_X_DEG) as f32;
                let z = (phase.cos() * SWAY_Z_DEG) as f32;
                sway_toward(live, &names.angle_x, x);
                sway_toward(live, &names.angle_z, z);
            }
            IdleState::Blink => {
                let progress = if self.duration_ms > 0.0 {
                    ((now_ms - self.entered_ms) / self.duration_ms).clamp(0.0, 1.0)
                } else {
                    1.0
                };
                let eye_open = (progress * PI).cos() as f32;
                follow(live, &names.eye_l_open, eye_open);
                follow(live, &names.eye_r_open, eye_open);
            }
            IdleState::Idle => {}
        }
    }

    fn enter(&mut self, state: IdleState, now_ms: f64) {
        let (min, max) = state.duration_range_ms();
        self.state = state;
        self.entered_ms = now_ms;
        self.duration_ms = min + self.rng.r#gen::<f64>() * (max - min);
    }
}

fn sway_toward(live: &mut LiveParameters, key: &str, target: f32) {
    if let Some(cur) = live.get(key) {
        if (cur - target).abs() > SWAY_DEADBAND {
            live.write(MotionSource::Idle, key, cur * (1.0 - FOLLOW) + target * FOLLOW);
        }
    }
}

fn follow(live: &mut LiveParameters, key: &str, target: f32) {
    if let Some(cur) = live.get(key) {
        live.write(MotionSource::Idle, key, cur * (1.0 - FOLLOW) + target * FOLLOW);
    }
}
