//! Per-mechanism activation automaton.
//!
//! Decides, from the mechanism's phase progression and the collision latch,
//! whether the mechanism should drive the robot autonomously. The automaton
//! is a pure function of its previous state and three scalars; it performs
//! no I/O.

/// Activation state of one virtual mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutomatonState {
    /// The user drives; the mechanism only guides.
    Manual,
    /// The user pushed past the pre-auto threshold; waiting for the phase
    /// rate to settle back near its reference before engaging.
    PreAuto,
    /// The mechanism drives itself.
    Auto,
}

/// Transition structure, chosen at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomatonKind {
    /// Manual -> PreAuto -> Auto, reset to Manual on collision.
    #[default]
    ThreeState,
    /// Auto iff the phase rate sits within the threshold band around the
    /// reference, Manual otherwise.
    TwoState,
}

/// Activation automaton for one mechanism.
///
/// Thresholds satisfy `phase_dot_preauto_th > phase_dot_th > 0`; the
/// configuration layer validates this before construction.
#[derive(Debug, Clone)]
pub struct ActivationAutomaton {
    kind: AutomatonKind,
    phase_dot_th: f64,
    phase_dot_preauto_th: f64,
    state: AutomatonState,
}

impl ActivationAutomaton {
    pub fn new(kind: AutomatonKind, phase_dot_preauto_th: f64, phase_dot_th: f64) -> Self {
        assert!(phase_dot_th > 0.0);
        assert!(phase_dot_preauto_th > phase_dot_th);
        Self {
            kind,
            phase_dot_th,
            phase_dot_preauto_th,
            state: AutomatonState::Manual,
        }
    }

    /// Advance one tick with the freshly-read phase rate, its reference,
    /// and the collision latch.
    pub fn step(&mut self, phase_dot: f64, phase_dot_ref: f64, collision_detected: bool) {
        match self.kind {
            AutomatonKind::ThreeState => match self.state {
                AutomatonState::Manual => {
                    if phase_dot >= self.phase_dot_preauto_th {
                        self.state = AutomatonState::PreAuto;
                    }
                }
                AutomatonState::PreAuto => {
                    if phase_dot <= phase_dot_ref + self.phase_dot_th {
                        self.state = AutomatonState::Auto;
                    }
                }
                AutomatonState::Auto => {
                    if collision_detected {
                        self.state = AutomatonState::Manual;
                    }
                }
            },
            AutomatonKind::TwoState => {
                if (phase_dot - phase_dot_ref).abs() <= self.phase_dot_th {
                    self.state = AutomatonState::Auto;
                } else {
                    self.state = AutomatonState::Manual;
                }
            }
        }
    }

    pub fn state(&self) -> AutomatonState {
        self.state
    }

    /// True iff the mechanism should drive itself this tick.
    pub fn is_auto(&self) -> bool {
        self.state == AutomatonState::Auto
    }
}
