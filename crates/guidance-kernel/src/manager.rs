//! The mechanism manager: owns the mechanism collection and runs the tick.
//!
//! The tick thread is the only thing that touches the collection. Structural
//! changes arrive as completed [`Mutation`]s and are applied atomically at
//! the top of the tick, so every tick sees a consistent set of mechanisms.
//! After steady state the tick allocates nothing; the only allocation site
//! is the mutation-drain phase, where the collection and the telemetry
//! shapes change.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Receiver;
use nalgebra::DVector;
use tracing::{debug, warn};

use crate::automaton::{ActivationAutomaton, AutomatonKind};
use crate::config::ManagerConfig;
use crate::curve::Curve;
use crate::mixer::{self, MixerMode};
use crate::mutation::Mutation;
use crate::telemetry::{SnapshotCell, TelemetrySink, VmSnapshot};

/// Stable identity of one mechanism. Assigned at insertion, never reused
/// within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VmHandle(pub u64);

impl fmt::Display for VmHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vm_{}", self.0)
    }
}

/// Per-mechanism options fixed at insertion.
#[derive(Debug, Clone, Copy, Default)]
pub struct VmOptions {
    pub use_weighted_dist: bool,
    /// Selects the legacy scale-threshold gate instead of the activation
    /// automaton for this mechanism.
    pub use_active_guide: bool,
}

/// Per-call tick options; the collapsed form of the original's update
/// overload pyramid.
#[derive(Debug, Clone, Copy)]
pub struct TickOptions {
    pub mode: MixerMode,
    pub force_applied: bool,
    pub move_forward: bool,
}

impl Default for TickOptions {
    fn default() -> Self {
        Self {
            mode: MixerMode::Potential,
            force_applied: false,
            move_forward: true,
        }
    }
}

impl From<MixerMode> for TickOptions {
    fn from(mode: MixerMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }
}

/// One mechanism: its curve, automaton, options, and tick-scratch state.
struct VmEntry {
    handle: VmHandle,
    curve: Box<dyn Curve>,
    automaton: ActivationAutomaton,
    use_weighted_dist: bool,
    use_active_guide: bool,
    scale: f64,
    phase: f64,
    phase_dot: f64,
    distance: f64,
    state: DVector<f64>,
    state_dot: DVector<f64>,
}

/// Owns the ordered mechanism collection and runs the per-tick pipeline:
/// drain mutations, update curves, score, blend, step automata, snapshot.
pub struct MechanismManager {
    position_dim: usize,
    automaton_kind: AutomatonKind,
    phase_dot_th: f64,
    phase_dot_preauto_th: f64,
    entries: Vec<VmEntry>,
    next_handle: u64,
    /// `1/N + 0.2`, recomputed whenever the collection is reshaped.
    scale_threshold: f64,
    inbox: Receiver<Mutation>,
    collision: Arc<AtomicBool>,
    snapshot: Arc<SnapshotCell>,
    sink: Box<dyn TelemetrySink>,
}

impl MechanismManager {
    pub fn new(
        config: &ManagerConfig,
        inbox: Receiver<Mutation>,
        collision: Arc<AtomicBool>,
        snapshot: Arc<SnapshotCell>,
        sink: Box<dyn TelemetrySink>,
    ) -> Self {
        Self {
            position_dim: config.position_dim,
            automaton_kind: config.automaton,
            phase_dot_th: config.phase_dot_th,
            phase_dot_preauto_th: config.phase_dot_preauto_th,
            entries: Vec::new(),
            next_handle: 0,
            scale_threshold: 1.2,
            inbox,
            collision,
            snapshot,
            sink,
        }
    }

    pub fn position_dim(&self) -> usize {
        self.position_dim
    }

    pub fn vm_count(&self) -> usize {
        self.entries.len()
    }

    /// Append a mechanism. Runs on the tick thread (mutation drain) or
    /// before the tick starts (model pre-load).
    pub fn insert_entry(&mut self, mut curve: Box<dyn Curve>, options: VmOptions) -> VmHandle {
        curve.init();
        curve.set_weighted_dist(options.use_weighted_dist);
        let handle = VmHandle(self.next_handle);
        self.next_handle += 1;
        let dim = self.position_dim;
        self.entries.push(VmEntry {
            handle,
            curve,
            automaton: ActivationAutomaton::new(
                self.automaton_kind,
                self.phase_dot_preauto_th,
                self.phase_dot_th,
            ),
            use_weighted_dist: options.use_weighted_dist,
            use_active_guide: options.use_active_guide,
            scale: 0.0,
            phase: 0.0,
            phase_dot: 0.0,
            distance: 0.0,
            state: DVector::zeros(dim),
            state_dot: DVector::zeros(dim),
        });
        self.reshaped();
        handle
    }

    /// One control tick. Preconditions are programmer errors and fail loudly.
    pub fn tick(
        &mut self,
        position: &DVector<f64>,
        velocity: &DVector<f64>,
        dt: f64,
        options: &TickOptions,
        force_out: &mut DVector<f64>,
    ) {
        assert_eq!(position.len(), self.position_dim, "position dimension");
        assert_eq!(velocity.len(), self.position_dim, "velocity dimension");
        assert_eq!(force_out.len(), self.position_dim, "force buffer dimension");
        assert!(dt > 0.0, "dt must be positive");

        // 1. structural changes, applied atomically at the tick boundary
        self.drain_mutations();

        force_out.fill(0.0);

        if self.entries.is_empty() {
            self.publish(position);
            return;
        }

        // 2. direction of phase integration
        for entry in &mut self.entries {
            entry.curve.set_move_forward(options.move_forward);
        }

        // 3. legacy active-guide gate, driven by the previous tick's scale
        for entry in &mut self.entries {
            if entry.use_active_guide {
                let engage = !options.force_applied && entry.scale > self.scale_threshold;
                entry.curve.set_active(engage);
            }
        }

        // 4.-5. curve step, raw scores; only Soft needs both fit queries
        let mut sum = 0.0;
        for entry in &mut self.entries {
            entry.curve.update(position, velocity, dt);
            let (probability, distance) = match options.mode {
                MixerMode::Hard => (entry.curve.probability(position), 0.0),
                MixerMode::Potential => (0.0, entry.curve.distance(position)),
                MixerMode::Soft => (
                    entry.curve.probability(position),
                    entry.curve.distance(position),
                ),
            };
            entry.distance = distance;
            entry.scale = mixer::raw_score(options.mode, probability, distance);
            sum += entry.scale;
            entry.phase = entry.curve.phase();
            entry.phase_dot = entry.curve.phase_dot();
        }

        // 6.-7. finalise weights, blend the force
        for entry in &mut self.entries {
            entry.scale = mixer::finalize_scale(options.mode, entry.scale, sum, entry.distance);
            entry.curve.state(&mut entry.state);
            entry.curve.state_dot(&mut entry.state_dot);
            let k = entry.curve.stiffness();
            let b = entry.curve.damping();
            for i in 0..self.position_dim {
                force_out[i] += entry.scale
                    * (k * (entry.state[i] - position[i]) + b * (entry.state_dot[i] - velocity[i]));
            }
        }

        // 8. activation automata, on the freshly-read phase rates
        let collision = self.collision.load(Ordering::Acquire);
        for entry in &mut self.entries {
            let phase_dot_ref = entry.curve.phase_dot_ref();
            entry.automaton.step(entry.phase_dot, phase_dot_ref, collision);
            if !entry.use_active_guide {
                entry.curve.set_active(entry.automaton.is_auto());
            }
        }
        if collision {
            // the stop pulse has been observed by every automaton
            self.collision.store(false, Ordering::Release);
        }

        // 9. telemetry
        self.publish(position);
    }

    fn drain_mutations(&mut self) {
        while let Ok(mutation) = self.inbox.try_recv() {
            match mutation {
                Mutation::Insert { curve, options } => {
                    let handle = self.insert_entry(curve, options);
                    debug!(handle = %handle, "mechanism inserted");
                }
                Mutation::Delete { handle } => {
                    let before = self.entries.len();
                    self.entries.retain(|entry| entry.handle != handle);
                    if self.entries.len() == before {
                        warn!(handle = %handle, "delete for unknown mechanism, ignored");
                    } else {
                        debug!(handle = %handle, "mechanism deleted");
                        self.reshaped();
                    }
                }
                Mutation::Save { handle, reply } => {
                    let payload = self
                        .entries
                        .iter()
                        .find(|entry| entry.handle == handle)
                        .map(|entry| (handle.to_string(), entry.curve.export_model()));
                    let _ = reply.try_send(payload);
                }
            }
        }
    }

    fn reshaped(&mut self) {
        let n = self.entries.len();
        self.scale_threshold = 1.0 / n.max(1) as f64 + 0.2;
        self.sink.reshape(self.position_dim, n);
    }

    /// Write the snapshot and hand it to the sink. Skipped entirely when a
    /// reader holds the cell; resizes only when the collection was reshaped.
    fn publish(&mut self, position: &DVector<f64>) {
        let dim = self.position_dim;
        let entries = &self.entries;
        let sink = &mut self.sink;
        self.snapshot.write_with(|snap| {
            if snap.robot_position.len() != dim {
                snap.robot_position = DVector::zeros(dim);
            }
            let shape_changed = snap.vms.len() != entries.len()
                || snap
                    .vms
                    .iter()
                    .zip(entries.iter())
                    .any(|(vm, entry)| vm.handle != entry.handle);
            if shape_changed {
                snap.vms = entries
                    .iter()
                    .map(|entry| VmSnapshot {
                        handle: entry.handle,
                        phase: entry.phase,
                        phase_dot: entry.phase_dot,
                        scale: entry.scale,
                        auto_active: entry.automaton.is_auto(),
                        position: entry.state.clone(),
                        velocity: entry.state_dot.clone(),
                    })
                    .collect();
            }
            snap.robot_position.copy_from(position);
            for (vm, entry) in snap.vms.iter_mut().zip(entries.iter()) {
                vm.phase = entry.phase;
                vm.phase_dot = entry.phase_dot;
                vm.scale = entry.scale;
                vm.auto_active = entry.automaton.is_auto();
                vm.position.copy_from(&entry.state);
                vm.velocity.copy_from(&entry.state_dot);
            }
            sink.publish(snap);
        });
    }

    /// Seed the snapshot with the pre-loaded mechanisms before the first
    /// tick, so accessors see them immediately.
    pub fn publish_initial(&mut self) {
        let zeros = DVector::zeros(self.position_dim);
        self.publish(&zeros);
    }
}
