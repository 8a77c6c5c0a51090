//! End-to-end tests for the guidance kernel.
//!
//! Drives the full facade with deterministic stub curves:
//! - blending scenarios for each mixing mode
//! - activation automaton engagement and collision reset
//! - structural mutations applied under a live tick thread
//!
//! The stubs expose their knobs through shared state so a test can steer
//! phase rates and fit scores between ticks without touching the manager.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use nalgebra::{DMatrix, DVector};
use parking_lot::Mutex;

use guidance_kernel::{
    AutomatonKind, Curve, CurveError, CurveLibrary, CurveModel, GuidanceInterface, ManagerConfig,
    MixerMode, NullSink, RecordingSink, TickOptions, VmHandle,
};

/// Tunable behaviour of one stub curve.
#[derive(Clone)]
struct StubSpec {
    state: Vec<f64>,
    state_dot: Vec<f64>,
    stiffness: f64,
    damping: f64,
    probability: f64,
    distance: f64,
    phase_dot: f64,
    phase_dot_ref: f64,
}

impl StubSpec {
    fn at(state: Vec<f64>) -> Self {
        let dim = state.len();
        Self {
            state,
            state_dot: vec![0.0; dim],
            stiffness: 1.0,
            damping: 0.0,
            probability: 1.0,
            distance: 0.0,
            phase_dot: 0.0,
            phase_dot_ref: 1.0,
        }
    }
}

/// Shared side of a stub: the test steers `spec`, the manager's
/// `set_active` calls are observable through `active`.
struct StubShared {
    spec: Mutex<StubSpec>,
    active: AtomicBool,
}

impl StubShared {
    fn new(spec: StubSpec) -> Arc<Self> {
        Arc::new(Self {
            spec: Mutex::new(spec),
            active: AtomicBool::new(false),
        })
    }

    fn set_phase_dot(&self, phase_dot: f64) {
        self.spec.lock().phase_dot = phase_dot;
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

struct StubCurve {
    shared: Arc<StubShared>,
    phase: f64,
}

impl Curve for StubCurve {
    fn init(&mut self) {
        self.phase = 0.0;
    }

    fn update(&mut self, _position: &DVector<f64>, _velocity: &DVector<f64>, dt: f64) {
        self.phase += self.shared.spec.lock().phase_dot * dt;
    }

    fn state(&self, out: &mut DVector<f64>) {
        out.copy_from_slice(&self.shared.spec.lock().state);
    }

    fn state_dot(&self, out: &mut DVector<f64>) {
        out.copy_from_slice(&self.shared.spec.lock().state_dot);
    }

    fn phase(&self) -> f64 {
        self.phase
    }

    fn phase_dot(&self) -> f64 {
        self.shared.spec.lock().phase_dot
    }

    fn phase_dot_ref(&self) -> f64 {
        self.shared.spec.lock().phase_dot_ref
    }

    fn distance(&self, _position: &DVector<f64>) -> f64 {
        self.shared.spec.lock().distance
    }

    fn probability(&self, _position: &DVector<f64>) -> f64 {
        self.shared.spec.lock().probability
    }

    fn stiffness(&self) -> f64 {
        self.shared.spec.lock().stiffness
    }

    fn damping(&self) -> f64 {
        self.shared.spec.lock().damping
    }

    fn set_active(&mut self, active: bool) {
        self.shared.active.store(active, Ordering::Release);
    }

    fn set_move_forward(&mut self, _forward: bool) {}

    fn set_weighted_dist(&mut self, _weighted: bool) {}

    fn export_model(&self) -> CurveModel {
        CurveModel(b"stub".to_vec())
    }
}

/// Hands out prepared stubs in order, whatever the request shape.
struct StubLibrary {
    queue: Mutex<VecDeque<Arc<StubShared>>>,
}

impl StubLibrary {
    fn with(shareds: &[Arc<StubShared>]) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(shareds.iter().cloned().collect()),
        })
    }

    fn next_curve(&self, position_dim: usize) -> Box<dyn Curve> {
        let shared = self
            .queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| StubShared::new(StubSpec::at(vec![0.0; position_dim])));
        Box::new(StubCurve { shared, phase: 0.0 })
    }
}

impl CurveLibrary for StubLibrary {
    fn empty(&self, position_dim: usize) -> Box<dyn Curve> {
        self.next_curve(position_dim)
    }

    fn train(
        &self,
        position_dim: usize,
        _demonstration: &DMatrix<f64>,
    ) -> Result<Box<dyn Curve>, CurveError> {
        Ok(self.next_curve(position_dim))
    }

    fn load(&self, position_dim: usize, _name: &str) -> Result<Box<dyn Curve>, CurveError> {
        Ok(self.next_curve(position_dim))
    }

    fn save(&self, _name: &str, _model: &CurveModel) -> Result<(), CurveError> {
        Ok(())
    }
}

/// Interface with `shareds.len()` stubs pre-loaded, in order.
fn interface_with_stubs(
    config: ManagerConfig,
    shareds: &[Arc<StubShared>],
) -> GuidanceInterface {
    let config = ManagerConfig {
        models: (0..shareds.len()).map(|i| format!("stub_{i}")).collect(),
        ..config
    };
    GuidanceInterface::new(config, StubLibrary::with(shareds), Box::new(NullSink)).unwrap()
}

fn config_2d() -> ManagerConfig {
    ManagerConfig {
        position_dim: 2,
        ..ManagerConfig::default()
    }
}

fn tick(interface: &GuidanceInterface, pos: &[f64], mode: MixerMode) -> DVector<f64> {
    let position = DVector::from_column_slice(pos);
    let velocity = DVector::zeros(pos.len());
    let mut force = DVector::zeros(pos.len());
    interface.update(
        &position,
        &velocity,
        0.01,
        TickOptions::from(mode),
        &mut force,
    );
    force
}

#[test]
fn test_potential_single_vm_attracts_to_curve() {
    // S1: on-curve distance 0 gives weight exp(0) = 1, pure spring pull
    let shared = StubShared::new(StubSpec::at(vec![1.0, 0.0]));
    let interface = interface_with_stubs(config_2d(), &[shared]);

    let force = tick(&interface, &[0.0, 0.0], MixerMode::Potential);
    assert!((force[0] - 1.0).abs() < 1e-12);
    assert!(force[1].abs() < 1e-12);

    // single mechanism under Hard: its weight normalises to exactly one
    let force = tick(&interface, &[0.0, 0.0], MixerMode::Hard);
    assert!((force[0] - 1.0).abs() < 1e-12);
    let handle = interface.vm_handles()[0];
    assert_eq!(interface.scale(handle), 1.0);
}

#[test]
fn test_hard_mode_blends_posteriors() {
    // S2: probabilities 0.2 / 0.8 normalise to themselves and weight the
    // two unit contributions
    let a = StubShared::new(StubSpec {
        probability: 0.2,
        ..StubSpec::at(vec![1.0, 0.0])
    });
    let b = StubShared::new(StubSpec {
        probability: 0.8,
        ..StubSpec::at(vec![0.0, 1.0])
    });
    let interface = interface_with_stubs(config_2d(), &[a, b]);

    let force = tick(&interface, &[0.0, 0.0], MixerMode::Hard);
    assert!((force[0] - 0.2).abs() < 1e-12);
    assert!((force[1] - 0.8).abs() < 1e-12);

    let handles = interface.vm_handles();
    assert!((interface.scale(handles[0]) - 0.2).abs() < 1e-12);
    assert!((interface.scale(handles[1]) - 0.8).abs() < 1e-12);
}

#[test]
fn test_soft_mode_keeps_probability_ratio_at_equal_distance() {
    // S3: equal distances cancel in the ratio
    let (p1, p2) = (0.3, 0.6);
    let a = StubShared::new(StubSpec {
        probability: p1,
        distance: 0.25,
        ..StubSpec::at(vec![1.0, 0.0])
    });
    let b = StubShared::new(StubSpec {
        probability: p2,
        distance: 0.25,
        ..StubSpec::at(vec![0.0, 1.0])
    });
    let interface = interface_with_stubs(config_2d(), &[a, b]);

    tick(&interface, &[0.0, 0.0], MixerMode::Soft);
    let handles = interface.vm_handles();
    let ratio = interface.scale(handles[0]) / interface.scale(handles[1]);
    assert!((ratio - p1 / p2).abs() < 1e-9);
}

#[test]
fn test_hard_scales_form_partition_of_unity() {
    let stubs: Vec<_> = [0.1, 0.5, 0.9]
        .iter()
        .map(|&p| {
            StubShared::new(StubSpec {
                probability: p,
                ..StubSpec::at(vec![0.5, 0.5])
            })
        })
        .collect();
    let interface = interface_with_stubs(config_2d(), &stubs);

    tick(&interface, &[0.2, 0.1], MixerMode::Hard);
    let total: f64 = interface
        .vm_handles()
        .into_iter()
        .map(|h| interface.scale(h))
        .sum();
    assert!((total - 1.0).abs() < 1e-9);
}

#[test]
fn test_zero_probability_everywhere_produces_no_force() {
    let a = StubShared::new(StubSpec {
        probability: 0.0,
        ..StubSpec::at(vec![1.0, 0.0])
    });
    let interface = interface_with_stubs(config_2d(), &[a]);

    for mode in [MixerMode::Hard, MixerMode::Soft] {
        let force = tick(&interface, &[0.0, 0.0], mode);
        assert_eq!(force, DVector::zeros(2));
    }
}

#[test]
fn test_zero_vm_tick_returns_zero_vector() {
    let interface = interface_with_stubs(config_2d(), &[]);
    for mode in [MixerMode::Hard, MixerMode::Potential, MixerMode::Soft] {
        let force = tick(&interface, &[3.0, -2.0], mode);
        assert_eq!(force, DVector::zeros(2));
    }
}

#[test]
fn test_force_is_finite_and_dimensioned_in_every_mode() {
    let a = StubShared::new(StubSpec {
        damping: 2.0,
        state_dot: vec![0.3, -0.1],
        ..StubSpec::at(vec![1.0, 2.0])
    });
    let b = StubShared::new(StubSpec {
        probability: 0.4,
        distance: 1.5,
        ..StubSpec::at(vec![-1.0, 0.5])
    });
    let interface = interface_with_stubs(config_2d(), &[a, b]);

    for mode in [MixerMode::Hard, MixerMode::Potential, MixerMode::Soft] {
        let force = tick(&interface, &[0.7, -0.3], mode);
        assert_eq!(force.len(), 2);
        assert!(force.iter().all(|f| f.is_finite()));
    }
}

#[test]
fn test_tick_is_deterministic_with_stub_curves() {
    let a = StubShared::new(StubSpec {
        probability: 0.6,
        distance: 0.2,
        damping: 1.0,
        ..StubSpec::at(vec![0.8, 0.1])
    });
    let interface = interface_with_stubs(config_2d(), &[a]);

    let f1 = tick(&interface, &[0.3, 0.3], MixerMode::Soft);
    let f2 = tick(&interface, &[0.3, 0.3], MixerMode::Soft);
    assert_eq!(f1, f2);
}

#[test]
fn test_two_state_automaton_tracks_reference_band() {
    // S4: |phase_dot - 1.0| <= 0.1 engages, anything else disengages
    let shared = StubShared::new(StubSpec::at(vec![1.0, 0.0]));
    let config = ManagerConfig {
        automaton: AutomatonKind::TwoState,
        ..config_2d()
    };
    let interface = interface_with_stubs(config, &[shared.clone()]);

    shared.set_phase_dot(1.05);
    tick(&interface, &[0.0, 0.0], MixerMode::Potential);
    assert!(interface.on_vm());
    assert!(shared.is_active());

    shared.set_phase_dot(1.5);
    tick(&interface, &[0.0, 0.0], MixerMode::Potential);
    assert!(!interface.on_vm());
    assert!(!shared.is_active());
}

#[test]
fn test_three_state_automaton_engages_then_stops_on_collision() {
    // S6, on top of the Manual -> PreAuto -> Auto walk
    let shared = StubShared::new(StubSpec::at(vec![1.0, 0.0]));
    let interface = interface_with_stubs(config_2d(), &[shared.clone()]);

    // first tick also consumes the initial not-active pulse
    shared.set_phase_dot(0.6); // >= preauto threshold 0.5
    tick(&interface, &[0.0, 0.0], MixerMode::Potential);
    assert!(!interface.on_vm());

    shared.set_phase_dot(1.05); // <= ref 1.0 + band 0.1
    tick(&interface, &[0.0, 0.0], MixerMode::Potential);
    assert!(interface.on_vm());
    assert!(shared.is_active());

    // without a collision the mechanism keeps driving
    shared.set_phase_dot(5.0);
    tick(&interface, &[0.0, 0.0], MixerMode::Potential);
    assert!(interface.on_vm());

    interface.stop();
    tick(&interface, &[0.0, 0.0], MixerMode::Potential);
    assert!(!interface.on_vm());
    assert!(!shared.is_active());
}

#[test]
fn test_insert_under_live_tick_becomes_visible_and_contributes() {
    // S5: a mechanism loaded out of band joins the blend at a tick boundary
    let incoming = StubShared::new(StubSpec::at(vec![1.0, 0.0]));
    let library = StubLibrary::with(&[incoming]);
    let interface = Arc::new(
        GuidanceInterface::new(config_2d(), library, Box::new(NullSink)).unwrap(),
    );

    let forces: Arc<Mutex<Vec<DVector<f64>>>> = Arc::new(Mutex::new(Vec::new()));
    let ticker = {
        let interface = interface.clone();
        let forces = forces.clone();
        thread::spawn(move || {
            let position = DVector::from_column_slice(&[0.0, 0.0]);
            let velocity = DVector::zeros(2);
            let mut force = DVector::zeros(2);
            for _ in 0..400 {
                interface.update(
                    &position,
                    &velocity,
                    0.001,
                    TickOptions::default(),
                    &mut force,
                );
                forces.lock().push(force.clone());
                thread::sleep(Duration::from_millis(1));
            }
        })
    };

    thread::sleep(Duration::from_millis(20));
    assert!(interface.insert_vm_from_model("incoming"));

    // the mechanism appears at some tick boundary
    let deadline = Instant::now() + Duration::from_secs(2);
    while interface.vm_count() == 0 {
        assert!(Instant::now() < deadline, "insert never became visible");
        thread::sleep(Duration::from_millis(1));
    }

    ticker.join().unwrap();
    let forces = forces.lock();
    assert_eq!(forces.len(), 400);
    assert_eq!(forces[0], DVector::zeros(2));
    // once inserted, the unit spring toward (1, 0) shows up in full
    let last = forces.last().unwrap();
    assert!((last[0] - 1.0).abs() < 1e-9);
}

#[test]
fn test_concurrent_mutations_never_tear_the_snapshot() {
    let interface = Arc::new(
        GuidanceInterface::new(
            config_2d(),
            StubLibrary::with(&[]),
            Box::new(NullSink),
        )
        .unwrap(),
    );

    let stop = Arc::new(AtomicBool::new(false));
    let ticker = {
        let interface = interface.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            let position = DVector::from_column_slice(&[0.1, 0.2]);
            let velocity = DVector::zeros(2);
            let mut force = DVector::zeros(2);
            while !stop.load(Ordering::Acquire) {
                interface.update(
                    &position,
                    &velocity,
                    0.001,
                    TickOptions::default(),
                    &mut force,
                );
                assert!(force.iter().all(|f| f.is_finite()));
            }
        })
    };

    // hammer the lanes; busy rejections are expected and fine
    for round in 0..50u64 {
        interface.insert_vm();
        interface.delete_vm(VmHandle(round / 2));
        thread::sleep(Duration::from_millis(1));

        // every observed snapshot is internally consistent: unique,
        // ascending handles and matching per-vm buffers
        let snap = interface.snapshot();
        let handles: Vec<u64> = snap.vms.iter().map(|vm| vm.handle.0).collect();
        let mut sorted = handles.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(handles, sorted, "snapshot saw a torn mechanism list");
        for vm in &snap.vms {
            assert_eq!(vm.position.len(), 2);
            assert_eq!(vm.velocity.len(), 2);
        }
    }

    stop.store(true, Ordering::Release);
    ticker.join().unwrap();
}

#[test]
fn test_deleted_mechanism_stops_contributing() {
    let a = StubShared::new(StubSpec::at(vec![1.0, 0.0]));
    let b = StubShared::new(StubSpec::at(vec![0.0, 1.0]));
    let interface = interface_with_stubs(config_2d(), &[a, b]);

    let force = tick(&interface, &[0.0, 0.0], MixerMode::Potential);
    assert!(force[0] > 0.9 && force[1] > 0.9);

    let first = interface.vm_handles()[0];
    assert!(interface.delete_vm(first));

    // the delete lands at a later tick boundary
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let force = tick(&interface, &[0.0, 0.0], MixerMode::Potential);
        if interface.vm_count() == 1 {
            assert!(force[0].abs() < 1e-9);
            assert!(force[1] > 0.9);
            break;
        }
        assert!(Instant::now() < deadline, "delete never landed");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_recording_sink_sees_reshapes_and_publishes() {
    let a = StubShared::new(StubSpec::at(vec![1.0, 0.0]));
    let (sink, snapshots, reshapes) = RecordingSink::new();
    let config = ManagerConfig {
        models: vec!["stub_0".into()],
        ..config_2d()
    };
    let interface =
        GuidanceInterface::new(config, StubLibrary::with(&[a]), Box::new(sink)).unwrap();

    tick(&interface, &[0.0, 0.0], MixerMode::Potential);
    tick(&interface, &[0.0, 0.0], MixerMode::Potential);

    assert_eq!(reshapes.lock().as_slice(), &[(2, 1)]);
    // initial seed plus two ticks
    assert_eq!(snapshots.lock().len(), 3);
    let last = snapshots.lock().last().unwrap().clone();
    assert_eq!(last.vms.len(), 1);
    assert_eq!(last.robot_position.len(), 2);
}
