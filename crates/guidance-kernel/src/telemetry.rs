//! Telemetry snapshot shared between the tick thread and observers.
//!
//! The tick is the single writer; everything else reads copies. Both sides
//! use a try-lock so the tick never waits on an observer: a writer that
//! loses the race skips one publish, a reader that loses it receives the
//! last value it read successfully.

use std::sync::Arc;

use nalgebra::DVector;
use parking_lot::Mutex;

use crate::manager::VmHandle;

/// Per-mechanism slice of the snapshot.
#[derive(Debug, Clone)]
pub struct VmSnapshot {
    pub handle: VmHandle,
    pub phase: f64,
    pub phase_dot: f64,
    pub scale: f64,
    pub auto_active: bool,
    pub position: DVector<f64>,
    pub velocity: DVector<f64>,
}

/// One tick's worth of observable state: the robot position plus the
/// `phase`, `scales`, and `vm_pos`/`vm_vel` streams, keyed by handle in
/// insertion order.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub robot_position: DVector<f64>,
    pub vms: Vec<VmSnapshot>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            robot_position: DVector::zeros(0),
            vms: Vec::new(),
        }
    }
}

/// Single-writer, many-reader snapshot cell.
#[derive(Default)]
pub struct SnapshotCell {
    live: Mutex<Snapshot>,
    last_read: Mutex<Snapshot>,
}

impl SnapshotCell {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Tick-side write. Returns false when a reader held the lock and the
    /// publish was skipped.
    pub fn write_with(&self, write: impl FnOnce(&mut Snapshot)) -> bool {
        match self.live.try_lock() {
            Some(mut live) => {
                write(&mut live);
                true
            }
            None => false,
        }
    }

    /// Observer-side read: a fresh copy when the try-lock succeeds, the
    /// last successfully-read value otherwise.
    pub fn read(&self) -> Snapshot {
        let mut cached = self.last_read.lock();
        if let Some(live) = self.live.try_lock() {
            *cached = live.clone();
        }
        cached.clone()
    }
}

/// Capability that receives the snapshot at tick rate.
///
/// Injected at construction; the real system hangs its publishers here,
/// tests inject [`RecordingSink`].
pub trait TelemetrySink: Send {
    /// Called from the mutation-drain phase whenever the tracked shape
    /// (dimension, mechanism count) changes.
    fn reshape(&mut self, position_dim: usize, vm_count: usize) {
        let _ = (position_dim, vm_count);
    }

    /// Called once per tick with the freshly-written snapshot. Runs on the
    /// tick thread; implementations must not block.
    fn publish(&mut self, snapshot: &Snapshot);
}

/// Discards everything.
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn publish(&mut self, _snapshot: &Snapshot) {}
}

/// Accumulates published snapshots for inspection. Test use only: publishing
/// clones, which allocates.
pub struct RecordingSink {
    snapshots: Arc<Mutex<Vec<Snapshot>>>,
    reshapes: Arc<Mutex<Vec<(usize, usize)>>>,
}

impl RecordingSink {
    #[allow(clippy::type_complexity)]
    pub fn new() -> (
        Self,
        Arc<Mutex<Vec<Snapshot>>>,
        Arc<Mutex<Vec<(usize, usize)>>>,
    ) {
        let snapshots = Arc::new(Mutex::new(Vec::new()));
        let reshapes = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                snapshots: snapshots.clone(),
                reshapes: reshapes.clone(),
            },
            snapshots,
            reshapes,
        )
    }
}

impl TelemetrySink for RecordingSink {
    fn reshape(&mut self, position_dim: usize, vm_count: usize) {
        self.reshapes.lock().push((position_dim, vm_count));
    }

    fn publish(&mut self, snapshot: &Snapshot) {
        self.snapshots.lock().push(snapshot.clone());
    }
}
