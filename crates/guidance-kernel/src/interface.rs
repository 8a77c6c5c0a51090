//! Facade over the mechanism manager: a synchronous, tick-safe update
//! surface plus asynchronous structural triggers.
//!
//! The tick thread calls `update` / `update_slices`; every other method is
//! safe from any thread and never makes the tick wait. Accessors read the
//! last telemetry snapshot, so a mechanism inserted out of band becomes
//! visible at the first tick that applies it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use parking_lot::Mutex;
use tracing::info;

use crate::config::ManagerConfig;
use crate::curve::CurveLibrary;
use crate::error::ConfigError;
use crate::manager::{MechanismManager, TickOptions, VmHandle, VmOptions};
use crate::mixer::MixerMode;
use crate::mutation::{spawn_lanes, InsertRequest, MutationLanes};
use crate::telemetry::{Snapshot, SnapshotCell, TelemetrySink, VmSnapshot};

/// Manager plus preallocated scratch for the slice entry points.
struct TickCell {
    manager: MechanismManager,
    position: DVector<f64>,
    velocity: DVector<f64>,
    force: DVector<f64>,
}

/// The single object callers hold: construction validates the configuration,
/// pre-loads the configured models, and spawns the worker lanes.
pub struct GuidanceInterface {
    cell: Mutex<TickCell>,
    snapshot: Arc<SnapshotCell>,
    collision: Arc<AtomicBool>,
    lanes: MutationLanes,
    position_dim: usize,
    default_mode: MixerMode,
}

impl std::fmt::Debug for GuidanceInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuidanceInterface").finish_non_exhaustive()
    }
}

impl GuidanceInterface {
    pub fn new(
        config: ManagerConfig,
        library: Arc<dyn CurveLibrary>,
        sink: Box<dyn TelemetrySink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let (lanes, inbox) = spawn_lanes(library.clone(), config.position_dim);
        // start not active: the first tick resets any automaton to Manual
        let collision = Arc::new(AtomicBool::new(true));
        let snapshot = SnapshotCell::new();
        let mut manager = MechanismManager::new(
            &config,
            inbox,
            collision.clone(),
            snapshot.clone(),
            sink,
        );

        for (index, name) in config.models.iter().enumerate() {
            let curve =
                library
                    .load(config.position_dim, name)
                    .map_err(|source| ConfigError::Preload {
                        name: name.clone(),
                        source,
                    })?;
            manager.insert_entry(
                curve,
                VmOptions {
                    use_weighted_dist: config.weighted_dist_for(index),
                    use_active_guide: config.active_guide_for(index),
                },
            );
        }
        manager.publish_initial();

        info!(
            position_dim = config.position_dim,
            preloaded = config.models.len(),
            "guidance interface ready"
        );

        let dim = config.position_dim;
        Ok(Self {
            cell: Mutex::new(TickCell {
                manager,
                position: DVector::zeros(dim),
                velocity: DVector::zeros(dim),
                force: DVector::zeros(dim),
            }),
            snapshot,
            collision,
            lanes,
            position_dim: dim,
            default_mode: config.prob_mode,
        })
    }

    pub fn position_dim(&self) -> usize {
        self.position_dim
    }

    /// Tick options carrying the configured default mixing mode.
    pub fn default_options(&self) -> TickOptions {
        TickOptions::from(self.default_mode)
    }

    /// One control tick; the guidance force is written into `force_out`.
    pub fn update(
        &self,
        position: &DVector<f64>,
        velocity: &DVector<f64>,
        dt: f64,
        options: TickOptions,
        force_out: &mut DVector<f64>,
    ) {
        let mut cell = self.cell.lock();
        cell.manager.tick(position, velocity, dt, &options, force_out);
    }

    /// Slice variant of [`update`](Self::update) for callers holding plain
    /// buffers. Copies go through preallocated scratch.
    pub fn update_slices(
        &self,
        position: &[f64],
        velocity: &[f64],
        dt: f64,
        options: TickOptions,
        force_out: &mut [f64],
    ) {
        assert_eq!(force_out.len(), self.position_dim, "force buffer dimension");
        let mut guard = self.cell.lock();
        let cell = &mut *guard;
        cell.position.copy_from_slice(position);
        cell.velocity.copy_from_slice(velocity);
        cell.manager
            .tick(&cell.position, &cell.velocity, dt, &options, &mut cell.force);
        force_out.copy_from_slice(cell.force.as_slice());
    }

    /// Latch a collision: at the next tick every automaton observes it and
    /// any `Auto` mechanism returns to `Manual`.
    pub fn stop(&self) {
        self.collision.store(true, Ordering::Release);
    }

    /// Copy of the last published telemetry snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.read()
    }

    /// Mechanism handles in insertion order, as of the last snapshot.
    pub fn vm_handles(&self) -> Vec<VmHandle> {
        self.snapshot.read().vms.iter().map(|vm| vm.handle).collect()
    }

    pub fn vm_count(&self) -> usize {
        self.snapshot.read().vms.len()
    }

    /// True iff any mechanism is currently driving itself.
    pub fn on_vm(&self) -> bool {
        self.snapshot.read().vms.iter().any(|vm| vm.auto_active)
    }

    pub fn phase(&self, handle: VmHandle) -> f64 {
        self.vm(handle).map(|vm| vm.phase).unwrap_or(0.0)
    }

    pub fn scale(&self, handle: VmHandle) -> f64 {
        self.vm(handle).map(|vm| vm.scale).unwrap_or(0.0)
    }

    pub fn vm_position(&self, handle: VmHandle) -> DVector<f64> {
        self.vm(handle)
            .map(|vm| vm.position)
            .unwrap_or_else(|| DVector::zeros(self.position_dim))
    }

    pub fn vm_velocity(&self, handle: VmHandle) -> DVector<f64> {
        self.vm(handle)
            .map(|vm| vm.velocity)
            .unwrap_or_else(|| DVector::zeros(self.position_dim))
    }

    /// Queue insertion of a default mechanism. Returns false when the
    /// insert lane is busy.
    pub fn insert_vm(&self) -> bool {
        self.lanes.insert.submit(InsertRequest::Empty)
    }

    /// Queue training of a mechanism from a demonstration matrix
    /// (rows = samples, columns = time then position).
    pub fn insert_vm_from_matrix(&self, demonstration: DMatrix<f64>) -> bool {
        self.lanes
            .insert
            .submit(InsertRequest::FromMatrix(demonstration))
    }

    /// Queue loading of a persisted model.
    pub fn insert_vm_from_model(&self, name: impl Into<String>) -> bool {
        self.lanes
            .insert
            .submit(InsertRequest::FromModel(name.into()))
    }

    /// Queue deletion; a no-op if the handle is unknown by the time the
    /// tick drains it.
    pub fn delete_vm(&self, handle: VmHandle) -> bool {
        self.lanes.delete.submit(handle)
    }

    /// Queue persistence of the mechanism's model under `vm_<handle>`.
    pub fn save_vm(&self, handle: VmHandle) -> bool {
        self.lanes.save.submit(handle)
    }

    fn vm(&self, handle: VmHandle) -> Option<VmSnapshot> {
        self.snapshot
            .read()
            .vms
            .into_iter()
            .find(|vm| vm.handle == handle)
    }
}
