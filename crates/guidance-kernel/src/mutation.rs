//! Structural mutations and the worker lanes that produce them.
//!
//! The real-time tick owns the mechanism collection; everything structural
//! (insert, delete, save) happens out of band. Requests go to one of three
//! single-threaded lanes; each lane does its expensive work (training,
//! model I/O) off the tick thread and posts a completed [`Mutation`] to an
//! unbounded queue that the tick drains atomically at its top. A lane whose
//! slot is occupied rejects new submissions immediately; the caller may
//! retry.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use nalgebra::DMatrix;
use tracing::{error, info, warn};

use crate::curve::{Curve, CurveLibrary, CurveModel};
use crate::manager::{VmHandle, VmOptions};

/// How long the save lane waits for the tick to answer with the exported
/// model. Only elapses when no one is ticking the manager.
const SAVE_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// A completed structural change, applied by the tick at its next drain.
pub enum Mutation {
    /// Append a freshly built (trained, loaded, or default) mechanism.
    Insert {
        curve: Box<dyn Curve>,
        options: VmOptions,
    },
    /// Remove the mechanism with this handle; no-op if absent.
    Delete { handle: VmHandle },
    /// Ask the tick to export the mechanism's model. The tick answers on
    /// `reply` (`None` for an unknown handle) and the save lane performs
    /// the file write.
    Save {
        handle: VmHandle,
        reply: Sender<Option<(String, CurveModel)>>,
    },
}

/// What the insert lane should build.
pub enum InsertRequest {
    Empty,
    FromMatrix(DMatrix<f64>),
    FromModel(String),
}

/// Submission side of one worker lane. Bounded to a single queued job.
pub struct Lane<T> {
    name: &'static str,
    tx: Sender<T>,
}

impl<T> Lane<T> {
    /// Hand a job to the lane. Returns false (after a warning) when the
    /// lane is busy.
    pub fn submit(&self, job: T) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(lane = self.name, "lane busy, submission rejected");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                error!(lane = self.name, "lane worker is gone");
                false
            }
        }
    }
}

/// The three lanes: inserts are heavy (training), deletes and saves are
/// light, but requests within a lane must not be reordered.
pub struct MutationLanes {
    pub insert: Lane<InsertRequest>,
    pub delete: Lane<VmHandle>,
    pub save: Lane<VmHandle>,
}

/// Spawn the worker lanes. Returns the lanes and the completed-mutation
/// receiver the manager drains each tick.
pub fn spawn_lanes(
    library: Arc<dyn CurveLibrary>,
    position_dim: usize,
) -> (MutationLanes, Receiver<Mutation>) {
    let (mutation_tx, mutation_rx) = unbounded();

    let insert = spawn_insert_lane(library.clone(), position_dim, mutation_tx.clone());
    let delete = spawn_delete_lane(mutation_tx.clone());
    let save = spawn_save_lane(library, mutation_tx);

    (
        MutationLanes {
            insert,
            delete,
            save,
        },
        mutation_rx,
    )
}

fn spawn_insert_lane(
    library: Arc<dyn CurveLibrary>,
    position_dim: usize,
    mutation_tx: Sender<Mutation>,
) -> Lane<InsertRequest> {
    let (tx, rx) = bounded(1);
    thread::Builder::new()
        .name("vm-insert".into())
        .spawn(move || {
            while let Ok(request) = rx.recv() {
                let built = match request {
                    InsertRequest::Empty => Ok(library.empty(position_dim)),
                    InsertRequest::FromMatrix(demonstration) => {
                        library.train(position_dim, &demonstration)
                    }
                    InsertRequest::FromModel(name) => library.load(position_dim, &name),
                };
                match built {
                    Ok(curve) => {
                        let _ = mutation_tx.send(Mutation::Insert {
                            curve,
                            options: VmOptions::default(),
                        });
                    }
                    Err(err) => {
                        error!(error = %err, "could not build mechanism, nothing inserted");
                    }
                }
            }
        })
        .expect("spawn vm-insert worker");
    Lane { name: "insert", tx }
}

fn spawn_delete_lane(mutation_tx: Sender<Mutation>) -> Lane<VmHandle> {
    let (tx, rx) = bounded(1);
    thread::Builder::new()
        .name("vm-delete".into())
        .spawn(move || {
            while let Ok(handle) = rx.recv() {
                if mutation_tx.send(Mutation::Delete { handle }).is_err() {
                    break;
                }
            }
        })
        .expect("spawn vm-delete worker");
    Lane { name: "delete", tx }
}

fn spawn_save_lane(library: Arc<dyn CurveLibrary>, mutation_tx: Sender<Mutation>) -> Lane<VmHandle> {
    let (tx, rx) = bounded(1);
    thread::Builder::new()
        .name("vm-save".into())
        .spawn(move || {
            while let Ok(handle) = rx.recv() {
                let (reply_tx, reply_rx) = bounded(1);
                if mutation_tx
                    .send(Mutation::Save {
                        handle,
                        reply: reply_tx,
                    })
                    .is_err()
                {
                    break;
                }
                match reply_rx.recv_timeout(SAVE_REPLY_TIMEOUT) {
                    Ok(Some((name, model))) => match library.save(&name, &model) {
                        Ok(()) => info!(handle = %handle, name, "mechanism saved"),
                        Err(err) => {
                            error!(handle = %handle, error = %err, "saving mechanism failed")
                        }
                    },
                    Ok(None) => warn!(handle = %handle, "save requested for unknown mechanism"),
                    Err(_) => {
                        warn!(handle = %handle, "no tick drained the save request in time")
                    }
                }
            }
        })
        .expect("spawn vm-save worker");
    Lane { name: "save", tx }
}
