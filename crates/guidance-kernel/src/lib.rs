//! Guidance Kernel: real-time blending of virtual mechanisms.
//!
//! A virtual mechanism is a learned curve in task space together with its
//! spring-damper gains. Each control tick this crate reads the robot's
//! measured pose and velocity, scores every mechanism's fit, blends them
//! into a single guidance force under the selected mixing mode, and steps a
//! per-mechanism activation automaton that decides whether the mechanism
//! drives the robot autonomously.
//!
//! Structural changes (insert, delete, save) never touch the tick directly:
//! they run on worker lanes and land as completed mutations that the tick
//! applies atomically at its next boundary.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use guidance_kernel::{
//!     GuidanceInterface, LineCurveLibrary, ManagerConfig, NullSink, TickOptions,
//! };
//!
//! let config = ManagerConfig { position_dim: 2, ..ManagerConfig::default() };
//! let library = Arc::new(LineCurveLibrary::new("models"));
//! let interface = GuidanceInterface::new(config, library, Box::new(NullSink))?;
//!
//! // real-time loop
//! let mut force = nalgebra::DVector::zeros(2);
//! interface.update(&position, &velocity, 0.001, TickOptions::default(), &mut force);
//!
//! // out of band, from any thread
//! interface.insert_vm_from_model("demo_left");
//! ```

pub mod automaton;
pub mod config;
pub mod curve;
pub mod error;
pub mod interface;
pub mod line;
pub mod manager;
pub mod mixer;
pub mod mutation;
pub mod telemetry;

pub use automaton::{ActivationAutomaton, AutomatonKind, AutomatonState};
pub use config::ManagerConfig;
pub use curve::{Curve, CurveLibrary, CurveModel};
pub use error::{ConfigError, CurveError};
pub use interface::GuidanceInterface;
pub use line::{LineCurve, LineCurveLibrary, LineParams};
pub use manager::{MechanismManager, TickOptions, VmHandle, VmOptions};
pub use mixer::{MixerMode, POTENTIAL_GAIN};
pub use mutation::{InsertRequest, Mutation, MutationLanes};
pub use telemetry::{NullSink, RecordingSink, Snapshot, SnapshotCell, TelemetrySink, VmSnapshot};
