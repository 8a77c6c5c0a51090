//! Curve trait: the interface to a learned task-space trajectory.
//!
//! The kernel is learning-agnostic; everything a virtual mechanism knows
//! about its demonstration lives behind [`Curve`], and everything about how
//! curves come into existence (training, model files) lives behind
//! [`CurveLibrary`]. The manager only ever consumes the queries below.

use nalgebra::{DMatrix, DVector};

use crate::error::CurveError;

/// A learned trajectory in task space, parameterised by a scalar phase.
///
/// Contract the kernel relies on:
/// - `update` is safe to call at any `dt > 0`;
/// - `distance` is non-negative, `probability` non-negative and finite;
/// - `stiffness` and `damping` are positive;
/// - after `set_active(true)`, subsequent `update` calls self-drive the
///   phase; otherwise the phase is pulled by projection of the input
///   position onto the curve.
pub trait Curve: Send {
    /// Reset the internal phase state. Called once when the mechanism enters
    /// the manager.
    fn init(&mut self);

    /// Advance the internal phase from the measured robot state.
    fn update(&mut self, position: &DVector<f64>, velocity: &DVector<f64>, dt: f64);

    /// Closest point on the curve at the current phase.
    fn state(&self, out: &mut DVector<f64>);

    /// Tangent velocity of the closest point.
    fn state_dot(&self, out: &mut DVector<f64>);

    /// Scalar progress along the curve, 0 at the start.
    fn phase(&self) -> f64;

    /// Current phase rate.
    fn phase_dot(&self) -> f64;

    /// Phase rate the curve would self-drive at.
    fn phase_dot_ref(&self) -> f64;

    /// Goodness-of-fit distance from `position` to the curve.
    fn distance(&self, position: &DVector<f64>) -> f64;

    /// Goodness-of-fit probability of `position` under the curve's model.
    fn probability(&self, position: &DVector<f64>) -> f64;

    /// Spring gain of the attraction force.
    fn stiffness(&self) -> f64;

    /// Damper gain of the attraction force.
    fn damping(&self) -> f64;

    /// Toggle autonomous self-driving of the phase.
    fn set_active(&mut self, active: bool);

    /// Set the direction of phase integration.
    fn set_move_forward(&mut self, forward: bool);

    /// Select the Mahalanobis-like weighted distance measure.
    fn set_weighted_dist(&mut self, weighted: bool);

    /// Export the immutable model parameters for persistence.
    ///
    /// Must be cheap: it runs inside the tick's mutation-drain phase.
    fn export_model(&self) -> CurveModel;
}

/// Opaque persisted form of a curve's parameters.
///
/// The payload format belongs to the `Curve` implementation; the kernel only
/// moves it between the tick thread and the save worker.
#[derive(Debug, Clone)]
pub struct CurveModel(pub Vec<u8>);

/// Source of curves: the injection point for the learning machinery and the
/// persisted-model store.
///
/// `train`, `load`, and `save` may block on I/O or burn CPU; the kernel only
/// calls them from worker lanes (and `load` once at construction when
/// pre-loading configured models).
pub trait CurveLibrary: Send + Sync {
    /// A fresh curve with default parameters.
    fn empty(&self, position_dim: usize) -> Box<dyn Curve>;

    /// Train a curve from a demonstration matrix: rows are samples, columns
    /// are time followed by `position_dim` coordinates.
    fn train(
        &self,
        position_dim: usize,
        demonstration: &DMatrix<f64>,
    ) -> Result<Box<dyn Curve>, CurveError>;

    /// Load a curve from the named persisted model.
    fn load(&self, position_dim: usize, name: &str) -> Result<Box<dyn Curve>, CurveError>;

    /// Persist a model under the given name.
    fn save(&self, name: &str, model: &CurveModel) -> Result<(), CurveError>;
}
