//! Reference curve: a straight segment in task space.
//!
//! Stands in for the learned (GMR) curves of the full system so the kernel
//! is exercisable end-to-end: projection-driven phase when passive,
//! self-driven phase at the reference rate when active, a Gaussian
//! goodness-of-fit probability, and JSON-persisted parameters. Training
//! reduces a demonstration to its endpoints, duration, and residual spread.

use std::fs;
use std::path::PathBuf;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::curve::{Curve, CurveLibrary, CurveModel};
use crate::error::CurveError;

/// Persisted parameters of a [`LineCurve`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineParams {
    pub start: Vec<f64>,
    pub end: Vec<f64>,
    pub stiffness: f64,
    pub damping: f64,
    /// Phase rate used when the curve drives itself.
    pub phase_dot_ref: f64,
    /// Spread of the demonstration around the segment.
    pub sigma: f64,
}

impl LineParams {
    /// Unit segment along the first axis, workable defaults elsewhere.
    pub fn default_for_dim(position_dim: usize) -> Self {
        let mut end = vec![0.0; position_dim];
        end[0] = 1.0;
        Self {
            start: vec![0.0; position_dim],
            end,
            stiffness: 100.0,
            damping: 10.0,
            phase_dot_ref: 0.5,
            sigma: 0.05,
        }
    }
}

/// Straight-segment mechanism `start -> end` with phase in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct LineCurve {
    params: LineParams,
    start: DVector<f64>,
    span: DVector<f64>,
    span_norm2: f64,
    phase: f64,
    phase_dot: f64,
    active: bool,
    forward: bool,
    weighted_dist: bool,
}

impl LineCurve {
    pub fn from_params(params: LineParams) -> Self {
        let start = DVector::from_column_slice(&params.start);
        let end = DVector::from_column_slice(&params.end);
        let span = &end - &start;
        let span_norm2 = span.norm_squared();
        Self {
            params,
            start,
            span,
            span_norm2,
            phase: 0.0,
            phase_dot: 0.0,
            active: false,
            forward: true,
            weighted_dist: false,
        }
    }

    /// Phase of the closest point to `position`, clamped to the segment.
    fn project(&self, position: &DVector<f64>) -> f64 {
        if self.span_norm2 == 0.0 {
            return 0.0;
        }
        let mut dot = 0.0;
        for i in 0..position.len() {
            dot += (position[i] - self.start[i]) * self.span[i];
        }
        (dot / self.span_norm2).clamp(0.0, 1.0)
    }

    fn euclidean_distance(&self, position: &DVector<f64>) -> f64 {
        let mut acc = 0.0;
        for i in 0..position.len() {
            let closest = self.start[i] + self.phase * self.span[i];
            let err = position[i] - closest;
            acc += err * err;
        }
        acc.sqrt()
    }
}

impl Curve for LineCurve {
    fn init(&mut self) {
        self.phase = 0.0;
        self.phase_dot = 0.0;
        self.active = false;
        self.forward = true;
    }

    fn update(&mut self, position: &DVector<f64>, _velocity: &DVector<f64>, dt: f64) {
        if self.active {
            let rate = if self.forward {
                self.params.phase_dot_ref
            } else {
                -self.params.phase_dot_ref
            };
            self.phase = (self.phase + rate * dt).clamp(0.0, 1.0);
            self.phase_dot = rate;
        } else {
            let projected = self.project(position);
            self.phase_dot = (projected - self.phase) / dt;
            self.phase = projected;
        }
    }

    fn state(&self, out: &mut DVector<f64>) {
        out.copy_from(&self.start);
        out.axpy(self.phase, &self.span, 1.0);
    }

    fn state_dot(&self, out: &mut DVector<f64>) {
        out.copy_from(&self.span);
        *out *= self.phase_dot;
    }

    fn phase(&self) -> f64 {
        self.phase
    }

    fn phase_dot(&self) -> f64 {
        self.phase_dot
    }

    fn phase_dot_ref(&self) -> f64 {
        self.params.phase_dot_ref
    }

    fn distance(&self, position: &DVector<f64>) -> f64 {
        let d = self.euclidean_distance(position);
        if self.weighted_dist {
            d / self.params.sigma
        } else {
            d
        }
    }

    fn probability(&self, position: &DVector<f64>) -> f64 {
        let normalised = self.euclidean_distance(position) / self.params.sigma;
        (-0.5 * normalised * normalised).exp()
    }

    fn stiffness(&self) -> f64 {
        self.params.stiffness
    }

    fn damping(&self) -> f64 {
        self.params.damping
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    fn set_move_forward(&mut self, forward: bool) {
        self.forward = forward;
    }

    fn set_weighted_dist(&mut self, weighted: bool) {
        self.weighted_dist = weighted;
    }

    fn export_model(&self) -> CurveModel {
        CurveModel(serde_json::to_vec(&self.params).unwrap_or_default())
    }
}

/// Filesystem-backed [`CurveLibrary`] for [`LineCurve`] models.
pub struct LineCurveLibrary {
    model_dir: PathBuf,
}

impl LineCurveLibrary {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
        }
    }

    fn model_path(&self, name: &str) -> PathBuf {
        self.model_dir.join(name).with_extension("json")
    }
}

impl CurveLibrary for LineCurveLibrary {
    fn empty(&self, position_dim: usize) -> Box<dyn Curve> {
        Box::new(LineCurve::from_params(LineParams::default_for_dim(
            position_dim,
        )))
    }

    fn train(
        &self,
        position_dim: usize,
        demonstration: &DMatrix<f64>,
    ) -> Result<Box<dyn Curve>, CurveError> {
        if demonstration.ncols() != position_dim + 1 {
            return Err(CurveError::Training(format!(
                "expected {} columns (time + position), got {}",
                position_dim + 1,
                demonstration.ncols()
            )));
        }
        if demonstration.nrows() < 2 {
            return Err(CurveError::Training(format!(
                "need at least 2 samples, got {}",
                demonstration.nrows()
            )));
        }

        let last = demonstration.nrows() - 1;
        let start: Vec<f64> = (0..position_dim)
            .map(|c| demonstration[(0, c + 1)])
            .collect();
        let end: Vec<f64> = (0..position_dim)
            .map(|c| demonstration[(last, c + 1)])
            .collect();

        let duration = demonstration[(last, 0)] - demonstration[(0, 0)];
        let phase_dot_ref = if duration > 0.0 { 1.0 / duration } else { 1.0 };

        let defaults = LineParams::default_for_dim(position_dim);
        let mut params = LineParams {
            start,
            end,
            phase_dot_ref,
            ..defaults
        };

        // Spread of the demonstration around the fitted segment.
        let mut probe = LineCurve::from_params(params.clone());
        let mut residual_sum = 0.0;
        let mut sample = DVector::zeros(position_dim);
        for r in 0..demonstration.nrows() {
            for c in 0..position_dim {
                sample[c] = demonstration[(r, c + 1)];
            }
            probe.phase = probe.project(&sample);
            residual_sum += probe.euclidean_distance(&sample);
        }
        params.sigma = (residual_sum / demonstration.nrows() as f64).max(1e-2);

        Ok(Box::new(LineCurve::from_params(params)))
    }

    fn load(&self, position_dim: usize, name: &str) -> Result<Box<dyn Curve>, CurveError> {
        let path = self.model_path(name);
        let bytes = fs::read(&path).map_err(|source| CurveError::Load {
            name: name.to_string(),
            source,
        })?;
        let params: LineParams =
            serde_json::from_slice(&bytes).map_err(|source| CurveError::Decode {
                name: name.to_string(),
                source,
            })?;
        if params.start.len() != position_dim || params.end.len() != position_dim {
            return Err(CurveError::Load {
                name: name.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!(
                        "model dimension {} does not match position_dim {}",
                        params.start.len(),
                        position_dim
                    ),
                ),
            });
        }
        Ok(Box::new(LineCurve::from_params(params)))
    }

    fn save(&self, name: &str, model: &CurveModel) -> Result<(), CurveError> {
        let wrap = |source| CurveError::Save {
            name: name.to_string(),
            source,
        };
        fs::create_dir_all(&self.model_dir).map_err(wrap)?;
        fs::write(self.model_path(name), &model.0).map_err(wrap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_line() -> LineCurve {
        LineCurve::from_params(LineParams::default_for_dim(2))
    }

    fn vec2(x: f64, y: f64) -> DVector<f64> {
        DVector::from_column_slice(&[x, y])
    }

    #[test]
    fn test_passive_phase_follows_projection() {
        let mut curve = unit_line();
        curve.init();

        curve.update(&vec2(0.25, 0.4), &vec2(0.0, 0.0), 0.01);
        assert!((curve.phase() - 0.25).abs() < 1e-12);
        // projection moved the phase from 0 to 0.25 over one tick
        assert!((curve.phase_dot() - 25.0).abs() < 1e-9);

        let mut state = DVector::zeros(2);
        curve.state(&mut state);
        assert!((state[0] - 0.25).abs() < 1e-12);
        assert!(state[1].abs() < 1e-12);
    }

    #[test]
    fn test_projection_clamps_to_segment() {
        let mut curve = unit_line();
        curve.init();
        curve.update(&vec2(2.0, 0.0), &vec2(0.0, 0.0), 0.01);
        assert_eq!(curve.phase(), 1.0);
        curve.update(&vec2(-1.0, 0.0), &vec2(0.0, 0.0), 0.01);
        assert_eq!(curve.phase(), 0.0);
    }

    #[test]
    fn test_active_curve_self_drives() {
        let mut curve = unit_line();
        curve.init();
        curve.set_active(true);

        // the measured position is ignored while self-driving
        curve.update(&vec2(9.0, 9.0), &vec2(0.0, 0.0), 0.1);
        assert!((curve.phase() - 0.05).abs() < 1e-12);
        assert!((curve.phase_dot() - 0.5).abs() < 1e-12);

        curve.set_move_forward(false);
        curve.update(&vec2(9.0, 9.0), &vec2(0.0, 0.0), 0.1);
        assert!(curve.phase().abs() < 1e-12);
    }

    #[test]
    fn test_weighted_distance_scales_by_sigma() {
        let mut curve = unit_line();
        curve.init();
        let pos = vec2(0.0, 0.1);
        let plain = curve.distance(&pos);
        curve.set_weighted_dist(true);
        assert!((curve.distance(&pos) - plain / 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_probability_peaks_on_curve() {
        let curve = unit_line();
        assert!((curve.probability(&vec2(0.0, 0.0)) - 1.0).abs() < 1e-12);
        assert!(curve.probability(&vec2(0.0, 0.5)) < 1e-4);
    }

    #[test]
    fn test_train_takes_endpoints_and_duration() {
        let library = LineCurveLibrary::new(std::env::temp_dir());
        // time, x, y: one second from (0,0) to (1,1)
        let demo = DMatrix::from_row_slice(
            3,
            3,
            &[0.0, 0.0, 0.0, 1.0, 0.5, 0.5, 2.0, 1.0, 1.0],
        );
        let curve = library.train(2, &demo).unwrap();
        assert!((curve.phase_dot_ref() - 0.5).abs() < 1e-12);

        let mut state = DVector::zeros(2);
        curve.state(&mut state);
        assert!(state[0].abs() < 1e-12 && state[1].abs() < 1e-12);
    }

    #[test]
    fn test_train_rejects_bad_shapes() {
        let library = LineCurveLibrary::new(std::env::temp_dir());
        let wrong_cols = DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 1.0, 1.0]);
        assert!(library.train(2, &wrong_cols).is_err());
        let one_row = DMatrix::from_row_slice(1, 3, &[0.0, 0.0, 0.0]);
        assert!(library.train(2, &one_row).is_err());
    }

    #[test]
    fn test_library_round_trip() {
        let dir = std::env::temp_dir().join(format!("line-curve-{}", std::process::id()));
        let library = LineCurveLibrary::new(&dir);

        let curve = library.empty(2);
        library.save("round_trip", &curve.export_model()).unwrap();

        let reloaded = library.load(2, "round_trip").unwrap();
        assert!((reloaded.stiffness() - curve.stiffness()).abs() < 1e-12);
        assert!((reloaded.phase_dot_ref() - curve.phase_dot_ref()).abs() < 1e-12);

        assert!(library.load(2, "missing").is_err());
        let _ = fs::remove_dir_all(dir);
    }
}
