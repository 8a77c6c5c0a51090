//! Configuration value object for the guidance kernel.
//!
//! The core does no configuration I/O: callers parse whatever format they
//! like (the experiments use JSON) into [`ManagerConfig`] and hand it to the
//! facade, which validates it before anything starts.

use serde::Deserialize;

use crate::automaton::AutomatonKind;
use crate::error::ConfigError;
use crate::mixer::MixerMode;

/// Recognised options, enumerated.
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    /// Task-space dimension, 1 to 3. Fixed for the life of the manager.
    pub position_dim: usize,

    /// Band half-width around the reference phase rate for the Auto
    /// transition. Must be positive.
    pub phase_dot_th: f64,

    /// Phase rate that arms the PreAuto state. Must exceed `phase_dot_th`.
    pub phase_dot_preauto_th: f64,

    /// Model names to pre-load, in order.
    #[serde(default)]
    pub models: Vec<String>,

    /// Default mixing mode; unknown strings fall back to `potential`.
    #[serde(default)]
    pub prob_mode: MixerMode,

    /// Per-pre-loaded-mechanism weighted-distance flags. Empty means all
    /// false; otherwise the length must match `models`.
    #[serde(default)]
    pub use_weighted_dist: Vec<bool>,

    /// Per-pre-loaded-mechanism legacy active-guide flags. Same length rule.
    #[serde(default)]
    pub use_active_guide: Vec<bool>,

    /// Activation automaton flavour.
    #[serde(default)]
    pub automaton: AutomatonKind,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            position_dim: 3,
            phase_dot_th: 0.1,
            phase_dot_preauto_th: 0.5,
            models: Vec::new(),
            prob_mode: MixerMode::Potential,
            use_weighted_dist: Vec::new(),
            use_active_guide: Vec::new(),
            automaton: AutomatonKind::ThreeState,
        }
    }
}

impl ManagerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=3).contains(&self.position_dim) {
            return Err(ConfigError::PositionDim(self.position_dim));
        }
        if self.phase_dot_th <= 0.0 {
            return Err(ConfigError::PhaseDotTh(self.phase_dot_th));
        }
        if self.phase_dot_preauto_th <= self.phase_dot_th {
            return Err(ConfigError::PreautoThreshold {
                preauto: self.phase_dot_preauto_th,
                th: self.phase_dot_th,
            });
        }
        for (list, len) in [
            ("use_weighted_dist", self.use_weighted_dist.len()),
            ("use_active_guide", self.use_active_guide.len()),
        ] {
            if len != 0 && len != self.models.len() {
                return Err(ConfigError::OptionListLength {
                    list,
                    got: len,
                    expected: self.models.len(),
                });
            }
        }
        Ok(())
    }

    /// Weighted-distance flag for the i-th pre-loaded model.
    pub fn weighted_dist_for(&self, index: usize) -> bool {
        self.use_weighted_dist.get(index).copied().unwrap_or(false)
    }

    /// Legacy active-guide flag for the i-th pre-loaded model.
    pub fn active_guide_for(&self, index: usize) -> bool {
        self.use_active_guide.get(index).copied().unwrap_or(false)
    }
}
