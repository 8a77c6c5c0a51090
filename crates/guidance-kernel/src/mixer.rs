//! Probabilistic mixing of virtual mechanisms into a single guidance force.
//!
//! Each tick assigns every mechanism a raw score from its goodness of fit at
//! the measured position, then finalises the scores into blending weights.
//! `Hard` and `Soft` produce convex weights (a partition of unity whenever at
//! least one raw score is positive); `Potential` deliberately does not
//! normalise, so each mechanism attracts independently.

use serde::{Deserialize, Deserializer};
use tracing::warn;

/// Gain of the distance potential `exp(-POTENTIAL_GAIN * distance)`.
pub const POTENTIAL_GAIN: f64 = 10.0;

/// How per-mechanism scores are turned into blending weights.
///
/// The mode travels with each `update` call, not with the mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MixerMode {
    /// Posterior probabilities normalised over all mechanisms.
    Hard,
    /// Unnormalised distance potentials; mechanisms attract independently.
    #[default]
    Potential,
    /// Distance-weighted posterior: `exp(-k d) * p / sum(p)`.
    Soft,
}

impl MixerMode {
    /// Parse a configured mode name. Unknown names fall back to `Potential`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "hard" => MixerMode::Hard,
            "potential" => MixerMode::Potential,
            "soft" => MixerMode::Soft,
            other => {
                warn!(mode = other, "unknown prob_mode, defaulting to potential");
                MixerMode::Potential
            }
        }
    }
}

impl<'de> Deserialize<'de> for MixerMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(MixerMode::from_name(&name))
    }
}

/// Raw per-mechanism score before the normalisation pass.
pub fn raw_score(mode: MixerMode, probability: f64, distance: f64) -> f64 {
    match mode {
        MixerMode::Hard | MixerMode::Soft => probability,
        MixerMode::Potential => (-POTENTIAL_GAIN * distance).exp(),
    }
}

/// Finalise one raw score given the sum over all mechanisms.
///
/// `sum == 0` yields a zero weight in the normalised modes: no mechanism
/// fits, no force is produced.
pub fn finalize_scale(mode: MixerMode, raw: f64, sum: f64, distance: f64) -> f64 {
    match mode {
        MixerMode::Hard => {
            if sum > 0.0 {
                raw / sum
            } else {
                0.0
            }
        }
        MixerMode::Potential => raw,
        MixerMode::Soft => {
            if sum > 0.0 {
                (-POTENTIAL_GAIN * distance).exp() * raw / sum
            } else {
                0.0
            }
        }
    }
}
