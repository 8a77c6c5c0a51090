//! Error types surfaced at the library boundary.
//!
//! Construction errors are typed and descriptive: the manager never starts
//! half-configured. Curve errors are produced by `CurveLibrary`
//! implementations and by the worker lanes, which log them and drop the job.

use thiserror::Error;

/// Rejected configuration. Returned by [`crate::config::ManagerConfig::validate`]
/// and by facade construction.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("position_dim must be 1, 2, or 3 (got {0})")]
    PositionDim(usize),

    #[error("phase_dot_th must be positive (got {0})")]
    PhaseDotTh(f64),

    #[error("phase_dot_preauto_th ({preauto}) must exceed phase_dot_th ({th})")]
    PreautoThreshold { preauto: f64, th: f64 },

    #[error("{list} has {got} entries but {expected} models are configured")]
    OptionListLength {
        list: &'static str,
        got: usize,
        expected: usize,
    },

    #[error("failed to pre-load model '{name}'")]
    Preload {
        name: String,
        #[source]
        source: CurveError,
    },
}

/// Failure while training, loading, or saving a curve model.
#[derive(Debug, Error)]
pub enum CurveError {
    #[error("training rejected: {0}")]
    Training(String),

    #[error("model '{name}' could not be read")]
    Load {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("model '{name}' could not be written")]
    Save {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("model '{name}' is malformed")]
    Decode {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}
