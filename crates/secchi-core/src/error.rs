use thiserror::Error;

use crate::observation::{Band, Sensor};

#[derive(Debug, Error)]
pub enum ClarityError {
    #[error("insufficient data: {0}")]
    DataInsufficiency(String),

    #[error("too few paired observations ({pairs}) to correct {sensor} {band} onto the reference scale")]
    TooFewPairs { band: Band, sensor: Sensor, pairs: usize },

    #[error("degenerate input: {0}")]
    DegenerateInput(String),

    #[error("feature schema mismatch: model expects {expected}, got {found}")]
    SchemaMismatch { expected: String, found: String },

    #[error("training diverged for {params} on fold {fold}")]
    TrainingDivergence { params: String, fold: usize },

    #[error("every hyper-parameter configuration failed ({tried} tried)")]
    AllConfigurationsFailed { tried: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to (de)serialise JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "threading")]
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl ClarityError {
    /// True for the per-observation / per-slice kinds that callers may turn into
    /// counted exclusions instead of aborting.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DataInsufficiency(_)
                | Self::TooFewPairs { .. }
                | Self::DegenerateInput(_)
                | Self::TrainingDivergence { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ClarityError>;
