//! Secchi-depth prediction core: cross-sensor harmonization, colorimetric
//! features, leakage-safe spatiotemporal partitioning, grid-searched gradient
//! boosting and hold-out validation.

pub mod colorimetry;
pub mod config;
pub mod error;
pub mod features;
pub mod harmonize;
pub mod observation;
pub mod partition;
pub mod pipeline;
pub mod report;
pub mod synthetic;
pub mod training;
pub mod validation;

pub use config::PipelineConfig;
pub use error::{ClarityError, Result};
pub use features::{Dataset, Feature, FeatureBuilder, FeatureSchema};
pub use harmonize::{HarmonizationModel, HarmonizationSettings};
pub use observation::{Band, Observation, Reflectance, Sensor};
pub use pipeline::{predict_new, MetricsSummary, NewPrediction, Pipeline, PipelineOutput};
pub use report::{ExclusionKind, RunReport};
pub use training::TrainedModel;
pub use validation::{Metrics, Stratum};
