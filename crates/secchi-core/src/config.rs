use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ClarityError, Result};
use crate::features::Feature;
use crate::harmonize::HarmonizationSettings;
use crate::observation::{Band, Sensor};
use crate::partition::{blocked_rows, FoldStrategy};
use crate::training::{BoosterSettings, HyperGrid};

/// Everything one training run needs. Defaults match the published
/// Secchi model set-up (20 % hold-out, 5 spatiotemporal folds, 5 time groups).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub seed: u64,
    /// Sensor whose radiometric scale every other sensor is corrected onto.
    pub reference_sensor: Sensor,
    pub harmonized_bands: Vec<Band>,
    /// Width of the window in which two overpasses count as simultaneous.
    pub pairing_window_days: u32,
    /// Model input columns, in order.
    pub features: Vec<Feature>,
    /// Upper bound of a plausible Secchi depth in metres.
    pub max_target_m: f64,
    pub holdout_fraction: f64,
    pub n_folds: usize,
    pub n_time_groups: usize,
    pub fold_strategy: FoldStrategy,
    pub grid: HyperGrid,
    pub booster: BoosterSettings,
    /// Worker threads for the grid search; 0 = all available cores.
    pub threads: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            reference_sensor: Sensor::Landsat8,
            harmonized_bands: Band::ALL.to_vec(),
            pairing_window_days: 1,
            features: Feature::DEFAULT_SET.to_vec(),
            max_target_m: 15.0,
            holdout_fraction: 0.2,
            n_folds: 5,
            n_time_groups: 5,
            fold_strategy: FoldStrategy::Blocked,
            grid: HyperGrid::default(),
            booster: BoosterSettings::default(),
            threads: 0,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    pub fn harmonization(&self) -> HarmonizationSettings {
        HarmonizationSettings {
            reference: self.reference_sensor,
            bands: self.harmonized_bands.clone(),
            pairing_window_days: self.pairing_window_days,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(ClarityError::InvalidConfig(msg));

        if !(self.holdout_fraction > 0.0 && self.holdout_fraction < 1.0) {
            return invalid(format!("holdout_fraction {} outside (0, 1)", self.holdout_fraction));
        }
        if self.n_folds < 2 {
            return invalid(format!("n_folds must be at least 2, got {}", self.n_folds));
        }
        if self.n_time_groups == 0 {
            return invalid("n_time_groups must be positive".into());
        }
        if self.fold_strategy == FoldStrategy::Blocked {
            let [row_folds, _] = blocked_rows(self.n_folds);
            if self.n_folds < 4 {
                return invalid(format!("blocked folds need n_folds >= 4, got {}", self.n_folds));
            }
            if self.n_time_groups < row_folds {
                return invalid(format!(
                    "{} blocked folds need at least {row_folds} time groups, got {}",
                    self.n_folds, self.n_time_groups
                ));
            }
        }
        if self.pairing_window_days == 0 {
            return invalid("pairing_window_days must be positive".into());
        }
        if !(self.max_target_m.is_finite() && self.max_target_m > 0.0) {
            return invalid(format!("max_target_m {} must be positive", self.max_target_m));
        }
        if self.features.is_empty() {
            return invalid("feature list is empty".into());
        }
        for feature in &self.features {
            for band in feature.required_bands() {
                if !self.harmonized_bands.contains(band) {
                    return invalid(format!(
                        "feature {} needs band {band}, which is not harmonized",
                        feature.name()
                    ));
                }
            }
        }
        self.grid.validate()?;
        self.booster.validate()?;
        Ok(())
    }
}
