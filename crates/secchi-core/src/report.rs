//! Ledger of non-fatal exclusions collected over one pipeline run.
//!
//! Every stage that drops an observation, a correction slice or a grid
//! configuration records it here so the caller can see exactly how much data
//! was lost and why.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionKind {
    /// Target outside (0, max_target_m] or non-finite.
    InvalidTarget,
    /// A band needed for harmonization or features was absent.
    MissingBand,
    /// No fitted correction exists for the observation's (band, sensor).
    MissingCorrection,
    /// A (band, sensor) correction could not be fitted.
    SparseCorrection,
    /// All-zero or non-finite reflectance in the colour transform.
    DegenerateColor,
    /// Band ratio with zero or non-finite denominator.
    ZeroDenominator,
    /// Non-finite water-body attribute used as a feature.
    InvalidAttribute,
    /// Region too small to contribute to the stratified hold-out.
    SparseRegion,
    /// Grid configuration dropped after diverging on a fold.
    DivergentConfiguration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub exclusions: BTreeMap<ExclusionKind, usize>,
    pub warnings: Vec<String>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one exclusion and log it.
    pub fn exclude(&mut self, kind: ExclusionKind, detail: impl Into<String>) {
        let detail = detail.into();
        tracing::warn!(?kind, %detail, "excluded");
        *self.exclusions.entry(kind).or_insert(0) += 1;
        self.warnings.push(detail);
    }

    pub fn count(&self, kind: ExclusionKind) -> usize {
        self.exclusions.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.exclusions.values().sum()
    }

    pub fn is_clean(&self) -> bool {
        self.exclusions.is_empty()
    }

    pub fn merge(&mut self, other: RunReport) {
        for (kind, n) in other.exclusions {
            *self.exclusions.entry(kind).or_insert(0) += n;
        }
        self.warnings.extend(other.warnings);
    }
}
