//! Leakage-safe partitioning: a region-stratified hold-out set and
//! group-aware cross-validation folds over the remaining train pool.
//!
//! Every random draw takes an explicit seed; the same seed and input order
//! always reproduce the same partition.

pub mod folds;
pub mod temporal;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ClarityError, Result};
use crate::features::Dataset;
use crate::report::{ExclusionKind, RunReport};

pub use folds::{blocked_rows, make_folds, Fold, FoldAssignment};
pub use temporal::time_groups;

const HOLDOUT_SALT: u64 = 0x6C1A_55E0_D3B2_7F41;

/// How validation slices are laid out and how training is separated from them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoldStrategy {
    /// Each fold validates on one block of locations over one range of time
    /// groups; training drops every observation sharing a location or a time
    /// group with the validation slice, so both keys are disjoint on their own.
    /// Needs at least four folds.
    #[default]
    Blocked,
    /// Whole (location, time-group) buckets are balanced across folds and
    /// training is the rest of the pool. Only the composite key is disjoint.
    Joint,
}

/// Hold-out / train-pool membership as sorted dataset indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub holdout: Vec<usize>,
    pub pool: Vec<usize>,
}

/// Draw `round(fraction · n)` samples uniformly from each region.
///
/// Regions too small to contribute a single hold-out sample stay entirely in
/// the pool and are reported as `SparseRegion`.
pub fn split_holdout(dataset: &Dataset, fraction: f64, seed: u64) -> Result<(Split, RunReport)> {
    if !(fraction > 0.0 && fraction < 1.0) {
        return Err(ClarityError::InvalidConfig(format!("hold-out fraction {fraction} outside (0, 1)")));
    }
    if dataset.is_empty() {
        return Err(ClarityError::DataInsufficiency("no samples to split".into()));
    }

    let mut by_region: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, s) in dataset.samples.iter().enumerate() {
        by_region.entry(s.observation.region.as_str()).or_default().push(i);
    }

    let mut rng = StdRng::seed_from_u64(seed ^ HOLDOUT_SALT);
    let mut report = RunReport::new();
    let mut is_holdout = vec![false; dataset.len()];

    for (region, members) in &by_region {
        let n = members.len();
        // A region always keeps at least one sample in the pool.
        let take = ((fraction * n as f64).round() as usize).min(n - 1);
        if take == 0 {
            report.exclude(
                ExclusionKind::SparseRegion,
                format!("region {region}: {n} samples too few for a {fraction} hold-out"),
            );
            continue;
        }
        for j in rand::seq::index::sample(&mut rng, n, take).into_iter() {
            is_holdout[members[j]] = true;
        }
        tracing::debug!(region, n, take, "hold-out draw");
    }

    let (holdout, pool): (Vec<usize>, Vec<usize>) = (0..dataset.len()).partition(|&i| is_holdout[i]);
    tracing::info!(holdout = holdout.len(), pool = pool.len(), "split hold-out");
    Ok((Split { holdout, pool }, report))
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::features::{Dataset, Feature, FeatureSchema, Sample};
    use crate::observation::{Observation, Reflectance, Sensor};
    use chrono::NaiveDate;

    /// `n` samples over `lakes` lakes and four regions, one day apart.
    pub fn dataset(n: usize, lakes: usize) -> Dataset {
        let regions = ["Northeast", "Midwest", "South", "West"];
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let samples = (0..n)
            .map(|i| Sample {
                observation: Observation {
                    id: format!("obs-{i}"),
                    location: format!("lake-{}", i % lakes),
                    sensor: Sensor::Landsat8,
                    date: start + chrono::Days::new(i as u64),
                    bands: Reflectance::default(),
                    area_km2: 1.0,
                    mean_depth_m: 3.0,
                    region: regions[(i / 3) % regions.len()].into(),
                    secchi_m: 1.0 + (i % 7) as f64,
                },
                features: vec![i as f64],
            })
            .collect();
        Dataset { schema: FeatureSchema::new(vec![Feature::Red]), samples }
    }
}
