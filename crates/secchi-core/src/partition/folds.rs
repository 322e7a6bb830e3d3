//! Group k-fold over locations and time groups.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use super::temporal::time_groups;
use super::FoldStrategy;
use crate::error::{ClarityError, Result};
use crate::features::Dataset;

const FOLD_SALT: u64 = 0x2F8D_41B9_C07E_5A63;

/// One train/validation split, as dataset indices (sorted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fold {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

/// The k folds of one training run plus the time group of every pool member.
/// Computed once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldAssignment {
    pub folds: Vec<Fold>,
    pub strategy: FoldStrategy,
    /// Time group per dataset index; `None` outside the pool.
    pub time_group: Vec<Option<usize>>,
}

impl FoldAssignment {
    pub fn k(&self) -> usize {
        self.folds.len()
    }
}

/// Number of folds carried by each of the two location rows of a blocked layout.
pub fn blocked_rows(k: usize) -> [usize; 2] {
    [k - k / 2, k / 2]
}

/// Split the pool into `k` validation slices and pair each with a training
/// slice according to `strategy`.
///
/// Validation slices are disjoint and together cover the pool exactly once.
/// Every slice is made of whole (location, time-group) buckets, so no bucket
/// ever straddles a fold boundary.
pub fn make_folds(
    dataset: &Dataset,
    pool: &[usize],
    k: usize,
    n_time_groups: usize,
    strategy: FoldStrategy,
    seed: u64,
) -> Result<FoldAssignment> {
    if k < 2 {
        return Err(ClarityError::InvalidConfig(format!("need at least 2 folds, got {k}")));
    }

    let groups = time_groups(dataset, pool, n_time_groups);
    let mut time_group = vec![None; dataset.len()];
    for (&i, &g) in pool.iter().zip(&groups) {
        time_group[i] = Some(g);
    }

    let mut rng = StdRng::seed_from_u64(seed ^ FOLD_SALT);
    let validation = match strategy {
        FoldStrategy::Blocked => blocked_validation(dataset, pool, &groups, k, &mut rng)?,
        FoldStrategy::Joint => joint_validation(dataset, pool, &groups, k, &mut rng)?,
    };

    let mut folds = Vec::with_capacity(k);
    for (f, mut val) in validation.into_iter().enumerate() {
        val.sort_unstable();
        if val.is_empty() {
            return Err(ClarityError::DataInsufficiency(format!(
                "fold {f} has no validation data under {strategy:?} folds"
            )));
        }
        let train = match strategy {
            FoldStrategy::Blocked => separated_train(dataset, pool, &val, &time_group),
            FoldStrategy::Joint => complement(pool, &val),
        };
        if train.is_empty() {
            return Err(ClarityError::DataInsufficiency(format!(
                "fold {f} has no training data left under {strategy:?} folds"
            )));
        }
        tracing::debug!(fold = f, train = train.len(), validation = val.len(), "fold built");
        folds.push(Fold { train, validation: val });
    }

    Ok(FoldAssignment { folds, strategy, time_group })
}

// ── Blocked layout ────────────────────────────────────────────────────────────

/// Lay the pool out as two location rows by ordered time groups and give
/// every fold one rectangle of that grid.
///
/// Locations go, largest first (seeded shuffle breaks size ties), to the row
/// with the lowest load per fold it carries. Each row's time groups are cut
/// into contiguous ranges, one per fold of the row. A fold's validation slice
/// is its row's locations over its range; training is then the other row
/// over the other ranges.
fn blocked_validation(
    dataset: &Dataset,
    pool: &[usize],
    groups: &[usize],
    k: usize,
    rng: &mut StdRng,
) -> Result<Vec<Vec<usize>>> {
    if k < 4 {
        return Err(ClarityError::InvalidConfig(format!("blocked folds need at least 4 folds, got {k}")));
    }
    let rows = blocked_rows(k);

    let mut sizes: BTreeMap<&str, usize> = BTreeMap::new();
    for &i in pool {
        *sizes.entry(dataset.observation(i).location.as_str()).or_default() += 1;
    }
    if sizes.len() < 2 {
        return Err(ClarityError::DataInsufficiency(format!(
            "{} location(s) cannot be split into two blocks",
            sizes.len()
        )));
    }
    let mut locations: Vec<(&str, usize)> = sizes.into_iter().collect();
    locations.shuffle(rng);
    locations.sort_by_key(|&(_, n)| Reverse(n));

    let mut load = [0usize; 2];
    let mut row_of: BTreeMap<&str, usize> = BTreeMap::new();
    for (location, n) in locations {
        // load[0] / rows[0] <= load[1] / rows[1]
        let row = if load[0] * rows[1] <= load[1] * rows[0] { 0 } else { 1 };
        load[row] += n;
        row_of.insert(location, row);
    }

    let present: Vec<usize> = groups.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
    if present.len() < rows[0] {
        return Err(ClarityError::DataInsufficiency(format!(
            "{} time group(s) cannot be cut into {} ranges",
            present.len(),
            rows[0]
        )));
    }

    let mut validation = vec![Vec::new(); k];
    for (&i, &g) in pool.iter().zip(groups) {
        let row = row_of[dataset.observation(i).location.as_str()];
        let column = present.partition_point(|&p| p < g) * rows[row] / present.len();
        let fold = if row == 0 { column } else { rows[0] + column };
        validation[fold].push(i);
    }
    tracing::debug!(row_loads = ?load, time_groups = present.len(), "blocked fold layout");
    Ok(validation)
}

/// Pool members sharing neither a location nor a time group with `validation`.
fn separated_train(dataset: &Dataset, pool: &[usize], validation: &[usize], time_group: &[Option<usize>]) -> Vec<usize> {
    let locations: BTreeSet<&str> = validation.iter().map(|&i| dataset.observation(i).location.as_str()).collect();
    let periods: BTreeSet<usize> = validation.iter().filter_map(|&i| time_group[i]).collect();
    let mut train: Vec<usize> = pool
        .iter()
        .copied()
        .filter(|&i| {
            validation.binary_search(&i).is_err()
                && !locations.contains(dataset.observation(i).location.as_str())
                && time_group[i].map_or(true, |g| !periods.contains(&g))
        })
        .collect();
    train.sort_unstable();
    train
}

// ── Joint layout ──────────────────────────────────────────────────────────────

/// Buckets are shuffled with the seed, stably ordered by descending size, and
/// each is handed to the fold that currently holds the fewest observations
/// (lowest index on ties).
fn joint_validation(
    dataset: &Dataset,
    pool: &[usize],
    groups: &[usize],
    k: usize,
    rng: &mut StdRng,
) -> Result<Vec<Vec<usize>>> {
    let mut buckets: BTreeMap<(&str, usize), Vec<usize>> = BTreeMap::new();
    for (&i, &g) in pool.iter().zip(groups) {
        buckets.entry((dataset.observation(i).location.as_str(), g)).or_default().push(i);
    }
    if buckets.len() < k {
        return Err(ClarityError::DataInsufficiency(format!(
            "{} (location, time-group) buckets cannot fill {k} folds",
            buckets.len()
        )));
    }

    let mut buckets: Vec<Vec<usize>> = buckets.into_values().collect();
    buckets.shuffle(rng);
    buckets.sort_by_key(|b| Reverse(b.len()));

    let mut validation: Vec<Vec<usize>> = vec![Vec::new(); k];
    for bucket in buckets {
        let target = (0..k).min_by_key(|&f| (validation[f].len(), f)).unwrap_or(0);
        validation[target].extend(bucket);
    }
    Ok(validation)
}

fn complement(pool: &[usize], validation: &[usize]) -> Vec<usize> {
    let mut train: Vec<usize> = pool.iter().copied().filter(|i| validation.binary_search(i).is_err()).collect();
    train.sort_unstable();
    train
}
