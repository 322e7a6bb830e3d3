//! Grid search over the boosted regressor with a fixed fold assignment,
//! followed by one refit of the winning configuration on the whole pool.
//!
//! Every (configuration × fold) job fits its own [`Standardizer`] on the
//! fold's training slice, so validation statistics never leak into
//! preprocessing. Jobs are independent; with the `threading` feature they run
//! on a scoped rayon pool that lives only for the duration of one search.

pub mod booster;
pub mod grid;
pub mod scaler;

use serde::{Deserialize, Serialize};

use crate::error::{ClarityError, Result};
use crate::features::{Dataset, FeatureSchema};
use crate::partition::{Fold, FoldAssignment};
use crate::report::{ExclusionKind, RunReport};

pub use booster::{BoosterSettings, GradientBooster};
pub use grid::{HyperGrid, HyperParams};
pub use scaler::Standardizer;

// ── Search ────────────────────────────────────────────────────────────────────

/// Cross-validated score of one grid point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigScore {
    pub params: HyperParams,
    /// Validation RMSE per fold, in fold order. Empty if the configuration
    /// was excluded.
    pub fold_rmse: Vec<f64>,
    /// Mean of `fold_rmse`; `None` for excluded configurations.
    pub mean_rmse: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub best: HyperParams,
    /// Position of `best` in the expanded grid.
    pub best_index: usize,
    pub best_score: f64,
    pub scores: Vec<ConfigScore>,
    pub excluded: usize,
    pub report: RunReport,
}

/// Per-job seed; stable for a given (seed, configuration, fold).
#[inline]
fn job_seed(seed: u64, config: usize, fold: usize) -> u64 {
    seed ^ ((config as u64) << 32) ^ fold as u64
}

fn rmse(pred: &[f64], actual: &[f64]) -> f64 {
    let n = actual.len().max(1) as f64;
    (pred.iter().zip(actual).map(|(p, a)| (p - a).powi(2)).sum::<f64>() / n).sqrt()
}

/// Train on one fold's training slice and score on its validation slice.
fn score_fold(
    dataset: &Dataset,
    fold: &Fold,
    params: &HyperParams,
    settings: &BoosterSettings,
    seed: u64,
) -> Result<f64> {
    let x_train = dataset.matrix(&fold.train);
    let scaler = Standardizer::fit(&x_train)?;
    let booster = GradientBooster::fit(
        &scaler.transform(&x_train),
        &dataset.targets(&fold.train),
        params,
        settings,
        seed,
    )?;
    let pred = booster.predict(&scaler.transform(&dataset.matrix(&fold.validation)));
    let score = rmse(&pred, &dataset.targets(&fold.validation));
    if !score.is_finite() {
        return Err(ClarityError::TrainingDivergence { params: params.to_string(), fold: 0 });
    }
    Ok(score)
}

#[cfg(feature = "threading")]
fn run_jobs<F>(n_jobs: usize, threads: usize, job: F) -> Result<Vec<Result<f64>>>
where
    F: Fn(usize) -> Result<f64> + Sync + Send,
{
    use rayon::prelude::*;
    // 0 lets rayon pick the number of available cores. The pool is dropped
    // when this function returns, on every path.
    let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
    Ok(pool.install(|| (0..n_jobs).into_par_iter().map(&job).collect()))
}

#[cfg(not(feature = "threading"))]
fn run_jobs<F>(n_jobs: usize, _threads: usize, job: F) -> Result<Vec<Result<f64>>>
where
    F: Fn(usize) -> Result<f64>,
{
    Ok((0..n_jobs).map(job).collect())
}

/// Score every grid configuration on every fold and pick the lowest mean
/// validation RMSE. The first declared configuration wins exact ties.
///
/// A configuration that diverges on any fold is excluded and counted; the
/// search fails only when no configuration survives.
pub fn search(
    dataset: &Dataset,
    folds: &FoldAssignment,
    grid: &HyperGrid,
    settings: &BoosterSettings,
    seed: u64,
    threads: usize,
) -> Result<SearchOutcome> {
    grid.validate()?;
    settings.validate()?;
    let configs = grid.expand();
    let k = folds.k();
    if k == 0 {
        return Err(ClarityError::DataInsufficiency("fold assignment is empty".into()));
    }
    tracing::info!(configurations = configs.len(), folds = k, "starting grid search");

    // Job j trains configuration j / k on fold j % k.
    let results = run_jobs(configs.len() * k, threads, |j| {
        let (ci, fi) = (j / k, j % k);
        score_fold(dataset, &folds.folds[fi], &configs[ci], settings, job_seed(seed, ci, fi)).map_err(|e| match e {
            ClarityError::TrainingDivergence { params, .. } => ClarityError::TrainingDivergence { params, fold: fi },
            other => other,
        })
    })?;

    let mut report = RunReport::new();
    let mut scores = Vec::with_capacity(configs.len());
    let mut best: Option<(usize, f64)> = None;
    let mut results = results.into_iter();

    for (ci, params) in configs.iter().enumerate() {
        let mut fold_rmse = Vec::with_capacity(k);
        let mut diverged = None;
        for r in results.by_ref().take(k) {
            match r {
                Ok(s) => fold_rmse.push(s),
                Err(e @ ClarityError::TrainingDivergence { .. }) => {
                    diverged.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(e) = diverged {
            report.exclude(ExclusionKind::DivergentConfiguration, e.to_string());
            scores.push(ConfigScore { params: *params, fold_rmse: Vec::new(), mean_rmse: None });
            continue;
        }

        let mean = fold_rmse.iter().sum::<f64>() / k as f64;
        tracing::debug!(config = ci, %params, mean_rmse = mean, "configuration scored");
        if best.map_or(true, |(_, b)| mean < b) {
            best = Some((ci, mean));
        }
        scores.push(ConfigScore { params: *params, fold_rmse, mean_rmse: Some(mean) });
    }

    let excluded = report.count(ExclusionKind::DivergentConfiguration);
    let Some((best_index, best_score)) = best else {
        return Err(ClarityError::AllConfigurationsFailed { tried: configs.len() });
    };
    tracing::info!(best = %configs[best_index], rmse = best_score, excluded, "grid search finished");

    Ok(SearchOutcome { best: configs[best_index], best_index, best_score, scores, excluded, report })
}

// ── Final model ───────────────────────────────────────────────────────────────

/// Final regressor bound to one feature schema and its own scaling statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub schema: FeatureSchema,
    pub scaler: Standardizer,
    pub params: HyperParams,
    pub settings: BoosterSettings,
    pub booster: GradientBooster,
}

impl TrainedModel {
    /// Refuse feature vectors built against a different column order.
    pub fn ensure_schema(&self, schema: &FeatureSchema) -> Result<()> {
        if schema != &self.schema {
            return Err(ClarityError::SchemaMismatch {
                expected: self.schema.to_string(),
                found: schema.to_string(),
            });
        }
        Ok(())
    }

    pub fn predict(&self, features: &[f64]) -> Result<f64> {
        if features.len() != self.schema.len() {
            return Err(ClarityError::SchemaMismatch {
                expected: format!("{} features {}", self.schema.len(), self.schema),
                found: format!("{} features", features.len()),
            });
        }
        Ok(self.booster.predict_row(&self.scaler.transform_row(features)))
    }

    pub fn predict_batch(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        rows.iter().map(|r| self.predict(r)).collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Refit `params` on every pool row with freshly fitted scaling statistics.
pub fn fit_final(
    dataset: &Dataset,
    pool: &[usize],
    params: &HyperParams,
    settings: &BoosterSettings,
    seed: u64,
) -> Result<TrainedModel> {
    let x = dataset.matrix(pool);
    let scaler = Standardizer::fit(&x)?;
    let booster = GradientBooster::fit(&scaler.transform(&x), &dataset.targets(pool), params, settings, seed)
        .map_err(|e| match e {
            ClarityError::TrainingDivergence { params, .. } => ClarityError::DataInsufficiency(format!(
                "final refit with {params} diverged on the full train pool"
            )),
            other => other,
        })?;
    tracing::info!(rows = pool.len(), %params, trees = booster.n_trees(), "final model fitted");
    Ok(TrainedModel {
        schema: dataset.schema.clone(),
        scaler,
        params: *params,
        settings: settings.clone(),
        booster,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{Feature, Sample};
    use crate::observation::{Observation, Reflectance, Sensor};
    use crate::partition::{make_folds, FoldStrategy};
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    /// Target is a smooth function of two features, spread over 8 lakes.
    fn learnable(n: usize) -> Dataset {
        let start = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        let samples = (0..n)
            .map(|i| {
                let a = (i % 17) as f64 / 17.0;
                let b = (i % 5) as f64 / 5.0;
                Sample {
                    observation: Observation {
                        id: format!("s{i}"),
                        location: format!("lake-{}", i % 8),
                        sensor: Sensor::Landsat8,
                        date: start + chrono::Days::new(i as u64),
                        bands: Reflectance::default(),
                        area_km2: 1.0,
                        mean_depth_m: 2.0,
                        region: "West".into(),
                        secchi_m: 1.0 + 3.0 * a + b,
                    },
                    features: vec![a, b],
                }
            })
            .collect();
        Dataset { schema: FeatureSchema::new(vec![Feature::Red, Feature::Green]), samples }
    }

    fn small_grid() -> HyperGrid {
        HyperGrid { learning_rate: vec![0.1, 0.3], n_rounds: vec![20], lambda: vec![1.0], alpha: vec![0.0] }
    }

    fn setup() -> (Dataset, Vec<usize>, FoldAssignment) {
        let ds = learnable(160);
        let pool: Vec<usize> = (0..160).collect();
        let folds = make_folds(&ds, &pool, 4, 4, FoldStrategy::Joint, 3).unwrap();
        (ds, pool, folds)
    }

    #[test]
    fn search_is_deterministic() {
        let (ds, _, folds) = setup();
        let a = search(&ds, &folds, &small_grid(), &BoosterSettings::default(), 1, 2).unwrap();
        let b = search(&ds, &folds, &small_grid(), &BoosterSettings::default(), 1, 1).unwrap();
        assert_eq!(a.best, b.best);
        assert_eq!(a.scores, b.scores);
        assert_eq!(a.excluded, 0);
        assert_eq!(a.scores.len(), 2);
        assert!(a.scores.iter().all(|s| s.fold_rmse.len() == 4));
    }

    #[test]
    fn ties_go_to_the_first_declared_configuration() {
        let (ds, _, folds) = setup();
        let p = HyperParams { learning_rate: 0.3, n_rounds: 10, lambda: 1.0, alpha: 0.0 };
        let grid = HyperGrid { learning_rate: vec![0.3, 0.3], ..HyperGrid::single(p) };
        let out = search(&ds, &folds, &grid, &BoosterSettings::default(), 9, 0).unwrap();
        assert_eq!(out.best_index, 0);
        assert_eq!(out.scores[0].mean_rmse, out.scores[1].mean_rmse);
    }

    #[test]
    fn divergent_configuration_is_excluded_not_fatal() {
        let (ds, _, folds) = setup();
        let grid = HyperGrid { learning_rate: vec![1e308, 0.3], n_rounds: vec![5], lambda: vec![0.0], alpha: vec![0.0] };
        let out = search(&ds, &folds, &grid, &BoosterSettings::default(), 1, 0).unwrap();
        assert_eq!(out.excluded, 1);
        assert_eq!(out.best_index, 1);
        assert!(out.scores[0].mean_rmse.is_none());
        assert_eq!(out.report.count(ExclusionKind::DivergentConfiguration), 1);
    }

    #[test]
    fn all_divergent_is_a_hard_failure() {
        let (ds, _, folds) = setup();
        let grid = HyperGrid { learning_rate: vec![1e308], n_rounds: vec![3], lambda: vec![0.0], alpha: vec![0.0] };
        let err = search(&ds, &folds, &grid, &BoosterSettings::default(), 1, 0).unwrap_err();
        assert!(matches!(err, ClarityError::AllConfigurationsFailed { tried: 1 }));
    }

    #[test]
    fn final_model_learns_and_checks_schema() {
        let (ds, pool, _) = setup();
        let p = HyperParams { learning_rate: 0.3, n_rounds: 60, lambda: 1.0, alpha: 0.0 };
        let model = fit_final(&ds, &pool, &p, &BoosterSettings::default(), 0).unwrap();

        let pred = model.predict_batch(&ds.matrix(&pool)).unwrap();
        let err = rmse(&pred, &ds.targets(&pool));
        assert!(err < 0.2, "training rmse {err}");

        assert!(matches!(model.predict(&[0.5]), Err(ClarityError::SchemaMismatch { .. })));
        let other = FeatureSchema::new(vec![Feature::Green, Feature::Red]);
        assert!(model.ensure_schema(&other).is_err());
        model.ensure_schema(&ds.schema).unwrap();
    }

    #[test]
    fn model_roundtrips_through_json() {
        let (ds, pool, _) = setup();
        let p = HyperParams { learning_rate: 0.3, n_rounds: 5, lambda: 1.0, alpha: 0.1 };
        let model = fit_final(&ds, &pool, &p, &BoosterSettings::default(), 0).unwrap();
        let back = TrainedModel::from_json(&model.to_json().unwrap()).unwrap();
        let row = ds.samples[3].features.clone();
        assert_relative_eq!(back.predict(&row).unwrap(), model.predict(&row).unwrap(), epsilon = 1e-12);
    }
}
