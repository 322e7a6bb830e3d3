//! Pipeline orchestrator: runs every stage in order on one observation set.
//!
//! harmonize → features → hold-out split → folds → grid search → final refit
//! → hold-out evaluation. Non-fatal exclusions from every stage are merged
//! into one [`RunReport`].

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::PipelineConfig;
use crate::error::{ClarityError, Result};
use crate::features::{FeatureBuilder, FeatureSchema};
use crate::harmonize::HarmonizationModel;
use crate::observation::{Observation, Sensor};
use crate::partition::{make_folds, split_holdout, FoldAssignment, Split};
use crate::report::RunReport;
use crate::training::{fit_final, search, ConfigScore, HyperParams, SearchOutcome, TrainedModel};
use crate::validation::{evaluate, Evaluation, Metrics, Stratum};

// ── Outputs ───────────────────────────────────────────────────────────────────

/// Every artefact of one training run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub harmonization: HarmonizationModel,
    pub model: TrainedModel,
    pub split: Split,
    pub folds: FoldAssignment,
    pub search: SearchOutcome,
    pub evaluation: Evaluation,
    /// Stratum name → stratum value → metrics.
    pub breakdowns: BTreeMap<String, BTreeMap<String, Metrics>>,
    pub report: RunReport,
    pub elapsed_ms: u64,
}

/// Flat metrics record for external reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub holdout: Metrics,
    pub breakdowns: BTreeMap<String, BTreeMap<String, Metrics>>,
    pub best_params: HyperParams,
    pub cv_rmse: f64,
    pub grid: Vec<ConfigScore>,
    pub n_holdout: usize,
    pub n_pool: usize,
}

impl PipelineOutput {
    pub fn metrics_summary(&self) -> MetricsSummary {
        MetricsSummary {
            holdout: self.evaluation.metrics,
            breakdowns: self.breakdowns.clone(),
            best_params: self.search.best,
            cv_rmse: self.search.best_score,
            grid: self.search.scores.clone(),
            n_holdout: self.split.holdout.len(),
            n_pool: self.split.pool.len(),
        }
    }
}

/// Prediction for an observation without a measured target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPrediction {
    pub id: String,
    pub location: String,
    pub sensor: Sensor,
    pub date: NaiveDate,
    pub predicted_secchi_m: f64,
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self, observations: &[Observation]) -> Result<PipelineOutput> {
        let t0 = std::time::Instant::now();
        let cfg = &self.config;
        tracing::info!(observations = observations.len(), seed = cfg.seed, "pipeline started");

        // 1. Harmonization
        let (harmonization, mut report) = HarmonizationModel::fit(observations, &cfg.harmonization())?;
        let harmonized = harmonization.apply(observations);
        report.merge(harmonized.report);
        tracing::info!(kept = harmonized.observations.len(), "harmonized observations");

        // 2. Features
        let builder = FeatureBuilder::new(FeatureSchema::new(cfg.features.clone()), cfg.max_target_m);
        let (dataset, feature_report) = builder.build_dataset(&harmonized.observations);
        report.merge(feature_report);

        // 3. Hold-out and folds
        let (split, split_report) = split_holdout(&dataset, cfg.holdout_fraction, cfg.seed)?;
        report.merge(split_report);
        let folds = make_folds(&dataset, &split.pool, cfg.n_folds, cfg.n_time_groups, cfg.fold_strategy, cfg.seed)?;

        // 4. Search and refit
        let outcome = search(&dataset, &folds, &cfg.grid, &cfg.booster, cfg.seed, cfg.threads)?;
        report.merge(outcome.report.clone());
        let model = fit_final(&dataset, &split.pool, &outcome.best, &cfg.booster, cfg.seed)?;

        // 5. Hold-out evaluation
        let evaluation = evaluate(&model, &dataset, &split.holdout)?;
        let mut breakdowns = BTreeMap::new();
        for stratum in Stratum::ALL {
            breakdowns.insert(stratum.to_string(), evaluation.breakdown(stratum)?);
        }

        let elapsed_ms = t0.elapsed().as_millis() as u64;
        tracing::info!(
            rmse = evaluation.metrics.rmse,
            excluded = report.total(),
            elapsed_ms,
            "pipeline finished"
        );

        Ok(PipelineOutput {
            harmonization,
            model,
            split,
            folds,
            search: outcome,
            evaluation,
            breakdowns,
            report,
            elapsed_ms,
        })
    }
}

/// Harmonize fresh observations with a stored correction model and predict
/// with a stored regressor. Observations that cannot be harmonized or
/// featurised are skipped and counted.
pub fn predict_new(
    harmonization: &HarmonizationModel,
    model: &TrainedModel,
    observations: &[Observation],
) -> Result<(Vec<NewPrediction>, RunReport)> {
    for feature in model.schema.features() {
        if let Some(band) = feature.required_bands().find(|b| !harmonization.bands.contains(*b)) {
            return Err(ClarityError::SchemaMismatch {
                expected: format!("harmonized {band} for {}", feature.name()),
                found: format!("corrections for {:?}", harmonization.bands),
            });
        }
    }

    let harmonized = harmonization.apply(observations);
    let mut report = harmonized.report;
    let builder = FeatureBuilder::new(model.schema.clone(), f64::INFINITY);
    let (rows, feature_report) = builder.build_unlabelled(&harmonized.observations);
    report.merge(feature_report);

    let mut out = Vec::with_capacity(rows.len());
    for (obs, features) in rows {
        out.push(NewPrediction {
            id: obs.id.clone(),
            location: obs.location.clone(),
            sensor: obs.sensor,
            date: obs.date,
            predicted_secchi_m: model.predict(&features)?,
        });
    }
    tracing::info!(predicted = out.len(), skipped = report.total(), "predicted new observations");
    Ok((out, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::Band;
    use crate::report::ExclusionKind;
    use crate::synthetic::{generate, SyntheticSpec};
    use crate::training::HyperGrid;
    use approx::assert_abs_diff_eq;
    use std::collections::BTreeSet;

    fn quick_config() -> PipelineConfig {
        PipelineConfig {
            grid: HyperGrid { learning_rate: vec![0.1, 0.3], n_rounds: vec![40], lambda: vec![1.0], alpha: vec![0.0] },
            threads: 2,
            ..Default::default()
        }
    }

    fn std_dev(v: &[f64]) -> f64 {
        let m = v.iter().sum::<f64>() / v.len() as f64;
        (v.iter().map(|x| (x - m).powi(2)).sum::<f64>() / v.len() as f64).sqrt()
    }

    #[test]
    fn end_to_end_on_synthetic_lakes() {
        let obs = generate(&SyntheticSpec::default(), 42).unwrap();
        assert_eq!(obs.len(), 1000);
        let out = Pipeline::new(quick_config()).unwrap().run(&obs).unwrap();

        // Harmonization recovers the known sensor responses exactly.
        let l7 = out.harmonization.correction(Band::Red, Sensor::Landsat7).unwrap();
        assert_abs_diff_eq!(l7.slope, 1.0 / 0.95, epsilon = 1e-9);
        assert_abs_diff_eq!(l7.intercept, -0.003 / 0.95, epsilon = 1e-9);
        let l5 = out.harmonization.correction(Band::Green, Sensor::Landsat5).unwrap();
        assert_abs_diff_eq!(l5.slope, 1.0 / 1.1, epsilon = 1e-9);
        assert!(out.report.is_clean(), "{:?}", out.report.exclusions);

        // Hold-out near 20 % with per-region rounding.
        let n_holdout = out.split.holdout.len();
        assert!((195..=205).contains(&n_holdout), "hold-out {n_holdout}");
        assert_eq!(n_holdout + out.split.pool.len(), 1000);

        // Five folds; training and validation share neither a lake nor a time group.
        let cfg = quick_config();
        let harmonized = out.harmonization.apply(&obs);
        let (dataset, _) = FeatureBuilder::new(FeatureSchema::new(cfg.features.clone()), cfg.max_target_m)
            .build_dataset(&harmonized.observations);
        let lakes = |idx: &[usize]| idx.iter().map(|&i| dataset.observation(i).location.clone()).collect::<BTreeSet<_>>();
        let periods = |idx: &[usize]| idx.iter().map(|&i| out.folds.time_group[i].unwrap()).collect::<BTreeSet<_>>();
        assert_eq!(out.folds.k(), 5);
        let pool = out.split.pool.len() as f64;
        let mut covered = 0;
        for f in &out.folds.folds {
            let share = f.validation.len() as f64 / pool;
            assert!((0.05..=0.4).contains(&share), "fold share {share}");
            assert!(!f.train.is_empty());
            assert!(lakes(&f.train).is_disjoint(&lakes(&f.validation)));
            assert!(periods(&f.train).is_disjoint(&periods(&f.validation)));
            assert!(f.validation.iter().all(|i| out.split.holdout.binary_search(i).is_err()));
            covered += f.validation.len();
        }
        assert_eq!(covered, out.split.pool.len());

        // Final model beats the trivial predictor on the hold-out.
        let actual: Vec<f64> = out.evaluation.predictions.iter().map(|p| p.actual).collect();
        let rmse = out.evaluation.metrics.rmse;
        assert!(rmse < std_dev(&actual), "rmse {rmse} vs sd {}", std_dev(&actual));
        assert_eq!(out.evaluation.metrics.n, n_holdout);

        for stratum in Stratum::ALL {
            let b = &out.breakdowns[&stratum.to_string()];
            assert_eq!(b.values().map(|m| m.n).sum::<usize>(), n_holdout);
        }
    }

    #[test]
    fn same_seed_reproduces_the_run() {
        let obs = generate(&SyntheticSpec { n_observations: 400, ..Default::default() }, 3).unwrap();
        let cfg = PipelineConfig { n_time_groups: 3, ..quick_config() };
        let a = Pipeline::new(cfg.clone()).unwrap().run(&obs).unwrap();
        let b = Pipeline::new(cfg).unwrap().run(&obs).unwrap();
        assert_eq!(a.split, b.split);
        assert_eq!(a.folds, b.folds);
        assert_eq!(a.search.best, b.search.best);
        assert_eq!(a.evaluation.metrics, b.evaluation.metrics);
    }

    #[test]
    fn stored_artefacts_predict_fresh_data() {
        let obs = generate(&SyntheticSpec { n_observations: 400, ..Default::default() }, 8).unwrap();
        let out = Pipeline::new(PipelineConfig { n_time_groups: 3, ..quick_config() }).unwrap().run(&obs).unwrap();

        let mut fresh = generate(&SyntheticSpec { n_observations: 30, ..Default::default() }, 99).unwrap();
        fresh[0].bands.blue = None;
        let (preds, report) = predict_new(&out.harmonization, &out.model, &fresh).unwrap();
        assert_eq!(preds.len(), 29);
        assert_eq!(report.count(ExclusionKind::MissingBand), 1);
        assert!(preds.iter().all(|p| p.predicted_secchi_m.is_finite()));
    }

    #[test]
    fn prediction_refuses_unharmonized_feature_bands() {
        let obs = generate(&SyntheticSpec { n_observations: 400, ..Default::default() }, 8).unwrap();
        let out = Pipeline::new(PipelineConfig { n_time_groups: 3, ..quick_config() }).unwrap().run(&obs).unwrap();
        let mut partial = out.harmonization.clone();
        partial.bands.retain(|b| *b != Band::Nir);
        let err = predict_new(&partial, &out.model, &obs).unwrap_err();
        assert!(matches!(err, ClarityError::SchemaMismatch { .. }));
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let cfg = PipelineConfig { n_folds: 1, ..Default::default() };
        assert!(matches!(Pipeline::new(cfg), Err(ClarityError::InvalidConfig(_))));
    }
}
