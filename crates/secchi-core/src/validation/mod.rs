//! Hold-out scoring of a trained model, plus read-only stratified
//! re-aggregation of the same predictions.

pub mod metrics;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ClarityError, Result};
use crate::features::Dataset;
use crate::observation::Sensor;
use crate::training::TrainedModel;

pub use metrics::Metrics;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub location: String,
    pub sensor: Sensor,
    pub region: String,
    pub date: NaiveDate,
    pub area_km2: f64,
    pub actual: f64,
    pub predicted: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub predictions: Vec<Prediction>,
    pub metrics: Metrics,
}

impl Evaluation {
    pub fn breakdown(&self, stratum: Stratum) -> Result<BTreeMap<String, Metrics>> {
        stratify(&self.predictions, stratum)
    }
}

/// Score `model` on the hold-out rows of `dataset`.
///
/// The model's own schema and scaling statistics are used as stored; nothing
/// is refitted on hold-out data.
pub fn evaluate(model: &TrainedModel, dataset: &Dataset, holdout: &[usize]) -> Result<Evaluation> {
    model.ensure_schema(&dataset.schema)?;
    if holdout.is_empty() {
        return Err(ClarityError::DataInsufficiency("hold-out set is empty".into()));
    }

    let mut predictions = Vec::with_capacity(holdout.len());
    for &i in holdout {
        let sample = &dataset.samples[i];
        let obs = &sample.observation;
        predictions.push(Prediction {
            id: obs.id.clone(),
            location: obs.location.clone(),
            sensor: obs.sensor,
            region: obs.region.clone(),
            date: obs.date,
            area_km2: obs.area_km2,
            actual: obs.secchi_m,
            predicted: model.predict(&sample.features)?,
        });
    }
    let metrics = score(&predictions)?;
    tracing::info!(n = metrics.n, rmse = metrics.rmse, bias = metrics.bias, "hold-out evaluated");
    Ok(Evaluation { predictions, metrics })
}

fn score(predictions: &[Prediction]) -> Result<Metrics> {
    let (p, a): (Vec<f64>, Vec<f64>) = predictions.iter().map(|x| (x.predicted, x.actual)).unzip();
    Metrics::compute(&p, &a)
}

// ── Stratification ────────────────────────────────────────────────────────────

/// Categorical covariate for diagnostic breakdowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stratum {
    LakeSize,
    Sensor,
    Year,
    Region,
}

impl Stratum {
    pub const ALL: [Stratum; 4] = [Stratum::LakeSize, Stratum::Sensor, Stratum::Year, Stratum::Region];

    pub fn key(self, p: &Prediction) -> String {
        use chrono::Datelike;
        match self {
            Stratum::LakeSize => lake_size_class(p.area_km2).to_string(),
            Stratum::Sensor => p.sensor.to_string(),
            Stratum::Year => p.date.year().to_string(),
            Stratum::Region => p.region.clone(),
        }
    }
}

impl fmt::Display for Stratum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stratum::LakeSize => "lake_size",
            Stratum::Sensor => "sensor",
            Stratum::Year => "year",
            Stratum::Region => "region",
        })
    }
}

pub fn lake_size_class(area_km2: f64) -> &'static str {
    match area_km2 {
        a if a < 1.0 => "<1 km2",
        a if a < 10.0 => "1-10 km2",
        a if a <= 100.0 => "10-100 km2",
        _ => ">100 km2",
    }
}

/// Recompute [`Metrics`] per stratum value over an existing prediction set.
pub fn stratify(predictions: &[Prediction], stratum: Stratum) -> Result<BTreeMap<String, Metrics>> {
    let mut groups: BTreeMap<String, Vec<Prediction>> = BTreeMap::new();
    for p in predictions {
        groups.entry(stratum.key(p)).or_default().push(p.clone());
    }
    groups.into_iter().map(|(k, ps)| Ok((k, score(&ps)?))).collect()
}
