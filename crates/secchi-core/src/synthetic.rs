//! Deterministic synthetic matchup data.
//!
//! Lakes carry a skewed mean clarity; every scene event draws one clarity
//! value, derives a reference-scale reflectance spectrum from it and records
//! it through one to three sensors. Each sensor distorts the reference
//! spectrum with a known linear response, so harmonization has exact answers
//! to recover.

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{ClarityError, Result};
use crate::observation::{Band, Observation, Reflectance, Sensor};

const SYNTH_SALT: u64 = 0x51C3_B0D7_E4A2_9F68;

pub const REGIONS: [&str; 4] = ["Northeast", "Midwest", "South", "West"];
const LAKE_MEAN_SECCHI_M: [f64; 5] = [0.5, 1.0, 2.0, 4.0, 8.0];
const LAKE_AREA_KM2: [f64; 5] = [0.5, 3.0, 12.0, 45.0, 150.0];
const LAKE_DEPTH_M: [f64; 5] = [2.0, 4.0, 6.0, 9.0, 15.0];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticSpec {
    pub n_observations: usize,
    pub n_lakes: usize,
    pub start: NaiveDate,
    pub span_days: u32,
    /// Relative amplitude of the per-event reflectance noise.
    pub noise: f64,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        Self {
            n_observations: 1000,
            n_lakes: 5,
            start: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or(NaiveDate::MIN),
            span_days: 730,
            noise: 0.02,
        }
    }
}

/// Known raw response of `sensor` to a reference-scale reflectance.
pub fn sensor_response(sensor: Sensor, reference: f64) -> f64 {
    match sensor {
        Sensor::Landsat8 => reference,
        Sensor::Landsat7 => 0.95 * reference + 0.003,
        Sensor::Landsat5 => 1.1 * reference - 0.002,
    }
}

/// Reference-scale spectrum of water with Secchi depth `s`.
pub fn reference_spectrum(s: f64) -> [f64; 6] {
    let turbid = 1.0 / (1.0 + s);
    [
        0.01 + 0.04 * s / (s + 2.0),
        0.02 + 0.03 * turbid,
        0.005 + 0.04 * turbid,
        0.002 + 0.02 * turbid * turbid,
        0.001 + 0.01 * turbid,
        0.0005 + 0.005 * turbid,
    ]
}

struct Lake {
    name: String,
    region: &'static str,
    mean_secchi_m: f64,
    area_km2: f64,
    mean_depth_m: f64,
}

pub fn generate(spec: &SyntheticSpec, seed: u64) -> Result<Vec<Observation>> {
    if spec.n_lakes == 0 || spec.span_days == 0 {
        return Err(ClarityError::InvalidConfig("synthetic data needs lakes and a date span".into()));
    }
    if spec.n_observations > spec.n_lakes * spec.span_days as usize * Sensor::ALL.len() {
        return Err(ClarityError::InvalidConfig(format!(
            "{} observations do not fit {} lakes over {} days",
            spec.n_observations, spec.n_lakes, spec.span_days
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed ^ SYNTH_SALT);
    let lakes: Vec<Lake> = (0..spec.n_lakes)
        .map(|i| Lake {
            name: format!("lake-{i:03}"),
            region: REGIONS[i % REGIONS.len()],
            mean_secchi_m: LAKE_MEAN_SECCHI_M[i % 5] * rng.gen_range(0.6..1.4),
            area_km2: LAKE_AREA_KM2[i % 5],
            mean_depth_m: LAKE_DEPTH_M[i % 5],
        })
        .collect();

    let mut out = Vec::with_capacity(spec.n_observations);
    let mut used: HashSet<(usize, u32)> = HashSet::new();
    let n_events = spec.n_lakes * spec.span_days as usize;

    while out.len() < spec.n_observations {
        if used.len() == n_events {
            return Err(ClarityError::DataInsufficiency(format!(
                "every (lake, day) event is used after {} of {} observations",
                out.len(),
                spec.n_observations
            )));
        }
        let lake_idx = rng.gen_range(0..lakes.len());
        let day = rng.gen_range(0..spec.span_days);
        if !used.insert((lake_idx, day)) {
            continue;
        }
        let lake = &lakes[lake_idx];
        let date = spec.start + chrono::Days::new(day as u64);
        let secchi_m = lake.mean_secchi_m * rng.gen_range(0.8..1.2);
        let mut spectrum = reference_spectrum(secchi_m);
        for v in &mut spectrum {
            *v *= 1.0 + spec.noise * rng.gen_range(-1.0..1.0);
        }

        let mut sensors = Sensor::ALL.to_vec();
        sensors.shuffle(&mut rng);
        let n_sensors = rng.gen_range(1..=sensors.len());

        for &sensor in sensors.iter().take(n_sensors) {
            if out.len() == spec.n_observations {
                break;
            }
            let mut bands = Reflectance::default();
            for (band, reference) in Band::ALL.iter().zip(spectrum) {
                bands.set(*band, Some(sensor_response(sensor, reference)));
            }
            out.push(Observation {
                id: format!("obs-{:05}", out.len()),
                location: lake.name.clone(),
                sensor,
                date,
                bands,
                area_km2: lake.area_km2,
                mean_depth_m: lake.mean_depth_m,
                region: lake.region.to_string(),
                secchi_m,
            });
        }
    }

    tracing::debug!(n = out.len(), lakes = lakes.len(), events = used.len(), "generated synthetic observations");
    Ok(out)
}
