//! Cross-sensor radiometric harmonization.
//!
//! For every band, overpasses of the same water body that fall in the same
//! pairing window are matched across sensors. Each non-reference sensor gets
//! its own linear correction onto the reference sensor's scale, so every
//! observation can be expressed in one common reflectance scale regardless of
//! which satellite recorded it.

pub mod regression;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ClarityError, Result};
use crate::observation::{Band, Observation, Sensor};
use crate::report::{ExclusionKind, RunReport};

pub use regression::LinearFit;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonizationSettings {
    pub reference: Sensor,
    pub bands: Vec<Band>,
    pub pairing_window_days: u32,
}

/// Fitted per-(band, sensor) corrections. Immutable once fitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonizationModel {
    pub reference: Sensor,
    pub bands: Vec<Band>,
    pub pairing_window_days: u32,
    pub corrections: BTreeMap<Band, BTreeMap<Sensor, LinearFit>>,
}

/// Output of [`HarmonizationModel::apply`].
#[derive(Debug, Clone)]
pub struct Harmonized {
    pub observations: Vec<Observation>,
    pub report: RunReport,
}

/// Mean raw value per sensor inside one (location, window) pairing cell.
type PairingRow = BTreeMap<Sensor, (f64, usize)>;

impl HarmonizationModel {
    /// Fit one correction per non-reference sensor and band.
    ///
    /// Slices with too few pairs are reported and left without a model; the
    /// observations they would correct are dropped later by `apply`.
    pub fn fit(observations: &[Observation], settings: &HarmonizationSettings) -> Result<(Self, RunReport)> {
        check_window(settings.pairing_window_days)?;
        if !observations.iter().any(|o| o.sensor == settings.reference) {
            return Err(ClarityError::DataInsufficiency(format!(
                "no observations from reference sensor {}",
                settings.reference
            )));
        }

        let sensors_present: Vec<Sensor> = Sensor::ALL
            .into_iter()
            .filter(|s| *s != settings.reference && observations.iter().any(|o| o.sensor == *s))
            .collect();

        let mut report = RunReport::new();
        let mut corrections = BTreeMap::new();

        for &band in &settings.bands {
            let rows = pairing_rows(observations, band, settings.pairing_window_days);
            let mut per_sensor = BTreeMap::new();
            for &sensor in &sensors_present {
                match fit_from_rows(&rows, band, sensor, settings.reference) {
                    Ok(fit) => {
                        tracing::debug!(
                            %band, %sensor, slope = fit.slope, intercept = fit.intercept,
                            r2 = fit.r_squared, n = fit.n_pairs, "fitted correction"
                        );
                        per_sensor.insert(sensor, fit);
                    }
                    Err(e) if e.is_recoverable() => {
                        report.exclude(ExclusionKind::SparseCorrection, e.to_string());
                    }
                    Err(e) => return Err(e),
                }
            }
            corrections.insert(band, per_sensor);
        }

        let model = Self {
            reference: settings.reference,
            bands: settings.bands.clone(),
            pairing_window_days: settings.pairing_window_days,
            corrections,
        };
        Ok((model, report))
    }

    /// Fit a single (band, sensor) correction.
    pub fn fit_pair(
        observations: &[Observation],
        band: Band,
        sensor: Sensor,
        reference: Sensor,
        pairing_window_days: u32,
    ) -> Result<LinearFit> {
        check_window(pairing_window_days)?;
        let rows = pairing_rows(observations, band, pairing_window_days);
        fit_from_rows(&rows, band, sensor, reference)
    }

    pub fn correction(&self, band: Band, sensor: Sensor) -> Option<&LinearFit> {
        self.corrections.get(&band).and_then(|m| m.get(&sensor))
    }

    /// Express every harmonized band of `obs` on the reference scale.
    pub fn harmonize_one(&self, obs: &Observation) -> std::result::Result<Observation, (ExclusionKind, String)> {
        let mut out = obs.clone();
        for &band in &self.bands {
            let raw = match obs.bands.get(band) {
                Some(v) if v.is_finite() => v,
                _ => {
                    return Err((
                        ExclusionKind::MissingBand,
                        format!("{}: no {band} value", obs.id),
                    ))
                }
            };
            let value = if obs.sensor == self.reference {
                raw
            } else {
                let fit = self.correction(band, obs.sensor).ok_or_else(|| {
                    (
                        ExclusionKind::MissingCorrection,
                        format!("{}: no {band} correction for {}", obs.id, obs.sensor),
                    )
                })?;
                fit.predict(raw)
            };
            out.bands.set(band, Some(value));
        }
        Ok(out)
    }

    /// Harmonize a batch; observations that cannot be corrected are dropped
    /// and counted, never passed through with a null or zero band.
    pub fn apply(&self, observations: &[Observation]) -> Harmonized {
        let mut report = RunReport::new();
        let mut out = Vec::with_capacity(observations.len());
        for obs in observations {
            match self.harmonize_one(obs) {
                Ok(h) => out.push(h),
                Err((kind, detail)) => report.exclude(kind, detail),
            }
        }
        Harmonized { observations: out, report }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Wide table for one band: (location, window) → sensor → (sum, count).
fn check_window(days: u32) -> Result<()> {
    if days == 0 {
        return Err(ClarityError::InvalidConfig("pairing_window_days must be positive".into()));
    }
    Ok(())
}

fn pairing_rows(observations: &[Observation], band: Band, window_days: u32) -> BTreeMap<(&str, i64), PairingRow> {
    let mut rows: BTreeMap<(&str, i64), PairingRow> = BTreeMap::new();
    for obs in observations {
        let Some(v) = obs.bands.get(band).filter(|v| v.is_finite()) else {
            continue;
        };
        let window = obs.day_ordinal().div_euclid(window_days as i64);
        let cell = rows
            .entry((obs.location.as_str(), window))
            .or_default()
            .entry(obs.sensor)
            .or_insert((0.0, 0));
        cell.0 += v;
        cell.1 += 1;
    }
    rows
}

fn fit_from_rows(
    rows: &BTreeMap<(&str, i64), PairingRow>,
    band: Band,
    sensor: Sensor,
    reference: Sensor,
) -> Result<LinearFit> {
    let mean = |cell: &(f64, usize)| cell.0 / cell.1 as f64;
    let (xs, ys): (Vec<f64>, Vec<f64>) = rows
        .values()
        .filter_map(|row| Some((mean(row.get(&sensor)?), mean(row.get(&reference)?))))
        .unzip();
    if xs.len() < 2 {
        return Err(ClarityError::TooFewPairs { band, sensor, pairs: xs.len() });
    }
    LinearFit::fit(&xs, &ys)
}
