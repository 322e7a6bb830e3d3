//! Feature vectors from harmonized observations.
//!
//! The column order is fixed by an explicit [`FeatureSchema`]; it is never
//! inferred from the data. A sample whose features cannot all be computed as
//! finite numbers is dropped and counted, never coerced.

use serde::{Deserialize, Serialize};

use crate::colorimetry::{dominant_wavelength, HueTable};
use crate::error::{ClarityError, Result};
use crate::observation::{Band, Observation};
use crate::report::{ExclusionKind, RunReport};

// ── Feature catalogue ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Blue,
    Green,
    Red,
    Nir,
    Swir1,
    Swir2,
    /// Near-infrared / red.
    NirRed,
    /// Blue / green.
    BlueGreen,
    /// Dominant wavelength in nm.
    DominantWavelength,
    AreaKm2,
    MeanDepthM,
}

impl Feature {
    /// Harmonized bands, both ratios and the dominant wavelength.
    pub const DEFAULT_SET: [Feature; 9] = [
        Feature::Blue,
        Feature::Green,
        Feature::Red,
        Feature::Nir,
        Feature::Swir1,
        Feature::Swir2,
        Feature::NirRed,
        Feature::BlueGreen,
        Feature::DominantWavelength,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Feature::Blue => "blue",
            Feature::Green => "green",
            Feature::Red => "red",
            Feature::Nir => "nir",
            Feature::Swir1 => "swir1",
            Feature::Swir2 => "swir2",
            Feature::NirRed => "nir_red",
            Feature::BlueGreen => "blue_green",
            Feature::DominantWavelength => "dominant_wavelength",
            Feature::AreaKm2 => "area_km2",
            Feature::MeanDepthM => "mean_depth_m",
        }
    }

    /// Bands that must be present for this feature to be computed.
    pub fn required_bands(self) -> std::slice::Iter<'static, Band> {
        let bands: &'static [Band] = match self {
            Feature::Blue => &[Band::Blue],
            Feature::Green => &[Band::Green],
            Feature::Red => &[Band::Red],
            Feature::Nir => &[Band::Nir],
            Feature::Swir1 => &[Band::Swir1],
            Feature::Swir2 => &[Band::Swir2],
            Feature::NirRed => &[Band::Nir, Band::Red],
            Feature::BlueGreen => &[Band::Blue, Band::Green],
            Feature::DominantWavelength => &[Band::Red, Band::Green, Band::Blue],
            Feature::AreaKm2 | Feature::MeanDepthM => &[],
        };
        bands.iter()
    }
}

/// Ordered feature list a model is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema(pub Vec<Feature>);

impl FeatureSchema {
    pub fn new(features: Vec<Feature>) -> Self {
        Self(features)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn features(&self) -> &[Feature] {
        &self.0
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.0.iter().map(|f| f.name()).collect()
    }
}

impl std::fmt::Display for FeatureSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.names().join(", "))
    }
}

// ── Per-observation derivation ────────────────────────────────────────────────

/// A failed derivation, tagged with the ledger bucket it is counted under.
struct Rejection {
    kind: ExclusionKind,
    error: ClarityError,
}

impl Rejection {
    fn degenerate(kind: ExclusionKind, msg: String) -> Self {
        Self { kind, error: ClarityError::DegenerateInput(msg) }
    }
}

fn band(obs: &Observation, band: Band) -> std::result::Result<f64, Rejection> {
    match obs.bands.get(band) {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(Rejection {
            kind: ExclusionKind::MissingBand,
            error: ClarityError::DataInsufficiency(format!("{}: no {band} value", obs.id)),
        }),
    }
}

fn ratio(obs: &Observation, num: Band, den: Band) -> std::result::Result<f64, Rejection> {
    let d = band(obs, den)?;
    let n = band(obs, num)?;
    if d == 0.0 {
        return Err(Rejection::degenerate(
            ExclusionKind::ZeroDenominator,
            format!("{}: {num}/{den} with zero denominator", obs.id),
        ));
    }
    Ok(n / d)
}

fn derive(schema: &FeatureSchema, table: &HueTable, obs: &Observation) -> std::result::Result<Vec<f64>, Rejection> {
    let mut out = Vec::with_capacity(schema.len());
    for &feature in schema.features() {
        let (v, kind) = match feature {
            Feature::Blue => (band(obs, Band::Blue)?, ExclusionKind::MissingBand),
            Feature::Green => (band(obs, Band::Green)?, ExclusionKind::MissingBand),
            Feature::Red => (band(obs, Band::Red)?, ExclusionKind::MissingBand),
            Feature::Nir => (band(obs, Band::Nir)?, ExclusionKind::MissingBand),
            Feature::Swir1 => (band(obs, Band::Swir1)?, ExclusionKind::MissingBand),
            Feature::Swir2 => (band(obs, Band::Swir2)?, ExclusionKind::MissingBand),
            Feature::NirRed => (ratio(obs, Band::Nir, Band::Red)?, ExclusionKind::ZeroDenominator),
            Feature::BlueGreen => (ratio(obs, Band::Blue, Band::Green)?, ExclusionKind::ZeroDenominator),
            Feature::DominantWavelength => {
                let (r, g, b) = (band(obs, Band::Red)?, band(obs, Band::Green)?, band(obs, Band::Blue)?);
                let wl = dominant_wavelength(table, r, g, b)
                    .map_err(|error| Rejection { kind: ExclusionKind::DegenerateColor, error })?;
                (wl, ExclusionKind::DegenerateColor)
            }
            Feature::AreaKm2 => (obs.area_km2, ExclusionKind::InvalidAttribute),
            Feature::MeanDepthM => (obs.mean_depth_m, ExclusionKind::InvalidAttribute),
        };
        if !v.is_finite() {
            return Err(Rejection::degenerate(kind, format!("{}: {} is not finite", obs.id, feature.name())));
        }
        out.push(v);
    }
    Ok(out)
}

/// Feature vector for one harmonized observation, in schema order.
///
/// A missing band surfaces as `DataInsufficiency`; a zero ratio denominator,
/// degenerate colour or any non-finite result surfaces as `DegenerateInput`.
pub fn build_features(schema: &FeatureSchema, table: &HueTable, obs: &Observation) -> Result<Vec<f64>> {
    derive(schema, table, obs).map_err(|r| r.error)
}

// ── Dataset ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Sample {
    pub observation: Observation,
    pub features: Vec<f64>,
}

impl Sample {
    #[inline]
    pub fn target(&self) -> f64 {
        self.observation.secchi_m
    }
}

/// Feature-complete samples, all sharing one schema.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub schema: FeatureSchema,
    pub samples: Vec<Sample>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Feature rows for `indices`, in the given order.
    pub fn matrix(&self, indices: &[usize]) -> Vec<Vec<f64>> {
        indices.iter().map(|&i| self.samples[i].features.clone()).collect()
    }

    pub fn targets(&self, indices: &[usize]) -> Vec<f64> {
        indices.iter().map(|&i| self.samples[i].target()).collect()
    }

    pub fn observation(&self, i: usize) -> &Observation {
        &self.samples[i].observation
    }
}

/// Turns harmonized observations into a [`Dataset`], counting every drop.
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    schema: FeatureSchema,
    table: HueTable,
    max_target_m: f64,
}

impl FeatureBuilder {
    pub fn new(schema: FeatureSchema, max_target_m: f64) -> Self {
        Self { schema, table: HueTable::cie1931(), max_target_m }
    }

    pub fn with_table(mut self, table: HueTable) -> Self {
        self.table = table;
        self
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn features(&self, obs: &Observation) -> Result<Vec<f64>> {
        build_features(&self.schema, &self.table, obs)
    }

    /// Features for observations that have no target yet (prediction path).
    /// Failing observations are reported and skipped; returned pairs keep input order.
    pub fn build_unlabelled<'a>(&self, observations: &'a [Observation]) -> (Vec<(&'a Observation, Vec<f64>)>, RunReport) {
        let mut report = RunReport::new();
        let mut out = Vec::with_capacity(observations.len());
        for obs in observations {
            match derive(&self.schema, &self.table, obs) {
                Ok(f) => out.push((obs, f)),
                Err(r) => report.exclude(r.kind, r.error.to_string()),
            }
        }
        (out, report)
    }

    pub fn build_dataset(&self, observations: &[Observation]) -> (Dataset, RunReport) {
        let mut report = RunReport::new();
        let mut samples = Vec::with_capacity(observations.len());
        for obs in observations {
            if !obs.has_valid_target(self.max_target_m) {
                report.exclude(
                    ExclusionKind::InvalidTarget,
                    format!("{}: secchi {} m outside (0, {}]", obs.id, obs.secchi_m, self.max_target_m),
                );
                continue;
            }
            match derive(&self.schema, &self.table, obs) {
                Ok(features) => samples.push(Sample { observation: obs.clone(), features }),
                Err(r) => report.exclude(r.kind, r.error.to_string()),
            }
        }
        tracing::info!(kept = samples.len(), dropped = report.total(), "built feature dataset");
        (Dataset { schema: self.schema.clone(), samples }, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::{Reflectance, Sensor};
    use approx::assert_abs_diff_eq;
    use chrono::NaiveDate;

    fn obs(id: &str, bands: [f64; 6], secchi: f64) -> Observation {
        Observation {
            id: id.into(),
            location: "lake".into(),
            sensor: Sensor::Landsat8,
            date: NaiveDate::from_ymd_opt(2020, 7, 15).unwrap(),
            bands: Reflectance::from_array(bands),
            area_km2: 3.5,
            mean_depth_m: 6.0,
            region: "South".into(),
            secchi_m: secchi,
        }
    }

    fn builder(features: Vec<Feature>) -> FeatureBuilder {
        FeatureBuilder::new(FeatureSchema::new(features), 15.0)
    }

    #[test]
    fn features_follow_schema_order() {
        let b = builder(vec![Feature::NirRed, Feature::Red, Feature::AreaKm2, Feature::BlueGreen]);
        let f = b.features(&obs("a", [0.02, 0.04, 0.03, 0.015, 0.0, 0.0], 2.0)).unwrap();
        assert_eq!(f.len(), 4);
        assert_abs_diff_eq!(f[0], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(f[1], 0.03, epsilon = 1e-12);
        assert_abs_diff_eq!(f[2], 3.5, epsilon = 1e-12);
        assert_abs_diff_eq!(f[3], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn dominant_wavelength_column_matches_transform() {
        let b = builder(vec![Feature::DominantWavelength]);
        let f = b.features(&obs("a", [0.1, 0.1, 0.1, 0.01, 0.0, 0.0], 2.0)).unwrap();
        assert_eq!(f, vec![580.0]);
    }

    #[test]
    fn zero_denominator_is_degenerate() {
        let b = builder(vec![Feature::NirRed]);
        let err = b.features(&obs("a", [0.02, 0.04, 0.0, 0.01, 0.0, 0.0], 2.0)).unwrap_err();
        assert!(matches!(err, ClarityError::DegenerateInput(_)));
    }

    #[test]
    fn dataset_counts_each_exclusion_kind() {
        // Colour first, so black water fails on the colour transform.
        let mut features = vec![Feature::DominantWavelength];
        features.extend(Feature::DEFAULT_SET.iter().filter(|f| **f != Feature::DominantWavelength));
        let b = builder(features);
        let mut missing = obs("missing", [0.02, 0.04, 0.03, 0.01, 0.01, 0.01], 2.0);
        missing.bands.swir1 = None;
        let data = vec![
            obs("ok", [0.02, 0.04, 0.03, 0.01, 0.01, 0.01], 2.0),
            obs("too-deep", [0.02, 0.04, 0.03, 0.01, 0.01, 0.01], 40.0),
            obs("zero-green", [0.02, 0.0, 0.03, 0.01, 0.01, 0.01], 2.0),
            obs("black", [0.0, 0.0, 0.0, 0.01, 0.01, 0.01], 2.0),
            missing,
        ];
        let (ds, report) = b.build_dataset(&data);
        assert_eq!(ds.len(), 1);
        assert_eq!(ds.samples[0].observation.id, "ok");
        assert_eq!(report.count(ExclusionKind::InvalidTarget), 1);
        assert_eq!(report.count(ExclusionKind::ZeroDenominator), 1);
        assert_eq!(report.count(ExclusionKind::DegenerateColor), 1);
        assert_eq!(report.count(ExclusionKind::MissingBand), 1);
        assert!(ds.samples.iter().all(|s| s.features.iter().all(|v| v.is_finite())));
    }

    #[test]
    fn exclusions_are_counted_where_they_fail() {
        // Black water only breaks the ratio when no colour feature is asked for.
        let (_, report) = builder(vec![Feature::NirRed]).build_dataset(&[obs("black", [0.0; 6], 2.0)]);
        assert_eq!(report.count(ExclusionKind::ZeroDenominator), 1);
        assert_eq!(report.count(ExclusionKind::DegenerateColor), 0);

        let mut unmapped = obs("unmapped", [0.02, 0.04, 0.03, 0.01, 0.01, 0.01], 2.0);
        unmapped.area_km2 = f64::NAN;
        let (ds, report) = builder(vec![Feature::Red, Feature::AreaKm2]).build_dataset(&[unmapped]);
        assert!(ds.is_empty());
        assert_eq!(report.count(ExclusionKind::InvalidAttribute), 1);
        assert_eq!(report.count(ExclusionKind::ZeroDenominator), 0);
    }

    #[test]
    fn matrix_and_targets_follow_indices() {
        let b = builder(vec![Feature::Red]);
        let data = vec![
            obs("a", [0.0, 0.1, 0.01, 0.0, 0.0, 0.0], 1.0),
            obs("b", [0.0, 0.1, 0.02, 0.0, 0.0, 0.0], 2.0),
            obs("c", [0.0, 0.1, 0.03, 0.0, 0.0, 0.0], 3.0),
        ];
        let (ds, _) = b.build_dataset(&data);
        assert_eq!(ds.matrix(&[2, 0]), vec![vec![0.03], vec![0.01]]);
        assert_eq!(ds.targets(&[1, 2]), vec![2.0, 3.0]);
    }

    #[test]
    fn schema_names_are_stable() {
        let s = FeatureSchema::new(vec![Feature::Nir, Feature::NirRed, Feature::DominantWavelength]);
        assert_eq!(s.names(), vec!["nir", "nir_red", "dominant_wavelength"]);
        assert_eq!(s.to_string(), "[nir, nir_red, dominant_wavelength]");
    }
}
