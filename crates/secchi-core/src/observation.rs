use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Landsat sensors covered by the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Sensor {
    #[serde(rename = "LT05")]
    Landsat5,
    #[serde(rename = "LE07")]
    Landsat7,
    #[serde(rename = "LC08")]
    Landsat8,
}

impl Sensor {
    pub const ALL: [Sensor; 3] = [Sensor::Landsat5, Sensor::Landsat7, Sensor::Landsat8];

    pub fn code(self) -> &'static str {
        match self {
            Sensor::Landsat5 => "LT05",
            Sensor::Landsat7 => "LE07",
            Sensor::Landsat8 => "LC08",
        }
    }
}

impl fmt::Display for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Surface-reflectance bands shared by all three sensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    Blue,
    Green,
    Red,
    Nir,
    Swir1,
    Swir2,
}

impl Band {
    pub const ALL: [Band; 6] = [Band::Blue, Band::Green, Band::Red, Band::Nir, Band::Swir1, Band::Swir2];

    pub fn name(self) -> &'static str {
        match self {
            Band::Blue => "blue",
            Band::Green => "green",
            Band::Red => "red",
            Band::Nir => "nir",
            Band::Swir1 => "swir1",
            Band::Swir2 => "swir2",
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-band reflectance; `None` marks a value the sensor did not deliver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Reflectance {
    #[serde(default)]
    pub blue: Option<f64>,
    #[serde(default)]
    pub green: Option<f64>,
    #[serde(default)]
    pub red: Option<f64>,
    #[serde(default)]
    pub nir: Option<f64>,
    #[serde(default)]
    pub swir1: Option<f64>,
    #[serde(default)]
    pub swir2: Option<f64>,
}

impl Reflectance {
    pub fn get(&self, band: Band) -> Option<f64> {
        match band {
            Band::Blue => self.blue,
            Band::Green => self.green,
            Band::Red => self.red,
            Band::Nir => self.nir,
            Band::Swir1 => self.swir1,
            Band::Swir2 => self.swir2,
        }
    }

    pub fn set(&mut self, band: Band, value: Option<f64>) {
        let slot = match band {
            Band::Blue => &mut self.blue,
            Band::Green => &mut self.green,
            Band::Red => &mut self.red,
            Band::Nir => &mut self.nir,
            Band::Swir1 => &mut self.swir1,
            Band::Swir2 => &mut self.swir2,
        };
        *slot = value;
    }

    /// Build from a full six-band array in `Band::ALL` order.
    pub fn from_array(values: [f64; 6]) -> Self {
        let mut r = Self::default();
        for (band, v) in Band::ALL.iter().zip(values) {
            r.set(*band, Some(v));
        }
        r
    }
}

/// One matched satellite overpass + in-situ Secchi measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    /// Water-body identifier; the spatial grouping key.
    pub location: String,
    pub sensor: Sensor,
    pub date: NaiveDate,
    pub bands: Reflectance,
    pub area_km2: f64,
    pub mean_depth_m: f64,
    /// Stratification key for the hold-out draw.
    pub region: String,
    /// Secchi disk depth in metres.
    pub secchi_m: f64,
}

impl Observation {
    #[inline]
    pub fn day_ordinal(&self) -> i64 {
        self.date.num_days_from_ce() as i64
    }

    #[inline]
    pub fn year(&self) -> i32 {
        self.date.year()
    }

    /// Target lies in the physically plausible range (0, max].
    pub fn has_valid_target(&self, max_target_m: f64) -> bool {
        self.secchi_m.is_finite() && self.secchi_m > 0.0 && self.secchi_m <= max_target_m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(secchi: f64) -> Observation {
        Observation {
            id: "a".into(),
            location: "lake".into(),
            sensor: Sensor::Landsat8,
            date: NaiveDate::from_ymd_opt(2020, 6, 1).unwrap(),
            bands: Reflectance::from_array([0.02, 0.04, 0.03, 0.01, 0.005, 0.003]),
            area_km2: 1.0,
            mean_depth_m: 3.0,
            region: "West".into(),
            secchi_m: secchi,
        }
    }

    #[test]
    fn reflectance_get_set_roundtrip_per_band() {
        let mut r = Reflectance::default();
        for (i, band) in Band::ALL.iter().enumerate() {
            r.set(*band, Some(i as f64));
        }
        for (i, band) in Band::ALL.iter().enumerate() {
            assert_eq!(r.get(*band), Some(i as f64));
        }
    }

    #[test]
    fn target_validity_bounds() {
        assert!(obs(2.0).has_valid_target(15.0));
        assert!(!obs(0.0).has_valid_target(15.0));
        assert!(!obs(20.0).has_valid_target(15.0));
        assert!(!obs(f64::NAN).has_valid_target(15.0));
    }

    #[test]
    fn sensor_serialises_as_landsat_code() {
        let json = serde_json::to_string(&Sensor::Landsat7).unwrap();
        assert_eq!(json, "\"LE07\"");
        let back: Sensor = serde_json::from_str("\"LC08\"").unwrap();
        assert_eq!(back, Sensor::Landsat8);
    }
}
