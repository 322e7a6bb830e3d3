//! Dominant wavelength of water colour from red/green/blue reflectance.
//!
//! RGB is projected into CIE XYZ with fixed Landsat-calibrated coefficients,
//! normalised to chromaticity, and reduced to a hue angle around the
//! (0.33, 0.33) white point. The hue angle is matched against the hue angles
//! of the visible spectral locus; the closest locus wavelength is the
//! dominant wavelength.

pub mod cie1931;

use crate::error::{ClarityError, Result};

/// Visible range kept from the spectral locus.
pub const MIN_WAVELENGTH_NM: u16 = 380;
pub const MAX_WAVELENGTH_NM: u16 = 700;

const WHITE_X: f64 = 0.33;
const WHITE_Y: f64 = 0.33;

/// Locus wavelengths with their precomputed hue angles, sorted by wavelength.
/// Built once and shared read-only.
#[derive(Debug, Clone)]
pub struct HueTable {
    entries: Vec<(u16, f64)>,
}

impl HueTable {
    /// Table from the CIE 1931 2° spectral locus, 380–700 nm.
    pub fn cie1931() -> Self {
        Self::from_locus(&cie1931::SPECTRAL_LOCUS)
    }

    /// Table from arbitrary `(wavelength, x, y)` rows. Rows outside the visible
    /// range are dropped; the rest are ordered by wavelength.
    pub fn from_locus(locus: &[(u16, f64, f64)]) -> Self {
        let mut entries: Vec<(u16, f64)> = locus
            .iter()
            .filter(|(wl, _, _)| (MIN_WAVELENGTH_NM..=MAX_WAVELENGTH_NM).contains(wl))
            .map(|&(wl, x, y)| (wl, hue_angle_deg(x, y)))
            .collect();
        entries.sort_by_key(|&(wl, _)| wl);
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Wavelength whose hue angle is closest to `angle_deg`. The first minimum
    /// in wavelength order wins ties.
    pub fn nearest(&self, angle_deg: f64) -> Option<u16> {
        let mut best: Option<(u16, f64)> = None;
        for &(wl, a) in &self.entries {
            let d = (angle_deg - a).abs();
            match best {
                Some((_, bd)) if d >= bd => {}
                _ => best = Some((wl, d)),
            }
        }
        best.map(|(wl, _)| wl)
    }
}

impl Default for HueTable {
    fn default() -> Self {
        Self::cie1931()
    }
}

/// Hue angle in degrees of chromaticity `(x, y)` around the white point.
#[inline]
pub fn hue_angle_deg(x: f64, y: f64) -> f64 {
    (x - WHITE_X).atan2(y - WHITE_Y).to_degrees()
}

/// Chromaticity `(x, y, z)` of an RGB reflectance triplet.
pub fn chromaticity(red: f64, green: f64, blue: f64) -> Result<(f64, f64, f64)> {
    if !(red.is_finite() && green.is_finite() && blue.is_finite()) {
        return Err(ClarityError::DegenerateInput(format!(
            "non-finite reflectance (r={red}, g={green}, b={blue})"
        )));
    }
    let x_t = 2.7689 * red + 1.7517 * green + 1.1302 * blue;
    let y_t = 1.0000 * red + 4.5907 * green + 0.0601 * blue;
    let z_t = 0.0565 * green + 5.5943 * blue;
    let sum = x_t + y_t + z_t;
    if sum == 0.0 || !sum.is_finite() {
        return Err(ClarityError::DegenerateInput(
            "tristimulus sum is zero; chromaticity undefined".into(),
        ));
    }
    Ok((x_t / sum, y_t / sum, z_t / sum))
}

/// Dominant wavelength in nm for one observation.
pub fn dominant_wavelength(table: &HueTable, red: f64, green: f64, blue: f64) -> Result<f64> {
    let (x, y, _) = chromaticity(red, green, blue)?;
    let alpha = hue_angle_deg(x, y);
    table
        .nearest(alpha)
        .map(f64::from)
        .ok_or_else(|| ClarityError::DegenerateInput("empty hue lookup table".into()))
}

/// Vectorised form; each triplet is resolved independently.
pub fn dominant_wavelengths(table: &HueTable, rgb: &[(f64, f64, f64)]) -> Vec<Result<f64>> {
    rgb.iter()
        .map(|&(r, g, b)| dominant_wavelength(table, r, g, b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn table_covers_visible_range_sorted() {
        let t = HueTable::cie1931();
        assert_eq!(t.len(), 65);
        assert!(t.entries.windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(t.entries.first().map(|e| e.0), Some(380));
        assert_eq!(t.entries.last().map(|e| e.0), Some(700));
    }

    #[test]
    fn grey_triplets_stay_in_visible_range() {
        let t = HueTable::cie1931();
        for v in [1e-4, 0.01, 0.05, 0.3, 1.0, 25.0] {
            let wl = dominant_wavelength(&t, v, v, v).unwrap();
            assert!((380.0..=700.0).contains(&wl), "wl={wl} for v={v}");
        }
    }

    #[test]
    fn grey_maps_to_45_degrees_and_580nm() {
        let (x, y, z) = chromaticity(0.1, 0.1, 0.1).unwrap();
        assert_abs_diff_eq!(x, 1.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(y, 1.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(z, 1.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(hue_angle_deg(x, y), 45.0, epsilon = 1e-9);
        let wl = dominant_wavelength(&HueTable::cie1931(), 0.1, 0.1, 0.1).unwrap();
        assert_eq!(wl, 580.0);
    }

    #[test]
    fn zero_reflectance_is_degenerate() {
        let err = dominant_wavelength(&HueTable::cie1931(), 0.0, 0.0, 0.0).unwrap_err();
        assert!(matches!(err, ClarityError::DegenerateInput(_)));
    }

    #[test]
    fn non_finite_reflectance_is_degenerate() {
        let t = HueTable::cie1931();
        assert!(dominant_wavelength(&t, f64::NAN, 0.1, 0.1).is_err());
        assert!(dominant_wavelength(&t, 0.1, f64::INFINITY, 0.1).is_err());
    }

    #[test]
    fn blue_water_is_shorter_than_green_water() {
        let t = HueTable::cie1931();
        let blue = dominant_wavelength(&t, 0.01, 0.02, 0.05).unwrap();
        let green = dominant_wavelength(&t, 0.02, 0.05, 0.01).unwrap();
        assert!(blue < 500.0, "blue-rich water at {blue} nm");
        assert!((540.0..=580.0).contains(&green), "green-rich water at {green} nm");
    }

    #[test]
    fn ties_resolve_to_first_wavelength() {
        // Two locus points with identical hue angle.
        let t = HueTable::from_locus(&[(600, 0.5, 0.5), (450, 0.5, 0.5), (800, 0.5, 0.5)]);
        assert_eq!(t.len(), 2);
        assert_eq!(t.nearest(45.0), Some(450));
    }

    #[test]
    fn vectorised_matches_scalar() {
        let t = HueTable::cie1931();
        let rgb = [(0.02, 0.04, 0.03), (0.0, 0.0, 0.0)];
        let out = dominant_wavelengths(&t, &rgb);
        assert_eq!(out[0].as_ref().unwrap(), &dominant_wavelength(&t, 0.02, 0.04, 0.03).unwrap());
        assert!(out[1].is_err());
    }
}
