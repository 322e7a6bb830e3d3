use serde::{Deserialize, Serialize};

use crate::error::{ClarityError, Result};

/// Per-column centring and scaling, fitted on training rows only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    pub mean: Vec<f64>,
    /// Population standard deviation; 1.0 for columns without spread.
    pub scale: Vec<f64>,
}

impl Standardizer {
    pub fn fit(rows: &[Vec<f64>]) -> Result<Self> {
        let Some(first) = rows.first() else {
            return Err(ClarityError::DataInsufficiency("cannot standardise zero rows".into()));
        };
        let width = first.len();
        let n = rows.len() as f64;

        let mut mean = vec![0.0; width];
        for row in rows {
            if row.len() != width {
                return Err(ClarityError::SchemaMismatch {
                    expected: format!("{width} columns"),
                    found: format!("{} columns", row.len()),
                });
            }
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut scale = vec![0.0; width];
        for row in rows {
            for ((s, v), m) in scale.iter_mut().zip(row).zip(&mean) {
                *s += (v - m).powi(2);
            }
        }
        for s in &mut scale {
            let sd = (*s / n).sqrt();
            *s = if sd > 1e-12 && sd.is_finite() { sd } else { 1.0 };
        }
        Ok(Self { mean, scale })
    }

    pub fn width(&self) -> usize {
        self.mean.len()
    }

    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }

    pub fn transform(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        rows.iter().map(|r| self.transform_row(r)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn centres_and_scales_each_column() {
        let rows = vec![vec![1.0, 10.0], vec![3.0, 10.0]];
        let s = Standardizer::fit(&rows).unwrap();
        assert_eq!(s.mean, vec![2.0, 10.0]);
        assert_eq!(s.scale, vec![1.0, 1.0]);
        let t = s.transform(&rows);
        assert_abs_diff_eq!(t[0][0], -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(t[1][0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(t[0][1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn statistics_come_from_fitted_rows_only() {
        let train = vec![vec![0.0], vec![2.0], vec![4.0]];
        let s = Standardizer::fit(&train).unwrap();
        let held_out = s.transform_row(&[100.0]);
        assert_abs_diff_eq!(s.mean[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(held_out[0], 98.0 / (8.0f64 / 3.0).sqrt(), epsilon = 1e-9);
    }

    #[test]
    fn ragged_rows_are_a_schema_mismatch() {
        let err = Standardizer::fit(&[vec![1.0, 2.0], vec![1.0]]).unwrap_err();
        assert!(matches!(err, ClarityError::SchemaMismatch { .. }));
    }
}
