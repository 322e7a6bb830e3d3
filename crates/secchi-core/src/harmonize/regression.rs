use serde::{Deserialize, Serialize};

use crate::error::{ClarityError, Result};

/// Ordinary least-squares line `y = intercept + slope · x`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearFit {
    pub intercept: f64,
    pub slope: f64,
    pub n_pairs: usize,
    pub r_squared: f64,
}

impl LinearFit {
    /// Fit on paired samples. Needs at least two pairs with non-zero spread in `x`.
    pub fn fit(xs: &[f64], ys: &[f64]) -> Result<Self> {
        if xs.len() != ys.len() {
            return Err(ClarityError::DataInsufficiency(format!(
                "unpaired samples ({} vs {})",
                xs.len(),
                ys.len()
            )));
        }
        if xs.len() < 2 {
            return Err(ClarityError::DataInsufficiency(format!(
                "{} pairs, need at least 2",
                xs.len()
            )));
        }
        let n = xs.len() as f64;
        let mx = xs.iter().sum::<f64>() / n;
        let my = ys.iter().sum::<f64>() / n;
        let sxx: f64 = xs.iter().map(|x| (x - mx).powi(2)).sum();
        let sxy: f64 = xs.iter().zip(ys).map(|(x, y)| (x - mx) * (y - my)).sum();
        if sxx < 1e-18 {
            return Err(ClarityError::DataInsufficiency(
                "predictor has no spread; slope undefined".into(),
            ));
        }
        let slope = sxy / sxx;
        let intercept = my - slope * mx;

        // R² = 1 − SS_res / SS_tot
        let ss_tot: f64 = ys.iter().map(|y| (y - my).powi(2)).sum();
        let ss_res: f64 = xs
            .iter()
            .zip(ys)
            .map(|(x, y)| (y - (intercept + slope * x)).powi(2))
            .sum();
        let r_squared = if ss_tot < 1e-18 { 1.0 } else { 1.0 - ss_res / ss_tot };

        Ok(Self { intercept, slope, n_pairs: xs.len(), r_squared })
    }

    #[inline]
    pub fn predict(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn recovers_exact_line() {
        let xs = [0.0, 1.0, 2.0, 3.0];
        let ys = [1.0, 3.0, 5.0, 7.0];
        let fit = LinearFit::fit(&xs, &ys).unwrap();
        assert_abs_diff_eq!(fit.slope, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(fit.intercept, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(fit.r_squared, 1.0, epsilon = 1e-12);
        assert_eq!(fit.n_pairs, 4);
    }

    #[test]
    fn single_pair_is_insufficient() {
        assert!(matches!(
            LinearFit::fit(&[1.0], &[2.0]),
            Err(ClarityError::DataInsufficiency(_))
        ));
    }

    #[test]
    fn constant_predictor_is_insufficient() {
        assert!(LinearFit::fit(&[0.3, 0.3, 0.3], &[1.0, 2.0, 3.0]).is_err());
    }
}
