use serde::{Deserialize, Serialize};

use crate::error::{ClarityError, Result};

/// Accuracy and bias of a set of point predictions.
///
/// Errors are `predicted - actual`; a positive bias means over-prediction.
/// `mape`, `pbias` and `smape` are percentages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub n: usize,
    pub rmse: f64,
    pub mae: f64,
    pub mape: f64,
    pub bias: f64,
    pub pbias: f64,
    pub smape: f64,
}

impl Metrics {
    pub fn compute(predicted: &[f64], actual: &[f64]) -> Result<Self> {
        if predicted.len() != actual.len() {
            return Err(ClarityError::SchemaMismatch {
                expected: format!("{} predictions", actual.len()),
                found: format!("{} predictions", predicted.len()),
            });
        }
        if actual.is_empty() {
            return Err(ClarityError::DataInsufficiency("no predictions to score".into()));
        }

        let n = actual.len() as f64;
        let (mut sq, mut abs, mut ape, mut signed, mut sape, mut total) = (0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        for (&p, &a) in predicted.iter().zip(actual) {
            let e = p - a;
            sq += e * e;
            abs += e.abs();
            signed += e;
            total += a;
            if a != 0.0 {
                ape += e.abs() / a.abs();
            }
            let denom = a.abs() + p.abs();
            if denom > 0.0 {
                sape += 2.0 * e.abs() / denom;
            }
        }

        Ok(Self {
            n: actual.len(),
            rmse: (sq / n).sqrt(),
            mae: abs / n,
            mape: 100.0 * ape / n,
            bias: signed / n,
            pbias: if total != 0.0 { 100.0 * signed / total } else { 0.0 },
            smape: 100.0 * sape / n,
        })
    }
}
