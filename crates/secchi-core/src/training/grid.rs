use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ClarityError, Result};

/// One point of the search grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HyperParams {
    pub learning_rate: f64,
    pub n_rounds: usize,
    /// L2 penalty on leaf weights.
    pub lambda: f64,
    /// L1 penalty on leaf weights.
    pub alpha: f64,
}

impl fmt::Display for HyperParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "eta={} rounds={} lambda={} alpha={}",
            self.learning_rate, self.n_rounds, self.lambda, self.alpha
        )
    }
}

/// Candidate values per hyper-parameter. Expanded as a full cross product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperGrid {
    pub learning_rate: Vec<f64>,
    pub n_rounds: Vec<usize>,
    pub lambda: Vec<f64>,
    pub alpha: Vec<f64>,
}

impl Default for HyperGrid {
    fn default() -> Self {
        Self {
            learning_rate: vec![0.05, 0.1, 0.3],
            n_rounds: vec![100, 200],
            lambda: vec![0.0, 1.0],
            alpha: vec![0.0, 0.1],
        }
    }
}

impl HyperGrid {
    /// A grid with exactly one configuration.
    pub fn single(params: HyperParams) -> Self {
        Self {
            learning_rate: vec![params.learning_rate],
            n_rounds: vec![params.n_rounds],
            lambda: vec![params.lambda],
            alpha: vec![params.alpha],
        }
    }

    pub fn len(&self) -> usize {
        self.learning_rate.len() * self.n_rounds.len() * self.lambda.len() * self.alpha.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cross product in declaration order: learning rate varies slowest,
    /// alpha fastest.
    pub fn expand(&self) -> Vec<HyperParams> {
        let mut out = Vec::with_capacity(self.len());
        for &learning_rate in &self.learning_rate {
            for &n_rounds in &self.n_rounds {
                for &lambda in &self.lambda {
                    for &alpha in &self.alpha {
                        out.push(HyperParams { learning_rate, n_rounds, lambda, alpha });
                    }
                }
            }
        }
        out
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(ClarityError::InvalidConfig("hyper-parameter grid is empty".into()));
        }
        if self.learning_rate.iter().any(|v| !(v.is_finite() && *v > 0.0)) {
            return Err(ClarityError::InvalidConfig("learning rates must be positive".into()));
        }
        if self.n_rounds.contains(&0) {
            return Err(ClarityError::InvalidConfig("round counts must be positive".into()));
        }
        if self.lambda.iter().chain(&self.alpha).any(|v| !(v.is_finite() && *v >= 0.0)) {
            return Err(ClarityError::InvalidConfig("regularisation strengths must be non-negative".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_grid_expands_to_full_cross_product() {
        let g = HyperGrid::default();
        let all = g.expand();
        assert_eq!(all.len(), 24);
        assert_eq!(g.len(), 24);
        assert_eq!(all[0], HyperParams { learning_rate: 0.05, n_rounds: 100, lambda: 0.0, alpha: 0.0 });
        assert_eq!(all[1].alpha, 0.1);
        assert_eq!(all[23], HyperParams { learning_rate: 0.3, n_rounds: 200, lambda: 1.0, alpha: 0.1 });
    }

    #[test]
    fn empty_axis_is_invalid() {
        let g = HyperGrid { alpha: vec![], ..Default::default() };
        assert!(g.expand().is_empty());
        assert!(matches!(g.validate(), Err(ClarityError::InvalidConfig(_))));
    }

    #[test]
    fn negative_penalty_is_invalid() {
        let g = HyperGrid { lambda: vec![-1.0], ..Default::default() };
        assert!(g.validate().is_err());
    }
}
