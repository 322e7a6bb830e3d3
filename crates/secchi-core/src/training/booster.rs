//! Squared-error gradient boosting over depth-limited regression trees.
//!
//! Each round fits one tree to the current residual gradients and adds its
//! leaf weights, already scaled by the learning rate, to the running
//! prediction. Splits are exact greedy on presorted columns and grown one
//! level at a time. Leaf weights carry L2 (`lambda`) and L1 (`alpha`)
//! shrinkage:
//!
//! ```text
//! w = -sign(G) · max(|G| - alpha, 0) / (H + lambda)
//! ```
//!
//! Trees are flat node arrays; children are indices into the same array.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::grid::HyperParams;
use crate::error::{ClarityError, Result};

const SUBSAMPLE_SALT: u64 = 0x9E37_79B9_7F4A_7C15;

/// Tree-shape settings shared by every grid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoosterSettings {
    pub max_depth: usize,
    /// Minimum hessian sum (row count under squared loss) per child.
    pub min_child_weight: f64,
    /// Fraction of rows drawn, without replacement, for each tree.
    pub subsample: f64,
}

impl Default for BoosterSettings {
    fn default() -> Self {
        Self { max_depth: 4, min_child_weight: 1.0, subsample: 1.0 }
    }
}

impl BoosterSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_depth == 0 {
            return Err(ClarityError::InvalidConfig("max_depth must be at least 1".into()));
        }
        if !(self.min_child_weight.is_finite() && self.min_child_weight >= 0.0) {
            return Err(ClarityError::InvalidConfig("min_child_weight must be non-negative".into()));
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(ClarityError::InvalidConfig(format!("subsample {} outside (0, 1]", self.subsample)));
        }
        Ok(())
    }
}

// ── Trees ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Leaf { value: f64 },
    /// Rows with `x[feature] <= threshold` go left.
    Split { feature: usize, threshold: f64, left: usize, right: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes.get(idx) {
                Some(Node::Leaf { value }) => return *value,
                Some(&Node::Split { feature, threshold, left, right }) => {
                    let v = row.get(feature).copied().unwrap_or(f64::NAN);
                    idx = if v <= threshold { left } else { right };
                }
                None => return 0.0,
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match nodes.get(idx) {
                Some(&Node::Split { left, right, .. }) => 1 + walk(nodes, left).max(walk(nodes, right)),
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| matches!(n, Node::Leaf { .. })).count()
    }
}

#[inline]
fn soft_threshold(g: f64, alpha: f64) -> f64 {
    g.signum() * (g.abs() - alpha).max(0.0)
}

#[inline]
fn leaf_weight(g: f64, h: f64, lambda: f64, alpha: f64) -> f64 {
    -soft_threshold(g, alpha) / (h + lambda)
}

#[inline]
fn structure_score(g: f64, h: f64, lambda: f64, alpha: f64) -> f64 {
    soft_threshold(g, alpha).powi(2) / (h + lambda)
}

#[derive(Debug, Clone, Copy, Default)]
struct Stats {
    g: f64,
    h: f64,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    gain: f64,
    feature: usize,
    threshold: f64,
}

/// Read-only inputs for growing one tree.
struct Grower<'a> {
    x: &'a [Vec<f64>],
    grad: &'a [f64],
    /// Row indices per column, ascending by that column's value.
    sorted: &'a [Vec<usize>],
    params: &'a HyperParams,
    settings: &'a BoosterSettings,
}

impl Grower<'_> {
    /// Grow one tree over `rows`, level by level.
    fn grow(&self, rows: &[usize]) -> Tree {
        let n = self.x.len();
        let (lambda, alpha) = (self.params.lambda, self.params.alpha);
        let eta = self.params.learning_rate;

        // Node currently holding each row; None = not in this tree's sample
        // or already settled in a leaf.
        let mut node_of: Vec<Option<usize>> = vec![None; n];
        let mut root = Stats::default();
        for &r in rows {
            node_of[r] = Some(0);
            root.g += self.grad[r];
            root.h += 1.0;
        }

        let mut nodes = vec![Node::Leaf { value: 0.0 }];
        let mut stats = vec![root];
        let mut frontier = vec![0usize];

        for _ in 0..self.settings.max_depth {
            if frontier.is_empty() {
                break;
            }
            let best = self.best_splits(&frontier, &node_of, &stats, nodes.len());

            let mut next = Vec::new();
            for (slot, &nd) in frontier.iter().enumerate() {
                match best[slot] {
                    Some(c) => {
                        let (left, right) = (nodes.len(), nodes.len() + 1);
                        nodes.push(Node::Leaf { value: 0.0 });
                        nodes.push(Node::Leaf { value: 0.0 });
                        stats.push(Stats::default());
                        stats.push(Stats::default());
                        nodes[nd] = Node::Split { feature: c.feature, threshold: c.threshold, left, right };
                        next.push(left);
                        next.push(right);
                    }
                    None => {
                        let s = stats[nd];
                        nodes[nd] = Node::Leaf { value: eta * leaf_weight(s.g, s.h, lambda, alpha) };
                    }
                }
            }

            // Route rows into the new children and settle rows of new leaves.
            for r in 0..n {
                let Some(nd) = node_of[r] else { continue };
                match nodes[nd] {
                    Node::Split { feature, threshold, left, right } => {
                        let child = if self.x[r][feature] <= threshold { left } else { right };
                        node_of[r] = Some(child);
                        stats[child].g += self.grad[r];
                        stats[child].h += 1.0;
                    }
                    Node::Leaf { .. } => node_of[r] = None,
                }
            }
            frontier = next;
        }

        for nd in frontier {
            let s = stats[nd];
            nodes[nd] = Node::Leaf { value: eta * leaf_weight(s.g, s.h, lambda, alpha) };
        }
        Tree { nodes }
    }

    /// Best split per frontier node (None when no split has positive gain).
    fn best_splits(&self, frontier: &[usize], node_of: &[Option<usize>], stats: &[Stats], n_nodes: usize) -> Vec<Option<Candidate>> {
        let (lambda, alpha) = (self.params.lambda, self.params.alpha);
        let mcw = self.settings.min_child_weight;

        let mut slot_of = vec![usize::MAX; n_nodes];
        for (slot, &nd) in frontier.iter().enumerate() {
            slot_of[nd] = slot;
        }
        let parent_score: Vec<f64> = frontier
            .iter()
            .map(|&nd| structure_score(stats[nd].g, stats[nd].h, lambda, alpha))
            .collect();

        let mut best: Vec<Option<Candidate>> = vec![None; frontier.len()];
        let mut acc = vec![Stats::default(); frontier.len()];
        let mut last = vec![f64::NAN; frontier.len()];

        for (feature, order) in self.sorted.iter().enumerate() {
            acc.iter_mut().for_each(|a| *a = Stats::default());
            last.iter_mut().for_each(|v| *v = f64::NAN);

            for &r in order {
                let Some(nd) = node_of[r] else { continue };
                let slot = slot_of[nd];
                if slot == usize::MAX {
                    continue;
                }
                let v = self.x[r][feature];
                let left = acc[slot];
                if left.h > 0.0 && v > last[slot] {
                    let total = stats[nd];
                    let right = Stats { g: total.g - left.g, h: total.h - left.h };
                    if left.h >= mcw && right.h >= mcw {
                        let gain = 0.5
                            * (structure_score(left.g, left.h, lambda, alpha)
                                + structure_score(right.g, right.h, lambda, alpha)
                                - parent_score[slot]);
                        let improves = match best[slot] {
                            Some(b) => gain > b.gain,
                            None => gain > 1e-12,
                        };
                        if improves {
                            best[slot] = Some(Candidate { gain, feature, threshold: last[slot] });
                        }
                    }
                }
                acc[slot].g += self.grad[r];
                acc[slot].h += 1.0;
                last[slot] = v;
            }
        }
        best
    }
}

// ── Ensemble ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBooster {
    pub base_score: f64,
    pub n_features: usize,
    pub trees: Vec<Tree>,
}

impl GradientBooster {
    /// Fit on a dense row-major matrix. A non-finite training loss in any
    /// round aborts with `TrainingDivergence`.
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: &HyperParams, settings: &BoosterSettings, seed: u64) -> Result<Self> {
        let n = x.len();
        if n == 0 || n != y.len() {
            return Err(ClarityError::DataInsufficiency(format!("{n} rows for {} targets", y.len())));
        }
        let n_features = x[0].len();
        if x.iter().any(|r| r.len() != n_features) {
            return Err(ClarityError::SchemaMismatch {
                expected: format!("{n_features} columns"),
                found: "ragged rows".into(),
            });
        }

        let sorted: Vec<Vec<usize>> = (0..n_features)
            .map(|f| {
                let mut idx: Vec<usize> = (0..n).collect();
                idx.sort_by(|&a, &b| x[a][f].total_cmp(&x[b][f]));
                idx
            })
            .collect();

        let base_score = y.iter().sum::<f64>() / n as f64;
        let mut pred = vec![base_score; n];
        let mut grad = vec![0.0; n];
        let mut trees = Vec::with_capacity(params.n_rounds);
        let mut rng = StdRng::seed_from_u64(seed ^ SUBSAMPLE_SALT);
        let take = ((settings.subsample * n as f64).round() as usize).clamp(1, n);
        let all_rows: Vec<usize> = (0..n).collect();

        for round in 0..params.n_rounds {
            for i in 0..n {
                grad[i] = pred[i] - y[i];
            }
            let rows = if take < n {
                let mut r = rand::seq::index::sample(&mut rng, n, take).into_vec();
                r.sort_unstable();
                r
            } else {
                all_rows.clone()
            };

            let grower = Grower { x, grad: &grad, sorted: &sorted, params, settings };
            let tree = grower.grow(&rows);
            for (p, row) in pred.iter_mut().zip(x) {
                *p += tree.predict(row);
            }
            trees.push(tree);

            let loss = pred.iter().zip(y).map(|(p, t)| (p - t).powi(2)).sum::<f64>() / n as f64;
            if !loss.is_finite() {
                tracing::debug!(round, %params, "training loss diverged");
                return Err(ClarityError::TrainingDivergence { params: params.to_string(), fold: 0 });
            }
        }

        Ok(Self { base_score, n_features, trees })
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }

    pub fn predict(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|r| self.predict_row(r)).collect()
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}
