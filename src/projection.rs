//! # Projections
//!
//! $$
//! \Pi_{\Delta}(\mathbf v)_i = \max(v_i-\tau,0),\qquad
//! \tau = \frac{1}{\rho}\Big(\sum_{j\le\rho}u_j-1\Big),\quad
//! \rho=\max\{j: u_j-\tfrac{1}{j}(\textstyle\sum_{r\le j}u_r-1)>0\}
//! $$
//!
//! Euclidean simplex projection (sorted threshold), its box-capped variant,
//! the full feasible-set projection (volatility cap, exclusion caps),
//! feasibility checks and post-hoc cardinality reduction.

use serde::Deserialize;
use serde::Serialize;

use crate::data::dot;
use crate::data::quad_form;
use crate::estimator::PortfolioStatistics;
use crate::types::OptimizationParams;

pub const NON_NEGATIVITY_TOL: f64 = 1e-6;
pub const SUM_TOL: f64 = 1e-4;
pub const UPPER_BOUND_TOL: f64 = 1e-6;
/// Relative slack on the volatility and exclusion caps.
pub const CAP_SLACK: f64 = 1.01;

const BOX_PASSES: usize = 500;
const VOL_SCALE_STEP: f64 = 0.95;
const VOL_SCALE_FLOOR: f64 = 0.1;

/// Projection of `v` onto the probability simplex.
pub fn project_simplex(v: &[f64]) -> Vec<f64> {
  if v.is_empty() {
    return Vec::new();
  }

  let mut u = v.to_vec();
  u.sort_by(|a, b| b.total_cmp(a));

  let mut cssv = 0.0;
  let mut rho = 0usize;
  let mut rho_sum = 0.0;
  for (i, &ui) in u.iter().enumerate() {
    cssv += ui;
    let theta = (cssv - 1.0) / (i as f64 + 1.0);
    if ui - theta > 0.0 {
      rho = i + 1;
      rho_sum = cssv;
    }
  }

  if rho == 0 {
    return vec![1.0 / v.len() as f64; v.len()];
  }

  let theta = (rho_sum - 1.0) / rho as f64;
  v.iter().map(|&x| (x - theta).max(0.0)).collect()
}

pub fn clip(v: &[f64], lo: f64, hi: f64) -> Vec<f64> {
  v.iter().map(|&x| x.clamp(lo, hi)).collect()
}

/// Single clip-then-project pass.
///
/// The result sums to one and is non-negative but may exceed `cap` by a small amount.
pub fn project_clip_simplex(v: &[f64], cap: f64) -> Vec<f64> {
  project_simplex(&clip(v, 0.0, cap))
}

/// Clip-then-project passes repeated until the upper bound holds.
pub fn project_box_simplex(v: &[f64], cap: f64) -> Vec<f64> {
  let mut w = project_clip_simplex(v, cap);
  for _ in 0..BOX_PASSES {
    let excess = w.iter().fold(0.0f64, |acc, &x| acc.max(x - cap));
    if excess <= 1e-12 {
      break;
    }
    w = project_clip_simplex(&w, cap);
  }
  w
}

/// Rescale to unit sum; all-zero input becomes uniform.
pub fn renormalize(w: &[f64]) -> Vec<f64> {
  let total: f64 = w.iter().map(|x| x.max(0.0)).sum();
  if total <= 1e-15 {
    if w.is_empty() {
      return Vec::new();
    }
    return vec![1.0 / w.len() as f64; w.len()];
  }
  w.iter().map(|x| x.max(0.0) / total).collect()
}

/// Indices of the `k` largest weights, by descending weight. Ties keep index order.
pub fn top_k_indices(w: &[f64], k: usize) -> Vec<usize> {
  let mut idx: Vec<usize> = (0..w.len()).collect();
  idx.sort_by(|&a, &b| w[b].total_cmp(&w[a]).then(a.cmp(&b)));
  idx.truncate(k.min(w.len()));
  idx
}

/// Keep the `k` largest positions, zero the rest and renormalize.
pub fn reduce_cardinality(w: &[f64], k: usize) -> Vec<f64> {
  let keep = top_k_indices(w, k);
  let mut out = vec![0.0; w.len()];
  for &i in &keep {
    out[i] = w[i];
  }

  let total: f64 = out.iter().sum();
  if total <= 1e-15 {
    for &i in &keep {
      out[i] = 1.0 / keep.len() as f64;
    }
    return out;
  }
  out.iter().map(|x| x / total).collect()
}

pub fn portfolio_volatility(cov: &[Vec<f64>], w: &[f64]) -> f64 {
  quad_form(cov, w).sqrt()
}

/// Outcome of each feasibility criterion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeasibilityReport {
  pub non_negative: bool,
  pub sums_to_one: bool,
  pub within_upper_bound: bool,
  pub within_volatility: bool,
  pub within_exclusions: bool,
}

impl FeasibilityReport {
  pub fn is_feasible(&self) -> bool {
    self.non_negative
      && self.sums_to_one
      && self.within_upper_bound
      && self.within_volatility
      && self.within_exclusions
  }
}

pub fn check_feasibility(
  w: &[f64],
  stats: &PortfolioStatistics,
  params: &OptimizationParams,
  cap: f64,
) -> FeasibilityReport {
  let sum: f64 = w.iter().sum();
  let vol = portfolio_volatility(&stats.covariance, w);

  FeasibilityReport {
    non_negative: w.iter().all(|&x| x >= -NON_NEGATIVITY_TOL),
    sums_to_one: (sum - 1.0).abs() <= SUM_TOL,
    within_upper_bound: w.iter().all(|&x| x <= cap + UPPER_BOUND_TOL),
    within_volatility: vol <= CAP_SLACK * params.target_volatility,
    within_exclusions: stats
      .exclusion_matrix
      .iter()
      .all(|row| dot(row, w) <= CAP_SLACK * params.exclusion_threshold),
  }
}

/// Result of [`FeasibleSet::project`].
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectionOutcome {
  pub weights: Vec<f64>,
  pub report: FeasibilityReport,
  pub cycles: usize,
}

impl ProjectionOutcome {
  pub fn feasible(&self) -> bool {
    self.report.is_feasible()
  }
}

/// Constraint set `{sum w = 1, 0 <= w <= cap, vol(w) <= target, A_excl w <= eps}`.
pub struct FeasibleSet<'a> {
  stats: &'a PortfolioStatistics,
  params: &'a OptimizationParams,
  cap: f64,
  max_cycles: usize,
}

impl<'a> FeasibleSet<'a> {
  pub fn new(
    stats: &'a PortfolioStatistics,
    params: &'a OptimizationParams,
    max_cycles: usize,
  ) -> Self {
    Self {
      stats,
      params,
      cap: params.effective_max_weight(stats.len()),
      max_cycles: max_cycles.max(1),
    }
  }

  pub fn cap(&self) -> f64 {
    self.cap
  }

  pub fn check(&self, w: &[f64]) -> FeasibilityReport {
    check_feasibility(w, self.stats, self.params, self.cap)
  }

  /// Move volatility toward the `anchor` portfolio until it fits the target.
  ///
  /// A plain rescale of `w` would be undone by renormalization, so the shrink factor
  /// is applied to the distance from a low-risk anchor instead.
  fn reduce_volatility(&self, w: Vec<f64>, anchor: &[f64]) -> Vec<f64> {
    let cov = &self.stats.covariance;
    let target = self.params.target_volatility;
    if portfolio_volatility(cov, &w) <= target {
      return w;
    }

    let mut scale = 1.0;
    let mut blended = w.clone();
    while scale > VOL_SCALE_FLOOR {
      scale = (scale * VOL_SCALE_STEP).max(VOL_SCALE_FLOOR);
      blended = w
        .iter()
        .zip(anchor.iter())
        .map(|(&wi, &ai)| scale * wi + (1.0 - scale) * ai)
        .collect();
      if portfolio_volatility(cov, &blended) <= target {
        break;
      }
    }
    blended
  }

  /// Cut the weights of funds that push an exclusion row above its threshold.
  fn reduce_exclusions(&self, mut w: Vec<f64>) -> Vec<f64> {
    let threshold = self.params.exclusion_threshold;
    for row in &self.stats.exclusion_matrix {
      let exposure = dot(row, &w);
      if exposure <= threshold {
        continue;
      }

      let violators: Vec<usize> = (0..w.len())
        .filter(|&i| row[i] > 0.0 && w[i] > 0.0)
        .collect();
      if violators.is_empty() {
        continue;
      }

      let share = (exposure - threshold) / violators.len() as f64;
      for i in violators {
        w[i] = (w[i] - share / row[i]).max(0.0);
      }
    }
    w
  }

  /// Repeated box/simplex, volatility, exclusion and renormalization passes.
  pub fn project(&self, w: &[f64], anchor: &[f64]) -> ProjectionOutcome {
    let mut current = w.to_vec();
    let mut report = FeasibilityReport::default();
    let mut cycles = 0;

    for _ in 0..self.max_cycles {
      cycles += 1;
      let boxed = project_box_simplex(&current, self.cap);
      let calmer = self.reduce_volatility(boxed, anchor);
      let compliant = self.reduce_exclusions(calmer);
      current = renormalize(&compliant);

      report = self.check(&current);
      if report.is_feasible() {
        break;
      }
    }

    ProjectionOutcome {
      weights: current,
      report,
      cycles,
    }
  }
}
