//! # Constrained Optimizers
//!
//! $$
//! \max_{\mathbf w}\ \mu^\top\mathbf w-\lambda\,\mathbf w^\top\Sigma\mathbf w
//! -\alpha\,f^\top\mathbf w-\beta\,\lVert A\mathbf w-t\rVert^2-\gamma\,\ell^\top\mathbf w
//! $$
//!
//! subject to $\mathbf 1^\top\mathbf w=1$, $0\le w_i\le \bar w$,
//! $\mathbf w^\top\Sigma\mathbf w\le\sigma^{\*2}$ and $E\mathbf w\le\varepsilon$.
//!
//! The continuous problem is solved by a [`PortfolioSolver`] (projected gradient
//! ascent by default, Nelder-Mead as an alternate backend). [`ConstrainedOptimizer`]
//! then applies the feasible-set projection and cardinality reduction shared by all backends.

use argmin::core::CostFunction;
use argmin::core::Executor;
use argmin::solver::neldermead::NelderMead;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::data::dot;
use crate::data::mat_t_vec_mul;
use crate::data::mat_vec_mul;
use crate::data::quad_form;
use crate::estimator::PortfolioStatistics;
use crate::projection::portfolio_volatility;
use crate::projection::project_box_simplex;
use crate::projection::project_clip_simplex;
use crate::projection::renormalize;
use crate::projection::top_k_indices;
use crate::projection::FeasibilityReport;
use crate::projection::FeasibleSet;
use crate::types::OptimizationParams;

/// Penalized mean-variance objective over a fixed universe.
pub struct MeanVarianceObjective<'a> {
  stats: &'a PortfolioStatistics,
  params: &'a OptimizationParams,
  target_regions: Vec<f64>,
}

impl<'a> MeanVarianceObjective<'a> {
  pub fn new(stats: &'a PortfolioStatistics, params: &'a OptimizationParams) -> Self {
    Self {
      stats,
      params,
      target_regions: params.target_region_vector(),
    }
  }

  fn region_deviation(&self, w: &[f64]) -> Vec<f64> {
    mat_vec_mul(&self.stats.region_matrix, w)
      .iter()
      .zip(self.target_regions.iter())
      .map(|(a, t)| a - t)
      .collect()
  }

  pub fn value(&self, w: &[f64]) -> f64 {
    let s = self.stats;
    let p = self.params;
    let deviation = self.region_deviation(w);

    dot(&s.expected_returns, w) - p.risk_aversion * quad_form(&s.covariance, w)
      - p.fee_penalty * dot(&s.fee_penalties, w)
      - p.region_penalty * dot(&deviation, &deviation)
      - p.liquidity_penalty * dot(&s.liquidity_penalties, w)
  }

  pub fn gradient(&self, w: &[f64]) -> Vec<f64> {
    let s = self.stats;
    let p = self.params;
    let n = w.len();
    let sigma_w = mat_vec_mul(&s.covariance, w);
    let region_grad = mat_t_vec_mul(&s.region_matrix, &self.region_deviation(w), n);

    (0..n)
      .map(|i| {
        s.expected_returns[i]
          - 2.0 * p.risk_aversion * sigma_w[i]
          - p.fee_penalty * s.fee_penalties[i]
          - 2.0 * p.region_penalty * region_grad[i]
          - p.liquidity_penalty * s.liquidity_penalties[i]
      })
      .collect()
  }
}

/// Continuous solution before feasibility and cardinality post-processing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SolverOutput {
  pub weights: Vec<f64>,
  pub iterations: usize,
  pub converged: bool,
  pub objective: f64,
}

/// Backend contract: continuous weights for the universe described by `stats`.
pub trait PortfolioSolver: Send + Sync {
  fn name(&self) -> &'static str;

  fn solve(&self, stats: &PortfolioStatistics, params: &OptimizationParams) -> SolverOutput;
}

/// Step control for projected gradient ascent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GradientSettings {
  pub max_iterations: usize,
  /// Stop when the objective moves by less than this between iterations.
  pub tolerance: f64,
  pub initial_step: f64,
  pub max_halvings: usize,
}

impl Default for GradientSettings {
  fn default() -> Self {
    Self {
      max_iterations: 1000,
      tolerance: 1e-6,
      initial_step: 1.0,
      max_halvings: 20,
    }
  }
}

/// Projected gradient ascent with a halving line search.
///
/// A step is accepted only if the projected candidate improves the objective.
/// Running out of iterations is not an error: the last iterate is returned with
/// `converged = false`.
pub fn projected_gradient_ascent<F, G, P>(
  objective: F,
  gradient: G,
  project: P,
  w0: Vec<f64>,
  settings: &GradientSettings,
) -> SolverOutput
where
  F: Fn(&[f64]) -> f64,
  G: Fn(&[f64]) -> Vec<f64>,
  P: Fn(&[f64]) -> Vec<f64>,
{
  let mut w = w0;
  let mut value = objective(&w);
  let mut iterations = 0;
  let mut converged = false;

  while iterations < settings.max_iterations {
    iterations += 1;
    let grad = gradient(&w);

    let mut step = settings.initial_step;
    let mut next = None;
    for _ in 0..=settings.max_halvings {
      let stepped: Vec<f64> = w
        .iter()
        .zip(grad.iter())
        .map(|(wi, gi)| wi + step * gi)
        .collect();
      let candidate = project(&stepped);
      let candidate_value = objective(&candidate);
      if candidate_value > value {
        next = Some((candidate, candidate_value));
        break;
      }
      step *= 0.5;
    }

    let previous = value;
    if let Some((candidate, candidate_value)) = next {
      w = candidate;
      value = candidate_value;
    }

    if (value - previous).abs() < settings.tolerance {
      converged = true;
      break;
    }
  }

  SolverOutput {
    weights: w,
    iterations,
    converged,
    objective: value,
  }
}

/// Core backend: uniform start, clip-then-project after every step.
#[derive(Clone, Debug, Default)]
pub struct ProjectedGradientSolver {
  pub settings: GradientSettings,
}

impl ProjectedGradientSolver {
  pub fn new(settings: GradientSettings) -> Self {
    Self { settings }
  }
}

impl PortfolioSolver for ProjectedGradientSolver {
  fn name(&self) -> &'static str {
    "projected-gradient"
  }

  fn solve(&self, stats: &PortfolioStatistics, params: &OptimizationParams) -> SolverOutput {
    let n = stats.len();
    if n == 0 {
      return SolverOutput::default();
    }

    let objective = MeanVarianceObjective::new(stats, params);
    let cap = params.effective_max_weight(n);

    projected_gradient_ascent(
      |w| objective.value(w),
      |w| objective.gradient(w),
      |v| project_clip_simplex(v, cap),
      vec![1.0 / n as f64; n],
      &self.settings,
    )
  }
}

fn softmax(x: &[f64]) -> Vec<f64> {
  if x.is_empty() {
    return Vec::new();
  }

  let max_x = x.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
  let exps: Vec<f64> = x.iter().map(|&v| (v - max_x).exp()).collect();
  let sum: f64 = exps.iter().sum();

  if sum < 1e-15 {
    vec![1.0 / x.len() as f64; x.len()]
  } else {
    exps.iter().map(|&e| e / sum).collect()
  }
}

/// Derivative-free backend on a softmax parametrization of the simplex.
///
/// Volatility and exclusion caps enter as quadratic penalties; position caps are
/// left to the shared feasible-set projection.
#[derive(Clone, Debug)]
pub struct NelderMeadSolver {
  pub max_iterations: u64,
  pub volatility_penalty: f64,
  pub exclusion_penalty: f64,
}

impl Default for NelderMeadSolver {
  fn default() -> Self {
    Self {
      max_iterations: 5000,
      volatility_penalty: 50.0,
      exclusion_penalty: 500.0,
    }
  }
}

struct PenalizedCost {
  stats: PortfolioStatistics,
  params: OptimizationParams,
  volatility_penalty: f64,
  exclusion_penalty: f64,
}

impl CostFunction for PenalizedCost {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, x: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
    let w = softmax(x);
    let objective = MeanVarianceObjective::new(&self.stats, &self.params);
    let vol_excess =
      (portfolio_volatility(&self.stats.covariance, &w) - self.params.target_volatility).max(0.0);
    let excl_excess: f64 = self
      .stats
      .exclusion_matrix
      .iter()
      .map(|row| (dot(row, &w) - self.params.exclusion_threshold).max(0.0).powi(2))
      .sum();

    Ok(
      -objective.value(&w)
        + self.volatility_penalty * vol_excess.powi(2)
        + self.exclusion_penalty * excl_excess,
    )
  }
}

impl PortfolioSolver for NelderMeadSolver {
  fn name(&self) -> &'static str {
    "nelder-mead"
  }

  fn solve(&self, stats: &PortfolioStatistics, params: &OptimizationParams) -> SolverOutput {
    let n = stats.len();
    if n == 0 {
      return SolverOutput::default();
    }

    let cost = PenalizedCost {
      stats: stats.clone(),
      params: params.clone(),
      volatility_penalty: self.volatility_penalty,
      exclusion_penalty: self.exclusion_penalty,
    };

    let x0 = vec![0.0; n];
    let mut simplex = Vec::with_capacity(n + 1);
    simplex.push(x0.clone());
    for i in 0..n {
      let mut point = x0.clone();
      point[i] = 1.0;
      simplex.push(point);
    }

    let uniform = vec![1.0 / n as f64; n];
    let (weights, iterations, converged) = match NelderMead::new(simplex).with_sd_tolerance(1e-10) {
      Ok(solver) => {
        match Executor::new(cost, solver)
          .configure(|state| state.max_iters(self.max_iterations))
          .run()
        {
          Ok(res) => {
            let iters = res.state.iter;
            let best_x = res.state.best_param.unwrap_or(x0);
            (softmax(&best_x), iters as usize, iters < self.max_iterations)
          }
          Err(err) => {
            warn!(%err, "nelder-mead run failed, falling back to uniform weights");
            (uniform, 0, false)
          }
        }
      }
      Err(err) => {
        warn!(%err, "nelder-mead setup failed, falling back to uniform weights");
        (uniform, 0, false)
      }
    };

    let objective = MeanVarianceObjective::new(stats, params).value(&weights);
    SolverOutput {
      weights,
      iterations,
      converged,
      objective,
    }
  }
}

/// Long-only minimum-variance portfolio under a position cap.
///
/// Serves as the low-risk anchor of the volatility step in [`FeasibleSet::project`].
pub fn min_variance_portfolio(cov: &[Vec<f64>], cap: f64) -> Vec<f64> {
  let n = cov.len();
  if n == 0 {
    return Vec::new();
  }

  let settings = GradientSettings {
    max_iterations: 500,
    tolerance: 1e-14,
    initial_step: 1.0,
    max_halvings: 30,
  };

  projected_gradient_ascent(
    |w| -quad_form(cov, w),
    |w| mat_vec_mul(cov, w).iter().map(|x| -2.0 * x).collect(),
    |v| project_box_simplex(v, cap),
    vec![1.0 / n as f64; n],
    &settings,
  )
  .weights
}

/// Backend selection for [`OptimizerConfig`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SolverKind {
  #[default]
  ProjectedGradient,
  NelderMead,
}

impl SolverKind {
  /// Parse a string into a [`SolverKind`], defaulting to projected gradient.
  pub fn from_str(s: &str) -> Self {
    match s.to_lowercase().as_str() {
      "nm" | "nelder-mead" | "neldermead" => Self::NelderMead,
      _ => Self::ProjectedGradient,
    }
  }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
  pub max_iterations: usize,
  pub tolerance: f64,
  pub initial_step: f64,
  pub max_halvings: usize,
  /// Budget of the feasible-set projection loop.
  pub feasibility_cycles: usize,
  /// Positions below this weight are dropped from the final result.
  pub min_display_weight: f64,
  pub solver: SolverKind,
}

impl Default for OptimizerConfig {
  fn default() -> Self {
    Self {
      max_iterations: 1000,
      tolerance: 1e-6,
      initial_step: 1.0,
      max_halvings: 20,
      feasibility_cycles: 100,
      min_display_weight: 0.005,
      solver: SolverKind::ProjectedGradient,
    }
  }
}

impl OptimizerConfig {
  pub fn gradient_settings(&self) -> GradientSettings {
    GradientSettings {
      max_iterations: self.max_iterations,
      tolerance: self.tolerance,
      initial_step: self.initial_step,
      max_halvings: self.max_halvings,
    }
  }

  pub fn build_solver(&self) -> Box<dyn PortfolioSolver> {
    match self.solver {
      SolverKind::ProjectedGradient => {
        Box::new(ProjectedGradientSolver::new(self.gradient_settings()))
      }
      SolverKind::NelderMead => Box::new(NelderMeadSolver::default()),
    }
  }
}

/// Final weights plus the intermediate continuous solution.
#[derive(Clone, Debug, PartialEq)]
pub struct OptimizationOutcome {
  /// Final weights over the whole universe; zero for dropped funds.
  pub weights: Vec<f64>,
  /// Feasible continuous solution before cardinality reduction.
  pub continuous_weights: Vec<f64>,
  pub solver: &'static str,
  pub iterations: usize,
  pub converged: bool,
  pub report: FeasibilityReport,
  /// Position cap in force on the final support.
  pub cap: f64,
  /// Funds outside the largest continuous positions that were swapped in to
  /// meet the volatility target.
  pub substituted: Vec<usize>,
}

impl OptimizationOutcome {
  pub fn feasible(&self) -> bool {
    self.report.is_feasible()
  }

  pub fn approximate(&self) -> bool {
    !self.converged || !self.feasible()
  }

  /// Indices of the non-zero positions.
  pub fn support(&self) -> Vec<usize> {
    (0..self.weights.len())
      .filter(|&i| self.weights[i] > 0.0)
      .collect()
  }
}

/// Solver backend followed by feasibility projection and cardinality reduction.
pub struct ConstrainedOptimizer {
  config: OptimizerConfig,
  solver: Box<dyn PortfolioSolver>,
}

impl ConstrainedOptimizer {
  pub fn new(config: OptimizerConfig) -> Self {
    let solver = config.build_solver();
    Self { config, solver }
  }

  /// Use a custom backend instead of the one named in the config.
  pub fn with_solver(config: OptimizerConfig, solver: Box<dyn PortfolioSolver>) -> Self {
    Self { config, solver }
  }

  pub fn config(&self) -> &OptimizerConfig {
    &self.config
  }

  pub fn solver_name(&self) -> &'static str {
    self.solver.name()
  }

  /// Feasible-set projection of `w` on the funds at `indices`.
  fn refine(
    &self,
    stats: &PortfolioStatistics,
    params: &OptimizationParams,
    w: &[f64],
    indices: &[usize],
  ) -> SupportFit {
    let sub = stats.subset(indices);
    let start = renormalize(&indices.iter().map(|&i| w[i]).collect::<Vec<f64>>());
    let set = FeasibleSet::new(&sub, params, self.config.feasibility_cycles);
    let anchor = min_variance_portfolio(&sub.covariance, set.cap());
    let out = set.project(&start, &anchor);
    SupportFit {
      indices: indices.to_vec(),
      weights: out.weights,
      report: out.report,
      cap: set.cap(),
    }
  }

  /// Swap the riskiest retained funds for the calmest left-out ones until the
  /// reduced support meets the volatility target.
  ///
  /// Funds that breach an exclusion row on their own are never swapped in. Each
  /// incoming fund takes over the weight of the fund it replaces and stays in.
  fn repair_volatility(
    &self,
    stats: &PortfolioStatistics,
    params: &OptimizationParams,
    mut fit: SupportFit,
  ) -> (SupportFit, Vec<usize>) {
    let variance = |i: usize| stats.covariance[i][i];
    let mut candidates: Vec<usize> = (0..stats.len())
      .filter(|i| !fit.indices.contains(i))
      .filter(|&i| {
        stats
          .exclusion_matrix
          .iter()
          .all(|row| row[i] <= params.exclusion_threshold)
      })
      .collect();
    candidates.sort_by(|&a, &b| variance(a).total_cmp(&variance(b)).then(a.cmp(&b)));

    let mut substituted = Vec::new();
    for candidate in candidates {
      if fit.report.within_volatility {
        break;
      }

      let outgoing = (0..fit.indices.len())
        .filter(|&k| !substituted.contains(&fit.indices[k]))
        .max_by(|&a, &b| {
          variance(fit.indices[a])
            .total_cmp(&variance(fit.indices[b]))
            .then(b.cmp(&a))
        });
      let Some(k) = outgoing else {
        break;
      };
      if variance(candidate) >= variance(fit.indices[k]) {
        break;
      }

      let mut full = fit.full_weights(stats.len());
      full[candidate] = full[fit.indices[k]];
      full[fit.indices[k]] = 0.0;
      let mut indices = fit.indices.clone();
      indices[k] = candidate;
      indices.sort_unstable();

      fit = self.refine(stats, params, &full, &indices);
      substituted.push(candidate);
    }

    (fit, substituted)
  }

  pub fn optimize(
    &self,
    stats: &PortfolioStatistics,
    params: &OptimizationParams,
  ) -> OptimizationOutcome {
    let n = stats.len();
    let raw = self.solver.solve(stats, params);
    debug!(
      solver = self.solver.name(),
      iterations = raw.iterations,
      converged = raw.converged,
      objective = raw.objective,
      "continuous solve finished"
    );
    if !raw.converged {
      warn!(
        iterations = raw.iterations,
        "solver stopped before convergence, using last iterate"
      );
    }

    let all: Vec<usize> = (0..n).collect();
    let continuous = self.refine(stats, params, &raw.weights, &all).weights;

    let mut support = top_k_indices(&continuous, params.max_etfs.max(1));
    support.sort_unstable();
    let mut fit = self.refine(stats, params, &continuous, &support);

    let mut substituted = Vec::new();
    if !fit.report.within_volatility {
      (fit, substituted) = self.repair_volatility(stats, params, fit);
      debug!(
        swaps = substituted.len(),
        within_volatility = fit.report.within_volatility,
        "repaired reduced support"
      );
    }

    let floor = self.config.min_display_weight.max(params.min_weight);
    loop {
      let kept: Vec<usize> = (0..fit.indices.len())
        .filter(|&k| fit.weights[k] >= floor)
        .collect();
      if kept.len() == fit.indices.len() {
        break;
      }
      let kept = if kept.is_empty() {
        top_k_indices(&fit.weights, 1)
      } else {
        kept
      };

      let full = fit.full_weights(n);
      let indices: Vec<usize> = kept.iter().map(|&k| fit.indices[k]).collect();
      fit = self.refine(stats, params, &full, &indices);

      if fit.indices.len() == 1 {
        break;
      }
    }
    substituted.retain(|i| fit.indices.contains(i));

    if !fit.report.is_feasible() {
      warn!(
        report = ?fit.report,
        "constraints could not be fully met, returning closest approximation"
      );
    }

    OptimizationOutcome {
      weights: fit.full_weights(n),
      continuous_weights: continuous,
      solver: self.solver.name(),
      iterations: raw.iterations,
      converged: raw.converged,
      report: fit.report,
      cap: fit.cap,
      substituted,
    }
  }
}

/// Projected weights on a subset of the universe.
struct SupportFit {
  indices: Vec<usize>,
  weights: Vec<f64>,
  report: FeasibilityReport,
  cap: f64,
}

impl SupportFit {
  fn full_weights(&self, n: usize) -> Vec<f64> {
    let mut full = vec![0.0; n];
    for (k, &i) in self.indices.iter().enumerate() {
      full[i] = self.weights[k];
    }
    full
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;
  use crate::estimator::ShrinkageSummary;
  use crate::types::IndustryExclusion;

  fn stats(mu: Vec<f64>, vars: Vec<f64>) -> PortfolioStatistics {
    let n = mu.len();
    let mut cov = vec![vec![0.0; n]; n];
    for i in 0..n {
      cov[i][i] = vars[i];
    }
    PortfolioStatistics {
      expected_returns: mu,
      covariance: cov,
      fee_penalties: vec![0.002; n],
      liquidity_penalties: vec![0.05; n],
      region_matrix: vec![vec![0.2; n]; 5],
      exclusion_matrix: Vec::new(),
      exclusions: Vec::new(),
      shrinkage: ShrinkageSummary::default(),
    }
  }

  fn params(max_etfs: usize, target_volatility: f64) -> OptimizationParams {
    OptimizationParams {
      target_volatility,
      max_etfs,
      risk_aversion: 1.0,
      fee_penalty: 1.0,
      region_penalty: 0.1,
      liquidity_penalty: 0.01,
      target_region_mix: Default::default(),
      industry_exclusions: Vec::new(),
      exclusion_threshold: 0.005,
      min_weight: 0.0,
      max_weight: 0.4,
    }
  }

  #[test]
  fn gradient_matches_finite_differences() {
    let mut s = stats(vec![0.05, 0.08, 0.03], vec![0.02, 0.05, 0.004]);
    s.covariance[0][1] = 0.01;
    s.covariance[1][0] = 0.01;
    s.region_matrix[2] = vec![1.0, 0.5, 0.0];
    let mut p = params(3, 0.2);
    p.target_region_mix = crate::profile::default_region_mix();

    let objective = MeanVarianceObjective::new(&s, &p);
    let w = vec![0.2, 0.5, 0.3];
    let grad = objective.gradient(&w);
    let h = 1e-6;
    for i in 0..3 {
      let mut up = w.clone();
      let mut down = w.clone();
      up[i] += h;
      down[i] -= h;
      let numeric = (objective.value(&up) - objective.value(&down)) / (2.0 * h);
      assert_abs_diff_eq!(grad[i], numeric, epsilon = 1e-6);
    }
  }

  #[test]
  fn gradient_ascent_improves_objective_and_stays_on_simplex() {
    let s = stats(vec![0.02, 0.06, 0.1, 0.04], vec![0.001, 0.01, 0.04, 0.005]);
    let p = params(4, 0.3);
    let out = ProjectedGradientSolver::default().solve(&s, &p);

    let objective = MeanVarianceObjective::new(&s, &p);
    assert!(out.objective >= objective.value(&[0.25; 4]));
    assert_abs_diff_eq!(out.weights.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
    assert!(out.weights.iter().all(|&w| w >= 0.0));
    assert!(out.converged);
  }

  #[test]
  fn iteration_budget_exhaustion_is_not_an_error() {
    let s = stats(vec![0.02, 0.06, 0.1], vec![0.001, 0.01, 0.04]);
    let p = params(3, 0.3);
    let solver = ProjectedGradientSolver::new(GradientSettings {
      max_iterations: 1,
      tolerance: 0.0,
      ..Default::default()
    });
    let out = solver.solve(&s, &p);

    assert_eq!(out.iterations, 1);
    assert!(!out.converged);
    assert_eq!(out.weights.len(), 3);
  }

  #[test]
  fn min_variance_prefers_low_variance_assets() {
    let cov = vec![vec![0.04, 0.0, 0.0], vec![0.0, 0.01, 0.0], vec![0.0, 0.0, 0.0025]];
    let w = min_variance_portfolio(&cov, 1.0);

    // inverse-variance weights 1 : 4 : 16
    assert_abs_diff_eq!(w[2], 16.0 / 21.0, epsilon = 1e-3);
    assert!(w[0] < w[1] && w[1] < w[2]);
  }

  #[test]
  fn optimizer_output_respects_cardinality_and_bounds() {
    let mu: Vec<f64> = (0..12).map(|i| 0.03 + 0.005 * i as f64).collect();
    let vars: Vec<f64> = (0..12).map(|i| 0.002 + 0.002 * i as f64).collect();
    let s = stats(mu, vars);
    let p = params(4, 0.25);

    let out = ConstrainedOptimizer::new(OptimizerConfig::default()).optimize(&s, &p);
    let support = out.support();

    assert!(support.len() <= 4);
    assert_abs_diff_eq!(out.weights.iter().sum::<f64>(), 1.0, epsilon = 1e-4);
    assert!(out.weights.iter().all(|&w| w >= -1e-6 && w <= 0.4 + 1e-6));

    let top = top_k_indices(&out.continuous_weights, 4);
    assert!(support.iter().all(|i| top.contains(i)));
  }

  struct FixedSolver(Vec<f64>);

  impl PortfolioSolver for FixedSolver {
    fn name(&self) -> &'static str {
      "fixed"
    }

    fn solve(&self, _stats: &PortfolioStatistics, _params: &OptimizationParams) -> SolverOutput {
      SolverOutput {
        weights: self.0.clone(),
        iterations: 0,
        converged: true,
        objective: 0.0,
      }
    }
  }

  #[test]
  fn low_variance_funds_are_swapped_in_until_volatility_fits() {
    let s = stats(
      vec![0.1, 0.1, 0.1, 0.02, 0.02, 0.02],
      vec![0.04, 0.04, 0.04, 0.0004, 0.0004, 0.0004],
    );
    let p = params(3, 0.08);
    let solver = FixedSolver(vec![0.3, 0.3, 0.3, 0.04, 0.03, 0.03]);
    let optimizer = ConstrainedOptimizer::with_solver(OptimizerConfig::default(), Box::new(solver));
    let out = optimizer.optimize(&s, &p);

    // three uncorrelated 20% funds cannot get below 11.5% on their own
    let mut top = top_k_indices(&out.continuous_weights, 3);
    top.sort_unstable();
    assert_eq!(top, vec![0, 1, 2]);
    assert_eq!(out.substituted, vec![3, 4]);
    assert_eq!(out.support(), vec![2, 3, 4]);
    assert!(out.report.within_volatility);
    assert!(out.feasible());
    assert!(portfolio_volatility(&s.covariance, &out.weights) <= 0.08 * 1.01);
  }

  #[test]
  fn reduced_support_within_target_keeps_top_positions() {
    let s = stats(vec![0.04, 0.05, 0.06, 0.03], vec![0.01, 0.012, 0.015, 0.004]);
    let p = params(3, 0.3);
    let out = ConstrainedOptimizer::new(OptimizerConfig::default()).optimize(&s, &p);

    assert!(out.substituted.is_empty());
    let top = top_k_indices(&out.continuous_weights, 3);
    assert!(out.support().iter().all(|i| top.contains(i)));
  }

  #[test]
  fn nelder_mead_backend_shares_post_processing() {
    let s = stats(vec![0.04, 0.06, 0.08, 0.05], vec![0.004, 0.01, 0.03, 0.006]);
    let p = params(3, 0.2);
    let config = OptimizerConfig {
      solver: SolverKind::NelderMead,
      ..Default::default()
    };

    let optimizer = ConstrainedOptimizer::new(config);
    assert_eq!(optimizer.solver_name(), "nelder-mead");

    let out = optimizer.optimize(&s, &p);
    assert!(out.support().len() <= 3);
    assert_abs_diff_eq!(out.weights.iter().sum::<f64>(), 1.0, epsilon = 1e-4);
  }

  #[test]
  fn solver_kind_parses_aliases() {
    assert_eq!(SolverKind::from_str("NM"), SolverKind::NelderMead);
    assert_eq!(SolverKind::from_str("anything"), SolverKind::ProjectedGradient);
  }

  #[test]
  fn exclusion_rows_shape_the_final_allocation() {
    let mut s = stats(vec![0.1, 0.04, 0.04, 0.04], vec![0.01, 0.01, 0.01, 0.01]);
    s.exclusions = vec![IndustryExclusion::Gambling];
    s.exclusion_matrix = vec![vec![0.03, 0.0, 0.0, 0.0]];
    let p = params(4, 0.3);

    let out = ConstrainedOptimizer::new(OptimizerConfig::default()).optimize(&s, &p);
    let exposure = dot(&s.exclusion_matrix[0], &out.weights);
    assert!(exposure <= 0.005 * 1.01, "exposure {exposure}");
  }
}
