//! # Portfolio Engine
//!
//! $$
//! \text{profile}\xrightarrow{\text{map}}\theta,\quad
//! \text{funds}\xrightarrow{\text{filter}}\mathcal U\xrightarrow{\text{estimate}}(\mu,\Sigma,\dots)
//! \xrightarrow{\text{optimize}}\mathbf w\xrightarrow{\text{build}}\text{portfolio}
//! $$
//!
//! Composes the mapper, pre-filter, estimator, constrained optimizer and builder
//! into one synchronous call. The engine holds configuration only, so a single
//! instance can serve concurrent callers.

use serde::Deserialize;
use serde::Serialize;
use tracing::info;
use tracing::warn;

use crate::builder::build_portfolio;
use crate::error::IneligibilityReason;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::estimator::estimate_statistics;
use crate::estimator::EstimatorConfig;
use crate::estimator::PortfolioStatistics;
use crate::filter::filter_etfs_by_constraints;
use crate::filter::FilterConfig;
use crate::filter::FilterReport;
use crate::optimizers::ConstrainedOptimizer;
use crate::optimizers::OptimizationOutcome;
use crate::optimizers::OptimizerConfig;
use crate::optimizers::PortfolioSolver;
use crate::profile::map_risk_profile;
use crate::profile::MapperConfig;
use crate::types::FundRecord;
use crate::types::IndustryExclusion;
use crate::types::OptimizationParams;
use crate::types::OptimizedPortfolio;
use crate::types::RiskProfileInputs;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  pub filter: FilterConfig,
  pub estimator: EstimatorConfig,
  pub optimizer: OptimizerConfig,
  pub mapper: MapperConfig,
}

/// Everything produced by one run, for callers that need more than the portfolio.
#[derive(Clone, Debug)]
pub struct EngineRun {
  pub params: OptimizationParams,
  pub filter_report: FilterReport,
  pub outcome: OptimizationOutcome,
  pub portfolio: OptimizedPortfolio,
}

pub struct PortfolioEngine {
  config: EngineConfig,
  optimizer: ConstrainedOptimizer,
}

impl Default for PortfolioEngine {
  fn default() -> Self {
    Self::new(EngineConfig::default())
  }
}

impl PortfolioEngine {
  pub fn new(config: EngineConfig) -> Self {
    let optimizer = ConstrainedOptimizer::new(config.optimizer.clone());
    Self { config, optimizer }
  }

  /// Use a custom solver backend; post-processing still follows `config.optimizer`.
  pub fn with_solver(config: EngineConfig, solver: Box<dyn PortfolioSolver>) -> Self {
    let optimizer = ConstrainedOptimizer::with_solver(config.optimizer.clone(), solver);
    Self { config, optimizer }
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  pub fn optimize(
    &self,
    funds: &[FundRecord],
    inputs: &RiskProfileInputs,
    exclusions: &[IndustryExclusion],
  ) -> Result<OptimizedPortfolio> {
    self.run(funds, inputs, exclusions).map(|run| run.portfolio)
  }

  /// Full pipeline. `exclusions` is merged with the exclusions carried by `inputs`.
  pub fn run(
    &self,
    funds: &[FundRecord],
    inputs: &RiskProfileInputs,
    exclusions: &[IndustryExclusion],
  ) -> Result<EngineRun> {
    let mut inputs = inputs.clone();
    inputs
      .industry_exclusions
      .extend(exclusions.iter().copied());

    let params = map_risk_profile(&inputs, &self.config.mapper);
    let filtered = filter_etfs_by_constraints(
      funds,
      &inputs.regions_selected,
      &inputs.industry_exclusions,
      &self.config.filter,
    )?;

    let stats = estimate_statistics(
      &filtered.funds,
      &params.industry_exclusions,
      &self.config.estimator,
    )?;
    ensure_exclusions_satisfiable(&stats, params.exclusion_threshold)?;

    let outcome = self.optimizer.optimize(&stats, &params);
    let portfolio = build_portfolio(&filtered.funds, &stats, &params, &outcome);

    info!(
      candidates = filtered.funds.len(),
      selected = portfolio.tickers.len(),
      volatility = portfolio.volatility,
      approximate = portfolio.approximate,
      "portfolio constructed"
    );

    Ok(EngineRun {
      params,
      filter_report: filtered.report,
      outcome,
      portfolio,
    })
  }
}

/// No long-only portfolio can stay under `threshold` if every fund exceeds it.
fn ensure_exclusions_satisfiable(stats: &PortfolioStatistics, threshold: f64) -> Result<()> {
  let blocked = stats
    .exclusion_matrix
    .iter()
    .zip(stats.exclusions.iter())
    .find(|(row, _)| !row.is_empty() && row.iter().all(|&x| x > threshold));

  match blocked {
    Some((_, &category)) => {
      warn!(%category, threshold, "every eligible fund exceeds the exclusion threshold");
      Err(PortfolioError::NoEligibleFunds {
        reason: IneligibilityReason::ExclusionUnsatisfiable(category),
      })
    }
    None => Ok(()),
  }
}

/// Run the pipeline with default configuration.
pub fn optimize_portfolio(
  funds: &[FundRecord],
  inputs: &RiskProfileInputs,
  exclusions: &[IndustryExclusion],
) -> Result<OptimizedPortfolio> {
  PortfolioEngine::default().optimize(funds, inputs, exclusions)
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeSet;

  use approx::assert_abs_diff_eq;
  use tracing_test::traced_test;

  use super::*;
  use crate::profile::compute_risk_aversion;
  use crate::profile::compute_risk_score;
  use crate::profile::compute_target_volatility;
  use crate::optimizers::SolverOutput;
  use crate::projection::top_k_indices;
  use crate::synthetic::demo_universe;
  use crate::synthetic::synthetic_universe;
  use crate::synthetic::SyntheticFund;
  use crate::types::Region;

  const GLOBAL: [(Region, f64); 5] = [
    (Region::Us, 0.6),
    (Region::DevExUsEu, 0.15),
    (Region::EuExNl, 0.13),
    (Region::Em, 0.1),
    (Region::Nl, 0.02),
  ];

  fn profile(tolerance: f64, capacity: f64, horizon: f64, experience: f64) -> RiskProfileInputs {
    RiskProfileInputs {
      risk_tolerance: tolerance,
      risk_capacity: capacity,
      investment_horizon: horizon,
      investor_experience: experience,
      ..Default::default()
    }
  }

  fn assert_feasible(portfolio: &OptimizedPortfolio, max_etfs: usize, max_weight: f64) {
    let held = portfolio.weights.len();
    // the position cap can only be met once enough funds are held
    let cap = if held as f64 * max_weight >= 1.0 {
      max_weight
    } else {
      1.0 / held as f64
    };

    let sum: f64 = portfolio.weights.iter().sum();
    assert!((sum - 1.0).abs() <= 1e-4, "weights sum to {sum}");
    assert!(portfolio.weights.iter().all(|&w| w >= -1e-6));
    assert!(
      portfolio.weights.iter().all(|&w| w <= cap + 1e-6),
      "weights {:?} above cap {cap}",
      portfolio.weights
    );
    assert!(held <= max_etfs);
    assert_eq!(portfolio.weights.len(), portfolio.tickers.len());
  }

  #[test]
  fn conservative_profile_overweights_the_bond_fund() {
    let inputs = profile(20.0, 20.0, 20.0, 20.0);
    let score = compute_risk_score(&inputs);
    assert_abs_diff_eq!(score, 20.0, epsilon = 1e-12);
    assert_abs_diff_eq!(compute_target_volatility(score), 0.08, epsilon = 1e-12);
    assert_abs_diff_eq!(compute_risk_aversion(score), 2.1, epsilon = 1e-12);

    let mut specs = vec![SyntheticFund::bond("AGGH", &GLOBAL)];
    for i in 0..9 {
      specs.push(SyntheticFund::equity(&format!("EQ{i}"), &GLOBAL));
    }
    let funds = synthetic_universe(&specs, 120, 11);

    let portfolio = optimize_portfolio(&funds, &inputs, &[]).unwrap();
    assert_eq!(portfolio.details[0].ticker, "AGGH");
    assert!(portfolio.details[0].weight > portfolio.details[1].weight);
    assert_feasible(&portfolio, 4, MapperConfig::default().max_weight);
  }

  #[test]
  fn single_region_selection_pulls_exposure_toward_that_region() {
    let mut specs = Vec::new();
    for i in 0..3 {
      specs.push(SyntheticFund::equity(&format!("USA{i}"), &[(Region::Us, 1.0)]));
    }
    for i in 0..2 {
      specs.push(SyntheticFund::equity(&format!("WLD{i}"), &GLOBAL));
      specs.push(SyntheticFund::equity(&format!("EMK{i}"), &[(Region::Em, 1.0)]));
      specs.push(SyntheticFund::equity(
        &format!("EUR{i}"),
        &[(Region::EuExNl, 0.9), (Region::Nl, 0.1)],
      ));
    }
    specs.push(SyntheticFund::equity("PAC0", &[(Region::DevExUsEu, 1.0)]));
    let funds = synthetic_universe(&specs, 120, 21);

    let default_inputs = profile(60.0, 60.0, 60.0, 50.0);
    let mut us_inputs = default_inputs.clone();
    us_inputs.regions_selected = BTreeSet::from([Region::Us]);

    let engine = PortfolioEngine::default();
    let default_mix = engine.optimize(&funds, &default_inputs, &[]).unwrap();
    let us_only = engine.optimize(&funds, &us_inputs, &[]).unwrap();

    let us_default = default_mix.region_exposure[&Region::Us];
    let us_selected = us_only.region_exposure[&Region::Us];
    assert!(us_selected >= 0.6 - 1e-9);
    assert!(
      us_selected > us_default + 0.05,
      "US exposure {us_selected} vs default {us_default}"
    );
    assert_eq!(us_only.constraints.target_regions, vec![Region::Us]);
  }

  #[test]
  fn over_constrained_exclusions_fail_with_reason() {
    let specs: Vec<SyntheticFund> = (0..6)
      .map(|i| {
        SyntheticFund::equity(&format!("TOB{i}"), &GLOBAL)
          .with_industry(IndustryExclusion::Tobacco, 0.03)
      })
      .collect();
    let funds = synthetic_universe(&specs, 60, 2);
    let inputs = profile(50.0, 50.0, 50.0, 50.0);

    let err = optimize_portfolio(&funds, &inputs, &[IndustryExclusion::Tobacco]).unwrap_err();
    assert_eq!(
      err.reason(),
      Some(IneligibilityReason::ExclusionUnsatisfiable(
        IndustryExclusion::Tobacco
      ))
    );

    let specs: Vec<SyntheticFund> = (0..6)
      .map(|i| {
        SyntheticFund::equity(&format!("TOB{i}"), &GLOBAL)
          .with_industry(IndustryExclusion::Tobacco, 0.2)
      })
      .collect();
    let funds = synthetic_universe(&specs, 60, 2);
    let err = optimize_portfolio(&funds, &inputs, &[IndustryExclusion::Tobacco]).unwrap_err();
    assert_eq!(err.reason(), Some(IneligibilityReason::IndustryExclusions));

    // ESG labels pass the pre-filter but not the portfolio-level cap
    let labelled: Vec<SyntheticFund> = specs.into_iter().map(|s| s.esg()).collect();
    let funds = synthetic_universe(&labelled, 60, 2);
    let err = optimize_portfolio(&funds, &inputs, &[IndustryExclusion::Tobacco]).unwrap_err();
    assert_eq!(
      err.reason(),
      Some(IneligibilityReason::ExclusionUnsatisfiable(
        IndustryExclusion::Tobacco
      ))
    );
  }

  #[test]
  fn cardinality_keeps_largest_continuous_positions() {
    let funds = demo_universe(20, 5);
    // experience 29 maps to five funds
    let inputs = profile(55.0, 55.0, 55.0, 29.0);
    let run = PortfolioEngine::default().run(&funds, &inputs, &[]).unwrap();
    assert_eq!(run.params.max_etfs, 5);

    let support = run.outcome.support();
    let top = top_k_indices(&run.outcome.continuous_weights, 5);
    assert!(support.len() <= 5);
    assert!(support
      .iter()
      .filter(|i| !run.outcome.substituted.contains(i))
      .all(|i| top.contains(i)));
    assert_feasible(&run.portfolio, 5, run.params.max_weight);
  }

  #[test]
  fn results_are_feasible_and_within_volatility_cap() {
    let profiles = [
      profile(20.0, 20.0, 20.0, 20.0),
      profile(50.0, 50.0, 50.0, 50.0),
      profile(80.0, 85.0, 80.0, 90.0),
    ];

    for seed in [1, 2, 3] {
      let funds = demo_universe(20, seed);
      for inputs in &profiles {
        let run = PortfolioEngine::default().run(&funds, inputs, &[]).unwrap();
        let portfolio = &run.portfolio;

        assert_feasible(portfolio, run.params.max_etfs, run.params.max_weight);
        assert!(
          portfolio.volatility <= 1.01 * run.params.target_volatility + 1e-9,
          "seed {seed}: volatility {} above target {}",
          portfolio.volatility,
          run.params.target_volatility
        );
        assert!(portfolio.sharpe_ratio.is_finite());
      }
    }
  }

  #[test]
  fn calm_funds_replace_risky_top_positions_when_needed() {
    let funds = demo_universe(20, 3);
    let run = PortfolioEngine::default()
      .run(&funds, &profile(20.0, 20.0, 20.0, 20.0), &[])
      .unwrap();
    assert_abs_diff_eq!(run.params.target_volatility, 0.08, epsilon = 1e-12);
    assert_eq!(run.params.max_etfs, 4);

    // the four largest continuous positions are all equity funds here
    assert!(!run.outcome.substituted.is_empty());
    assert!(run
      .outcome
      .substituted
      .iter()
      .all(|&i| funds[i].asset_class == "fixed_income"));
    assert!(run.outcome.feasible(), "report {:?}", run.outcome.report);
    assert!(run.portfolio.volatility <= 1.01 * 0.08 + 1e-9);
  }

  #[test]
  fn volatility_target_holds_across_seeds_and_profiles() {
    for seed in 0..20 {
      let funds = demo_universe(20, seed);
      for risk in [15.0, 35.0, 55.0, 75.0] {
        for experience in [10.0, 50.0, 90.0] {
          let inputs = profile(risk, risk, risk, experience);
          let run = PortfolioEngine::default().run(&funds, &inputs, &[]).unwrap();

          assert!(
            run.portfolio.volatility <= 1.01 * run.params.target_volatility + 1e-9,
            "seed {seed} risk {risk} experience {experience}: volatility {} above {}",
            run.portfolio.volatility,
            run.params.target_volatility
          );
          assert!(run.outcome.report.within_volatility);
          assert_feasible(&run.portfolio, run.params.max_etfs, run.params.max_weight);
        }
      }
    }
  }

  #[test]
  fn exclusion_rows_hold_on_the_result() {
    let mut funds = demo_universe(20, 9);
    for fund in funds.iter_mut().step_by(3) {
      fund
        .industry_exposure
        .insert(IndustryExclusion::Gambling, 0.03);
    }
    let inputs = profile(50.0, 50.0, 50.0, 50.0);

    let portfolio = optimize_portfolio(&funds, &inputs, &[IndustryExclusion::Gambling]).unwrap();
    let exposure: f64 = portfolio
      .details
      .iter()
      .map(|d| {
        let fund = funds.iter().find(|f| f.ticker == d.ticker).unwrap();
        d.weight * fund.industry(IndustryExclusion::Gambling)
      })
      .sum();

    assert!(exposure <= 1.01 * 0.005 + 1e-9, "gambling exposure {exposure}");
    assert_eq!(
      portfolio.constraints.excluded_industries,
      vec![IndustryExclusion::Gambling]
    );
  }

  #[test]
  fn identical_inputs_give_identical_portfolios() {
    let funds = demo_universe(15, 77);
    let inputs = profile(65.0, 40.0, 70.0, 60.0);

    let a = optimize_portfolio(&funds, &inputs, &[IndustryExclusion::Weapons]).unwrap();
    let b = optimize_portfolio(&funds, &inputs, &[IndustryExclusion::Weapons]).unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn argument_and_profile_exclusions_are_merged() {
    let funds = demo_universe(10, 4);
    let mut inputs = profile(50.0, 50.0, 50.0, 50.0);
    inputs.industry_exclusions = BTreeSet::from([IndustryExclusion::Alcohol]);

    let run = PortfolioEngine::default()
      .run(&funds, &inputs, &[IndustryExclusion::Nuclear, IndustryExclusion::Alcohol])
      .unwrap();
    assert_eq!(
      run.params.industry_exclusions,
      vec![IndustryExclusion::Alcohol, IndustryExclusion::Nuclear]
    );
  }

  struct UniformSolver;

  impl PortfolioSolver for UniformSolver {
    fn name(&self) -> &'static str {
      "uniform"
    }

    fn solve(&self, stats: &PortfolioStatistics, _params: &OptimizationParams) -> SolverOutput {
      let n = stats.len();
      SolverOutput {
        weights: vec![1.0 / n as f64; n],
        iterations: 0,
        converged: true,
        objective: 0.0,
      }
    }
  }

  #[test]
  fn custom_backend_shares_post_processing() {
    let funds = demo_universe(12, 6);
    let inputs = profile(50.0, 50.0, 50.0, 50.0);
    let engine = PortfolioEngine::with_solver(EngineConfig::default(), Box::new(UniformSolver));

    let run = engine.run(&funds, &inputs, &[]).unwrap();
    assert_eq!(run.portfolio.diagnostics.solver, "uniform");
    assert_eq!(run.portfolio.diagnostics.candidates, 12);
    assert_feasible(&run.portfolio, run.params.max_etfs, run.params.max_weight);
  }

  #[test]
  fn empty_universe_is_fatal() {
    let err = optimize_portfolio(&[], &profile(50.0, 50.0, 50.0, 50.0), &[]).unwrap_err();
    assert_eq!(err.reason(), Some(IneligibilityReason::EmptyUniverse));
  }

  #[test]
  #[traced_test]
  fn exhausted_iterations_mark_result_approximate() {
    let mut config = EngineConfig::default();
    config.optimizer.max_iterations = 1;
    config.optimizer.tolerance = 0.0;

    let funds = demo_universe(10, 8);
    let portfolio = PortfolioEngine::new(config)
      .optimize(&funds, &profile(50.0, 50.0, 50.0, 50.0), &[])
      .unwrap();

    assert!(portfolio.approximate);
    assert!(!portfolio.diagnostics.converged);
    assert_eq!(portfolio.diagnostics.iterations, 1);
    assert!(logs_contain("solver stopped before convergence"));
  }

  #[test]
  fn partial_config_json_keeps_defaults() {
    let json = r#"{ "optimizer": { "solver": "nelder-mead" }, "filter": { "min_aum": 100.0 } }"#;
    let config: EngineConfig = serde_json::from_str(json).unwrap();

    assert_eq!(config.optimizer.solver, crate::optimizers::SolverKind::NelderMead);
    assert_eq!(config.optimizer.max_iterations, 1000);
    assert_eq!(config.filter.min_aum, 100.0);
    assert_eq!(config.filter.min_history, 36);
    assert_eq!(config.mapper, MapperConfig::default());

    let engine = PortfolioEngine::new(config);
    assert_eq!(engine.config().filter.min_aum, 100.0);
  }
}
