//! # Portfolio Builder
//!
//! $$
//! \mu_p=\sum_i w_i\mu_i,\qquad \sigma_p=\sqrt{\mathbf w_S^\top\Sigma_{SS}\mathbf w_S},\qquad
//! \text{SR}=\mu_p/\sigma_p
//! $$
//!
//! Packages final weights into an [`OptimizedPortfolio`] with realized metrics
//! computed on the retained funds only.

use std::collections::BTreeMap;

use crate::data::dot;
use crate::data::mat_vec_mul;
use crate::estimator::PortfolioStatistics;
use crate::optimizers::OptimizationOutcome;
use crate::types::AppliedConstraints;
use crate::types::FundDetail;
use crate::types::FundRecord;
use crate::types::OptimizationParams;
use crate::types::OptimizedPortfolio;
use crate::types::Region;
use crate::types::SolverDiagnostics;

/// Sharpe ratio without a risk-free leg; 0 when volatility vanishes.
pub fn sharpe_ratio(expected_return: f64, volatility: f64) -> f64 {
  if volatility > 1e-15 && volatility.is_finite() {
    expected_return / volatility
  } else {
    0.0
  }
}

pub fn applied_constraints(params: &OptimizationParams, cap: f64) -> AppliedConstraints {
  AppliedConstraints {
    target_volatility: params.target_volatility,
    max_etfs: params.max_etfs,
    max_weight: cap,
    exclusion_threshold: params.exclusion_threshold,
    excluded_industries: params.industry_exclusions.clone(),
    target_regions: Region::ALL
      .into_iter()
      .filter(|r| params.target_region_mix.get(r).copied().unwrap_or(0.0) > 0.0)
      .collect(),
  }
}

/// Build the result for `funds`, the universe the statistics were estimated on.
pub fn build_portfolio(
  funds: &[FundRecord],
  stats: &PortfolioStatistics,
  params: &OptimizationParams,
  outcome: &OptimizationOutcome,
) -> OptimizedPortfolio {
  let mut retained: Vec<usize> = outcome.support();
  retained.sort_by(|&a, &b| {
    outcome.weights[b]
      .total_cmp(&outcome.weights[a])
      .then(a.cmp(&b))
  });

  let total: f64 = retained.iter().map(|&i| outcome.weights[i]).sum();
  let weights: Vec<f64> = retained
    .iter()
    .map(|&i| {
      if total > 0.0 {
        outcome.weights[i] / total
      } else {
        0.0
      }
    })
    .collect();

  let sub = stats.subset(&retained);
  let expected_return = dot(&weights, &sub.expected_returns);
  let sigma_w = mat_vec_mul(&sub.covariance, &weights);
  let volatility = dot(&weights, &sigma_w).max(0.0).sqrt();
  let sharpe = sharpe_ratio(expected_return, volatility);

  let region_exposure: BTreeMap<Region, f64> = Region::ALL
    .into_iter()
    .map(|r| {
      let exposure = retained
        .iter()
        .zip(weights.iter())
        .map(|(&i, &w)| w * funds[i].region(r))
        .sum();
      (r, exposure)
    })
    .collect();

  let details: Vec<FundDetail> = retained
    .iter()
    .enumerate()
    .map(|(k, &i)| FundDetail {
      ticker: funds[i].ticker.clone(),
      name: funds[i].name.clone(),
      weight: weights[k],
      marginal_return: weights[k] * sub.expected_returns[k],
      marginal_volatility: if volatility > 1e-15 {
        weights[k] * sigma_w[k] / volatility
      } else {
        0.0
      },
      fee: funds[i].ter,
    })
    .collect();

  let total_fee = details.iter().map(|d| d.weight * d.fee).sum();

  OptimizedPortfolio {
    tickers: details.iter().map(|d| d.ticker.clone()).collect(),
    weights,
    expected_return,
    volatility,
    sharpe_ratio: sharpe,
    region_exposure,
    total_fee,
    constraints: applied_constraints(params, outcome.cap),
    details,
    approximate: outcome.approximate(),
    diagnostics: SolverDiagnostics {
      solver: outcome.solver.to_string(),
      iterations: outcome.iterations,
      converged: outcome.converged,
      feasible: outcome.feasible(),
      candidates: funds.len(),
    },
  }
}
