//! # Statistics Estimator
//!
//! $$
//! \Sigma_{\text{shrunk}} = \theta F + (1-\theta) S,\qquad
//! F_{ij} = \bar\rho\sqrt{S_{ii}S_{jj}},\ F_{ii}=S_{ii}
//! $$
//!
//! $$
//! \hat\mu_i = 12\left[\theta_\mu \bar\mu + (1-\theta_\mu)\mu_i\right]
//! $$
//!
//! Turns an eligible fund universe into the dense inputs of the optimizer:
//! constant-correlation shrunk covariance, shrunk expected returns, fee and
//! liquidity penalties, region and exclusion exposure matrices.

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::data::align_return_series;
use crate::data::average_correlation;
use crate::data::covariance_matrix;
use crate::data::sample_mean;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::types::FundRecord;
use crate::types::IndustryExclusion;
use crate::types::Region;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
  /// Weight of the constant-correlation target.
  pub covariance_shrinkage: f64,
  /// Weight of the cross-sectional grand mean.
  pub return_shrinkage: f64,
  /// Observation frequency used to annualize moments.
  pub periods_per_year: f64,
}

impl Default for EstimatorConfig {
  fn default() -> Self {
    Self {
      covariance_shrinkage: 0.4,
      return_shrinkage: 0.5,
      periods_per_year: 12.0,
    }
  }
}

/// Sample moments summarized during covariance shrinkage.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ShrinkageSummary {
  pub avg_variance: f64,
  pub avg_correlation: f64,
  pub intensity: f64,
  /// Number of aligned observations.
  pub observations: usize,
}

/// Dense optimizer inputs for `n` funds.
#[derive(Clone, Debug, PartialEq)]
pub struct PortfolioStatistics {
  /// Annualized expected returns, length `n`.
  pub expected_returns: Vec<f64>,
  /// Annualized covariance matrix, `n x n`.
  pub covariance: Vec<Vec<f64>>,
  /// TER per fund.
  pub fee_penalties: Vec<f64>,
  pub liquidity_penalties: Vec<f64>,
  /// `5 x n`, rows in [`Region::ALL`] order.
  pub region_matrix: Vec<Vec<f64>>,
  /// `m x n`, one row per entry of `exclusions`.
  pub exclusion_matrix: Vec<Vec<f64>>,
  pub exclusions: Vec<IndustryExclusion>,
  pub shrinkage: ShrinkageSummary,
}

impl PortfolioStatistics {
  pub fn len(&self) -> usize {
    self.expected_returns.len()
  }

  pub fn is_empty(&self) -> bool {
    self.expected_returns.is_empty()
  }

  /// Check that every vector and matrix is dimensioned by the fund count.
  pub fn validate(&self) -> Result<()> {
    let n = self.len();
    let mismatch = |context, actual| PortfolioError::DimensionMismatch {
      context,
      expected: n,
      actual,
    };

    if self.covariance.len() != n {
      return Err(mismatch("covariance rows", self.covariance.len()));
    }
    if let Some(row) = self.covariance.iter().find(|row| row.len() != n) {
      return Err(mismatch("covariance columns", row.len()));
    }
    if self.fee_penalties.len() != n {
      return Err(mismatch("fee penalties", self.fee_penalties.len()));
    }
    if self.liquidity_penalties.len() != n {
      return Err(mismatch("liquidity penalties", self.liquidity_penalties.len()));
    }
    if self.region_matrix.len() != Region::ALL.len() {
      return Err(PortfolioError::DimensionMismatch {
        context: "region matrix rows",
        expected: Region::ALL.len(),
        actual: self.region_matrix.len(),
      });
    }
    if let Some(row) = self.region_matrix.iter().find(|row| row.len() != n) {
      return Err(mismatch("region matrix columns", row.len()));
    }
    if self.exclusion_matrix.len() != self.exclusions.len() {
      return Err(PortfolioError::DimensionMismatch {
        context: "exclusion matrix rows",
        expected: self.exclusions.len(),
        actual: self.exclusion_matrix.len(),
      });
    }
    if let Some(row) = self.exclusion_matrix.iter().find(|row| row.len() != n) {
      return Err(mismatch("exclusion matrix columns", row.len()));
    }

    Ok(())
  }

  /// Statistics restricted to the funds at `indices`, in that order.
  pub fn subset(&self, indices: &[usize]) -> PortfolioStatistics {
    let pick = |v: &[f64]| indices.iter().map(|&i| v[i]).collect::<Vec<f64>>();

    PortfolioStatistics {
      expected_returns: pick(&self.expected_returns),
      covariance: indices
        .iter()
        .map(|&i| pick(&self.covariance[i]))
        .collect(),
      fee_penalties: pick(&self.fee_penalties),
      liquidity_penalties: pick(&self.liquidity_penalties),
      region_matrix: self.region_matrix.iter().map(|row| pick(row)).collect(),
      exclusion_matrix: self.exclusion_matrix.iter().map(|row| pick(row)).collect(),
      exclusions: self.exclusions.clone(),
      shrinkage: self.shrinkage,
    }
  }
}

/// Blend the sample covariance with its constant-correlation target.
pub fn shrink_covariance(sample: &[Vec<f64>], intensity: f64) -> (Vec<Vec<f64>>, ShrinkageSummary) {
  let n = sample.len();
  let theta = intensity.clamp(0.0, 1.0);
  let avg_variance = if n == 0 {
    0.0
  } else {
    (0..n).map(|i| sample[i][i]).sum::<f64>() / n as f64
  };
  let avg_correlation = average_correlation(sample);

  let mut shrunk = vec![vec![0.0; n]; n];
  for i in 0..n {
    for j in 0..n {
      let target = if i == j {
        sample[i][i]
      } else {
        avg_correlation * (sample[i][i].max(0.0) * sample[j][j].max(0.0)).sqrt()
      };
      shrunk[i][j] = theta * target + (1.0 - theta) * sample[i][j];
    }
  }

  let summary = ShrinkageSummary {
    avg_variance,
    avg_correlation,
    intensity: theta,
    observations: 0,
  };
  (shrunk, summary)
}

/// Shrink per-fund means toward the cross-sectional grand mean.
pub fn shrink_expected_returns(means: &[f64], intensity: f64) -> Vec<f64> {
  let theta = intensity.clamp(0.0, 1.0);
  let grand_mean = sample_mean(means);
  means
    .iter()
    .map(|&m| theta * grand_mean + (1.0 - theta) * m)
    .collect()
}

/// Illiquidity score: average of an AUM penalty and a spread penalty.
///
/// `aum` is in EUR millions, so the AUM penalty vanishes at 10bn.
pub fn liquidity_penalty(aum: f64, avg_spread: f64) -> f64 {
  let aum_penalty = (1.0 - (aum.max(0.0) + 1.0).ln() / 10_000f64.ln()).max(0.0);
  let spread_penalty = avg_spread.max(0.0) * 100.0;
  0.5 * aum_penalty + 0.5 * spread_penalty
}

pub fn region_matrix(funds: &[FundRecord]) -> Vec<Vec<f64>> {
  Region::ALL
    .iter()
    .map(|&r| funds.iter().map(|f| f.region(r)).collect())
    .collect()
}

/// One row per requested category; empty when nothing is excluded.
pub fn exclusion_matrix(funds: &[FundRecord], exclusions: &[IndustryExclusion]) -> Vec<Vec<f64>> {
  exclusions
    .iter()
    .map(|&e| funds.iter().map(|f| f.industry(e)).collect())
    .collect()
}

/// Estimate optimizer inputs for an already filtered universe.
pub fn estimate_statistics(
  funds: &[FundRecord],
  exclusions: &[IndustryExclusion],
  config: &EstimatorConfig,
) -> Result<PortfolioStatistics> {
  let series: Vec<Vec<f64>> = funds.iter().map(|f| f.monthly_returns.clone()).collect();
  let aligned = align_return_series(&series);
  let observations = aligned.first().map(|r| r.len()).unwrap_or(0);

  let sample = covariance_matrix(&aligned);
  let (shrunk, mut shrinkage) = shrink_covariance(&sample, config.covariance_shrinkage);
  shrinkage.observations = observations;

  let periods = config.periods_per_year;
  let covariance: Vec<Vec<f64>> = shrunk
    .iter()
    .map(|row| row.iter().map(|&c| c * periods).collect())
    .collect();

  let means: Vec<f64> = aligned.iter().map(|r| sample_mean(r)).collect();
  let expected_returns: Vec<f64> = shrink_expected_returns(&means, config.return_shrinkage)
    .into_iter()
    .map(|m| m * periods)
    .collect();

  let stats = PortfolioStatistics {
    expected_returns,
    covariance,
    fee_penalties: funds.iter().map(|f| f.ter).collect(),
    liquidity_penalties: funds
      .iter()
      .map(|f| liquidity_penalty(f.aum, f.avg_spread))
      .collect(),
    region_matrix: region_matrix(funds),
    exclusion_matrix: exclusion_matrix(funds, exclusions),
    exclusions: exclusions.to_vec(),
    shrinkage,
  };
  stats.validate()?;

  debug!(
    funds = stats.len(),
    observations,
    avg_correlation = shrinkage.avg_correlation,
    "estimated portfolio statistics"
  );
  Ok(stats)
}
