//! # Universe Pre-filter
//!
//! Hard eligibility rules applied before any statistics are estimated. A fund
//! rejected here never reaches the optimizer.
//!
//! Stages run in a fixed order (regions, industries, fund size, spread,
//! history) so that an empty result can be attributed to the stage that
//! removed the last candidate.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::error::IneligibilityReason;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::types::FundRecord;
use crate::types::IndustryExclusion;
use crate::types::Region;

/// Thresholds of the eligibility stages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
  /// A fund must reach this exposure in at least one selected region.
  pub min_region_exposure: f64,
  /// Non-ESG funds above this exposure to an excluded category are dropped.
  pub max_excluded_exposure: f64,
  /// Assets under management floor, EUR millions.
  pub min_aum: f64,
  /// Average bid-ask spread ceiling as a fraction.
  pub max_spread: f64,
  /// Minimum number of monthly observations.
  pub min_history: usize,
}

impl Default for FilterConfig {
  fn default() -> Self {
    Self {
      min_region_exposure: 0.10,
      max_excluded_exposure: 0.05,
      min_aum: 50.0,
      max_spread: 0.005,
      min_history: 36,
    }
  }
}

/// Number of funds removed by each stage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterReport {
  pub input: usize,
  pub region: usize,
  pub industry: usize,
  pub aum: usize,
  pub spread: usize,
  pub history: usize,
  pub retained: usize,
}

/// Eligible funds and the per-stage rejection counts.
#[derive(Clone, Debug)]
pub struct FilteredUniverse {
  pub funds: Vec<FundRecord>,
  pub report: FilterReport,
}

fn matches_regions(fund: &FundRecord, regions: &BTreeSet<Region>, min_exposure: f64) -> bool {
  regions.is_empty() || regions.iter().any(|r| fund.region(*r) >= min_exposure)
}

fn passes_exclusions(
  fund: &FundRecord,
  exclusions: &BTreeSet<IndustryExclusion>,
  max_exposure: f64,
) -> bool {
  fund.esg_compliant || exclusions.iter().all(|e| fund.industry(*e) <= max_exposure)
}

fn has_history(fund: &FundRecord, min_history: usize) -> bool {
  fund.monthly_returns.len() >= min_history && fund.monthly_returns.iter().all(|r| r.is_finite())
}

/// Apply `keep` to the surviving funds; returns how many were removed.
fn stage<F>(funds: &mut Vec<FundRecord>, keep: F) -> usize
where
  F: Fn(&FundRecord) -> bool,
{
  let before = funds.len();
  funds.retain(|f| keep(f));
  before - funds.len()
}

/// Drop funds that violate the hard eligibility rules.
///
/// Fails with [`PortfolioError::NoEligibleFunds`] carrying the stage that emptied the universe.
pub fn filter_etfs_by_constraints(
  funds: &[FundRecord],
  regions: &BTreeSet<Region>,
  exclusions: &BTreeSet<IndustryExclusion>,
  config: &FilterConfig,
) -> Result<FilteredUniverse> {
  let empty = |reason| PortfolioError::NoEligibleFunds { reason };

  if funds.is_empty() {
    return Err(empty(IneligibilityReason::EmptyUniverse));
  }

  let mut kept = funds.to_vec();
  let mut report = FilterReport {
    input: funds.len(),
    ..Default::default()
  };

  report.region = stage(&mut kept, |f| {
    matches_regions(f, regions, config.min_region_exposure)
  });
  if kept.is_empty() {
    return Err(empty(IneligibilityReason::NoRegionMatch));
  }

  report.industry = stage(&mut kept, |f| {
    passes_exclusions(f, exclusions, config.max_excluded_exposure)
  });
  if kept.is_empty() {
    return Err(empty(IneligibilityReason::IndustryExclusions));
  }

  report.aum = stage(&mut kept, |f| f.aum >= config.min_aum);
  if kept.is_empty() {
    return Err(empty(IneligibilityReason::InsufficientAum));
  }

  report.spread = stage(&mut kept, |f| f.avg_spread <= config.max_spread);
  if kept.is_empty() {
    return Err(empty(IneligibilityReason::WideSpreads));
  }

  report.history = stage(&mut kept, |f| has_history(f, config.min_history));
  if kept.is_empty() {
    return Err(empty(IneligibilityReason::InsufficientHistory));
  }

  report.retained = kept.len();
  debug!(?report, "pre-filter complete");

  Ok(FilteredUniverse {
    funds: kept,
    report,
  })
}
