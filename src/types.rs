//! # Portfolio Types
//!
//! $$
//! \mathbf{w}\in\Delta^n,\quad \Delta^n=\{\mathbf{w}\ge 0,\ \mathbf{1}^\top\mathbf{w}=1\}
//! $$
//!
//! Fund records, investor inputs, optimization parameters and result containers.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt::Display;

use serde::Deserialize;
use serde::Serialize;

/// Geographic exposure buckets. The region matrix has one row per variant in [`Region::ALL`] order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Region {
  #[serde(rename = "NL")]
  Nl,
  #[serde(rename = "EU_EX_NL")]
  EuExNl,
  #[serde(rename = "US")]
  Us,
  #[serde(rename = "DEV_EX_US_EU")]
  DevExUsEu,
  #[serde(rename = "EM")]
  Em,
}

impl Region {
  pub const ALL: [Region; 5] = [
    Region::Nl,
    Region::EuExNl,
    Region::Us,
    Region::DevExUsEu,
    Region::Em,
  ];

  /// Canonical code used in catalogs and questionnaires.
  pub fn code(&self) -> &'static str {
    match self {
      Region::Nl => "NL",
      Region::EuExNl => "EU_EX_NL",
      Region::Us => "US",
      Region::DevExUsEu => "DEV_EX_US_EU",
      Region::Em => "EM",
    }
  }

  /// Parse a region code, case-insensitive. Returns `None` for unknown codes.
  pub fn parse(s: &str) -> Option<Self> {
    let code = s.trim().to_uppercase().replace(['-', ' '], "_");
    Region::ALL.into_iter().find(|r| r.code() == code)
  }

  /// Row index inside the region matrix.
  pub fn index(&self) -> usize {
    *self as usize
  }
}

impl Display for Region {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.code())
  }
}

/// Industry categories an investor may exclude.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndustryExclusion {
  Tobacco,
  FossilFuels,
  Weapons,
  Gambling,
  Alcohol,
  Nuclear,
}

impl IndustryExclusion {
  pub const ALL: [IndustryExclusion; 6] = [
    IndustryExclusion::Tobacco,
    IndustryExclusion::FossilFuels,
    IndustryExclusion::Weapons,
    IndustryExclusion::Gambling,
    IndustryExclusion::Alcohol,
    IndustryExclusion::Nuclear,
  ];

  pub fn code(&self) -> &'static str {
    match self {
      IndustryExclusion::Tobacco => "tobacco",
      IndustryExclusion::FossilFuels => "fossil_fuels",
      IndustryExclusion::Weapons => "weapons",
      IndustryExclusion::Gambling => "gambling",
      IndustryExclusion::Alcohol => "alcohol",
      IndustryExclusion::Nuclear => "nuclear",
    }
  }

  /// Parse an exclusion code, case-insensitive. Returns `None` for unknown codes.
  pub fn parse(s: &str) -> Option<Self> {
    let code = s.trim().to_lowercase().replace(['-', ' '], "_");
    IndustryExclusion::ALL
      .into_iter()
      .find(|e| e.code() == code)
  }
}

impl Display for IndustryExclusion {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.code())
  }
}

/// Immutable fund record as delivered by the fund catalog.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FundRecord {
  pub ticker: String,
  pub name: String,
  pub asset_class: String,
  /// Total expense ratio, annual fraction (0.002 = 0.20%).
  pub ter: f64,
  /// Average bid-ask spread as a fraction of price.
  pub avg_spread: f64,
  /// Assets under management in EUR millions.
  pub aum: f64,
  /// Average daily traded volume.
  #[serde(default)]
  pub avg_daily_volume: f64,
  /// Exposure per region, expected to sum to roughly 1. Missing regions count as 0.
  pub region_exposure: BTreeMap<Region, f64>,
  /// Sparse exposure to excludable industries. Missing categories count as 0.
  #[serde(default)]
  pub industry_exposure: BTreeMap<IndustryExclusion, f64>,
  pub esg_compliant: bool,
  /// Historical monthly simple returns, oldest first.
  pub monthly_returns: Vec<f64>,
}

impl FundRecord {
  pub fn region(&self, region: Region) -> f64 {
    self.region_exposure.get(&region).copied().unwrap_or(0.0)
  }

  pub fn industry(&self, category: IndustryExclusion) -> f64 {
    self.industry_exposure.get(&category).copied().unwrap_or(0.0)
  }
}

/// Normalized investor profile. Scores are on a 0–100 scale.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskProfileInputs {
  pub risk_tolerance: f64,
  pub risk_capacity: f64,
  pub investment_horizon: f64,
  pub investor_experience: f64,
  #[serde(default)]
  pub regions_selected: BTreeSet<Region>,
  #[serde(default)]
  pub industry_exclusions: BTreeSet<IndustryExclusion>,
}

/// Numeric inputs for the constrained optimizer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizationParams {
  /// Annualized volatility cap.
  pub target_volatility: f64,
  /// Maximum number of funds kept after cardinality reduction.
  pub max_etfs: usize,
  /// Weight of the variance term, > 0.
  pub risk_aversion: f64,
  pub fee_penalty: f64,
  pub region_penalty: f64,
  pub liquidity_penalty: f64,
  /// Non-negative target mix per region; need not sum to one.
  pub target_region_mix: BTreeMap<Region, f64>,
  /// Categories whose portfolio exposure is capped by `exclusion_threshold`.
  pub industry_exclusions: Vec<IndustryExclusion>,
  /// Portfolio-level exposure cap per excluded category (0.005 = 0.5%).
  pub exclusion_threshold: f64,
  pub min_weight: f64,
  pub max_weight: f64,
}

impl OptimizationParams {
  /// Target region mix as a dense vector in [`Region::ALL`] order.
  pub fn target_region_vector(&self) -> Vec<f64> {
    Region::ALL
      .iter()
      .map(|r| self.target_region_mix.get(r).copied().unwrap_or(0.0).max(0.0))
      .collect()
  }

  /// Upper bound usable on a support of `n` funds.
  ///
  /// The capped simplex is empty when `n * max_weight < 1`, in which case the bound
  /// is lifted to `1/n`.
  pub fn effective_max_weight(&self, n: usize) -> f64 {
    if n == 0 {
      return self.max_weight;
    }
    self.max_weight.max(1.0 / n as f64).min(1.0)
  }
}

/// Per-fund breakdown of the final allocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FundDetail {
  pub ticker: String,
  pub name: String,
  pub weight: f64,
  /// Contribution to portfolio expected return, `w_i * mu_i`.
  pub marginal_return: f64,
  /// Contribution to portfolio volatility, `w_i * (Sigma w)_i / sigma_p`.
  pub marginal_volatility: f64,
  /// Fund TER.
  pub fee: f64,
}

/// Constraints echoed back with the result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppliedConstraints {
  pub target_volatility: f64,
  pub max_etfs: usize,
  pub max_weight: f64,
  pub exclusion_threshold: f64,
  pub excluded_industries: Vec<IndustryExclusion>,
  /// Regions with a non-zero target weight.
  pub target_regions: Vec<Region>,
}

/// Observability data about the solve. Not meant for end users.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SolverDiagnostics {
  pub solver: String,
  pub iterations: usize,
  pub converged: bool,
  /// Whether the final weights passed the feasibility check.
  pub feasible: bool,
  pub candidates: usize,
}

/// Final allocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizedPortfolio {
  /// Selected tickers, by descending weight.
  pub tickers: Vec<String>,
  /// Weights aligned with `tickers`; they sum to one.
  pub weights: Vec<f64>,
  pub expected_return: f64,
  pub volatility: f64,
  pub sharpe_ratio: f64,
  pub region_exposure: BTreeMap<Region, f64>,
  /// Weighted TER of the allocation.
  pub total_fee: f64,
  pub constraints: AppliedConstraints,
  pub details: Vec<FundDetail>,
  /// Set when the solver did not converge or the constraints could not be fully met.
  pub approximate: bool,
  pub diagnostics: SolverDiagnostics,
}
