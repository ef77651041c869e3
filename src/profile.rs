//! # Risk Profile Mapper
//!
//! $$
//! s = 0.4\,t + 0.3\,c + 0.2\,h + 0.1\,e,\qquad
//! \sigma^\* = 0.05 + 0.15\,\tfrac{s}{100},\qquad
//! \lambda = 2\left(1-\tfrac{s}{100}\right) + 0.5
//! $$
//!
//! Maps a 0–100 investor profile to optimizer parameters. Questionnaire labels
//! that cannot be mapped fall back to a neutral score and are reported back.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::types::IndustryExclusion;
use crate::types::OptimizationParams;
use crate::types::Region;
use crate::types::RiskProfileInputs;

/// Score used for any categorical answer that has no lookup entry.
pub const NEUTRAL_SCORE: f64 = 50.0;

const MIN_ETFS: usize = 3;
const MAX_ETFS: usize = 12;

/// Constants of the mapping that are not derived from the profile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
  pub fee_penalty: f64,
  pub region_penalty: f64,
  pub liquidity_penalty: f64,
  pub exclusion_threshold: f64,
  pub min_weight: f64,
  /// Minimum position size granted to experienced investors.
  pub experienced_min_weight: f64,
  pub max_weight: f64,
}

impl Default for MapperConfig {
  fn default() -> Self {
    Self {
      fee_penalty: 1.0,
      region_penalty: 0.1,
      liquidity_penalty: 0.01,
      exclusion_threshold: 0.005,
      min_weight: 0.02,
      experienced_min_weight: 0.01,
      max_weight: 0.4,
    }
  }
}

/// Weighted composite risk score, clamped to `[0, 100]`.
pub fn compute_risk_score(inputs: &RiskProfileInputs) -> f64 {
  let score = 0.40 * inputs.risk_tolerance
    + 0.30 * inputs.risk_capacity
    + 0.20 * inputs.investment_horizon
    + 0.10 * inputs.investor_experience;
  clamp_score(score)
}

/// Annualized volatility target, 5% at score 0 up to 20% at score 100.
pub fn compute_target_volatility(risk_score: f64) -> f64 {
  0.05 + 0.15 * clamp_score(risk_score) / 100.0
}

pub fn compute_max_etfs(experience_score: f64) -> usize {
  let raw = (3.0 + 7.0 * clamp_score(experience_score) / 100.0).round() as usize;
  raw.clamp(MIN_ETFS, MAX_ETFS)
}

/// Strictly decreasing in the risk score: 2.5 at 0, 0.5 at 100.
pub fn compute_risk_aversion(risk_score: f64) -> f64 {
  2.0 * (1.0 - clamp_score(risk_score) / 100.0) + 0.5
}

/// Equal weight over the selected regions, or a cap-weighted default when none are selected.
pub fn compute_target_region_mix(selected: &BTreeSet<Region>) -> BTreeMap<Region, f64> {
  if selected.is_empty() {
    return default_region_mix();
  }

  let share = 1.0 / selected.len() as f64;
  Region::ALL
    .into_iter()
    .map(|r| (r, if selected.contains(&r) { share } else { 0.0 }))
    .collect()
}

pub fn default_region_mix() -> BTreeMap<Region, f64> {
  BTreeMap::from([
    (Region::Us, 0.60),
    (Region::DevExUsEu, 0.15),
    (Region::EuExNl, 0.13),
    (Region::Em, 0.10),
    (Region::Nl, 0.02),
  ])
}

/// Bounded overrides for profiles at the edges of the scale.
pub fn adjust_params_for_edge_cases(
  mut params: OptimizationParams,
  inputs: &RiskProfileInputs,
  config: &MapperConfig,
) -> OptimizationParams {
  let risk_score = compute_risk_score(inputs);

  if risk_score < 30.0 && inputs.investment_horizon < 30.0 {
    params.target_volatility = params.target_volatility.min(0.08);
    params.risk_aversion = params.risk_aversion.max(2.0);
  }

  if inputs.investor_experience > 80.0 {
    params.max_etfs = (params.max_etfs + 2).min(MAX_ETFS);
    params.min_weight = config.experienced_min_weight;
  }

  match inputs.regions_selected.len() {
    0 => {}
    1 => params.region_penalty *= 2.0,
    n if n >= 4 => params.region_penalty *= 0.5,
    _ => {}
  }

  params
}

/// Full mapping from a normalized profile to optimizer parameters.
pub fn map_risk_profile(inputs: &RiskProfileInputs, config: &MapperConfig) -> OptimizationParams {
  let risk_score = compute_risk_score(inputs);
  let params = OptimizationParams {
    target_volatility: compute_target_volatility(risk_score),
    max_etfs: compute_max_etfs(inputs.investor_experience),
    risk_aversion: compute_risk_aversion(risk_score),
    fee_penalty: config.fee_penalty,
    region_penalty: config.region_penalty,
    liquidity_penalty: config.liquidity_penalty,
    target_region_mix: compute_target_region_mix(&inputs.regions_selected),
    industry_exclusions: inputs.industry_exclusions.iter().copied().collect(),
    exclusion_threshold: config.exclusion_threshold,
    min_weight: config.min_weight,
    max_weight: config.max_weight,
  };

  adjust_params_for_edge_cases(params, inputs, config)
}

fn clamp_score(score: f64) -> f64 {
  if score.is_nan() {
    NEUTRAL_SCORE
  } else {
    score.clamp(0.0, 100.0)
  }
}

/// Raw questionnaire answers as produced by the assessment front end.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssessmentAnswers {
  pub risk_tolerance: String,
  pub risk_capacity: String,
  pub investment_horizon: String,
  pub investor_experience: String,
  pub regions: Vec<String>,
  pub exclusions: Vec<String>,
}

/// A questionnaire answer that had no lookup entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnmappedInput {
  pub field: &'static str,
  pub value: String,
}

/// Result of [`map_answers`]: the inputs plus every answer that fell back to a default.
#[derive(Clone, Debug, PartialEq)]
pub struct ProfileMapping {
  pub inputs: RiskProfileInputs,
  pub unmapped: Vec<UnmappedInput>,
}

impl ProfileMapping {
  pub fn is_clean(&self) -> bool {
    self.unmapped.is_empty()
  }
}

const TOLERANCE_SCORES: &[(&str, f64)] = &[
  ("very_low", 10.0),
  ("low", 25.0),
  ("medium", 50.0),
  ("moderate", 50.0),
  ("high", 75.0),
  ("very_high", 90.0),
];

const CAPACITY_SCORES: &[(&str, f64)] = &[
  ("low", 25.0),
  ("medium", 50.0),
  ("high", 75.0),
];

const HORIZON_SCORES: &[(&str, f64)] = &[
  ("short", 20.0),
  ("less_than_3_years", 20.0),
  ("medium", 50.0),
  ("3_to_10_years", 50.0),
  ("long", 80.0),
  ("more_than_10_years", 80.0),
  ("very_long", 95.0),
];

const EXPERIENCE_SCORES: &[(&str, f64)] = &[
  ("none", 10.0),
  ("beginner", 25.0),
  ("intermediate", 50.0),
  ("advanced", 75.0),
  ("expert", 95.0),
];

fn lookup(
  table: &[(&str, f64)],
  field: &'static str,
  value: &str,
  unmapped: &mut Vec<UnmappedInput>,
) -> f64 {
  let key = value.trim().to_lowercase().replace([' ', '-'], "_");
  match table.iter().find(|(label, _)| *label == key) {
    Some((_, score)) => *score,
    None => {
      warn!(field, value, default = NEUTRAL_SCORE, "unmapped profile answer, using neutral score");
      unmapped.push(UnmappedInput {
        field,
        value: value.to_string(),
      });
      NEUTRAL_SCORE
    }
  }
}

/// Turn questionnaire labels into [`RiskProfileInputs`]. Never fails.
pub fn map_answers(answers: &AssessmentAnswers) -> ProfileMapping {
  let mut unmapped = Vec::new();

  let risk_tolerance = lookup(
    TOLERANCE_SCORES,
    "risk_tolerance",
    &answers.risk_tolerance,
    &mut unmapped,
  );
  let risk_capacity = lookup(
    CAPACITY_SCORES,
    "risk_capacity",
    &answers.risk_capacity,
    &mut unmapped,
  );
  let investment_horizon = lookup(
    HORIZON_SCORES,
    "investment_horizon",
    &answers.investment_horizon,
    &mut unmapped,
  );
  let investor_experience = lookup(
    EXPERIENCE_SCORES,
    "investor_experience",
    &answers.investor_experience,
    &mut unmapped,
  );

  let mut regions_selected = BTreeSet::new();
  for code in &answers.regions {
    match Region::parse(code) {
      Some(region) => {
        regions_selected.insert(region);
      }
      None => {
        warn!(value = %code, "unknown region code ignored");
        unmapped.push(UnmappedInput {
          field: "regions",
          value: code.clone(),
        });
      }
    }
  }

  let mut industry_exclusions = BTreeSet::new();
  for code in &answers.exclusions {
    match IndustryExclusion::parse(code) {
      Some(category) => {
        industry_exclusions.insert(category);
      }
      None => {
        warn!(value = %code, "unknown industry exclusion ignored");
        unmapped.push(UnmappedInput {
          field: "exclusions",
          value: code.clone(),
        });
      }
    }
  }

  ProfileMapping {
    inputs: RiskProfileInputs {
      risk_tolerance,
      risk_capacity,
      investment_horizon,
      investor_experience,
      regions_selected,
      industry_exclusions,
    },
    unmapped,
  }
}
