//! # Errors
//!
//! Fatal conditions of a portfolio construction run. Non-convergence and
//! unresolved constraint conflicts are not errors; they mark the result as approximate.

use std::fmt::Display;

use thiserror::Error;

use crate::types::IndustryExclusion;

/// Why no fund survived the eligibility stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IneligibilityReason {
  /// The caller passed an empty universe.
  EmptyUniverse,
  /// No fund has enough exposure to the selected regions.
  NoRegionMatch,
  /// Every remaining fund breaches a requested industry exclusion.
  IndustryExclusions,
  /// Every remaining fund is below the assets-under-management floor.
  InsufficientAum,
  /// Every remaining fund trades with a spread above the ceiling.
  WideSpreads,
  /// Every remaining fund has too short (or invalid) a return history.
  InsufficientHistory,
  /// Each remaining fund exceeds the portfolio exclusion threshold for this category.
  ExclusionUnsatisfiable(IndustryExclusion),
}

impl Display for IneligibilityReason {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      IneligibilityReason::EmptyUniverse => write!(f, "the fund universe is empty"),
      IneligibilityReason::NoRegionMatch => write!(f, "no funds match your selected regions"),
      IneligibilityReason::IndustryExclusions => {
        write!(f, "no funds satisfy your industry exclusions")
      }
      IneligibilityReason::InsufficientAum => write!(f, "no funds meet the minimum fund size"),
      IneligibilityReason::WideSpreads => write!(f, "no funds meet the trading cost limit"),
      IneligibilityReason::InsufficientHistory => {
        write!(f, "no funds have a sufficient return history")
      }
      IneligibilityReason::ExclusionUnsatisfiable(category) => write!(
        f,
        "every eligible fund holds too much {category} to build a compliant portfolio"
      ),
    }
  }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PortfolioError {
  #[error("cannot construct a portfolio under current constraints: {reason}")]
  NoEligibleFunds { reason: IneligibilityReason },

  #[error("dimension mismatch in {context}: expected {expected}, got {actual}")]
  DimensionMismatch {
    context: &'static str,
    expected: usize,
    actual: usize,
  },
}

impl PortfolioError {
  /// Reason code when the error is [`PortfolioError::NoEligibleFunds`].
  pub fn reason(&self) -> Option<IneligibilityReason> {
    match self {
      PortfolioError::NoEligibleFunds { reason } => Some(*reason),
      _ => None,
    }
  }
}

pub type Result<T> = std::result::Result<T, PortfolioError>;
