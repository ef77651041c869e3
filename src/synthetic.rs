//! # Synthetic Universe
//!
//! $$
//! r_{i,t} = \frac{\mu_i}{12} + \frac{\sigma_i}{\sqrt{12}}\left(\beta_i Z_t + \sqrt{1-\beta_i^2}\,\varepsilon_{i,t}\right)
//! $$
//!
//! One-factor monthly return generator with an explicit seed. Each series is
//! re-centred so that its sample mean equals the requested monthly mean exactly.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use rand_distr::StandardNormal;

use crate::types::FundRecord;
use crate::types::IndustryExclusion;
use crate::types::Region;

/// Independent monthly returns with the given annualized mean and volatility.
pub fn generate_monthly_returns<R: Rng>(
  annual_return: f64,
  annual_volatility: f64,
  months: usize,
  rng: &mut R,
) -> Vec<f64> {
  let mean = annual_return / 12.0;
  let sd = annual_volatility / 12f64.sqrt();
  (0..months)
    .map(|_| mean + sd * rng.sample::<f64, _>(StandardNormal))
    .collect()
}

/// Blueprint of a synthetic fund.
#[derive(Clone, Debug)]
pub struct SyntheticFund {
  pub ticker: String,
  pub asset_class: String,
  pub annual_return: f64,
  pub annual_volatility: f64,
  /// Correlation with the common market factor, in `[-1, 1]`.
  pub market_loading: f64,
  pub ter: f64,
  pub avg_spread: f64,
  pub aum: f64,
  pub region_exposure: BTreeMap<Region, f64>,
  pub industry_exposure: BTreeMap<IndustryExclusion, f64>,
  pub esg_compliant: bool,
}

impl SyntheticFund {
  pub fn equity(ticker: &str, region_exposure: &[(Region, f64)]) -> Self {
    Self {
      ticker: ticker.to_string(),
      asset_class: "equity".to_string(),
      annual_return: 0.07,
      annual_volatility: 0.16,
      market_loading: 0.7,
      ter: 0.002,
      avg_spread: 0.001,
      aum: 2_000.0,
      region_exposure: region_exposure.iter().copied().collect(),
      industry_exposure: BTreeMap::new(),
      esg_compliant: false,
    }
  }

  pub fn bond(ticker: &str, region_exposure: &[(Region, f64)]) -> Self {
    Self {
      ticker: ticker.to_string(),
      asset_class: "fixed_income".to_string(),
      annual_return: 0.03,
      annual_volatility: 0.03,
      market_loading: 0.1,
      ter: 0.001,
      avg_spread: 0.0008,
      aum: 3_000.0,
      region_exposure: region_exposure.iter().copied().collect(),
      industry_exposure: BTreeMap::new(),
      esg_compliant: false,
    }
  }

  pub fn with_moments(mut self, annual_return: f64, annual_volatility: f64) -> Self {
    self.annual_return = annual_return;
    self.annual_volatility = annual_volatility;
    self
  }

  pub fn with_industry(mut self, category: IndustryExclusion, exposure: f64) -> Self {
    self.industry_exposure.insert(category, exposure);
    self
  }

  pub fn esg(mut self) -> Self {
    self.esg_compliant = true;
    self
  }
}

/// Draw `months` of returns for every blueprint from one seeded generator.
pub fn synthetic_universe(specs: &[SyntheticFund], months: usize, seed: u64) -> Vec<FundRecord> {
  let mut rng = StdRng::seed_from_u64(seed);
  let market: Vec<f64> = (0..months)
    .map(|_| rng.sample::<f64, _>(StandardNormal))
    .collect();

  specs
    .iter()
    .map(|spec| {
      let beta = spec.market_loading.clamp(-1.0, 1.0);
      let idio = (1.0 - beta * beta).sqrt();
      let mean = spec.annual_return / 12.0;
      let sd = spec.annual_volatility / 12f64.sqrt();

      let shocks: Vec<f64> = market
        .iter()
        .map(|z| beta * z + idio * rng.sample::<f64, _>(StandardNormal))
        .collect();
      let shock_mean = if months == 0 {
        0.0
      } else {
        shocks.iter().sum::<f64>() / months as f64
      };

      FundRecord {
        ticker: spec.ticker.clone(),
        name: format!("{} Synthetic UCITS ETF", spec.ticker),
        asset_class: spec.asset_class.clone(),
        ter: spec.ter,
        avg_spread: spec.avg_spread,
        aum: spec.aum,
        avg_daily_volume: spec.aum * 100.0,
        region_exposure: spec.region_exposure.clone(),
        industry_exposure: spec.industry_exposure.clone(),
        esg_compliant: spec.esg_compliant,
        monthly_returns: shocks
          .iter()
          .map(|s| mean + sd * (s - shock_mean))
          .collect(),
      }
    })
    .collect()
}

/// Blueprints of a mixed universe: every fifth fund is a bond fund, the rest
/// are regional or global equity funds.
pub fn demo_specs(n: usize) -> Vec<SyntheticFund> {
  let global = [
    (Region::Us, 0.6),
    (Region::DevExUsEu, 0.15),
    (Region::EuExNl, 0.13),
    (Region::Em, 0.1),
    (Region::Nl, 0.02),
  ];

  (0..n)
    .map(|i| {
      let tilt = (i % 7) as f64 * 0.005;
      match i % 5 {
        0 => SyntheticFund::bond(&format!("BND{i:02}"), &[(Region::EuExNl, 0.7), (Region::Nl, 0.3)])
          .with_moments(0.025 + tilt * 0.5, 0.03 + tilt),
        1 => SyntheticFund::equity(&format!("USA{i:02}"), &[(Region::Us, 1.0)])
          .with_moments(0.07 + tilt, 0.16 + tilt),
        2 => SyntheticFund::equity(&format!("WLD{i:02}"), &global).with_moments(0.065 + tilt, 0.15),
        3 => {
          SyntheticFund::equity(&format!("EUR{i:02}"), &[(Region::EuExNl, 0.9), (Region::Nl, 0.1)])
            .with_moments(0.06 + tilt, 0.17)
        }
        _ => SyntheticFund::equity(&format!("EMK{i:02}"), &[(Region::Em, 1.0)])
          .with_moments(0.08 + tilt, 0.2 + tilt),
      }
    })
    .collect()
}

/// Seeded `n`-fund universe with ten years of monthly history.
pub fn demo_universe(n: usize, seed: u64) -> Vec<FundRecord> {
  synthetic_universe(&demo_specs(n), 120, seed)
}
