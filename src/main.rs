use std::fs;
use std::path::Path;
use std::path::PathBuf;

use anyhow::bail;
use anyhow::Context;
use clap::Parser;
use etf_allocator::engine::EngineRun;
use etf_allocator::optimizers::SolverKind;
use etf_allocator::profile::map_answers;
use etf_allocator::profile::AssessmentAnswers;
use etf_allocator::synthetic::demo_universe;
use etf_allocator::EngineConfig;
use etf_allocator::FundRecord;
use etf_allocator::IndustryExclusion;
use etf_allocator::PortfolioEngine;
use etf_allocator::Region;
use etf_allocator::RiskProfileInputs;
use prettytable::row;
use prettytable::Table;
use serde::de::DeserializeOwned;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "etf-allocator")]
#[command(about = "Build a constrained ETF portfolio from a risk profile", long_about = None)]
struct Cli {
  /// JSON array of fund records
  #[arg(long, conflicts_with = "synthetic")]
  universe: Option<PathBuf>,

  /// Use a seeded synthetic universe of this many funds
  #[arg(long)]
  synthetic: Option<usize>,

  /// Seed of the synthetic universe
  #[arg(long, default_value_t = 42)]
  seed: u64,

  /// JSON file with normalized 0-100 profile scores
  #[arg(long, conflicts_with = "answers")]
  profile: Option<PathBuf>,

  /// JSON file with questionnaire labels
  #[arg(long)]
  answers: Option<PathBuf>,

  /// Industries to exclude, comma separated (e.g. tobacco,weapons)
  #[arg(long, value_delimiter = ',')]
  exclude: Vec<String>,

  /// Regions to select, comma separated (e.g. US,EM)
  #[arg(long, value_delimiter = ',')]
  regions: Vec<String>,

  /// JSON engine configuration; missing fields keep their defaults
  #[arg(long)]
  config: Option<PathBuf>,

  /// Solver backend (projected-gradient or nelder-mead)
  #[arg(long)]
  solver: Option<String>,

  /// Print the result as JSON
  #[arg(long)]
  json: bool,
}

fn load_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
  let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
  serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn neutral_profile() -> RiskProfileInputs {
  RiskProfileInputs {
    risk_tolerance: 50.0,
    risk_capacity: 50.0,
    investment_horizon: 50.0,
    investor_experience: 50.0,
    ..Default::default()
  }
}

fn load_profile(cli: &Cli) -> anyhow::Result<RiskProfileInputs> {
  let mut inputs = match (&cli.profile, &cli.answers) {
    (Some(path), _) => load_json::<RiskProfileInputs>(path)?,
    (None, Some(path)) => {
      let answers: AssessmentAnswers = load_json(path)?;
      let mapping = map_answers(&answers);
      if !mapping.is_clean() {
        info!(unmapped = mapping.unmapped.len(), "some answers fell back to defaults");
      }
      mapping.inputs
    }
    (None, None) => neutral_profile(),
  };

  for code in &cli.regions {
    match Region::parse(code) {
      Some(region) => {
        inputs.regions_selected.insert(region);
      }
      None => bail!("unknown region code '{code}'"),
    }
  }
  Ok(inputs)
}

fn load_universe(cli: &Cli) -> anyhow::Result<Vec<FundRecord>> {
  match &cli.universe {
    Some(path) => load_json(path),
    None => Ok(demo_universe(cli.synthetic.unwrap_or(20), cli.seed)),
  }
}

fn parse_exclusions(codes: &[String]) -> anyhow::Result<Vec<IndustryExclusion>> {
  codes
    .iter()
    .map(|code| {
      IndustryExclusion::parse(code).with_context(|| format!("unknown industry exclusion '{code}'"))
    })
    .collect()
}

fn print_run(run: &EngineRun) {
  let p = &run.portfolio;

  let mut funds = Table::new();
  funds.set_titles(row!["Ticker", "Name", "Weight", "TER", "Return contrib.", "Vol contrib."]);
  for d in &p.details {
    funds.add_row(row![
      d.ticker,
      d.name,
      format!("{:.2}%", d.weight * 100.0),
      format!("{:.2}%", d.fee * 100.0),
      format!("{:.2}%", d.marginal_return * 100.0),
      format!("{:.2}%", d.marginal_volatility * 100.0)
    ]);
  }
  funds.printstd();

  let mut summary = Table::new();
  summary.add_row(row!["Expected return", format!("{:.2}%", p.expected_return * 100.0)]);
  summary.add_row(row![
    "Volatility",
    format!(
      "{:.2}% (target {:.2}%)",
      p.volatility * 100.0,
      p.constraints.target_volatility * 100.0
    )
  ]);
  summary.add_row(row!["Sharpe ratio", format!("{:.3}", p.sharpe_ratio)]);
  summary.add_row(row!["Total fee", format!("{:.3}%", p.total_fee * 100.0)]);
  for (region, exposure) in &p.region_exposure {
    summary.add_row(row![format!("Region {region}"), format!("{:.1}%", exposure * 100.0)]);
  }
  summary.add_row(row![
    "Candidates",
    format!("{} of {}", run.filter_report.retained, run.filter_report.input)
  ]);
  summary.add_row(row![
    "Solver",
    format!(
      "{} ({} iterations{})",
      p.diagnostics.solver,
      p.diagnostics.iterations,
      if p.approximate { ", approximate" } else { "" }
    )
  ]);
  summary.printstd();
}

fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  let mut config: EngineConfig = match &cli.config {
    Some(path) => load_json(path)?,
    None => EngineConfig::default(),
  };
  if let Some(solver) = &cli.solver {
    config.optimizer.solver = SolverKind::from_str(solver);
  }

  let funds = load_universe(&cli)?;
  let inputs = load_profile(&cli)?;
  let exclusions = parse_exclusions(&cli.exclude)?;

  let engine = PortfolioEngine::new(config);
  let run = engine
    .run(&funds, &inputs, &exclusions)
    .context("portfolio construction failed")?;

  if cli.json {
    println!("{}", serde_json::to_string_pretty(&run.portfolio)?);
  } else {
    print_run(&run);
  }

  Ok(())
}
