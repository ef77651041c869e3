//! # etf-allocator
//!
//! $$
//! \max_{\mathbf w\in\Delta^n,\ \mathbf w\le\bar w}\ \mu^\top\mathbf w-\lambda\,\mathbf w^\top\Sigma\mathbf w-\text{penalties}
//! \quad\text{s.t.}\quad \sqrt{\mathbf w^\top\Sigma\mathbf w}\le\sigma^\*,\ \lVert\mathbf w\rVert_0\le K
//! $$
//!
//! Risk-profile driven ETF portfolio construction: profile mapping, universe
//! pre-filter, shrinkage estimation, constrained mean-variance optimization and
//! result packaging.

pub mod builder;
pub mod cache;
pub mod data;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod filter;
pub mod optimizers;
pub mod profile;
pub mod projection;
pub mod synthetic;
pub mod types;

pub use engine::optimize_portfolio;
pub use engine::EngineConfig;
pub use engine::PortfolioEngine;
pub use error::IneligibilityReason;
pub use error::PortfolioError;
pub use error::Result;
pub use types::FundRecord;
pub use types::IndustryExclusion;
pub use types::OptimizationParams;
pub use types::OptimizedPortfolio;
pub use types::Region;
pub use types::RiskProfileInputs;
