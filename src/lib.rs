//! # BTS Zones: BackTest Supply and Demand Zone Retests
//!
//! **BTS Zones** replays historical zone retests (a later touch of a support or
//! resistance band) through a capital-constrained portfolio and reports how the
//! strategy would have performed.
//!
//! ## Why BTS Zones?
//! - **One engine, four exits**: every exit policy feeds the same event loop and cash ledger.
//! - **Kelly sizing**: positions are sized with half-Kelly estimated from the run's own outcomes.
//! - **Deterministic**: the same candidates and config always produce the same result.
//! - **Parallel sweeps**: independent runs are spread across threads with `rayon`.
//!
//! ## Core Components
//! | Component   | Description                                                                                     |
//! |-------------|-------------------------------------------------------------------------------------------------|
//! | **`CandidateEntry`** | A zone retest with forward closes at fixed horizons (1, 2, 3, 5, 10, 20, 65 days...). |
//! | **`ExitStrategy`** | Resolves a candidate into a trade: holding period, stop/target, volume node or replay.    |
//! | **`KellyParams`** | Win rate, average win/loss R-multiples and the clamped Kelly fraction.                      |
//! | **`Wallet`** | Free cash and capital deployed in open positions.                                              |
//! | **`Backtest`** | The event-driven simulator: concurrency cap, capital checks, exit-before-entry ordering.     |
//! | **`Metrics`** | Drawdown, Sharpe ratio, profit factor, R-multiple and per-symbol breakdown.                   |
//! | **`Optimizer`** | Runs parameter combinations in parallel over one dataset.                                   |
//!
//! ## Exit Policies
//! | Policy               | Description                                                                                     |
//! |----------------------|-------------------------------------------------------------------------------------------------|
//! | **Holding period**   | Exit at the close exactly N days after entry.                                                   |
//! | **Stop/Target**      | Stop 1% beyond the zone, target at `min_risk_reward` times the risk; first breach wins.        |
//! | **Volume node**      | Same stop, target at the nearest HVN/POC more than 1% away from entry.                         |
//! | **Historical**       | Entry and exit already resolved upstream; replayed as independent events.                      |
//!
//! ## Getting Started
//! ```rust
//! use bts_zones::prelude::*;
//! use chrono::DateTime;
//!
//! let candidate = CandidateBuilder::builder()
//!     .symbol("AAPL")
//!     .zone_id(1)
//!     .zone_type(ZoneType::Demand)
//!     .entry_time(DateTime::from_timestamp(1_700_000_000, 0).unwrap())
//!     .entry_price(100.0)
//!     .zone(90.0, 95.0)
//!     .forward_close(5, 110.0)
//!     .build()
//!     .unwrap();
//!
//! let config = BacktestConfig {
//!     exit_strategy: ExitStrategy::HoldingPeriod { days: 5 },
//!     ..Default::default()
//! };
//!
//! let result = run_backtest(&Dataset::from_candidates(vec![candidate]), &config).unwrap();
//! assert_eq!(result.total_trades, 1);
//! println!("{result}");
//! ```
//!
//! ## Error Handling
//! Only configuration is fallible: an unknown strategy name, an unsupported
//! holding period or a non-positive capital is rejected before the run starts.
//! Candidates that cannot be resolved or that do not fit the portfolio are
//! skipped and counted in [`engine::Diagnostics`].
//!
//! ## License
//! MIT
#![warn(missing_docs)]

/// Core engine: candidates, exit resolution, Kelly sizing, wallet and simulator.
pub mod engine;

/// Error types for the library.
pub mod errors;

/// Run configuration and validation.
pub mod config;

/// Performance metrics: drawdown, Sharpe ratio, win rate, etc.
pub mod metrics;

/// Loading helpers.
#[cfg(feature = "serde")]
pub mod utils;

/// Strategy parameter optimization.
#[cfg(feature = "optimizer")]
pub mod optimizer;

/// Draw graphics with plotters backends: png, svg.
#[cfg(feature = "draws")]
pub mod draws;

/// Re-exports of commonly used types and traits for convenience.
pub mod prelude {
    pub use super::*;
    pub use crate::config::*;
    pub use crate::engine::*;
    pub use crate::errors::*;
    pub use crate::metrics::*;

    #[cfg(feature = "serde")]
    pub use crate::utils::*;

    #[cfg(feature = "optimizer")]
    pub use crate::optimizer::*;

    #[cfg(feature = "draws")]
    pub use crate::draws::*;
}

pub use engine::run_backtest;

use std::ops::{Add, Div, Mul, Sub};

/// Trait for performing percentage-based calculations.
///
/// This trait provides methods to add, subtract, and calculate percentages
/// for numeric types, enabling common financial calculations.
pub trait PercentCalculus<Rhs = Self> {
    /// Adds a percentage to the value.
    ///
    /// ### Arguments
    /// * `rhs` - The percentage to add (e.g., 10.0 for 10%).
    ///
    /// ### Returns
    /// The value increased by the given percentage.
    fn addpercent(self, rhs: Rhs) -> Self;

    /// Subtracts a percentage from the value.
    ///
    /// ### Arguments
    /// * `rhs` - The percentage to subtract (e.g., 10.0 for 10%).
    ///
    /// ### Returns
    /// The value decreased by the given percentage.
    fn subpercent(self, rhs: Rhs) -> Self;

    /// Calculates the absolute value of a percentage.
    ///
    /// ### Arguments
    /// * `percent` - The percentage to calculate (e.g., 10.0 for 10%).
    ///
    /// ### Returns
    /// The absolute value of the given percentage.
    fn how_many(self, percent: Self) -> Self;

    /// Calculates the percentage change between two values.
    ///
    /// ### Arguments
    /// * `new` - The new value to compare with.
    ///
    /// ### Returns
    /// The percentage change from the original value to the new value.
    fn change(self, new: Self) -> Self;

    /// Expresses `part` as a percentage of the value.
    fn portion(self, part: Self) -> Self;
}

impl PercentCalculus for f64 {
    fn addpercent(self, percent: Self) -> Self {
        self.add(self.mul(percent.div(100.0)))
    }

    fn subpercent(self, percent: Self) -> Self {
        self.sub(self.mul(percent.div(100.0)))
    }

    fn how_many(self, percent: Self) -> Self {
        percent.mul(self.div(100.0))
    }

    fn change(self, new: Self) -> Self {
        new.sub(self).div(self).mul(100.0)
    }

    fn portion(self, part: Self) -> Self {
        part.mul(100.0).div(self)
    }
}

#[cfg(test)]
mod percent {
    use super::*;

    #[test]
    fn add() {
        assert_eq!(110.0, 100.0.addpercent(10.0))
    }

    #[test]
    fn sub() {
        assert_eq!(90.0, 100.0.subpercent(10.0))
    }

    #[test]
    fn how_many() {
        assert_eq!(10.0, 100.0.how_many(10.0))
    }

    #[test]
    fn change() {
        assert_eq!(10.0, 100.0.change(110.0))
    }

    #[test]
    fn portion() {
        assert_eq!(25.0, 400.0.portion(100.0))
    }

    #[test]
    fn zone_buffer() {
        assert!((89.1 - 90.0.subpercent(1.0)).abs() < 1e-12);
        assert!((111.1 - 110.0.addpercent(1.0)).abs() < 1e-12);
    }
}
