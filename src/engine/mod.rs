//! Core backtesting engine.
//!
//! This module provides the fundamental types for a zone retest backtest:
//! - `CandidateEntry` / `HistoricalTrade` / `VolumeNode`: inputs of a run.
//! - `ExitStrategy`: resolves a candidate into a trade.
//! - `KellyParams`: position sizing fraction.
//! - `Wallet`: free cash and deployed capital.
//! - `Backtest`: the event-driven, capital-constrained simulator.

mod candidate;
mod exit;
mod kelly;
mod position;
mod wallet;

use std::collections::BTreeMap;

use crate::config::{BacktestConfig, SizingBase};
use crate::errors::Result;
use crate::metrics::{BacktestResult, EquityPoint};

use chrono::{DateTime, Utc};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use candidate::*;
pub use exit::*;
pub use kelly::*;
pub use position::*;
pub use wallet::*;

#[cfg(test)]
mod scenarios;

/// Counters explaining why candidates did not become trades.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Diagnostics {
    /// Candidates (or historical trades) handed to the run.
    pub candidates: usize,
    /// Candidates turned into trades by the exit policy.
    pub resolved: usize,
    /// Rejected by the zone type, timeframe or window filters.
    pub skipped_filtered: usize,
    /// Missing forward prices.
    pub skipped_no_data: usize,
    /// No volume node beyond the entry.
    pub skipped_no_target: usize,
    /// Non-positive distance from entry to stop.
    pub skipped_invalid_risk: usize,
    /// Entry arrived with every position slot taken.
    pub skipped_max_positions: usize,
    /// Position cost exceeded the free cash.
    pub skipped_no_capital: usize,
    /// Zero shares or a commitment below the minimum position capital.
    pub skipped_too_small: usize,
    /// Same symbol and zone already open.
    pub skipped_duplicate: usize,
    /// Highest number of positions open at once.
    pub max_open_positions: usize,
    /// Lowest free cash observed during the run.
    pub min_available_cash: f64,
}

impl Diagnostics {
    fn record_skip(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::NoForwardData => self.skipped_no_data += 1,
            SkipReason::NoQualifyingTarget => self.skipped_no_target += 1,
            SkipReason::NonPositiveRisk => self.skipped_invalid_risk += 1,
        }
    }
}

// Exits sort before entries at the same instant; a trade that exits on its
// own entry instant must still be opened first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EventKind {
    Exit,
    Entry,
    SameInstantExit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Event {
    time: DateTime<Utc>,
    kind: EventKind,
    index: usize,
}

/// Event-driven portfolio simulator for one run.
///
/// Owns the cash ledger and the open positions; a run is single-threaded and
/// deterministic. Build it with [`Backtest::new`] and consume it with
/// [`Backtest::run`], or call [`run_backtest`] directly.
#[derive(Debug)]
pub struct Backtest {
    config: BacktestConfig,
    wallet: Wallet,
    kelly: KellyParams,
    sizing_fraction: f64,
    trades: Vec<ResolvedTrade>,
    positions: BTreeMap<usize, Position>,
    closed: Vec<ClosedTrade>,
    equity_curve: Vec<EquityPoint>,
    diagnostics: Diagnostics,
}

impl std::ops::Deref for Backtest {
    type Target = Wallet;

    fn deref(&self) -> &Self::Target {
        &self.wallet
    }
}

impl Backtest {
    /// Validates the config and resolves every candidate of the dataset.
    ///
    /// ### Arguments
    /// * `dataset` - Candidates, historical trades and volume nodes.
    /// * `config` - Run parameters.
    ///
    /// ### Returns
    /// The simulator ready to run, or the configuration error.
    pub fn new(dataset: &Dataset, config: BacktestConfig) -> Result<Self> {
        config.validate()?;

        let strategy = config.exit_strategy;
        let nodes = VolumeNodes::new(&dataset.volume_nodes);
        let setups: Vec<Setup<'_>> = if strategy.is_replay() {
            dataset.trades.iter().map(Setup::Replay).collect()
        } else {
            dataset.candidates.iter().map(Setup::Zone).collect()
        };

        let mut diagnostics = Diagnostics {
            candidates: setups.len(),
            min_available_cash: config.initial_capital,
            ..Default::default()
        };
        let mut trades = Vec::with_capacity(setups.len());

        for setup in setups {
            if !config.accepts(setup.zone_type(), setup.timeframe_id()) {
                diagnostics.skipped_filtered += 1;
                continue;
            }
            match strategy.resolve(setup, &nodes) {
                Ok(trade) if config.window_end.is_some_and(|end| trade.entry_time > end) => {
                    diagnostics.skipped_filtered += 1;
                }
                Ok(trade) => trades.push(trade),
                Err(reason) => {
                    debug!(symbol = setup.symbol(), zone_id = setup.zone_id(), ?reason, "candidate skipped");
                    diagnostics.record_skip(reason);
                }
            }
        }
        diagnostics.resolved = trades.len();

        // stable: equal keys keep input order
        trades.sort_by(|a, b| {
            a.entry_time
                .cmp(&b.entry_time)
                .then_with(|| a.symbol.cmp(&b.symbol))
                .then_with(|| a.zone_id.cmp(&b.zone_id))
        });

        let estimate = KellyParams::estimate(trades.iter().filter_map(ResolvedTrade::r_multiple));
        let kelly = if estimate.num_trades >= config.kelly_min_trades {
            estimate
        } else {
            debug!(outcomes = estimate.num_trades, "too few outcomes, neutral kelly");
            KellyParams::default()
        };
        let sizing_fraction = kelly.sizing_fraction(config.min_half_kelly);

        Ok(Self {
            wallet: Wallet::new(config.initial_capital)?,
            kelly,
            sizing_fraction,
            positions: BTreeMap::new(),
            closed: Vec::with_capacity(trades.len()),
            equity_curve: Vec::with_capacity(trades.len() + 1),
            trades,
            diagnostics,
            config,
        })
    }

    /// Returns the run parameters.
    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Returns the Kelly parameters used for sizing.
    pub fn kelly(&self) -> &KellyParams {
        &self.kelly
    }

    /// Returns the fraction of the sizing base committed per position.
    pub fn sizing_fraction(&self) -> f64 {
        self.sizing_fraction
    }

    /// Returns the resolved trades in processing order.
    pub fn trades(&self) -> std::slice::Iter<'_, ResolvedTrade> {
        self.trades.iter()
    }

    /// Returns an iterator over the open positions.
    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// Returns the counters collected so far.
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Runs the simulation to completion and aggregates the result.
    pub fn run(mut self) -> Result<BacktestResult> {
        let events = self.events();
        let window_end = self.config.window_end;

        if let Some(first) = events.first() {
            self.equity_curve.push(EquityPoint {
                time: first.time,
                equity: self.wallet.initial_balance(),
            });
        }

        for event in &events {
            match event.kind {
                EventKind::Entry => self.open_position(event.index)?,
                EventKind::Exit | EventKind::SameInstantExit => self.close_position(event.index)?,
            }
        }

        if let Some(end) = window_end.or(events.last().map(|event| event.time)) {
            self.force_close_all(end)?;
        }

        info!(
            trades = self.closed.len(),
            skipped_max_positions = self.diagnostics.skipped_max_positions,
            skipped_no_capital = self.diagnostics.skipped_no_capital,
            final_cash = self.wallet.balance(),
            "backtest finished"
        );

        let annualization = self.config.annualization_factor();
        let mut result = BacktestResult::aggregate(
            self.closed,
            self.equity_curve,
            self.wallet.initial_balance(),
            self.wallet.balance(),
            self.kelly,
            annualization,
        );
        result.sizing_fraction = self.sizing_fraction;
        result.diagnostics = self.diagnostics;
        Ok(result)
    }

    fn events(&self) -> Vec<Event> {
        let window_end = self.config.window_end;
        let mut events = Vec::with_capacity(self.trades.len() * 2);

        for (index, trade) in self.trades.iter().enumerate() {
            events.push(Event {
                time: trade.entry_time,
                kind: EventKind::Entry,
                index,
            });
            let Some(exit) = trade.exit else { continue };
            if window_end.is_some_and(|end| exit.exit_time > end) {
                continue;
            }
            let kind = if exit.exit_time == trade.entry_time {
                EventKind::SameInstantExit
            } else {
                EventKind::Exit
            };
            events.push(Event {
                time: exit.exit_time,
                kind,
                index,
            });
        }

        events.sort();
        events
    }

    fn open_position(&mut self, index: usize) -> Result<()> {
        let trade = &self.trades[index];

        if self.positions.len() >= self.config.max_positions {
            debug!(symbol = %trade.symbol, zone_id = trade.zone_id, "max positions reached");
            self.diagnostics.skipped_max_positions += 1;
            return Ok(());
        }

        let duplicate = self
            .positions
            .values()
            .any(|position| position.symbol() == trade.symbol && position.zone_id() == trade.zone_id);
        if duplicate {
            warn!(symbol = %trade.symbol, zone_id = trade.zone_id, "zone already open");
            self.diagnostics.skipped_duplicate += 1;
            return Ok(());
        }

        let base = match self.config.sizing_base() {
            SizingBase::Equity => self.wallet.equity(),
            SizingBase::AvailableCash => self.wallet.balance(),
        };
        let shares = (self.sizing_fraction * base / trade.entry_price).floor();
        if shares < 1.0 {
            debug!(symbol = %trade.symbol, base, "position rounds to zero shares");
            self.diagnostics.skipped_too_small += 1;
            return Ok(());
        }

        let cost = shares * trade.entry_price;
        if cost > self.wallet.balance() {
            debug!(symbol = %trade.symbol, cost, cash = self.wallet.balance(), "not enough cash");
            self.diagnostics.skipped_no_capital += 1;
            return Ok(());
        }
        if cost < self.config.min_position_capital {
            debug!(symbol = %trade.symbol, cost, "position below minimum capital");
            self.diagnostics.skipped_too_small += 1;
            return Ok(());
        }

        let position = Position::from((trade, shares as u64));
        let cash = self.wallet.deploy(position.capital_deployed())?;
        self.positions.insert(index, position);

        self.diagnostics.min_available_cash = self.diagnostics.min_available_cash.min(cash);
        self.diagnostics.max_open_positions = self.diagnostics.max_open_positions.max(self.positions.len());
        Ok(())
    }

    fn close_position(&mut self, index: usize) -> Result<()> {
        let Some(exit) = self.trades[index].exit else {
            return Ok(());
        };
        // skipped at entry
        let Some(position) = self.positions.remove(&index) else {
            return Ok(());
        };

        let trade = position.close(&exit);
        self.settle(&trade)?;
        self.equity_curve.push(EquityPoint {
            time: trade.exit_time,
            equity: self.wallet.equity(),
        });
        self.closed.push(trade);
        Ok(())
    }

    fn settle(&mut self, trade: &ClosedTrade) -> Result<()> {
        let cash = self.wallet.release(trade.capital_deployed, trade.pnl)?;
        self.diagnostics.min_available_cash = self.diagnostics.min_available_cash.min(cash);
        Ok(())
    }

    fn force_close_all(&mut self, at: DateTime<Utc>) -> Result<()> {
        let positions = std::mem::take(&mut self.positions);
        for position in positions.into_values() {
            debug!(symbol = position.symbol(), zone_id = position.zone_id(), "forced close at end of window");
            let at = at.max(position.entry_time());
            let trade = position.force_close(at);
            self.settle(&trade)?;
            self.equity_curve.push(EquityPoint {
                time: trade.exit_time,
                equity: self.wallet.equity(),
            });
            self.closed.push(trade);
        }
        Ok(())
    }
}

/// Runs one backtest over `dataset` with `config`.
///
/// The only error is a rejected configuration; candidates that cannot be
/// resolved or do not fit the portfolio are skipped and counted in
/// [`BacktestResult::diagnostics`].
pub fn run_backtest(dataset: &Dataset, config: &BacktestConfig) -> Result<BacktestResult> {
    Backtest::new(dataset, config.clone())?.run()
}
