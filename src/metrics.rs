//! Performance metrics for backtesting.
//!
//! This module provides tools to calculate:
//! - Max drawdown (absolute and percent of peak)
//! - Profit factor
//! - Sharpe ratio over per-trade returns
//! - Win rate and average R-multiple
//! - Per-symbol breakdown
//!
//! [`Metrics`] borrows a trade ledger and an equity curve and computes each
//! figure on demand; [`BacktestResult::aggregate`] snapshots all of them.

use std::collections::BTreeMap;
use std::fmt;

use crate::PercentCalculus;
use crate::engine::*;

use chrono::{DateTime, Utc};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Equity after a change of the ledger.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquityPoint {
    /// Moment of the change.
    pub time: DateTime<Utc>,
    /// Free cash plus deployed capital.
    pub equity: f64,
}

/// Trades of one symbol.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolStats {
    /// Symbol.
    pub symbol: String,
    /// Trades taken, forced closes included.
    pub trades: usize,
    /// Winning trades.
    pub wins: usize,
    /// `wins` over completed trades, in `[0, 1]`.
    pub win_rate: f64,
    /// Sum of P&L.
    pub total_pnl: f64,
}

/// Performance figures over a trade ledger and its equity curve.
#[derive(Debug, Clone, Copy)]
pub struct Metrics<'a> {
    trades: &'a [ClosedTrade],
    equity_curve: &'a [EquityPoint],
    initial_capital: f64,
}

impl<'a> Metrics<'a> {
    /// Creates a new `Metrics` view.
    pub fn new(trades: &'a [ClosedTrade], equity_curve: &'a [EquityPoint], initial_capital: f64) -> Self {
        Self {
            trades,
            equity_curve,
            initial_capital,
        }
    }

    /// Returns the trades that count toward win/loss statistics.
    pub fn completed(&self) -> impl Iterator<Item = &'a ClosedTrade> + use<'a> {
        self.trades.iter().filter(|trade| trade.is_completed())
    }

    /// Computes the maximum drawdown, in currency and in percent of the peak.
    ///
    /// The running peak starts at the initial capital.
    pub fn max_drawdown(&self) -> (f64, f64) {
        let mut peak = self.initial_capital;
        let mut max_drawdown = 0.0;
        let mut max_drawdown_pct = 0.0;

        for point in self.equity_curve {
            if point.equity > peak {
                peak = point.equity;
            }
            let drawdown = peak - point.equity;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
            }
            if peak > 0.0 {
                let drawdown_pct = peak.portion(drawdown);
                if drawdown_pct > max_drawdown_pct {
                    max_drawdown_pct = drawdown_pct;
                }
            }
        }

        (max_drawdown, max_drawdown_pct)
    }

    /// Computes the profit factor.
    ///
    /// Infinite when there are gains and no losses, zero when there are neither.
    pub fn profit_factor(&self) -> f64 {
        let mut total_gains = 0.0;
        let mut total_losses = 0.0;

        for trade in self.completed() {
            if trade.pnl > 0.0 {
                total_gains += trade.pnl;
            } else {
                total_losses += trade.pnl.abs();
            }
        }

        if total_losses == 0.0 {
            return if total_gains > 0.0 { f64::INFINITY } else { 0.0 };
        }

        total_gains / total_losses
    }

    /// Computes the Sharpe ratio over the per-trade percentage returns.
    ///
    /// `annualization_factor` scales the ratio by its square root. This is an
    /// approximation: returns are per trade, not per calendar period.
    /// Zero with fewer than two completed trades or no variance.
    pub fn sharpe_ratio(&self, annualization_factor: f64) -> f64 {
        let returns: Vec<f64> = self.completed().map(|trade| trade.pnl_pct).collect();
        if returns.len() < 2 {
            return 0.0;
        }

        let mean_return = returns.iter().sum::<f64>() / returns.len() as f64;
        let std_dev = (returns.iter().map(|r| (r - mean_return).powi(2)).sum::<f64>() / returns.len() as f64).sqrt();
        if std_dev == 0.0 || !std_dev.is_finite() {
            return 0.0;
        }

        mean_return / std_dev * annualization_factor.sqrt()
    }

    /// Computes the win rate as a fraction of completed trades.
    pub fn win_rate(&self) -> f64 {
        let mut winning_trades = 0;
        let mut total_trades = 0;

        for trade in self.completed() {
            total_trades += 1;
            if trade.is_win() {
                winning_trades += 1;
            }
        }

        if total_trades == 0 {
            return 0.0;
        }

        winning_trades as f64 / total_trades as f64
    }

    /// Mean R-multiple of completed trades.
    pub fn avg_r_multiple(&self) -> f64 {
        let (count, sum) = self
            .completed()
            .fold((0usize, 0.0), |(count, sum), trade| (count + 1, sum + trade.r_multiple));
        if count == 0 { 0.0 } else { sum / count as f64 }
    }

    /// Trades grouped by symbol, in symbol order.
    pub fn per_symbol(&self) -> Vec<SymbolStats> {
        let mut groups: BTreeMap<&str, SymbolStats> = BTreeMap::new();
        let mut completed: BTreeMap<&str, usize> = BTreeMap::new();

        for trade in self.trades {
            let stats = groups.entry(trade.symbol.as_str()).or_insert_with(|| SymbolStats {
                symbol: trade.symbol.clone(),
                trades: 0,
                wins: 0,
                win_rate: 0.0,
                total_pnl: 0.0,
            });
            stats.trades += 1;
            stats.total_pnl += trade.pnl;
            if trade.is_win() {
                stats.wins += 1;
            }
            if trade.is_completed() {
                *completed.entry(trade.symbol.as_str()).or_default() += 1;
            }
        }

        groups
            .into_iter()
            .map(|(symbol, mut stats)| {
                let done = completed.get(symbol).copied().unwrap_or_default();
                if done > 0 {
                    stats.win_rate = stats.wins as f64 / done as f64;
                }
                stats
            })
            .collect()
    }
}

/// Outcome of one backtest run.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestResult {
    /// Trades taken, forced closes included.
    pub total_trades: usize,
    /// Trades that reached their exit.
    pub completed_trades: usize,
    /// Completed trades with a profit.
    pub winning_trades: usize,
    /// Completed trades with a loss.
    pub losing_trades: usize,
    /// Completed trades closed flat.
    pub breakeven_trades: usize,
    /// Trades still open at the end of the window.
    pub forced_open_trades: usize,
    /// `winning_trades / completed_trades`.
    pub win_rate: f64,
    /// Sum of P&L.
    pub total_pnl: f64,
    /// Mean P&L per completed trade.
    pub avg_pnl: f64,
    /// Gains over losses.
    pub profit_factor: f64,
    /// Largest peak-to-trough equity decline.
    pub max_drawdown: f64,
    /// `max_drawdown` in percent of its peak.
    pub max_drawdown_pct: f64,
    /// Annualized Sharpe ratio over per-trade returns.
    pub sharpe_ratio: f64,
    /// Mean R-multiple of completed trades.
    pub avg_r_multiple: f64,
    /// Starting cash.
    pub initial_capital: f64,
    /// Cash at the end of the run.
    pub final_capital: f64,
    /// Percent change from `initial_capital` to `final_capital`.
    pub total_return_pct: f64,
    /// Kelly parameters used for sizing.
    pub kelly: KellyParams,
    /// Fraction of the sizing base committed per position.
    pub sizing_fraction: f64,
    /// Factor used to annualize the Sharpe ratio.
    pub annualization_factor: f64,
    /// Per-symbol breakdown.
    pub per_symbol: Vec<SymbolStats>,
    /// Trade ledger in closing order.
    pub trades: Vec<ClosedTrade>,
    /// Equity after each ledger change.
    pub equity_curve: Vec<EquityPoint>,
    /// Skip counters of the run.
    pub diagnostics: Diagnostics,
}

impl BacktestResult {
    /// Aggregates a trade ledger and its equity curve.
    ///
    /// `sizing_fraction` is initialized from `kelly.half_kelly` and
    /// `diagnostics` is empty; the simulator fills both in.
    pub fn aggregate(
        trades: Vec<ClosedTrade>,
        equity_curve: Vec<EquityPoint>,
        initial_capital: f64,
        final_capital: f64,
        kelly: KellyParams,
        annualization_factor: f64,
    ) -> Self {
        let metrics = Metrics::new(&trades, &equity_curve, initial_capital);

        let (mut completed_trades, mut winning_trades, mut losing_trades, mut breakeven_trades) = (0, 0, 0, 0);
        let mut completed_pnl = 0.0;
        for trade in metrics.completed() {
            completed_trades += 1;
            completed_pnl += trade.pnl;
            match trade.status {
                TradeStatus::Win => winning_trades += 1,
                TradeStatus::Loss => losing_trades += 1,
                TradeStatus::Breakeven => breakeven_trades += 1,
                TradeStatus::ForcedOpenAtEnd => {}
            }
        }

        let total_pnl = trades.iter().map(|trade| trade.pnl).sum::<f64>();
        let (max_drawdown, max_drawdown_pct) = metrics.max_drawdown();

        Self {
            total_trades: trades.len(),
            completed_trades,
            winning_trades,
            losing_trades,
            breakeven_trades,
            forced_open_trades: trades.len() - completed_trades,
            win_rate: metrics.win_rate(),
            total_pnl,
            avg_pnl: if completed_trades > 0 {
                completed_pnl / completed_trades as f64
            } else {
                0.0
            },
            profit_factor: metrics.profit_factor(),
            max_drawdown,
            max_drawdown_pct,
            sharpe_ratio: metrics.sharpe_ratio(annualization_factor),
            avg_r_multiple: metrics.avg_r_multiple(),
            initial_capital,
            final_capital,
            total_return_pct: initial_capital.change(final_capital),
            kelly,
            sizing_fraction: kelly.half_kelly,
            annualization_factor,
            per_symbol: metrics.per_symbol(),
            trades,
            equity_curve,
            diagnostics: Diagnostics::default(),
        }
    }

    /// Returns a [`Metrics`] view over the ledger.
    pub fn metrics(&self) -> Metrics<'_> {
        Metrics::new(&self.trades, &self.equity_curve, self.initial_capital)
    }
}

impl fmt::Display for BacktestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Backtest Metrics ===")?;
        writeln!(f, "Initial Capital: {:.2}", self.initial_capital)?;
        writeln!(f, "Final Capital: {:.2}", self.final_capital)?;
        writeln!(f, "Total Return: {:.2}%", self.total_return_pct)?;
        writeln!(f, "Profit & Loss (P&L): {:.2}", self.total_pnl)?;
        #[allow(clippy::writeln_empty_string)]
        writeln!(f, "")?;
        writeln!(
            f,
            "Trades: {} ({} completed, {} forced open)",
            self.total_trades, self.completed_trades, self.forced_open_trades
        )?;
        writeln!(
            f,
            "Wins / Losses / Breakeven: {} / {} / {}",
            self.winning_trades, self.losing_trades, self.breakeven_trades
        )?;
        writeln!(f, "Win Rate: {:.2}%", self.win_rate * 100.0)?;
        writeln!(f, "Average R-multiple: {:.3}", self.avg_r_multiple)?;
        writeln!(f, "Max Drawdown: {:.2} ({:.2}%)", self.max_drawdown, self.max_drawdown_pct)?;
        writeln!(f, "Profit Factor: {:.2}", self.profit_factor)?;
        writeln!(
            f,
            "Sharpe Ratio (x sqrt({})): {:.2}",
            self.annualization_factor, self.sharpe_ratio
        )?;
        writeln!(
            f,
            "Sizing: {:.2}% (half-Kelly {:.2}%, {} outcomes)",
            self.sizing_fraction * 100.0,
            self.kelly.half_kelly * 100.0,
            self.kelly.num_trades
        )?;
        writeln!(
            f,
            "Skipped: {} max positions, {} no capital, {} too small, {} unresolved",
            self.diagnostics.skipped_max_positions,
            self.diagnostics.skipped_no_capital,
            self.diagnostics.skipped_too_small,
            self.diagnostics.skipped_no_data + self.diagnostics.skipped_no_target + self.diagnostics.skipped_invalid_risk
        )
    }
}

#[cfg(test)]
// Helper function to build a closed trade with a given P&L
fn create_trade(symbol: &str, pnl: f64, status: TradeStatus) -> ClosedTrade {
    let time = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    ClosedTrade {
        symbol: symbol.to_string(),
        zone_id: 1,
        zone_type: ZoneType::Demand,
        side: PositionSide::Long,
        shares: 10,
        capital_deployed: 1000.0,
        entry_price: 100.0,
        stop_price: 95.0,
        target_price: None,
        entry_time: time,
        exit_time: time,
        exit_price: 100.0 + pnl / 10.0,
        exit_reason: None,
        days_held: Some(1),
        pnl,
        pnl_pct: 1000.0.portion(pnl),
        r_multiple: pnl / 50.0,
        status,
    }
}

#[cfg(test)]
fn curve(values: &[f64]) -> Vec<EquityPoint> {
    values
        .iter()
        .enumerate()
        .map(|(i, equity)| EquityPoint {
            time: DateTime::from_timestamp(1_700_000_000 + i as i64 * 86_400, 0).unwrap(),
            equity: *equity,
        })
        .collect()
}

#[cfg(test)]
#[test]
fn max_drawdown() {
    let equity_curve = curve(&[10000.0, 12000.0, 9000.0, 11000.0]);
    let metrics = Metrics::new(&[], &equity_curve, 10000.0);
    let (absolute, pct) = metrics.max_drawdown();
    assert_eq!(absolute, 3000.0);
    assert_eq!(pct, 25.0); // (12000 - 9000) / 12000 = 25%
}

#[cfg(test)]
#[test]
fn max_drawdown_from_initial_capital() {
    let equity_curve = curve(&[9500.0, 9800.0]);
    let metrics = Metrics::new(&[], &equity_curve, 10000.0);
    assert_eq!(metrics.max_drawdown(), (500.0, 5.0));
}

#[cfg(test)]
#[test]
fn max_drawdown_no_events() {
    let metrics = Metrics::new(&[], &[], 10000.0);
    assert_eq!(metrics.max_drawdown(), (0.0, 0.0)); // No drawdown if no events
}

#[cfg(test)]
#[test]
fn profit_factor() {
    let trades = vec![
        create_trade("AAPL", 20.0, TradeStatus::Win),
        create_trade("AAPL", -10.0, TradeStatus::Loss),
    ];
    let metrics = Metrics::new(&trades, &[], 10000.0);
    assert_eq!(metrics.profit_factor(), 2.0); // 20 / 10 = 2.0
}

#[cfg(test)]
#[test]
fn profit_factor_no_losses() {
    let trades = vec![create_trade("AAPL", 20.0, TradeStatus::Win)];
    let metrics = Metrics::new(&trades, &[], 10000.0);
    assert_eq!(metrics.profit_factor(), f64::INFINITY); // No losses
}

#[cfg(test)]
#[test]
fn profit_factor_no_trades() {
    let metrics = Metrics::new(&[], &[], 10000.0);
    assert_eq!(metrics.profit_factor(), 0.0); // No gains either
}

#[cfg(test)]
#[test]
fn sharpe_ratio() {
    let trades = vec![
        create_trade("AAPL", 50.0, TradeStatus::Win),
        create_trade("AAPL", -20.0, TradeStatus::Loss),
        create_trade("AAPL", 40.0, TradeStatus::Win),
    ];
    let metrics = Metrics::new(&trades, &[], 10000.0);
    // returns 5%, -2%, 4%: mean 2.333, population std 3.091
    let expected = (7.0 / 3.0) / (86.0f64 / 9.0).sqrt() * 52.0f64.sqrt();
    assert!((metrics.sharpe_ratio(52.0) - expected).abs() < 1e-9);
    assert!(metrics.sharpe_ratio(252.0) > metrics.sharpe_ratio(52.0));
}

#[cfg(test)]
#[test]
fn sharpe_ratio_degenerate() {
    let metrics = Metrics::new(&[], &[], 10000.0);
    assert_eq!(metrics.sharpe_ratio(52.0), 0.0);

    let trades = vec![create_trade("AAPL", 10.0, TradeStatus::Win); 3];
    let metrics = Metrics::new(&trades, &[], 10000.0);
    assert_eq!(metrics.sharpe_ratio(52.0), 0.0); // no variance
}

#[cfg(test)]
#[test]
fn win_rate() {
    let trades = vec![
        create_trade("AAPL", 20.0, TradeStatus::Win),
        create_trade("AAPL", -10.0, TradeStatus::Loss),
        create_trade("AAPL", 0.0, TradeStatus::ForcedOpenAtEnd),
    ];
    let metrics = Metrics::new(&trades, &[], 10000.0);
    assert_eq!(metrics.win_rate(), 0.5); // forced close excluded
}

#[cfg(test)]
#[test]
fn win_rate_no_trades() {
    let metrics = Metrics::new(&[], &[], 10000.0);
    assert_eq!(metrics.win_rate(), 0.0); // No trades
}

#[cfg(test)]
#[test]
fn per_symbol_breakdown() {
    let trades = vec![
        create_trade("MSFT", 20.0, TradeStatus::Win),
        create_trade("AAPL", -10.0, TradeStatus::Loss),
        create_trade("MSFT", -5.0, TradeStatus::Loss),
        create_trade("MSFT", 0.0, TradeStatus::ForcedOpenAtEnd),
    ];
    let stats = Metrics::new(&trades, &[], 10000.0).per_symbol();
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].symbol, "AAPL");
    assert_eq!(stats[0].wins, 0);
    assert_eq!(stats[1].symbol, "MSFT");
    assert_eq!(stats[1].trades, 3);
    assert_eq!(stats[1].wins, 1);
    assert_eq!(stats[1].win_rate, 0.5);
    assert_eq!(stats[1].total_pnl, 15.0);
}

#[cfg(test)]
#[test]
fn aggregate_counts() {
    let trades = vec![
        create_trade("AAPL", 30.0, TradeStatus::Win),
        create_trade("AAPL", -10.0, TradeStatus::Loss),
        create_trade("AAPL", 0.0, TradeStatus::Breakeven),
        create_trade("AAPL", 0.0, TradeStatus::ForcedOpenAtEnd),
    ];
    let equity_curve = curve(&[10000.0, 10030.0, 10020.0, 10020.0, 10020.0]);
    let result = BacktestResult::aggregate(trades, equity_curve, 10000.0, 10020.0, KellyParams::default(), 52.0);

    assert_eq!(result.total_trades, 4);
    assert_eq!(result.completed_trades, 3);
    assert_eq!(result.forced_open_trades, 1);
    assert_eq!(result.winning_trades, 1);
    assert_eq!(result.losing_trades, 1);
    assert_eq!(result.breakeven_trades, 1);
    assert_eq!(result.total_pnl, 20.0);
    assert!((result.avg_pnl - 20.0 / 3.0).abs() < 1e-12);
    assert_eq!(result.profit_factor, 3.0);
    assert_eq!(result.max_drawdown, 10.0);
    assert!((result.total_return_pct - 0.2).abs() < 1e-9);
    assert!(result.to_string().starts_with("=== Backtest Metrics ==="));
}
