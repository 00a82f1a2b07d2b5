use crate::config::*;
use crate::engine::*;
use crate::errors::Error;
use crate::metrics::BacktestResult;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

const SYMBOLS: [&str; 4] = ["AAPL", "MSFT", "NVDA", "SPY"];

fn day(n: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_704_067_200, 0).unwrap() + Duration::days(n)
}

fn demand(symbol: &str, zone_id: u64, entry_day: i64, closes: &[(u32, f64)]) -> CandidateEntry {
    closes
        .iter()
        .fold(
            CandidateBuilder::builder()
                .symbol(symbol)
                .zone_id(zone_id)
                .zone_type(ZoneType::Demand)
                .entry_time(day(entry_day))
                .entry_price(100.0)
                .zone(90.0, 95.0),
            |builder, (days, price)| builder.forward_close(*days, *price),
        )
        .build()
        .unwrap()
}

fn holding(days: u32) -> BacktestConfig {
    BacktestConfig {
        exit_strategy: ExitStrategy::HoldingPeriod { days },
        ..Default::default()
    }
}

fn replayed(symbol: &str, zone_id: u64, entry_day: i64, exit: Option<(i64, f64)>) -> HistoricalTrade {
    HistoricalTrade {
        symbol: symbol.to_string(),
        zone_id,
        zone_type: ZoneType::Demand,
        timeframe_id: None,
        entry_time: day(entry_day),
        entry_price: 100.0,
        stop_price: 90.0,
        target_price: Some(130.0),
        exit_time: exit.map(|(d, _)| day(d)),
        exit_price: exit.map(|(_, price)| price),
        outcome: None,
    }
}

#[test]
fn holding_period_single_trade() {
    let data = Dataset::from_candidates(vec![demand("AAPL", 1, 0, &[(5, 110.0)])]);
    let result = run_backtest(&data, &holding(5)).unwrap();

    assert_eq!(result.sizing_fraction, 0.05);
    assert_eq!(result.total_trades, 1);
    let trade = &result.trades[0];
    assert_eq!(trade.shares, 5);
    assert_eq!(trade.capital_deployed, 500.0);
    assert!((trade.pnl - 50.0).abs() < 1e-9);
    assert!((trade.r_multiple - 50.0 / (5.0 * 10.9)).abs() < 1e-9);
    assert!((trade.r_multiple - 0.917).abs() < 1e-3);
    assert_eq!(trade.status, TradeStatus::Win);
    assert_eq!(trade.exit_reason, Some(ExitReason::HoldingPeriodExit));
    assert_eq!(trade.exit_time, day(5));

    assert!((result.final_capital - 10_050.0).abs() < 1e-9);
    assert_eq!(result.win_rate, 1.0);
    assert_eq!(result.profit_factor, f64::INFINITY);
    assert_eq!(result.equity_curve.len(), 2);
    assert_eq!(result.equity_curve[0].equity, 10_000.0);
    assert_eq!(result.equity_curve[0].time, day(0));
}

#[test]
fn stop_target_fills_at_target_level() {
    let data = Dataset::from_candidates(vec![demand("AAPL", 1, 0, &[(1, 95.0), (2, 132.8)])]);
    let config = BacktestConfig {
        exit_strategy: ExitStrategy::StopTarget { min_risk_reward: 3.0 },
        ..Default::default()
    };
    let result = run_backtest(&data, &config).unwrap();

    let trade = &result.trades[0];
    assert!((trade.exit_price - 132.7).abs() < 1e-9);
    assert_eq!(trade.exit_reason, Some(ExitReason::TargetHit));
    assert_eq!(trade.days_held, Some(2));
    assert_eq!(trade.exit_time, day(2));
    assert!((trade.r_multiple - 3.0).abs() < 1e-9);
}

#[test]
fn short_supply_zone() {
    let candidate = CandidateBuilder::builder()
        .symbol("SPY")
        .zone_id(3)
        .zone_type(ZoneType::Supply)
        .entry_time(day(0))
        .entry_price(100.0)
        .zone(105.0, 110.0)
        .forward_close(5, 90.0)
        .build()
        .unwrap();
    let result = run_backtest(&Dataset::from_candidates(vec![candidate]), &holding(5)).unwrap();

    let trade = &result.trades[0];
    assert_eq!(trade.side, PositionSide::Short);
    assert!((trade.stop_price - 111.1).abs() < 1e-9);
    assert!((trade.pnl - 50.0).abs() < 1e-9);
    assert_eq!(trade.status, TradeStatus::Win);
}

#[test]
fn short_squeeze_never_drives_cash_negative() {
    let candidate = CandidateBuilder::builder()
        .symbol("SPY")
        .zone_id(4)
        .zone_type(ZoneType::Supply)
        .entry_time(day(0))
        .entry_price(100.0)
        .zone(101.0, 104.0)
        .forward_close(5, 250.0)
        .build()
        .unwrap();
    let config = BacktestConfig {
        min_half_kelly: 1.0,
        ..holding(5)
    };
    let result = run_backtest(&Dataset::from_candidates(vec![candidate]), &config).unwrap();

    let trade = &result.trades[0];
    assert_eq!(trade.shares, 100);
    assert_eq!(trade.exit_price, 200.0);
    assert_eq!(trade.pnl, -10_000.0);
    assert_eq!(result.final_capital, 0.0);
    assert_eq!(result.diagnostics.min_available_cash, 0.0);
    assert!((result.final_capital - (config.initial_capital + result.total_pnl)).abs() < 1e-9);
}

#[test]
fn volume_node_target() {
    let node = |price, node_type| VolumeNode {
        symbol: "AAPL".to_string(),
        price,
        node_type,
        as_of: Some(day(-10)),
    };
    let nodes = vec![
        node(120.0, NodeType::Hvn),
        node(101.0, NodeType::Poc), // inside the 1% buffer
        node(105.0, NodeType::Lvn),
    ];
    let data = Dataset::from_candidates(vec![
        demand("AAPL", 1, 0, &[(1, 104.0), (2, 121.0)]),
        demand("MSFT", 2, 0, &[(1, 104.0)]),
    ])
    .with_volume_nodes(nodes);
    let config = BacktestConfig {
        exit_strategy: ExitStrategy::VolumeNode { hvn_lookback_days: 90 },
        ..Default::default()
    };
    let result = run_backtest(&data, &config).unwrap();

    assert_eq!(result.total_trades, 1);
    assert_eq!(result.diagnostics.skipped_no_target, 1);
    let trade = &result.trades[0];
    assert_eq!(trade.target_price, Some(120.0));
    assert_eq!(trade.exit_price, 120.0);
    assert_eq!(trade.exit_reason, Some(ExitReason::HvnTarget));
}

#[test]
fn max_positions_skips_overlapping_entry() {
    let data = Dataset::from_candidates(vec![
        demand("AAPL", 1, 0, &[(5, 110.0)]),
        demand("MSFT", 2, 1, &[(5, 105.0)]),
    ]);
    let config = BacktestConfig {
        max_positions: 1,
        ..holding(5)
    };
    let result = run_backtest(&data, &config).unwrap();

    assert_eq!(result.total_trades, 1);
    assert_eq!(result.trades[0].symbol, "AAPL");
    assert_eq!(result.diagnostics.skipped_max_positions, 1);
    assert_eq!(result.diagnostics.max_open_positions, 1);
}

#[test]
fn exit_releases_capital_before_same_instant_entry() {
    // the first position takes all the cash; the second enters when it exits
    let data = Dataset::from_candidates(vec![
        demand("AAPL", 1, 0, &[(5, 110.0)]),
        demand("MSFT", 2, 5, &[(5, 100.0)]),
    ]);
    let config = BacktestConfig {
        min_half_kelly: 1.0,
        ..holding(5)
    };
    let result = run_backtest(&data, &config).unwrap();

    assert_eq!(result.diagnostics.skipped_no_capital, 0);
    assert_eq!(result.total_trades, 2);
    assert_eq!(result.trades[0].shares, 100);
    assert_eq!(result.trades[1].shares, 110);
    assert_eq!(result.trades[1].entry_time, day(5));
}

#[test]
fn entry_without_cash_is_skipped() {
    let data = Dataset::from_candidates(vec![
        demand("AAPL", 1, 0, &[(5, 110.0)]),
        demand("MSFT", 2, 1, &[(5, 100.0)]),
    ]);
    let config = BacktestConfig {
        min_half_kelly: 1.0,
        ..holding(5)
    };
    let result = run_backtest(&data, &config).unwrap();

    assert_eq!(result.total_trades, 1);
    assert_eq!(result.diagnostics.skipped_no_capital, 1);
    assert!(result.diagnostics.min_available_cash >= 0.0);
}

#[test]
fn position_below_minimum_capital_is_skipped() {
    let data = Dataset::from_candidates(vec![demand("AAPL", 1, 0, &[(5, 110.0)])]);
    let config = BacktestConfig {
        min_position_capital: 1_000.0,
        ..holding(5)
    };
    let result = run_backtest(&data, &config).unwrap();

    assert_eq!(result.total_trades, 0);
    assert_eq!(result.diagnostics.skipped_too_small, 1);
    assert_eq!(result.final_capital, 10_000.0);
}

#[test]
fn duplicate_zone_is_skipped() {
    let data = Dataset::from_candidates(vec![
        demand("AAPL", 1, 0, &[(5, 110.0)]),
        demand("AAPL", 1, 2, &[(5, 110.0)]),
    ]);
    let result = run_backtest(&data, &holding(5)).unwrap();

    assert_eq!(result.total_trades, 1);
    assert_eq!(result.diagnostics.skipped_duplicate, 1);
}

#[test]
fn filters_and_unresolved_candidates_are_counted() {
    let data = Dataset::from_candidates(vec![
        demand("AAPL", 1, 0, &[(5, 110.0)]),
        demand("MSFT", 2, 0, &[(3, 110.0)]),
    ]);
    let result = run_backtest(&data, &holding(5)).unwrap();
    assert_eq!(result.total_trades, 1);
    assert_eq!(result.diagnostics.skipped_no_data, 1);

    let config = BacktestConfig {
        zone_type: ZoneFilter::Supply,
        ..holding(5)
    };
    let result = run_backtest(&data, &config).unwrap();
    assert_eq!(result.total_trades, 0);
    assert_eq!(result.diagnostics.skipped_filtered, 2);
}

#[test]
fn open_positions_are_forced_closed_at_window_end() {
    let data = Dataset::from_candidates(vec![demand("AAPL", 1, 0, &[(20, 130.0)])]);
    let config = BacktestConfig {
        window_end: Some(day(10)),
        ..holding(20)
    };
    let result = run_backtest(&data, &config).unwrap();

    assert_eq!(result.total_trades, 1);
    assert_eq!(result.completed_trades, 0);
    assert_eq!(result.forced_open_trades, 1);
    let trade = &result.trades[0];
    assert_eq!(trade.status, TradeStatus::ForcedOpenAtEnd);
    assert_eq!(trade.pnl, 0.0);
    assert_eq!(trade.exit_time, day(10));
    assert_eq!(result.final_capital, 10_000.0);
    assert_eq!(result.win_rate, 0.0);
}

#[test]
fn replay_of_open_trade_is_forced_closed() {
    let data = Dataset::from_trades(vec![
        replayed("AAPL", 1, 0, Some((3, 120.0))),
        replayed("MSFT", 2, 4, None),
    ]);
    let config = BacktestConfig {
        exit_strategy: ExitStrategy::HistoricalReplay,
        ..Default::default()
    };
    let result = run_backtest(&data, &config).unwrap();

    assert_eq!(result.total_trades, 2);
    assert_eq!(result.winning_trades, 1);
    assert_eq!(result.forced_open_trades, 1);
    assert_eq!(result.trades[1].exit_time, day(4));
    // 10000 * 0.05 / 100 = 5 shares at +20
    assert!((result.final_capital - 10_100.0).abs() < 1e-9);
}

#[test]
fn replay_sizes_on_available_cash() {
    let data = Dataset::from_trades(vec![
        replayed("AAPL", 1, 0, Some((10, 120.0))),
        replayed("MSFT", 2, 1, Some((10, 120.0))),
    ]);
    let config = BacktestConfig {
        exit_strategy: ExitStrategy::HistoricalReplay,
        min_half_kelly: 0.5,
        ..Default::default()
    };
    let result = run_backtest(&data, &config).unwrap();

    // 0.5 * 10000 / 100, then 0.5 * 5000 / 100
    assert_eq!(result.trades[0].shares, 50);
    assert_eq!(result.trades[1].shares, 25);
}

#[test]
fn kelly_estimate_is_used_with_enough_outcomes() {
    let data = Dataset::from_candidates(vec![demand("AAPL", 1, 0, &[(5, 110.0)])]);
    let config = BacktestConfig {
        kelly_min_trades: 1,
        ..holding(5)
    };
    let result = run_backtest(&data, &config).unwrap();

    assert_eq!(result.kelly.kelly_fraction, MAX_KELLY);
    assert_eq!(result.sizing_fraction, MAX_KELLY / 2.0);
    assert_eq!(result.trades[0].shares, 12);
}

#[test]
fn empty_dataset_is_a_zero_trade_result() {
    let result = run_backtest(&Dataset::default(), &BacktestConfig::default()).unwrap();

    assert_eq!(result.total_trades, 0);
    assert_eq!(result.final_capital, 10_000.0);
    assert_eq!(result.total_return_pct, 0.0);
    assert_eq!(result.profit_factor, 0.0);
    assert_eq!(result.sharpe_ratio, 0.0);
    assert_eq!(result.max_drawdown, 0.0);
    assert!(result.equity_curve.is_empty());
    assert!(result.per_symbol.is_empty());
}

#[test]
fn rejected_configs() {
    let data = Dataset::default();
    assert!(matches!(
        run_backtest(&data, &holding(4)),
        Err(Error::InvalidHoldingPeriod(4))
    ));
    assert!(matches!(
        "trailing_stop".parse::<ExitStrategy>(),
        Err(Error::UnknownExitStrategy(_))
    ));
    let config = BacktestConfig {
        initial_capital: -1.0,
        ..Default::default()
    };
    assert!(matches!(run_backtest(&data, &config), Err(Error::NegZeroBalance(_))));
}

fn random_candidates(rng: &mut StdRng, count: usize) -> Vec<CandidateEntry> {
    (0..count)
        .map(|zone_id| {
            let zone_type = if rng.random_bool(0.5) { ZoneType::Demand } else { ZoneType::Supply };
            let entry: f64 = rng.random_range(20.0..200.0);
            let width = entry * rng.random_range(0.01..0.05);
            let (low, high) = match zone_type {
                ZoneType::Demand => {
                    let high = entry * rng.random_range(0.95..1.0);
                    (high - width, high)
                }
                ZoneType::Supply => {
                    let low = entry * rng.random_range(1.0..1.05);
                    (low, low + width)
                }
            };

            let mut builder = CandidateBuilder::builder()
                .symbol(SYMBOLS[rng.random_range(0..SYMBOLS.len())])
                .zone_id(zone_id as u64)
                .zone_type(zone_type)
                .entry_time(day(rng.random_range(0..120)))
                .entry_price(entry)
                .zone(low, high);
            for days in HOLDING_PERIODS {
                // leave some horizons missing
                if rng.random_bool(0.9) {
                    let change = if rng.random_bool(0.03) {
                        rng.random_range(1.5..3.0)
                    } else {
                        rng.random_range(0.8..1.25)
                    };
                    builder = builder.forward_close(days, entry * change);
                }
            }
            builder.build().unwrap()
        })
        .collect()
}

fn random_trades(rng: &mut StdRng, count: usize) -> Vec<HistoricalTrade> {
    (0..count)
        .map(|zone_id| {
            let entry_day = rng.random_range(0..120);
            let exit = rng
                .random_bool(0.85)
                .then(|| (entry_day + rng.random_range(0..15), rng.random_range(80.0..125.0)));
            replayed(SYMBOLS[rng.random_range(0..SYMBOLS.len())], zone_id as u64, entry_day, exit)
        })
        .collect()
}

fn assert_invariants(result: &BacktestResult, config: &BacktestConfig) {
    let diagnostics = &result.diagnostics;
    let tolerance = 1e-10 * config.initial_capital.max(1e4);

    // capital conservation after every ledger change
    let mut realized = 0.0;
    for (trade, point) in result.trades.iter().zip(result.equity_curve.iter().skip(1)) {
        realized += trade.pnl;
        assert!((point.equity - (config.initial_capital + realized)).abs() < tolerance);
    }
    assert_eq!(result.equity_curve.len(), result.trades.len() + usize::from(diagnostics.resolved > 0));
    assert!((result.final_capital - (config.initial_capital + result.total_pnl)).abs() < tolerance);
    assert!(diagnostics.min_available_cash >= -tolerance);

    assert!(diagnostics.max_open_positions <= config.max_positions);

    assert!(result.kelly.kelly_fraction >= 0.0 && result.kelly.kelly_fraction <= MAX_KELLY);
    assert_eq!(result.kelly.half_kelly, result.kelly.kelly_fraction / 2.0);
    assert!(result.sizing_fraction >= config.min_half_kelly);

    // every candidate is accounted for exactly once
    let unresolved = diagnostics.skipped_filtered
        + diagnostics.skipped_no_data
        + diagnostics.skipped_no_target
        + diagnostics.skipped_invalid_risk;
    assert_eq!(diagnostics.resolved + unresolved, diagnostics.candidates);
    let rejected = diagnostics.skipped_max_positions
        + diagnostics.skipped_no_capital
        + diagnostics.skipped_too_small
        + diagnostics.skipped_duplicate;
    assert_eq!(result.total_trades + rejected, diagnostics.resolved);
}

#[test]
fn random_candidate_runs_hold_invariants() {
    let strategies = [
        ExitStrategy::HoldingPeriod { days: 1 },
        ExitStrategy::HoldingPeriod { days: 10 },
        ExitStrategy::StopTarget { min_risk_reward: 2.0 },
        ExitStrategy::StopTarget { min_risk_reward: 3.0 },
    ];

    for seed in 0..20 {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = Dataset::from_candidates(random_candidates(&mut rng, 60));
        for exit_strategy in strategies {
            let config = BacktestConfig {
                exit_strategy,
                max_positions: rng.random_range(1..6),
                kelly_min_trades: 5,
                ..Default::default()
            };
            let result = run_backtest(&data, &config).unwrap();
            assert_invariants(&result, &config);
        }
    }
}

#[test]
fn large_capital_runs_close_every_position() {
    for seed in 0..30 {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = Dataset::from_candidates(random_candidates(&mut rng, 40));
        for initial_capital in [1e7, 1e8, 1e9] {
            let config = BacktestConfig {
                initial_capital,
                min_half_kelly: 0.2,
                ..holding(5)
            };
            let result = run_backtest(&data, &config).unwrap();
            assert_invariants(&result, &config);
        }
    }
}

#[test]
fn random_replay_runs_hold_invariants() {
    for seed in 0..20 {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = Dataset::from_trades(random_trades(&mut rng, 50));
        let config = BacktestConfig {
            exit_strategy: ExitStrategy::HistoricalReplay,
            max_positions: rng.random_range(1..8),
            min_half_kelly: rng.random_range(0.05..0.5),
            kelly_min_trades: 5,
            ..Default::default()
        };
        let result = run_backtest(&data, &config).unwrap();
        assert_invariants(&result, &config);
    }
}

#[test]
fn runs_are_deterministic() {
    let mut rng = StdRng::seed_from_u64(42);
    let candidates = random_candidates(&mut rng, 80);
    let config = BacktestConfig {
        max_positions: 3,
        kelly_min_trades: 5,
        ..Default::default()
    };

    let first = run_backtest(&Dataset::from_candidates(candidates.clone()), &config).unwrap();
    let second = run_backtest(&Dataset::from_candidates(candidates.clone()), &config).unwrap();
    assert_eq!(first, second);

    // input order does not matter
    let mut shuffled = candidates;
    shuffled.shuffle(&mut rng);
    let third = run_backtest(&Dataset::from_candidates(shuffled), &config).unwrap();
    assert_eq!(first.trades, third.trades);
    assert_eq!(first.final_capital, third.final_capital);
}
