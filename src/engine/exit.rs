//! Exit resolution.
//!
//! Turns a candidate entry into a concrete trade (entry, stop, target, exit)
//! under one of four policies, or rejects it with a [`SkipReason`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::PercentCalculus;
use crate::engine::candidate::*;
use crate::errors::{Error, Result};

use chrono::{DateTime, Duration, Utc};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Buffer (in percent) placed beyond the zone edge for the protective stop.
pub const ZONE_BUFFER_PCT: f64 = 1.0;

/// Minimum distance (in percent) from entry for a volume node to count as a target.
pub const NODE_BUFFER_PCT: f64 = 1.0;

/// Why a position was closed.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitReason {
    /// A scanned close crossed the protective stop.
    StopLoss,
    /// A scanned close crossed the risk/reward target.
    TargetHit,
    /// A scanned close crossed the volume node target.
    #[cfg_attr(feature = "serde", serde(rename = "HVNTarget"))]
    HvnTarget,
    /// No level was crossed; closed at the last scanned horizon.
    TimeExit,
    /// Closed at the configured holding period.
    HoldingPeriodExit,
    /// Exit resolved upstream.
    HistoricalOutcome,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StopLoss => "StopLoss",
            Self::TargetHit => "TargetHit",
            Self::HvnTarget => "HVNTarget",
            Self::TimeExit => "TimeExit",
            Self::HoldingPeriodExit => "HoldingPeriodExit",
            Self::HistoricalOutcome => "HistoricalOutcome",
        };
        f.write_str(name)
    }
}

/// Why a candidate never reached the simulator.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// The forward prices needed by the policy are missing.
    NoForwardData,
    /// No volume node lies beyond the entry in the favorable direction.
    NoQualifyingTarget,
    /// The distance from entry to stop is zero, negative or undefined.
    NonPositiveRisk,
}

/// Where and when a resolved trade leaves the market.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitOutcome {
    /// Exit fill price.
    pub exit_price: f64,
    /// Exit timestamp.
    pub exit_time: DateTime<Utc>,
    /// Why the trade exits.
    pub reason: ExitReason,
    /// Days between entry and exit.
    pub days_held: u32,
}

/// A candidate with its trade plan and, when known, its exit.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTrade {
    /// Traded symbol.
    pub symbol: String,
    /// Zone the trade was taken on.
    pub zone_id: u64,
    /// Zone type.
    pub zone_type: ZoneType,
    /// Direction implied by the zone type.
    pub side: PositionSide,
    /// Entry timestamp.
    pub entry_time: DateTime<Utc>,
    /// Entry fill price.
    pub entry_price: f64,
    /// Protective stop.
    pub stop_price: f64,
    /// Profit target, when the policy has one.
    pub target_price: Option<f64>,
    /// Initial risk per share, always positive.
    pub risk_per_share: f64,
    /// Exit, or `None` if the trade never closed in the source data.
    pub exit: Option<ExitOutcome>,
    /// Outcome label supplied upstream.
    pub label: Option<OutcomeLabel>,
}

impl ResolvedTrade {
    /// Realized R-multiple per share, if the trade has an exit.
    pub fn r_multiple(&self) -> Option<f64> {
        self.exit
            .map(|exit| self.side.pnl_per_share(self.entry_price, exit.exit_price) / self.risk_per_share)
    }
}

/// Input handed to [`ExitStrategy::resolve`].
#[derive(Debug, Clone, Copy)]
pub enum Setup<'a> {
    /// A zone retest with forward closes.
    Zone(&'a CandidateEntry),
    /// A trade already resolved upstream.
    Replay(&'a HistoricalTrade),
}

impl Setup<'_> {
    /// Symbol of the setup.
    pub fn symbol(&self) -> &str {
        match self {
            Self::Zone(candidate) => candidate.symbol(),
            Self::Replay(trade) => &trade.symbol,
        }
    }

    /// Zone identifier of the setup.
    pub fn zone_id(&self) -> u64 {
        match self {
            Self::Zone(candidate) => candidate.zone_id(),
            Self::Replay(trade) => trade.zone_id,
        }
    }

    /// Zone type of the setup.
    pub fn zone_type(&self) -> ZoneType {
        match self {
            Self::Zone(candidate) => candidate.zone_type(),
            Self::Replay(trade) => trade.zone_type,
        }
    }

    /// Timeframe of the setup, if known.
    pub fn timeframe_id(&self) -> Option<u32> {
        match self {
            Self::Zone(candidate) => candidate.timeframe_id(),
            Self::Replay(trade) => trade.timeframe_id,
        }
    }
}

/// Volume profile target levels grouped by symbol, sorted by price.
#[derive(Debug, Default)]
pub struct VolumeNodes<'a> {
    by_symbol: HashMap<&'a str, Vec<&'a VolumeNode>>,
}

impl<'a> VolumeNodes<'a> {
    /// Indexes the nodes usable as targets.
    pub fn new(nodes: &'a [VolumeNode]) -> Self {
        let mut by_symbol: HashMap<&'a str, Vec<&'a VolumeNode>> = HashMap::new();
        for node in nodes.iter().filter(|n| n.is_target()) {
            by_symbol.entry(node.symbol.as_str()).or_default().push(node);
        }
        for levels in by_symbol.values_mut() {
            levels.sort_by(|a, b| a.price.total_cmp(&b.price));
        }
        Self { by_symbol }
    }

    /// Nearest node strictly beyond the entry buffer in the favorable direction.
    ///
    /// Nodes dated after `entry_time`, or more than `lookback_days` before it, are ignored.
    pub fn nearest_target(
        &self,
        symbol: &str,
        side: PositionSide,
        entry_price: f64,
        entry_time: DateTime<Utc>,
        lookback_days: u32,
    ) -> Option<f64> {
        let levels = self.by_symbol.get(symbol)?;
        let oldest = entry_time - Duration::days(i64::from(lookback_days));
        let mut eligible = levels
            .iter()
            .filter(|node| node.as_of.is_none_or(|as_of| as_of <= entry_time && as_of >= oldest))
            .map(|node| node.price);

        match side {
            PositionSide::Long => {
                let floor = entry_price.addpercent(NODE_BUFFER_PCT);
                eligible.find(|price| *price > floor)
            }
            PositionSide::Short => {
                let ceiling = entry_price.subpercent(NODE_BUFFER_PCT);
                eligible.filter(|price| *price < ceiling).last()
            }
        }
    }
}

fn default_risk_reward() -> f64 {
    3.0
}

fn default_lookback() -> u32 {
    90
}

/// Exit policy applied to every candidate of a run.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExitStrategy {
    /// Exit at the close observed exactly `days` after entry.
    HoldingPeriod {
        /// One of [`HOLDING_PERIODS`].
        days: u32,
    },
    /// Stop beyond the zone, target at a multiple of the risk.
    StopTarget {
        /// Target distance as a multiple of the risk per share.
        #[cfg_attr(feature = "serde", serde(default = "default_risk_reward"))]
        min_risk_reward: f64,
    },
    /// Stop beyond the zone, target at the nearest volume node.
    #[cfg_attr(feature = "serde", serde(rename = "hvn_target", alias = "volume_node"))]
    VolumeNode {
        /// How old a node may be, relative to the entry, and still count.
        #[cfg_attr(feature = "serde", serde(default = "default_lookback"))]
        hvn_lookback_days: u32,
    },
    /// Replay trades resolved upstream.
    #[cfg_attr(feature = "serde", serde(rename = "historical", alias = "historical_replay"))]
    HistoricalReplay,
}

impl Default for ExitStrategy {
    fn default() -> Self {
        Self::StopTarget {
            min_risk_reward: default_risk_reward(),
        }
    }
}

impl FromStr for ExitStrategy {
    type Err = Error;

    /// Parses a policy name, using default parameters.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "holding_period" | "holding" => Ok(Self::HoldingPeriod { days: 5 }),
            "stop_target" | "risk_reward" => Ok(Self::default()),
            "hvn_target" | "volume_node" | "hvn" => Ok(Self::VolumeNode {
                hvn_lookback_days: default_lookback(),
            }),
            "historical" | "historical_replay" => Ok(Self::HistoricalReplay),
            other => Err(Error::UnknownExitStrategy(other.to_string())),
        }
    }
}

impl fmt::Display for ExitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HoldingPeriod { days } => write!(f, "holding_period({days}d)"),
            Self::StopTarget { min_risk_reward } => write!(f, "stop_target(1:{min_risk_reward})"),
            Self::VolumeNode { hvn_lookback_days } => write!(f, "hvn_target({hvn_lookback_days}d)"),
            Self::HistoricalReplay => f.write_str("historical"),
        }
    }
}

impl ExitStrategy {
    /// Checks the policy parameters.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::HoldingPeriod { days } if !HOLDING_PERIODS.contains(days) => Err(Error::InvalidHoldingPeriod(*days)),
            Self::StopTarget { min_risk_reward } if *min_risk_reward <= 0.0 || !min_risk_reward.is_finite() => {
                Err(Error::NegZeroRiskReward(*min_risk_reward))
            }
            _ => Ok(()),
        }
    }

    /// Whether the policy consumes upstream-resolved trades instead of zone candidates.
    pub fn is_replay(&self) -> bool {
        matches!(self, Self::HistoricalReplay)
    }

    /// Resolves one setup into a trade, or the reason it is skipped.
    ///
    /// A zone candidate given to the replay policy, or a replayed trade given
    /// to a scanning policy, has no usable price data and is skipped.
    pub fn resolve(&self, setup: Setup<'_>, nodes: &VolumeNodes<'_>) -> std::result::Result<ResolvedTrade, SkipReason> {
        match (self, setup) {
            (Self::HoldingPeriod { days }, Setup::Zone(candidate)) => resolve_holding_period(candidate, *days),
            (Self::StopTarget { min_risk_reward }, Setup::Zone(candidate)) => {
                let plan = TradePlan::new(candidate)?;
                let target = plan.side_offset(plan.risk * min_risk_reward);
                plan.scan(candidate, target, ExitReason::TargetHit)
            }
            (Self::VolumeNode { hvn_lookback_days }, Setup::Zone(candidate)) => {
                let plan = TradePlan::new(candidate)?;
                let target = nodes
                    .nearest_target(
                        candidate.symbol(),
                        plan.side,
                        candidate.entry_price(),
                        candidate.entry_time(),
                        *hvn_lookback_days,
                    )
                    .ok_or(SkipReason::NoQualifyingTarget)?;
                plan.scan(candidate, target, ExitReason::HvnTarget)
            }
            (Self::HistoricalReplay, Setup::Replay(trade)) => resolve_replay(trade),
            _ => Err(SkipReason::NoForwardData),
        }
    }
}

/// Entry, stop and risk derived from a zone candidate.
struct TradePlan {
    side: PositionSide,
    entry: f64,
    stop: f64,
    risk: f64,
}

impl TradePlan {
    fn new(candidate: &CandidateEntry) -> std::result::Result<Self, SkipReason> {
        let side = candidate.zone_type().side();
        let entry = candidate.entry_price();
        let stop = match side {
            PositionSide::Long => candidate.zone_low().subpercent(ZONE_BUFFER_PCT),
            PositionSide::Short => candidate.zone_high().addpercent(ZONE_BUFFER_PCT),
        };
        let risk = match side {
            PositionSide::Long => entry - stop,
            PositionSide::Short => stop - entry,
        };

        // NaN fails this comparison too
        if !(risk > 0.0 && entry > 0.0 && risk.is_finite()) {
            return Err(SkipReason::NonPositiveRisk);
        }
        Ok(Self { side, entry, stop, risk })
    }

    /// Price `distance` away from entry in the favorable direction.
    fn side_offset(&self, distance: f64) -> f64 {
        match self.side {
            PositionSide::Long => self.entry + distance,
            PositionSide::Short => self.entry - distance,
        }
    }

    fn trade(&self, candidate: &CandidateEntry, target: Option<f64>, exit: ExitOutcome) -> ResolvedTrade {
        ResolvedTrade {
            symbol: candidate.symbol().to_string(),
            zone_id: candidate.zone_id(),
            zone_type: candidate.zone_type(),
            side: self.side,
            entry_time: candidate.entry_time(),
            entry_price: self.entry,
            stop_price: self.stop,
            target_price: target,
            risk_per_share: self.risk,
            exit: Some(exit),
            label: None,
        }
    }

    /// Walks the scan horizons and exits on the first close beyond stop or target.
    ///
    /// A breach fills at the level itself, not at the scanned close.
    fn scan(
        &self,
        candidate: &CandidateEntry,
        target: f64,
        target_reason: ExitReason,
    ) -> std::result::Result<ResolvedTrade, SkipReason> {
        let entry_time = candidate.entry_time();
        let outcome = |exit_price, days: u32, reason| ExitOutcome {
            exit_price,
            exit_time: entry_time + Duration::days(i64::from(days)),
            reason,
            days_held: days,
        };

        let mut last = None;
        for days in SCAN_HORIZONS {
            let Some(close) = candidate.forward_close(days) else {
                continue;
            };
            last = Some((days, close));

            let (stopped, reached) = match self.side {
                PositionSide::Long => (close <= self.stop, close >= target),
                PositionSide::Short => (close >= self.stop, close <= target),
            };
            if stopped {
                return Ok(self.trade(candidate, Some(target), outcome(self.stop, days, ExitReason::StopLoss)));
            }
            if reached {
                return Ok(self.trade(candidate, Some(target), outcome(target, days, target_reason)));
            }
        }

        let (days, close) = last.ok_or(SkipReason::NoForwardData)?;
        Ok(self.trade(candidate, Some(target), outcome(close, days, ExitReason::TimeExit)))
    }
}

fn resolve_holding_period(candidate: &CandidateEntry, days: u32) -> std::result::Result<ResolvedTrade, SkipReason> {
    let close = candidate.forward_close(days).ok_or(SkipReason::NoForwardData)?;
    let plan = TradePlan::new(candidate)?;
    let exit = ExitOutcome {
        exit_price: close,
        exit_time: candidate.entry_time() + Duration::days(i64::from(days)),
        reason: ExitReason::HoldingPeriodExit,
        days_held: days,
    };
    Ok(plan.trade(candidate, None, exit))
}

fn resolve_replay(trade: &HistoricalTrade) -> std::result::Result<ResolvedTrade, SkipReason> {
    let risk = (trade.entry_price - trade.stop_price).abs();
    if !(risk > 0.0 && trade.entry_price > 0.0 && risk.is_finite()) {
        return Err(SkipReason::NonPositiveRisk);
    }

    let exit = match (trade.exit_time, trade.exit_price) {
        (Some(exit_time), Some(exit_price)) if exit_price > 0.0 && exit_price.is_finite() => {
            // an exit stamped before its entry is treated as same-instant
            let exit_time = exit_time.max(trade.entry_time);
            Some(ExitOutcome {
                exit_price,
                exit_time,
                reason: ExitReason::HistoricalOutcome,
                days_held: (exit_time - trade.entry_time).num_days() as u32,
            })
        }
        _ => None,
    };

    Ok(ResolvedTrade {
        symbol: trade.symbol.clone(),
        zone_id: trade.zone_id,
        zone_type: trade.zone_type,
        side: trade.zone_type.side(),
        entry_time: trade.entry_time,
        entry_price: trade.entry_price,
        stop_price: trade.stop_price,
        target_price: trade.target_price,
        risk_per_share: risk,
        exit,
        label: trade.outcome,
    })
}

#[cfg(test)]
fn candidate(zone_type: ZoneType, entry: f64, low: f64, high: f64, closes: &[(u32, f64)]) -> CandidateEntry {
    let builder = CandidateBuilder::builder()
        .symbol("MSFT")
        .zone_id(1)
        .zone_type(zone_type)
        .entry_time(DateTime::from_timestamp(1_700_000_000, 0).unwrap())
        .entry_price(entry)
        .zone(low, high);
    closes
        .iter()
        .fold(builder, |b, (days, close)| b.forward_close(*days, *close))
        .build()
        .unwrap()
}

#[cfg(test)]
#[test]
fn stop_target_fills_at_target_level() {
    let c = candidate(ZoneType::Demand, 100.0, 90.0, 95.0, &[(1, 95.0), (2, 132.8)]);
    let strategy = ExitStrategy::StopTarget { min_risk_reward: 3.0 };
    let trade = strategy.resolve(Setup::Zone(&c), &VolumeNodes::default()).unwrap();
    let exit = trade.exit.unwrap();

    assert!((trade.stop_price - 89.1).abs() < 1e-9);
    assert!((trade.risk_per_share - 10.9).abs() < 1e-9);
    assert!((trade.target_price.unwrap() - 132.7).abs() < 1e-9);
    assert!((exit.exit_price - 132.7).abs() < 1e-9);
    assert_eq!(exit.reason, ExitReason::TargetHit);
    assert_eq!(exit.days_held, 2);
    assert_eq!(exit.exit_time, c.entry_time() + Duration::days(2));
}

#[cfg(test)]
#[test]
fn stop_target_stop_checked_first() {
    let c = candidate(ZoneType::Demand, 100.0, 90.0, 95.0, &[(1, 101.0), (3, 80.0), (5, 140.0)]);
    let trade = ExitStrategy::default()
        .resolve(Setup::Zone(&c), &VolumeNodes::default())
        .unwrap();
    let exit = trade.exit.unwrap();
    assert_eq!(exit.reason, ExitReason::StopLoss);
    assert!((exit.exit_price - 89.1).abs() < 1e-9);
    assert_eq!(exit.days_held, 3);
}

#[cfg(test)]
#[test]
fn stop_target_time_exit_at_last_scanned_close() {
    // 65 days is outside the scan horizons
    let c = candidate(ZoneType::Demand, 100.0, 90.0, 95.0, &[(1, 101.0), (10, 104.0), (65, 200.0)]);
    let exit = ExitStrategy::default()
        .resolve(Setup::Zone(&c), &VolumeNodes::default())
        .unwrap()
        .exit
        .unwrap();
    assert_eq!(exit.reason, ExitReason::TimeExit);
    assert_eq!(exit.exit_price, 104.0);
    assert_eq!(exit.days_held, 10);
}

#[cfg(test)]
#[test]
fn stop_target_short_side() {
    // stop = 1.01 * 110 = 111.1, risk = 11.1, target = 100 - 22.2 = 77.8
    let c = candidate(ZoneType::Supply, 100.0, 105.0, 110.0, &[(1, 99.0), (2, 77.0)]);
    let strategy = ExitStrategy::StopTarget { min_risk_reward: 2.0 };
    let trade = strategy.resolve(Setup::Zone(&c), &VolumeNodes::default()).unwrap();
    let exit = trade.exit.unwrap();
    assert_eq!(trade.side, PositionSide::Short);
    assert!((trade.stop_price - 111.1).abs() < 1e-9);
    assert!((exit.exit_price - 77.8).abs() < 1e-9);
    assert_eq!(exit.reason, ExitReason::TargetHit);
    assert!((trade.r_multiple().unwrap() - 2.0).abs() < 1e-9);
}

#[cfg(test)]
#[test]
fn stop_target_skips() {
    let no_data = candidate(ZoneType::Demand, 100.0, 90.0, 95.0, &[(65, 120.0)]);
    let strategy = ExitStrategy::default();
    let nodes = VolumeNodes::default();
    assert_eq!(strategy.resolve(Setup::Zone(&no_data), &nodes), Err(SkipReason::NoForwardData));

    // entry below the buffered stop
    let no_risk = candidate(ZoneType::Demand, 89.0, 90.0, 95.0, &[(1, 95.0)]);
    assert_eq!(strategy.resolve(Setup::Zone(&no_risk), &nodes), Err(SkipReason::NonPositiveRisk));
}

#[cfg(test)]
#[test]
fn holding_period_exit() {
    let c = candidate(ZoneType::Demand, 100.0, 90.0, 95.0, &[(1, 80.0), (5, 110.0)]);
    let strategy = ExitStrategy::HoldingPeriod { days: 5 };
    let trade = strategy.resolve(Setup::Zone(&c), &VolumeNodes::default()).unwrap();
    let exit = trade.exit.unwrap();
    // no stop scan: the 1-day close below the stop is ignored
    assert_eq!(exit.exit_price, 110.0);
    assert_eq!(exit.reason, ExitReason::HoldingPeriodExit);
    assert_eq!(trade.target_price, None);

    let strategy = ExitStrategy::HoldingPeriod { days: 10 };
    assert_eq!(
        strategy.resolve(Setup::Zone(&c), &VolumeNodes::default()),
        Err(SkipReason::NoForwardData)
    );
}

#[cfg(test)]
fn node(price: f64, node_type: NodeType, as_of: Option<DateTime<Utc>>) -> VolumeNode {
    VolumeNode {
        symbol: "MSFT".to_string(),
        price,
        node_type,
        as_of,
    }
}

#[cfg(test)]
#[test]
fn volume_node_target_selection() {
    let entry_time = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    let nodes = vec![
        // within the 1% buffer
        node(100.5, NodeType::Hvn, None),
        node(104.0, NodeType::Lvn, None),
        node(106.0, NodeType::Poc, None),
        node(108.0, NodeType::Hvn, None),
        node(103.0, NodeType::Hvn, Some(entry_time + Duration::days(1))),
        node(102.0, NodeType::Hvn, Some(entry_time - Duration::days(400))),
        node(95.0, NodeType::Hvn, None),
        node(92.0, NodeType::Hvn, None),
    ];
    let index = VolumeNodes::new(&nodes);

    assert_eq!(
        index.nearest_target("MSFT", PositionSide::Long, 100.0, entry_time, 90),
        Some(106.0)
    );
    assert_eq!(
        index.nearest_target("MSFT", PositionSide::Short, 100.0, entry_time, 90),
        Some(95.0)
    );
    assert_eq!(index.nearest_target("AAPL", PositionSide::Long, 100.0, entry_time, 90), None);
}

#[cfg(test)]
#[test]
fn volume_node_resolution() {
    let nodes = vec![node(106.0, NodeType::Hvn, None)];
    let index = VolumeNodes::new(&nodes);
    let strategy = ExitStrategy::VolumeNode { hvn_lookback_days: 90 };

    let c = candidate(ZoneType::Demand, 100.0, 90.0, 95.0, &[(1, 102.0), (2, 107.0)]);
    let exit = strategy.resolve(Setup::Zone(&c), &index).unwrap().exit.unwrap();
    assert_eq!(exit.reason, ExitReason::HvnTarget);
    assert_eq!(exit.exit_price, 106.0);

    let short = candidate(ZoneType::Supply, 100.0, 101.0, 104.0, &[(1, 99.0)]);
    assert_eq!(
        strategy.resolve(Setup::Zone(&short), &index),
        Err(SkipReason::NoQualifyingTarget)
    );
}

#[cfg(test)]
#[test]
fn replay_resolution() {
    let entry_time = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    let mut trade = HistoricalTrade {
        symbol: "NVDA".to_string(),
        zone_id: 3,
        zone_type: ZoneType::Supply,
        timeframe_id: None,
        entry_time,
        entry_price: 50.0,
        stop_price: 52.0,
        target_price: Some(44.0),
        exit_time: Some(entry_time + Duration::days(4)),
        exit_price: Some(44.0),
        outcome: Some(OutcomeLabel::Win),
    };
    let strategy = ExitStrategy::HistoricalReplay;
    let nodes = VolumeNodes::default();

    let resolved = strategy.resolve(Setup::Replay(&trade), &nodes).unwrap();
    assert_eq!(resolved.risk_per_share, 2.0);
    assert_eq!(resolved.r_multiple(), Some(3.0));
    assert_eq!(resolved.exit.unwrap().days_held, 4);
    assert_eq!(resolved.exit.unwrap().reason, ExitReason::HistoricalOutcome);

    trade.exit_price = None;
    let open = strategy.resolve(Setup::Replay(&trade), &nodes).unwrap();
    assert!(open.exit.is_none());

    trade.stop_price = 50.0;
    assert_eq!(
        strategy.resolve(Setup::Replay(&trade), &nodes),
        Err(SkipReason::NonPositiveRisk)
    );
}

#[cfg(test)]
#[test]
fn mismatched_setup_is_skipped() {
    let c = candidate(ZoneType::Demand, 100.0, 90.0, 95.0, &[(1, 101.0)]);
    assert_eq!(
        ExitStrategy::HistoricalReplay.resolve(Setup::Zone(&c), &VolumeNodes::default()),
        Err(SkipReason::NoForwardData)
    );
}

#[cfg(test)]
#[test]
fn strategy_from_str_and_validate() {
    assert_eq!("hvn_target".parse::<ExitStrategy>().unwrap(), ExitStrategy::VolumeNode { hvn_lookback_days: 90 });
    assert!(matches!("martingale".parse::<ExitStrategy>(), Err(Error::UnknownExitStrategy(_))));
    assert!(ExitStrategy::HoldingPeriod { days: 22 }.validate().is_ok());
    assert!(matches!(
        ExitStrategy::HoldingPeriod { days: 4 }.validate(),
        Err(Error::InvalidHoldingPeriod(4))
    ));
    assert!(matches!(
        ExitStrategy::StopTarget { min_risk_reward: 0.0 }.validate(),
        Err(Error::NegZeroRiskReward(_))
    ));
}
