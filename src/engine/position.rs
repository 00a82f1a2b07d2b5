use crate::PercentCalculus;
use crate::engine::candidate::*;
use crate::engine::exit::*;

use chrono::{DateTime, Utc};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Terminal state of a trade.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TradeStatus {
    /// Closed with a profit.
    Win,
    /// Closed with a loss.
    Loss,
    /// Closed flat.
    Breakeven,
    /// Still open when the run ended; closed flat.
    ForcedOpenAtEnd,
}

impl TradeStatus {
    /// Classifies a realized P&L.
    pub fn from_pnl(pnl: f64) -> Self {
        if pnl > 0.0 {
            Self::Win
        } else if pnl < 0.0 {
            Self::Loss
        } else {
            Self::Breakeven
        }
    }
}

impl From<OutcomeLabel> for TradeStatus {
    fn from(value: OutcomeLabel) -> Self {
        match value {
            OutcomeLabel::Win => Self::Win,
            OutcomeLabel::Loss => Self::Loss,
            OutcomeLabel::Breakeven => Self::Breakeven,
        }
    }
}

/// An open position held by the simulator.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    symbol: String,
    zone_id: u64,
    zone_type: ZoneType,
    side: PositionSide,
    shares: u64,
    capital_deployed: f64,
    entry_price: f64,
    stop_price: f64,
    target_price: Option<f64>,
    risk_per_share: f64,
    entry_time: DateTime<Utc>,
    label: Option<OutcomeLabel>,
}

impl From<(&ResolvedTrade, u64)> for Position {
    fn from((trade, shares): (&ResolvedTrade, u64)) -> Self {
        Self {
            symbol: trade.symbol.clone(),
            zone_id: trade.zone_id,
            zone_type: trade.zone_type,
            side: trade.side,
            shares,
            capital_deployed: shares as f64 * trade.entry_price,
            entry_price: trade.entry_price,
            stop_price: trade.stop_price,
            target_price: trade.target_price,
            risk_per_share: trade.risk_per_share,
            entry_time: trade.entry_time,
            label: trade.label,
        }
    }
}

impl Position {
    /// Returns the symbol.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Returns the zone identifier.
    pub fn zone_id(&self) -> u64 {
        self.zone_id
    }

    /// Returns the side.
    pub fn side(&self) -> PositionSide {
        self.side
    }

    /// Returns the number of shares.
    pub fn shares(&self) -> u64 {
        self.shares
    }

    /// Returns the capital committed at entry.
    pub fn capital_deployed(&self) -> f64 {
        self.capital_deployed
    }

    /// Returns the entry price.
    pub fn entry_price(&self) -> f64 {
        self.entry_price
    }

    /// Returns the entry timestamp.
    pub fn entry_time(&self) -> DateTime<Utc> {
        self.entry_time
    }

    /// P&L of the whole position if it exited at `exit_price`.
    pub fn estimate_pnl(&self, exit_price: f64) -> f64 {
        self.side.pnl_per_share(self.entry_price, exit_price) * self.shares as f64
    }

    /// Closes the position on its exit.
    ///
    /// The status follows the upstream label when there is one.
    ///
    /// A short is bought back at no more than twice its entry price, where its
    /// whole deployed capital is lost, so a close never takes more cash than
    /// the position holds.
    pub(crate) fn close(self, exit: &ExitOutcome) -> ClosedTrade {
        let exit_price = self.fill_price(exit.exit_price);
        let pnl = self.estimate_pnl(exit_price);
        let status = self.label.map(TradeStatus::from).unwrap_or_else(|| TradeStatus::from_pnl(pnl));
        let r_multiple = pnl / (self.shares as f64 * self.risk_per_share);
        self.into_closed(exit.exit_time, exit_price, Some(exit.reason), Some(exit.days_held), pnl, r_multiple, status)
    }

    fn fill_price(&self, exit_price: f64) -> f64 {
        match self.side {
            PositionSide::Long => exit_price,
            PositionSide::Short => exit_price.min(2.0 * self.entry_price),
        }
    }

    /// Closes the position flat at its entry price when the run ends.
    pub(crate) fn force_close(self, at: DateTime<Utc>) -> ClosedTrade {
        let exit_price = self.entry_price;
        self.into_closed(at, exit_price, None, None, 0.0, 0.0, TradeStatus::ForcedOpenAtEnd)
    }

    #[allow(clippy::too_many_arguments)]
    fn into_closed(
        self,
        exit_time: DateTime<Utc>,
        exit_price: f64,
        exit_reason: Option<ExitReason>,
        days_held: Option<u32>,
        pnl: f64,
        r_multiple: f64,
        status: TradeStatus,
    ) -> ClosedTrade {
        let pnl_pct = self.capital_deployed.portion(pnl);
        ClosedTrade {
            symbol: self.symbol,
            zone_id: self.zone_id,
            zone_type: self.zone_type,
            side: self.side,
            shares: self.shares,
            capital_deployed: self.capital_deployed,
            entry_price: self.entry_price,
            stop_price: self.stop_price,
            target_price: self.target_price,
            entry_time: self.entry_time,
            exit_time,
            exit_price,
            exit_reason,
            days_held,
            pnl,
            pnl_pct,
            r_multiple,
            status,
        }
    }
}

/// A position after it left the ledger.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedTrade {
    /// Traded symbol.
    pub symbol: String,
    /// Zone the trade was taken on.
    pub zone_id: u64,
    /// Zone type.
    pub zone_type: ZoneType,
    /// Direction.
    pub side: PositionSide,
    /// Whole shares held.
    pub shares: u64,
    /// `shares * entry_price`.
    pub capital_deployed: f64,
    /// Entry fill price.
    pub entry_price: f64,
    /// Protective stop.
    pub stop_price: f64,
    /// Profit target, when the policy had one.
    pub target_price: Option<f64>,
    /// Entry timestamp.
    pub entry_time: DateTime<Utc>,
    /// Exit timestamp.
    pub exit_time: DateTime<Utc>,
    /// Exit fill price.
    pub exit_price: f64,
    /// Why the trade exited; `None` when force-closed.
    pub exit_reason: Option<ExitReason>,
    /// Days held; `None` when force-closed.
    pub days_held: Option<u32>,
    /// Realized P&L.
    pub pnl: f64,
    /// P&L as a percentage of the deployed capital.
    pub pnl_pct: f64,
    /// P&L over the initial risk of the position.
    pub r_multiple: f64,
    /// Terminal status.
    pub status: TradeStatus,
}

impl ClosedTrade {
    /// Whether the trade counts toward win/loss statistics.
    pub fn is_completed(&self) -> bool {
        self.status != TradeStatus::ForcedOpenAtEnd
    }

    /// Whether the trade is a completed winner.
    pub fn is_win(&self) -> bool {
        self.status == TradeStatus::Win
    }
}

#[cfg(test)]
fn resolved(side: PositionSide, label: Option<OutcomeLabel>) -> ResolvedTrade {
    let entry_time = DateTime::from_timestamp(1_600_000_000, 0).unwrap();
    ResolvedTrade {
        symbol: "SPY".to_string(),
        zone_id: 11,
        zone_type: match side {
            PositionSide::Long => ZoneType::Demand,
            PositionSide::Short => ZoneType::Supply,
        },
        side,
        entry_time,
        entry_price: 100.0,
        stop_price: 95.0,
        target_price: Some(110.0),
        risk_per_share: 5.0,
        exit: None,
        label,
    }
}

#[cfg(test)]
fn exit_at(price: f64) -> ExitOutcome {
    ExitOutcome {
        exit_price: price,
        exit_time: DateTime::from_timestamp(1_600_000_000 + 86_400 * 3, 0).unwrap(),
        reason: ExitReason::TimeExit,
        days_held: 3,
    }
}

#[cfg(test)]
#[test]
fn long_position_pnl() {
    let position = Position::from((&resolved(PositionSide::Long, None), 4));
    assert_eq!(position.capital_deployed(), 400.0);

    let trade = position.close(&exit_at(110.0));
    assert_eq!(trade.pnl, 40.0);
    assert_eq!(trade.pnl_pct, 10.0);
    assert_eq!(trade.r_multiple, 2.0);
    assert_eq!(trade.status, TradeStatus::Win);
    assert!(trade.is_completed());
}

#[cfg(test)]
#[test]
fn short_position_pnl() {
    let position = Position::from((&resolved(PositionSide::Short, None), 4));
    let trade = position.close(&exit_at(110.0));
    assert_eq!(trade.pnl, -40.0);
    assert_eq!(trade.r_multiple, -2.0);
    assert_eq!(trade.status, TradeStatus::Loss);
}

#[cfg(test)]
#[test]
fn short_loss_is_capped_at_deployed_capital() {
    let position = Position::from((&resolved(PositionSide::Short, None), 4));
    let trade = position.close(&exit_at(250.0));
    assert_eq!(trade.exit_price, 200.0);
    assert_eq!(trade.pnl, -400.0);
    assert_eq!(trade.pnl, -trade.capital_deployed);
    assert_eq!(trade.status, TradeStatus::Loss);
}

#[cfg(test)]
#[test]
fn breakeven_position() {
    let position = Position::from((&resolved(PositionSide::Long, None), 4));
    let trade = position.close(&exit_at(100.0));
    assert_eq!(trade.pnl, 0.0);
    assert_eq!(trade.status, TradeStatus::Breakeven);
}

#[cfg(test)]
#[test]
fn label_overrides_pnl_sign() {
    let position = Position::from((&resolved(PositionSide::Long, Some(OutcomeLabel::Breakeven)), 4));
    let trade = position.close(&exit_at(100.5));
    assert_eq!(trade.pnl, 2.0);
    assert_eq!(trade.status, TradeStatus::Breakeven);
}

#[cfg(test)]
#[test]
fn forced_close_is_flat() {
    let position = Position::from((&resolved(PositionSide::Long, Some(OutcomeLabel::Win)), 4));
    let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    let trade = position.force_close(at);
    assert_eq!(trade.pnl, 0.0);
    assert_eq!(trade.exit_price, 100.0);
    assert_eq!(trade.exit_time, at);
    assert_eq!(trade.exit_reason, None);
    assert_eq!(trade.status, TradeStatus::ForcedOpenAtEnd);
    assert!(!trade.is_completed());
}
