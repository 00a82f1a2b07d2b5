use std::collections::BTreeMap;
use std::str::FromStr;

use crate::errors::{Error, Result};

use chrono::{DateTime, Utc};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Holding horizons (in days) accepted by the holding-period policy.
pub const HOLDING_PERIODS: [u32; 8] = [1, 2, 3, 5, 10, 20, 22, 65];

/// Horizons (in days) scanned, in order, by the stop/target policies.
pub const SCAN_HORIZONS: [u32; 6] = [1, 2, 3, 5, 10, 20];

/// Side of a position.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PositionSide {
    /// Profits when the price rises.
    Long,
    /// Profits when the price falls.
    Short,
}

impl PositionSide {
    /// Profit per share when moving from `entry` to `exit`.
    pub fn pnl_per_share(&self, entry: f64, exit: f64) -> f64 {
        match self {
            Self::Long => exit - entry,
            Self::Short => entry - exit,
        }
    }
}

/// Kind of zone a retest happened on.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ZoneType {
    /// Support area, traded long.
    Demand,
    /// Resistance area, traded short.
    Supply,
}

impl ZoneType {
    /// Direction traded on a bounce off this zone.
    pub fn side(&self) -> PositionSide {
        match self {
            Self::Demand => PositionSide::Long,
            Self::Supply => PositionSide::Short,
        }
    }
}

impl FromStr for ZoneType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "demand" => Ok(Self::Demand),
            "supply" => Ok(Self::Supply),
            other => Err(Error::UnknownZoneType(other.to_string())),
        }
    }
}

/// A zone retest that may be entered.
///
/// `forward_closes` maps a holding horizon in days to the close observed that
/// many days after entry. Horizons without data are absent.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateEntry {
    symbol: String,
    zone_id: u64,
    zone_type: ZoneType,
    entry_time: DateTime<Utc>,
    entry_price: f64,
    zone_low: f64,
    zone_high: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    timeframe_id: Option<u32>,
    #[cfg_attr(feature = "serde", serde(default))]
    forward_closes: BTreeMap<u32, f64>,
}

impl CandidateEntry {
    /// Returns the symbol.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Returns the zone identifier.
    pub fn zone_id(&self) -> u64 {
        self.zone_id
    }

    /// Returns the zone type.
    pub fn zone_type(&self) -> ZoneType {
        self.zone_type
    }

    /// Returns the entry timestamp.
    pub fn entry_time(&self) -> DateTime<Utc> {
        self.entry_time
    }

    /// Returns the entry price.
    pub fn entry_price(&self) -> f64 {
        self.entry_price
    }

    /// Returns the zone lower bound.
    pub fn zone_low(&self) -> f64 {
        self.zone_low
    }

    /// Returns the zone upper bound.
    pub fn zone_high(&self) -> f64 {
        self.zone_high
    }

    /// Returns the timeframe the zone was detected on, if known.
    pub fn timeframe_id(&self) -> Option<u32> {
        self.timeframe_id
    }

    /// Returns the close observed `days` after entry, if any.
    pub fn forward_close(&self, days: u32) -> Option<f64> {
        self.forward_closes.get(&days).copied().filter(|price| *price > 0.0 && price.is_finite())
    }

    /// Returns every observed forward close, by ascending horizon.
    pub fn forward_closes(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        self.forward_closes
            .iter()
            .map(|(days, price)| (*days, *price))
            .filter(|(_, price)| *price > 0.0 && price.is_finite())
    }
}

/// Builder for [`CandidateEntry`].
#[derive(Debug, Default)]
pub struct CandidateBuilder {
    symbol: Option<String>,
    zone_id: Option<u64>,
    zone_type: Option<ZoneType>,
    entry_time: Option<DateTime<Utc>>,
    entry_price: Option<f64>,
    zone_low: Option<f64>,
    zone_high: Option<f64>,
    timeframe_id: Option<u32>,
    forward_closes: BTreeMap<u32, f64>,
}

impl CandidateBuilder {
    /// Creates an empty builder.
    pub fn builder() -> Self {
        Self::default()
    }

    /// Sets the symbol.
    pub fn symbol(mut self, symbol: impl ToString) -> Self {
        self.symbol = Some(symbol.to_string());
        self
    }

    /// Sets the zone identifier.
    pub fn zone_id(mut self, zone_id: u64) -> Self {
        self.zone_id = Some(zone_id);
        self
    }

    /// Sets the zone type.
    pub fn zone_type(mut self, zone_type: ZoneType) -> Self {
        self.zone_type = Some(zone_type);
        self
    }

    /// Sets the entry timestamp.
    pub fn entry_time(mut self, entry_time: DateTime<Utc>) -> Self {
        self.entry_time = Some(entry_time);
        self
    }

    /// Sets the entry price.
    pub fn entry_price(mut self, entry_price: f64) -> Self {
        self.entry_price = Some(entry_price);
        self
    }

    /// Sets both zone bounds.
    pub fn zone(mut self, low: f64, high: f64) -> Self {
        self.zone_low = Some(low);
        self.zone_high = Some(high);
        self
    }

    /// Sets the timeframe identifier.
    pub fn timeframe_id(mut self, timeframe_id: u32) -> Self {
        self.timeframe_id = Some(timeframe_id);
        self
    }

    /// Records the close observed `days` after entry.
    pub fn forward_close(mut self, days: u32, price: f64) -> Self {
        self.forward_closes.insert(days, price);
        self
    }

    /// Validates the fields and builds the candidate.
    pub fn build(self) -> Result<CandidateEntry> {
        let entry_price = self.entry_price.ok_or(Error::MissingField("entry_price"))?;
        let zone_low = self.zone_low.ok_or(Error::MissingField("zone_low"))?;
        let zone_high = self.zone_high.ok_or(Error::MissingField("zone_high"))?;

        for price in [entry_price, zone_low, zone_high] {
            if price <= 0.0 || !price.is_finite() {
                return Err(Error::InvalidPrice(price));
            }
        }
        if zone_low > zone_high {
            return Err(Error::InvertedZone(zone_low, zone_high));
        }
        if let Some((_, price)) = self.forward_closes.iter().find(|(_, p)| **p <= 0.0 || !p.is_finite()) {
            return Err(Error::InvalidPrice(*price));
        }

        Ok(CandidateEntry {
            symbol: self.symbol.ok_or(Error::MissingField("symbol"))?,
            zone_id: self.zone_id.ok_or(Error::MissingField("zone_id"))?,
            zone_type: self.zone_type.ok_or(Error::MissingField("zone_type"))?,
            entry_time: self.entry_time.ok_or(Error::MissingField("entry_time"))?,
            entry_price,
            zone_low,
            zone_high,
            timeframe_id: self.timeframe_id,
            forward_closes: self.forward_closes,
        })
    }
}

/// Outcome label attached to a trade resolved upstream.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeLabel {
    /// Closed with a profit.
    Win,
    /// Closed with a loss.
    Loss,
    /// Closed flat.
    Breakeven,
}

/// A trade whose entry and exit were already resolved upstream.
///
/// A trade without `exit_time`/`exit_price` was still open when the data was
/// captured; the simulator force-closes it at the end of the run.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalTrade {
    /// Traded symbol.
    pub symbol: String,
    /// Zone the trade was taken on.
    pub zone_id: u64,
    /// Zone type, which fixes the direction.
    pub zone_type: ZoneType,
    /// Timeframe the zone was detected on.
    #[cfg_attr(feature = "serde", serde(default))]
    pub timeframe_id: Option<u32>,
    /// Entry timestamp.
    pub entry_time: DateTime<Utc>,
    /// Entry fill price.
    pub entry_price: f64,
    /// Protective stop set at entry.
    pub stop_price: f64,
    /// Profit target set at entry.
    #[cfg_attr(feature = "serde", serde(default))]
    pub target_price: Option<f64>,
    /// Exit timestamp, if closed.
    #[cfg_attr(feature = "serde", serde(default))]
    pub exit_time: Option<DateTime<Utc>>,
    /// Exit fill price, if closed.
    #[cfg_attr(feature = "serde", serde(default))]
    pub exit_price: Option<f64>,
    /// Outcome recorded upstream.
    #[cfg_attr(feature = "serde", serde(default))]
    pub outcome: Option<OutcomeLabel>,
}

/// Volume profile node classification.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    /// High-volume node.
    Hvn,
    /// Point of control.
    Poc,
    /// Low-volume node, never used as a target.
    Lvn,
}

/// A price level from a symbol's volume profile.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeNode {
    /// Symbol the profile belongs to.
    pub symbol: String,
    /// Node price level.
    pub price: f64,
    /// Node classification.
    pub node_type: NodeType,
    /// When the profile period containing the node started, if known.
    #[cfg_attr(feature = "serde", serde(default))]
    pub as_of: Option<DateTime<Utc>>,
}

impl VolumeNode {
    /// Whether the node can serve as a profit target.
    pub fn is_target(&self) -> bool {
        matches!(self.node_type, NodeType::Hvn | NodeType::Poc) && self.price > 0.0 && self.price.is_finite()
    }
}

/// Everything a run consumes, already fetched from the data store.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    /// Zone retest candidates.
    #[cfg_attr(feature = "serde", serde(default))]
    pub candidates: Vec<CandidateEntry>,
    /// Trades resolved upstream.
    #[cfg_attr(feature = "serde", serde(default))]
    pub trades: Vec<HistoricalTrade>,
    /// Volume profile levels, all symbols mixed.
    #[cfg_attr(feature = "serde", serde(default))]
    pub volume_nodes: Vec<VolumeNode>,
}

impl Dataset {
    /// Creates a dataset of zone candidates.
    pub fn from_candidates(candidates: Vec<CandidateEntry>) -> Self {
        Self {
            candidates,
            ..Default::default()
        }
    }

    /// Creates a dataset of upstream-resolved trades.
    pub fn from_trades(trades: Vec<HistoricalTrade>) -> Self {
        Self {
            trades,
            ..Default::default()
        }
    }

    /// Adds volume profile nodes.
    pub fn with_volume_nodes(mut self, volume_nodes: Vec<VolumeNode>) -> Self {
        self.volume_nodes = volume_nodes;
        self
    }
}

#[cfg(test)]
fn sample_builder() -> CandidateBuilder {
    CandidateBuilder::builder()
        .symbol("AAPL")
        .zone_id(7)
        .zone_type(ZoneType::Demand)
        .entry_time(DateTime::default())
        .entry_price(100.0)
        .zone(90.0, 95.0)
}

#[cfg(test)]
#[test]
fn build_candidate() {
    let candidate = sample_builder().forward_close(5, 110.0).build().unwrap();
    assert_eq!(candidate.symbol(), "AAPL");
    assert_eq!(candidate.zone_type().side(), PositionSide::Long);
    assert_eq!(candidate.forward_close(5), Some(110.0));
    assert_eq!(candidate.forward_close(10), None);
}

#[cfg(test)]
#[test]
fn build_candidate_inverted_zone() {
    let result = sample_builder().zone(95.0, 90.0).build();
    assert!(matches!(result, Err(Error::InvertedZone(_, _))));
}

#[cfg(test)]
#[test]
fn build_candidate_invalid_price() {
    let result = sample_builder().entry_price(0.0).build();
    assert!(matches!(result, Err(Error::InvalidPrice(_))));

    let result = sample_builder().forward_close(1, -3.0).build();
    assert!(matches!(result, Err(Error::InvalidPrice(_))));
}

#[cfg(test)]
#[test]
fn build_candidate_missing_field() {
    let result = CandidateBuilder::builder().entry_price(1.0).zone(1.0, 2.0).build();
    assert!(matches!(result, Err(Error::MissingField("symbol"))));
}

#[cfg(test)]
#[test]
fn zone_type_from_str() {
    assert_eq!("Supply".parse::<ZoneType>().unwrap(), ZoneType::Supply);
    assert_eq!(ZoneType::Supply.side(), PositionSide::Short);
    assert!(matches!("both".parse::<ZoneType>(), Err(Error::UnknownZoneType(_))));
}

#[cfg(test)]
#[test]
fn pnl_per_share_by_side() {
    assert_eq!(PositionSide::Long.pnl_per_share(100.0, 110.0), 10.0);
    assert_eq!(PositionSide::Short.pnl_per_share(100.0, 110.0), -10.0);
}
