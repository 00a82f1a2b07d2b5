//! Run configuration.
//!
//! A [`BacktestConfig`] is validated once, before any candidate is touched.
//! Everything it rejects surfaces to the caller as an [`Error`]; nothing past
//! validation is fatal.

use std::str::FromStr;

use crate::engine::{ExitStrategy, ZoneType};
use crate::errors::{Error, Result};

use chrono::{DateTime, Utc};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Which zones a run trades.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ZoneFilter {
    /// Demand and supply.
    #[default]
    All,
    /// Demand zones only (long trades).
    Demand,
    /// Supply zones only (short trades).
    Supply,
}

impl ZoneFilter {
    /// Whether a zone of type `zone_type` passes the filter.
    pub fn accepts(&self, zone_type: ZoneType) -> bool {
        match self {
            Self::All => true,
            Self::Demand => zone_type == ZoneType::Demand,
            Self::Supply => zone_type == ZoneType::Supply,
        }
    }
}

impl FromStr for ZoneFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "both" => Ok(Self::All),
            "demand" => Ok(Self::Demand),
            "supply" => Ok(Self::Supply),
            other => Err(Error::UnknownZoneType(other.to_string())),
        }
    }
}

/// What a new position is sized against.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizingBase {
    /// Free cash plus capital deployed in open positions.
    Equity,
    /// Free cash only.
    AvailableCash,
}

/// Parameters of one backtest run.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    /// Starting cash.
    pub initial_capital: f64,
    /// Maximum number of positions open at once.
    pub max_positions: usize,
    /// Exit policy and its parameters.
    pub exit_strategy: ExitStrategy,
    /// Zone types traded.
    pub zone_type: ZoneFilter,
    /// Timeframes traded; empty trades every timeframe.
    pub timeframe_ids: Vec<u32>,
    /// Minimum sizing fraction applied over the estimated half-Kelly.
    pub min_half_kelly: f64,
    /// Fewest resolved outcomes needed before the Kelly estimate is trusted.
    pub kelly_min_trades: usize,
    /// Smallest capital commitment accepted for a position.
    pub min_position_capital: f64,
    /// Overrides the sizing base chosen for the exit policy.
    pub sizing_base: Option<SizingBase>,
    /// Overrides the Sharpe annualization factor chosen for the exit policy.
    pub annualization_factor: Option<f64>,
    /// End of the simulated window; exits after it are force-closed.
    pub window_end: Option<DateTime<Utc>>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: 10_000.0,
            max_positions: 5,
            exit_strategy: ExitStrategy::default(),
            zone_type: ZoneFilter::All,
            timeframe_ids: Vec::new(),
            min_half_kelly: 0.05,
            kelly_min_trades: 30,
            min_position_capital: 100.0,
            sizing_base: None,
            annualization_factor: None,
            window_end: None,
        }
    }
}

impl BacktestConfig {
    /// Rejects configurations the engine cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.initial_capital <= 0.0 || !self.initial_capital.is_finite() {
            return Err(Error::NegZeroBalance(self.initial_capital));
        }
        if self.max_positions == 0 {
            return Err(Error::ZeroMaxPositions);
        }
        if !(self.min_half_kelly > 0.0 && self.min_half_kelly <= 1.0) {
            return Err(Error::InvalidKellyFloor(self.min_half_kelly));
        }
        if self.min_position_capital < 0.0 || !self.min_position_capital.is_finite() {
            return Err(Error::InvalidMinCapital(self.min_position_capital));
        }
        if let Some(factor) = self.annualization_factor {
            if factor <= 0.0 || !factor.is_finite() {
                return Err(Error::InvalidAnnualization(factor));
            }
        }
        self.exit_strategy.validate()
    }

    /// Sizing base of the run.
    ///
    /// Replayed trades are sized on free cash since their entries and exits are
    /// independent events; scanned candidates are sized on total equity.
    pub fn sizing_base(&self) -> SizingBase {
        self.sizing_base.unwrap_or(match self.exit_strategy {
            ExitStrategy::HistoricalReplay => SizingBase::AvailableCash,
            _ => SizingBase::Equity,
        })
    }

    /// Sharpe annualization factor of the run.
    ///
    /// 252 for one-day holds, 52 for every multi-day policy.
    pub fn annualization_factor(&self) -> f64 {
        self.annualization_factor.unwrap_or(match self.exit_strategy {
            ExitStrategy::HoldingPeriod { days: 1 } => 252.0,
            _ => 52.0,
        })
    }

    /// Whether a zone passes the zone-type and timeframe filters.
    pub fn accepts(&self, zone_type: ZoneType, timeframe_id: Option<u32>) -> bool {
        let timeframe_ok = self.timeframe_ids.is_empty()
            || timeframe_id.is_some_and(|timeframe| self.timeframe_ids.contains(&timeframe));
        self.zone_type.accepts(zone_type) && timeframe_ok
    }
}

#[cfg(test)]
#[test]
fn default_config_is_valid() {
    let config = BacktestConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.sizing_base(), SizingBase::Equity);
    assert_eq!(config.annualization_factor(), 52.0);
}

#[cfg(test)]
#[test]
fn invalid_configs() {
    let config = BacktestConfig {
        initial_capital: 0.0,
        ..Default::default()
    };
    assert!(matches!(config.validate(), Err(Error::NegZeroBalance(_))));

    let config = BacktestConfig {
        max_positions: 0,
        ..Default::default()
    };
    assert!(matches!(config.validate(), Err(Error::ZeroMaxPositions)));

    let config = BacktestConfig {
        min_half_kelly: 0.0,
        ..Default::default()
    };
    assert!(matches!(config.validate(), Err(Error::InvalidKellyFloor(_))));

    let config = BacktestConfig {
        exit_strategy: ExitStrategy::HoldingPeriod { days: 7 },
        ..Default::default()
    };
    assert!(matches!(config.validate(), Err(Error::InvalidHoldingPeriod(7))));

    let config = BacktestConfig {
        annualization_factor: Some(-1.0),
        ..Default::default()
    };
    assert!(matches!(config.validate(), Err(Error::InvalidAnnualization(_))));
}

#[cfg(test)]
#[test]
fn per_mode_defaults() {
    let config = BacktestConfig {
        exit_strategy: ExitStrategy::HistoricalReplay,
        ..Default::default()
    };
    assert_eq!(config.sizing_base(), SizingBase::AvailableCash);

    let config = BacktestConfig {
        exit_strategy: ExitStrategy::HoldingPeriod { days: 1 },
        sizing_base: Some(SizingBase::AvailableCash),
        ..Default::default()
    };
    assert_eq!(config.annualization_factor(), 252.0);
    assert_eq!(config.sizing_base(), SizingBase::AvailableCash);
}

#[cfg(test)]
#[test]
fn zone_and_timeframe_filters() {
    let config = BacktestConfig {
        zone_type: "supply".parse().unwrap(),
        timeframe_ids: vec![2, 3],
        ..Default::default()
    };
    assert!(config.accepts(ZoneType::Supply, Some(3)));
    assert!(!config.accepts(ZoneType::Demand, Some(3)));
    assert!(!config.accepts(ZoneType::Supply, Some(1)));
    assert!(!config.accepts(ZoneType::Supply, None));
    assert!(BacktestConfig::default().accepts(ZoneType::Demand, None));
    assert!(matches!("sideways".parse::<ZoneFilter>(), Err(Error::UnknownZoneType(_))));
}

#[cfg(all(test, feature = "serde"))]
#[test]
fn config_from_json() {
    let config: BacktestConfig = serde_json::from_str(
        r#"{
            "initial_capital": 25000,
            "max_positions": 3,
            "exit_strategy": { "kind": "holding_period", "days": 10 },
            "zone_type": "demand"
        }"#,
    )
    .unwrap();
    assert_eq!(config.initial_capital, 25_000.0);
    assert_eq!(config.exit_strategy, ExitStrategy::HoldingPeriod { days: 10 });
    assert_eq!(config.zone_type, ZoneFilter::Demand);
    assert_eq!(config.min_half_kelly, 0.05);
    assert_eq!(config.kelly_min_trades, 30);

    let config: BacktestConfig = serde_json::from_str(r#"{ "exit_strategy": { "kind": "stop_target" } }"#).unwrap();
    assert_eq!(config.exit_strategy, ExitStrategy::StopTarget { min_risk_reward: 3.0 });
}
