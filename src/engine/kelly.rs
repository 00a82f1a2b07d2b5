#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Upper bound of the raw Kelly fraction.
pub const MAX_KELLY: f64 = 0.25;

/// Kelly criterion parameters estimated from resolved outcomes.
///
/// The fraction is clamped to `[0, MAX_KELLY]` and sizing uses half of it.
/// With no outcomes the estimate is neutral and `half_kelly` is zero, so callers
/// must apply their own floor before sizing with it.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KellyParams {
    /// Share of winning outcomes, in `[0, 1]`.
    pub win_rate: f64,
    /// Mean R-multiple of winners.
    pub avg_win_r: f64,
    /// Mean absolute R-multiple of losers.
    pub avg_loss_r: f64,
    /// Clamped Kelly fraction.
    pub kelly_fraction: f64,
    /// Half of `kelly_fraction`.
    pub half_kelly: f64,
    /// Number of outcomes the estimate is based on.
    pub num_trades: usize,
}

impl Default for KellyParams {
    fn default() -> Self {
        Self {
            win_rate: 0.5,
            avg_win_r: 1.0,
            avg_loss_r: 1.0,
            kelly_fraction: 0.0,
            half_kelly: 0.0,
            num_trades: 0,
        }
    }
}

impl KellyParams {
    /// Estimates the parameters from per-trade R-multiples.
    ///
    /// An outcome is a win when its R-multiple is positive; everything else,
    /// breakeven included, counts as a loss. Non-finite values are ignored.
    pub fn estimate<I>(r_multiples: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let (mut wins, mut losses) = (0usize, 0usize);
        let (mut win_sum, mut loss_sum) = (0.0, 0.0);
        for r in r_multiples.into_iter().filter(|r| r.is_finite()) {
            if r > 0.0 {
                wins += 1;
                win_sum += r;
            } else {
                losses += 1;
                loss_sum += r.abs();
            }
        }

        let total = wins + losses;
        if total == 0 {
            return Self::default();
        }

        let win_rate = wins as f64 / total as f64;
        let avg_win_r = if wins > 0 { win_sum / wins as f64 } else { 0.0 };
        let avg_loss_r = if losses > 0 { loss_sum / losses as f64 } else { 0.0 };

        let odds = if avg_loss_r == 0.0 { 1.0 } else { avg_win_r / avg_loss_r };
        let kelly = if odds > 0.0 {
            win_rate - (1.0 - win_rate) / odds
        } else {
            0.0
        };
        let kelly_fraction = kelly.clamp(0.0, MAX_KELLY);

        Self {
            win_rate,
            avg_win_r,
            avg_loss_r,
            kelly_fraction,
            half_kelly: kelly_fraction / 2.0,
            num_trades: total,
        }
    }

    /// Half-Kelly raised to `floor`.
    pub fn sizing_fraction(&self, floor: f64) -> f64 {
        self.half_kelly.max(floor)
    }
}

#[cfg(test)]
#[test]
fn estimate_empty_is_neutral() {
    let params = KellyParams::estimate(Vec::<f64>::new());
    assert_eq!(params, KellyParams::default());
    assert_eq!(params.sizing_fraction(0.05), 0.05);
}

#[cfg(test)]
#[test]
fn estimate_mixed_outcomes() {
    // 3 wins at 2R, 2 losses at 1R: b = 2, kelly = 0.6 - 0.4 / 2 = 0.4 -> clamped
    let params = KellyParams::estimate([2.0, 2.0, 2.0, -1.0, -1.0]);
    assert_eq!(params.num_trades, 5);
    assert!((params.win_rate - 0.6).abs() < 1e-12);
    assert!((params.avg_win_r - 2.0).abs() < 1e-12);
    assert!((params.avg_loss_r - 1.0).abs() < 1e-12);
    assert_eq!(params.kelly_fraction, MAX_KELLY);
    assert_eq!(params.half_kelly, MAX_KELLY / 2.0);
}

#[cfg(test)]
#[test]
fn estimate_unclamped_fraction() {
    // 1 win at 1.5R, 1 loss at 1R: b = 1.5, kelly = 0.5 - 0.5 / 1.5 = 1/6
    let params = KellyParams::estimate([1.5, -1.0]);
    assert!((params.kelly_fraction - 1.0 / 6.0).abs() < 1e-12);
    assert!((params.half_kelly - 1.0 / 12.0).abs() < 1e-12);
    assert_eq!(params.sizing_fraction(0.02), params.half_kelly);
}

#[cfg(test)]
#[test]
fn estimate_negative_edge_is_zero() {
    let params = KellyParams::estimate([0.5, -1.0, -1.0, -1.0]);
    assert_eq!(params.kelly_fraction, 0.0);
    assert_eq!(params.half_kelly, 0.0);
}

#[cfg(test)]
#[test]
fn estimate_without_losses_uses_even_odds() {
    let params = KellyParams::estimate([1.0, 3.0]);
    assert_eq!(params.avg_loss_r, 0.0);
    // b = 1, kelly = 1 - 0 = 1 -> clamped
    assert_eq!(params.kelly_fraction, MAX_KELLY);
}

#[cfg(test)]
#[test]
fn estimate_without_wins() {
    let params = KellyParams::estimate([-1.0, 0.0, f64::NAN]);
    assert_eq!(params.num_trades, 2);
    assert_eq!(params.win_rate, 0.0);
    // b = 0 -> no bet
    assert_eq!(params.kelly_fraction, 0.0);
}
