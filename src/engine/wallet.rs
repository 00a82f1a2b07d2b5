#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Relative tolerance for float residue when releasing capital.
const EPSILON: f64 = 1e-9;

/// Cash ledger of a run: free cash and capital deployed in open positions.
///
/// `balance + deployed == initial_balance + realized_pnl` holds after every
/// operation.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Wallet {
    // Starting cash
    initial_balance: f64,
    // Free cash
    balance: f64,
    // Capital held by open positions
    deployed: f64,
    // Sum of closed positions' P&L
    realized_pnl: f64,
}

impl Wallet {
    /// Creates a new wallet with the given initial balance.
    /// Non-positive balances are rejected.
    pub fn new(balance: f64) -> Result<Self> {
        if balance <= 0.0 || !balance.is_finite() {
            return Err(Error::NegZeroBalance(balance));
        }

        Ok(Self {
            balance,
            deployed: 0.0,
            realized_pnl: 0.0,
            initial_balance: balance,
        })
    }

    /// Returns the initial balance.
    pub fn initial_balance(&self) -> f64 {
        self.initial_balance
    }

    /// Returns the free cash.
    pub fn balance(&self) -> f64 {
        self.balance
    }

    /// Returns the capital held by open positions.
    pub fn deployed(&self) -> f64 {
        self.deployed
    }

    /// Returns the realized profit and loss.
    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    /// Returns free cash plus deployed capital.
    pub fn equity(&self) -> f64 {
        self.balance + self.deployed
    }

    /// Moves `amount` from free cash into an open position.
    pub(crate) fn deploy(&mut self, amount: f64) -> Result<f64> {
        if amount <= 0.0 || !amount.is_finite() {
            return Err(Error::NegZeroBalance(amount));
        }
        if amount > self.balance {
            return Err(Error::InsufficientFunds(amount, self.balance));
        }
        self.balance -= amount;
        self.deployed += amount;
        Ok(self.balance)
    }

    /// Returns a position's capital plus its P&L to free cash.
    pub(crate) fn release(&mut self, amount: f64, pnl: f64) -> Result<f64> {
        if amount <= 0.0 || !amount.is_finite() {
            return Err(Error::NegZeroBalance(amount));
        }
        // the running total drifts by a few ulps of the largest amount seen
        let tolerance = EPSILON * amount.max(self.deployed).max(1.0);
        if amount - self.deployed > tolerance {
            return Err(Error::ReleaseBalance(self.deployed, amount));
        }
        self.deployed = self.deployed - amount;
        if self.deployed.abs() <= tolerance {
            self.deployed = 0.0;
        }
        self.balance += amount + pnl;
        self.realized_pnl += pnl;
        Ok(self.balance)
    }
}

#[cfg(test)]
#[test]
fn new_wallet_valid_balance() {
    let wallet = Wallet::new(100.0).unwrap();
    assert_eq!(wallet.balance(), 100.0);
    assert_eq!(wallet.equity(), 100.0);
    assert_eq!(wallet.deployed, 0.0);
}

#[cfg(test)]
#[test]
fn new_wallet_invalid_balance() {
    let result = Wallet::new(0.0);
    assert!(matches!(result, Err(Error::NegZeroBalance(_))));

    let result = Wallet::new(-10.0);
    assert!(matches!(result, Err(Error::NegZeroBalance(_))));
}

#[cfg(test)]
#[test]
fn deploy_insufficient_funds() {
    let mut wallet = Wallet::new(100.0).unwrap();
    let result = wallet.deploy(150.0);
    assert!(matches!(result, Err(Error::InsufficientFunds(_, _))));
    assert_eq!(wallet.balance, 100.0);
}

#[cfg(test)]
#[test]
fn deploy_invalid_amount() {
    let mut wallet = Wallet::new(100.0).unwrap();
    let result = wallet.deploy(-10.0);
    assert!(matches!(result, Err(Error::NegZeroBalance(_))));
}

#[cfg(test)]
#[test]
fn release_more_than_deployed() {
    let mut wallet = Wallet::new(100.0).unwrap();
    wallet.deploy(20.0).unwrap();
    let result = wallet.release(30.0, 0.0);
    assert!(matches!(result, Err(Error::ReleaseBalance(_, _))));
}

#[cfg(test)]
#[test]
fn open_close_profit_position() {
    let mut wallet = Wallet::new(100.0).unwrap();

    // open position
    let free = wallet.deploy(20.0).unwrap();
    assert_eq!(free, 80.0);
    assert_eq!(wallet.deployed, 20.0);
    assert_eq!(wallet.equity(), 100.0);

    // close profitable position
    wallet.release(20.0, 10.0).unwrap();
    assert_eq!(wallet.balance, 110.0);
    assert_eq!(wallet.deployed, 0.0);
    assert_eq!(wallet.realized_pnl(), 10.0);
}

#[cfg(test)]
#[test]
fn open_close_loss_position() {
    let mut wallet = Wallet::new(100.0).unwrap();
    wallet.deploy(20.0).unwrap();

    // close unprofitable position
    wallet.release(20.0, -10.0).unwrap();
    assert_eq!(wallet.balance, 90.0);
    assert_eq!(wallet.deployed, 0.0);
    assert_eq!(wallet.equity(), wallet.initial_balance() + wallet.realized_pnl());
}

#[cfg(test)]
#[test]
fn release_tolerates_rounding_at_large_balances() {
    let mut wallet = Wallet::new(1e9).unwrap();
    wallet.deploy(2_345_741.718_653_604).unwrap();

    // a few ulps more than what the running total holds
    wallet.release(2_345_741.718_653_605_3, 0.0).unwrap();
    assert_eq!(wallet.deployed(), 0.0);
    assert!((wallet.equity() - 1e9).abs() < 1e-3);

    // a real overdraw is still rejected
    wallet.deploy(1_000.0).unwrap();
    assert!(matches!(wallet.release(1_000.5, 0.0), Err(Error::ReleaseBalance(_, _))));
}
