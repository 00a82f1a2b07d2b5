/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised at the configuration boundary and by the cash ledger.
///
/// Candidates that cannot be resolved or that hit a capital/concurrency limit
/// are not errors: they are skipped and counted in the run diagnostics.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The initial or current balance is not positive. Trading requires a positive balance.
    #[error("Balance must be positive (got: {0})")]
    NegZeroBalance(f64),

    /// The wallet does not have enough free cash to deploy the amount.
    /// Expected: {0}, Available: {1}
    #[error("Insufficient funds: required {0}, available {1}")]
    InsufficientFunds(f64, f64),

    /// Released more capital than is currently deployed.
    #[error("Release failed: deployed {0}, requested {1}")]
    ReleaseBalance(f64, f64),

    /// At least one concurrent position is required.
    #[error("Max positions must be at least 1")]
    ZeroMaxPositions,

    /// The exit strategy name is not one of the known policies.
    #[error("Unknown exit strategy: {0}")]
    UnknownExitStrategy(String),

    /// The zone filter name is not `all`, `demand` or `supply`.
    #[error("Unknown zone type: {0}")]
    UnknownZoneType(String),

    /// The holding period is not one of the supported horizons.
    #[error("Invalid holding period: {0} days (expected one of 1, 2, 3, 5, 10, 20, 22, 65)")]
    InvalidHoldingPeriod(u32),

    /// The minimum risk/reward multiple must be positive and finite.
    #[error("Risk/reward must be positive (got: {0})")]
    NegZeroRiskReward(f64),

    /// The half-Kelly floor must be in `(0, 1]`.
    #[error("Half-Kelly floor must be in (0, 1] (got: {0})")]
    InvalidKellyFloor(f64),

    /// The minimum capital per position must be non-negative and finite.
    #[error("Minimum position capital must be non-negative (got: {0})")]
    InvalidMinCapital(f64),

    /// The annualization factor must be positive and finite.
    #[error("Annualization factor must be positive (got: {0})")]
    InvalidAnnualization(f64),

    /// A price given to a builder is not positive or not finite.
    #[error("Price must be positive and finite (got: {0})")]
    InvalidPrice(f64),

    /// The zone lower bound is above its upper bound.
    #[error("Zone bounds are inverted: low {0} > high {1}")]
    InvertedZone(f64, f64),

    /// A required builder field was not provided.
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// The sweep was cancelled before every run completed.
    #[error("Parameter sweep cancelled")]
    Cancelled,

    /// Plotters failed to render a chart.
    #[error("Plotters error: {0}")]
    Plotters(String),

    /// A generic error message.
    #[error("{0}")]
    Msg(String),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error occurred.
    #[cfg(feature = "serde")]
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}
