//! Strategy parameter optimization.
//!
//! This module provides tools to sweep exit policies and sizing parameters over one dataset.
//! The `Optimizer` struct runs an independent backtest for each combination, while the
//! `ParameterCombination` trait defines how to generate parameter sets.
//!
//! Each run owns its own ledger, so runs are spread across threads with `rayon`.
//! A sweep can be cancelled between runs, never in the middle of one.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::BacktestConfig;
use crate::engine::{Dataset, run_backtest};
use crate::errors::{Error, Result};
use crate::metrics::BacktestResult;

use rayon::prelude::*;
use tracing::{debug, info};

/// Trait defining how to generate parameter combinations for optimization.
///
/// Implement this trait for your parameter types to define how combinations should be generated.
/// The associated type `Output` represents a single parameter combination (e.g., a tuple of values).
pub trait ParameterCombination: Sync {
    /// Type representing a single parameter combination (e.g., `(u32, usize)`).
    type Output: Clone + Send + Sync;

    /// Generates all possible parameter combinations to test.
    ///
    /// # Returns
    /// A vector containing all parameter combinations.
    fn generate() -> Vec<Self::Output>;
}

/// Optimizer for testing exit policies and sizing with different parameter combinations.
#[derive(Debug)]
pub struct Optimizer<'d, PC: ParameterCombination> {
    dataset: &'d Dataset,
    base: BacktestConfig,
    cancel: Option<Arc<AtomicBool>>,
    _marker: PhantomData<PC>,
}

impl<'d, PC: ParameterCombination> Optimizer<'d, PC> {
    /// Creates a new `Optimizer` over `dataset`.
    ///
    /// # Arguments
    /// * `dataset` - Candidates, trades and volume nodes shared by every run.
    /// * `base` - Configuration each combination starts from.
    pub fn new(dataset: &'d Dataset, base: BacktestConfig) -> Self {
        Self {
            dataset,
            base,
            cancel: None,
            _marker: PhantomData,
        }
    }

    /// Stops the sweep before the next run once `flag` is set.
    pub fn cancel_on(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Runs one backtest per parameter combination.
    ///
    /// # Arguments
    /// * `combinator` - Turns a combination and the base configuration into the run's configuration.
    ///
    /// # Returns
    /// Each parameter combination with its result, in generation order.
    ///
    /// # Errors
    /// Returns the first rejected configuration, or [`Error::Cancelled`].
    pub fn with<C>(&self, combinator: C) -> Result<Vec<(PC::Output, BacktestResult)>>
    where
        C: Fn(&PC::Output, &BacktestConfig) -> Result<BacktestConfig> + Sync,
    {
        let num_cpus = num_cpus::get();
        let combinations = PC::generate();
        let chunk_size = combinations.len().div_ceil(num_cpus).max(1);
        info!(combinations = combinations.len(), chunk_size, "starting sweep");

        combinations
            .par_chunks(chunk_size)
            .map::<_, Result<_>>(|par_combinations| {
                let mut local_results = Vec::with_capacity(par_combinations.len());

                for param_set in par_combinations {
                    if self.is_cancelled() {
                        debug!("sweep cancelled");
                        return Err(Error::Cancelled);
                    }
                    let config = combinator(param_set, &self.base)?;
                    let result = run_backtest(self.dataset, &config)?;
                    local_results.push((param_set.clone(), result));
                }

                Ok(local_results)
            })
            .collect::<Result<Vec<_>>>()
            .map(|chunks| chunks.into_iter().flatten().collect())
    }
}

#[cfg(test)]
struct Parameters;

#[cfg(test)]
impl ParameterCombination for Parameters {
    type Output = (u32, usize);

    fn generate() -> Vec<Self::Output> {
        crate::engine::HOLDING_PERIODS
            .into_iter()
            .flat_map(|days| (1..=3).map(move |max_positions| (days, max_positions)))
            .collect()
    }
}

#[cfg(test)]
fn get_data() -> Dataset {
    use crate::engine::{CandidateBuilder, ZoneType};
    use chrono::{DateTime, Duration};

    let start = DateTime::from_timestamp(1_704_067_200, 0).unwrap();
    let candidates = (0..6)
        .map(|i| {
            CandidateBuilder::builder()
                .symbol(if i % 2 == 0 { "AAPL" } else { "MSFT" })
                .zone_id(i)
                .zone_type(ZoneType::Demand)
                .entry_time(start + Duration::days(i as i64 * 3))
                .entry_price(100.0)
                .zone(90.0, 95.0)
                .forward_close(1, 101.0)
                .forward_close(5, if i % 3 == 0 { 96.0 } else { 108.0 })
                .forward_close(10, 112.0)
                .build()
                .unwrap()
        })
        .collect();
    Dataset::from_candidates(candidates)
}

#[cfg(test)]
#[test]
fn optimizer_with_holding_periods() {
    use crate::engine::ExitStrategy;

    let dataset = get_data();
    let opt = Optimizer::<Parameters>::new(&dataset, BacktestConfig::default());

    let result = opt
        .with(|&(days, max_positions), base| {
            Ok(BacktestConfig {
                exit_strategy: ExitStrategy::HoldingPeriod { days },
                max_positions,
                ..base.clone()
            })
        })
        .unwrap();

    assert_eq!(result.len(), Parameters::generate().len());
    // order is kept
    assert_eq!(result[0].0, (1, 1));
    // only the 1, 5 and 10 day horizons have data
    for ((days, _), run) in &result {
        let expected = if [1, 5, 10].contains(days) { 6 } else { 0 };
        assert_eq!(run.diagnostics.resolved, expected);
    }
}

#[cfg(test)]
#[test]
fn optimizer_cancelled() {
    let dataset = get_data();
    let flag = Arc::new(AtomicBool::new(true));
    let opt = Optimizer::<Parameters>::new(&dataset, BacktestConfig::default()).cancel_on(flag);

    let result = opt.with(|_, base| Ok(base.clone()));
    assert!(matches!(result, Err(Error::Cancelled)));
}

#[cfg(test)]
#[test]
fn optimizer_rejected_config() {
    let dataset = get_data();
    let opt = Optimizer::<Parameters>::new(&dataset, BacktestConfig::default());

    let result = opt.with(|_, base| {
        Ok(BacktestConfig {
            max_positions: 0,
            ..base.clone()
        })
    });
    assert!(matches!(result, Err(Error::ZeroMaxPositions)));
}
