//! Parameter grids and parallel sweeps.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::params::{BacktestError, BacktestParams};
use super::simulator::{run, BacktestRun};
use crate::domain::Candle;

/// Cartesian grid over the four strategy knobs.
///
/// Costs, clock and scorer weights come from the base params passed to
/// [`ParamGrid::expand`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamGrid {
    pub profit_pcts: Vec<f64>,
    pub loss_pcts: Vec<f64>,
    pub min_holds: Vec<usize>,
    pub trade_qualities: Vec<f64>,
}

impl Default for ParamGrid {
    fn default() -> Self {
        Self {
            profit_pcts: vec![0.003, 0.005, 0.01],
            loss_pcts: vec![0.002, 0.005],
            min_holds: vec![4, 8, 16],
            trade_qualities: vec![40.0, 55.0, 70.0],
        }
    }
}

impl ParamGrid {
    pub fn size(&self) -> usize {
        self.profit_pcts.len() * self.loss_pcts.len() * self.min_holds.len() * self.trade_qualities.len()
    }

    /// All combinations, in a fixed nesting order (profit, loss, hold, quality).
    pub fn expand(&self, base: &BacktestParams) -> Result<Vec<BacktestParams>, BacktestError> {
        let mut out = Vec::with_capacity(self.size());
        for &profit_pct in &self.profit_pcts {
            for &loss_pct in &self.loss_pcts {
                for &min_hold in &self.min_holds {
                    for &trade_quality in &self.trade_qualities {
                        let params = BacktestParams {
                            profit_pct,
                            loss_pct,
                            min_hold,
                            trade_quality,
                            ..base.clone()
                        };
                        params.validate()?;
                        out.push(params);
                    }
                }
            }
        }
        if out.is_empty() {
            return Err(BacktestError::EmptyGrid);
        }
        Ok(out)
    }
}

/// Run every parameter set against the same candles in parallel.
///
/// Results come back in input order.
pub fn sweep(candles: &[Candle], params: &[BacktestParams]) -> Vec<BacktestRun> {
    params.par_iter().map(|p| run(candles, p)).collect()
}
