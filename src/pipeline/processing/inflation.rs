use std::collections::BTreeMap;

use crate::error::{Result, WranglerError};
use crate::pipeline::reference::EconomicContext;

/// Restates incomes in the terminal reference year of the economic context.
///
/// `adjust(v, y) = v * Π_{t=y}^{ref-1} (1 + inflation[t])`
#[derive(Debug, Clone)]
pub struct InflationAdjuster {
    rates: BTreeMap<i32, f64>,
    first_year: i32,
    reference_year: i32,
}

impl InflationAdjuster {
    pub fn from_context(context: &EconomicContext) -> Self {
        let rates: BTreeMap<i32, f64> = context
            .iter()
            .map(|row| (row.year, row.inflation))
            .collect();
        Self {
            rates,
            first_year: context.first_year(),
            reference_year: context.reference_year(),
        }
    }

    pub fn first_year(&self) -> i32 {
        self.first_year
    }

    pub fn reference_year(&self) -> i32 {
        self.reference_year
    }

    pub fn covers(&self, year: i32) -> bool {
        self.first_year <= year && year <= self.reference_year
    }

    /// Compounded multiplier taking `year` dollars to reference-year dollars.
    pub fn factor(&self, year: i32) -> Result<f64> {
        if !self.covers(year) {
            return Err(WranglerError::YearOutOfDomain {
                year,
                reason: format!(
                    "inflation data covers {}..={}",
                    self.first_year, self.reference_year
                ),
            });
        }
        let mut factor = 1.0;
        for y in year..self.reference_year {
            let rate = self.rates.get(&y).ok_or_else(|| WranglerError::YearOutOfDomain {
                year: y,
                reason: "no inflation rate recorded".to_string(),
            })?;
            factor *= 1.0 + rate;
        }
        Ok(factor)
    }

    pub fn adjust(&self, value: f64, year: i32) -> Result<f64> {
        if year == self.reference_year {
            return Ok(value);
        }
        Ok(value * self.factor(year)?)
    }

    /// Inverse of `adjust`: restates a reference-year amount in `year` dollars.
    pub fn deflate(&self, value: f64, year: i32) -> Result<f64> {
        if year == self.reference_year {
            return Ok(value);
        }
        Ok(value / self.factor(year)?)
    }
}
