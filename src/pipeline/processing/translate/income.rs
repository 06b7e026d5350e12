use std::collections::BTreeMap;

use super::rules::YearWindow;
use crate::error::{Result, WranglerError};
use crate::pipeline::processing::inflation::InflationAdjuster;
use crate::types::FieldValue;

/// Topcode-aware income translation with inflation adjustment
#[derive(Debug, Clone, Default)]
pub struct IncomeRule {
    topcodes: BTreeMap<i32, i64>,
    window: YearWindow,
}

impl IncomeRule {
    pub fn new(topcodes: BTreeMap<i32, i64>, window: YearWindow) -> Self {
        Self { topcodes, window }
    }

    pub fn ceiling(&self, year: i32) -> Option<i64> {
        self.topcodes.get(&year).copied()
    }

    /// A value at the year's ceiling becomes `Topcode`; above it is an error.
    /// Positive amounts are restated in reference-year dollars, while zero
    /// and negative non-response codes pass through unadjusted.
    pub fn apply(
        &self,
        field: &str,
        raw: i64,
        year: i32,
        adjuster: &InflationAdjuster,
    ) -> Result<FieldValue> {
        self.window.check(field, Some(year))?;

        if let Some(ceiling) = self.ceiling(year) {
            if raw == ceiling {
                return Ok(FieldValue::Topcode);
            }
            if raw > ceiling {
                return Err(WranglerError::ValueOutOfRange {
                    field: field.to_string(),
                    value: raw,
                    ceiling,
                    year,
                });
            }
        }

        if raw > 0 {
            Ok(FieldValue::Amount(adjuster.adjust(raw as f64, year)?))
        } else {
            Ok(FieldValue::Amount(raw as f64))
        }
    }
}
