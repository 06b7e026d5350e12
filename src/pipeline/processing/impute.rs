use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::config::{CarryForwardField, ImputeConfig};
use crate::constants::{
    ADJUSTED_INCOME, HOURS_WORKED_LAST_YEAR, REGION, REGIONAL_UNEMPLOYMENT, WEEKS_WORKED_LAST_YEAR,
};
use crate::observability::metrics;
use crate::pipeline::reference::RegionContext;
use crate::types::{FieldValue, LongitudinalTable};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImputeStats {
    pub regional_attached: usize,
    pub carried_forward: usize,
    pub capped: usize,
    pub median_filled: usize,
    pub income_changes: usize,
}

/// Attaches `regional_unemployment` from the record's region in
/// `year - lag`. Records without a valid region are left alone.
pub fn attach_regional_context(table: &mut LongitudinalTable, regions: &RegionContext, lag: i32) -> usize {
    let mut attached = 0;
    for record in table.records_mut() {
        let Some(region) = record.get(REGION).and_then(|v| v.as_code()) else {
            continue;
        };
        if region < 0 {
            continue;
        }
        if let Some(rate) = regions.unemployment(region, record.year() - lag) {
            record.set(REGIONAL_UNEMPLOYMENT, FieldValue::Amount(rate));
            attached += 1;
        }
    }
    attached
}

/// Fills missing or negative quasi-static values from the respondent's most
/// recent valid value, or the field default before any has been seen.
/// The table must be sorted.
pub fn carry_forward(table: &mut LongitudinalTable, fields: &[CarryForwardField]) -> usize {
    let mut filled = 0;
    let spans = table.respondent_spans();
    let records = table.records_mut();

    for span in spans {
        let mut last_seen: HashMap<&str, FieldValue> = HashMap::new();
        for record in &mut records[span] {
            for entry in fields {
                let field = entry.field.as_str();
                match record.get(field) {
                    Some(value) if value.is_valid() => {
                        last_seen.insert(field, value);
                    }
                    _ => {
                        let fill = last_seen
                            .get(field)
                            .copied()
                            .or(entry.default.map(FieldValue::Code));
                        if let Some(fill) = fill {
                            record.set(field, fill);
                            filled += 1;
                        }
                    }
                }
            }
        }
    }
    filled
}

/// Mean, sample standard deviation and median of the non-negative values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierStats {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub median: f64,
}

impl OutlierStats {
    pub fn from_values(mut values: Vec<f64>) -> Option<Self> {
        values.retain(|v| *v >= 0.0);
        if values.is_empty() {
            return None;
        }
        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let std_dev = if count > 1 {
            let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
            (sum_sq / (count - 1) as f64).sqrt()
        } else {
            0.0
        };
        values.sort_by(|a, b| a.total_cmp(b));
        let median = if count % 2 == 0 {
            (values[count / 2 - 1] + values[count / 2]) / 2.0
        } else {
            values[count / 2]
        };
        Some(Self {
            count,
            mean,
            std_dev,
            median,
        })
    }

    pub fn ceiling(&self, std_devs: f64) -> f64 {
        self.mean + std_devs * self.std_dev
    }
}

fn field_stats(table: &LongitudinalTable, field: &str) -> Option<OutlierStats> {
    OutlierStats::from_values(
        table
            .iter()
            .filter_map(|r| r.get(field).and_then(|v| v.as_f64()))
            .collect(),
    )
}

/// Caps `field` at `mean + std_devs * std_dev` over the whole table.
pub fn cap_outliers(table: &mut LongitudinalTable, field: &str, std_devs: f64) -> usize {
    let Some(stats) = field_stats(table, field) else {
        return 0;
    };
    let ceiling = stats.ceiling(std_devs);
    let mut capped = 0;
    for record in table.records_mut() {
        if let Some(value) = record.get(field).and_then(|v| v.as_f64()) {
            if value > ceiling {
                record.set(field, FieldValue::Amount(ceiling));
                capped += 1;
            }
        }
    }
    debug!(field, ceiling, capped, "Capped outliers");
    capped
}

/// Replaces negative values of `field` with the table median.
pub fn replace_negatives_with_median(table: &mut LongitudinalTable, field: &str) -> usize {
    let Some(stats) = field_stats(table, field) else {
        return 0;
    };
    let mut replaced = 0;
    for record in table.records_mut() {
        if let Some(value) = record.get(field).and_then(|v| v.as_f64()) {
            if value < 0.0 {
                record.set(field, FieldValue::Amount(stats.median));
                replaced += 1;
            }
        }
    }
    replaced
}

/// Relative change from `prior` to `current`, capped at `cap`.
/// A negative current income is a non-response and yields nothing.
pub fn income_change(current: f64, prior: f64, cap: f64) -> Option<f64> {
    if current < 0.0 {
        return None;
    }
    let change = if current == 0.0 {
        if prior > 0.0 {
            -1.0
        } else {
            0.0
        }
    } else if prior <= 0.0 {
        cap
    } else {
        (current / prior - 1.0).min(cap)
    };
    Some(change)
}

/// Sets `income_change` on every record, using the record's own income when
/// no prior income was observed.
pub fn derive_income_change(table: &mut LongitudinalTable, cap: f64) -> usize {
    let mut derived = 0;
    for record in table.records_mut() {
        let current = record.get(ADJUSTED_INCOME).and_then(|v| v.as_f64());
        record.income_change = current.and_then(|current| {
            income_change(current, record.prior_income.unwrap_or(current), cap)
        });
        if record.income_change.is_some() {
            derived += 1;
        }
    }
    derived
}

/// The final pass over a labeled cohort table
#[derive(Debug, Clone)]
pub struct Imputer {
    carry_forward: Vec<CarryForwardField>,
    outlier_std_devs: f64,
    income_change_cap: f64,
}

impl Imputer {
    pub fn from_config(config: &ImputeConfig) -> Self {
        Self {
            carry_forward: config.carry_forward.clone(),
            outlier_std_devs: config.outlier_std_devs,
            income_change_cap: config.income_change_cap,
        }
    }

    pub fn run(
        &self,
        table: &mut LongitudinalTable,
        regions: Option<&RegionContext>,
        lag: i32,
    ) -> ImputeStats {
        let mut stats = ImputeStats::default();

        if let Some(regions) = regions {
            stats.regional_attached = attach_regional_context(table, regions, lag);
        }
        stats.carried_forward = carry_forward(table, &self.carry_forward);
        stats.capped = cap_outliers(table, HOURS_WORKED_LAST_YEAR, self.outlier_std_devs);
        stats.median_filled = replace_negatives_with_median(table, HOURS_WORKED_LAST_YEAR)
            + replace_negatives_with_median(table, WEEKS_WORKED_LAST_YEAR);
        stats.income_changes = derive_income_change(table, self.income_change_cap);

        metrics::impute::values_carried_forward(stats.carried_forward);
        metrics::impute::values_capped(stats.capped + stats.median_filled);
        info!(
            carried_forward = stats.carried_forward,
            capped = stats.capped,
            median_filled = stats.median_filled,
            "Imputed cohort values"
        );
        stats
    }
}
