use serde::Serialize;
use tracing::info;

use crate::config::ShockConfig;
use crate::constants::ADJUSTED_INCOME;
use crate::observability::metrics;
use crate::types::{LongitudinalTable, ShockLabel};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShockStats {
    pub shock: usize,
    pub no_shock: usize,
    pub unknown: usize,
    pub prior_incomes: usize,
}

/// Forward-looking income shock labels: the label sits on the earlier year
/// of each compared pair, `prior_income` on the later one.
#[derive(Debug, Clone, Copy)]
pub struct ShockLabeler {
    horizon: i32,
    threshold: f64,
    end_year: i32,
}

impl ShockLabeler {
    pub fn new(horizon: i32, threshold: f64, end_year: i32) -> Self {
        Self {
            horizon,
            threshold,
            end_year,
        }
    }

    pub fn from_config(config: &ShockConfig) -> Self {
        Self::new(config.horizon_years, config.threshold_ratio, config.end_year)
    }

    pub fn classify(&self, earlier: Option<f64>, later: Option<f64>) -> ShockLabel {
        match (earlier, later) {
            (Some(earlier), Some(later)) if earlier >= 0.0 && later >= 0.0 => {
                if later < self.threshold * earlier {
                    ShockLabel::Shock
                } else {
                    ShockLabel::NoShock
                }
            }
            _ => ShockLabel::Unknown,
        }
    }

    /// Labels every anchor year in `[cohort_start, end_year)` whose pair
    /// `(Y, Y + horizon)` exists for the respondent.
    pub fn label(&self, cohort_start: i32, table: &mut LongitudinalTable) -> ShockStats {
        let mut updates = Vec::new();

        for (earlier_idx, record) in table.iter().enumerate() {
            let year = record.year();
            if year < cohort_start || year >= self.end_year {
                continue;
            }
            let Some(later_idx) = table.position(record.respondent_id(), year + self.horizon) else {
                continue;
            };
            let earlier = record.get(ADJUSTED_INCOME).and_then(|v| v.as_f64());
            let later = table.records()[later_idx]
                .get(ADJUSTED_INCOME)
                .and_then(|v| v.as_f64());
            updates.push((earlier_idx, later_idx, earlier, self.classify(earlier, later)));
        }

        let mut stats = ShockStats::default();
        let records = table.records_mut();
        for (earlier_idx, later_idx, earlier, label) in updates {
            records[earlier_idx].shock = label;
            if earlier.is_some() {
                records[later_idx].prior_income = earlier;
                stats.prior_incomes += 1;
            }
        }
        for record in records.iter() {
            match record.shock {
                ShockLabel::Shock => stats.shock += 1,
                ShockLabel::NoShock => stats.no_shock += 1,
                ShockLabel::Unknown => stats.unknown += 1,
            }
        }

        metrics::shock::labels_assigned(stats.shock, stats.no_shock, stats.unknown);
        info!(
            shock = stats.shock,
            no_shock = stats.no_shock,
            unknown = stats.unknown,
            "Labeled income shocks"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldValue;

    fn labeler() -> ShockLabeler {
        ShockLabeler::new(2, 0.8, 2018)
    }

    fn table(incomes: &[(i64, i32, Option<FieldValue>)]) -> LongitudinalTable {
        let mut table = LongitudinalTable::new();
        for (respondent, year, income) in incomes {
            let (record, _) = table.open(*respondent, *year);
            if let Some(income) = income {
                record.set(ADJUSTED_INCOME, *income);
            }
        }
        table.sort();
        table
    }

    #[test]
    fn test_threshold() {
        let labeler = labeler();
        assert_eq!(labeler.classify(Some(100.0), Some(70.0)), ShockLabel::Shock);
        assert_eq!(labeler.classify(Some(100.0), Some(90.0)), ShockLabel::NoShock);
        assert_eq!(labeler.classify(Some(100.0), Some(80.0)), ShockLabel::NoShock);
        assert_eq!(labeler.classify(Some(100.0), Some(-1.0)), ShockLabel::Unknown);
        assert_eq!(labeler.classify(None, Some(100.0)), ShockLabel::Unknown);
    }

    #[test]
    fn test_label_anchors_on_earlier_year() {
        let mut table = table(&[
            (1, 2000, Some(FieldValue::Amount(100.0))),
            (1, 2002, Some(FieldValue::Amount(70.0))),
        ]);
        let stats = labeler().label(2000, &mut table);

        let earlier = table.get(1, 2000).unwrap();
        let later = table.get(1, 2002).unwrap();
        assert_eq!(earlier.shock, ShockLabel::Shock);
        assert_eq!(earlier.prior_income, None);
        assert_eq!(later.shock, ShockLabel::Unknown);
        assert_eq!(later.prior_income, Some(100.0));
        assert_eq!(stats.shock, 1);
    }

    #[test]
    fn test_negative_income_leaves_unknown_but_records_prior() {
        let mut table = table(&[
            (1, 2000, Some(FieldValue::Amount(100.0))),
            (1, 2002, Some(FieldValue::Amount(-1.0))),
            (2, 2000, Some(FieldValue::Code(-5))),
            (2, 2002, Some(FieldValue::Amount(40.0))),
        ]);
        labeler().label(2000, &mut table);

        assert_eq!(table.get(1, 2000).unwrap().shock, ShockLabel::Unknown);
        assert_eq!(table.get(1, 2002).unwrap().prior_income, Some(100.0));
        assert_eq!(table.get(2, 2000).unwrap().shock, ShockLabel::Unknown);
        assert_eq!(table.get(2, 2002).unwrap().prior_income, Some(-5.0));
    }

    #[test]
    fn test_missing_pair_and_end_year() {
        let mut table = table(&[
            (1, 2016, Some(FieldValue::Amount(100.0))),
            (1, 2017, Some(FieldValue::Amount(100.0))),
            (1, 2018, Some(FieldValue::Amount(10.0))),
            (1, 2019, Some(FieldValue::Amount(10.0))),
            (1, 2020, Some(FieldValue::Amount(10.0))),
        ]);
        labeler().label(2000, &mut table);

        assert_eq!(table.get(1, 2016).unwrap().shock, ShockLabel::Shock);
        assert_eq!(table.get(1, 2017).unwrap().shock, ShockLabel::Shock);
        // 2018 is past the last anchor year
        assert_eq!(table.get(1, 2018).unwrap().shock, ShockLabel::Unknown);
        assert_eq!(table.get(1, 2020).unwrap().prior_income, None);
    }

    #[test]
    fn test_topcoded_income_has_no_prior() {
        let mut table = table(&[
            (1, 2000, Some(FieldValue::Topcode)),
            (1, 2002, Some(FieldValue::Amount(70.0))),
        ]);
        labeler().label(2000, &mut table);
        assert_eq!(table.get(1, 2000).unwrap().shock, ShockLabel::Unknown);
        assert_eq!(table.get(1, 2002).unwrap().prior_income, None);
    }
}
