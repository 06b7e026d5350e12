use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

use crate::config::ExportConfig;
use crate::constants::{
    GDP_GROWTH, HIGHEST_GRADE, HIGHEST_GRADE_BINNED, INCOME_CHANGE, INFLATION, PRIOR_INCOME,
    RESPONDENT_ID, SHOCK, UNEMPLOYMENT, YEAR,
};
use crate::pipeline::processing::binning::{one_hot_column, CategoryBins};
use crate::pipeline::processing::crosswalk::{Classification, CrosswalkSet};
use crate::pipeline::reference::EconomicContext;
use crate::types::{
    Cell, CohortTable, FieldValue, LongitudinalRecord, OutputRow, RespondentTable, ShockLabel,
};

/// A categorical field emitted as a label column plus one-hot indicators
struct BinnedField {
    source: &'static str,
    label_column: String,
    prefix: String,
    bins: CategoryBins,
}

impl BinnedField {
    fn columns(&self) -> Vec<String> {
        let mut columns = vec![self.label_column.clone()];
        columns.extend(self.bins.column_names(&self.prefix));
        columns
    }

    fn fill(&self, row: &mut OutputRow, code: Option<i64>) {
        let key = self.bins.bin_for(code);
        row.insert(
            self.label_column.clone(),
            Cell::Text(self.bins.label_for(key).to_string()),
        );
        row.extend(self.bins.one_hot(&self.prefix, code));
    }
}

/// Inputs shared by every row of one cohort's output
pub struct ExportContext<'a> {
    pub economy: &'a EconomicContext,
    pub crosswalks: &'a CrosswalkSet,
    pub grade_bins: &'a CategoryBins,
    pub config: &'a ExportConfig,
}

/// Builds the denormalized analysis table. Rows follow the table's
/// (respondent, year) order.
pub fn assemble(
    cohort: i32,
    respondents: &RespondentTable,
    records: &[LongitudinalRecord],
    ctx: &ExportContext<'_>,
) -> CohortTable {
    let static_fields: BTreeSet<&str> = respondents
        .iter()
        .flat_map(|r| r.attributes.keys().map(String::as_str))
        .collect();
    let dynamic_fields: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.fields.keys().map(String::as_str))
        .collect();

    let binned = binned_fields(ctx);
    let one_hot = observed_codes(respondents, records, &ctx.config.one_hot_fields);

    let mut columns: Vec<String> = vec![RESPONDENT_ID.to_string(), YEAR.to_string()];
    columns.extend(static_fields.iter().map(|f| f.to_string()));
    columns.extend(
        dynamic_fields
            .iter()
            .filter(|f| !static_fields.contains(*f))
            .map(|f| f.to_string()),
    );
    for derived in [SHOCK, PRIOR_INCOME, INCOME_CHANGE, UNEMPLOYMENT, GDP_GROWTH, INFLATION] {
        columns.push(derived.to_string());
    }
    for field in &binned {
        columns.extend(field.columns());
    }
    for (field, codes) in &one_hot {
        columns.extend(codes.iter().map(|c| one_hot_column(field, &c.to_string())));
    }

    let lag = ctx.config.economic_lag_years;
    let mut rows = Vec::with_capacity(records.len());
    for record in records {
        if !ctx.config.include_unlabeled && record.shock == ShockLabel::Unknown {
            continue;
        }
        let attributes = respondents.get(record.respondent_id()).map(|r| &r.attributes);
        let value_of = |field: &str| {
            record
                .get(field)
                .or_else(|| attributes.and_then(|a| a.get(field).copied()))
        };

        let mut row = OutputRow::new();
        for column in &columns {
            row.insert(column.clone(), Cell::Null);
        }
        row.insert(RESPONDENT_ID.to_string(), Cell::Int(record.respondent_id()));
        row.insert(YEAR.to_string(), Cell::Int(record.year() as i64));
        if let Some(attributes) = attributes {
            for (field, value) in attributes {
                row.insert(field.clone(), Cell::from(*value));
            }
        }
        for (field, value) in &record.fields {
            row.insert(field.clone(), Cell::from(*value));
        }

        row.insert(SHOCK.to_string(), Cell::Int(record.shock.as_code()));
        row.insert(PRIOR_INCOME.to_string(), Cell::from(record.prior_income));
        row.insert(INCOME_CHANGE.to_string(), Cell::from(record.income_change));
        if let Some(context) = ctx.economy.get(record.year() - lag) {
            row.insert(UNEMPLOYMENT.to_string(), Cell::Float(context.unemployment));
            row.insert(GDP_GROWTH.to_string(), Cell::Float(context.gdp_growth));
            row.insert(INFLATION.to_string(), Cell::Float(context.inflation));
        }

        for field in &binned {
            field.fill(&mut row, value_of(field.source).and_then(|v| v.as_code()));
        }
        for (field, codes) in &one_hot {
            let code = value_of(field).and_then(|v| v.as_code());
            for c in codes {
                let flag = if code == Some(*c) { 1 } else { 0 };
                row.insert(one_hot_column(field, &c.to_string()), Cell::Int(flag));
            }
        }

        rows.push(row);
    }

    info!(
        cohort,
        rows = rows.len(),
        columns = columns.len(),
        "Assembled cohort table"
    );
    CohortTable {
        cohort,
        columns,
        rows,
    }
}

fn binned_fields(ctx: &ExportContext<'_>) -> Vec<BinnedField> {
    let mut fields = Vec::new();
    for classification in [Classification::Industry, Classification::Occupation] {
        let bins = ctx.crosswalks.categories(classification).clone();
        if bins.is_empty() {
            continue;
        }
        let source = classification.field_name();
        fields.push(BinnedField {
            source,
            label_column: format!("{}_category", source),
            prefix: source.to_string(),
            bins,
        });
    }
    if !ctx.grade_bins.is_empty() {
        fields.push(BinnedField {
            source: HIGHEST_GRADE,
            label_column: HIGHEST_GRADE_BINNED.to_string(),
            prefix: HIGHEST_GRADE_BINNED.to_string(),
            bins: ctx.grade_bins.clone(),
        });
    }
    fields
}

/// Non-negative codes observed per one-hot field, across static and
/// per-year values.
fn observed_codes(
    respondents: &RespondentTable,
    records: &[LongitudinalRecord],
    fields: &[String],
) -> BTreeMap<String, BTreeSet<i64>> {
    let mut observed: BTreeMap<String, BTreeSet<i64>> = BTreeMap::new();
    for field in fields {
        let codes = respondents
            .iter()
            .filter_map(|r| r.attributes.get(field).copied())
            .chain(records.iter().filter_map(|r| r.get(field)))
            .filter_map(|v: FieldValue| v.as_code())
            .filter(|c| *c >= 0)
            .collect();
        observed.insert(field.clone(), codes);
    }
    observed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{ADJUSTED_INCOME, INDUSTRY, RACE};
    use crate::pipeline::processing::binning::Bin;
    use crate::pipeline::processing::crosswalk::{CrosswalkRowDoc, CrosswalkTable};
    use crate::pipeline::reference::YearContext;
    use crate::types::LongitudinalTable;

    fn crosswalks() -> CrosswalkSet {
        let rows = vec![
            CrosswalkRowDoc {
                description: "MINING".to_string(),
                canonical: None,
                codes: BTreeMap::new(),
            },
            CrosswalkRowDoc {
                description: "Metal mining".to_string(),
                canonical: Some(40),
                codes: BTreeMap::from([("acs_2003".to_string(), 370)]),
            },
        ];
        CrosswalkSet::new(
            CrosswalkTable::from_rows(Classification::Industry, rows),
            CrosswalkTable::from_rows(Classification::Occupation, Vec::new()),
            Vec::new(),
        )
        .unwrap()
    }

    fn fixture() -> (RespondentTable, LongitudinalTable) {
        let mut respondents = RespondentTable::new();
        respondents.set_attribute(1, RACE, FieldValue::Code(2));
        respondents.set_attribute(2, RACE, FieldValue::Code(-3));
        let mut table = LongitudinalTable::new();
        {
            let (record, _) = table.open(1, 2001);
            record.set(ADJUSTED_INCOME, FieldValue::Amount(100.0));
            record.set(INDUSTRY, FieldValue::Code(40));
            record.set(HIGHEST_GRADE, FieldValue::Code(12));
            record.shock = ShockLabel::NoShock;
        }
        table.open(2, 2001).0.set(ADJUSTED_INCOME, FieldValue::Topcode);
        table.sort();
        (respondents, table)
    }

    #[test]
    fn test_assemble_rows() {
        let (respondents, table) = fixture();
        let economy = EconomicContext::from_rows(vec![YearContext::new(2000, 4.0, 4.1, 0.034)]).unwrap();
        let crosswalks = crosswalks();
        let grade_bins = CategoryBins::new(vec![Bin::new(0, 6, "0-6th"), Bin::new(7, 12, "7-12th")]);
        let config = ExportConfig::default();
        let ctx = ExportContext {
            economy: &economy,
            crosswalks: &crosswalks,
            grade_bins: &grade_bins,
            config: &config,
        };

        let out = assemble(1997, &respondents, table.records(), &ctx);

        assert_eq!(out.rows.len(), 2);
        assert_eq!(&out.columns[..3], &["respondent_id", "year", "race"]);
        // Every row carries every column
        assert!(out.rows.iter().all(|r| r.len() == out.columns.len()));

        assert_eq!(out.cell(0, "unemployment"), Some(&Cell::Float(4.0)));
        assert_eq!(out.cell(0, "shock"), Some(&Cell::Int(0)));
        assert_eq!(out.cell(0, "industry_category"), Some(&Cell::Text("MINING".to_string())));
        assert_eq!(out.cell(0, "industry_40"), Some(&Cell::Int(1)));
        assert_eq!(out.cell(0, "highest_grade_binned"), Some(&Cell::Text("7-12th".to_string())));
        assert_eq!(out.cell(0, "highest_grade_binned_7"), Some(&Cell::Int(1)));
        assert_eq!(out.cell(0, "race_2"), Some(&Cell::Int(1)));

        assert_eq!(out.cell(1, "adjusted_income"), Some(&Cell::Text("topcode".to_string())));
        assert_eq!(out.cell(1, "industry_unknown"), Some(&Cell::Int(1)));
        assert_eq!(out.cell(1, "race"), Some(&Cell::Int(-3)));
        assert_eq!(out.cell(1, "race_2"), Some(&Cell::Int(0)));
        assert_eq!(out.cell(1, "prior_income"), Some(&Cell::Null));
        // No column for the negative race code
        assert!(!out.columns.iter().any(|c| c == "race_-3"));
    }

    #[test]
    fn test_unlabeled_rows_can_be_dropped() {
        let (respondents, table) = fixture();
        let economy = EconomicContext::from_rows(vec![YearContext::new(2000, 4.0, 4.1, 0.034)]).unwrap();
        let crosswalks = crosswalks();
        let grade_bins = CategoryBins::default();
        let config = ExportConfig {
            include_unlabeled: false,
            ..ExportConfig::default()
        };
        let ctx = ExportContext {
            economy: &economy,
            crosswalks: &crosswalks,
            grade_bins: &grade_bins,
            config: &config,
        };

        let out = assemble(1997, &respondents, table.records(), &ctx);
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows_for(1).len(), 1);
        assert!(out.rows_for(2).is_empty());
    }
}
