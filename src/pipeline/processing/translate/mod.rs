//! Cohort-specific code translation: raw survey codes to canonical values

pub mod income;
pub mod rules;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Result, WranglerError};
use crate::observability::metrics;
use crate::pipeline::processing::inflation::InflationAdjuster;
use crate::types::{FieldValue, LongitudinalTable, RespondentId, RespondentTable};

pub use rules::{FieldRuleDoc, Replacement, ValueRule};

/// How recoverable translation failures are handled
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum TranslationPolicy {
    /// Any translation failure aborts the cohort
    Strict,
    /// Unmapped values degrade to unknown and are reported
    #[default]
    Lenient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Degrade,
    Abort,
}

impl TranslationPolicy {
    pub fn disposition(&self, err: &WranglerError) -> Disposition {
        match self {
            TranslationPolicy::Lenient if err.is_recoverable() => Disposition::Degrade,
            _ => Disposition::Abort,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TranslationPolicy::Strict => "strict",
            TranslationPolicy::Lenient => "lenient",
        }
    }
}

/// Translation rules for one cohort
#[derive(Debug, Clone)]
pub struct Translator {
    rules: HashMap<String, ValueRule>,
    adjuster: Arc<InflationAdjuster>,
}

impl Translator {
    pub fn new(rules: HashMap<String, ValueRule>, adjuster: Arc<InflationAdjuster>) -> Self {
        Self { rules, adjuster }
    }

    /// Translates one raw value. `year` is `None` for static attributes.
    pub fn translate(&self, field: &str, raw: i64, year: Option<i32>) -> Result<FieldValue> {
        if let Some(year) = year {
            if !self.adjuster.covers(year) {
                return Err(WranglerError::YearOutOfDomain {
                    year,
                    reason: format!(
                        "survey years run {}..={}",
                        self.adjuster.first_year(),
                        self.adjuster.reference_year()
                    ),
                });
            }
        }
        match self.rules.get(field) {
            Some(rule) => self.apply(rule, field, raw, year),
            None => Ok(FieldValue::Code(raw)),
        }
    }

    fn apply(&self, rule: &ValueRule, field: &str, raw: i64, year: Option<i32>) -> Result<FieldValue> {
        match rule {
            ValueRule::PassThrough => Ok(FieldValue::Code(raw)),
            ValueRule::Lookup(lookup) => {
                lookup.window().check(field, year)?;
                lookup
                    .resolve(raw)
                    .map(FieldValue::Code)
                    .ok_or_else(|| WranglerError::UnmappedValue {
                        field: field.to_string(),
                        value: raw,
                        year,
                    })
            }
            ValueRule::ByYear { years, default } => {
                let y = year.ok_or_else(|| WranglerError::MissingYear {
                    field: field.to_string(),
                })?;
                match years.get(&y).or(default.as_deref()) {
                    Some(sub) => self.apply(sub, field, raw, year),
                    None => Err(WranglerError::UnmappedValue {
                        field: field.to_string(),
                        value: raw,
                        year,
                    }),
                }
            }
            ValueRule::Income(income) => {
                let y = year.ok_or_else(|| WranglerError::MissingYear {
                    field: field.to_string(),
                })?;
                income.apply(field, raw, y, &self.adjuster)
            }
        }
    }
}

/// A value that degraded to unknown under the lenient policy
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslationIssue {
    pub respondent_id: RespondentId,
    pub year: Option<i32>,
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TranslationSummary {
    pub translated: usize,
    pub degraded: usize,
    pub topcoded: usize,
    pub issues: Vec<TranslationIssue>,
}

impl TranslationSummary {
    fn record(
        &mut self,
        policy: TranslationPolicy,
        respondent_id: RespondentId,
        field: &str,
        year: Option<i32>,
        outcome: Result<FieldValue>,
    ) -> Result<Option<FieldValue>> {
        match outcome {
            Ok(value) => {
                self.translated += 1;
                if value == FieldValue::Topcode {
                    self.topcoded += 1;
                }
                Ok(Some(value))
            }
            Err(err) => match policy.disposition(&err) {
                Disposition::Degrade => {
                    debug!(respondent_id, field, ?year, "Degrading value to unknown: {}", err);
                    self.degraded += 1;
                    self.issues.push(TranslationIssue {
                        respondent_id,
                        year,
                        field: field.to_string(),
                        message: err.to_string(),
                    });
                    Ok(None)
                }
                Disposition::Abort => Err(err),
            },
        }
    }
}

/// Translates every raw code held by the pivoted tables in place.
///
/// Degraded values are removed from their record, so they read as unknown.
pub fn translate_tables(
    translator: &Translator,
    policy: TranslationPolicy,
    respondents: &mut RespondentTable,
    table: &mut LongitudinalTable,
) -> Result<TranslationSummary> {
    let mut summary = TranslationSummary::default();

    for record in respondents.iter_mut() {
        let respondent_id = record.respondent_id;
        let raw_fields = std::mem::take(&mut record.attributes);
        for (field, value) in raw_fields {
            let Some(raw) = value.as_code() else {
                record.attributes.insert(field, value);
                continue;
            };
            let outcome = translator.translate(&field, raw, None);
            if let Some(value) = summary.record(policy, respondent_id, &field, None, outcome)? {
                record.attributes.insert(field, value);
            }
        }
    }

    for record in table.records_mut() {
        let respondent_id = record.respondent_id();
        let year = Some(record.year());
        let raw_fields = std::mem::take(&mut record.fields);
        for (field, value) in raw_fields {
            let Some(raw) = value.as_code() else {
                record.fields.insert(field, value);
                continue;
            };
            let outcome = translator.translate(&field, raw, year);
            if let Some(value) = summary.record(policy, respondent_id, &field, year, outcome)? {
                record.fields.insert(field, value);
            }
        }
    }

    metrics::translate::values_translated(summary.translated);
    metrics::translate::values_degraded(summary.degraded);
    metrics::translate::values_topcoded(summary.topcoded);
    info!(
        translated = summary.translated,
        degraded = summary.degraded,
        topcoded = summary.topcoded,
        "Translated cohort values"
    );
    Ok(summary)
}
