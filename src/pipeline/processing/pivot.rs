use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::observability::metrics;
use crate::pipeline::processing::dictionary::{CohortDictionary, FieldScope, QuestionMapping};
use crate::types::{FieldValue, LongitudinalTable, RawResponse, RespondentTable, SurveyYear};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PivotStats {
    pub responses: usize,
    pub static_values: usize,
    pub dynamic_values: usize,
    /// rnum missing from the mapping, or question code missing from the dictionary
    pub unmapped: usize,
    /// Distinct question codes the dictionary has no field for
    pub unmapped_question_codes: BTreeSet<String>,
    pub records_created: usize,
}

impl PivotStats {
    pub fn skipped(&self) -> usize {
        self.unmapped
    }
}

#[derive(Debug, Clone, Default)]
pub struct PivotOutcome {
    pub respondents: RespondentTable,
    pub records: LongitudinalTable,
    pub stats: PivotStats,
}

/// Year of a constructed variable, read from the last two characters of its
/// question code: `9x` is 19xx, anything else 20xx.
pub fn constructed_year(question_code: &str) -> Option<i32> {
    let code = question_code.trim();
    if code.len() < 2 || !code.is_char_boundary(code.len() - 2) {
        return None;
    }
    let suffix = &code[code.len() - 2..];
    if !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let digits: i32 = suffix.parse().ok()?;
    if suffix.starts_with('9') {
        Some(1900 + digits)
    } else {
        Some(2000 + digits)
    }
}

/// Pivots one cohort's flat responses into respondent and respondent-year
/// records. Values are stored raw; translation happens afterwards.
pub fn pivot(
    responses: &[RawResponse],
    mapping: &QuestionMapping,
    dictionary: &CohortDictionary,
) -> PivotOutcome {
    let mut outcome = PivotOutcome::default();

    for response in responses {
        outcome.stats.responses += 1;

        let Some(question) = mapping.resolve(&response.rnum) else {
            debug!(rnum = %response.rnum, "Skipping response with unmapped rnum");
            outcome.stats.unmapped += 1;
            continue;
        };
        let Some((scope, field)) = dictionary.resolve(&question.question_code) else {
            if outcome
                .stats
                .unmapped_question_codes
                .insert(question.question_code.clone())
            {
                debug!(
                    rnum = %response.rnum,
                    question_code = %question.question_code,
                    "Skipping question code with no dictionary field"
                );
            }
            outcome.stats.unmapped += 1;
            continue;
        };

        match scope {
            FieldScope::Static => {
                outcome.respondents.set_attribute(
                    response.respondent_id,
                    field,
                    FieldValue::Code(response.value),
                );
                outcome.stats.static_values += 1;
            }
            FieldScope::Dynamic => {
                let year = match question.year {
                    SurveyYear::Fixed(year) => Some(year),
                    SurveyYear::Constructed => constructed_year(&question.question_code),
                };
                let Some(year) = year else {
                    debug!(
                        question_code = %question.question_code,
                        "Skipping constructed variable without a year suffix"
                    );
                    outcome.stats.unmapped += 1;
                    continue;
                };
                let (record, created) = outcome.records.open(response.respondent_id, year);
                record.set(field, FieldValue::Code(response.value));
                if created {
                    outcome.stats.records_created += 1;
                }
                outcome.stats.dynamic_values += 1;
            }
        }
    }

    outcome.records.sort();

    metrics::pivot::responses_processed(outcome.stats.responses);
    metrics::pivot::responses_skipped(outcome.stats.unmapped);
    metrics::pivot::records_created(outcome.stats.records_created);
    info!(
        cohort = dictionary.cohort(),
        responses = outcome.stats.responses,
        respondents = outcome.respondents.len(),
        records = outcome.records.len(),
        skipped = outcome.stats.unmapped,
        unmapped_question_codes = outcome.stats.unmapped_question_codes.len(),
        "Pivoted responses"
    );
    outcome
}
