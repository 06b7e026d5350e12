use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, instrument, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Result, WranglerError};
use crate::observability::metrics;
use crate::pipeline::processing::binning::CategoryBins;
use crate::pipeline::processing::dictionary::QuestionMapping;
use crate::pipeline::processing::export::{assemble, ExportContext};
use crate::pipeline::processing::impute::{ImputeStats, Imputer};
use crate::pipeline::processing::pivot::pivot;
use crate::pipeline::processing::shock::{ShockLabeler, ShockStats};
use crate::pipeline::processing::translate::{translate_tables, TranslationIssue, TranslationPolicy};
use crate::pipeline::reference::ReferenceData;
use crate::storage::{CohortRun, Storage};
use crate::types::{CohortTable, RawResponse};

/// Summary of one cohort run
#[derive(Debug, Clone, Default, Serialize)]
pub struct CohortRunResult {
    pub cohort: i32,
    pub run_id: Option<Uuid>,
    pub policy: Option<TranslationPolicy>,
    pub responses: usize,
    pub respondents: usize,
    pub records: usize,
    pub skipped_responses: usize,
    pub unmapped_question_codes: Vec<String>,
    pub translated: usize,
    pub topcoded: usize,
    pub reclassified: usize,
    pub unmatched_codes: usize,
    pub shock_labels: ShockStats,
    pub imputation: ImputeStats,
    pub published_rows: usize,
    pub duration_secs: f64,
    pub translation_issues: Vec<TranslationIssue>,
}

/// Runs every processing stage of one cohort in memory. Nothing is written
/// anywhere; the caller decides whether to publish the table.
pub fn wrangle(
    reference: &ReferenceData,
    config: &Config,
    cohort: i32,
    policy: TranslationPolicy,
    mapping: &QuestionMapping,
    responses: &[RawResponse],
) -> Result<(CohortTable, CohortRunResult)> {
    let dictionary = reference.dictionary.cohort(cohort)?;
    let mut result = CohortRunResult {
        cohort,
        policy: Some(policy),
        responses: responses.len(),
        ..CohortRunResult::default()
    };

    let outcome = info_span!("pivot", cohort).in_scope(|| pivot(responses, mapping, dictionary));
    let mut respondents = outcome.respondents;
    let mut table = outcome.records;
    result.respondents = respondents.len();
    result.records = table.len();
    result.skipped_responses = outcome.stats.skipped();
    result.unmapped_question_codes = outcome.stats.unmapped_question_codes.into_iter().collect();
    if !result.unmapped_question_codes.is_empty() {
        warn!(
            codes = ?result.unmapped_question_codes,
            "Question codes with no dictionary field were skipped"
        );
    }

    let summary = info_span!("translate", cohort, policy = policy.as_str()).in_scope(|| {
        translate_tables(dictionary.translator(), policy, &mut respondents, &mut table)
    })?;
    result.translated = summary.translated;
    result.topcoded = summary.topcoded;
    result.translation_issues = summary.issues;

    let reclassified =
        info_span!("crosswalk", cohort).in_scope(|| reference.crosswalks.reclassify(cohort, &mut table));
    result.reclassified = reclassified.remapped;
    result.unmatched_codes = reclassified.unmatched;

    let labeler = ShockLabeler::from_config(&config.shock);
    result.shock_labels = info_span!("shock", cohort).in_scope(|| labeler.label(cohort, &mut table));

    let imputer = Imputer::from_config(&config.impute);
    result.imputation = info_span!("impute", cohort).in_scope(|| {
        imputer.run(
            &mut table,
            reference.regions.as_ref(),
            config.export.economic_lag_years,
        )
    });

    let grade_bins = CategoryBins::new(config.impute.grade_bins.clone());
    let ctx = ExportContext {
        economy: &reference.economy,
        crosswalks: &reference.crosswalks,
        grade_bins: &grade_bins,
        config: &config.export,
    };
    let output =
        info_span!("export", cohort).in_scope(|| assemble(cohort, &respondents, table.records(), &ctx));
    result.published_rows = output.rows.len();

    Ok((output, result))
}

/// Drives one cohort from the store through every stage and publishes the
/// table only when all of them succeed.
pub struct CohortPipeline {
    reference: Arc<ReferenceData>,
    config: Arc<Config>,
    storage: Arc<dyn Storage>,
}

impl CohortPipeline {
    pub fn new(reference: Arc<ReferenceData>, config: Arc<Config>, storage: Arc<dyn Storage>) -> Self {
        Self {
            reference,
            config,
            storage,
        }
    }

    #[instrument(skip(self, policy), fields(policy = policy.as_str()))]
    pub async fn run(&self, cohort: i32, policy: TranslationPolicy) -> Result<CohortRunResult> {
        info!("Starting cohort run");
        metrics::pipeline::run_started();
        let start = Instant::now();

        let mut run = CohortRun::new(cohort, policy);
        self.storage.create_cohort_run(&mut run).await?;

        match self.wrangle_and_publish(cohort, policy).await {
            Ok(mut result) => {
                result.run_id = run.id;
                result.duration_secs = start.elapsed().as_secs_f64();
                run.complete(format!("published {} rows", result.published_rows));
                self.storage.update_cohort_run(&run).await?;

                metrics::pipeline::rows_published(result.published_rows);
                metrics::pipeline::run_completed(result.duration_secs);
                info!(
                    responses = result.responses,
                    respondents = result.respondents,
                    records = result.records,
                    skipped = result.skipped_responses,
                    issues = result.translation_issues.len(),
                    topcoded = result.topcoded,
                    reclassified = result.reclassified,
                    shock = result.shock_labels.shock,
                    no_shock = result.shock_labels.no_shock,
                    unknown = result.shock_labels.unknown,
                    carried_forward = result.imputation.carried_forward,
                    capped = result.imputation.capped,
                    rows = result.published_rows,
                    duration_secs = result.duration_secs,
                    "Cohort run completed"
                );
                Ok(result)
            }
            Err(e) => {
                error!("Cohort run aborted: {}", e);
                metrics::pipeline::run_failed(e.kind());
                run.fail(e.to_string());
                self.storage.update_cohort_run(&run).await?;
                Err(e)
            }
        }
    }

    async fn wrangle_and_publish(&self, cohort: i32, policy: TranslationPolicy) -> Result<CohortRunResult> {
        let mapping = self
            .storage
            .get_question_mapping(cohort)
            .await?
            .ok_or_else(|| WranglerError::Storage {
                message: format!("cohort {} has not been ingested", cohort),
            })?;
        let responses = self.storage.read_responses(cohort).await?;

        let (table, result) = wrangle(&self.reference, &self.config, cohort, policy, &mapping, &responses)?;
        self.storage.write_cohort_table(&table).await?;
        Ok(result)
    }
}
