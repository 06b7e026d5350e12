//! Metrics for the cohort wrangling pipeline
//!
//! Every phase records through the `metrics` facade. Until [`init`] installs
//! the Prometheus recorder the calls are no-ops, so library users and tests
//! pay nothing for them.

use std::fmt;
use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{info, warn};

/// All metric names used by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Pivot
    PivotResponsesProcessed,
    PivotResponsesSkipped,
    PivotRecordsCreated,

    // Translation
    TranslateValuesTranslated,
    TranslateValuesDegraded,
    TranslateValuesTopcoded,

    // Crosswalk
    CrosswalkCodesRemapped,
    CrosswalkCodesUnmatched,

    // Shock labeling
    ShockLabelsAssigned,

    // Imputation
    ImputeValuesCarriedForward,
    ImputeValuesCapped,

    // Pipeline
    PipelineRunsStarted,
    PipelineRunsCompleted,
    PipelineRunsFailed,
    PipelineRunDuration,
    PipelineRowsPublished,
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::PivotResponsesProcessed => "cohort_wrangler_pivot_responses_processed_total",
            MetricName::PivotResponsesSkipped => "cohort_wrangler_pivot_responses_skipped_total",
            MetricName::PivotRecordsCreated => "cohort_wrangler_pivot_records_created_total",

            MetricName::TranslateValuesTranslated => "cohort_wrangler_translate_values_translated_total",
            MetricName::TranslateValuesDegraded => "cohort_wrangler_translate_values_degraded_total",
            MetricName::TranslateValuesTopcoded => "cohort_wrangler_translate_values_topcoded_total",

            MetricName::CrosswalkCodesRemapped => "cohort_wrangler_crosswalk_codes_remapped_total",
            MetricName::CrosswalkCodesUnmatched => "cohort_wrangler_crosswalk_codes_unmatched_total",

            MetricName::ShockLabelsAssigned => "cohort_wrangler_shock_labels_assigned_total",

            MetricName::ImputeValuesCarriedForward => "cohort_wrangler_impute_values_carried_forward_total",
            MetricName::ImputeValuesCapped => "cohort_wrangler_impute_values_capped_total",

            MetricName::PipelineRunsStarted => "cohort_wrangler_pipeline_runs_started_total",
            MetricName::PipelineRunsCompleted => "cohort_wrangler_pipeline_runs_completed_total",
            MetricName::PipelineRunsFailed => "cohort_wrangler_pipeline_runs_failed_total",
            MetricName::PipelineRunDuration => "cohort_wrangler_pipeline_run_duration_seconds",
            MetricName::PipelineRowsPublished => "cohort_wrangler_pipeline_rows_published_total",
        }
    }
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder. Safe to call more than once; only the
/// first call installs.
pub fn init() -> Option<&'static PrometheusHandle> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Some(handle);
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            info!("Metrics system initialized");
            Some(METRICS_HANDLE.get_or_init(|| handle))
        }
        Err(e) => {
            warn!("Failed to install Prometheus recorder: {}", e);
            None
        }
    }
}

/// Current metrics in Prometheus text format, if the recorder is installed
pub fn render() -> Option<String> {
    METRICS_HANDLE.get().map(|handle| handle.render())
}

fn count(name: MetricName, n: usize) {
    if n > 0 {
        ::metrics::counter!(name.as_str()).increment(n as u64);
    }
}

// ============================================================================
// Pivot Metrics
// ============================================================================

pub mod pivot {
    use super::{count, MetricName};

    pub fn responses_processed(n: usize) {
        count(MetricName::PivotResponsesProcessed, n);
    }

    /// Responses whose rnum or question code had no mapping
    pub fn responses_skipped(n: usize) {
        count(MetricName::PivotResponsesSkipped, n);
    }

    pub fn records_created(n: usize) {
        count(MetricName::PivotRecordsCreated, n);
    }
}

// ============================================================================
// Translation Metrics
// ============================================================================

pub mod translate {
    use super::{count, MetricName};

    pub fn values_translated(n: usize) {
        count(MetricName::TranslateValuesTranslated, n);
    }

    pub fn values_degraded(n: usize) {
        count(MetricName::TranslateValuesDegraded, n);
    }

    pub fn values_topcoded(n: usize) {
        count(MetricName::TranslateValuesTopcoded, n);
    }
}

// ============================================================================
// Crosswalk Metrics
// ============================================================================

pub mod crosswalk {
    use super::{count, MetricName};

    pub fn codes_remapped(n: usize) {
        count(MetricName::CrosswalkCodesRemapped, n);
    }

    pub fn codes_unmatched(n: usize) {
        count(MetricName::CrosswalkCodesUnmatched, n);
    }
}

// ============================================================================
// Shock Metrics
// ============================================================================

pub mod shock {
    use super::MetricName;

    /// Record one batch of labels, split by outcome
    pub fn labels_assigned(shock: usize, no_shock: usize, unknown: usize) {
        let name = MetricName::ShockLabelsAssigned.as_str();
        for (label, n) in [("shock", shock), ("no_shock", no_shock), ("unknown", unknown)] {
            if n > 0 {
                ::metrics::counter!(name, "label" => label).increment(n as u64);
            }
        }
    }
}

// ============================================================================
// Imputation Metrics
// ============================================================================

pub mod impute {
    use super::{count, MetricName};

    pub fn values_carried_forward(n: usize) {
        count(MetricName::ImputeValuesCarriedForward, n);
    }

    pub fn values_capped(n: usize) {
        count(MetricName::ImputeValuesCapped, n);
    }
}

// ============================================================================
// Pipeline Metrics
// ============================================================================

pub mod pipeline {
    use super::{count, MetricName};

    pub fn run_started() {
        count(MetricName::PipelineRunsStarted, 1);
    }

    pub fn run_completed(secs: f64) {
        count(MetricName::PipelineRunsCompleted, 1);
        ::metrics::histogram!(MetricName::PipelineRunDuration.as_str()).record(secs);
    }

    pub fn run_failed(error_type: &str) {
        ::metrics::counter!(
            MetricName::PipelineRunsFailed.as_str(),
            "error_type" => error_type.to_string()
        )
        .increment(1);
    }

    pub fn rows_published(n: usize) {
        count(MetricName::PipelineRowsPublished, n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_are_prefixed() {
        for name in [
            MetricName::PivotResponsesProcessed,
            MetricName::ShockLabelsAssigned,
            MetricName::PipelineRunDuration,
        ] {
            assert!(name.as_str().starts_with("cohort_wrangler_"));
            assert_eq!(name.to_string(), name.as_str());
        }
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        pivot::responses_processed(3);
        shock::labels_assigned(1, 0, 2);
        pipeline::run_failed("config");
    }
}
