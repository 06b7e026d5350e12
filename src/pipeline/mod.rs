// Cohort pipeline: ingestion, processing stages, reference data and the runner

pub mod ingestion;
pub mod processing;
pub mod reference;
pub mod runner;

pub use ingestion::{ingest_cohort, IngestStats};
pub use reference::ReferenceData;
pub use runner::{wrangle, CohortPipeline, CohortRunResult};
