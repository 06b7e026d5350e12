pub mod config;
pub mod constants;
pub mod error;
pub mod infra;
pub mod logging;
pub mod observability;
pub mod pipeline;
pub mod storage;
pub mod types;

pub use config::Config;
pub use error::{Result, WranglerError};
pub use pipeline::processing::translate::TranslationPolicy;
pub use pipeline::{CohortPipeline, CohortRunResult, ReferenceData};
