use crate::error::{Result, WranglerError};
use crate::pipeline::processing::dictionary::QuestionMapping;
use crate::pipeline::processing::translate::TranslationPolicy;
use crate::types::{CohortTable, RawResponse};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// One attempt at wrangling a cohort
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortRun {
    pub id: Option<Uuid>,
    pub cohort: i32,
    pub policy: TranslationPolicy,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

impl CohortRun {
    pub fn new(cohort: i32, policy: TranslationPolicy) -> Self {
        Self {
            id: None,
            cohort,
            policy,
            status: RunStatus::Running,
            created_at: Utc::now(),
            finished_at: None,
            message: None,
        }
    }

    pub fn complete(&mut self, message: impl Into<String>) {
        self.status = RunStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.message = Some(message.into());
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.message = Some(message.into());
    }
}

/// Read-all / insert / update contract over raw responses, question
/// mappings and published cohort tables
#[async_trait]
pub trait Storage: Send + Sync {
    // Ingestion
    async fn put_question_mapping(&self, cohort: i32, mapping: &QuestionMapping) -> Result<()>;
    async fn get_question_mapping(&self, cohort: i32) -> Result<Option<QuestionMapping>>;
    async fn insert_responses(&self, cohort: i32, responses: &[RawResponse]) -> Result<usize>;
    /// Responses in insertion order
    async fn read_responses(&self, cohort: i32) -> Result<Vec<RawResponse>>;
    /// Drops a cohort's mapping and responses ahead of re-ingestion
    async fn clear_cohort(&self, cohort: i32) -> Result<()>;

    /// Swaps in a freshly ingested cohort. The mapping marks a cohort as
    /// ingested, so it is written only after every response is stored.
    async fn replace_cohort(
        &self,
        cohort: i32,
        mapping: &QuestionMapping,
        responses: &[RawResponse],
    ) -> Result<usize> {
        self.clear_cohort(cohort).await?;
        let inserted = self.insert_responses(cohort, responses).await?;
        self.put_question_mapping(cohort, mapping).await?;
        Ok(inserted)
    }

    // Published output
    async fn write_cohort_table(&self, table: &CohortTable) -> Result<()>;
    async fn read_cohort_table(&self, cohort: i32) -> Result<Option<CohortTable>>;

    // Run bookkeeping
    async fn create_cohort_run(&self, run: &mut CohortRun) -> Result<()>;
    async fn update_cohort_run(&self, run: &CohortRun) -> Result<()>;
    async fn list_cohort_runs(&self, cohort: i32) -> Result<Vec<CohortRun>>;
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|e| WranglerError::Storage {
        message: format!("storage lock poisoned: {}", e),
    })
}

/// In-memory storage implementation for tests and single-shot runs
pub struct InMemoryStorage {
    mappings: Arc<Mutex<HashMap<i32, QuestionMapping>>>,
    responses: Arc<Mutex<HashMap<i32, Vec<RawResponse>>>>,
    tables: Arc<Mutex<HashMap<i32, CohortTable>>>,
    runs: Arc<Mutex<HashMap<Uuid, CohortRun>>>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            mappings: Arc::new(Mutex::new(HashMap::new())),
            responses: Arc::new(Mutex::new(HashMap::new())),
            tables: Arc::new(Mutex::new(HashMap::new())),
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn put_question_mapping(&self, cohort: i32, mapping: &QuestionMapping) -> Result<()> {
        let mut mappings = lock(&self.mappings)?;
        mappings.insert(cohort, mapping.clone());

        debug!("Stored question mapping for cohort {} ({} rnums)", cohort, mapping.len());
        Ok(())
    }

    async fn get_question_mapping(&self, cohort: i32) -> Result<Option<QuestionMapping>> {
        let mappings = lock(&self.mappings)?;
        Ok(mappings.get(&cohort).cloned())
    }

    async fn insert_responses(&self, cohort: i32, responses: &[RawResponse]) -> Result<usize> {
        let mut stored = lock(&self.responses)?;
        stored
            .entry(cohort)
            .or_default()
            .extend_from_slice(responses);

        debug!("Inserted {} responses for cohort {}", responses.len(), cohort);
        Ok(responses.len())
    }

    async fn read_responses(&self, cohort: i32) -> Result<Vec<RawResponse>> {
        let stored = lock(&self.responses)?;
        Ok(stored.get(&cohort).cloned().unwrap_or_default())
    }

    async fn clear_cohort(&self, cohort: i32) -> Result<()> {
        lock(&self.mappings)?.remove(&cohort);
        lock(&self.responses)?.remove(&cohort);
        debug!("Cleared ingested data for cohort {}", cohort);
        Ok(())
    }

    async fn replace_cohort(
        &self,
        cohort: i32,
        mapping: &QuestionMapping,
        responses: &[RawResponse],
    ) -> Result<usize> {
        let mut mappings = lock(&self.mappings)?;
        let mut stored = lock(&self.responses)?;
        stored.insert(cohort, responses.to_vec());
        mappings.insert(cohort, mapping.clone());

        debug!("Replaced cohort {} with {} responses", cohort, responses.len());
        Ok(responses.len())
    }

    async fn write_cohort_table(&self, table: &CohortTable) -> Result<()> {
        let mut tables = lock(&self.tables)?;
        tables.insert(table.cohort, table.clone());

        debug!("Published cohort {} table with {} rows", table.cohort, table.rows.len());
        Ok(())
    }

    async fn read_cohort_table(&self, cohort: i32) -> Result<Option<CohortTable>> {
        let tables = lock(&self.tables)?;
        Ok(tables.get(&cohort).cloned())
    }

    async fn create_cohort_run(&self, run: &mut CohortRun) -> Result<()> {
        let id = Uuid::new_v4();
        run.id = Some(id);

        let mut runs = lock(&self.runs)?;
        runs.insert(id, run.clone());

        debug!("Created cohort run for {} with id {}", run.cohort, id);
        Ok(())
    }

    async fn update_cohort_run(&self, run: &CohortRun) -> Result<()> {
        let run_id = run.id.ok_or_else(|| WranglerError::Storage {
            message: "Cannot update cohort run without ID".to_string(),
        })?;

        let mut runs = lock(&self.runs)?;
        runs.insert(run_id, run.clone());

        debug!("Updated cohort run {} to {}", run_id, run.status.as_str());
        Ok(())
    }

    async fn list_cohort_runs(&self, cohort: i32) -> Result<Vec<CohortRun>> {
        let runs = lock(&self.runs)?;
        let mut listed: Vec<CohortRun> = runs
            .values()
            .filter(|r| r.cohort == cohort)
            .cloned()
            .collect();
        listed.sort_by_key(|r| r.created_at);
        Ok(listed)
    }
}
