use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, WranglerError};
use crate::pipeline::processing::dictionary::QuestionMapping;
use crate::pipeline::processing::translate::TranslationPolicy;
use crate::storage::{lock, CohortRun, RunStatus, Storage};
use crate::types::{CohortTable, RawResponse, SurveyYear};

/// SQLite-backed store that survives across CLI invocations
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS question_mappings (
                cohort         INTEGER NOT NULL,
                rnum           TEXT NOT NULL,
                question_code  TEXT NOT NULL,
                year           TEXT NOT NULL,
                PRIMARY KEY (cohort, rnum)
            );
            CREATE TABLE IF NOT EXISTS responses (
                seq            INTEGER PRIMARY KEY AUTOINCREMENT,
                cohort         INTEGER NOT NULL,
                rnum           TEXT NOT NULL,
                respondent_id  INTEGER NOT NULL,
                value          INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS responses_by_cohort ON responses (cohort, seq);
            CREATE TABLE IF NOT EXISTS cohort_tables (
                cohort        INTEGER PRIMARY KEY,
                columns_json  TEXT NOT NULL,
                rows_json     TEXT NOT NULL,
                published_at  TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS cohort_runs (
                id           TEXT PRIMARY KEY,
                cohort       INTEGER NOT NULL,
                policy       TEXT NOT NULL,
                status       TEXT NOT NULL,
                created_at   TEXT NOT NULL,
                finished_at  TEXT,
                message      TEXT
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn write_mapping(tx: &Transaction<'_>, cohort: i32, mapping: &QuestionMapping) -> Result<()> {
    tx.execute("DELETE FROM question_mappings WHERE cohort = ?1", params![cohort])?;
    let mut stmt = tx.prepare(
        "INSERT INTO question_mappings (cohort, rnum, question_code, year) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (rnum, question) in mapping.iter() {
        stmt.execute(params![
            cohort,
            rnum,
            question.question_code,
            question.year.as_label()
        ])?;
    }
    Ok(())
}

fn write_responses(tx: &Transaction<'_>, cohort: i32, responses: &[RawResponse]) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO responses (cohort, rnum, respondent_id, value) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for response in responses {
        stmt.execute(params![cohort, response.rnum, response.respondent_id, response.value])?;
    }
    Ok(())
}

fn storage_error(message: String) -> WranglerError {
    WranglerError::Storage { message }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| storage_error(format!("bad timestamp '{}': {}", raw, e)))
}

fn parse_policy(raw: &str) -> Result<TranslationPolicy> {
    match raw {
        "strict" => Ok(TranslationPolicy::Strict),
        "lenient" => Ok(TranslationPolicy::Lenient),
        other => Err(storage_error(format!("unknown translation policy '{}'", other))),
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn put_question_mapping(&self, cohort: i32, mapping: &QuestionMapping) -> Result<()> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        write_mapping(&tx, cohort, mapping)?;
        tx.commit()?;

        debug!("Stored question mapping for cohort {} ({} rnums)", cohort, mapping.len());
        Ok(())
    }

    async fn get_question_mapping(&self, cohort: i32) -> Result<Option<QuestionMapping>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn
            .prepare("SELECT rnum, question_code, year FROM question_mappings WHERE cohort = ?1")?;
        let mut rows = stmt.query(params![cohort])?;
        let mut mapping = QuestionMapping::new();
        while let Some(row) = rows.next()? {
            let rnum: String = row.get(0)?;
            let code: String = row.get(1)?;
            let year: String = row.get(2)?;
            let year = SurveyYear::parse(&year)
                .ok_or_else(|| storage_error(format!("bad survey year '{}' for {}", year, rnum)))?;
            mapping.insert(&rnum, &code, year);
        }
        if mapping.is_empty() {
            Ok(None)
        } else {
            Ok(Some(mapping))
        }
    }

    async fn insert_responses(&self, cohort: i32, responses: &[RawResponse]) -> Result<usize> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        write_responses(&tx, cohort, responses)?;
        tx.commit()?;

        debug!("Inserted {} responses for cohort {}", responses.len(), cohort);
        Ok(responses.len())
    }

    async fn read_responses(&self, cohort: i32) -> Result<Vec<RawResponse>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT rnum, respondent_id, value FROM responses WHERE cohort = ?1 ORDER BY seq",
        )?;
        let mut rows = stmt.query(params![cohort])?;
        let mut responses = Vec::new();
        while let Some(row) = rows.next()? {
            responses.push(RawResponse {
                cohort,
                rnum: row.get(0)?,
                respondent_id: row.get(1)?,
                value: row.get(2)?,
            });
        }
        Ok(responses)
    }

    async fn clear_cohort(&self, cohort: i32) -> Result<()> {
        let conn = lock(&self.conn)?;
        conn.execute("DELETE FROM question_mappings WHERE cohort = ?1", params![cohort])?;
        conn.execute("DELETE FROM responses WHERE cohort = ?1", params![cohort])?;
        debug!("Cleared ingested data for cohort {}", cohort);
        Ok(())
    }

    async fn replace_cohort(
        &self,
        cohort: i32,
        mapping: &QuestionMapping,
        responses: &[RawResponse],
    ) -> Result<usize> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM responses WHERE cohort = ?1", params![cohort])?;
        write_responses(&tx, cohort, responses)?;
        write_mapping(&tx, cohort, mapping)?;
        tx.commit()?;

        debug!("Replaced cohort {} with {} responses", cohort, responses.len());
        Ok(responses.len())
    }

    async fn write_cohort_table(&self, table: &CohortTable) -> Result<()> {
        let columns_json = serde_json::to_string(&table.columns)?;
        let rows_json = serde_json::to_string(&table.rows)?;
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT INTO cohort_tables (cohort, columns_json, rows_json, published_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(cohort) DO UPDATE SET columns_json=excluded.columns_json,
                 rows_json=excluded.rows_json, published_at=excluded.published_at",
            params![table.cohort, columns_json, rows_json, Utc::now().to_rfc3339()],
        )?;

        debug!("Published cohort {} table with {} rows", table.cohort, table.rows.len());
        Ok(())
    }

    async fn read_cohort_table(&self, cohort: i32) -> Result<Option<CohortTable>> {
        let conn = lock(&self.conn)?;
        let mut stmt =
            conn.prepare("SELECT columns_json, rows_json FROM cohort_tables WHERE cohort = ?1")?;
        let mut rows = stmt.query(params![cohort])?;
        if let Some(row) = rows.next()? {
            let columns_json: String = row.get(0)?;
            let rows_json: String = row.get(1)?;
            Ok(Some(CohortTable {
                cohort,
                columns: serde_json::from_str(&columns_json)?,
                rows: serde_json::from_str(&rows_json)?,
            }))
        } else {
            Ok(None)
        }
    }

    async fn create_cohort_run(&self, run: &mut CohortRun) -> Result<()> {
        let id = Uuid::new_v4();
        run.id = Some(id);

        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT INTO cohort_runs (id, cohort, policy, status, created_at, finished_at, message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id.to_string(),
                run.cohort,
                run.policy.as_str(),
                run.status.as_str(),
                run.created_at.to_rfc3339(),
                run.finished_at.map(|t| t.to_rfc3339()),
                run.message
            ],
        )?;

        debug!("Created cohort run for {} with id {}", run.cohort, id);
        Ok(())
    }

    async fn update_cohort_run(&self, run: &CohortRun) -> Result<()> {
        let run_id = run
            .id
            .ok_or_else(|| storage_error("Cannot update cohort run without ID".to_string()))?;

        let conn = lock(&self.conn)?;
        let updated = conn.execute(
            "UPDATE cohort_runs SET status = ?2, finished_at = ?3, message = ?4 WHERE id = ?1",
            params![
                run_id.to_string(),
                run.status.as_str(),
                run.finished_at.map(|t| t.to_rfc3339()),
                run.message
            ],
        )?;
        if updated == 0 {
            return Err(storage_error(format!("No cohort run with id {}", run_id)));
        }

        debug!("Updated cohort run {} to {}", run_id, run.status.as_str());
        Ok(())
    }

    async fn list_cohort_runs(&self, cohort: i32) -> Result<Vec<CohortRun>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT id, policy, status, created_at, finished_at, message
             FROM cohort_runs WHERE cohort = ?1 ORDER BY created_at",
        )?;
        let mut rows = stmt.query(params![cohort])?;
        let mut runs = Vec::new();
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let policy: String = row.get(1)?;
            let status: String = row.get(2)?;
            let created_at: String = row.get(3)?;
            let finished_at: Option<String> = row.get(4)?;
            runs.push(CohortRun {
                id: Some(
                    Uuid::parse_str(&id)
                        .map_err(|e| storage_error(format!("bad run id '{}': {}", id, e)))?,
                ),
                cohort,
                policy: parse_policy(&policy)?,
                status: RunStatus::parse(&status)
                    .ok_or_else(|| storage_error(format!("unknown run status '{}'", status)))?,
                created_at: parse_timestamp(&created_at)?,
                finished_at: finished_at.as_deref().map(parse_timestamp).transpose()?,
                message: row.get(5)?,
            });
        }
        Ok(runs)
    }
}
