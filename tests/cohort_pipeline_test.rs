use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::{tempdir, TempDir};

use cohort_wrangler::config::Config;
use cohort_wrangler::infra::SqliteStorage;
use cohort_wrangler::pipeline::{ingest_cohort, CohortPipeline, ReferenceData};
use cohort_wrangler::pipeline::processing::dictionary::QuestionMapping;
use cohort_wrangler::storage::{CohortRun, InMemoryStorage, RunStatus, Storage};
use cohort_wrangler::types::{Cell, CohortTable, RawResponse};
use cohort_wrangler::{TranslationPolicy, WranglerError};

const DICTIONARY: &str = r#"{
  "cohorts": {
    "1997": {
      "static_fields": { "KEY!SEX": "sex" },
      "dynamic_fields": { "YINC-1700": "adjusted_income", "CV_MARSTAT": "marital_status" },
      "values": {
        "sex": { "kind": "lookup", "exact": { "1": 1, "2": 2 }, "patterns": [ { "pattern": "-\\d+", "value": "keep" } ] },
        "adjusted_income": { "kind": "income", "topcodes": { "2002": 500 } },
        "marital_status": { "kind": "lookup", "exact": { "0": 0, "1": 1 } }
      }
    }
  }
}"#;

// Zero inflation keeps amounts exact
const YEARS: &str = r#"[
  { "year": 1999, "unemployment": 4.2, "gdp_growth": 4.7, "inflation": 0.0 },
  { "year": 2000, "unemployment": 4.0, "gdp_growth": 4.1, "inflation": 0.0 },
  { "year": 2001, "unemployment": 4.7, "gdp_growth": 1.0, "inflation": 0.0 },
  { "year": 2002, "unemployment": 5.8, "gdp_growth": 1.7, "inflation": 0.0 },
  { "year": 2003, "unemployment": 6.0, "gdp_growth": 2.8, "inflation": 0.0 },
  { "year": 2004, "unemployment": 5.5, "gdp_growth": 3.9, "inflation": 0.0 }
]"#;

const RNUMS: &str = "R0000100\nR1\nR2\nR3\nR4\nR5\nR6\nR7\n";
const QNAMES: &str = "CASEID,1997\nKEY!SEX,1997\nYINC-1700,2000\nYINC-1700,2002\nYINC-1700,2004\nCV_MARSTAT,2000\nCV_MARSTAT,2002\nCV_MARSTAT,2004\n";

/// Respondent 1 keeps a flat income; respondent 2 loses 30% between 2000
/// and 2002 and reports an unmapped marital status in 2002.
const RESPONSES: &str = "R0000100,R1,R2,R3,R4,R5,R6,R7\n1,1,100,100,100,1,1,\n2,2,100,70,70,0,7,0\n";

fn write_fixture(dir: &Path, responses: &str) -> Result<Config> {
    fs::write(dir.join("dictionary.json"), DICTIONARY)?;
    fs::write(dir.join("years.json"), YEARS)?;
    fs::write(dir.join("industry.json"), "[]")?;
    fs::write(dir.join("occupation.json"), "[]")?;
    fs::write(dir.join("1997.rnum"), RNUMS)?;
    fs::write(dir.join("1997.qname"), QNAMES)?;
    fs::write(dir.join("1997.csv"), responses)?;
    fs::write(
        dir.join("config.toml"),
        r#"
[reference]
dictionary = "dictionary.json"
economic_context = "years.json"
industry_crosswalk = "industry.json"
occupation_crosswalk = "occupation.json"

[[cohorts]]
year = 1997
rnum_file = "1997.rnum"
qname_file = "1997.qname"
responses_file = "1997.csv"

[storage]
backend = "sqlite"
sqlite_path = "store/wrangler.db"
"#,
    )?;
    Ok(Config::from_path(dir.join("config.toml"))?)
}

struct Harness {
    _dir: TempDir,
    storage: Arc<dyn Storage>,
    pipeline: CohortPipeline,
}

async fn harness(responses: &str) -> Result<Harness> {
    let dir = tempdir()?;
    let config = Arc::new(write_fixture(dir.path(), responses)?);
    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
    ingest_cohort(storage.as_ref(), config.cohort_source(1997)?).await?;

    let reference = Arc::new(ReferenceData::load(&config)?);
    let pipeline = CohortPipeline::new(reference, config, storage.clone());
    Ok(Harness {
        _dir: dir,
        storage,
        pipeline,
    })
}

fn row_cell<'a>(table: &'a CohortTable, respondent_id: i64, year: i64, column: &str) -> Option<&'a Cell> {
    table
        .rows_for(respondent_id)
        .into_iter()
        .find(|r| r.get("year") == Some(&Cell::Int(year)))
        .and_then(|r| r.get(column))
}

#[tokio::test]
async fn test_shock_scenario_end_to_end() -> Result<()> {
    let h = harness(RESPONSES).await?;

    let result = h.pipeline.run(1997, TranslationPolicy::Lenient).await?;
    assert_eq!(result.respondents, 2);
    assert_eq!(result.records, 6);
    assert_eq!(result.published_rows, 6);
    assert_eq!(result.responses, 13);
    assert_eq!(result.skipped_responses, 0);
    assert!(result.unmapped_question_codes.is_empty());
    assert_eq!(result.translation_issues.len(), 1);
    assert_eq!(result.translation_issues[0].field, "marital_status");

    let table = h.storage.read_cohort_table(1997).await?.expect("table published");

    assert_eq!(row_cell(&table, 1, 2000, "shock"), Some(&Cell::Int(0)));
    assert_eq!(row_cell(&table, 1, 2002, "shock"), Some(&Cell::Int(0)));
    assert_eq!(row_cell(&table, 1, 2004, "shock"), Some(&Cell::Int(-1)));
    assert_eq!(row_cell(&table, 2, 2000, "shock"), Some(&Cell::Int(1)));
    assert_eq!(row_cell(&table, 2, 2002, "shock"), Some(&Cell::Int(0)));

    assert_eq!(row_cell(&table, 2, 2002, "prior_income"), Some(&Cell::Float(100.0)));
    match row_cell(&table, 2, 2002, "income_change") {
        Some(Cell::Float(change)) => assert!((change + 0.3).abs() < 1e-9),
        other => panic!("unexpected income_change {:?}", other),
    }

    // Economic indicators lag the survey year by one
    assert_eq!(row_cell(&table, 1, 2000, "unemployment"), Some(&Cell::Float(4.2)));
    assert_eq!(row_cell(&table, 1, 2004, "gdp_growth"), Some(&Cell::Float(2.8)));

    // Degraded 2002 value is carried forward from 2000
    assert_eq!(row_cell(&table, 2, 2002, "marital_status"), Some(&Cell::Int(0)));
    // Absent 2004 response is carried forward too
    assert_eq!(row_cell(&table, 1, 2004, "marital_status"), Some(&Cell::Int(1)));

    assert_eq!(row_cell(&table, 2, 2004, "sex"), Some(&Cell::Int(2)));
    assert_eq!(row_cell(&table, 2, 2004, "sex_2"), Some(&Cell::Int(1)));
    assert_eq!(row_cell(&table, 2, 2004, "sex_1"), Some(&Cell::Int(0)));
    Ok(())
}

#[tokio::test]
async fn test_published_keys_are_unique() -> Result<()> {
    let h = harness(RESPONSES).await?;
    h.pipeline.run(1997, TranslationPolicy::Lenient).await?;
    let table = h.storage.read_cohort_table(1997).await?.expect("table published");

    let keys: HashSet<(String, String)> = table
        .rows
        .iter()
        .map(|r| (format!("{:?}", r.get("respondent_id")), format!("{:?}", r.get("year"))))
        .collect();
    assert_eq!(keys.len(), table.rows.len());
    assert!(table.rows.iter().all(|r| r.len() == table.columns.len()));
    Ok(())
}

#[tokio::test]
async fn test_strict_policy_aborts_without_publishing() -> Result<()> {
    let h = harness(RESPONSES).await?;

    let err = h
        .pipeline
        .run(1997, TranslationPolicy::Strict)
        .await
        .expect_err("unmapped marital status must abort a strict run");
    assert!(matches!(err, WranglerError::UnmappedValue { year: Some(2002), .. }));
    assert!(h.storage.read_cohort_table(1997).await?.is_none());

    let runs = h.storage.list_cohort_runs(1997).await?;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert_eq!(runs[0].policy, TranslationPolicy::Strict);
    Ok(())
}

#[tokio::test]
async fn test_topcodes_mark_and_overflow_aborts() -> Result<()> {
    // 500 sits exactly on the 2002 ceiling
    let at_ceiling = "R0000100,R1,R2,R3,R4,R5,R6,R7\n1,1,400,500,450,1,1,1\n";
    let h = harness(at_ceiling).await?;
    let result = h.pipeline.run(1997, TranslationPolicy::Lenient).await?;
    assert_eq!(result.topcoded, 1);
    let table = h.storage.read_cohort_table(1997).await?.expect("table published");
    assert_eq!(
        row_cell(&table, 1, 2002, "adjusted_income"),
        Some(&Cell::Text("topcode".to_string()))
    );
    // A topcoded later income leaves the earlier year unlabeled
    assert_eq!(row_cell(&table, 1, 2000, "shock"), Some(&Cell::Int(-1)));

    let above_ceiling = "R0000100,R1,R2,R3,R4,R5,R6,R7\n1,1,400,501,450,1,1,1\n";
    let h = harness(above_ceiling).await?;
    let err = h
        .pipeline
        .run(1997, TranslationPolicy::Lenient)
        .await
        .expect_err("income above the ceiling aborts the cohort");
    assert!(matches!(err, WranglerError::ValueOutOfRange { ceiling: 500, .. }));
    assert!(h.storage.read_cohort_table(1997).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_rerun_after_failure_publishes() -> Result<()> {
    let h = harness(RESPONSES).await?;
    assert!(h.pipeline.run(1997, TranslationPolicy::Strict).await.is_err());
    h.pipeline.run(1997, TranslationPolicy::Lenient).await?;

    let runs = h.storage.list_cohort_runs(1997).await?;
    let statuses: Vec<RunStatus> = runs.iter().map(|r| r.status).collect();
    assert_eq!(statuses.len(), 2);
    assert!(statuses.contains(&RunStatus::Failed));
    assert!(statuses.contains(&RunStatus::Completed));
    assert!(h.storage.read_cohort_table(1997).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn test_uningested_cohort_fails() -> Result<()> {
    let h = harness(RESPONSES).await?;
    h.storage.clear_cohort(1997).await?;
    assert!(h.pipeline.run(1997, TranslationPolicy::Lenient).await.is_err());
    Ok(())
}

/// Memory store whose response inserts can be switched to fail. It keeps the
/// trait's default `replace_cohort`.
struct FlakyStorage {
    inner: InMemoryStorage,
    fail_inserts: AtomicBool,
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn put_question_mapping(
        &self,
        cohort: i32,
        mapping: &QuestionMapping,
    ) -> cohort_wrangler::Result<()> {
        self.inner.put_question_mapping(cohort, mapping).await
    }
    async fn get_question_mapping(&self, cohort: i32) -> cohort_wrangler::Result<Option<QuestionMapping>> {
        self.inner.get_question_mapping(cohort).await
    }
    async fn insert_responses(
        &self,
        cohort: i32,
        responses: &[RawResponse],
    ) -> cohort_wrangler::Result<usize> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(WranglerError::Storage {
                message: "disk full".to_string(),
            });
        }
        self.inner.insert_responses(cohort, responses).await
    }
    async fn read_responses(&self, cohort: i32) -> cohort_wrangler::Result<Vec<RawResponse>> {
        self.inner.read_responses(cohort).await
    }
    async fn clear_cohort(&self, cohort: i32) -> cohort_wrangler::Result<()> {
        self.inner.clear_cohort(cohort).await
    }
    async fn write_cohort_table(&self, table: &CohortTable) -> cohort_wrangler::Result<()> {
        self.inner.write_cohort_table(table).await
    }
    async fn read_cohort_table(&self, cohort: i32) -> cohort_wrangler::Result<Option<CohortTable>> {
        self.inner.read_cohort_table(cohort).await
    }
    async fn create_cohort_run(&self, run: &mut CohortRun) -> cohort_wrangler::Result<()> {
        self.inner.create_cohort_run(run).await
    }
    async fn update_cohort_run(&self, run: &CohortRun) -> cohort_wrangler::Result<()> {
        self.inner.update_cohort_run(run).await
    }
    async fn list_cohort_runs(&self, cohort: i32) -> cohort_wrangler::Result<Vec<CohortRun>> {
        self.inner.list_cohort_runs(cohort).await
    }
}

#[tokio::test]
async fn test_failed_reingest_leaves_cohort_unpublishable() -> Result<()> {
    let dir = tempdir()?;
    let config = Arc::new(write_fixture(dir.path(), RESPONSES)?);
    let flaky = Arc::new(FlakyStorage {
        inner: InMemoryStorage::new(),
        fail_inserts: AtomicBool::new(false),
    });
    ingest_cohort(flaky.as_ref(), config.cohort_source(1997)?).await?;

    flaky.fail_inserts.store(true, Ordering::SeqCst);
    let err = ingest_cohort(flaky.as_ref(), config.cohort_source(1997)?)
        .await
        .expect_err("response insert fails");
    assert!(matches!(err, WranglerError::Storage { .. }));
    assert!(flaky.get_question_mapping(1997).await?.is_none());

    let storage: Arc<dyn Storage> = flaky.clone();
    let reference = Arc::new(ReferenceData::load(&config)?);
    let pipeline = CohortPipeline::new(reference, config, storage.clone());
    assert!(pipeline.run(1997, TranslationPolicy::Lenient).await.is_err());
    assert!(storage.read_cohort_table(1997).await?.is_none());

    let runs = storage.list_cohort_runs(1997).await?;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    Ok(())
}

#[tokio::test]
async fn test_sqlite_store_round_trip() -> Result<()> {
    let dir = tempdir()?;
    let config = Arc::new(write_fixture(dir.path(), RESPONSES)?);

    {
        let storage = SqliteStorage::open(&config.storage.sqlite_path)?;
        let stats = ingest_cohort(&storage, config.cohort_source(1997)?).await?;
        assert_eq!(stats.respondents, 2);
        assert_eq!(stats.responses, 13);
    }

    // A second handle sees what the first one ingested
    let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open(&config.storage.sqlite_path)?);
    let reference = Arc::new(ReferenceData::load(&config)?);
    let pipeline = CohortPipeline::new(reference, config.clone(), storage.clone());
    let result = pipeline.run(1997, TranslationPolicy::Lenient).await?;

    let table = storage.read_cohort_table(1997).await?.expect("table published");
    assert_eq!(table.rows.len(), result.published_rows);
    assert_eq!(row_cell(&table, 2, 2000, "shock"), Some(&Cell::Int(1)));

    let runs = storage.list_cohort_runs(1997).await?;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].id, result.run_id);
    Ok(())
}

#[test]
fn test_harness_config_resolves_paths() -> Result<()> {
    let dir = tempdir()?;
    let config = write_fixture(dir.path(), RESPONSES)?;
    assert!(config.reference.dictionary.starts_with(dir.path()));
    assert!(config.cohort_source(1997)?.responses_file.exists());
    Ok(())
}
