// Pipeline ingestion: positional question mappings and wide response files

use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{info, instrument, warn};

use crate::config::CohortSource;
use crate::constants::CASE_ID_RNUM;
use crate::error::{Result, WranglerError};
use crate::pipeline::processing::dictionary::QuestionMapping;
use crate::storage::Storage;
use crate::types::RawResponse;

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestStats {
    pub cohort: i32,
    pub mapped_rnums: usize,
    pub respondents: usize,
    pub responses: usize,
    pub duration_secs: f64,
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| {
        WranglerError::MalformedInput(format!("Failed to read '{}': {}", path.display(), e))
    })
}

/// Reads the rnum and question files of a cohort and pairs them line by line.
pub fn read_question_mapping(source: &CohortSource) -> Result<QuestionMapping> {
    let rnums = read_file(&source.rnum_file)?;
    let questions = read_file(&source.qname_file)?;
    QuestionMapping::from_positional(&rnums, &questions)
}

/// Parses a wide integer matrix whose header row holds rnums. One
/// `RawResponse` per non-empty cell, the case-id column excluded.
pub fn parse_wide_responses(cohort: i32, content: &str) -> Result<Vec<RawResponse>> {
    let mut lines = content
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty());

    let (_, header) = lines
        .next()
        .ok_or_else(|| WranglerError::MalformedInput("responses file is empty".to_string()))?;
    let rnums: Vec<&str> = header.split(',').map(str::trim).collect();
    let id_column = rnums
        .iter()
        .position(|r| *r == CASE_ID_RNUM)
        .ok_or_else(|| {
            WranglerError::MalformedInput(format!("header has no {} column", CASE_ID_RNUM))
        })?;

    let mut responses = Vec::new();
    for (index, line) in lines {
        let line_no = index + 1;
        let cells: Vec<&str> = line.split(',').map(str::trim).collect();
        if cells.len() != rnums.len() {
            return Err(WranglerError::MalformedInput(format!(
                "line {} has {} cells, header has {}",
                line_no,
                cells.len(),
                rnums.len()
            )));
        }
        let respondent_id = parse_cell(cells[id_column], line_no, CASE_ID_RNUM)?;

        for (column, cell) in cells.iter().enumerate() {
            if column == id_column || cell.is_empty() {
                continue;
            }
            responses.push(RawResponse {
                cohort,
                rnum: rnums[column].to_string(),
                respondent_id,
                value: parse_cell(cell, line_no, rnums[column])?,
            });
        }
    }
    Ok(responses)
}

fn parse_cell(cell: &str, line_no: usize, rnum: &str) -> Result<i64> {
    cell.parse::<i64>().map_err(|_| {
        WranglerError::MalformedInput(format!(
            "line {}: value '{}' for {} is not an integer",
            line_no, cell, rnum
        ))
    })
}

/// Loads one cohort's input files into the store, replacing any earlier
/// ingestion of that cohort. Nothing is written when the files disagree.
#[instrument(skip(storage, source), fields(cohort = source.year))]
pub async fn ingest_cohort(storage: &dyn Storage, source: &CohortSource) -> Result<IngestStats> {
    let start = Instant::now();

    let mapping = read_question_mapping(source)?;
    let responses = parse_wide_responses(source.year, &read_file(&source.responses_file)?)?;

    let unmapped = responses
        .iter()
        .filter(|r| mapping.resolve(&r.rnum).is_none())
        .map(|r| r.rnum.as_str())
        .collect::<BTreeSet<_>>();
    if !unmapped.is_empty() {
        warn!(
            "{} response columns have no question mapping and will be skipped",
            unmapped.len()
        );
    }

    let inserted = storage
        .replace_cohort(source.year, &mapping, &responses)
        .await?;

    let respondents = responses
        .iter()
        .map(|r| r.respondent_id)
        .collect::<HashSet<_>>()
        .len();
    let stats = IngestStats {
        cohort: source.year,
        mapped_rnums: mapping.len(),
        respondents,
        responses: inserted,
        duration_secs: start.elapsed().as_secs_f64(),
    };
    info!(
        mapped_rnums = stats.mapped_rnums,
        respondents = stats.respondents,
        responses = stats.responses,
        "Ingested cohort"
    );
    Ok(stats)
}
