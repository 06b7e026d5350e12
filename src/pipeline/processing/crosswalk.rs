use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::constants;
use crate::error::{Result, WranglerError};
use crate::observability::metrics;
use crate::pipeline::processing::binning::{Bin, CategoryBins};
use crate::types::{FieldValue, LongitudinalTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Industry,
    Occupation,
}

impl Classification {
    pub fn field_name(&self) -> &'static str {
        match self {
            Classification::Industry => constants::INDUSTRY,
            Classification::Occupation => constants::OCCUPATION,
        }
    }
}

/// One crosswalk row as stored in the reference document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrosswalkRowDoc {
    pub description: String,
    #[serde(default)]
    pub canonical: Option<i64>,
    /// Source code per scheme column, e.g. `census_1970`
    #[serde(default)]
    pub codes: BTreeMap<String, i64>,
}

/// Rows whose description letters are all upper case open a category.
pub fn is_category_header(description: &str) -> bool {
    let mut letters = description.chars().filter(|c| c.is_alphabetic()).peekable();
    letters.peek().is_some() && letters.all(|c| c.is_uppercase())
}

#[derive(Debug, Clone)]
pub struct CrosswalkTable {
    classification: Classification,
    rows: Vec<CrosswalkRowDoc>,
    /// column -> source code -> canonical code
    index: HashMap<String, HashMap<i64, i64>>,
}

impl CrosswalkTable {
    pub fn from_rows(classification: Classification, rows: Vec<CrosswalkRowDoc>) -> Self {
        let mut index: HashMap<String, HashMap<i64, i64>> = HashMap::new();
        for row in &rows {
            let Some(canonical) = row.canonical else {
                continue;
            };
            for (column, code) in &row.codes {
                // First row wins
                index
                    .entry(column.clone())
                    .or_default()
                    .entry(*code)
                    .or_insert(canonical);
            }
        }
        Self {
            classification,
            rows,
            index,
        }
    }

    pub fn load<P: AsRef<Path>>(classification: Classification, path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let rows: Vec<CrosswalkRowDoc> = serde_json::from_str(&content)?;
        Ok(Self::from_rows(classification, rows))
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.index.contains_key(column)
    }

    pub fn lookup(&self, column: &str, code: i64) -> Option<i64> {
        self.index.get(column).and_then(|codes| codes.get(&code)).copied()
    }

    /// Category bins over canonical codes. Each header groups the rows that
    /// follow it, and the bin spans the lowest to highest canonical code in
    /// the group. Groups whose spans interleave are rejected.
    pub fn categories(&self) -> Result<CategoryBins> {
        let mut bins = Vec::new();
        let mut current: Option<(String, Option<(i64, i64)>)> = None;

        let mut close = |group: Option<(String, Option<(i64, i64)>)>| {
            if let Some((label, Some((lower, upper)))) = group {
                bins.push(Bin::new(lower, upper, &label));
            }
        };

        for row in &self.rows {
            if is_category_header(&row.description) {
                close(current.take());
                current = Some((row.description.trim().to_string(), None));
                continue;
            }
            if let (Some((_, span)), Some(code)) = (current.as_mut(), row.canonical) {
                *span = Some(match *span {
                    Some((lower, upper)) => (lower.min(code), upper.max(code)),
                    None => (code, code),
                });
            }
        }
        close(current.take());

        let bins = CategoryBins::new(bins);
        if let Some((first, second)) = bins.first_overlap() {
            return Err(WranglerError::Config(format!(
                "{} categories '{}' ({}..={}) and '{}' ({}..={}) overlap",
                self.classification.field_name(),
                first.label,
                first.lower,
                first.upper,
                second.label,
                second.lower,
                second.upper
            )));
        }
        Ok(bins)
    }
}

/// Which crosswalk column codes a cohort's observations in a range of years.
/// The range is half-open: `from_year <= year < until_year`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemeBinding {
    pub cohort: i32,
    pub classification: Classification,
    pub column: String,
    #[serde(default)]
    pub from_year: Option<i32>,
    #[serde(default)]
    pub until_year: Option<i32>,
}

impl SchemeBinding {
    fn start(&self) -> i32 {
        self.from_year.unwrap_or(i32::MIN)
    }

    fn end(&self) -> i32 {
        self.until_year.unwrap_or(i32::MAX)
    }

    pub fn applies(&self, cohort: i32, classification: Classification, year: i32) -> bool {
        self.cohort == cohort
            && self.classification == classification
            && self.start() <= year
            && year < self.end()
    }

    fn overlaps(&self, other: &SchemeBinding) -> bool {
        self.cohort == other.cohort
            && self.classification == other.classification
            && self.start() < other.end()
            && other.start() < self.end()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReclassifyStats {
    pub remapped: usize,
    pub unmatched: usize,
}

/// Both crosswalks plus the declarative (cohort, scheme, years) bindings
#[derive(Debug, Clone)]
pub struct CrosswalkSet {
    industry: CrosswalkTable,
    occupation: CrosswalkTable,
    industry_bins: CategoryBins,
    occupation_bins: CategoryBins,
    schemes: Vec<SchemeBinding>,
}

impl CrosswalkSet {
    pub fn new(
        industry: CrosswalkTable,
        occupation: CrosswalkTable,
        schemes: Vec<SchemeBinding>,
    ) -> Result<Self> {
        for (i, binding) in schemes.iter().enumerate() {
            if binding.start() >= binding.end() {
                return Err(WranglerError::Config(format!(
                    "scheme binding '{}' for cohort {} has an empty year range",
                    binding.column, binding.cohort
                )));
            }
            if let Some(other) = schemes[i + 1..].iter().find(|o| binding.overlaps(o)) {
                return Err(WranglerError::Config(format!(
                    "scheme bindings '{}' and '{}' overlap for cohort {} {:?}",
                    binding.column, other.column, binding.cohort, binding.classification
                )));
            }
        }

        let set = Self {
            industry_bins: industry.categories()?,
            occupation_bins: occupation.categories()?,
            industry,
            occupation,
            schemes,
        };
        for binding in &set.schemes {
            if !set.table(binding.classification).has_column(&binding.column) {
                warn!(
                    cohort = binding.cohort,
                    column = %binding.column,
                    "Crosswalk has no codes for bound scheme column"
                );
            }
        }
        Ok(set)
    }

    pub fn table(&self, classification: Classification) -> &CrosswalkTable {
        match classification {
            Classification::Industry => &self.industry,
            Classification::Occupation => &self.occupation,
        }
    }

    pub fn categories(&self, classification: Classification) -> &CategoryBins {
        match classification {
            Classification::Industry => &self.industry_bins,
            Classification::Occupation => &self.occupation_bins,
        }
    }

    pub fn scheme_for(&self, cohort: i32, classification: Classification, year: i32) -> Option<&SchemeBinding> {
        self.schemes
            .iter()
            .find(|s| s.applies(cohort, classification, year))
    }

    /// Remaps industry and occupation codes to canonical codes in place.
    /// Each value is looked up once, from its observed code; codes without a
    /// crosswalk entry stay as they are.
    pub fn reclassify(&self, cohort: i32, table: &mut LongitudinalTable) -> ReclassifyStats {
        let mut stats = ReclassifyStats::default();

        for record in table.records_mut() {
            let year = record.year();
            for classification in [Classification::Industry, Classification::Occupation] {
                let field = classification.field_name();
                let Some(code) = record.get(field).and_then(|v| v.as_code()) else {
                    continue;
                };
                if code < 0 {
                    continue;
                }
                let canonical = self
                    .scheme_for(cohort, classification, year)
                    .and_then(|scheme| self.table(classification).lookup(&scheme.column, code));
                match canonical {
                    Some(canonical) => {
                        record.set(field, FieldValue::Code(canonical));
                        stats.remapped += 1;
                    }
                    None => stats.unmatched += 1,
                }
            }
        }

        metrics::crosswalk::codes_remapped(stats.remapped);
        metrics::crosswalk::codes_unmatched(stats.unmatched);
        info!(
            cohort,
            remapped = stats.remapped,
            unmatched = stats.unmatched,
            "Reclassified industry and occupation codes"
        );
        stats
    }
}
