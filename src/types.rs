use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use crate::constants::CONSTRUCTED_YEAR_MARKER;

/// Respondent case id as assigned by the survey.
pub type RespondentId = i64;

/// The year a question was asked in, as declared by the question mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SurveyYear {
    Fixed(i32),
    /// Constructed variable without a fixed year; resolved from the question code.
    Constructed,
}

impl SurveyYear {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw == CONSTRUCTED_YEAR_MARKER {
            return Some(SurveyYear::Constructed);
        }
        raw.parse::<i32>().ok().map(SurveyYear::Fixed)
    }

    pub fn as_label(&self) -> String {
        match self {
            SurveyYear::Fixed(y) => y.to_string(),
            SurveyYear::Constructed => CONSTRUCTED_YEAR_MARKER.to_string(),
        }
    }
}

/// A single raw answer as held by the response store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawResponse {
    pub cohort: i32,
    pub rnum: String,
    pub respondent_id: RespondentId,
    pub value: i64,
}

/// A value held in a respondent or longitudinal record.
/// Absence from a record means "unknown", which is distinct from a zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    /// A survey or canonical code, including negative non-response codes
    Code(i64),
    /// A dollar amount (possibly inflation-adjusted)
    Amount(f64),
    /// Income suppressed at the topcode ceiling
    Topcode,
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Code(c) => Some(*c as f64),
            FieldValue::Amount(a) => Some(*a),
            FieldValue::Topcode => None,
        }
    }

    pub fn as_code(&self) -> Option<i64> {
        match self {
            FieldValue::Code(c) => Some(*c),
            FieldValue::Amount(a) if a.fract() == 0.0 => Some(*a as i64),
            _ => None,
        }
    }

    /// Non-negative numeric value; negative codes are survey non-responses.
    pub fn is_valid(&self) -> bool {
        self.as_f64().map_or(false, |v| v >= 0.0)
    }
}

/// Forward-looking income shock label, anchored on the earlier year of a pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ShockLabel {
    Shock,
    NoShock,
    #[default]
    Unknown,
}

impl ShockLabel {
    pub fn as_code(&self) -> i64 {
        match self {
            ShockLabel::Shock => 1,
            ShockLabel::NoShock => 0,
            ShockLabel::Unknown => -1,
        }
    }
}

/// Time-invariant attributes of one respondent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RespondentRecord {
    pub respondent_id: RespondentId,
    pub attributes: BTreeMap<String, FieldValue>,
}

#[derive(Debug, Clone, Default)]
pub struct RespondentTable {
    records: BTreeMap<RespondentId, RespondentRecord>,
}

impl RespondentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last write wins: a later static value replaces an earlier one.
    pub fn set_attribute(&mut self, respondent_id: RespondentId, field: &str, value: FieldValue) {
        self.records
            .entry(respondent_id)
            .or_insert_with(|| RespondentRecord {
                respondent_id,
                attributes: BTreeMap::new(),
            })
            .attributes
            .insert(field.to_string(), value);
    }

    pub fn get(&self, respondent_id: RespondentId) -> Option<&RespondentRecord> {
        self.records.get(&respondent_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RespondentRecord> {
        self.records.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RespondentRecord> {
        self.records.values_mut()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// One respondent in one observed year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongitudinalRecord {
    respondent_id: RespondentId,
    year: i32,
    pub fields: BTreeMap<String, FieldValue>,
    pub shock: ShockLabel,
    pub prior_income: Option<f64>,
    pub income_change: Option<f64>,
}

impl LongitudinalRecord {
    pub fn new(respondent_id: RespondentId, year: i32) -> Self {
        Self {
            respondent_id,
            year,
            fields: BTreeMap::new(),
            shock: ShockLabel::Unknown,
            prior_income: None,
            income_change: None,
        }
    }

    pub fn respondent_id(&self) -> RespondentId {
        self.respondent_id
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn get(&self, field: &str) -> Option<FieldValue> {
        self.fields.get(field).copied()
    }

    pub fn set(&mut self, field: &str, value: FieldValue) {
        self.fields.insert(field.to_string(), value);
    }
}

/// Arena of longitudinal records with an O(1) (respondent, year) index.
///
/// Keys are unique: `open` returns the existing record for a key instead of
/// creating a second one.
#[derive(Debug, Clone, Default)]
pub struct LongitudinalTable {
    records: Vec<LongitudinalRecord>,
    index: HashMap<(RespondentId, i32), usize>,
}

impl LongitudinalTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record for (respondent, year), creating it on first
    /// observation. The flag is true when the record was created.
    pub fn open(&mut self, respondent_id: RespondentId, year: i32) -> (&mut LongitudinalRecord, bool) {
        let key = (respondent_id, year);
        let (idx, created) = match self.index.get(&key) {
            Some(idx) => (*idx, false),
            None => {
                self.records.push(LongitudinalRecord::new(respondent_id, year));
                let idx = self.records.len() - 1;
                self.index.insert(key, idx);
                (idx, true)
            }
        };
        (&mut self.records[idx], created)
    }

    pub fn get(&self, respondent_id: RespondentId, year: i32) -> Option<&LongitudinalRecord> {
        self.index
            .get(&(respondent_id, year))
            .map(|idx| &self.records[*idx])
    }

    pub fn position(&self, respondent_id: RespondentId, year: i32) -> Option<usize> {
        self.index.get(&(respondent_id, year)).copied()
    }

    pub fn records(&self) -> &[LongitudinalRecord] {
        &self.records
    }

    /// Mutable access to the records. Keys are private to the record, so the
    /// index stays valid.
    pub fn records_mut(&mut self) -> &mut [LongitudinalRecord] {
        &mut self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &LongitudinalRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Orders records by respondent then year and rebuilds the index.
    pub fn sort(&mut self) {
        self.records
            .sort_by_key(|r| (r.respondent_id, r.year));
        self.index = self
            .records
            .iter()
            .enumerate()
            .map(|(idx, r)| ((r.respondent_id, r.year), idx))
            .collect();
    }

    /// Contiguous index ranges holding each respondent's records.
    /// Only meaningful after `sort`.
    pub fn respondent_spans(&self) -> Vec<Range<usize>> {
        let mut spans = Vec::new();
        let mut start = 0;
        for idx in 1..=self.records.len() {
            if idx == self.records.len()
                || self.records[idx].respondent_id != self.records[start].respondent_id
            {
                spans.push(start..idx);
                start = idx;
            }
        }
        spans
    }
}

/// A cell of the denormalized output table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Int(i64),
    Float(f64),
    Text(String),
    Null,
}

impl From<FieldValue> for Cell {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Code(c) => Cell::Int(c),
            FieldValue::Amount(a) => Cell::Float(a),
            FieldValue::Topcode => Cell::Text(crate::constants::TOPCODE_MARKER.to_string()),
        }
    }
}

impl From<Option<f64>> for Cell {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Cell::Null, Cell::Float)
    }
}

pub type OutputRow = BTreeMap<String, Cell>;

/// The analysis-ready table for one cohort
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortTable {
    pub cohort: i32,
    pub columns: Vec<String>,
    pub rows: Vec<OutputRow>,
}

impl CohortTable {
    pub fn cell(&self, row: usize, column: &str) -> Option<&Cell> {
        self.rows.get(row).and_then(|r| r.get(column))
    }

    /// Rows for one respondent, in year order.
    pub fn rows_for(&self, respondent_id: RespondentId) -> Vec<&OutputRow> {
        self.rows
            .iter()
            .filter(|r| r.get(crate::constants::RESPONDENT_ID) == Some(&Cell::Int(respondent_id)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_survey_year_parse() {
        assert_eq!(SurveyYear::parse("1998"), Some(SurveyYear::Fixed(1998)));
        assert_eq!(SurveyYear::parse(" XRND "), Some(SurveyYear::Constructed));
        assert_eq!(SurveyYear::parse("nineteen"), None);
    }

    #[test]
    fn test_open_never_duplicates_a_key() {
        let mut table = LongitudinalTable::new();
        let (_, created) = table.open(7, 2000);
        assert!(created);
        let (record, created) = table.open(7, 2000);
        assert!(!created);
        record.set("family_size", FieldValue::Code(4));
        table.open(7, 2002);
        table.open(3, 2000);

        assert_eq!(table.len(), 3);
        assert_eq!(
            table.get(7, 2000).and_then(|r| r.get("family_size")),
            Some(FieldValue::Code(4))
        );
    }

    #[test]
    fn test_sort_rebuilds_index_and_spans() {
        let mut table = LongitudinalTable::new();
        table.open(2, 2004);
        table.open(1, 2002);
        table.open(2, 2000);
        table.open(1, 2000);
        table.sort();

        let keys: Vec<(i64, i32)> = table
            .iter()
            .map(|r| (r.respondent_id(), r.year()))
            .collect();
        assert_eq!(keys, vec![(1, 2000), (1, 2002), (2, 2000), (2, 2004)]);
        assert_eq!(table.position(2, 2000), Some(2));
        assert_eq!(table.respondent_spans(), vec![0..2, 2..4]);
    }

    #[test]
    fn test_field_value_validity() {
        assert!(FieldValue::Code(0).is_valid());
        assert!(!FieldValue::Code(-4).is_valid());
        assert!(!FieldValue::Topcode.is_valid());
        assert_eq!(FieldValue::Amount(12.0).as_code(), Some(12));
        assert_eq!(FieldValue::Amount(12.5).as_code(), None);
    }

    #[test]
    fn test_respondent_attribute_last_write_wins() {
        let mut respondents = RespondentTable::new();
        respondents.set_attribute(5, "race", FieldValue::Code(1));
        respondents.set_attribute(5, "race", FieldValue::Code(3));
        assert_eq!(respondents.len(), 1);
        assert_eq!(
            respondents.get(5).and_then(|r| r.attributes.get("race")).copied(),
            Some(FieldValue::Code(3))
        );
    }
}
