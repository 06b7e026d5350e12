use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Result, WranglerError};
use crate::pipeline::processing::inflation::InflationAdjuster;
use crate::pipeline::processing::translate::rules::anchored;
use crate::pipeline::processing::translate::{FieldRuleDoc, Translator, ValueRule};
use crate::types::SurveyYear;

/// Question code and survey year behind one rnum
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedQuestion {
    pub question_code: String,
    pub year: SurveyYear,
}

/// rnum -> (question code, year) for one cohort
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionMapping {
    entries: HashMap<String, MappedQuestion>,
}

impl QuestionMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the mapping from the two line-aligned files: one rnum per line,
    /// and one `QUESTION_CODE,YEAR` per line. Line `i` of one file describes
    /// line `i` of the other. Only trailing blank lines are ignored; a count
    /// mismatch or a blank line facing a non-blank one is fatal.
    pub fn from_positional(rnum_content: &str, qname_content: &str) -> Result<Self> {
        let rnums = positional_lines(rnum_content);
        let questions = positional_lines(qname_content);
        if rnums.len() != questions.len() {
            return Err(WranglerError::MisalignedMappingFiles(format!(
                "{} rnum lines but {} question lines",
                rnums.len(),
                questions.len()
            )));
        }

        let mut mapping = Self::new();
        for (line_no, (rnum, question)) in rnums.iter().zip(questions.iter()).enumerate() {
            let line_no = line_no + 1;
            match (rnum.is_empty(), question.is_empty()) {
                (true, true) => continue,
                (true, false) | (false, true) => {
                    return Err(WranglerError::MisalignedMappingFiles(format!(
                        "line {}: rnum '{}' faces question '{}'",
                        line_no, rnum, question
                    )));
                }
                (false, false) => {}
            }

            let (code, year) = question.split_once(',').ok_or_else(|| {
                WranglerError::MisalignedMappingFiles(format!(
                    "line {}: expected QUESTION_CODE,YEAR but found '{}'",
                    line_no, question
                ))
            })?;
            let year = SurveyYear::parse(year).ok_or_else(|| {
                WranglerError::MisalignedMappingFiles(format!(
                    "line {}: '{}' is not a survey year",
                    line_no,
                    year.trim()
                ))
            })?;
            if mapping.resolve(rnum).is_some() {
                debug!("rnum {} listed twice; line {} wins", rnum, line_no);
            }
            mapping.insert(rnum, code.trim(), year);
        }
        Ok(mapping)
    }

    pub fn insert(&mut self, rnum: &str, question_code: &str, year: SurveyYear) {
        self.entries.insert(
            rnum.to_string(),
            MappedQuestion {
                question_code: question_code.to_string(),
                year,
            },
        );
    }

    pub fn resolve(&self, rnum: &str) -> Option<&MappedQuestion> {
        self.entries.get(rnum)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MappedQuestion)> {
        self.entries.iter()
    }
}

/// Trimmed lines with trailing blank lines dropped
fn positional_lines(content: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = content.lines().map(str::trim).collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DictionaryDocument {
    pub cohorts: BTreeMap<String, CohortDictionaryDoc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CohortDictionaryDoc {
    #[serde(default)]
    pub static_fields: BTreeMap<String, String>,
    #[serde(default)]
    pub dynamic_fields: BTreeMap<String, String>,
    #[serde(default)]
    pub static_patterns: Vec<FieldPatternDoc>,
    #[serde(default)]
    pub dynamic_patterns: Vec<FieldPatternDoc>,
    #[serde(default)]
    pub values: BTreeMap<String, FieldRuleDoc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldPatternDoc {
    pub pattern: String,
    pub field: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldScope {
    /// Time-invariant respondent attribute
    Static,
    /// Per-year field
    Dynamic,
}

/// Question-code resolution and value rules for one cohort
#[derive(Debug, Clone)]
pub struct CohortDictionary {
    cohort: i32,
    static_fields: HashMap<String, String>,
    dynamic_fields: HashMap<String, String>,
    patterns: Vec<(Regex, FieldScope, String)>,
    translator: Translator,
}

impl CohortDictionary {
    fn compile(cohort: i32, doc: &CohortDictionaryDoc, adjuster: Arc<InflationAdjuster>) -> Result<Self> {
        if let Some(code) = doc
            .static_fields
            .keys()
            .find(|code| doc.dynamic_fields.contains_key(*code))
        {
            return Err(WranglerError::Config(format!(
                "cohort {}: question code '{}' is both static and dynamic",
                cohort, code
            )));
        }

        let mut patterns = Vec::new();
        for p in &doc.static_patterns {
            patterns.push((anchored(&p.pattern)?, FieldScope::Static, p.field.clone()));
        }
        for p in &doc.dynamic_patterns {
            patterns.push((anchored(&p.pattern)?, FieldScope::Dynamic, p.field.clone()));
        }

        let mut rules = HashMap::new();
        for (field, rule) in &doc.values {
            rules.insert(field.clone(), ValueRule::compile(field, rule)?);
        }

        Ok(Self {
            cohort,
            static_fields: doc.static_fields.clone().into_iter().collect(),
            dynamic_fields: doc.dynamic_fields.clone().into_iter().collect(),
            patterns,
            translator: Translator::new(rules, adjuster),
        })
    }

    pub fn cohort(&self) -> i32 {
        self.cohort
    }

    /// Exact entries first, then patterns in declaration order (static
    /// patterns before dynamic ones). `None` means the code is unmapped.
    pub fn resolve(&self, question_code: &str) -> Option<(FieldScope, &str)> {
        if let Some(field) = self.static_fields.get(question_code) {
            return Some((FieldScope::Static, field.as_str()));
        }
        if let Some(field) = self.dynamic_fields.get(question_code) {
            return Some((FieldScope::Dynamic, field.as_str()));
        }
        self.patterns
            .iter()
            .find(|(re, _, _)| re.is_match(question_code))
            .map(|(_, scope, field)| (*scope, field.as_str()))
    }

    pub fn translator(&self) -> &Translator {
        &self.translator
    }
}

/// Every cohort's dictionary, loaded once per run
#[derive(Debug, Clone)]
pub struct FieldDictionary {
    cohorts: BTreeMap<i32, CohortDictionary>,
}

impl FieldDictionary {
    pub fn from_json_str(content: &str, adjuster: Arc<InflationAdjuster>) -> Result<Self> {
        let doc: DictionaryDocument = serde_json::from_str(content)?;
        Self::from_document(&doc, adjuster)
    }

    pub fn from_document(doc: &DictionaryDocument, adjuster: Arc<InflationAdjuster>) -> Result<Self> {
        let mut cohorts = BTreeMap::new();
        for (key, cohort_doc) in &doc.cohorts {
            let cohort: i32 = key.trim().parse().map_err(|_| {
                WranglerError::Config(format!("dictionary cohort key '{}' is not a year", key))
            })?;
            let dictionary = CohortDictionary::compile(cohort, cohort_doc, adjuster.clone())?;
            debug!(
                cohort,
                static_fields = dictionary.static_fields.len(),
                dynamic_fields = dictionary.dynamic_fields.len(),
                patterns = dictionary.patterns.len(),
                "Compiled cohort dictionary"
            );
            cohorts.insert(cohort, dictionary);
        }
        Ok(Self { cohorts })
    }

    pub fn load<P: AsRef<Path>>(path: P, adjuster: Arc<InflationAdjuster>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content, adjuster)
    }

    pub fn cohort(&self, cohort: i32) -> Result<&CohortDictionary> {
        self.cohorts
            .get(&cohort)
            .ok_or(WranglerError::UnknownCohort(cohort))
    }

    pub fn cohort_years(&self) -> Vec<i32> {
        self.cohorts.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::reference::{EconomicContext, YearContext};

    fn adjuster() -> Arc<InflationAdjuster> {
        let context =
            EconomicContext::from_rows(vec![YearContext::new(1979, 5.8, 3.2, 0.113)]).unwrap();
        Arc::new(InflationAdjuster::from_context(&context))
    }

    const DICTIONARY: &str = r#"{
        "cohorts": {
            "1979": {
                "static_fields": {"SAMPLE_RACE_78SCRN": "race"},
                "dynamic_fields": {"Q13-5": "adjusted_income"},
                "dynamic_patterns": [{"pattern": "HGCREV\\d\\d", "field": "highest_grade"}],
                "values": {"race": {"kind": "lookup", "exact": {"1": 2}}}
            }
        }
    }"#;

    #[test]
    fn test_positional_mapping() {
        let mapping = QuestionMapping::from_positional(
            "R0000100\nR0214700\nR0406510\n\n\n",
            "CASEID,1979\nSAMPLE_RACE_78SCRN,1979\nHGCREV80,XRND\n",
        )
        .unwrap();
        assert_eq!(mapping.len(), 3);
        let question = mapping.resolve("R0406510").unwrap();
        assert_eq!(question.question_code, "HGCREV80");
        assert_eq!(question.year, SurveyYear::Constructed);
        assert!(mapping.resolve("R9999999").is_none());
    }

    #[test]
    fn test_positional_mismatch_is_fatal() {
        let err = QuestionMapping::from_positional("R1\nR2\n", "A,1979\n").unwrap_err();
        assert!(matches!(err, WranglerError::MisalignedMappingFiles(_)));

        let err = QuestionMapping::from_positional("R1\n", "A-1979\n").unwrap_err();
        assert!(matches!(err, WranglerError::MisalignedMappingFiles(_)));
    }

    #[test]
    fn test_interior_blank_line_breaks_alignment() {
        let err = QuestionMapping::from_positional("R1\n\nR3\n", "A,1979\nB,1979\n").unwrap_err();
        assert!(matches!(err, WranglerError::MisalignedMappingFiles(_)));

        let err =
            QuestionMapping::from_positional("R1\nR2\nR3\n", "A,1979\n\nC,1979\n").unwrap_err();
        assert!(matches!(err, WranglerError::MisalignedMappingFiles(_)));

        // Blank on both sides keeps the files in step
        let mapping =
            QuestionMapping::from_positional("R1\n\nR3\n", "A,1979\n\nC,1981\n").unwrap();
        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping.resolve("R3").unwrap().question_code, "C");
        assert_eq!(mapping.resolve("R3").unwrap().year, SurveyYear::Fixed(1981));
    }

    #[test]
    fn test_resolve_exact_then_pattern() {
        let dictionary = FieldDictionary::from_json_str(DICTIONARY, adjuster()).unwrap();
        let cohort = dictionary.cohort(1979).unwrap();
        assert_eq!(cohort.resolve("SAMPLE_RACE_78SCRN"), Some((FieldScope::Static, "race")));
        assert_eq!(cohort.resolve("Q13-5"), Some((FieldScope::Dynamic, "adjusted_income")));
        assert_eq!(cohort.resolve("HGCREV96"), Some((FieldScope::Dynamic, "highest_grade")));
        // Anchored at the start
        assert_eq!(cohort.resolve("XHGCREV96"), None);
        assert_eq!(dictionary.cohort_years(), vec![1979]);
        assert!(matches!(
            dictionary.cohort(1997),
            Err(WranglerError::UnknownCohort(1997))
        ));
    }

    #[test]
    fn test_code_in_both_maps_is_rejected() {
        let doc = r#"{"cohorts": {"1997": {
            "static_fields": {"KEY!SEX": "sex"},
            "dynamic_fields": {"KEY!SEX": "sex"}
        }}}"#;
        assert!(matches!(
            FieldDictionary::from_json_str(doc, adjuster()),
            Err(WranglerError::Config(_))
        ));
    }
}
