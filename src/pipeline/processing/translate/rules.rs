use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

use super::income::IncomeRule;
use crate::error::{Result, WranglerError};

/// What a matching rule entry turns the raw value into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Replacement {
    Code(i64),
    Keep(KeepMarker),
}

/// `"keep"`: return the raw value unchanged (distinct from mapping to 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeepMarker {
    Keep,
}

impl Replacement {
    pub fn apply(&self, raw: i64) -> i64 {
        match self {
            Replacement::Code(code) => *code,
            Replacement::Keep(_) => raw,
        }
    }
}

/// Serialized form of a field's translation rule
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldRuleDoc {
    PassThrough,
    Lookup(LookupDoc),
    ByYear {
        years: BTreeMap<String, FieldRuleDoc>,
        #[serde(default)]
        default: Option<Box<FieldRuleDoc>>,
    },
    Income(IncomeDoc),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LookupDoc {
    #[serde(default)]
    pub exact: BTreeMap<String, Replacement>,
    /// Tried in declaration order after exact matches
    #[serde(default)]
    pub patterns: Vec<PatternDoc>,
    #[serde(default)]
    pub other: Option<Replacement>,
    #[serde(default)]
    pub min_year: Option<i32>,
    #[serde(default)]
    pub max_year: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatternDoc {
    pub pattern: String,
    pub value: Replacement,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncomeDoc {
    /// Declared ceiling per survey year
    #[serde(default)]
    pub topcodes: BTreeMap<String, i64>,
    #[serde(default)]
    pub min_year: Option<i32>,
    #[serde(default)]
    pub max_year: Option<i32>,
}

/// Years a rule is valid for; open ends are unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct YearWindow {
    pub min: Option<i32>,
    pub max: Option<i32>,
}

impl YearWindow {
    pub fn check(&self, field: &str, year: Option<i32>) -> Result<()> {
        let Some(year) = year else {
            return Ok(());
        };
        if self.min.map_or(false, |min| year < min) || self.max.map_or(false, |max| year > max) {
            return Err(WranglerError::YearOutOfDomain {
                year,
                reason: format!(
                    "field '{}' is only valid for {}..={}",
                    field,
                    self.min.map_or("*".to_string(), |y| y.to_string()),
                    self.max.map_or("*".to_string(), |y| y.to_string()),
                ),
            });
        }
        Ok(())
    }
}

/// Exact, pattern and catch-all lookup
#[derive(Debug, Clone)]
pub struct LookupRule {
    exact: HashMap<i64, Replacement>,
    patterns: Vec<(Regex, Replacement)>,
    other: Option<Replacement>,
    window: YearWindow,
}

impl LookupRule {
    /// Resolution order: exact value, first matching pattern, catch-all.
    pub fn resolve(&self, raw: i64) -> Option<i64> {
        if let Some(replacement) = self.exact.get(&raw) {
            return Some(replacement.apply(raw));
        }
        let text = raw.to_string();
        if let Some((_, replacement)) = self.patterns.iter().find(|(re, _)| re.is_match(&text)) {
            return Some(replacement.apply(raw));
        }
        self.other.map(|r| r.apply(raw))
    }

    pub fn window(&self) -> YearWindow {
        self.window
    }
}

/// A compiled translation rule for one canonical field
#[derive(Debug, Clone)]
pub enum ValueRule {
    PassThrough,
    Lookup(LookupRule),
    ByYear {
        years: BTreeMap<i32, ValueRule>,
        default: Option<Box<ValueRule>>,
    },
    Income(IncomeRule),
}

impl ValueRule {
    pub fn compile(field: &str, doc: &FieldRuleDoc) -> Result<Self> {
        match doc {
            FieldRuleDoc::PassThrough => Ok(ValueRule::PassThrough),
            FieldRuleDoc::Lookup(lookup) => Ok(ValueRule::Lookup(compile_lookup(field, lookup)?)),
            FieldRuleDoc::ByYear { years, default } => {
                let mut compiled = BTreeMap::new();
                for (year, sub) in years {
                    compiled.insert(parse_year_key(field, year)?, ValueRule::compile(field, sub)?);
                }
                let default = match default {
                    Some(sub) => Some(Box::new(ValueRule::compile(field, sub)?)),
                    None => None,
                };
                Ok(ValueRule::ByYear {
                    years: compiled,
                    default,
                })
            }
            FieldRuleDoc::Income(income) => {
                let mut topcodes = BTreeMap::new();
                for (year, ceiling) in &income.topcodes {
                    topcodes.insert(parse_year_key(field, year)?, *ceiling);
                }
                Ok(ValueRule::Income(IncomeRule::new(
                    topcodes,
                    YearWindow {
                        min: income.min_year,
                        max: income.max_year,
                    },
                )))
            }
        }
    }
}

fn compile_lookup(field: &str, doc: &LookupDoc) -> Result<LookupRule> {
    let mut exact = HashMap::new();
    for (raw, replacement) in &doc.exact {
        let key: i64 = raw.trim().parse().map_err(|_| {
            WranglerError::Config(format!(
                "field '{}': exact key '{}' is not an integer",
                field, raw
            ))
        })?;
        exact.insert(key, *replacement);
    }
    let mut patterns = Vec::with_capacity(doc.patterns.len());
    for p in &doc.patterns {
        patterns.push((anchored(&p.pattern)?, p.value));
    }
    Ok(LookupRule {
        exact,
        patterns,
        other: doc.other,
        window: YearWindow {
            min: doc.min_year,
            max: doc.max_year,
        },
    })
}

/// Patterns match at the start of the text, like a prefix match.
pub fn anchored(pattern: &str) -> Result<Regex> {
    Ok(Regex::new(&format!("^(?:{})", pattern))?)
}

fn parse_year_key(field: &str, key: &str) -> Result<i32> {
    key.trim().parse().map_err(|_| {
        WranglerError::Config(format!("field '{}': year key '{}' is not a year", field, key))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(json: &str) -> ValueRule {
        let doc: FieldRuleDoc = serde_json::from_str(json).unwrap();
        ValueRule::compile("test_field", &doc).unwrap()
    }

    #[test]
    fn test_lookup_resolution_order() {
        let rule = compile(
            r#"{"kind": "lookup",
                "exact": {"93": 5},
                "patterns": [{"pattern": "9", "value": 0}, {"pattern": "\\d", "value": "keep"}],
                "other": 77}"#,
        );
        let ValueRule::Lookup(lookup) = rule else {
            panic!("expected lookup rule");
        };
        // Exact beats patterns
        assert_eq!(lookup.resolve(93), Some(5));
        // First pattern in declaration order wins
        assert_eq!(lookup.resolve(95), Some(0));
        assert_eq!(lookup.resolve(12), Some(12));
        // Anchored at the start: "-1" starts with neither "9" nor a digit
        assert_eq!(lookup.resolve(-1), Some(77));
    }

    #[test]
    fn test_lookup_without_catch_all_misses() {
        let rule = compile(r#"{"kind": "lookup", "exact": {"1": 2}}"#);
        let ValueRule::Lookup(lookup) = rule else {
            panic!("expected lookup rule");
        };
        assert_eq!(lookup.resolve(1), Some(2));
        assert_eq!(lookup.resolve(3), None);
    }

    #[test]
    fn test_by_year_compiles_nested_rules() {
        let rule = compile(
            r#"{"kind": "by_year",
                "years": {"1998": {"kind": "lookup", "exact": {"1": 2}},
                          "2000": {"kind": "income", "topcodes": {"2000": 100}}},
                "default": {"kind": "pass_through"}}"#,
        );
        let ValueRule::ByYear { years, default } = rule else {
            panic!("expected year-keyed rule");
        };
        assert_eq!(years.keys().copied().collect::<Vec<_>>(), vec![1998, 2000]);
        assert!(matches!(years.get(&2000), Some(ValueRule::Income(_))));
        assert!(matches!(default.as_deref(), Some(ValueRule::PassThrough)));
    }

    #[test]
    fn test_bad_keys_are_config_errors() {
        let doc: FieldRuleDoc =
            serde_json::from_str(r#"{"kind": "lookup", "exact": {"one": 2}}"#).unwrap();
        assert!(matches!(
            ValueRule::compile("f", &doc),
            Err(WranglerError::Config(_))
        ));

        let doc: FieldRuleDoc =
            serde_json::from_str(r#"{"kind": "income", "topcodes": {"later": 2}}"#).unwrap();
        assert!(matches!(
            ValueRule::compile("f", &doc),
            Err(WranglerError::Config(_))
        ));
    }

    #[test]
    fn test_year_window() {
        let window = YearWindow {
            min: Some(1980),
            max: Some(2000),
        };
        assert!(window.check("f", Some(1980)).is_ok());
        assert!(window.check("f", None).is_ok());
        assert!(matches!(
            window.check("f", Some(2001)),
            Err(WranglerError::YearOutOfDomain { year: 2001, .. })
        ));
    }
}
